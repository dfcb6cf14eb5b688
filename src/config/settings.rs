//! Application settings loaded from TOML and environment variables

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::core::{Chain, ChainRegistry};

pub const CONFIG_PATH_ENV: &str = "WALLETFLOW_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Backend API base URL is not configured")]
    MissingApiBaseUrl,

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend REST base, e.g. `https://api.example.com/api/v1`
    pub api_base_url: String,
    /// Swap aggregator and platform fee
    pub swap: SwapSettings,
    /// Third-party holdings providers
    pub providers: ProviderSettings,
    /// Per-chain RPC overrides
    pub rpc: RpcSettings,
    pub balances: BalanceSettings,
    pub submission: SubmissionSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwapSettings {
    /// Jupiter API base (`/swap/v1/...` is appended)
    pub api_url: String,
    /// Slippage tolerance in basis points
    pub slippage_bps: u16,
    /// Platform fee in basis points, applied only with `fee_account`
    pub platform_fee_bps: u16,
    /// Token account collecting the platform fee; fees are off when unset
    pub fee_account: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Alchemy key for EVM NFTs; NFTs are skipped when unset
    pub alchemy_api_key: Option<String>,
    /// DAS-capable Solana RPC (e.g. Helius); falls back to the Solana RPC
    pub solana_das_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcSettings {
    pub ethereum: Option<String>,
    pub polygon: Option<String>,
    pub base: Option<String>,
    pub solana: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalanceSettings {
    /// How long a holdings snapshot is reused for the same wallet set
    pub cache_ttl_secs: u64,
    /// Refresh period of the holdings watcher
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionSettings {
    /// Broadcast retries after the first attempt
    pub max_retries: u32,
    /// Upper bound on waiting for finality
    pub confirm_timeout_secs: u64,
    /// Delay between confirmation status polls
    pub confirm_poll_interval_ms: u64,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            api_url: "https://lite-api.jup.ag".to_string(),
            slippage_bps: 50,
            platform_fee_bps: 50,
            fee_account: None,
        }
    }
}

impl Default for BalanceSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            poll_interval_secs: 60,
        }
    }
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confirm_timeout_secs: 90,
            confirm_poll_interval_ms: 2_000,
        }
    }
}

impl BalanceSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl SubmissionSettings {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }
}

impl AppConfig {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `WALLETFLOW_CONFIG` (if set), apply environment overrides and validate
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("WALLETFLOW_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = non_empty("WALLETFLOW_SWAP_API_URL") {
            self.swap.api_url = v;
        }
        if let Some(v) = non_empty("WALLETFLOW_FEE_ACCOUNT") {
            self.swap.fee_account = Some(v);
        }
        if let Some(v) = non_empty("WALLETFLOW_ALCHEMY_KEY") {
            self.providers.alchemy_api_key = Some(v);
        }
        if let Some(v) = non_empty("WALLETFLOW_SOLANA_DAS_URL") {
            self.providers.solana_das_url = Some(v);
        }
        if let Some(v) = non_empty("WALLETFLOW_ETHEREUM_RPC_URL") {
            self.rpc.ethereum = Some(v);
        }
        if let Some(v) = non_empty("WALLETFLOW_POLYGON_RPC_URL") {
            self.rpc.polygon = Some(v);
        }
        if let Some(v) = non_empty("WALLETFLOW_BASE_RPC_URL") {
            self.rpc.base = Some(v);
        }
        if let Some(v) = non_empty("WALLETFLOW_SOLANA_RPC_URL") {
            self.rpc.solana = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base_url()?;
        parse_url("swap.api_url", &self.swap.api_url)?;
        for (_, url) in self.rpc_overrides() {
            parse_url("rpc", &url)?;
        }

        // Zero periods panic in tokio::time::interval or spin the confirm loop
        let intervals = [
            ("balances.cache_ttl_secs", self.balances.cache_ttl_secs),
            ("balances.poll_interval_secs", self.balances.poll_interval_secs),
            ("submission.confirm_timeout_secs", self.submission.confirm_timeout_secs),
            ("submission.confirm_poll_interval_ms", self.submission.confirm_poll_interval_ms),
        ];
        if let Some((field, _)) = intervals.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroInterval(field));
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::MissingApiBaseUrl);
        }
        parse_url("api_base_url", &self.api_base_url)
    }

    pub fn rpc_overrides(&self) -> HashMap<Chain, String> {
        [
            (Chain::Ethereum, &self.rpc.ethereum),
            (Chain::Polygon, &self.rpc.polygon),
            (Chain::Base, &self.rpc.base),
            (Chain::Solana, &self.rpc.solana),
        ]
        .into_iter()
        .filter_map(|(chain, url)| url.clone().map(|u| (chain, u)))
        .collect()
    }

    pub fn chain_registry(&self) -> ChainRegistry {
        ChainRegistry::with_rpc_overrides(&self.rpc_overrides())
    }
}

pub(crate) fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })
}
