//! Backend wallet REST client

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ConfigError;
use crate::core::{Chain, WalletRef};

/// Token entry as returned by `POST /wallet/tokens`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendToken {
    /// Chain key in any casing the backend uses (`"BASE"`, `"matic"`)
    #[serde(default)]
    pub chain: Option<String>,
    /// Token contract; absent or a placeholder for the native token
    #[serde(default, alias = "address", alias = "tokenAddress")]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    /// `None` when the backend omits it; such entries cannot be scaled
    #[serde(default)]
    pub decimals: Option<u8>,
    /// Raw integer balance; some deployments send it as a number
    #[serde(default, alias = "rawBalance")]
    pub balance: Value,
    #[serde(default, alias = "logoURI", alias = "logo")]
    pub logo_url: Option<String>,
    /// USD price and 24h change
    #[serde(default)]
    pub market_data: Option<MarketData>,
    #[serde(default)]
    pub is_native: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    #[serde(default)]
    pub price: f64,
    #[serde(default, alias = "priceChangePercentage24h")]
    pub price_change_24h: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTokensResponse {
    #[serde(default)]
    pub tokens: Vec<BackendToken>,
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancePoint {
    pub created_at: DateTime<Utc>,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceHistory {
    pub balance_history: Vec<BalancePoint>,
    pub total_tokens_value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    #[serde(default)]
    balance_data: Option<BalanceData>,
    #[serde(default)]
    total_tokens_value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceData {
    #[serde(default)]
    balance_history: Vec<BalancePoint>,
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &Url) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    #[instrument(skip(self, access_token), fields(wallets = wallets.len()))]
    pub async fn wallet_tokens(
        &self,
        wallets: &[WalletRef],
        access_token: &str,
    ) -> Result<WalletTokensResponse> {
        let body = json!({
            "wallets": wallets
                .iter()
                .map(|w| json!({ "address": w.address, "chain": w.chain }))
                .collect::<Vec<_>>(),
        });

        let response: WalletTokensResponse = self
            .client
            .post(self.endpoint("wallet/tokens"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .context("Wallet tokens request failed")?
            .error_for_status()
            .context("Wallet tokens request was rejected")?
            .json()
            .await
            .context("Failed to parse wallet tokens response")?;

        debug!(tokens = response.tokens.len(), total_value = response.total_value, "Wallet tokens fetched");
        Ok(response)
    }

    #[instrument(skip(self, access_token))]
    pub async fn balance_history(&self, user_id: &str, access_token: &str) -> Result<BalanceHistory> {
        let response: BalanceResponse = self
            .client
            .get(self.endpoint(&format!("wallet/getBalance/{}", user_id)))
            .bearer_auth(access_token)
            .send()
            .await
            .context("Balance history request failed")?
            .error_for_status()
            .context("Balance history request was rejected")?
            .json()
            .await
            .context("Failed to parse balance history response")?;

        Ok(BalanceHistory {
            balance_history: response
                .balance_data
                .map(|data| data.balance_history)
                .unwrap_or_default(),
            total_tokens_value: response.total_tokens_value,
        })
    }
}

/// Chain reported on a backend token, falling back to the requested chain
pub fn backend_token_chain(token: &BackendToken, requested: Chain) -> Option<Chain> {
    match token.chain.as_deref() {
        None | Some("") => Some(requested),
        Some(key) => key.parse().ok(),
    }
}
