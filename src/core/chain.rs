//! Chain registry
//!
//! Static description of every network the wallet can hold assets on: RPC
//! endpoint, native token metadata and explorer base. Built once at startup
//! and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wrapped SOL mint, used as the swap input for native SOL
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Unknown chain: {0}")]
    UnknownChain(String),
}

/// Fee/transaction semantics shared by a group of chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    Evm,
    Solana,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Ethereum,
    Polygon,
    Base,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Ethereum, Chain::Polygon, Chain::Base, Chain::Solana];

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Solana => ChainFamily::Solana,
            _ => ChainFamily::Evm,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM",
            Chain::Polygon => "POLYGON",
            Chain::Base => "BASE",
            Chain::Solana => "SOLANA",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Chain {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(Chain::Ethereum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "base" => Ok(Chain::Base),
            "solana" | "sol" => Ok(Chain::Solana),
            _ => Err(ChainError::UnknownChain(s.to_string())),
        }
    }
}

/// Immutable per-chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub chain: Chain,
    pub family: ChainFamily,
    pub rpc_url: String,
    pub native_symbol: String,
    pub native_decimals: u8,
    pub native_name: String,
    /// Base URL for transaction links, e.g. `https://etherscan.io/tx/`
    pub explorer_tx_base: String,
    /// EVM chain id; `None` for Solana
    pub chain_id: Option<u64>,
}

impl ChainDescriptor {
    pub fn tx_url(&self, hash: &str) -> String {
        format!("{}{}", self.explorer_tx_base, hash)
    }

    fn default_for(chain: Chain) -> Self {
        let (rpc_url, symbol, name, explorer, chain_id) = match chain {
            Chain::Ethereum => (
                "https://eth.llamarpc.com",
                "ETH",
                "Ethereum",
                "https://etherscan.io/tx/",
                Some(1),
            ),
            Chain::Polygon => (
                "https://polygon-rpc.com",
                "POL",
                "Polygon",
                "https://polygonscan.com/tx/",
                Some(137),
            ),
            Chain::Base => (
                "https://mainnet.base.org",
                "ETH",
                "Base",
                "https://basescan.org/tx/",
                Some(8453),
            ),
            Chain::Solana => (
                "https://api.mainnet-beta.solana.com",
                "SOL",
                "Solana",
                "https://solscan.io/tx/",
                None,
            ),
        };

        Self {
            chain,
            family: chain.family(),
            rpc_url: rpc_url.to_string(),
            native_symbol: symbol.to_string(),
            native_decimals: if chain == Chain::Solana { 9 } else { 18 },
            native_name: name.to_string(),
            explorer_tx_base: explorer.to_string(),
            chain_id,
        }
    }
}

/// Lookup table keyed by chain
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<Chain, ChainDescriptor>,
}

impl ChainRegistry {
    /// Registry with every supported chain on its public RPC endpoint
    pub fn with_defaults() -> Self {
        Self::with_rpc_overrides(&HashMap::new())
    }

    pub fn with_rpc_overrides(overrides: &HashMap<Chain, String>) -> Self {
        let chains = Chain::ALL
            .iter()
            .map(|chain| {
                let mut descriptor = ChainDescriptor::default_for(*chain);
                if let Some(url) = overrides.get(chain) {
                    descriptor.rpc_url = url.clone();
                }
                (*chain, descriptor)
            })
            .collect();

        Self { chains }
    }

    /// Registry restricted to the given descriptors
    pub fn from_descriptors(descriptors: Vec<ChainDescriptor>) -> Self {
        Self {
            chains: descriptors.into_iter().map(|d| (d.chain, d)).collect(),
        }
    }

    pub fn describe(&self, key: &str) -> Result<&ChainDescriptor, ChainError> {
        let chain = key.parse::<Chain>()?;
        self.chains
            .get(&chain)
            .ok_or_else(|| ChainError::UnknownChain(key.to_string()))
    }

    pub fn describe_chain(&self, chain: Chain) -> Result<&ChainDescriptor, ChainError> {
        self.chains
            .get(&chain)
            .ok_or_else(|| ChainError::UnknownChain(chain.to_string()))
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_chains() {
        let registry = ChainRegistry::with_defaults();

        let eth = registry.describe("ETHEREUM").unwrap();
        assert_eq!(eth.chain_id, Some(1));
        assert_eq!(eth.family, ChainFamily::Evm);
        assert_eq!(eth.native_decimals, 18);

        let base = registry.describe("base").unwrap();
        assert_eq!(base.chain_id, Some(8453));

        let sol = registry.describe("SOLANA").unwrap();
        assert_eq!(sol.family, ChainFamily::Solana);
        assert_eq!(sol.chain_id, None);
        assert_eq!(sol.native_decimals, 9);
    }

    #[test]
    fn test_unknown_chain_is_rejected() {
        let registry = ChainRegistry::with_defaults();
        assert_eq!(
            registry.describe("DOGECHAIN").unwrap_err(),
            ChainError::UnknownChain("DOGECHAIN".to_string())
        );
    }

    #[test]
    fn test_unregistered_chain_is_rejected() {
        let registry =
            ChainRegistry::from_descriptors(vec![ChainDescriptor::default_for(Chain::Solana)]);
        assert!(registry.describe_chain(Chain::Solana).is_ok());
        assert!(matches!(
            registry.describe_chain(Chain::Polygon),
            Err(ChainError::UnknownChain(_))
        ));
    }

    #[test]
    fn test_rpc_override_and_tx_url() {
        let mut overrides = HashMap::new();
        overrides.insert(Chain::Polygon, "http://localhost:8545".to_string());
        let registry = ChainRegistry::with_rpc_overrides(&overrides);

        let polygon = registry.describe_chain(Chain::Polygon).unwrap();
        assert_eq!(polygon.rpc_url, "http://localhost:8545");
        assert_eq!(polygon.tx_url("0xabc"), "https://polygonscan.com/tx/0xabc");
    }
}
