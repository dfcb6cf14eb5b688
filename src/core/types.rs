use serde::{Deserialize, Serialize};

use super::amount::human_balance;
use super::chain::Chain;

/// An (address, chain) pair the user controls
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletRef {
    pub address: String,
    pub chain: Chain,
}

impl WalletRef {
    pub fn new(address: impl Into<String>, chain: Chain) -> Self {
        Self {
            address: address.into(),
            chain,
        }
    }
}

/// Fungible token balance, normalized across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHolding {
    pub chain: Chain,
    /// `None` for the chain's native token
    pub contract_address: Option<String>,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// Integer balance in the smallest unit
    pub raw_balance: String,
    pub logo_url: Option<String>,
    /// USD per whole token; 0 when unpriced
    pub market_price: f64,
    /// Percent change over 24h
    pub price_change_24h: f64,
    /// Display valuation, derived in `new`
    pub value_usd: f64,
}

impl TokenHolding {
    /// Build a holding, deriving `value_usd` from the raw balance and price
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Chain,
        contract_address: Option<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        decimals: u8,
        raw_balance: impl Into<String>,
        logo_url: Option<String>,
        market_price: f64,
        price_change_24h: f64,
    ) -> Self {
        let raw_balance = raw_balance.into();
        let value_usd = human_balance(&raw_balance, decimals) * market_price;
        Self {
            chain,
            contract_address,
            symbol: symbol.into(),
            name: name.into(),
            decimals,
            raw_balance,
            logo_url,
            market_price,
            price_change_24h,
            value_usd,
        }
    }

    pub fn is_native(&self) -> bool {
        self.contract_address.is_none()
    }

    pub fn human_balance(&self) -> f64 {
        human_balance(&self.raw_balance, self.decimals)
    }
}

/// Token standard reported for an NFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NftStandard {
    Erc721,
    Erc1155,
    /// Metaplex non-fungible on Solana
    Metaplex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftHolding {
    pub chain: Chain,
    /// Contract address on EVM; mint address on Solana
    pub contract_address: String,
    pub token_id: String,
    pub standard: NftStandard,
    pub name: String,
    pub image: String,
    pub collection_key: Option<String>,
    pub is_spam: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftCollectionGroup {
    pub chain: Chain,
    pub collection_key: String,
    pub nfts: Vec<NftHolding>,
}

/// Immutable result of one aggregation cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingsSnapshot {
    pub tokens: Vec<TokenHolding>,
    pub collections: Vec<NftCollectionGroup>,
    pub standalone_nfts: Vec<NftHolding>,
    pub total_value_usd: f64,
    /// Set when at least one chain failed and contributed nothing
    pub partial_failure: bool,
    pub failed_chains: Vec<Chain>,
}

/// Resolved destination for a send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub address: String,
    pub is_ens: bool,
    pub ens_name: Option<String>,
    pub avatar: Option<String>,
}

impl Recipient {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_ens: false,
            ens_name: None,
            avatar: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_usd_from_raw_balance() {
        let holding = TokenHolding::new(
            Chain::Solana,
            None,
            "SOL",
            "Solana",
            9,
            "2500000000",
            None,
            150.0,
            1.2,
        );
        assert!(holding.is_native());
        assert!((holding.value_usd - 375.0).abs() < 1e-9);
    }
}
