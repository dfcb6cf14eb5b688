//! EVM holdings: tokens from the backend, NFTs from the Alchemy NFT API

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::aggregator::{ChainHoldings, HoldingsSource};
use super::backend::{backend_token_chain, BackendClient, BackendToken};
use crate::core::{Chain, NftHolding, NftStandard, TokenHolding, WalletRef};

/// Pages fetched per owner before giving up on the rest
const MAX_NFT_PAGES: usize = 5;

/// Placeholder contract some indexers report for the native token
const NATIVE_PLACEHOLDER: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

fn alchemy_network(chain: Chain) -> Option<&'static str> {
    match chain {
        Chain::Ethereum => Some("eth-mainnet"),
        Chain::Polygon => Some("polygon-mainnet"),
        Chain::Base => Some("base-mainnet"),
        Chain::Solana => None,
    }
}

fn raw_balance(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.as_u64().map(|n| n.to_string())?,
        _ => return None,
    };
    (!raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())).then_some(raw)
}

/// Backend token shape to `TokenHolding`; `None` for entries that cannot be valued
pub fn normalize_backend_token(token: &BackendToken, requested: Chain) -> Option<TokenHolding> {
    let chain = backend_token_chain(token, requested)?;
    let Some(raw) = raw_balance(&token.balance) else {
        warn!(symbol = %token.symbol, "Skipping token with non-integer balance");
        return None;
    };
    let Some(decimals) = token.decimals else {
        warn!(symbol = %token.symbol, chain = %chain, "Skipping token without decimals");
        return None;
    };

    let contract_address = token
        .contract_address
        .as_deref()
        .map(str::trim)
        .filter(|a| !token.is_native && !a.is_empty() && !a.eq_ignore_ascii_case(NATIVE_PLACEHOLDER))
        .map(str::to_string);

    let market = token.market_data.clone().unwrap_or_default();
    let name = if token.name.is_empty() { token.symbol.clone() } else { token.name.clone() };

    Some(TokenHolding::new(
        chain,
        contract_address,
        token.symbol.clone(),
        name,
        decimals,
        raw,
        token.logo_url.clone(),
        market.price,
        market.price_change_24h,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnedNftsPage {
    #[serde(default)]
    owned_nfts: Vec<AlchemyNft>,
    #[serde(default)]
    page_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlchemyNft {
    pub contract: AlchemyContract,
    /// Decimal token id
    pub token_id: String,
    /// `ERC721` or `ERC1155`
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<AlchemyImage>,
    /// Marketplace collection, preferred over the contract name for grouping
    #[serde(default)]
    pub collection: Option<AlchemyCollection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlchemyContract {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Alchemy's spam classification; missing means unknown
    #[serde(default)]
    pub is_spam: Option<bool>,
    #[serde(default)]
    pub open_sea_metadata: Option<OpenSeaMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSeaMetadata {
    #[serde(default)]
    pub collection_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlchemyImage {
    #[serde(default)]
    pub cached_url: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlchemyCollection {
    #[serde(default)]
    pub name: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn normalize_alchemy_nft(nft: &AlchemyNft, chain: Chain) -> NftHolding {
    let collection_key = non_empty(nft.collection.as_ref().and_then(|c| c.name.as_ref()))
        .or_else(|| {
            non_empty(
                nft.contract
                    .open_sea_metadata
                    .as_ref()
                    .and_then(|m| m.collection_name.as_ref()),
            )
        })
        .or_else(|| non_empty(nft.contract.name.as_ref()));

    let image = nft
        .image
        .as_ref()
        .and_then(|i| non_empty(i.cached_url.as_ref()).or_else(|| non_empty(i.original_url.as_ref())))
        .unwrap_or_default();

    let standard = match nft.token_type.as_deref() {
        Some(t) if t.eq_ignore_ascii_case("ERC1155") => NftStandard::Erc1155,
        _ => NftStandard::Erc721,
    };

    NftHolding {
        chain,
        contract_address: nft.contract.address.clone(),
        token_id: nft.token_id.clone(),
        standard,
        name: non_empty(nft.name.as_ref()).unwrap_or_default(),
        image,
        collection_key,
        is_spam: nft.contract.is_spam.unwrap_or(false),
    }
}

pub struct BackendEvmSource {
    backend: BackendClient,
    alchemy_api_key: Option<String>,
    /// Overrides `https://{network}.g.alchemy.com`
    nft_base_url: Option<String>,
}

impl BackendEvmSource {
    pub fn new(backend: BackendClient, alchemy_api_key: Option<String>) -> Self {
        Self {
            backend,
            alchemy_api_key,
            nft_base_url: None,
        }
    }

    pub fn with_nft_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.nft_base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn nft_endpoint(&self, chain: Chain, api_key: &str) -> Option<String> {
        let base = match &self.nft_base_url {
            Some(base) => base.clone(),
            None => format!("https://{}.g.alchemy.com", alchemy_network(chain)?),
        };
        Some(format!("{}/nft/v3/{}/getNFTsForOwner", base, api_key))
    }

    async fn owner_nfts(&self, chain: Chain, owner: &str) -> Result<Vec<NftHolding>> {
        let Some(api_key) = self.alchemy_api_key.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(endpoint) = self.nft_endpoint(chain, api_key) else {
            return Ok(Vec::new());
        };

        let mut nfts = Vec::new();
        let mut page_key: Option<String> = None;

        for _ in 0..MAX_NFT_PAGES {
            let mut query = vec![("owner", owner.to_string()), ("withMetadata", "true".to_string())];
            if let Some(key) = &page_key {
                query.push(("pageKey", key.clone()));
            }

            let page: OwnedNftsPage = self
                .backend
                .http()
                .get(&endpoint)
                .query(&query)
                .send()
                .await
                .context("NFT request failed")?
                .error_for_status()
                .context("NFT request was rejected")?
                .json()
                .await
                .context("Failed to parse NFT response")?;

            nfts.extend(page.owned_nfts.iter().map(|nft| normalize_alchemy_nft(nft, chain)));

            match page.page_key {
                Some(key) if !key.is_empty() => page_key = Some(key),
                _ => break,
            }
        }

        Ok(nfts)
    }
}

#[async_trait]
impl HoldingsSource for BackendEvmSource {
    #[instrument(skip(self, addresses, access_token), fields(addresses = addresses.len()))]
    async fn fetch(&self, chain: Chain, addresses: &[String], access_token: &str) -> Result<ChainHoldings> {
        let wallets: Vec<WalletRef> = addresses.iter().map(|a| WalletRef::new(a.clone(), chain)).collect();
        let response = self.backend.wallet_tokens(&wallets, access_token).await?;

        let tokens = response
            .tokens
            .iter()
            .filter_map(|t| normalize_backend_token(t, chain))
            .filter(|t| t.chain == chain)
            .collect();

        // NFT failures only cost the NFT section for this chain
        let mut nfts = Vec::new();
        for owner in addresses {
            match self.owner_nfts(chain, owner).await {
                Ok(found) => nfts.extend(found),
                Err(e) => warn!(error = %e, owner = %owner, "NFT fetch failed"),
            }
        }

        debug!(nfts = nfts.len(), "EVM holdings fetched");
        Ok(ChainHoldings { tokens, nfts })
    }
}
