//! Solana holdings through the DAS `getAssetsByOwner` RPC method

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, instrument, warn};

use super::aggregator::{ChainHoldings, HoldingsSource};
use crate::config::ConfigError;
use crate::core::{Chain, NftHolding, NftStandard, TokenHolding};

const SOL_DECIMALS: u8 = 9;
const PAGE_LIMIT: u32 = 1000;

const NFT_INTERFACES: [&str; 6] = [
    "V1_NFT",
    "V2_NFT",
    "LEGACY_NFT",
    "ProgrammableNFT",
    "MplCoreAsset",
    "Custom",
];

#[derive(Debug, Deserialize)]
struct DasResponse {
    result: Option<AssetPage>,
    error: Option<DasError>,
}

#[derive(Debug, Deserialize)]
struct DasError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPage {
    #[serde(default)]
    pub items: Vec<DasAsset>,
    #[serde(default)]
    pub native_balance: Option<NativeBalance>,
}

#[derive(Debug, Deserialize)]
pub struct NativeBalance {
    pub lamports: u64,
    #[serde(default)]
    pub price_per_sol: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct DasAsset {
    pub id: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub content: Option<AssetContent>,
    #[serde(default)]
    pub grouping: Vec<AssetGroup>,
    #[serde(default)]
    pub token_info: Option<TokenInfo>,
    #[serde(default)]
    pub burnt: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssetContent {
    #[serde(default)]
    pub metadata: Option<AssetMetadata>,
    #[serde(default)]
    pub links: Option<AssetLinks>,
    #[serde(default)]
    pub files: Vec<AssetFile>,
}

#[derive(Debug, Deserialize)]
pub struct AssetMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssetLinks {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssetFile {
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssetGroup {
    pub group_key: String,
    pub group_value: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub symbol: Option<String>,
    /// Raw balance in the smallest unit
    #[serde(default)]
    pub balance: u64,
    /// Missing for some indexed mints; those are skipped
    #[serde(default)]
    pub decimals: Option<u8>,
    /// Absent for unpriced tokens
    #[serde(default)]
    pub price_info: Option<PriceInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PriceInfo {
    #[serde(default)]
    pub price_per_token: f64,
}

impl DasAsset {
    fn name(&self) -> Option<String> {
        self.content
            .as_ref()
            .and_then(|c| c.metadata.as_ref())
            .and_then(|m| m.name.clone())
            .filter(|n| !n.trim().is_empty())
    }

    fn image(&self) -> Option<String> {
        let content = self.content.as_ref()?;
        content
            .links
            .as_ref()
            .and_then(|l| l.image.clone())
            .or_else(|| content.files.iter().find_map(|f| f.uri.clone()))
            .filter(|i| !i.trim().is_empty())
    }

    fn collection(&self) -> Option<String> {
        self.grouping
            .iter()
            .find(|g| g.group_key == "collection")
            .map(|g| g.group_value.clone())
    }

    pub fn is_nft(&self) -> bool {
        NFT_INTERFACES.contains(&self.interface.as_str())
    }
}

/// Native SOL, fungible tokens, and NFTs from one DAS page
pub fn normalize_asset_page(page: &AssetPage) -> ChainHoldings {
    let mut holdings = ChainHoldings::default();

    if let Some(native) = &page.native_balance {
        holdings.tokens.push(TokenHolding::new(
            Chain::Solana,
            None,
            "SOL",
            "Solana",
            SOL_DECIMALS,
            native.lamports.to_string(),
            None,
            native.price_per_sol.unwrap_or(0.0),
            0.0,
        ));
    }

    for asset in page.items.iter().filter(|a| !a.burnt) {
        if asset.is_nft() {
            holdings.nfts.push(NftHolding {
                chain: Chain::Solana,
                contract_address: asset.id.clone(),
                token_id: asset.id.clone(),
                standard: NftStandard::Metaplex,
                name: asset.name().unwrap_or_default(),
                image: asset.image().unwrap_or_default(),
                collection_key: asset.collection(),
                is_spam: false,
            });
        } else if let Some(info) = &asset.token_info {
            if info.balance == 0 {
                continue;
            }
            let Some(decimals) = info.decimals else {
                warn!(mint = %asset.id, "Skipping token without decimals");
                continue;
            };
            let symbol = info
                .symbol
                .clone()
                .or_else(|| {
                    asset
                        .content
                        .as_ref()
                        .and_then(|c| c.metadata.as_ref())
                        .and_then(|m| m.symbol.clone())
                })
                .unwrap_or_default();
            let name = asset.name().unwrap_or_else(|| symbol.clone());
            let price = info.price_info.as_ref().map(|p| p.price_per_token).unwrap_or(0.0);

            holdings.tokens.push(TokenHolding::new(
                Chain::Solana,
                Some(asset.id.clone()),
                symbol,
                name,
                decimals,
                info.balance.to_string(),
                asset.image(),
                price,
                0.0,
            ));
        }
    }

    holdings
}

pub struct SolanaDasSource {
    client: Client,
    das_url: String,
}

impl SolanaDasSource {
    pub fn new(das_url: &str) -> Result<Self, ConfigError> {
        crate::config::parse_url("providers.solana_das_url", das_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            das_url: das_url.to_string(),
        })
    }

    async fn assets_by_owner(&self, owner: &str) -> Result<ChainHoldings> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": "walletflow",
            "method": "getAssetsByOwner",
            "params": {
                "ownerAddress": owner,
                "page": 1,
                "limit": PAGE_LIMIT,
                "displayOptions": {
                    "showFungible": true,
                    "showNativeBalance": true
                }
            }
        });

        let response: DasResponse = self
            .client
            .post(&self.das_url)
            .json(&request)
            .send()
            .await
            .context("getAssetsByOwner request failed")?
            .error_for_status()
            .context("getAssetsByOwner was rejected")?
            .json()
            .await
            .context("Failed to parse getAssetsByOwner response")?;

        if let Some(error) = response.error {
            bail!("getAssetsByOwner failed: {}", error.message);
        }
        let page = response.result.unwrap_or_default();
        debug!(owner, assets = page.items.len(), "DAS assets fetched");
        Ok(normalize_asset_page(&page))
    }
}

#[async_trait]
impl HoldingsSource for SolanaDasSource {
    #[instrument(skip(self, addresses, _access_token), fields(addresses = addresses.len()))]
    async fn fetch(&self, chain: Chain, addresses: &[String], _access_token: &str) -> Result<ChainHoldings> {
        if chain != Chain::Solana {
            bail!("DAS source cannot serve {}", chain);
        }

        let pages = try_join_all(addresses.iter().map(|owner| self.assets_by_owner(owner))).await?;
        Ok(pages.into_iter().fold(ChainHoldings::default(), |mut acc, page| {
            acc.tokens.extend(page.tokens);
            acc.nfts.extend(page.nfts);
            acc
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PAGE: &str = r#"{"jsonrpc":"2.0","id":"walletflow","result":{
        "total": 3,
        "items": [
            {"id":"EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v","interface":"FungibleToken",
             "content":{"metadata":{"name":"USD Coin","symbol":"USDC"},"links":{"image":"https://usdc.png"}},
             "token_info":{"symbol":"USDC","balance":12500000,"decimals":6,"price_info":{"price_per_token":1.0}}},
            {"id":"NftMint111","interface":"ProgrammableNFT",
             "content":{"metadata":{"name":"Mad Lad #1"},"files":[{"uri":"https://madlad.png"}]},
             "grouping":[{"group_key":"collection","group_value":"J1S9H3QjnRtBbbuD4HjPV6RpRhwuk4zKbxsnCHuTgh9w"}]},
            {"id":"Burnt111","interface":"V1_NFT","burnt":true,
             "content":{"metadata":{"name":"Gone"},"links":{"image":"x"}}}
        ],
        "nativeBalance":{"lamports":2000000000,"price_per_sol":150.0,"total_price":300.0}
    }}"#;

    #[test]
    fn test_normalize_asset_page() {
        let response: DasResponse = serde_json::from_str(PAGE).unwrap();
        let holdings = normalize_asset_page(&response.result.unwrap());

        assert_eq!(holdings.tokens.len(), 2);
        let sol = &holdings.tokens[0];
        assert!(sol.is_native());
        assert!((sol.value_usd - 300.0).abs() < 1e-9);
        let usdc = &holdings.tokens[1];
        assert_eq!(usdc.raw_balance, "12500000");
        assert!((usdc.value_usd - 12.5).abs() < 1e-9);
        assert_eq!(usdc.logo_url.as_deref(), Some("https://usdc.png"));

        assert_eq!(holdings.nfts.len(), 1);
        let nft = &holdings.nfts[0];
        assert_eq!(nft.image, "https://madlad.png");
        assert_eq!(
            nft.collection_key.as_deref(),
            Some("J1S9H3QjnRtBbbuD4HjPV6RpRhwuk4zKbxsnCHuTgh9w")
        );
    }

    #[test]
    fn test_token_without_decimals_is_skipped() {
        let page: AssetPage = serde_json::from_value(json!({
            "items": [
                {"id":"NoDecimals111","interface":"FungibleToken",
                 "token_info":{"symbol":"ODD","balance":500}}
            ]
        }))
        .unwrap();
        assert!(normalize_asset_page(&page).tokens.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_via_das() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "getAssetsByOwner",
                "params": { "ownerAddress": "Owner111" }
            })))
            .with_status(200)
            .with_body(PAGE)
            .create_async()
            .await;

        let source = SolanaDasSource::new(&server.url()).unwrap();
        let holdings = source
            .fetch(Chain::Solana, &["Owner111".to_string()], "")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(holdings.tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_rpc_error_fails_the_chain() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":"walletflow","error":{"code":-32602,"message":"invalid owner"}}"#)
            .create_async()
            .await;

        let source = SolanaDasSource::new(&server.url()).unwrap();
        let err = source.fetch(Chain::Solana, &["bad".to_string()], "").await.unwrap_err();
        assert!(err.to_string().contains("invalid owner"));
    }
}
