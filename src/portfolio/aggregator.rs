//! Cross-chain holdings aggregation
//!
//! One provider call per requested chain, issued concurrently. Each chain's
//! result is normalized by its source, then merged into a single ranked
//! snapshot. A failed chain contributes nothing and flags the snapshot as
//! partial; only a failure of every chain fails the call.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::core::{
    Chain, ChainFamily, Clock, HoldingsSnapshot, NftCollectionGroup, NftHolding, TokenHolding,
    TtlCache, WalletRef,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("Failed to load balances for every chain. Please try again.")]
    AllChainsFailed { failed: Vec<Chain> },
}

/// Normalized holdings for one chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainHoldings {
    pub tokens: Vec<TokenHolding>,
    pub nfts: Vec<NftHolding>,
}

/// A provider of holdings for one chain family, responsible for mapping its
/// own response shapes into `TokenHolding` / `NftHolding`
#[async_trait]
pub trait HoldingsSource: Send + Sync {
    async fn fetch(
        &self,
        chain: Chain,
        addresses: &[String],
        access_token: &str,
    ) -> anyhow::Result<ChainHoldings>;
}

/// Descending `value_usd`, then ascending symbol; chain and contract settle
/// any remaining tie so the order never depends on provider order
pub fn rank_tokens(tokens: &mut [TokenHolding]) {
    tokens.sort_by(|a, b| {
        b.value_usd
            .total_cmp(&a.value_usd)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| a.chain.cmp(&b.chain))
            .then_with(|| a.contract_address.cmp(&b.contract_address))
    });
}

/// Spam and entries without a name or image are never shown
pub fn is_displayable(nft: &NftHolding) -> bool {
    !nft.is_spam && !nft.name.trim().is_empty() && !nft.image.trim().is_empty()
}

fn nft_order(a: &NftHolding, b: &NftHolding) -> Ordering {
    a.chain
        .cmp(&b.chain)
        .then_with(|| a.contract_address.cmp(&b.contract_address))
        .then_with(|| a.token_id.cmp(&b.token_id))
}

/// Group by (chain, collection key); NFTs without a collection stand alone
pub fn group_nfts(nfts: Vec<NftHolding>) -> (Vec<NftCollectionGroup>, Vec<NftHolding>) {
    let mut groups: BTreeMap<(Chain, String), Vec<NftHolding>> = BTreeMap::new();
    let mut standalone = Vec::new();

    for nft in nfts {
        match nft.collection_key.clone() {
            Some(key) if !key.trim().is_empty() => groups.entry((nft.chain, key)).or_default().push(nft),
            _ => standalone.push(nft),
        }
    }

    let collections = groups
        .into_iter()
        .map(|((chain, collection_key), mut nfts)| {
            nfts.sort_by(nft_order);
            NftCollectionGroup {
                chain,
                collection_key,
                nfts,
            }
        })
        .collect();
    standalone.sort_by(nft_order);

    (collections, standalone)
}

/// Cache key for a wallet set, independent of input order
pub fn wallet_set_key(wallets: &[WalletRef]) -> String {
    let mut keys: Vec<String> = wallets
        .iter()
        .map(|w| format!("{}:{}", w.chain, w.address))
        .collect();
    keys.sort();
    keys.dedup();
    keys.join(",")
}

pub struct BalanceAggregator {
    sources: HashMap<ChainFamily, Arc<dyn HoldingsSource>>,
    cache: TtlCache<String, Arc<HoldingsSnapshot>>,
}

impl BalanceAggregator {
    pub fn new(
        evm: Arc<dyn HoldingsSource>,
        solana: Arc<dyn HoldingsSource>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut sources = HashMap::new();
        sources.insert(ChainFamily::Evm, evm);
        sources.insert(ChainFamily::Solana, solana);
        Self {
            sources,
            cache: TtlCache::new(ttl, clock),
        }
    }

    #[instrument(skip(self, wallets, access_token), fields(wallets = wallets.len()))]
    pub async fn get_holdings(
        &self,
        wallets: &[WalletRef],
        access_token: &str,
    ) -> Result<Arc<HoldingsSnapshot>, AggregationError> {
        let key = wallet_set_key(wallets);
        if let Some(snapshot) = self.cache.get(&key) {
            debug!("Serving holdings from cache");
            return Ok(snapshot);
        }

        let mut by_chain: BTreeMap<Chain, Vec<String>> = BTreeMap::new();
        for wallet in wallets {
            let addresses = by_chain.entry(wallet.chain).or_default();
            if !addresses.contains(&wallet.address) {
                addresses.push(wallet.address.clone());
            }
        }

        let fetches = by_chain.iter().map(|(chain, addresses)| async move {
            let result = match self.sources.get(&chain.family()) {
                Some(source) => source.fetch(*chain, addresses, access_token).await,
                None => Err(anyhow::anyhow!("No holdings source for {}", chain)),
            };
            (*chain, result)
        });
        let results = join_all(fetches).await;

        let mut tokens = Vec::new();
        let mut nfts = Vec::new();
        let mut failed_chains = Vec::new();
        for (chain, result) in results {
            match result {
                Ok(holdings) => {
                    tokens.extend(holdings.tokens);
                    nfts.extend(holdings.nfts.into_iter().filter(is_displayable));
                }
                Err(e) => {
                    warn!(chain = %chain, error = %e, "Holdings fetch failed");
                    failed_chains.push(chain);
                }
            }
        }

        if !by_chain.is_empty() && failed_chains.len() == by_chain.len() {
            return Err(AggregationError::AllChainsFailed {
                failed: failed_chains,
            });
        }

        rank_tokens(&mut tokens);
        let (collections, standalone_nfts) = group_nfts(nfts);
        let total_value_usd = tokens.iter().map(|t| t.value_usd).sum();

        let snapshot = Arc::new(HoldingsSnapshot {
            tokens,
            collections,
            standalone_nfts,
            total_value_usd,
            partial_failure: !failed_chains.is_empty(),
            failed_chains,
        });

        info!(
            tokens = snapshot.tokens.len(),
            collections = snapshot.collections.len(),
            total_value_usd = snapshot.total_value_usd,
            partial = snapshot.partial_failure,
            "Holdings aggregated"
        );

        self.cache.put(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Force the next `get_holdings` for this wallet set to refetch
    pub fn invalidate(&self, wallets: &[WalletRef]) {
        self.cache.remove(&wallet_set_key(wallets));
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// Refresh every `interval` and publish each new snapshot. The task ends
    /// once every receiver is dropped.
    pub fn watch(
        self: Arc<Self>,
        wallets: Vec<WalletRef>,
        access_token: String,
        interval: Duration,
    ) -> (watch::Receiver<Option<Arc<HoldingsSnapshot>>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.cache.evict_expired();
                self.invalidate(&wallets);

                match self.get_holdings(&wallets, &access_token).await {
                    Ok(snapshot) => {
                        if tx.send(Some(snapshot)).is_err() {
                            debug!("No holdings subscribers left, stopping refresh");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Holdings refresh failed"),
                }
            }
        });

        (rx, handle)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted per-chain results, counting calls
    #[derive(Default)]
    pub struct FakeSource {
        pub results: Mutex<HashMap<Chain, Result<ChainHoldings, String>>>,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub fn with(chain: Chain, result: Result<ChainHoldings, String>) -> Self {
            let source = Self::default();
            source.set(chain, result);
            source
        }

        pub fn set(&self, chain: Chain, result: Result<ChainHoldings, String>) {
            self.results.lock().unwrap().insert(chain, result);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HoldingsSource for FakeSource {
        async fn fetch(
            &self,
            chain: Chain,
            _addresses: &[String],
            _access_token: &str,
        ) -> anyhow::Result<ChainHoldings> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.results.lock().unwrap().get(&chain) {
                Some(Ok(holdings)) => Ok(holdings.clone()),
                Some(Err(message)) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(ChainHoldings::default()),
            }
        }
    }

    pub fn token(chain: Chain, symbol: &str, value_usd: f64) -> TokenHolding {
        // price 1.0 with 0 decimals makes value_usd equal the raw balance
        let mut token = TokenHolding::new(chain, None, symbol, symbol, 0, "0", None, 1.0, 0.0);
        token.value_usd = value_usd;
        token
    }

    pub fn nft(chain: Chain, contract: &str, id: &str, collection: Option<&str>) -> NftHolding {
        NftHolding {
            chain,
            contract_address: contract.to_string(),
            token_id: id.to_string(),
            standard: crate::core::NftStandard::Erc721,
            name: format!("NFT {}", id),
            image: format!("https://img/{}", id),
            collection_key: collection.map(str::to_string),
            is_spam: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{nft, token, FakeSource};
    use super::*;
    use crate::core::cache::ManualClock;
    use crate::core::SystemClock;
    use rand::seq::SliceRandom;

    fn aggregator(
        evm: Arc<FakeSource>,
        solana: Arc<FakeSource>,
        clock: Arc<dyn Clock>,
    ) -> BalanceAggregator {
        BalanceAggregator::new(evm, solana, Duration::from_secs(60), clock)
    }

    fn wallets() -> Vec<WalletRef> {
        vec![
            WalletRef::new("0xabc", Chain::Ethereum),
            WalletRef::new("0xabc", Chain::Base),
            WalletRef::new("So1ana", Chain::Solana),
        ]
    }

    #[test]
    fn test_ranking_is_independent_of_input_order() {
        let expected = vec![
            token(Chain::Solana, "SOL", 500.0),
            token(Chain::Base, "AERO", 20.0),
            token(Chain::Ethereum, "ETH", 20.0),
            token(Chain::Polygon, "USDC", 20.0),
            token(Chain::Base, "DEGEN", 0.5),
            token(Chain::Base, "ZORA", 0.0),
        ];

        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut shuffled = expected.clone();
            shuffled.shuffle(&mut rng);
            rank_tokens(&mut shuffled);
            assert_eq!(shuffled, expected);
        }
    }

    #[tokio::test]
    async fn test_spam_and_incomplete_nfts_are_dropped() {
        let mut spam = nft(Chain::Ethereum, "0xspam", "1", None);
        spam.is_spam = true;
        let mut unnamed = nft(Chain::Ethereum, "0xart", "3", None);
        unnamed.name = String::new();
        let mut no_image = nft(Chain::Ethereum, "0xart", "4", None);
        no_image.image = " ".to_string();
        let mut good = nft(Chain::Ethereum, "0xart", "2", None);
        good.name = "A".to_string();
        good.image = "x".to_string();

        let evm = Arc::new(FakeSource::with(
            Chain::Ethereum,
            Ok(ChainHoldings {
                tokens: vec![],
                nfts: vec![spam, good.clone(), unnamed, no_image],
            }),
        ));
        let snapshot = aggregator(evm, Arc::new(FakeSource::default()), Arc::new(SystemClock))
            .get_holdings(&[WalletRef::new("0xabc", Chain::Ethereum)], "t")
            .await
            .unwrap();

        assert!(snapshot.collections.is_empty());
        assert_eq!(snapshot.standalone_nfts, vec![good]);
    }

    #[test]
    fn test_group_nfts_by_chain_and_collection() {
        let (collections, standalone) = group_nfts(vec![
            nft(Chain::Ethereum, "0xa", "2", Some("Apes")),
            nft(Chain::Polygon, "0xa", "1", Some("Apes")),
            nft(Chain::Ethereum, "0xa", "1", Some("Apes")),
            nft(Chain::Ethereum, "0xb", "9", None),
        ]);

        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].chain, Chain::Ethereum);
        assert_eq!(
            collections[0].nfts.iter().map(|n| n.token_id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
        assert_eq!(collections[1].chain, Chain::Polygon);
        assert_eq!(standalone.len(), 1);
    }

    #[tokio::test]
    async fn test_merges_and_ranks_across_chains() {
        let evm = Arc::new(FakeSource::with(
            Chain::Ethereum,
            Ok(ChainHoldings {
                tokens: vec![token(Chain::Ethereum, "ETH", 100.0)],
                nfts: vec![],
            }),
        ));
        evm.set(
            Chain::Base,
            Ok(ChainHoldings {
                tokens: vec![token(Chain::Base, "USDC", 250.0)],
                nfts: vec![],
            }),
        );
        let solana = Arc::new(FakeSource::with(
            Chain::Solana,
            Ok(ChainHoldings {
                tokens: vec![token(Chain::Solana, "SOL", 100.0)],
                nfts: vec![],
            }),
        ));

        let snapshot = aggregator(evm.clone(), solana, Arc::new(SystemClock))
            .get_holdings(&wallets(), "t")
            .await
            .unwrap();

        let symbols: Vec<&str> = snapshot.tokens.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["USDC", "ETH", "SOL"]);
        assert_eq!(snapshot.total_value_usd, 450.0);
        assert!(!snapshot.partial_failure);
        assert_eq!(evm.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_chain_is_partial() {
        let evm = Arc::new(FakeSource::with(Chain::Ethereum, Err("timeout".to_string())));
        evm.set(
            Chain::Base,
            Ok(ChainHoldings {
                tokens: vec![token(Chain::Base, "USDC", 5.0)],
                nfts: vec![],
            }),
        );

        let snapshot = aggregator(evm, Arc::new(FakeSource::default()), Arc::new(SystemClock))
            .get_holdings(&wallets(), "t")
            .await
            .unwrap();

        assert!(snapshot.partial_failure);
        assert_eq!(snapshot.failed_chains, vec![Chain::Ethereum]);
        assert_eq!(snapshot.tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_all_chains_failing_is_an_error() {
        let evm = Arc::new(FakeSource::with(Chain::Ethereum, Err("down".to_string())));
        evm.set(Chain::Base, Err("down".to_string()));
        let solana = Arc::new(FakeSource::with(Chain::Solana, Err("down".to_string())));

        let err = aggregator(evm, solana, Arc::new(SystemClock))
            .get_holdings(&wallets(), "t")
            .await
            .unwrap_err();
        let AggregationError::AllChainsFailed { failed } = err;
        assert_eq!(failed.len(), 3);
    }

    #[tokio::test]
    async fn test_cache_reuses_result_within_ttl() {
        let clock = Arc::new(ManualClock::new());
        let evm = Arc::new(FakeSource::default());
        let solana = Arc::new(FakeSource::default());
        let aggregator = aggregator(evm.clone(), solana, clock.clone());

        let mut reordered = wallets();
        reordered.reverse();

        aggregator.get_holdings(&wallets(), "t").await.unwrap();
        aggregator.get_holdings(&reordered, "t").await.unwrap();
        assert_eq!(evm.calls(), 2);

        clock.advance(Duration::from_secs(61));
        aggregator.get_holdings(&wallets(), "t").await.unwrap();
        assert_eq!(evm.calls(), 4);

        aggregator.invalidate(&wallets());
        aggregator.get_holdings(&wallets(), "t").await.unwrap();
        assert_eq!(evm.calls(), 6);
    }

    #[tokio::test]
    async fn test_watch_publishes_snapshots() {
        let solana = Arc::new(FakeSource::with(
            Chain::Solana,
            Ok(ChainHoldings {
                tokens: vec![token(Chain::Solana, "SOL", 1.0)],
                nfts: vec![],
            }),
        ));
        let aggregator = Arc::new(aggregator(
            Arc::new(FakeSource::default()),
            solana.clone(),
            Arc::new(SystemClock),
        ));

        let (mut rx, handle) = aggregator.watch(
            vec![WalletRef::new("So1ana", Chain::Solana)],
            "t".to_string(),
            Duration::from_millis(10),
        );

        rx.changed().await.unwrap();
        let first = rx.borrow().clone().unwrap();
        assert_eq!(first.tokens[0].symbol, "SOL");

        rx.changed().await.unwrap();
        assert!(solana.calls() >= 2);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
