use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use walletflow::config::AppConfig;
use walletflow::core::{Chain, SystemClock, WalletRef};
use walletflow::portfolio::{BackendClient, BackendEvmSource, BalanceAggregator, SolanaDasSource};

const WALLETS_ENV: &str = "WALLETFLOW_WALLETS";
const ACCESS_TOKEN_ENV: &str = "WALLETFLOW_ACCESS_TOKEN";

/// Parse `chain:address,chain:address`
fn parse_wallets(raw: &str) -> Result<Vec<WalletRef>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (chain, address) = entry
                .split_once(':')
                .with_context(|| format!("expected chain:address, got {}", entry))?;
            let chain: Chain = chain.parse()?;
            Ok(WalletRef::new(address.trim(), chain))
        })
        .collect()
}

struct HoldingsWatcher {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl HoldingsWatcher {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    #[instrument(skip(self, config, wallets, access_token))]
    fn start(&mut self, config: &AppConfig, wallets: Vec<WalletRef>, access_token: String) -> Result<()> {
        let backend = BackendClient::new(&config.api_base_url()?)?;
        let registry = config.chain_registry();
        let das_url = match &config.providers.solana_das_url {
            Some(url) => url.clone(),
            None => registry.describe_chain(Chain::Solana)?.rpc_url.clone(),
        };

        let evm = Arc::new(BackendEvmSource::new(
            backend,
            config.providers.alchemy_api_key.clone(),
        ));
        let solana = Arc::new(SolanaDasSource::new(&das_url)?);
        let aggregator = Arc::new(BalanceAggregator::new(
            evm,
            solana,
            config.balances.cache_ttl(),
            Arc::new(SystemClock),
        ));

        info!(wallets = wallets.len(), "Watching holdings");
        let (mut snapshots, poller) =
            aggregator.watch(wallets, access_token, config.balances.poll_interval());

        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            warn!("Holdings poller stopped");
                            break;
                        }
                        let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                            continue;
                        };
                        info!(
                            total_value_usd = snapshot.total_value_usd,
                            tokens = snapshot.tokens.len(),
                            collections = snapshot.collections.len(),
                            nfts = snapshot.standalone_nfts.len(),
                            failed_chains = ?snapshot.failed_chains,
                            "Holdings updated"
                        );
                    }
                    _ = shutdown.recv() => {
                        info!("Holdings watcher shutting down");
                        break;
                    }
                }
            }
            poller.abort();
        });
        self.tasks.push(task);
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "Watcher task failed");
            }
        }
    }
}

fn init_tracing() {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(console_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("walletflow=info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let wallets = parse_wallets(&std::env::var(WALLETS_ENV).unwrap_or_default())?;
    if wallets.is_empty() {
        anyhow::bail!("{} is empty; expected chain:address pairs", WALLETS_ENV);
    }
    let access_token = std::env::var(ACCESS_TOKEN_ENV).unwrap_or_default();

    let mut watcher = HoldingsWatcher::new();
    watcher.start(&config, wallets, access_token)?;
    info!("Press Ctrl+C to stop");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    watcher.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
