//! Broadcast and confirmation per chain family

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::TransactionStatus;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::rpc::EvmRpcClient;
use super::submitter::SubmitError;
use crate::config::SubmissionSettings;
use crate::core::{Chain, ChainRegistry};

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub max_retries: u32,
    /// Upper bound on waiting for finality after broadcast
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
    /// First backoff step for EVM rebroadcasts; doubles per attempt
    pub retry_base_delay: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&SubmissionSettings::default())
    }
}

impl From<&SubmissionSettings> for TransportSettings {
    fn from(settings: &SubmissionSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            confirm_timeout: settings.confirm_timeout(),
            poll_interval: settings.confirm_poll_interval(),
            retry_base_delay: Duration::from_millis(1000),
        }
    }
}

/// Doubling stops here (64x the base delay)
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Delay before retry number `attempt` (1-based)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base.saturating_mul(1 << exponent)
}

#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Broadcast a signed transaction, returning its signature or hash
    async fn broadcast(&self, chain: Chain, signed: &[u8]) -> Result<String>;

    /// Wait for finality. Errors carry the upstream failure text.
    async fn confirm(&self, chain: Chain, signature: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureProgress {
    Pending,
    Finalized,
    Failed(String),
}

/// Interpret one `getSignatureStatuses` entry
pub fn solana_signature_progress(status: Option<&TransactionStatus>) -> SignatureProgress {
    match status {
        None => SignatureProgress::Pending,
        // Debug keeps the variant names (`Custom(..)`, `BlockhashNotFound`)
        Some(status) => match &status.err {
            Some(err) => SignatureProgress::Failed(format!("{:?}", err)),
            None if status.satisfies_commitment(CommitmentConfig::finalized()) => {
                SignatureProgress::Finalized
            }
            None => SignatureProgress::Pending,
        },
    }
}

pub struct SolanaTransport {
    registry: Arc<ChainRegistry>,
    settings: TransportSettings,
}

impl SolanaTransport {
    pub fn new(registry: Arc<ChainRegistry>, settings: TransportSettings) -> Self {
        Self { registry, settings }
    }

    fn client(&self, chain: Chain) -> Result<RpcClient> {
        let descriptor = self.registry.describe_chain(chain)?;
        Ok(RpcClient::new_with_commitment(
            descriptor.rpc_url.clone(),
            CommitmentConfig::finalized(),
        ))
    }
}

#[async_trait]
impl ChainTransport for SolanaTransport {
    #[instrument(skip(self, signed))]
    async fn broadcast(&self, chain: Chain, signed: &[u8]) -> Result<String> {
        let transaction: VersionedTransaction =
            bincode::deserialize(signed).context("Invalid signed transaction payload")?;

        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            max_retries: Some(self.settings.max_retries as usize),
            ..Default::default()
        };

        let signature = self
            .client(chain)?
            .send_transaction_with_config(&transaction, config)
            .await
            .map_err(|e| anyhow!("{}: {:?}", e, e.kind()))?;

        info!(signature = %signature, "Transaction broadcast");
        Ok(signature.to_string())
    }

    #[instrument(skip(self))]
    async fn confirm(&self, chain: Chain, signature: &str) -> Result<()> {
        let client = self.client(chain)?;
        let parsed = Signature::from_str(signature).context("Invalid transaction signature")?;
        let deadline = Instant::now() + self.settings.confirm_timeout;

        loop {
            match client.get_signature_statuses(&[parsed]).await {
                Ok(response) => {
                    let status = response.value.into_iter().next().flatten();
                    match solana_signature_progress(status.as_ref()) {
                        SignatureProgress::Finalized => {
                            info!(signature, "Transaction finalized");
                            return Ok(());
                        }
                        SignatureProgress::Failed(err) => bail!("Transaction failed: {}", err),
                        SignatureProgress::Pending => debug!(signature, "Awaiting finality"),
                    }
                }
                Err(e) => warn!(error = %e, "Signature status query failed"),
            }

            if Instant::now() >= deadline {
                bail!(
                    "Blockhash expired: transaction {} was not finalized within {}s",
                    signature,
                    self.settings.confirm_timeout.as_secs()
                );
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvmReceipt {
    status: Option<String>,
}

pub struct EvmTransport {
    registry: Arc<ChainRegistry>,
    settings: TransportSettings,
}

impl EvmTransport {
    pub fn new(registry: Arc<ChainRegistry>, settings: TransportSettings) -> Self {
        Self { registry, settings }
    }

    fn client(&self, chain: Chain) -> Result<EvmRpcClient> {
        let descriptor = self.registry.describe_chain(chain)?;
        EvmRpcClient::new(descriptor.rpc_url.clone())
    }
}

#[async_trait]
impl ChainTransport for EvmTransport {
    #[instrument(skip(self, signed))]
    async fn broadcast(&self, chain: Chain, signed: &[u8]) -> Result<String> {
        let rpc = self.client(chain)?;
        let raw = format!("0x{}", hex::encode(signed));
        let max_attempts = self.settings.max_retries.saturating_add(1);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, max_attempts, "Sending raw transaction");

            match rpc.call::<String>("eth_sendRawTransaction", json!([raw])).await {
                Ok(hash) => {
                    info!(hash = %hash, attempts, "Transaction broadcast");
                    return Ok(hash);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    // Rejections the node will repeat on every attempt
                    let definitive = !matches!(SubmitError::classify(&message), SubmitError::Unknown(_));
                    if definitive || attempts >= max_attempts {
                        return Err(e.context(format!("Broadcast failed after {} attempts", attempts)));
                    }

                    let delay = backoff_delay(self.settings.retry_base_delay, attempts);
                    warn!(error = %message, attempt = attempts, delay_ms = delay.as_millis() as u64, "Broadcast failed, retrying");
                    sleep(delay).await;
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn confirm(&self, chain: Chain, signature: &str) -> Result<()> {
        let rpc = self.client(chain)?;
        let deadline = Instant::now() + self.settings.confirm_timeout;

        loop {
            match rpc
                .call::<Option<EvmReceipt>>("eth_getTransactionReceipt", json!([signature]))
                .await
            {
                Ok(Some(receipt)) => match receipt.status.as_deref() {
                    Some("0x1") => {
                        info!(hash = signature, "Transaction confirmed");
                        return Ok(());
                    }
                    Some(status) => bail!("Transaction reverted on-chain (status {})", status),
                    None => bail!("Transaction receipt has no status"),
                },
                Ok(None) => debug!(hash = signature, "Receipt not available yet"),
                Err(e) => warn!(error = %e, "Receipt query failed"),
            }

            if Instant::now() >= deadline {
                bail!(
                    "Transaction {} was not confirmed within {}s",
                    signature,
                    self.settings.confirm_timeout.as_secs()
                );
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}
