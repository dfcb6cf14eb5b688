//! Network fee estimation
//!
//! Fee display is best-effort: every failure degrades to a per-chain constant
//! and is logged, never returned.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::rpc::{parse_hex_u128, EvmRpcClient};
use crate::core::{format_units, Chain, ChainDescriptor, ChainFamily, ChainRegistry};

/// Base signature fee charged for every Solana transaction
pub const SOLANA_BASE_FEE_LAMPORTS: u64 = 5_000;
/// Compute units assumed for a transfer when pricing the priority fee
pub const SOLANA_ASSUMED_COMPUTE_UNITS: u64 = 300;
const MICRO_LAMPORTS_PER_LAMPORT: u64 = 1_000_000;
const SOLANA_DECIMALS: u8 = 9;
const EVM_DECIMALS: u8 = 18;
/// Priority tip used when the node cannot suggest one (1 gwei)
const DEFAULT_PRIORITY_FEE_WEI: u128 = 1_000_000_000;

/// Fee shown when an EVM fee query fails
pub fn evm_fallback_fee(chain: Chain) -> &'static str {
    match chain {
        Chain::Ethereum => "0.001",
        Chain::Polygon => "0.01",
        Chain::Base => "0.0001",
        Chain::Solana => "0.000005",
    }
}

/// Estimate in native-token units, as a decimal string
#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn estimate(&self, chain: Chain) -> String;
}

/// `base + ceil(avg_priority_fee * compute_units / 1_000_000)` lamports
pub fn solana_fee_lamports(priority_fee_samples: &[u64]) -> u64 {
    if priority_fee_samples.is_empty() {
        return SOLANA_BASE_FEE_LAMPORTS;
    }

    let sum: u128 = priority_fee_samples.iter().map(|f| *f as u128).sum();
    let numerator = sum * SOLANA_ASSUMED_COMPUTE_UNITS as u128;
    let denominator = priority_fee_samples.len() as u128 * MICRO_LAMPORTS_PER_LAMPORT as u128;
    let priority = numerator.div_ceil(denominator);

    SOLANA_BASE_FEE_LAMPORTS.saturating_add(u64::try_from(priority).unwrap_or(u64::MAX))
}

/// EIP-1559 max fee: twice the latest base fee plus the priority tip
pub fn evm_max_fee_per_gas(base_fee_wei: u128, priority_fee_wei: u128) -> u128 {
    base_fee_wei.saturating_mul(2).saturating_add(priority_fee_wei)
}

fn lamports_to_sol(lamports: u64) -> String {
    format_units(lamports as u128, SOLANA_DECIMALS).unwrap_or_else(|_| "0".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlock {
    base_fee_per_gas: Option<String>,
}

pub struct FeeEstimator {
    registry: Arc<ChainRegistry>,
}

impl FeeEstimator {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self))]
    pub async fn calculate_solana_gas_fee(&self) -> String {
        let descriptor = match self.registry.describe_chain(Chain::Solana) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Solana not registered, using fallback fee");
                return lamports_to_sol(SOLANA_BASE_FEE_LAMPORTS);
            }
        };

        let rpc_client = RpcClient::new(descriptor.rpc_url.clone());
        match rpc_client.get_recent_prioritization_fees(&[]).await {
            Ok(fees) => {
                let samples: Vec<u64> = fees.iter().map(|f| f.prioritization_fee).collect();
                let lamports = solana_fee_lamports(&samples);
                debug!(samples = samples.len(), lamports, "Solana fee estimated");
                lamports_to_sol(lamports)
            }
            Err(e) => {
                warn!(error = %e, "Prioritization fee query failed, using base fee");
                lamports_to_sol(SOLANA_BASE_FEE_LAMPORTS)
            }
        }
    }

    #[instrument(skip(self, descriptor), fields(chain = %descriptor.chain))]
    pub async fn calculate_evm_gas_fee(&self, descriptor: &ChainDescriptor) -> String {
        match self.query_max_fee_per_gas(&descriptor.rpc_url).await {
            Ok(max_fee) => {
                let fee = format_units(max_fee, EVM_DECIMALS)
                    .unwrap_or_else(|_| evm_fallback_fee(descriptor.chain).to_string());
                debug!(max_fee_per_gas = max_fee, fee = %fee, "EVM fee estimated");
                fee
            }
            Err(e) => {
                warn!(error = %e, "EVM fee query failed, using fallback fee");
                evm_fallback_fee(descriptor.chain).to_string()
            }
        }
    }

    async fn query_max_fee_per_gas(&self, rpc_url: &str) -> anyhow::Result<u128> {
        let rpc = EvmRpcClient::new(rpc_url)?;

        let block: LatestBlock = rpc
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;

        let Some(base_fee) = block.base_fee_per_gas else {
            // Pre-London chain: legacy gas price is the max fee
            let gas_price: String = rpc.call("eth_gasPrice", json!([])).await?;
            return parse_hex_u128(&gas_price);
        };
        let base_fee = parse_hex_u128(&base_fee)?;

        let priority_fee = match rpc.call::<String>("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(hex) => parse_hex_u128(&hex)?,
            Err(e) => {
                debug!(error = %e, "No priority fee suggestion, using default tip");
                DEFAULT_PRIORITY_FEE_WEI
            }
        };

        Ok(evm_max_fee_per_gas(base_fee, priority_fee))
    }
}

#[async_trait]
impl FeeSource for FeeEstimator {
    async fn estimate(&self, chain: Chain) -> String {
        match chain.family() {
            ChainFamily::Solana => self.calculate_solana_gas_fee().await,
            ChainFamily::Evm => match self.registry.describe_chain(chain) {
                Ok(descriptor) => self.calculate_evm_gas_fee(descriptor).await,
                Err(e) => {
                    warn!(error = %e, "Chain not registered, using fallback fee");
                    evm_fallback_fee(chain).to_string()
                }
            },
        }
    }
}
