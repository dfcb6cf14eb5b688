//! Holdings across chains
//!
//! Providers normalize their own response shapes; the aggregator merges,
//! ranks, and caches the result.

pub mod aggregator;
pub mod backend;
pub mod evm_source;
pub mod solana_source;

pub use aggregator::{AggregationError, BalanceAggregator, ChainHoldings, HoldingsSource};
pub use backend::{BackendClient, BalanceHistory, BalancePoint};
pub use evm_source::BackendEvmSource;
pub use solana_source::SolanaDasSource;
