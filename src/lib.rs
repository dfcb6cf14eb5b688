// Shared primitives: chains, amounts, holdings, caching
pub mod core;

pub mod config;

// Holdings aggregation across chains
pub mod portfolio;

// Swap quoting
pub mod trading;

// Building, signing, and submitting transactions
pub mod execution;

// Send/swap session state
pub mod flow;

pub mod notify;

// Re-export commonly used types for convenience
pub use crate::core::*;
pub use crate::config::AppConfig;
