//! Swap quoting
//!
//! Quotes and prebuilt swap transactions from the Jupiter aggregator.

pub mod jupiter_client;

pub use jupiter_client::*;
