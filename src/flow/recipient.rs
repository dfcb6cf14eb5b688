//! Recipient resolution

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use thiserror::Error;

use crate::core::{ChainFamily, Recipient};
use crate::execution::transfer::is_evm_address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Please enter a recipient")]
    Empty,

    #[error("{0} is not a valid address for this network")]
    InvalidAddress(String),

    #[error("Could not resolve {0}")]
    Unresolved(String),
}

/// Turns a raw address or human-readable handle into a destination
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn resolve(&self, input: &str, family: ChainFamily) -> Result<Recipient, ResolveError>;
}

pub fn is_solana_address(address: &str) -> bool {
    Pubkey::from_str(address).is_ok()
}

/// Accepts raw addresses only; handles (e.g. `name.eth`) are left to a
/// naming-service resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressResolver;

#[async_trait]
impl RecipientResolver for AddressResolver {
    async fn resolve(&self, input: &str, family: ChainFamily) -> Result<Recipient, ResolveError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ResolveError::Empty);
        }

        let valid = match family {
            ChainFamily::Evm => is_evm_address(input),
            ChainFamily::Solana => is_solana_address(input),
        };
        if valid {
            return Ok(Recipient::address(input));
        }

        if input.contains('.') {
            Err(ResolveError::Unresolved(input.to_string()))
        } else {
            Err(ResolveError::InvalidAddress(input.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_raw_addresses_per_family() {
        let resolver = AddressResolver;
        let evm = "0x2222222222222222222222222222222222222222";
        let sol = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

        assert_eq!(resolver.resolve(evm, ChainFamily::Evm).await, Ok(Recipient::address(evm)));
        assert_eq!(
            resolver.resolve(&format!(" {} ", sol), ChainFamily::Solana).await,
            Ok(Recipient::address(sol))
        );
        assert_eq!(
            resolver.resolve(sol, ChainFamily::Evm).await,
            Err(ResolveError::InvalidAddress(sol.to_string()))
        );
        assert_eq!(
            resolver.resolve(evm, ChainFamily::Solana).await,
            Err(ResolveError::InvalidAddress(evm.to_string()))
        );
    }

    #[tokio::test]
    async fn test_handles_are_unresolved() {
        assert_eq!(
            AddressResolver.resolve("vitalik.eth", ChainFamily::Evm).await,
            Err(ResolveError::Unresolved("vitalik.eth".to_string()))
        );
        assert_eq!(AddressResolver.resolve("  ", ChainFamily::Evm).await, Err(ResolveError::Empty));
    }
}
