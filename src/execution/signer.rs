//! Injected signing capability
//!
//! Key custody lives outside this crate. `KeypairSigner` covers local Solana
//! keys for operator tooling and tests; EVM signing is always delegated to a
//! caller-supplied `WalletSigner`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use solana_sdk::{
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use super::transfer::EvmTransactionRequest;
use crate::core::ChainFamily;

pub const DEFAULT_PRIVATE_KEY_ENV: &str = "SOLANA_PRIVATE_KEY";

#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The signing address for a chain family, if this signer controls one
    fn address(&self, family: ChainFamily) -> Option<String>;

    async fn sign_solana(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction>;

    /// Fill nonce/gas, sign, and return the raw RLP-encoded transaction
    async fn sign_evm(&self, request: &EvmTransactionRequest) -> Result<Vec<u8>>;
}

/// Where to find a local Solana keypair
#[derive(Debug, Clone)]
pub struct KeypairSource {
    /// JSON array (Solana CLI) or raw 64-byte keypair file
    pub keypair_path: Option<String>,
    /// Env var holding a base58 or JSON-array secret key
    pub private_key_env: Option<String>,
}

impl Default for KeypairSource {
    fn default() -> Self {
        Self {
            keypair_path: None,
            private_key_env: Some(DEFAULT_PRIVATE_KEY_ENV.to_string()),
        }
    }
}

pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    #[instrument]
    pub fn load(source: &KeypairSource) -> Result<Self> {
        let keypair = load_keypair(source)?;
        info!(pubkey = %keypair.pubkey(), "Signer keypair loaded");
        Ok(Self { keypair })
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Option<Result<Keypair>> {
    (bytes.len() == 64).then(|| Keypair::from_bytes(bytes).context("Invalid keypair bytes"))
}

fn load_keypair(source: &KeypairSource) -> Result<Keypair> {
    if let Some(path) = &source.keypair_path {
        if Path::new(path).exists() {
            debug!(path = %path, "Loading keypair from file");
            let contents =
                fs::read(path).with_context(|| format!("Failed to read keypair file: {}", path))?;

            if let Ok(json_bytes) = serde_json::from_slice::<Vec<u8>>(&contents) {
                if let Some(keypair) = keypair_from_bytes(&json_bytes) {
                    return keypair;
                }
            }
            if let Some(keypair) = keypair_from_bytes(&contents) {
                return keypair;
            }
            bail!("Invalid keypair file format. Expected 64 bytes or JSON array format.");
        }
        warn!(path = %path, "Keypair file not found, trying environment variable");
    }

    if let Some(env_var) = &source.private_key_env {
        if let Ok(secret) = std::env::var(env_var) {
            debug!(env_var = %env_var, "Loading keypair from environment variable");
            let secret = secret.trim();

            if let Ok(bytes) = bs58::decode(secret).into_vec() {
                if let Some(keypair) = keypair_from_bytes(&bytes) {
                    return keypair;
                }
            }
            if let Ok(json_bytes) = serde_json::from_str::<Vec<u8>>(secret) {
                if let Some(keypair) = keypair_from_bytes(&json_bytes) {
                    return keypair;
                }
            }
            bail!("Invalid private key format in {}. Expected base58 or JSON array.", env_var);
        }
    }

    bail!("No signing keypair configured")
}

#[async_trait]
impl WalletSigner for KeypairSigner {
    fn address(&self, family: ChainFamily) -> Option<String> {
        match family {
            ChainFamily::Solana => Some(self.keypair.pubkey().to_string()),
            ChainFamily::Evm => None,
        }
    }

    async fn sign_solana(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction> {
        let signed = VersionedTransaction::try_new(transaction.message, &[&self.keypair])
            .context("Failed to sign transaction")?;
        debug!(signature = %signed.signatures[0], "Transaction signed");
        Ok(signed)
    }

    async fn sign_evm(&self, request: &EvmTransactionRequest) -> Result<Vec<u8>> {
        bail!("No EVM key available to sign for {}", request.from)
    }
}
