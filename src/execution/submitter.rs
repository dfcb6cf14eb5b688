//! Sign, broadcast, and confirm a transaction under one progress toast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

use super::progress::{PendingToast, ProgressSink};
use super::signer::WalletSigner;
use super::transfer::UnsignedTransaction;
use super::transport::ChainTransport;
use crate::core::{Chain, ChainFamily};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Price moved too much before the swap executed. Please try again.")]
    Slippage,

    #[error("Transaction expired. Please try again.")]
    BlockhashExpired,

    #[error("Insufficient funds to complete this transaction.")]
    InsufficientFunds,

    #[error("Transaction failed: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmitErrorKind {
    Slippage,
    BlockhashExpired,
    InsufficientFunds,
    Unknown,
}

impl SubmitError {
    /// Map upstream failure text to a user-facing category.
    ///
    /// Wallets, RPC nodes, and the swap program report failures only as
    /// free text, so this matches on known fragments:
    /// - `Custom` (program error, e.g. slippage tolerance exceeded), case-sensitive
    /// - `blockhash`, any case
    /// - `insufficient funds` / `insufficient lamports`, any case
    ///
    /// Anything else is `Unknown` with the raw text kept.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if message.contains("Custom") {
            SubmitError::Slippage
        } else if lower.contains("blockhash") {
            SubmitError::BlockhashExpired
        } else if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
            SubmitError::InsufficientFunds
        } else {
            SubmitError::Unknown(message.to_string())
        }
    }

    pub fn kind(&self) -> SubmitErrorKind {
        match self {
            SubmitError::Slippage => SubmitErrorKind::Slippage,
            SubmitError::BlockhashExpired => SubmitErrorKind::BlockhashExpired,
            SubmitError::InsufficientFunds => SubmitErrorKind::InsufficientFunds,
            SubmitError::Unknown(_) => SubmitErrorKind::Unknown,
        }
    }
}

impl From<anyhow::Error> for SubmitError {
    fn from(e: anyhow::Error) -> Self {
        SubmitError::classify(&format!("{:#}", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Solana signature or EVM transaction hash
    pub signature: String,
    pub status: ReceiptStatus,
    pub chain: Chain,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub error_kind: Option<SubmitErrorKind>,
}

impl TransactionReceipt {
    pub fn pending(signature: impl Into<String>, chain: Chain) -> Self {
        Self {
            signature: signature.into(),
            status: ReceiptStatus::Pending,
            chain,
            confirmed_at: None,
            error_kind: None,
        }
    }

    /// Terminal transition; a settled receipt is returned unchanged
    pub fn confirm(mut self, at: DateTime<Utc>) -> Self {
        if self.status == ReceiptStatus::Pending {
            self.status = ReceiptStatus::Confirmed;
            self.confirmed_at = Some(at);
        }
        self
    }

    pub fn fail(mut self, kind: SubmitErrorKind) -> Self {
        if self.status == ReceiptStatus::Pending {
            self.status = ReceiptStatus::Failed;
            self.error_kind = Some(kind);
        }
        self
    }
}

/// A classified submission failure. Carries the failed receipt once the
/// transaction was broadcast, so its signature is never lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct SubmitFailure {
    pub error: SubmitError,
    /// `Some` with status `Failed` when the failure came after broadcast
    pub receipt: Option<TransactionReceipt>,
}

impl SubmitFailure {
    pub fn kind(&self) -> SubmitErrorKind {
        self.error.kind()
    }

    pub fn signature(&self) -> Option<&str> {
        self.receipt.as_ref().map(|r| r.signature.as_str())
    }
}

impl From<SubmitError> for SubmitFailure {
    fn from(error: SubmitError) -> Self {
        Self { error, receipt: None }
    }
}

const CONFIRMING_MESSAGE: &str = "Confirming transaction...";

pub struct TransactionSubmitter {
    transports: HashMap<ChainFamily, Arc<dyn ChainTransport>>,
    progress: Arc<dyn ProgressSink>,
}

impl TransactionSubmitter {
    pub fn new(
        solana: Arc<dyn ChainTransport>,
        evm: Arc<dyn ChainTransport>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let mut transports = HashMap::new();
        transports.insert(ChainFamily::Solana, solana);
        transports.insert(ChainFamily::Evm, evm);
        Self {
            transports,
            progress,
        }
    }

    fn transport(&self, chain: Chain) -> Result<&Arc<dyn ChainTransport>, SubmitError> {
        self.transports
            .get(&chain.family())
            .ok_or_else(|| SubmitError::Unknown(format!("No transport for {}", chain)))
    }

    async fn sign(
        &self,
        unsigned: UnsignedTransaction,
        signer: &dyn WalletSigner,
    ) -> anyhow::Result<Vec<u8>> {
        match unsigned {
            UnsignedTransaction::Solana { payload } => {
                let transaction: VersionedTransaction = bincode::deserialize(&payload)
                    .map_err(|e| anyhow::anyhow!("Invalid transaction payload: {}", e))?;
                let signed = signer.sign_solana(transaction).await?;
                Ok(bincode::serialize(&signed)?)
            }
            UnsignedTransaction::Evm(request) => signer.sign_evm(&request).await,
        }
    }

    /// Blocks until the transaction is final or definitively failed. The
    /// loading toast is resolved on every path.
    #[instrument(skip(self, unsigned, signer), fields(chain = %unsigned.chain()))]
    pub async fn submit(
        &self,
        unsigned: UnsignedTransaction,
        signer: &dyn WalletSigner,
    ) -> Result<TransactionReceipt, SubmitFailure> {
        let chain = unsigned.chain();
        let transport = self.transport(chain)?;
        let toast = PendingToast::show(self.progress.clone(), CONFIRMING_MESSAGE);

        let signed = match self.sign(unsigned, signer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = SubmitError::from(e);
                toast.fail(err.to_string());
                return Err(err.into());
            }
        };

        let signature = match transport.broadcast(chain, &signed).await {
            Ok(signature) => signature,
            Err(e) => {
                let err = SubmitError::from(e);
                error!(error = %err, "Broadcast failed");
                toast.fail(err.to_string());
                return Err(err.into());
            }
        };

        let receipt = TransactionReceipt::pending(signature, chain);
        match transport.confirm(chain, &receipt.signature).await {
            Ok(()) => {
                let receipt = receipt.confirm(Utc::now());
                info!(signature = %receipt.signature, "Transaction confirmed");
                toast.succeed("Transaction confirmed");
                Ok(receipt)
            }
            Err(e) => {
                let err = SubmitError::from(e);
                let receipt = receipt.fail(err.kind());
                error!(signature = %receipt.signature, error = %err, "Transaction failed");
                toast.fail(err.to_string());
                Err(SubmitFailure {
                    error: err,
                    receipt: Some(receipt),
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::execution::transfer::EvmTransactionRequest;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transport that records broadcasts and replays scripted failures
    #[derive(Default)]
    pub struct FakeTransport {
        pub broadcast_error: Option<String>,
        pub confirm_error: Option<String>,
        pub broadcasts: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ChainTransport for FakeTransport {
        async fn broadcast(&self, _chain: Chain, signed: &[u8]) -> Result<String> {
            if let Some(message) = &self.broadcast_error {
                return Err(anyhow!(message.clone()));
            }
            let mut broadcasts = self.broadcasts.lock().unwrap();
            broadcasts.push(signed.to_vec());
            Ok(format!("sig{}", broadcasts.len()))
        }

        async fn confirm(&self, _chain: Chain, _signature: &str) -> Result<()> {
            match &self.confirm_error {
                Some(message) => Err(anyhow!(message.clone())),
                None => Ok(()),
            }
        }
    }

    /// Signer that passes payloads through unchanged
    pub struct FakeSigner {
        pub solana_address: String,
        pub evm_address: String,
    }

    impl Default for FakeSigner {
        fn default() -> Self {
            Self {
                solana_address: "11111111111111111111111111111111".to_string(),
                evm_address: "0x1111111111111111111111111111111111111111".to_string(),
            }
        }
    }

    #[async_trait]
    impl WalletSigner for FakeSigner {
        fn address(&self, family: ChainFamily) -> Option<String> {
            Some(match family {
                ChainFamily::Solana => self.solana_address.clone(),
                ChainFamily::Evm => self.evm_address.clone(),
            })
        }

        async fn sign_solana(&self, transaction: VersionedTransaction) -> Result<VersionedTransaction> {
            Ok(transaction)
        }

        async fn sign_evm(&self, request: &EvmTransactionRequest) -> Result<Vec<u8>> {
            Ok(request.data.as_bytes().to_vec())
        }
    }
}
