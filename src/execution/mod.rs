/// Transaction execution: fees, transfer construction, signing, broadcast

pub mod fees;
pub mod progress;
pub mod rpc;
pub mod signer;
pub mod submitter;
pub mod transfer;
pub mod transport;

pub use fees::{FeeEstimator, FeeSource};
pub use progress::{LogProgress, PendingToast, ProgressSink, ToastId, ToastOutcome};
pub use signer::{KeypairSigner, KeypairSource, WalletSigner};
pub use submitter::{
    ReceiptStatus, SubmitError, SubmitErrorKind, SubmitFailure, TransactionReceipt,
    TransactionSubmitter,
};
pub use transfer::{
    ChainTransferBuilder, EvmTransactionRequest, TransferBuilder, TransferError,
    UnsignedTransaction,
};
pub use transport::{ChainTransport, EvmTransport, SolanaTransport, TransportSettings};
