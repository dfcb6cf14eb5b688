//! Send/swap flow state machine
//!
//! Every state carries exactly the data collected up to that step, so a
//! state can never hold a recipient without an amount or a hash without a
//! confirmation. `transition` is pure: it either returns the next state or
//! rejects the event and leaves the caller's state untouched.

use serde::Serialize;
use thiserror::Error;

use crate::core::{
    parse_units, usd_to_token_amount, validate_positive_decimal, AmountError, Chain, NftHolding,
    Recipient, TokenHolding,
};
use crate::execution::{SubmitFailure, TransactionReceipt, TransferError};
use crate::trading::{QuoteError, SwapQuote};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("Cannot {event} from the {from} step")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(AmountError),

    #[error("This token has no market price. Enter the amount in token units instead.")]
    ZeroPrice,

    #[error("USD amounts are only supported for tokens")]
    UsdNotSupported,

    #[error("Amount exceeds your balance")]
    ExceedsBalance,

    #[error("Could not resolve recipient: {0}")]
    UnresolvedRecipient(String),

    #[error("Swaps are not supported for {0}")]
    UnsupportedSwap(String),

    #[error("The connected wallet cannot sign for {0}")]
    NoSigner(Chain),

    #[error("Swapped tokens can only be received by your own wallet")]
    SwapRecipientMismatch,

    #[error("A transaction is already being submitted")]
    SubmissionInProgress,

    #[error("This flow was reset before the response arrived")]
    Stale,

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Submit(#[from] SubmitFailure),
}

impl FlowError {
    /// Receipt of a transaction that reached the chain but failed
    pub fn failed_receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            FlowError::Submit(failure) => failure.receipt.as_ref(),
            _ => None,
        }
    }
}

impl From<AmountError> for FlowError {
    fn from(e: AmountError) -> Self {
        match e {
            AmountError::ZeroPrice => FlowError::ZeroPrice,
            other => FlowError::InvalidAmount(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Assets,
    Amount,
    Recipient,
    Confirm,
    Success,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Assets => "assets",
            Step::Amount => "amount",
            Step::Recipient => "recipient",
            Step::Confirm => "confirm",
            Step::Success => "success",
        }
    }
}

/// The held asset being sent, exactly one of token or NFT
#[derive(Debug, Clone, PartialEq)]
pub enum FlowAsset {
    Token(TokenHolding),
    Nft(NftHolding),
}

impl FlowAsset {
    pub fn chain(&self) -> Chain {
        match self {
            FlowAsset::Token(token) => token.chain,
            FlowAsset::Nft(nft) => nft.chain,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            FlowAsset::Token(token) => &token.symbol,
            FlowAsset::Nft(nft) => &nft.name,
        }
    }
}

/// Token to receive when it differs from the held asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTarget {
    pub output_mint: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOrder {
    pub asset: FlowAsset,
    pub network: Chain,
    pub swap_target: Option<SwapTarget>,
}

impl SendOrder {
    pub fn send(asset: FlowAsset) -> Self {
        Self {
            network: asset.chain(),
            asset,
            swap_target: None,
        }
    }

    pub fn swap(token: TokenHolding, target: SwapTarget) -> Self {
        Self {
            network: token.chain,
            asset: FlowAsset::Token(token),
            swap_target: Some(target),
        }
    }

    pub fn is_swap(&self) -> bool {
        self.swap_target.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnteredAmount {
    /// As typed, in USD when `is_usd`
    pub input: String,
    pub is_usd: bool,
    /// Decimal string in token units (NFT quantity for NFTs)
    pub token_amount: String,
}

impl EnteredAmount {
    /// Validate `input` against the asset and convert USD to token units
    pub fn resolve(asset: &FlowAsset, input: &str, is_usd: bool) -> Result<Self, FlowError> {
        let input = input.trim();
        validate_positive_decimal(input)?;

        let token_amount = match asset {
            FlowAsset::Token(token) => {
                let token_amount = if is_usd {
                    usd_to_token_amount(input, token.market_price, token.decimals)?
                } else {
                    input.to_string()
                };

                let raw = parse_units(&token_amount, token.decimals)?;
                if let Ok(balance) = token.raw_balance.parse::<u128>() {
                    if raw > balance {
                        return Err(FlowError::ExceedsBalance);
                    }
                }
                token_amount
            }
            FlowAsset::Nft(_) => {
                if is_usd {
                    return Err(FlowError::UsdNotSupported);
                }
                match input.parse::<u64>() {
                    Ok(quantity) if quantity > 0 => quantity.to_string(),
                    _ => return Err(FlowError::InvalidAmount(AmountError::Invalid(input.to_string()))),
                }
            }
        };

        Ok(Self {
            input: input.to_string(),
            is_usd,
            token_amount,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowState {
    #[default]
    Idle,
    Assets,
    Amount {
        order: SendOrder,
    },
    Recipient {
        order: SendOrder,
        amount: EnteredAmount,
    },
    Confirm {
        order: SendOrder,
        amount: EnteredAmount,
        recipient: Recipient,
        network_fee: String,
        quote: Option<SwapQuote>,
    },
    Success {
        order: SendOrder,
        amount: EnteredAmount,
        recipient: Recipient,
        hash: String,
    },
}

impl FlowState {
    /// `None` when idle
    pub fn step(&self) -> Option<Step> {
        match self {
            FlowState::Idle => None,
            FlowState::Assets => Some(Step::Assets),
            FlowState::Amount { .. } => Some(Step::Amount),
            FlowState::Recipient { .. } => Some(Step::Recipient),
            FlowState::Confirm { .. } => Some(Step::Confirm),
            FlowState::Success { .. } => Some(Step::Success),
        }
    }

    fn step_name(&self) -> &'static str {
        self.step().map(|s| s.name()).unwrap_or("idle")
    }

    /// Error for an event that is not valid in this state
    pub fn reject(&self, event: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            from: self.step_name(),
            event,
        }
    }

    pub fn order(&self) -> Option<&SendOrder> {
        match self {
            FlowState::Idle | FlowState::Assets => None,
            FlowState::Amount { order }
            | FlowState::Recipient { order, .. }
            | FlowState::Confirm { order, .. }
            | FlowState::Success { order, .. } => Some(order),
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            FlowState::Success { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    OpenAssets,
    CloseAssets,
    /// Begin a fresh session, discarding whatever was in progress
    Start(SendOrder),
    ConfirmAmount(EnteredAmount),
    SelectRecipient {
        recipient: Recipient,
        network_fee: String,
        quote: Option<SwapQuote>,
    },
    QuoteUpdated(SwapQuote),
    Submitted {
        hash: String,
    },
    /// Return to an earlier step, dropping everything collected after it
    Back(Step),
    Reset,
}

impl FlowEvent {
    fn name(&self) -> &'static str {
        match self {
            FlowEvent::OpenAssets => "open assets",
            FlowEvent::CloseAssets => "close assets",
            FlowEvent::Start(_) => "start",
            FlowEvent::ConfirmAmount(_) => "confirm amount",
            FlowEvent::SelectRecipient { .. } => "select recipient",
            FlowEvent::QuoteUpdated(_) => "update quote",
            FlowEvent::Submitted { .. } => "submit",
            FlowEvent::Back(_) => "go back",
            FlowEvent::Reset => "reset",
        }
    }
}

pub fn transition(state: &FlowState, event: FlowEvent) -> Result<FlowState, FlowError> {
    let invalid = |event: &FlowEvent| state.reject(event.name());

    let next = match (state, event) {
        (_, FlowEvent::Reset) => FlowState::Idle,
        (_, FlowEvent::Start(order)) => FlowState::Amount { order },

        (FlowState::Idle, FlowEvent::OpenAssets) => FlowState::Assets,
        (FlowState::Assets, FlowEvent::CloseAssets) => FlowState::Idle,

        (FlowState::Amount { order }, FlowEvent::ConfirmAmount(amount)) => FlowState::Recipient {
            order: order.clone(),
            amount,
        },

        (
            FlowState::Recipient { order, amount },
            FlowEvent::SelectRecipient {
                recipient,
                network_fee,
                quote,
            },
        ) => FlowState::Confirm {
            order: order.clone(),
            amount: amount.clone(),
            recipient,
            network_fee,
            quote,
        },

        (
            FlowState::Confirm {
                order,
                amount,
                recipient,
                network_fee,
                ..
            },
            FlowEvent::QuoteUpdated(quote),
        ) if order.is_swap() => FlowState::Confirm {
            order: order.clone(),
            amount: amount.clone(),
            recipient: recipient.clone(),
            network_fee: network_fee.clone(),
            quote: Some(quote),
        },

        (
            FlowState::Confirm {
                order,
                amount,
                recipient,
                ..
            },
            FlowEvent::Submitted { hash },
        ) => FlowState::Success {
            order: order.clone(),
            amount: amount.clone(),
            recipient: recipient.clone(),
            hash,
        },

        (state, FlowEvent::Back(target)) => back(state, target).ok_or_else(|| invalid(&FlowEvent::Back(target)))?,

        (_, event) => return Err(invalid(&event)),
    };

    Ok(next)
}

fn back(state: &FlowState, target: Step) -> Option<FlowState> {
    match (state, target) {
        (FlowState::Recipient { order, .. }, Step::Amount)
        | (FlowState::Confirm { order, .. }, Step::Amount) => Some(FlowState::Amount {
            order: order.clone(),
        }),
        (FlowState::Confirm { order, amount, .. }, Step::Recipient) => Some(FlowState::Recipient {
            order: order.clone(),
            amount: amount.clone(),
        }),
        _ => None,
    }
}
