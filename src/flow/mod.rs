//! Send and swap flow
//!
//! `state` holds the pure step machine, `controller` drives it against the
//! quote, fee, transfer, and submission services.

pub mod controller;
pub mod recipient;
pub mod state;

pub use controller::{FlowServices, SendFlowController};
pub use recipient::{AddressResolver, RecipientResolver, ResolveError};
pub use state::{
    transition, EnteredAmount, FlowAsset, FlowError, FlowEvent, FlowState, SendOrder, Step,
    SwapTarget,
};
