pub mod amount;
pub mod cache;
pub mod chain;
pub mod response;
pub mod types;

pub use amount::*;
pub use cache::{Clock, SystemClock, TtlCache};
pub use chain::*;
pub use response::ActionResponse;
pub use types::*;
