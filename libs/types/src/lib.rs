//! Types library for the stream gateway
//!
//! Shared vocabulary between the subscription hub, its transport shell and
//! the services that publish domain events into it.
//!
//! # Modules
//! - `ids`: Unique identifiers (AccountId, ConnectionId)
//! - `pair`: Validated trading pair (Pair)
//! - `category`: Message categories and subscription topics
//! - `errors`: Parse errors

pub mod category;
pub mod errors;
pub mod ids;
pub mod pair;

pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::category::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::pair::*;
}
