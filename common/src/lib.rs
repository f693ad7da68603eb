//! PayLedger Common Types
//!
//! Shared types used across the PayLedger crates: identifiers, currency and
//! amount types, the payment request state machine, the error taxonomy, and time helpers.

pub mod identifiers;
pub mod monetary;
pub mod request;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use request::*;
pub use error::*;
pub use time::*;
