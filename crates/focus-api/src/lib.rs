//! Shared data model for focusd
//!
//! These types are the persisted schema shared by the foreground controller
//! and the background monitor, plus the reason codes both contexts surface.

mod snapshot;
mod types;

pub use snapshot::*;
pub use types::*;
