//! Core session lifecycle for focusd
//!
//! This crate is the heart of focusd, containing:
//! - Session state machine (Scheduled -> Active -> Ended, Scheduled -> Cancelled)
//! - Admission guard (single active session, daily quota, entitlement)
//! - Background monitor (promotion, expiry, enforcement retries)
//! - Foreground controller (cached view with explicit reload points)
//!
//! The two execution contexts never talk to each other. Everything they
//! know about one another comes from the shared store.

mod admission;
mod controller;
mod enforcement;
mod error;
mod events;
mod monitor;
mod session;
mod update;

pub use admission::*;
pub use controller::*;
pub use enforcement::*;
pub use error::*;
pub use events::*;
pub use monitor::*;
pub use session::*;
