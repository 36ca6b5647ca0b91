//! Shared utilities for focusd
//!
//! This crate provides:
//! - ID types (SessionId, AppId)
//! - Time utilities (mockable wall clock, test timestamps)
//! - Default paths for config, data, and log directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
