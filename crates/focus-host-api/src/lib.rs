//! Enforcer interface for focusd
//!
//! This crate defines the boundary between the session core and whatever
//! actually blocks applications on the host. The core only ever asks for a
//! block list to be applied or released; it never inspects the host to find
//! out what is currently enforced.

mod mock;
mod policy_file;
mod traits;

pub use mock::*;
pub use policy_file::*;
pub use traits::*;
