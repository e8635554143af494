//! Account module.
//!
//! This module contains the accounts grouping the mailboxes that
//! share one backend identity (and, for remote backends, one
//! connection).

pub mod account;
pub use account::*;

pub mod manager;
pub use manager::*;
