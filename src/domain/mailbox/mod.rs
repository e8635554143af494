//! Mailbox module.
//!
//! This module contains the representation of a resolved mail store,
//! its type, its lifecycle state and the result values of the
//! lifecycle operations.

pub mod kind;
pub use kind::*;

pub mod mailbox;
pub use mailbox::*;

pub mod status;
pub use status::*;
