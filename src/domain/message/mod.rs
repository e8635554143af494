//! Message module.
//!
//! This module contains the transient handle used to read or write the
//! bytes of one email.

pub mod message;
pub use message::*;
