//! Tag module.
//!
//! This module contains the representation of the free-form labels
//! some backends (IMAP keywords, notmuch tags) attach to emails.

pub mod tags;
pub use tags::*;
