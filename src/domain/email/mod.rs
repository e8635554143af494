//! Email module.
//!
//! This module contains the in-memory index entry of a mailbox: what
//! the mailbox knows about one stored email without holding its
//! content.

pub mod email;
pub use email::{Email, Error, Locator, Result};
