//! Mbox backend module.
//!
//! This module contains the flat file backends: mbox, where messages
//! are separated by `From ` lines, and mmdf, where they are wrapped
//! in `^A^A^A^A` lines.

mod backend;
pub mod parser;

pub use self::backend::{Error, MboxBackend, Result};
