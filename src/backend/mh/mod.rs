//! MH backend module.
//!
//! This module contains the MH backend: one numbered file per
//! message, flags kept in the `.mh_sequences` file.

mod backend;
pub mod sequences;

pub use self::backend::{Error, MhBackend, Result};
