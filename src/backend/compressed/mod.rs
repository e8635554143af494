mod backend;

pub use self::backend::{CompressedBackend, Error, Result};
