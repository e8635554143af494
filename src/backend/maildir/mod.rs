mod backend;
pub mod flags;

pub use self::backend::{is_maildir, Error, MaildirBackend, Result};
