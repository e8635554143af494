pub mod account;
pub use account::*;

pub mod email;
pub use email::{Email, Locator};

pub mod flag;
pub use flag::*;

pub mod mailbox;
pub use mailbox::*;

pub mod message;
pub use message::*;

pub mod tag;
pub use tag::*;
