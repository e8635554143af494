//! Remote backend module.
//!
//! This module contains the backends of the mail stores reached
//! through a protocol: IMAP, POP, NNTP and notmuch. The protocols
//! themselves live behind the [`Session`] trait.

mod backend;
pub mod session;
pub mod url;

use std::{io, result};
use thiserror::Error;

pub use self::backend::{remote_name, RemoteBackend};
pub use self::session::{Connector, Connectors, Session};
pub use self::url::RemoteUrl;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse remote url {0}")]
    ParseUrlError(String),
    #[error("cannot find remote backend for scheme {0}")]
    UnknownSchemeError(String),
    #[error("cannot find connector for {0} mailboxes")]
    FindConnectorError(crate::MailboxType),
    #[error("cannot use {0}: account is not connected")]
    NotConnectedError(String),
    #[error("cannot find remote mailbox {0}")]
    FindMailboxError(String),
    #[error("cannot find message {0} in mailbox index")]
    FindMsgError(usize),
    #[error("cannot create temporary message file")]
    CreateTmpFileError(#[source] io::Error),
    #[error("cannot read temporary message file")]
    ReadTmpFileError(#[source] io::Error),
    #[error("remote protocol error: {0}")]
    ProtocolError(String),
    #[error("remote i/o error")]
    IoError(#[from] io::Error),
}

pub type Result<T> = result::Result<T, Error>;
