//! Backend module.
//!
//! This module exposes the backend trait, the operation table every
//! mailbox type implements, and the registry holding one backend per
//! mailbox type.

use log::{debug, trace};
use std::{fs, io, path::Path, result};
use thiserror::Error;

use crate::{
    backend::{compressed, maildir, mbox, mh, remote},
    email, hcache, process, prompt, Account, CheckStatsFlags, CheckStatsStatus, CheckStatus, Email,
    Mailbox, MailboxType, Message, MsgOpenFlags, MxConfig, OpenFlags, OpenStatus, Prompt,
};

use super::{
    compressed::CompressedBackend,
    maildir::MaildirBackend,
    mbox::MboxBackend,
    mh::MhBackend,
    remote::{Connectors, RemoteBackend},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find backend for mailbox type {0}")]
    UnknownMailboxTypeError(MailboxType),
    #[error("cannot find mailbox type of {0}")]
    ProbeMailboxError(String),
    #[error("cannot open message {0}: mailbox has {1} messages")]
    MessageIndexOutOfBoundsError(usize, usize),
    #[error("cannot open a new message: another message is open for writing in {0}")]
    WriteHandleBusyError(String),
    #[error("cannot use message: it was opened from another mailbox")]
    ForeignMessageError,
    #[error("cannot use mailbox {0}: mailbox is not open")]
    MailboxNotOpenError(String),
    #[error("cannot open mailbox {0}: mailbox is already open")]
    MailboxAlreadyOpenError(String),
    #[error("cannot commit message: it was not opened for writing or is already committed")]
    MessageNotWritableError,
    #[error("cannot expand path {0}")]
    ExpandPathError(String),
    #[error("cannot write to mailbox {0}: mailbox is read-only")]
    MailboxReadOnlyError(String),
    #[error("cannot make path {0} absolute")]
    PathNotAbsoluteError(String),
    #[error("cannot find parent of mailbox {0}")]
    PathParentError(String),
    #[error("cannot append messages to {0} mailboxes")]
    AppendUnsupportedError(MailboxType),
    #[error("cannot edit tags: {0} mailboxes do not support tags")]
    TagsUnsupportedError(MailboxType),
    #[error("cannot validate tags {0:?}")]
    InvalidTagsError(String),
    #[error("cannot link mailbox {0} to an account")]
    LinkMailboxError(String),
    #[error("cannot lock mailbox {1}")]
    LockMailboxError(#[source] io::Error, String),
    #[error("cannot read metadata of {1}")]
    ReadMetadataError(#[source] io::Error, String),
    #[error("cannot remove temporary file {1}")]
    RemoveTmpFileError(#[source] io::Error, String),

    #[error(transparent)]
    MboxError(#[from] mbox::Error),
    #[error(transparent)]
    MaildirError(#[from] maildir::Error),
    #[error(transparent)]
    MhError(#[from] mh::Error),
    #[error(transparent)]
    CompressedError(#[from] compressed::Error),
    #[error(transparent)]
    RemoteError(#[from] remote::Error),
    #[error(transparent)]
    EmailError(#[from] email::Error),
    #[error(transparent)]
    ProcessError(#[from] process::Error),
    #[error(transparent)]
    PromptError(#[from] prompt::Error),
    #[error(transparent)]
    HeaderCacheError(#[from] hcache::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents everything a backend operation may touch: the mailbox
/// itself, the account it is linked to, the configuration and the
/// prompt service.
pub struct Context<'a> {
    pub config: &'a MxConfig,
    pub prompt: &'a mut dyn Prompt,
    pub mailbox: &'a mut Mailbox,
    pub account: &'a mut Account,
}

/// The operation table of a mailbox type.
///
/// Callers go through [`crate::Mx`], which validates arguments,
/// handles locking and keeps the lifecycle state; backends only
/// implement the storage side.
pub trait Backend: Sync {
    fn kind(&self) -> MailboxType;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Tells if the mailboxes of this type live on the local file
    /// system.
    fn is_local(&self) -> bool;

    /// Returns the identity of the account owning the given
    /// canonical path. Local mailboxes under the base folder share
    /// the folder as identity; any other one stands alone.
    fn ac_identity(&self, path: &str, folder: &str) -> Result<String> {
        match super::path::strip_dir_prefix(path, folder) {
            Some(rest) if !rest.is_empty() => Ok(folder.trim_end_matches('/').to_owned()),
            _ => Ok(path.to_owned()),
        }
    }

    /// Tells if the given account handles the given canonical path.
    fn ac_owns_path(&self, account: &Account, path: &str, folder: &str) -> bool {
        account.kind == self.kind()
            && self
                .ac_identity(path, folder)
                .map(|identity| identity == account.name)
                .unwrap_or(false)
    }

    /// Prepares the account before the mailbox is attached to it.
    /// Returns false when the backend refuses the link.
    fn ac_add(&self, account: &mut Account, mailbox: &Mailbox, _connectors: &Connectors) -> Result<bool> {
        Ok(account.kind == mailbox.kind)
    }

    fn mbox_open(&self, ctx: &mut Context) -> Result<OpenStatus>;
    fn mbox_open_append(&self, ctx: &mut Context, flags: OpenFlags) -> Result<()>;
    fn mbox_check(&self, ctx: &mut Context) -> Result<CheckStatus>;
    fn mbox_check_stats(&self, ctx: &mut Context, flags: CheckStatsFlags) -> Result<CheckStatsStatus>;
    fn mbox_sync(&self, ctx: &mut Context) -> Result<CheckStatus>;
    fn mbox_close(&self, ctx: &mut Context) -> Result<()>;

    fn msg_open(&self, ctx: &mut Context, index: usize) -> Result<Message>;
    fn msg_open_new(&self, ctx: &mut Context, email: &Email, flags: MsgOpenFlags) -> Result<Message>;
    fn msg_commit(&self, ctx: &mut Context, msg: &mut Message) -> Result<()>;

    /// Releases the message handle. A message opened for writing and
    /// never committed has its temporary file removed.
    fn msg_close(&self, _ctx: &mut Context, msg: &mut Message) -> Result<()> {
        discard(msg)
    }

    /// Returns the number of separator bytes written around each
    /// message of the given mailbox.
    fn msg_padding_size(&self, _mailbox: &Mailbox) -> usize {
        0
    }

    fn tags_supported(&self) -> bool {
        false
    }

    /// Validates a tags buffer against the backend syntax.
    fn tags_validate(&self, _buf: &str) -> Result<()> {
        Err(Error::TagsUnsupportedError(self.kind()))
    }

    fn tags_commit(&self, _ctx: &mut Context, _index: usize, _buf: &str) -> Result<()> {
        Err(Error::TagsUnsupportedError(self.kind()))
    }

    /// Tells if the given path is a mailbox of this type. Must only
    /// depend on the path and the file system state.
    fn path_probe(&self, path: &str, meta: Option<&fs::Metadata>) -> MailboxType;
    fn path_canon(&self, path: String) -> Result<String>;
    fn path_pretty(&self, path: String, folder: &str) -> Result<String>;
    fn path_parent(&self, path: String) -> Result<String>;
    /// Tells if the mailbox at the given path holds no message,
    /// without opening it.
    fn path_is_empty(&self, path: &str) -> Result<bool>;
}

/// Releases the message handle. A message opened for writing and
/// never committed has its temporary file removed.
pub fn discard(msg: &mut Message) -> Result<()> {
    msg.release();
    if msg.write && msg.committed_path.is_none() && msg.path.exists() {
        debug!("discarding uncommitted message {:?}", msg.path);
        fs::remove_file(&msg.path)
            .map_err(|err| Error::RemoveTmpFileError(err, msg.path.display().to_string()))?;
    }
    Ok(())
}

/// The registry, in probe order.
///
/// Remote schemes come first so that a URL is never mistaken for a
/// relative path. Compressed files come before flat files so that a
/// `.gz` mbox is not sniffed as a corrupted mbox.
static BACKENDS: [&dyn Backend; 9] = [
    &RemoteBackend::IMAP,
    &RemoteBackend::NOTMUCH,
    &RemoteBackend::POP,
    &RemoteBackend::NNTP,
    &CompressedBackend,
    &MaildirBackend,
    &MhBackend,
    &MboxBackend::MBOX,
    &MboxBackend::MMDF,
];

/// Returns every registered backend, in probe order.
pub fn backends() -> &'static [&'static dyn Backend] {
    &BACKENDS
}

/// Returns the backend of the given mailbox type, `None` only for
/// [`MailboxType::Unknown`].
pub fn get_backend(kind: MailboxType) -> Option<&'static dyn Backend> {
    BACKENDS.iter().copied().find(|backend| backend.kind() == kind)
}

/// Finds the type of the mailbox at the given path.
///
/// Backends are asked in registry order and the first match wins.
/// When no metadata is given for a local path, the path is stat'ed.
pub fn probe(path: &str, meta: Option<&fs::Metadata>) -> MailboxType {
    if path.is_empty() {
        return MailboxType::Unknown;
    }

    let owned_meta;
    let meta = match meta {
        Some(meta) => Some(meta),
        None if is_url(path) => None,
        None => {
            owned_meta = Path::new(path).metadata().ok();
            owned_meta.as_ref()
        }
    };

    for backend in backends() {
        if !backend.is_local() || meta.is_some() {
            let kind = backend.path_probe(path, meta);
            if kind != MailboxType::Unknown {
                trace!("path {:?} probed as {}", path, kind);
                return kind;
            }
        }
    }

    debug!("cannot probe path {:?}", path);
    MailboxType::Unknown
}

/// Tells if the path looks like a URL (`scheme://...`).
pub fn is_url(path: &str) -> bool {
    match path.find("://") {
        Some(idx) => {
            idx > 0
                && path[..idx]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        None => false,
    }
}
