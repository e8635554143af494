//! Maildir backend module.
//!
//! This module contains the definition of the maildir backend and its
//! operation table implementation.

use log::{debug, info, trace, warn};
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    result,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    backend::{self, path, Backend, Context},
    mailbox::stats_of,
    CheckStatsFlags, CheckStatsStatus, CheckStatus, Email, Flag, Flags, Locator, Mailbox,
    MailboxType, Message, MsgOpenFlags, OpenFlags, OpenStatus,
};

use super::flags::{self, INFO_SEP};

const SUBDIRS: [&str; 3] = ["cur", "new", "tmp"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find maildir {0}")]
    FindMaildirError(PathBuf),
    #[error("cannot create maildir {1}")]
    CreateMaildirError(#[source] io::Error, PathBuf),
    #[error("cannot list maildir entries of {1}")]
    ListEntriesError(#[source] io::Error, PathBuf),
    #[error("cannot read maildir message {1}")]
    ReadMsgError(#[source] io::Error, PathBuf),
    #[error("cannot find message {0} in mailbox index")]
    FindMsgError(usize),
    #[error("cannot create temporary message file {1}")]
    CreateTmpFileError(#[source] io::Error, PathBuf),
    #[error("cannot deliver message {1}")]
    DeliverMsgError(#[source] io::Error, PathBuf),
    #[error("cannot set flags of maildir message {1}")]
    SetFlagsError(#[source] io::Error, PathBuf),
    #[error("cannot delete maildir message {1}")]
    DelMsgError(#[source] io::Error, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the maildir backend.
pub struct MaildirBackend;

impl MaildirBackend {
    /// Lists the messages of `new/` and `cur/`, sorted by unique name
    /// so the order is stable across listings.
    fn list(root: &Path) -> Result<Vec<Email>> {
        let mdir = maildir::Maildir::from(root.to_owned());
        let mut emails = Vec::new();

        for (entries, in_cur) in [(mdir.list_new(), false), (mdir.list_cur(), true)] {
            for entry in entries {
                let entry = entry.map_err(|err| Error::ListEntriesError(err, root.to_owned()))?;
                let raw = fs::read(entry.path())
                    .map_err(|err| Error::ReadMsgError(err, entry.path().to_owned()))?;
                let mut email = Email::from_headers(&raw).unwrap_or_default();
                email.id = entry.id().to_owned();
                email.flags = flags::from_info(entry.flags(), in_cur);
                email.locator = Locator::File(entry.path().to_owned());
                emails.push(email);
            }
        }

        emails.sort_by(|a, b| a.id.cmp(&b.id));
        trace!("maildir emails: {:?}", emails);
        Ok(emails)
    }

    fn unique_name() -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        format!("{}.{}.mailbox-lib", secs, Uuid::new_v4().to_simple())
    }

    /// Returns where a message with the given flags belongs. Only
    /// untouched messages stay in `new/`, since files there carry no
    /// info suffix.
    fn target(root: &Path, id: &str, flags: &Flags) -> PathBuf {
        let info = flags::to_info(flags);
        if info.is_empty() && !flags.contains(&Flag::Old) {
            root.join("new").join(id)
        } else {
            root.join("cur").join(format!("{}{}{}", id, INFO_SEP, info))
        }
    }

    fn create(root: &Path) -> Result<()> {
        debug!("creating maildir {:?}", root);
        maildir::Maildir::from(root.to_owned())
            .create_dirs()
            .map_err(|err| Error::CreateMaildirError(err, root.to_owned()))
    }
}

/// Tells if the given directory holds all three maildir
/// subdirectories.
pub fn is_maildir(path: &Path) -> bool {
    SUBDIRS.iter().all(|sub| path.join(sub).is_dir())
}

fn file_locator(mailbox: &Mailbox, index: usize) -> Result<(&Email, PathBuf)> {
    let email = mailbox.email(index).ok_or(Error::FindMsgError(index))?;
    match &email.locator {
        Locator::File(path) => Ok((email, path.clone())),
        _ => Err(Error::FindMsgError(index)),
    }
}

impl Backend for MaildirBackend {
    fn kind(&self) -> MailboxType {
        MailboxType::Maildir
    }

    fn is_local(&self) -> bool {
        true
    }

    fn mbox_open(&self, ctx: &mut Context) -> backend::Result<OpenStatus> {
        let root = PathBuf::from(&ctx.mailbox.path);
        debug!("opening maildir {:?}", root);

        if !is_maildir(&root) {
            return Err(Error::FindMaildirError(root))?;
        }

        let cur_readonly = root
            .join("cur")
            .metadata()
            .map(|meta| meta.permissions().readonly())
            .unwrap_or(false);
        if cur_readonly {
            ctx.mailbox.flags.insert(OpenFlags::READ_ONLY);
        }

        let emails = Self::list(&root)?;
        ctx.mailbox.load(emails);
        Ok(OpenStatus::Ok)
    }

    fn mbox_open_append(&self, ctx: &mut Context, flags: OpenFlags) -> backend::Result<()> {
        let root = PathBuf::from(&ctx.mailbox.path);
        if flags.contains(OpenFlags::APPEND_NEW) || !is_maildir(&root) {
            Self::create(&root)?;
        }
        let emails = Self::list(&root)?;
        ctx.mailbox.load(emails);
        Ok(())
    }

    fn mbox_check(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let root = PathBuf::from(&ctx.mailbox.path);
        let fresh = Self::list(&root)?;
        Ok(ctx.mailbox.reconcile(fresh))
    }

    fn mbox_check_stats(
        &self,
        ctx: &mut Context,
        _flags: CheckStatsFlags,
    ) -> backend::Result<CheckStatsStatus> {
        let root = PathBuf::from(&ctx.mailbox.path);
        let stats = stats_of(&Self::list(&root)?);
        ctx.mailbox.stats = stats;
        debug!("stats of {:?}: {:?}", root, stats);

        Ok(if stats.unread > 0 {
            CheckStatsStatus::NewMail
        } else {
            CheckStatsStatus::NoChange
        })
    }

    fn mbox_sync(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let root = PathBuf::from(&ctx.mailbox.path);
        let known = ctx.mailbox.emails.len();
        let status = ctx.mailbox.reconcile(Self::list(&root)?);
        if status == CheckStatus::Reopened {
            return Ok(status);
        }

        for (i, email) in ctx.mailbox.emails.iter_mut().enumerate() {
            let current = match &email.locator {
                Locator::File(path) => path.clone(),
                _ => continue,
            };

            if email.is_deleted() && !(ctx.config.keep_flagged && email.flags.is_flagged()) {
                trace!("deleting maildir message {:?}", current);
                fs::remove_file(&current).map_err(|err| Error::DelMsgError(err, current.clone()))?;
                continue;
            }

            // messages seen in a previous session leave new/
            if ctx.config.mark_old && i < known && !email.flags.is_seen() {
                email.flags.toggle(Flag::Old, true);
            }

            let target = Self::target(&root, &email.id, &email.flags);
            if target != current {
                trace!("renaming maildir message {:?} to {:?}", current, target);
                fs::rename(&current, &target)
                    .map_err(|err| Error::SetFlagsError(err, current.clone()))?;
            }
        }

        let emails = Self::list(&root)?;
        ctx.mailbox.load(emails);

        if !ctx.mailbox.is_quiet() {
            info!("maildir {:?} synchronized", root);
        }

        Ok(status)
    }

    fn mbox_close(&self, ctx: &mut Context) -> backend::Result<()> {
        debug!("closing maildir {}", ctx.mailbox.path);
        Ok(())
    }

    fn msg_open(&self, ctx: &mut Context, index: usize) -> backend::Result<Message> {
        let (email, path) = file_locator(ctx.mailbox, index)?;
        let file = fs::File::open(&path).map_err(|err| Error::ReadMsgError(err, path.clone()))?;
        let mut msg = Message::reader(ctx.mailbox.id, index, file, path);
        msg.flags = email.flags.clone();
        msg.received = email.received;
        Ok(msg)
    }

    fn msg_open_new(
        &self,
        ctx: &mut Context,
        email: &Email,
        flags: MsgOpenFlags,
    ) -> backend::Result<Message> {
        let path = Path::new(&ctx.mailbox.path)
            .join("tmp")
            .join(Self::unique_name());
        debug!("opening new maildir message {:?}", path);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| Error::CreateTmpFileError(err, path.clone()))?;

        let mut msg = Message::writer(ctx.mailbox.id, file, path);
        msg.flags = email.flags.clone();
        msg.received = email.received;
        if flags.contains(MsgOpenFlags::SET_DRAFT) {
            msg.flags.insert(Flag::Draft);
        }
        Ok(msg)
    }

    fn msg_commit(&self, ctx: &mut Context, msg: &mut Message) -> backend::Result<()> {
        msg.sync_all()
            .map_err(|err| Error::DeliverMsgError(err, msg.path.clone()))?;

        let root = PathBuf::from(&ctx.mailbox.path);
        let id = msg
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(Self::unique_name);
        let target = Self::target(&root, &id, &msg.flags);
        let raw = fs::read(&msg.path).map_err(|err| Error::ReadMsgError(err, msg.path.clone()))?;

        fs::rename(&msg.path, &target).map_err(|err| Error::DeliverMsgError(err, target.clone()))?;
        if let Ok(dir) = fs::File::open(target.parent().unwrap_or(&root)) {
            if let Err(err) = dir.sync_all() {
                warn!("cannot sync directory of {:?}: {}", target, err);
            }
        }

        let in_cur = target.parent().map(|dir| dir.ends_with("cur")).unwrap_or(false);
        let mut email = Email::from_headers(&raw).unwrap_or_default();
        email.id = id;
        email.flags = flags::from_info(&flags::to_info(&msg.flags), in_cur);
        if msg.received > 0 {
            email.received = msg.received;
        }
        email.locator = Locator::File(target.clone());
        ctx.mailbox.push(email);

        msg.committed_path = Some(target);
        Ok(())
    }

    fn path_probe(&self, path: &str, meta: Option<&fs::Metadata>) -> MailboxType {
        match meta {
            Some(meta) if meta.is_dir() && is_maildir(Path::new(path)) => MailboxType::Maildir,
            _ => MailboxType::Unknown,
        }
    }

    fn path_canon(&self, path: String) -> backend::Result<String> {
        path::canon(path)
    }

    fn path_pretty(&self, path: String, folder: &str) -> backend::Result<String> {
        Ok(path::pretty(path, folder))
    }

    /// Returns the enclosing mailbox: the maildir owning a reserved
    /// subdirectory, or the parent directory otherwise.
    fn path_parent(&self, path: String) -> backend::Result<String> {
        let trimmed = path.trim_end_matches('/');
        let buf = Path::new(trimmed);
        let reserved = buf
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| SUBDIRS.contains(&name))
            .unwrap_or(false);

        match buf.parent() {
            Some(parent) if reserved => Ok(parent.to_string_lossy().to_string()),
            _ => path::parent(path),
        }
    }

    fn path_is_empty(&self, path: &str) -> backend::Result<bool> {
        let mdir = maildir::Maildir::from(PathBuf::from(path));
        if !is_maildir(mdir.path()) {
            return Err(Error::FindMaildirError(mdir.path().to_owned()))?;
        }
        Ok(mdir.count_new() == 0 && mdir.count_cur() == 0)
    }
}
