//! MH backend module.
//!
//! This module contains the definition of the MH backend and its
//! operation table implementation.

use log::{debug, info, trace, warn};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    backend::{self, maildir, path, Backend, Context},
    mailbox::stats_of,
    CheckStatsFlags, CheckStatsStatus, CheckStatus, Email, Flag, Flags, Locator, MailboxType, Message,
    MsgOpenFlags, OpenFlags, OpenStatus,
};

use super::sequences::{Sequences, SEQUENCES_FILE};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find MH folder {0}")]
    FindFolderError(PathBuf),
    #[error("cannot create MH folder {1}")]
    CreateFolderError(#[source] io::Error, PathBuf),
    #[error("cannot list MH folder {1}")]
    ListFolderError(#[source] io::Error, PathBuf),
    #[error("cannot read MH sequences {1}")]
    ReadSequencesError(#[source] io::Error, PathBuf),
    #[error("cannot write MH sequences {1}")]
    WriteSequencesError(#[source] io::Error, PathBuf),
    #[error("cannot read MH message {1}")]
    ReadMsgError(#[source] io::Error, PathBuf),
    #[error("cannot find message {0} in mailbox index")]
    FindMsgError(usize),
    #[error("cannot create temporary message file {1}")]
    CreateTmpFileError(#[source] io::Error, PathBuf),
    #[error("cannot deliver message {1}")]
    DeliverMsgError(#[source] io::Error, PathBuf),
    #[error("cannot delete MH message {1}")]
    DelMsgError(#[source] io::Error, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the MH backend.
pub struct MhBackend;

fn msg_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

impl MhBackend {
    /// Lists the message numbers of the folder, in ascending order.
    fn numbers(dir: &Path) -> Result<Vec<u32>> {
        let entries = fs::read_dir(dir).map_err(|err| Error::ListFolderError(err, dir.to_owned()))?;
        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::ListFolderError(err, dir.to_owned()))?;
            if let Some(n) = msg_number(&entry.path()) {
                if entry.path().is_file() {
                    numbers.push(n);
                }
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    fn read_sequences(dir: &Path) -> Result<Sequences> {
        let path = dir.join(SEQUENCES_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Sequences::parse(&content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Sequences::default()),
            Err(err) => Err(Error::ReadSequencesError(err, path)),
        }
    }

    /// Replaces the sequences file through a temporary sibling.
    fn write_sequences(dir: &Path, seqs: &Sequences) -> Result<()> {
        let path = dir.join(SEQUENCES_FILE);
        let tmp = dir.join(format!(".{}.{}", SEQUENCES_FILE, Uuid::new_v4()));
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(seqs.to_string().as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|err| {
            let _ = fs::remove_file(&tmp);
            Error::WriteSequencesError(err, path.clone())
        })
    }

    fn list(dir: &Path) -> Result<Vec<Email>> {
        let seqs = Self::read_sequences(dir)?;
        let mut emails = Vec::new();
        for n in Self::numbers(dir)? {
            let path = dir.join(n.to_string());
            let raw = fs::read(&path).map_err(|err| Error::ReadMsgError(err, path.clone()))?;
            let mut email = Email::from_headers(&raw).unwrap_or_default();
            email.id = n.to_string();
            email.flags = seqs.flags_of(n);
            email.locator = Locator::File(path);
            emails.push(email);
        }
        trace!("MH emails: {:?}", emails);
        Ok(emails)
    }

    fn create(dir: &Path) -> Result<()> {
        debug!("creating MH folder {:?}", dir);
        fs::create_dir_all(dir).map_err(|err| Error::CreateFolderError(err, dir.to_owned()))?;
        let seqs = dir.join(SEQUENCES_FILE);
        if !seqs.exists() {
            fs::File::create(&seqs).map_err(|err| Error::CreateFolderError(err, seqs.clone()))?;
        }
        Ok(())
    }

    /// Links the temporary file to the next free number. Another
    /// process may grab a number first, in which case the next one is
    /// tried.
    fn deliver(dir: &Path, tmp: &Path) -> Result<(u32, PathBuf)> {
        let mut n = Self::numbers(dir)?.last().copied().unwrap_or(0) + 1;
        loop {
            let target = dir.join(n.to_string());
            match fs::hard_link(tmp, &target) {
                Ok(()) => {
                    if let Err(err) = fs::remove_file(tmp) {
                        warn!("cannot remove temporary message {:?}: {}", tmp, err);
                    }
                    return Ok((n, target));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(_) => {
                    // file systems without hard links
                    if target.exists() {
                        n += 1;
                        continue;
                    }
                    fs::rename(tmp, &target)
                        .map_err(|err| Error::DeliverMsgError(err, target.clone()))?;
                    return Ok((n, target));
                }
            }
        }
    }
}

impl Backend for MhBackend {
    fn kind(&self) -> MailboxType {
        MailboxType::Mh
    }

    fn is_local(&self) -> bool {
        true
    }

    fn mbox_open(&self, ctx: &mut Context) -> backend::Result<OpenStatus> {
        let dir = PathBuf::from(&ctx.mailbox.path);
        debug!("opening MH folder {:?}", dir);

        if !dir.is_dir() {
            return Err(Error::FindFolderError(dir))?;
        }
        let readonly = dir
            .metadata()
            .map(|meta| meta.permissions().readonly())
            .unwrap_or(false);
        if readonly {
            ctx.mailbox.flags.insert(OpenFlags::READ_ONLY);
        }

        let emails = Self::list(&dir)?;
        ctx.mailbox.load(emails);
        Ok(OpenStatus::Ok)
    }

    fn mbox_open_append(&self, ctx: &mut Context, flags: OpenFlags) -> backend::Result<()> {
        let dir = PathBuf::from(&ctx.mailbox.path);
        if flags.contains(OpenFlags::APPEND_NEW) || !dir.is_dir() {
            Self::create(&dir)?;
        }
        let emails = Self::list(&dir)?;
        ctx.mailbox.load(emails);
        Ok(())
    }

    fn mbox_check(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let dir = PathBuf::from(&ctx.mailbox.path);
        let fresh = Self::list(&dir)?;
        Ok(ctx.mailbox.reconcile(fresh))
    }

    fn mbox_check_stats(
        &self,
        ctx: &mut Context,
        _flags: CheckStatsFlags,
    ) -> backend::Result<CheckStatsStatus> {
        let dir = PathBuf::from(&ctx.mailbox.path);
        let stats = stats_of(&Self::list(&dir)?);
        ctx.mailbox.stats = stats;
        debug!("stats of {:?}: {:?}", dir, stats);

        Ok(if stats.unread > 0 {
            CheckStatsStatus::NewMail
        } else {
            CheckStatsStatus::NoChange
        })
    }

    fn mbox_sync(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let dir = PathBuf::from(&ctx.mailbox.path);
        let status = ctx.mailbox.reconcile(Self::list(&dir)?);
        if status == CheckStatus::Reopened {
            return Ok(status);
        }

        let mut seqs = Self::read_sequences(&dir)?;
        for email in &ctx.mailbox.emails {
            let (n, path) = match (&email.locator, email.id.parse::<u32>()) {
                (Locator::File(path), Ok(n)) => (n, path),
                _ => continue,
            };

            if email.is_deleted() && !(ctx.config.keep_flagged && email.flags.is_flagged()) {
                trace!("deleting MH message {:?}", path);
                fs::remove_file(path).map_err(|err| Error::DelMsgError(err, path.clone()))?;
                seqs.set(n, &Flags::from_iter([Flag::Seen]));
                continue;
            }
            seqs.set(n, &email.flags);
        }
        Self::write_sequences(&dir, &seqs)?;

        let emails = Self::list(&dir)?;
        ctx.mailbox.load(emails);

        if !ctx.mailbox.is_quiet() {
            info!("MH folder {:?} synchronized", dir);
        }

        Ok(status)
    }

    fn mbox_close(&self, ctx: &mut Context) -> backend::Result<()> {
        debug!("closing MH folder {}", ctx.mailbox.path);
        Ok(())
    }

    fn msg_open(&self, ctx: &mut Context, index: usize) -> backend::Result<Message> {
        let email = ctx.mailbox.email(index).ok_or(Error::FindMsgError(index))?;
        let path = match &email.locator {
            Locator::File(path) => path.clone(),
            _ => return Err(Error::FindMsgError(index))?,
        };
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
        let path = Path::new(&ctx.mailbox.path).join(format!(".{}", Uuid::new_v4()));
        debug!("opening new MH message {:?}", path);

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

        let dir = PathBuf::from(&ctx.mailbox.path);
        let raw = fs::read(&msg.path).map_err(|err| Error::ReadMsgError(err, msg.path.clone()))?;
        let mut seqs = Self::read_sequences(&dir)?;

        let (n, target) = Self::deliver(&dir, &msg.path)?;
        seqs.set(n, &msg.flags);
        if let Err(err) = Self::write_sequences(&dir, &seqs) {
            // take the message back out of the folder
            if let Err(err) = fs::rename(&target, &msg.path) {
                warn!("cannot withdraw message {:?}: {}", target, err);
                let _ = fs::remove_file(&target);
            }
            return Err(err)?;
        }

        let mut email = Email::from_headers(&raw).unwrap_or_default();
        email.id = n.to_string();
        email.flags = seqs.flags_of(n);
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
            Some(meta) if meta.is_dir() && !maildir::is_maildir(Path::new(path)) => MailboxType::Mh,
            _ => MailboxType::Unknown,
        }
    }

    fn path_canon(&self, path: String) -> backend::Result<String> {
        path::canon(path)
    }

    fn path_pretty(&self, path: String, folder: &str) -> backend::Result<String> {
        Ok(path::pretty(path, folder))
    }

    fn path_parent(&self, path: String) -> backend::Result<String> {
        path::parent(path)
    }

    fn path_is_empty(&self, path: &str) -> backend::Result<bool> {
        Ok(Self::numbers(Path::new(path))?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_names_only() {
        assert_eq!(Some(12), msg_number(Path::new("/m/12")));
        assert_eq!(None, msg_number(Path::new("/m/.mh_sequences")));
        assert_eq!(None, msg_number(Path::new("/m/,3")));
        assert_eq!(None, msg_number(Path::new("/m/12a")));
    }
}
