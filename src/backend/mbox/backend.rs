//! Mbox backend module.
//!
//! This module contains the definition of the flat file backends and
//! their operation table implementation.

use log::{debug, info, trace, warn};
use std::{
    env,
    fs::{self, FileTimes, OpenOptions},
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    backend::{self, path, Backend, Context},
    mailbox::stats_of,
    CheckStatsFlags, CheckStatsStatus, CheckStatus, Email, Flag, Locator, Mailbox, MailboxType,
    Message, MsgOpenFlags, OpenFlags, OpenStatus, Snapshot,
};

use super::parser::{self, Span, MMDF_SEP};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read mailbox file {1}")]
    ReadFileError(#[source] io::Error, PathBuf),
    #[error("cannot create mailbox file {1}")]
    CreateFileError(#[source] io::Error, PathBuf),
    #[error("cannot write mailbox file {1}")]
    WriteFileError(#[source] io::Error, PathBuf),
    #[error("cannot replace mailbox file {1}")]
    ReplaceFileError(#[source] io::Error, PathBuf),
    #[error("cannot restore access time of {1}")]
    RestoreTimesError(#[source] io::Error, PathBuf),
    #[error("cannot create temporary message file {1}")]
    CreateTmpFileError(#[source] io::Error, PathBuf),
    #[error("cannot read temporary message file {1}")]
    ReadTmpFileError(#[source] io::Error, PathBuf),
    #[error("cannot find message {0} in mailbox index")]
    FindMsgError(usize),
    #[error("cannot read message at offset {1} of {2}")]
    ReadMsgError(#[source] io::Error, u64, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the flat file backends.
pub struct MboxBackend {
    kind: MailboxType,
}

impl MboxBackend {
    pub const MBOX: Self = Self {
        kind: MailboxType::Mbox,
    };
    pub const MMDF: Self = Self {
        kind: MailboxType::Mmdf,
    };

    pub fn for_kind(kind: MailboxType) -> &'static Self {
        match kind {
            MailboxType::Mmdf => &Self::MMDF,
            _ => &Self::MBOX,
        }
    }

    fn is_mmdf(&self) -> bool {
        self.kind == MailboxType::Mmdf
    }

    fn scan(&self, data: &[u8]) -> Vec<Span> {
        if self.is_mmdf() {
            parser::scan_mmdf(data)
        } else {
            parser::scan_mbox(data)
        }
    }

    fn read_emails(&self, path: &Path) -> Result<(Vec<u8>, Vec<Email>)> {
        let data = fs::read(path).map_err(|err| Error::ReadFileError(err, path.to_owned()))?;
        let emails = self
            .scan(&data)
            .into_iter()
            .map(|span| parser::parse_email(&data, span))
            .collect();
        Ok((data, emails))
    }

    fn padding(&self) -> &'static [u8] {
        if self.is_mmdf() {
            MMDF_SEP
        } else {
            &b"\n"[..]
        }
    }

    /// Wraps a message so it can be appended to the file: mbox
    /// messages need a `From ` line and quoted body separators, mmdf
    /// messages an opening separator. The closing padding is added
    /// too.
    fn frame(&self, msg: &[u8], email: &Email) -> Vec<u8> {
        let mut framed = Vec::with_capacity(msg.len() + 64);
        if self.is_mmdf() {
            if !msg.starts_with(MMDF_SEP) {
                framed.extend_from_slice(MMDF_SEP);
            }
            framed.extend_from_slice(msg);
        } else {
            let (from, body) = parser::split_from_line(msg);
            if from.is_empty() {
                framed.extend_from_slice(
                    parser::from_line(email.sender.as_deref(), email.received).as_bytes(),
                );
            } else {
                framed.extend_from_slice(from);
            }
            // body lines must not read as separators
            framed.extend_from_slice(&parser::escape_from_lines(body));
        }
        if !framed.ends_with(b"\n") {
            framed.push(b'\n');
        }
        framed.extend_from_slice(self.padding());
        framed
    }

    /// Returns the bytes needed between the current end of the file
    /// and the next appended message.
    fn glue(&self, path: &Path, len: u64) -> Result<&'static [u8]> {
        if len == 0 || self.is_mmdf() {
            return Ok(&b""[..]);
        }
        let mut file = fs::File::open(path).map_err(|err| Error::ReadFileError(err, path.to_owned()))?;
        let mut tail = [0u8; 2];
        let n = len.min(2);
        file.seek(SeekFrom::Start(len - n))
            .and_then(|_| file.read_exact(&mut tail[..n as usize]))
            .map_err(|err| Error::ReadFileError(err, path.to_owned()))?;
        let glue: &'static [u8] = match &tail[..n as usize] {
            b"\n\n" => &b""[..],
            [.., b'\n'] => &b"\n"[..],
            _ => &b"\n\n"[..],
        };
        Ok(glue)
    }

    /// Compares a fresh scan of the file against the index. Known
    /// messages must still start at the same offset, otherwise the
    /// file was rewritten behind our back.
    fn merge(&self, mailbox: &mut Mailbox, fresh: Vec<Email>) -> CheckStatus {
        let intact = fresh.len() >= mailbox.emails.len()
            && mailbox
                .emails
                .iter()
                .zip(&fresh)
                .all(|(known, latest)| known.id == latest.id);

        if !intact {
            debug!("mailbox {} was modified externally", mailbox.path);
            mailbox.load(fresh);
            return CheckStatus::Reopened;
        }

        let mut flags_changed = false;
        let known = mailbox.emails.len();
        let mut fresh = fresh.into_iter();
        for (email, latest) in mailbox.emails.iter_mut().zip(fresh.by_ref()) {
            email.locator = latest.locator;
            if !email.changed && email.flags != latest.flags {
                email.flags = latest.flags;
                flags_changed = true;
            }
        }
        mailbox.emails.extend(fresh);
        mailbox.refresh_stats();

        if mailbox.emails.len() > known {
            CheckStatus::NewMail
        } else if flags_changed {
            CheckStatus::Flags
        } else {
            CheckStatus::NoChange
        }
    }

    fn tmp_path(store: &Path, suffix: &str) -> PathBuf {
        let name = store
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        store.with_file_name(format!(".{}.{}.{}", name, Uuid::new_v4(), suffix))
    }
}

/// Returns the file holding the messages: the plain copy of a
/// compressed mailbox, or the mailbox itself.
pub(crate) fn storage_path(mailbox: &Mailbox) -> PathBuf {
    mailbox
        .plain_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&mailbox.path))
}

impl Backend for MboxBackend {
    fn kind(&self) -> MailboxType {
        self.kind
    }

    fn is_local(&self) -> bool {
        true
    }

    fn mbox_open(&self, ctx: &mut Context) -> backend::Result<OpenStatus> {
        let path = storage_path(ctx.mailbox);
        debug!("opening {} file {:?}", self.kind, path);

        if !path.exists() {
            let question = format!("{} does not exist. Create it?", path.display());
            if !ctx.prompt.confirm(&question)? {
                return Ok(OpenStatus::Abort);
            }
            fs::File::create(&path).map_err(|err| Error::CreateFileError(err, path.clone()))?;
        }

        let meta = path
            .metadata()
            .map_err(|err| Error::ReadFileError(err, path.clone()))?;
        if meta.permissions().readonly() {
            ctx.mailbox.flags.insert(OpenFlags::READ_ONLY);
        }

        let (_, emails) = self.read_emails(&path)?;
        trace!("emails: {:?}", emails);
        ctx.mailbox.load(emails);
        ctx.mailbox.snapshot = Snapshot::of(&path);

        if ctx.mailbox.flags.contains(OpenFlags::PEEK) {
            restore_times(&path, &meta)?;
        }

        Ok(OpenStatus::Ok)
    }

    fn mbox_open_append(&self, ctx: &mut Context, flags: OpenFlags) -> backend::Result<()> {
        let path = storage_path(ctx.mailbox);
        debug!("opening {} file {:?} for appending", self.kind, path);

        if flags.contains(OpenFlags::NEW_FOLDER) || !path.exists() {
            fs::File::create(&path).map_err(|err| Error::CreateFileError(err, path.clone()))?;
        }

        let (_, emails) = self.read_emails(&path)?;
        ctx.mailbox.load(emails);
        ctx.mailbox.snapshot = Snapshot::of(&path);
        Ok(())
    }

    fn mbox_check(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let path = storage_path(ctx.mailbox);
        let current = Snapshot::of(&path);
        if current.is_none() {
            return Err(Error::ReadFileError(
                io::Error::new(io::ErrorKind::NotFound, "mailbox file vanished"),
                path,
            ))?;
        }
        if current == ctx.mailbox.snapshot {
            return Ok(CheckStatus::NoChange);
        }

        let (_, fresh) = self.read_emails(&path)?;
        let status = self.merge(ctx.mailbox, fresh);
        ctx.mailbox.snapshot = current;
        Ok(status)
    }

    fn mbox_check_stats(
        &self,
        ctx: &mut Context,
        flags: CheckStatsFlags,
    ) -> backend::Result<CheckStatsStatus> {
        let path = storage_path(ctx.mailbox);
        let unchanged = ctx.mailbox.is_open() && Snapshot::of(&path) == ctx.mailbox.snapshot;

        let stats = if unchanged && !flags.contains(CheckStatsFlags::FORCE) {
            stats_of(&ctx.mailbox.emails)
        } else {
            let (_, emails) = self.read_emails(&path)?;
            stats_of(&emails)
        };

        let has_new = stats.unread > 0;
        ctx.mailbox.stats = stats;
        debug!("stats of {:?}: {:?}", path, stats);

        Ok(if has_new {
            CheckStatsStatus::NewMail
        } else {
            CheckStatsStatus::NoChange
        })
    }

    fn mbox_sync(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let path = storage_path(ctx.mailbox);
        let (data, fresh) = self.read_emails(&path)?;

        let known = ctx.mailbox.emails.len();
        let status = self.merge(ctx.mailbox, fresh);
        if status == CheckStatus::Reopened {
            ctx.mailbox.snapshot = Snapshot::of(&path);
            return Ok(status);
        }

        if ctx.config.mark_old {
            for email in ctx.mailbox.emails[..known].iter_mut() {
                if !email.flags.is_seen() && !email.flags.contains(&Flag::Old) {
                    email.set_flag(Flag::Old, true);
                }
            }
        }

        let dirty = ctx.mailbox.emails.iter().any(|e| e.changed || e.is_deleted());
        if !dirty {
            ctx.mailbox.snapshot = Snapshot::of(&path);
            return Ok(status);
        }

        let mut out = Vec::with_capacity(data.len());
        for email in &ctx.mailbox.emails {
            if email.is_deleted() && !(ctx.config.keep_flagged && email.flags.is_flagged()) {
                trace!("dropping deleted email {}", email.id);
                continue;
            }
            let span = match email.locator {
                Locator::Offset { offset, length } => Span { offset, length },
                _ => continue,
            };
            let msg = span.slice(&data);
            let msg = if email.changed {
                parser::rewrite_status(msg, &email.flags)
            } else {
                msg.to_vec()
            };
            if self.is_mmdf() {
                out.extend_from_slice(MMDF_SEP);
            }
            out.extend_from_slice(&msg);
            out.extend_from_slice(self.padding());
        }

        let tmp = Self::tmp_path(&path, "sync");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&out)?;
            file.sync_all()?;
            if let Ok(meta) = path.metadata() {
                fs::set_permissions(&tmp, meta.permissions())?;
            }
            Ok(())
        };
        if let Err(err) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(Error::WriteFileError(err, tmp))?;
        }
        fs::rename(&tmp, &path).map_err(|err| Error::ReplaceFileError(err, path.clone()))?;

        let (_, emails) = self.read_emails(&path)?;
        ctx.mailbox.load(emails);
        ctx.mailbox.snapshot = Snapshot::of(&path);

        if !ctx.mailbox.is_quiet() {
            info!("{} written", path.display());
        }

        Ok(status)
    }

    fn mbox_close(&self, ctx: &mut Context) -> backend::Result<()> {
        debug!("closing {} file {}", self.kind, ctx.mailbox.path);
        Ok(())
    }

    fn msg_open(&self, ctx: &mut Context, index: usize) -> backend::Result<Message> {
        let path = storage_path(ctx.mailbox);
        let email = ctx.mailbox.email(index).ok_or(Error::FindMsgError(index))?;
        let (offset, length) = match email.locator {
            Locator::Offset { offset, length } => (offset, length),
            _ => return Err(Error::FindMsgError(index))?,
        };

        let mut file = fs::File::open(&path).map_err(|err| Error::ReadFileError(err, path.clone()))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| Error::ReadMsgError(err, offset, path.clone()))?;

        let mut msg = if self.is_mmdf() {
            Message::reader(ctx.mailbox.id, index, file.take(length), path)
        } else {
            let mut raw = Vec::with_capacity(length as usize);
            file.take(length)
                .read_to_end(&mut raw)
                .map_err(|err| Error::ReadMsgError(err, offset, path.clone()))?;
            let (from, body) = parser::split_from_line(&raw);
            let mut content = from.to_vec();
            content.extend_from_slice(&parser::unescape_from_lines(body));
            Message::reader(ctx.mailbox.id, index, Cursor::new(content), path)
        };
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
        let path = env::temp_dir().join(format!("mailbox-lib-{}.msg", Uuid::new_v4()));
        debug!("opening new message {:?} for {}", path, ctx.mailbox.path);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| Error::CreateTmpFileError(err, path.clone()))?;

        if flags.contains(MsgOpenFlags::ADD_FROM) {
            let sep = if self.is_mmdf() {
                MMDF_SEP.to_vec()
            } else {
                parser::from_line(email.sender.as_deref(), email.received).into_bytes()
            };
            file.write_all(&sep)
                .map_err(|err| Error::CreateTmpFileError(err, path.clone()))?;
        }

        let mut msg = Message::writer(ctx.mailbox.id, file, path);
        msg.flags = email.flags.clone();
        msg.received = email.received;
        if flags.contains(MsgOpenFlags::SET_DRAFT) {
            msg.flags.insert(Flag::Draft);
        }
        Ok(msg)
    }

    fn msg_commit(&self, ctx: &mut Context, msg: &mut Message) -> backend::Result<()> {
        let store = storage_path(ctx.mailbox);
        msg.sync_all()
            .map_err(|err| Error::WriteFileError(err, msg.path.clone()))?;
        let content =
            fs::read(&msg.path).map_err(|err| Error::ReadTmpFileError(err, msg.path.clone()))?;

        let unframed = content.strip_prefix(MMDF_SEP).unwrap_or(&content);
        let mut email = Email::from_headers(parser::split_from_line(unframed).1).unwrap_or_default();
        email.flags = msg.flags.clone();
        email.received = msg.received;
        let content = if msg.flags.is_empty() {
            content
        } else {
            parser::rewrite_status(&content, &msg.flags)
        };

        let before = Snapshot::of(&store);
        let len = before.map(|snapshot| snapshot.size).unwrap_or_default();
        let glue = self.glue(&store, len)?;
        let framed = self.frame(&content, &email);

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&store)
            .map_err(|err| Error::WriteFileError(err, store.clone()))?;
        let written = file
            .write_all(glue)
            .and_then(|_| file.write_all(&framed))
            .and_then(|_| file.sync_all());
        if let Err(err) = written {
            // leave the mailbox as it was
            if let Err(err) = file.set_len(len) {
                warn!("cannot truncate {:?} back: {}", store, err);
            }
            return Err(Error::WriteFileError(err, store))?;
        }

        // the opening separator of mmdf messages is not part of
        // their span
        let lead = if self.is_mmdf() { MMDF_SEP.len() } else { 0 };
        let offset = len + (glue.len() + lead) as u64;
        let length = (framed.len() - lead - self.padding().len()) as u64;
        email.id = offset.to_string();
        email.locator = Locator::Offset { offset, length };
        if let Some((sender, _)) = parser::parse_from_line(&framed) {
            email.sender = Some(sender);
        }
        ctx.mailbox.push(email);

        if before == ctx.mailbox.snapshot || ctx.mailbox.snapshot.is_none() {
            ctx.mailbox.snapshot = Snapshot::of(&store);
        }

        if let Err(err) = fs::remove_file(&msg.path) {
            warn!("cannot remove temporary message {:?}: {}", msg.path, err);
        }
        msg.committed_path = Some(store);
        Ok(())
    }

    fn msg_padding_size(&self, _mailbox: &Mailbox) -> usize {
        self.padding().len()
            * if self.is_mmdf() {
                2
            } else {
                1
            }
    }

    fn path_probe(&self, path: &str, meta: Option<&fs::Metadata>) -> MailboxType {
        match meta {
            Some(meta) if meta.is_file() => (),
            _ => return MailboxType::Unknown,
        }

        let mut head = [0u8; 5];
        let n = fs::File::open(path)
            .and_then(|mut file| read_up_to(&mut file, &mut head))
            .unwrap_or(0);
        let head = &head[..n];

        let kind = if n == 0 {
            // empty files are claimed by mbox
            MailboxType::Mbox
        } else if head.starts_with(b"From ") {
            MailboxType::Mbox
        } else if head == MMDF_SEP {
            MailboxType::Mmdf
        } else {
            MailboxType::Unknown
        };

        if kind == self.kind {
            kind
        } else {
            MailboxType::Unknown
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
        let meta = Path::new(path)
            .metadata()
            .map_err(|err| backend::Error::ReadMetadataError(err, path.to_owned()))?;
        Ok(meta.len() == 0)
    }
}

fn read_up_to(file: &mut fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match file.read(&mut buf[n..])? {
            0 => break,
            read => n += read,
        }
    }
    Ok(n)
}

/// Puts back the access and modification times read before a peek.
fn restore_times(path: &Path, meta: &fs::Metadata) -> Result<()> {
    let (accessed, modified) = match (meta.accessed(), meta.modified()) {
        (Ok(accessed), Ok(modified)) => (accessed, modified),
        _ => return Ok(()),
    };
    let times = FileTimes::new().set_accessed(accessed).set_modified(modified);
    fs::File::open(path)
        .and_then(|file| file.set_times(times))
        .map_err(|err| Error::RestoreTimesError(err, path.to_owned()))
}
