//! Remote backend module.
//!
//! This module contains the operation table shared by the protocol
//! backends. Each mailbox type is one constant of [`RemoteBackend`]
//! differing by its capabilities.

use log::{debug, info, trace, warn};
use std::{
    env,
    fs::{self, OpenOptions},
    io::Cursor,
    path::PathBuf,
};
use uuid::Uuid;

use crate::{
    backend::{self, Backend, Context},
    Account, CheckStatsFlags, CheckStatsStatus, CheckStatus, Email, Flag, Locator, Mailbox,
    MailboxType, Message, MsgOpenFlags, OpenFlags, OpenStatus,
};

use super::{url::scheme_kind, Connectors, Error, RemoteUrl, Result, Session};

/// Represents one remote backend.
pub struct RemoteBackend {
    kind: MailboxType,
    append: bool,
    tags: bool,
}

impl RemoteBackend {
    pub const IMAP: Self = Self {
        kind: MailboxType::Imap,
        append: true,
        tags: true,
    };
    pub const NOTMUCH: Self = Self {
        kind: MailboxType::Notmuch,
        append: true,
        tags: true,
    };
    pub const POP: Self = Self {
        kind: MailboxType::Pop,
        append: false,
        tags: false,
    };
    pub const NNTP: Self = Self {
        kind: MailboxType::Nntp,
        append: false,
        tags: false,
    };

    fn remote_name(&self, mailbox: &Mailbox) -> backend::Result<String> {
        Ok(remote_name(&mailbox.path)?)
    }

    fn check_append(&self) -> backend::Result<()> {
        if self.append {
            Ok(())
        } else {
            Err(backend::Error::AppendUnsupportedError(self.kind))
        }
    }

    fn validate_tag(&self, tag: &str) -> bool {
        match self.kind {
            // imap keywords are atoms and cannot be system flags
            MailboxType::Imap => {
                !tag.starts_with('\\')
                    && !tag
                        .chars()
                        .any(|c| c.is_control() || "(){%*\"]".contains(c))
            }
            _ => !tag.chars().any(char::is_control),
        }
    }
}

/// Returns the server-side name of the mailbox at the given URL: the
/// path of the URL, or the query for notmuch.
pub fn remote_name(path: &str) -> Result<String> {
    let url = RemoteUrl::parse(path)?;
    Ok(match (url.kind, url.query) {
        (MailboxType::Notmuch, Some(query)) => query,
        _ => url.path,
    })
}

fn session<'a>(
    account: &'a mut Account,
    mailbox: &Mailbox,
) -> backend::Result<&'a mut (dyn Session + 'static)> {
    account
        .session_mut()
        .ok_or_else(|| Error::NotConnectedError(mailbox.path.clone()).into())
}

fn uid_of(mailbox: &Mailbox, index: usize) -> backend::Result<u32> {
    match mailbox.email(index).map(|email| &email.locator) {
        Some(Locator::Uid(uid)) => Ok(*uid),
        _ => Err(Error::FindMsgError(index))?,
    }
}

impl Backend for RemoteBackend {
    fn kind(&self) -> MailboxType {
        self.kind
    }

    fn is_local(&self) -> bool {
        false
    }

    fn ac_identity(&self, path: &str, _folder: &str) -> backend::Result<String> {
        Ok(RemoteUrl::parse(path)?.identity())
    }

    /// Connects the account on its first mailbox.
    fn ac_add(
        &self,
        account: &mut Account,
        mailbox: &Mailbox,
        connectors: &Connectors,
    ) -> backend::Result<bool> {
        if account.kind != mailbox.kind {
            return Ok(false);
        }
        if account.session.is_none() {
            let url = RemoteUrl::parse(&mailbox.path)?;
            let connector = connectors
                .get(self.kind)
                .ok_or(Error::FindConnectorError(self.kind))?;
            debug!("connecting account {}", account.name);
            account.session = Some(connector.connect(&url)?);
        }
        Ok(true)
    }

    fn mbox_open(&self, ctx: &mut Context) -> backend::Result<OpenStatus> {
        let name = self.remote_name(ctx.mailbox)?;
        debug!("opening {} mailbox {:?}", self.kind, name);

        let session = session(ctx.account, ctx.mailbox)?;
        if !session.exists(&name)? {
            return Err(Error::FindMailboxError(ctx.mailbox.path.clone()))?;
        }
        let emails = session.list(&name)?;
        trace!("remote emails: {:?}", emails);
        ctx.mailbox.load(emails);
        Ok(OpenStatus::Ok)
    }

    fn mbox_open_append(&self, ctx: &mut Context, flags: OpenFlags) -> backend::Result<()> {
        self.check_append()?;
        let name = self.remote_name(ctx.mailbox)?;
        let session = session(ctx.account, ctx.mailbox)?;

        if !session.exists(&name)? {
            if self.kind == MailboxType::Notmuch && !flags.contains(OpenFlags::APPEND_NEW) {
                return Err(Error::FindMailboxError(ctx.mailbox.path.clone()))?;
            }
            debug!("creating remote mailbox {:?}", name);
            session.create(&name)?;
        }
        let emails = session.list(&name)?;
        ctx.mailbox.load(emails);
        Ok(())
    }

    fn mbox_check(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let name = self.remote_name(ctx.mailbox)?;
        let fresh = session(ctx.account, ctx.mailbox)?.list(&name)?;
        Ok(ctx.mailbox.reconcile(fresh))
    }

    fn mbox_check_stats(
        &self,
        ctx: &mut Context,
        _flags: CheckStatsFlags,
    ) -> backend::Result<CheckStatsStatus> {
        let name = self.remote_name(ctx.mailbox)?;
        let stats = session(ctx.account, ctx.mailbox)?.status(&name)?;
        ctx.mailbox.stats = stats;
        debug!("stats of {:?}: {:?}", name, stats);

        Ok(if stats.unread > 0 {
            CheckStatsStatus::NewMail
        } else {
            CheckStatsStatus::NoChange
        })
    }

    fn mbox_sync(&self, ctx: &mut Context) -> backend::Result<CheckStatus> {
        let name = self.remote_name(ctx.mailbox)?;
        let session = session(ctx.account, ctx.mailbox)?;

        let status = ctx.mailbox.reconcile(session.list(&name)?);
        if status == CheckStatus::Reopened {
            return Ok(status);
        }

        let mut expunged = Vec::new();
        for email in ctx.mailbox.emails.iter().filter(|email| email.changed) {
            let uid = match email.locator {
                Locator::Uid(uid) => uid,
                _ => continue,
            };
            if email.is_deleted() && !(ctx.config.keep_flagged && email.flags.is_flagged()) {
                expunged.push(uid);
                continue;
            }
            trace!("storing flags of remote message {}", uid);
            session.store_flags(&name, uid, &email.flags.clone_without_customs())?;
        }
        if !expunged.is_empty() {
            debug!("expunging {} remote messages", expunged.len());
            session.expunge(&name, &expunged)?;
        }

        let emails = session.list(&name)?;
        ctx.mailbox.load(emails);

        if !ctx.mailbox.is_quiet() {
            info!("{} mailbox {} synchronized", self.kind, ctx.mailbox.path);
        }

        Ok(status)
    }

    /// The session stays open until the account loses its last
    /// mailbox.
    fn mbox_close(&self, ctx: &mut Context) -> backend::Result<()> {
        debug!("closing {} mailbox {}", self.kind, ctx.mailbox.path);
        Ok(())
    }

    fn msg_open(&self, ctx: &mut Context, index: usize) -> backend::Result<Message> {
        let uid = uid_of(ctx.mailbox, index)?;
        let name = self.remote_name(ctx.mailbox)?;
        let raw = session(ctx.account, ctx.mailbox)?.fetch(&name, uid)?;

        let path = PathBuf::from(format!("{}/{}", ctx.mailbox.path.trim_end_matches('/'), uid));
        let mut msg = Message::reader(ctx.mailbox.id, index, Cursor::new(raw), path);
        if let Some(email) = ctx.mailbox.email(index) {
            msg.flags = email.flags.clone();
            msg.received = email.received;
        }
        Ok(msg)
    }

    fn msg_open_new(
        &self,
        ctx: &mut Context,
        email: &Email,
        flags: MsgOpenFlags,
    ) -> backend::Result<Message> {
        self.check_append()?;
        let path = env::temp_dir().join(format!("mailbox-lib-{}.msg", Uuid::new_v4()));
        debug!("opening new {} message {:?}", self.kind, path);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(Error::CreateTmpFileError)?;

        let mut msg = Message::writer(ctx.mailbox.id, file, path);
        msg.flags = email.flags.clone();
        msg.received = email.received;
        if flags.contains(MsgOpenFlags::SET_DRAFT) {
            msg.flags.insert(Flag::Draft);
        }
        Ok(msg)
    }

    fn msg_commit(&self, ctx: &mut Context, msg: &mut Message) -> backend::Result<()> {
        self.check_append()?;
        msg.sync_all().map_err(Error::CreateTmpFileError)?;
        let raw = fs::read(&msg.path).map_err(Error::ReadTmpFileError)?;

        let name = self.remote_name(ctx.mailbox)?;
        let uid = session(ctx.account, ctx.mailbox)?.append(&name, &raw, &msg.flags)?;
        debug!("appended message {} to {:?}", uid, name);

        let mut email = Email::from_headers(&raw).unwrap_or_default();
        email.id = uid.to_string();
        email.locator = Locator::Uid(uid);
        email.flags = msg.flags.clone();
        if msg.received > 0 {
            email.received = msg.received;
        }
        ctx.mailbox.push(email);

        if let Err(err) = fs::remove_file(&msg.path) {
            warn!("cannot remove temporary message {:?}: {}", msg.path, err);
        }
        msg.committed_path = Some(PathBuf::from(format!(
            "{}/{}",
            ctx.mailbox.path.trim_end_matches('/'),
            uid
        )));
        Ok(())
    }

    fn tags_supported(&self) -> bool {
        self.tags
    }

    fn tags_validate(&self, buf: &str) -> backend::Result<()> {
        if !self.tags {
            return Err(backend::Error::TagsUnsupportedError(self.kind));
        }
        if buf.split_whitespace().all(|tag| self.validate_tag(tag)) {
            Ok(())
        } else {
            Err(backend::Error::InvalidTagsError(buf.to_owned()))
        }
    }

    fn tags_commit(&self, ctx: &mut Context, index: usize, buf: &str) -> backend::Result<()> {
        self.tags_validate(buf)?;
        let uid = uid_of(ctx.mailbox, index)?;
        let name = self.remote_name(ctx.mailbox)?;
        let tags: Vec<String> = buf.split_whitespace().map(String::from).collect();
        session(ctx.account, ctx.mailbox)?.store_tags(&name, uid, &tags)?;

        if let Some(email) = ctx.mailbox.email_mut(index) {
            email.tags.replace(buf, &ctx.config.tags);
        }
        Ok(())
    }

    fn path_probe(&self, path: &str, _meta: Option<&fs::Metadata>) -> MailboxType {
        match path.split_once("://") {
            Some((scheme, _)) if scheme_kind(scheme) == self.kind => self.kind,
            _ => MailboxType::Unknown,
        }
    }

    fn path_canon(&self, path: String) -> backend::Result<String> {
        Ok(RemoteUrl::parse(&path)?.to_string())
    }

    fn path_pretty(&self, path: String, _folder: &str) -> backend::Result<String> {
        Ok(path)
    }

    /// Returns the enclosing IMAP folder, using `/` or `.` as
    /// hierarchy delimiter.
    fn path_parent(&self, path: String) -> backend::Result<String> {
        let mut url = RemoteUrl::parse(&path)?;
        if self.kind != MailboxType::Imap {
            return Err(backend::Error::PathParentError(path));
        }
        match url.path.rfind(|c| c == '/' || c == '.') {
            Some(idx) if idx > 0 => {
                url.path.truncate(idx);
                Ok(url.to_string())
            }
            _ => Err(backend::Error::PathParentError(path)),
        }
    }

    /// Remote emptiness needs a session, which only linked accounts
    /// hold.
    fn path_is_empty(&self, path: &str) -> backend::Result<bool> {
        Err(Error::NotConnectedError(path.to_owned()))?
    }
}
