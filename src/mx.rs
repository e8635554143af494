//! Mx module.
//!
//! This module contains the controller wrapping every backend
//! operation. It resolves paths, keeps the lifecycle state of the
//! mailboxes, links them to their accounts, takes the locks of the
//! local stores and validates the arguments before any I/O happens.

use log::{debug, info, trace, warn};
use std::{fs, io, path::Path};

use crate::{
    backend::{
        discard, get_backend, is_url, path, probe, remote, Backend, Connector, Connectors,
        Context, Error, Result,
    },
    Account, AccountId, AccountManager, AutoPrompt, CheckStatsFlags, CheckStatsStatus,
    CheckStatus, Email, HeaderCache, LockGuard, LockService, Mailbox, MailboxId, MailboxState,
    MailboxType, Message, MsgOpenFlags, MxConfig, OpenFlags, OpenStatus, ProcLockService, Prompt,
    SqliteHeaderCache, TagsEdit,
};

enum Lock {
    Held(Option<LockGuard>),
    Busy,
}

fn backend_of(mailbox: &Mailbox) -> Result<&'static dyn Backend> {
    get_backend(mailbox.kind).ok_or(Error::UnknownMailboxTypeError(mailbox.kind))
}

fn ensure_open(mailbox: &Mailbox) -> Result<()> {
    if mailbox.is_open() {
        Ok(())
    } else {
        Err(Error::MailboxNotOpenError(mailbox.path.clone()))
    }
}

fn context<'a>(
    config: &'a MxConfig,
    prompt: &'a mut dyn Prompt,
    accounts: &'a mut AccountManager,
    mailbox: &'a mut Mailbox,
) -> Result<Context<'a>> {
    let account = mailbox
        .account
        .and_then(|id| accounts.get_mut(id))
        .ok_or_else(|| Error::LinkMailboxError(mailbox.path.clone()))?;
    Ok(Context {
        config,
        prompt,
        mailbox,
        account,
    })
}

/// Represents the mailbox layer: the configuration, the live accounts
/// and the collaborator services shared by every mailbox.
pub struct Mx {
    config: MxConfig,
    accounts: AccountManager,
    locks: Box<dyn LockService>,
    prompt: Box<dyn Prompt>,
    hcache: Option<Box<dyn HeaderCache>>,
    connectors: Connectors,
}

impl Mx {
    /// Builds the controller with the default services: lock files
    /// through `proc-lock`, a prompt declining every question and the
    /// sqlite header cache when a cache path is configured.
    pub fn new(config: MxConfig) -> Self {
        let hcache = config.hcache_path.as_ref().and_then(|path| {
            match SqliteHeaderCache::open(path) {
                Ok(cache) => Some(Box::new(cache) as Box<dyn HeaderCache>),
                Err(err) => {
                    warn!("cannot open header cache, continuing without it: {}", err);
                    None
                }
            }
        });

        Self {
            locks: Box::new(ProcLockService::new(config.lock_dir.clone())),
            config,
            accounts: AccountManager::new(),
            prompt: Box::new(AutoPrompt::no()),
            hcache,
            connectors: Connectors::default(),
        }
    }

    pub fn with_lock_service<L: LockService + 'static>(mut self, locks: L) -> Self {
        self.locks = Box::new(locks);
        self
    }

    pub fn with_prompt<P: Prompt + 'static>(mut self, prompt: P) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_header_cache<H: HeaderCache + 'static>(mut self, hcache: H) -> Self {
        self.hcache = Some(Box::new(hcache));
        self
    }

    /// Registers the connector opening the sessions of the given
    /// remote mailbox type.
    pub fn with_connector<C: Connector + 'static>(mut self, kind: MailboxType, connector: C) -> Self {
        self.connectors.register(kind, connector);
        self
    }

    pub fn config(&self) -> &MxConfig {
        &self.config
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    /// Resolves a path into an unlinked mailbox. No I/O happens
    /// besides probing.
    pub fn mailbox(&self, path: &str) -> Result<Mailbox> {
        let (path, kind) = self.path_canon(path)?;
        debug!("resolved mailbox {} as {}", path, kind);
        Ok(Mailbox::new(path, kind))
    }

    fn expand(&self, path: &str) -> Result<String> {
        let path = path.trim();
        if is_url(path) {
            return Ok(path.to_owned());
        }

        let expanded = if let Some(rest) = path.strip_prefix('=').or_else(|| path.strip_prefix('+')) {
            format!("{}/{}", self.config.folder_str(), rest)
        } else if path == "!" {
            match &self.config.spool_file {
                Some(spool) => spool.to_string_lossy().to_string(),
                None => return Err(Error::ExpandPathError(path.to_owned())),
            }
        } else {
            path.to_owned()
        };

        shellexpand::full(&expanded)
            .map(|path| path.into_owned())
            .map_err(|_| Error::ExpandPathError(expanded.clone()))
    }

    // Paths

    /// Expands shorthands, makes the path absolute and probes its
    /// type. `Unknown` is returned for paths that do not exist yet.
    pub fn path_canon(&self, path: &str) -> Result<(String, MailboxType)> {
        let path = self.expand(path)?;
        if is_url(&path) {
            let kind = probe(&path, None);
            let backend = get_backend(kind).ok_or_else(|| Error::ProbeMailboxError(path.clone()))?;
            return Ok((backend.path_canon(path)?, kind));
        }

        let path = path::canon(path)?;
        let kind = probe(&path, None);
        match get_backend(kind) {
            Some(backend) => Ok((backend.path_canon(path)?, kind)),
            None => Ok((path, kind)),
        }
    }

    pub fn path_pretty(&self, path: &str) -> Result<String> {
        let folder = self.config.folder_str();
        match get_backend(probe(path, None)) {
            Some(backend) => backend.path_pretty(path.to_owned(), &folder),
            None if is_url(path) => Err(Error::ProbeMailboxError(path.to_owned())),
            None => Ok(path::pretty(path.to_owned(), &folder)),
        }
    }

    pub fn path_parent(&self, path: &str) -> Result<String> {
        match get_backend(probe(path, None)) {
            Some(backend) => backend.path_parent(path.to_owned()),
            None if is_url(path) => Err(Error::ProbeMailboxError(path.to_owned())),
            None => path::parent(path.to_owned()),
        }
    }

    pub fn path_probe(&self, path: &str, meta: Option<&fs::Metadata>) -> MailboxType {
        probe(path, meta)
    }

    /// Tells if the mailbox at the given path holds no message,
    /// without opening it. Remote mailboxes are asked through the
    /// session of the account owning them.
    pub fn path_is_empty(&mut self, path: &str) -> Result<bool> {
        let kind = probe(path, None);
        let backend = get_backend(kind).ok_or_else(|| Error::ProbeMailboxError(path.to_owned()))?;
        if backend.is_local() {
            return backend.path_is_empty(path);
        }

        let canon = backend.path_canon(path.to_owned())?;
        let name = remote::remote_name(&canon)?;
        match self
            .accounts
            .find_mut(kind, &canon, &self.config.folder_str())
            .and_then(Account::session_mut)
        {
            Some(session) => Ok(session.status(&name)?.total == 0),
            None => backend.path_is_empty(&canon),
        }
    }

    /// Tells if the mailbox at the given path exists and can be
    /// written to.
    pub fn access(&mut self, path: &str) -> Result<bool> {
        if is_url(path) {
            let kind = probe(path, None);
            let backend = get_backend(kind).ok_or_else(|| Error::ProbeMailboxError(path.to_owned()))?;
            let canon = backend.path_canon(path.to_owned())?;
            let name = remote::remote_name(&canon)?;
            return match self
                .accounts
                .find_mut(kind, &canon, &self.config.folder_str())
                .and_then(Account::session_mut)
            {
                Some(session) => Ok(session.exists(&name)?),
                None => Ok(false),
            };
        }

        match fs::metadata(path) {
            Ok(meta) => Ok(!meta.permissions().readonly()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::ReadMetadataError(err, path.to_owned())),
        }
    }

    // Accounts

    pub fn ac_find(&self, kind: MailboxType, path: &str) -> Option<&Account> {
        self.accounts.find(kind, path, &self.config.folder_str())
    }

    pub fn mbox_find(&self, account: AccountId, path: &str) -> Option<MailboxId> {
        self.accounts.find_mailbox(account, path)
    }

    /// Finds the mailbox opened at the given path, whatever its
    /// account. The path is resolved first.
    pub fn mbox_find2(&self, path: &str) -> Option<MailboxId> {
        let (path, _) = self.path_canon(path).ok()?;
        self.accounts
            .find_mailbox_global(&path)
            .map(|(_, mailbox)| mailbox)
    }

    pub fn ac_link(&mut self, mailbox: &mut Mailbox) -> Result<bool> {
        self.accounts
            .link(mailbox, &self.config.folder_str(), &self.connectors)
    }

    pub fn ac_remove(&mut self, mailbox: &mut Mailbox) {
        self.accounts.unlink(mailbox)
    }

    fn link(&mut self, mailbox: &mut Mailbox) -> Result<()> {
        if self.ac_link(mailbox)? {
            Ok(())
        } else {
            Err(Error::LinkMailboxError(mailbox.path.clone()))
        }
    }

    fn lock(&self, backend: &dyn Backend, mailbox: &Mailbox) -> Result<Lock> {
        if !backend.is_local() {
            return Ok(Lock::Held(None));
        }
        match self.locks.try_acquire(Path::new(&mailbox.path)) {
            Ok(Some(guard)) => Ok(Lock::Held(Some(guard))),
            Ok(None) => Ok(Lock::Busy),
            Err(err) => Err(Error::LockMailboxError(err, mailbox.path.clone())),
        }
    }

    fn abandon(&mut self, mailbox: &mut Mailbox, state: MailboxState) {
        self.accounts.unlink(mailbox);
        mailbox.reset();
        mailbox.state = state;
    }

    // Mailboxes

    pub fn mbox_open(&mut self, mailbox: &mut Mailbox, flags: OpenFlags) -> Result<OpenStatus> {
        debug!("opening mailbox {} with flags {:?}", mailbox.path, flags);

        if mailbox.is_open() {
            return Err(Error::MailboxAlreadyOpenError(mailbox.path.clone()));
        }
        if flags.intersects(OpenFlags::APPEND | OpenFlags::NEW_FOLDER) {
            self.mbox_open_append(mailbox, flags)?;
            return Ok(OpenStatus::Ok);
        }
        if let Some((_, id)) = self.accounts.find_mailbox_global(&mailbox.path) {
            if id != mailbox.id {
                return Err(Error::MailboxAlreadyOpenError(mailbox.path.clone()));
            }
        }
        if mailbox.kind == MailboxType::Unknown
            && !is_url(&mailbox.path)
            && !Path::new(&mailbox.path).exists()
        {
            mailbox.kind = self.config.mbox_type;
        }

        let backend = backend_of(mailbox)?;
        mailbox.flags = flags;
        mailbox.state = MailboxState::Opening;
        if let Err(err) = self.link(mailbox) {
            self.abandon(mailbox, MailboxState::Unopened);
            return Err(err);
        }

        let res = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.mbox_open(&mut ctx));

        match res {
            Ok(OpenStatus::Ok) => {
                mailbox.state = MailboxState::Open;
                if !mailbox.is_quiet() {
                    info!(
                        "opened {} mailbox {} ({} messages)",
                        mailbox.kind,
                        mailbox.path,
                        mailbox.msg_count()
                    );
                }
                Ok(OpenStatus::Ok)
            }
            Ok(OpenStatus::Abort) => {
                debug!("opening of {} declined", mailbox.path);
                self.abandon(mailbox, MailboxState::Aborted);
                Ok(OpenStatus::Abort)
            }
            Err(err) => {
                self.abandon(mailbox, MailboxState::Unopened);
                Err(err)
            }
        }
    }

    /// Opens the mailbox for appending only. A missing local mailbox
    /// gets the configured type (or the compressed type when a
    /// compression hook matches) and is created by the backend.
    pub fn mbox_open_append(&mut self, mailbox: &mut Mailbox, flags: OpenFlags) -> Result<()> {
        debug!("opening mailbox {} for append with flags {:?}", mailbox.path, flags);

        if mailbox.is_open() {
            return Err(Error::MailboxAlreadyOpenError(mailbox.path.clone()));
        }

        let mut flags = flags | OpenFlags::APPEND;
        if !is_url(&mailbox.path) && !Path::new(&mailbox.path).exists() {
            flags |= OpenFlags::APPEND_NEW;
            if mailbox.kind == MailboxType::Unknown {
                mailbox.kind = if self.config.find_compress_hook(&mailbox.path).is_some() {
                    MailboxType::Compressed
                } else {
                    self.config.mbox_type
                };
            }
        }

        let backend = backend_of(mailbox)?;
        mailbox.flags = flags;
        mailbox.state = MailboxState::Opening;
        if let Err(err) = self.link(mailbox) {
            self.abandon(mailbox, MailboxState::Unopened);
            return Err(err);
        }

        let res = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.mbox_open_append(&mut ctx, flags));

        match res {
            Ok(()) => {
                mailbox.state = MailboxState::Open;
                if !mailbox.is_quiet() {
                    info!("opened {} mailbox {} for append", mailbox.kind, mailbox.path);
                }
                Ok(())
            }
            Err(err) => {
                self.abandon(mailbox, MailboxState::Unopened);
                Err(err)
            }
        }
    }

    /// Detects the changes made to the store by other processes.
    pub fn mbox_check(&mut self, mailbox: &mut Mailbox) -> Result<CheckStatus> {
        debug!("checking mailbox {}", mailbox.path);
        ensure_open(mailbox)?;
        let backend = backend_of(mailbox)?;

        let _guard = match self.lock(backend, mailbox)? {
            Lock::Held(guard) => guard,
            Lock::Busy => return Ok(CheckStatus::Locked),
        };

        mailbox.state = MailboxState::Checking;
        let res = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.mbox_check(&mut ctx));
        mailbox.state = MailboxState::Open;

        let status = res?;
        if status == CheckStatus::Reopened && !mailbox.is_quiet() {
            info!("mailbox {} was modified externally, index rebuilt", mailbox.path);
        }
        trace!("check of {}: {:?}", mailbox.path, status);
        Ok(status)
    }

    /// Refreshes the statistics of the mailbox, open or not. A closed
    /// mailbox is linked for the duration of the call.
    pub fn mbox_check_stats(
        &mut self,
        mailbox: &mut Mailbox,
        flags: CheckStatsFlags,
    ) -> Result<CheckStatsStatus> {
        debug!("checking stats of mailbox {} with flags {:?}", mailbox.path, flags);
        let backend = backend_of(mailbox)?;

        let linked = mailbox.account.is_some();
        if !linked {
            self.link(mailbox)?;
        }

        let res = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.mbox_check_stats(&mut ctx, flags));

        if !linked {
            self.accounts.unlink(mailbox);
        }
        res
    }

    /// Writes the flag edits and deletions back to the store.
    pub fn mbox_sync(&mut self, mailbox: &mut Mailbox) -> Result<CheckStatus> {
        debug!("syncing mailbox {}", mailbox.path);
        ensure_open(mailbox)?;
        if mailbox.is_read_only() {
            return Err(Error::MailboxReadOnlyError(mailbox.path.clone()));
        }
        let backend = backend_of(mailbox)?;

        let _guard = match self.lock(backend, mailbox)? {
            Lock::Held(guard) => guard,
            Lock::Busy => {
                debug!("mailbox {} is locked, sync postponed", mailbox.path);
                return Ok(CheckStatus::Locked);
            }
        };

        mailbox.state = MailboxState::Syncing;
        let res = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.mbox_sync(&mut ctx));
        mailbox.state = MailboxState::Open;

        let status = res?;
        if !mailbox.is_quiet() {
            info!("synced mailbox {} ({} messages)", mailbox.path, mailbox.msg_count());
        }
        Ok(status)
    }

    /// Syncs the pending changes then releases the backend resources.
    /// The mailbox ends up closed whatever the outcome.
    pub fn mbox_close(&mut self, mailbox: &mut Mailbox) -> Result<CheckStatus> {
        debug!("closing mailbox {}", mailbox.path);
        ensure_open(mailbox)?;
        let backend = backend_of(mailbox)?;

        if mailbox.pending_write {
            warn!("closing mailbox {} with an uncommitted message", mailbox.path);
        }

        let dirty = !mailbox.is_read_only()
            && !mailbox.is_append_only()
            && mailbox.emails.iter().any(|email| email.changed);

        let (_guard, held, status) = match self.lock(backend, mailbox) {
            Ok(Lock::Held(guard)) => (guard, true, Ok(CheckStatus::NoChange)),
            Ok(Lock::Busy) if dirty => (None, false, Ok(CheckStatus::Locked)),
            Ok(Lock::Busy) => (None, false, Ok(CheckStatus::NoChange)),
            Err(err) => (None, false, Err(err)),
        };

        mailbox.state = MailboxState::Closing;
        let status = if held && dirty {
            context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
                .and_then(|mut ctx| backend.mbox_sync(&mut ctx))
        } else {
            status
        };

        let closed = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.mbox_close(&mut ctx));

        let quiet = mailbox.is_quiet();
        self.abandon(mailbox, MailboxState::Closed);
        if !quiet {
            info!("closed mailbox {}", mailbox.path);
        }

        let status = status?;
        closed?;
        Ok(status)
    }

    // Messages

    /// Opens the email at the given index for reading.
    pub fn msg_open(&mut self, mailbox: &mut Mailbox, index: usize) -> Result<Message> {
        debug!("opening message {} of mailbox {}", index, mailbox.path);
        ensure_open(mailbox)?;
        if index >= mailbox.msg_count() {
            return Err(Error::MessageIndexOutOfBoundsError(index, mailbox.msg_count()));
        }
        let backend = backend_of(mailbox)?;

        context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.msg_open(&mut ctx, index))
    }

    /// Opens a new message for writing. Only one such message may be
    /// pending per mailbox.
    pub fn msg_open_new(
        &mut self,
        mailbox: &mut Mailbox,
        email: Option<&Email>,
        flags: MsgOpenFlags,
    ) -> Result<Message> {
        debug!("opening new message in mailbox {} with flags {:?}", mailbox.path, flags);
        ensure_open(mailbox)?;
        if mailbox.is_read_only() {
            return Err(Error::MailboxReadOnlyError(mailbox.path.clone()));
        }
        if mailbox.pending_write {
            return Err(Error::WriteHandleBusyError(mailbox.path.clone()));
        }
        let backend = backend_of(mailbox)?;

        let default_email = Email::default();
        let email = email.unwrap_or(&default_email);
        let msg = context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.msg_open_new(&mut ctx, email, flags))?;

        mailbox.pending_write = true;
        Ok(msg)
    }

    /// Makes a message opened for writing part of the mailbox.
    pub fn msg_commit(&mut self, mailbox: &mut Mailbox, msg: &mut Message) -> Result<()> {
        debug!("committing message {:?} into mailbox {}", msg.path, mailbox.path);
        if msg.mailbox != mailbox.id {
            return Err(Error::ForeignMessageError);
        }
        if !msg.write || msg.committed_path.is_some() {
            return Err(Error::MessageNotWritableError);
        }
        ensure_open(mailbox)?;
        let backend = backend_of(mailbox)?;

        let _guard = match self.lock(backend, mailbox)? {
            Lock::Held(guard) => guard,
            Lock::Busy => {
                return Err(Error::LockMailboxError(
                    io::Error::from(io::ErrorKind::WouldBlock),
                    mailbox.path.clone(),
                ))
            }
        };

        context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.msg_commit(&mut ctx, msg))?;
        mailbox.pending_write = false;

        if let Some(index) = mailbox.msg_count().checked_sub(1) {
            if let Err(err) = self.msg_save_hcache(mailbox, index) {
                warn!("cannot save committed message into header cache: {}", err);
            }
        }
        Ok(())
    }

    /// Releases the message. An uncommitted new message is discarded.
    pub fn msg_close(&mut self, mailbox: &mut Mailbox, msg: &mut Message) -> Result<()> {
        debug!("closing message {:?}", msg.path);
        if msg.mailbox != mailbox.id {
            return Err(Error::ForeignMessageError);
        }
        if msg.write {
            mailbox.pending_write = false;
        }

        match backend_of(mailbox) {
            Ok(backend) if mailbox.account.is_some() => {
                context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
                    .and_then(|mut ctx| backend.msg_close(&mut ctx, msg))
            }
            _ => discard(msg),
        }
    }

    /// Returns the size of the separator written after each message.
    pub fn msg_padding_size(&self, mailbox: &Mailbox) -> usize {
        get_backend(mailbox.kind)
            .map(|backend| backend.msg_padding_size(mailbox))
            .unwrap_or_default()
    }

    /// Pushes the metadata of the email at the given index to the
    /// header cache, when one is configured.
    pub fn msg_save_hcache(&mut self, mailbox: &Mailbox, index: usize) -> Result<()> {
        let hcache = match self.hcache.as_mut() {
            Some(hcache) => hcache,
            None => return Ok(()),
        };
        let email = mailbox
            .email(index)
            .ok_or(Error::MessageIndexOutOfBoundsError(index, mailbox.msg_count()))?;
        hcache.save(&mailbox.path, email)?;
        Ok(())
    }

    // Tags

    pub fn tags_is_supported(&self, mailbox: &Mailbox) -> bool {
        get_backend(mailbox.kind)
            .map(|backend| backend.tags_supported())
            .unwrap_or_default()
    }

    /// Asks for new tags, starting from the existing ones, and
    /// validates them against the backend syntax.
    pub fn tags_edit(&mut self, mailbox: &Mailbox, existing: &str) -> Result<TagsEdit> {
        let backend = backend_of(mailbox)?;
        if !backend.tags_supported() {
            return Err(Error::TagsUnsupportedError(mailbox.kind));
        }

        let buf = match self.prompt.input("Add/remove labels: ", existing)? {
            Some(buf) => buf.split_whitespace().collect::<Vec<_>>().join(" "),
            None => return Ok(TagsEdit::NoInput),
        };
        if buf.is_empty() {
            return Ok(TagsEdit::NoInput);
        }

        backend.tags_validate(&buf)?;
        Ok(TagsEdit::Set(buf))
    }

    /// Persists the tags of the email at the given index. The buffer
    /// is expected to come from [`Mx::tags_edit`].
    pub fn tags_commit(&mut self, mailbox: &mut Mailbox, index: usize, buf: &str) -> Result<()> {
        debug!("committing tags {:?} of message {} in {}", buf, index, mailbox.path);
        ensure_open(mailbox)?;
        if index >= mailbox.msg_count() {
            return Err(Error::MessageIndexOutOfBoundsError(index, mailbox.msg_count()));
        }
        let backend = backend_of(mailbox)?;
        if !backend.tags_supported() {
            return Err(Error::TagsUnsupportedError(mailbox.kind));
        }

        context(&self.config, self.prompt.as_mut(), &mut self.accounts, mailbox)
            .and_then(|mut ctx| backend.tags_commit(&mut ctx, index, buf))?;

        if let Err(err) = self.msg_save_hcache(mailbox, index) {
            warn!("cannot save tags into header cache: {}", err);
        }
        Ok(())
    }
}
