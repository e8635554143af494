use log::{debug, trace};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::SystemTime,
};

use crate::{AccountId, CheckStatus, Email, MailboxState, MailboxStats, MailboxType, OpenFlags};

static NEXT_MAILBOX_ID: AtomicUsize = AtomicUsize::new(1);

/// Represents the identity of a mailbox handle, used by accounts to
/// refer to their mailboxes without owning them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct MailboxId(usize);

impl MailboxId {
    fn next() -> Self {
        Self(NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Represents the state of a flat file at the time it was last read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

impl Snapshot {
    pub fn of(path: &Path) -> Option<Self> {
        let meta = path.metadata().ok()?;
        Some(Self {
            size: meta.len(),
            mtime: meta.modified().ok(),
        })
    }
}

/// Represents a resolved, possibly open, mail store.
#[derive(Debug)]
pub struct Mailbox {
    pub(crate) id: MailboxId,
    pub(crate) path: String,
    pub(crate) kind: MailboxType,
    pub(crate) state: MailboxState,
    pub(crate) flags: OpenFlags,
    pub(crate) account: Option<AccountId>,
    pub(crate) emails: Vec<Email>,
    pub(crate) stats: MailboxStats,
    pub(crate) snapshot: Option<Snapshot>,
    /// Set while a message opened for writing is neither committed
    /// nor closed.
    pub(crate) pending_write: bool,
    /// Plain copy of a compressed mailbox.
    pub(crate) plain_path: Option<PathBuf>,
    /// State of the compressed file when its plain copy was made.
    pub(crate) source: Option<Snapshot>,
}

impl Mailbox {
    pub(crate) fn new(path: String, kind: MailboxType) -> Self {
        Self {
            id: MailboxId::next(),
            path,
            kind,
            state: MailboxState::default(),
            flags: OpenFlags::empty(),
            account: None,
            emails: Vec::new(),
            stats: MailboxStats::default(),
            snapshot: None,
            pending_write: false,
            plain_path: None,
            source: None,
        }
    }

    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Returns the canonical path of the mailbox.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> MailboxType {
        self.kind
    }

    pub fn state(&self) -> MailboxState {
        self.state
    }

    pub fn account(&self) -> Option<AccountId> {
        self.account
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            MailboxState::Open
                | MailboxState::Checking
                | MailboxState::Reopening
                | MailboxState::Syncing
        )
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(OpenFlags::READ_ONLY)
    }

    pub fn is_append_only(&self) -> bool {
        self.flags
            .intersects(OpenFlags::APPEND | OpenFlags::NEW_FOLDER)
    }

    pub(crate) fn is_quiet(&self) -> bool {
        self.flags.contains(OpenFlags::QUIET)
    }

    /// Returns the number of messages of the mailbox.
    ///
    /// For an open mailbox this is the size of the in-memory index,
    /// otherwise the total computed by the last `check_stats`.
    pub fn msg_count(&self) -> usize {
        if self.is_open() {
            self.emails.len()
        } else {
            self.stats.total
        }
    }

    pub fn stats(&self) -> MailboxStats {
        self.stats
    }

    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    pub fn email(&self, index: usize) -> Option<&Email> {
        self.emails.get(index)
    }

    /// Gives access to an email for in-memory edits, written back by
    /// the next sync.
    pub fn email_mut(&mut self, index: usize) -> Option<&mut Email> {
        self.emails.get_mut(index)
    }

    /// Replaces the whole index, as done by a (re)open.
    pub(crate) fn load(&mut self, emails: Vec<Email>) {
        trace!("loading {} emails into mailbox {}", emails.len(), self.id);
        self.emails = emails;
        self.refresh_stats();
    }

    /// Appends a freshly committed email to the index.
    pub(crate) fn push(&mut self, email: Email) {
        self.emails.push(email);
        self.refresh_stats();
    }

    pub(crate) fn refresh_stats(&mut self) {
        self.stats = stats_of(&self.emails);
    }

    pub(crate) fn reset(&mut self) {
        self.emails.clear();
        self.snapshot = None;
        self.pending_write = false;
        self.flags = OpenFlags::empty();
    }

    /// Merges a fresh listing of the store into the index, matching
    /// emails by backend id.
    ///
    /// A vanished id means the index is stale: it is rebuilt from the
    /// listing and `Reopened` is returned. Otherwise new ids are
    /// appended (`NewMail`) and flag or location moves are applied
    /// (`Flags`). Local flag edits not synced yet win over the store.
    pub(crate) fn reconcile(&mut self, fresh: Vec<Email>) -> CheckStatus {
        let fresh_ids: HashSet<&str> = fresh.iter().map(|email| email.id.as_str()).collect();
        let vanished = self
            .emails
            .iter()
            .any(|email| !fresh_ids.contains(email.id.as_str()));

        if vanished {
            debug!("mailbox {}: emails vanished from the store", self.id);
            self.load(fresh);
            return CheckStatus::Reopened;
        }

        let mut positions: HashMap<String, usize> = self
            .emails
            .iter()
            .enumerate()
            .map(|(index, email)| (email.id.clone(), index))
            .collect();
        let mut flags_changed = false;
        let mut new_mail = false;

        for fresh_email in fresh {
            let email = match positions.get(&fresh_email.id).copied() {
                Some(index) => &mut self.emails[index],
                None => {
                    new_mail = true;
                    positions.insert(fresh_email.id.clone(), self.emails.len());
                    self.emails.push(fresh_email);
                    continue;
                }
            };

            if email.locator != fresh_email.locator {
                email.locator = fresh_email.locator;
            }
            if !email.changed && email.flags != fresh_email.flags {
                email.flags = fresh_email.flags;
                flags_changed = true;
            }
        }

        self.refresh_stats();

        if new_mail {
            CheckStatus::NewMail
        } else if flags_changed {
            CheckStatus::Flags
        } else {
            CheckStatus::NoChange
        }
    }
}

/// Computes the statistics of a list of emails.
pub fn stats_of(emails: &[Email]) -> MailboxStats {
    let mut stats = MailboxStats::default();
    for email in emails.iter().filter(|email| !email.is_deleted()) {
        stats.total += 1;
        if !email.flags.is_seen() {
            stats.unread += 1;
        }
        if email.flags.is_flagged() {
            stats.flagged += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Flag, Flags, Locator};

    fn email(id: &str, flags: &[Flag]) -> Email {
        Email {
            id: id.into(),
            locator: Locator::File(PathBuf::from(id)),
            flags: Flags::from_iter(flags.iter().cloned()),
            ..Email::default()
        }
    }

    fn mailbox(emails: Vec<Email>) -> Mailbox {
        let mut mailbox = Mailbox::new("/tmp/mbox".into(), MailboxType::Maildir);
        mailbox.state = MailboxState::Open;
        mailbox.load(emails);
        mailbox
    }

    #[test]
    fn reconcile_no_change() {
        let mut mailbox = mailbox(vec![email("a", &[]), email("b", &[Flag::Seen])]);
        let status = mailbox.reconcile(vec![email("b", &[Flag::Seen]), email("a", &[])]);
        assert_eq!(CheckStatus::NoChange, status);
        assert_eq!(2, mailbox.msg_count());
    }

    #[test]
    fn reconcile_flags_only() {
        let mut mailbox = mailbox(vec![email("a", &[])]);
        let status = mailbox.reconcile(vec![email("a", &[Flag::Seen])]);
        assert_eq!(CheckStatus::Flags, status);
        assert!(mailbox.email(0).unwrap().flags.is_seen());
        assert_eq!(0, mailbox.stats().unread);
    }

    #[test]
    fn reconcile_keeps_local_edits() {
        let mut mailbox = mailbox(vec![email("a", &[])]);
        mailbox.email_mut(0).unwrap().set_flag(Flag::Flagged, true);
        let status = mailbox.reconcile(vec![email("a", &[Flag::Seen])]);
        assert_eq!(CheckStatus::NoChange, status);
        assert!(mailbox.email(0).unwrap().flags.is_flagged());
    }

    #[test]
    fn reconcile_new_mail_keeps_identities() {
        let mut mailbox = mailbox(vec![email("a", &[])]);
        let status = mailbox.reconcile(vec![email("a", &[]), email("b", &[])]);
        assert_eq!(CheckStatus::NewMail, status);
        assert_eq!("a", mailbox.email(0).unwrap().id);
        assert_eq!("b", mailbox.email(1).unwrap().id);
    }

    #[test]
    fn reconcile_large_listing_in_any_order() {
        let ids: Vec<String> = (0..500).map(|n| n.to_string()).collect();
        let mut mailbox = mailbox(ids.iter().map(|id| email(id, &[])).collect());

        let mut fresh: Vec<Email> = ids
            .iter()
            .rev()
            .map(|id| match id.parse::<usize>() {
                Ok(n) if n % 2 == 0 => email(id, &[Flag::Seen]),
                _ => email(id, &[]),
            })
            .collect();
        fresh.push(email("500", &[]));

        assert_eq!(CheckStatus::NewMail, mailbox.reconcile(fresh));
        assert_eq!(501, mailbox.msg_count());
        for (n, email) in mailbox.emails().iter().enumerate() {
            assert_eq!(n.to_string(), email.id);
            assert_eq!(n % 2 == 0 && n < 500, email.flags.is_seen());
        }
    }

    #[test]
    fn reconcile_vanished_reopens() {
        let mut mailbox = mailbox(vec![email("a", &[]), email("b", &[])]);
        let status = mailbox.reconcile(vec![email("b", &[]), email("c", &[])]);
        assert_eq!(CheckStatus::Reopened, status);
        assert_eq!(2, mailbox.msg_count());
        assert_eq!("b", mailbox.email(0).unwrap().id);
    }
}
