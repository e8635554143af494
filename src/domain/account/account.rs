use std::fmt;

use crate::{backend::remote::Session, MailboxId, MailboxType};

/// Represents the identity of an account inside its manager.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AccountId(pub(crate) usize);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Represents a group of mailboxes sharing one backend identity.
pub struct Account {
    pub(crate) id: AccountId,
    pub(crate) kind: MailboxType,
    /// Represents the backend-defined identity: the base folder (or
    /// the canonical path of a mailbox outside it) for local
    /// mailboxes, `scheme://user@host:port` for remote ones.
    pub(crate) name: String,
    pub(crate) mailboxes: Vec<(MailboxId, String)>,
    pub(crate) session: Option<Box<dyn Session>>,
}

impl Account {
    pub(crate) fn new(id: AccountId, kind: MailboxType, name: String) -> Self {
        Self {
            id,
            kind,
            name,
            mailboxes: Vec::new(),
            session: None,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn kind(&self) -> MailboxType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterates over the linked mailboxes and their canonical paths.
    pub fn mailboxes(&self) -> impl Iterator<Item = (MailboxId, &str)> {
        self.mailboxes.iter().map(|(id, path)| (*id, path.as_str()))
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    pub fn contains(&self, mailbox: MailboxId) -> bool {
        self.mailboxes.iter().any(|(id, _)| *id == mailbox)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut (dyn Session + 'static)> {
        self.session.as_deref_mut()
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("mailboxes", &self.mailboxes)
            .field("session", &self.session.is_some())
            .finish()
    }
}
