use log::{debug, warn};

use crate::{
    backend::{self, get_backend, Connectors},
    Account, AccountId, Mailbox, MailboxId, MailboxType,
};

/// Represents the table of the live accounts.
///
/// Mailboxes refer to their account by [`AccountId`]; an account
/// lives as long as at least one mailbox is linked to it.
#[derive(Debug, Default)]
pub struct AccountManager {
    accounts: Vec<Account>,
    next_id: usize,
}

impl AccountManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|account| account.id == id)
    }

    /// Returns the account the mailbox is linked to.
    pub fn find_owner(&self, mailbox: &Mailbox) -> Option<&Account> {
        mailbox.account.and_then(|id| self.get(id))
    }

    /// Finds the account of the given type handling the given
    /// canonical path, as decided by the backend. Local identities
    /// depend on the base folder.
    pub fn find(&self, kind: MailboxType, path: &str, folder: &str) -> Option<&Account> {
        let backend = get_backend(kind)?;
        self.accounts
            .iter()
            .find(|account| backend.ac_owns_path(account, path, folder))
    }

    pub(crate) fn find_mut(
        &mut self,
        kind: MailboxType,
        path: &str,
        folder: &str,
    ) -> Option<&mut Account> {
        let backend = get_backend(kind)?;
        self.accounts
            .iter_mut()
            .find(|account| backend.ac_owns_path(account, path, folder))
    }

    /// Finds the mailbox of the account opened at the given canonical
    /// path.
    pub fn find_mailbox(&self, account: AccountId, path: &str) -> Option<MailboxId> {
        self.get(account)?
            .mailboxes
            .iter()
            .find(|(_, mailbox_path)| mailbox_path == path)
            .map(|(id, _)| *id)
    }

    /// Finds the mailbox opened at the given canonical path, whatever
    /// its account.
    pub fn find_mailbox_global(&self, path: &str) -> Option<(AccountId, MailboxId)> {
        self.accounts.iter().find_map(|account| {
            self.find_mailbox(account.id, path)
                .map(|mailbox| (account.id, mailbox))
        })
    }

    /// Attaches the mailbox to the account owning its path, creating
    /// the account when none does. Returns false when the backend
    /// refuses the link.
    pub fn link(
        &mut self,
        mailbox: &mut Mailbox,
        folder: &str,
        connectors: &Connectors,
    ) -> backend::Result<bool> {
        if mailbox.account.is_some() {
            return Ok(true);
        }
        let backend =
            get_backend(mailbox.kind).ok_or(backend::Error::UnknownMailboxTypeError(mailbox.kind))?;

        let owner = self
            .accounts
            .iter()
            .position(|account| backend.ac_owns_path(account, &mailbox.path, folder));

        let id = match owner {
            Some(idx) => {
                let account = &mut self.accounts[idx];
                if !backend.ac_add(account, mailbox, connectors)? {
                    return Ok(false);
                }
                account.mailboxes.push((mailbox.id, mailbox.path.clone()));
                account.id
            }
            None => {
                let identity = backend.ac_identity(&mailbox.path, folder)?;
                let mut account = Account::new(AccountId(self.next_id), mailbox.kind, identity);
                if !backend.ac_add(&mut account, mailbox, connectors)? {
                    return Ok(false);
                }
                debug!("creating account {} for {}", account.name, mailbox.path);
                self.next_id += 1;
                account.mailboxes.push((mailbox.id, mailbox.path.clone()));
                let id = account.id;
                self.accounts.push(account);
                id
            }
        };

        mailbox.account = Some(id);
        Ok(true)
    }

    /// Detaches the mailbox from its account. The account is torn
    /// down, and its session logged out, once it has no mailbox left.
    pub fn unlink(&mut self, mailbox: &mut Mailbox) {
        let id = match mailbox.account.take() {
            Some(id) => id,
            None => return,
        };
        let idx = match self.accounts.iter().position(|account| account.id == id) {
            Some(idx) => idx,
            None => return,
        };

        let account = &mut self.accounts[idx];
        account.mailboxes.retain(|(mailbox_id, _)| *mailbox_id != mailbox.id);
        if !account.mailboxes.is_empty() {
            return;
        }

        let mut account = self.accounts.remove(idx);
        debug!("removing account {}", account.name);
        if let Some(session) = account.session.as_mut() {
            if let Err(err) = session.logout() {
                warn!("cannot log out from {}: {}", account.name, err);
            }
        }
    }
}
