//! Remote session module.
//!
//! This module contains the seam between the remote backends and the
//! protocol clients. A [`Connector`] opens a [`Session`] for a parsed
//! URL; the session is then shared by every mailbox of the account.

use std::{collections::HashMap, fmt};

use super::{Result, RemoteUrl};
use crate::{Email, Flags, MailboxStats, MailboxType};

/// Represents one live connection to a mail server (or to a notmuch
/// database). Mailbox names are the server-side names found in
/// [`RemoteUrl::path`].
pub trait Session {
    /// Lists the messages of a mailbox. Returned emails carry a
    /// [`crate::Locator::Uid`] locator and their uid as id.
    fn list(&mut self, mailbox: &str) -> Result<Vec<Email>>;
    fn status(&mut self, mailbox: &str) -> Result<MailboxStats>;
    fn fetch(&mut self, mailbox: &str, uid: u32) -> Result<Vec<u8>>;
    /// Appends a raw message and returns its uid.
    fn append(&mut self, mailbox: &str, raw: &[u8], flags: &Flags) -> Result<u32>;
    fn store_flags(&mut self, mailbox: &str, uid: u32, flags: &Flags) -> Result<()>;
    fn store_tags(&mut self, mailbox: &str, uid: u32, tags: &[String]) -> Result<()>;
    fn expunge(&mut self, mailbox: &str, uids: &[u32]) -> Result<()>;
    fn create(&mut self, mailbox: &str) -> Result<()>;
    fn exists(&mut self, mailbox: &str) -> Result<bool>;
    fn logout(&mut self) -> Result<()>;
}

pub trait Connector {
    fn connect(&self, url: &RemoteUrl) -> Result<Box<dyn Session>>;
}

/// Represents the connectors available to the remote backends, one
/// per remote mailbox type.
#[derive(Default)]
pub struct Connectors(HashMap<MailboxType, Box<dyn Connector>>);

impl Connectors {
    pub fn register<C: Connector + 'static>(&mut self, kind: MailboxType, connector: C) {
        self.0.insert(kind, Box::new(connector));
    }

    pub fn get(&self, kind: MailboxType) -> Option<&dyn Connector> {
        self.0.get(&kind).map(|connector| connector.as_ref())
    }
}

impl fmt::Debug for Connectors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}
