//! Header cache module.
//!
//! This module contains the header cache collaborator: an opaque
//! store of email metadata keyed by mailbox path and email id. Its
//! failures are never fatal to the mailbox operation that triggered
//! them.

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::{path::Path, result};
use thiserror::Error;

use crate::{Email, Flags, Tags};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open header cache {1}")]
    OpenCacheError(#[source] rusqlite::Error, String),
    #[error("cannot save email {1} into header cache")]
    SaveEmailError(#[source] rusqlite::Error, String),
    #[error("cannot fetch email {1} from header cache")]
    FetchEmailError(#[source] rusqlite::Error, String),
}

pub type Result<T> = result::Result<T, Error>;

pub trait HeaderCache {
    fn save(&mut self, mailbox: &str, email: &Email) -> Result<()>;
}

const CREATE_EMAILS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS emails (
        key        TEXT PRIMARY KEY,
        mailbox    TEXT NOT NULL,
        id         TEXT NOT NULL,
        flags      TEXT NOT NULL,
        tags       TEXT NOT NULL,
        sender     TEXT,
        subject    TEXT,
        message_id TEXT,
        received   INTEGER NOT NULL
    )
";

const UPSERT_EMAIL: &str = "
    INSERT OR REPLACE INTO emails
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_EMAIL: &str = "
    SELECT id, flags, tags, sender, subject, message_id, received
    FROM emails
    WHERE key = ?
";

/// Header cache backed by a sqlite database.
pub struct SqliteHeaderCache {
    conn: Connection,
}

impl SqliteHeaderCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|err| Error::OpenCacheError(err, path.display().to_string()))?;
        Self::init(conn, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|err| Error::OpenCacheError(err, String::from(":memory:")))?;
        Self::init(conn, String::from(":memory:"))
    }

    fn init(conn: Connection, name: String) -> Result<Self> {
        conn.execute(CREATE_EMAILS_TABLE, [])
            .map_err(|err| Error::OpenCacheError(err, name))?;
        Ok(Self { conn })
    }

    fn key(mailbox: &str, id: &str) -> String {
        format!("{:x}", md5::compute(format!("{}\0{}", mailbox, id)))
    }

    /// Fetches the cached metadata of an email.
    pub fn fetch(&self, mailbox: &str, id: &str) -> Result<Option<Email>> {
        let key = Self::key(mailbox, id);
        self.conn
            .query_row(SELECT_EMAIL, params![key], |row| {
                let flags: String = row.get(1)?;
                let tags: String = row.get(2)?;
                Ok(Email {
                    id: row.get(0)?,
                    flags: Flags::from(flags.as_str()),
                    tags: Tags::parse(&tags, &Default::default()),
                    sender: row.get(3)?,
                    subject: row.get(4)?,
                    message_id: row.get(5)?,
                    received: row.get(6)?,
                    ..Email::default()
                })
            })
            .optional()
            .map_err(|err| Error::FetchEmailError(err, id.to_owned()))
    }
}

impl HeaderCache for SqliteHeaderCache {
    fn save(&mut self, mailbox: &str, email: &Email) -> Result<()> {
        debug!("saving email {} of {} into header cache", email.id, mailbox);
        self.conn
            .execute(
                UPSERT_EMAIL,
                params![
                    Self::key(mailbox, &email.id),
                    mailbox,
                    email.id,
                    email.flags.to_string(),
                    email.tags.get_with_hidden(),
                    email.sender,
                    email.subject,
                    email.message_id,
                    email.received,
                ],
            )
            .map_err(|err| Error::SaveEmailError(err, email.id.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Flag;

    #[test]
    fn save_then_fetch() {
        let mut cache = SqliteHeaderCache::open_in_memory().unwrap();
        let email = Email {
            id: "42".into(),
            flags: Flags::from_iter([Flag::Seen, Flag::Flagged]),
            subject: Some("Hello".into()),
            received: 1234,
            ..Email::default()
        };

        cache.save("/mail/inbox", &email).unwrap();
        let cached = cache.fetch("/mail/inbox", "42").unwrap().unwrap();
        assert_eq!(email.flags, cached.flags);
        assert_eq!(email.subject, cached.subject);
        assert_eq!(1234, cached.received);

        assert!(cache.fetch("/mail/other", "42").unwrap().is_none());
    }
}
