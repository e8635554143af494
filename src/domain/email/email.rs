use chrono::{DateTime, Local, TimeZone};
use log::trace;
use mailparse::MailHeaderMap;
use serde::Serialize;
use std::{path::PathBuf, result};
use thiserror::Error;

use crate::{Flag, Flags, Tags};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse email headers")]
    ParseHeadersError(#[source] mailparse::MailParseError),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents where the bytes of an email live inside its mailbox.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Locator {
    /// Byte range inside a flat file (mbox, mmdf, compressed).
    Offset { offset: u64, length: u64 },
    /// One file per email (maildir, MH).
    File(PathBuf),
    /// Server-side identifier (IMAP, POP, NNTP, notmuch).
    Uid(u32),
}

impl Default for Locator {
    fn default() -> Self {
        Self::Offset {
            offset: 0,
            length: 0,
        }
    }
}

/// Represents one email of a mailbox index.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Email {
    /// Represents the backend identity of the email: maildir unique
    /// name, MH number, server uid or flat file offset.
    pub id: String,
    pub locator: Locator,
    pub flags: Flags,
    pub tags: Tags,
    /// Represents the envelope sender, used for mbox `From ` lines.
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    /// Represents the reception time as a unix timestamp.
    pub received: i64,
    /// Set when flags or tags were edited in memory and still need
    /// to be written back by a sync.
    pub changed: bool,
}

impl Email {
    /// Builds an email from raw headers. Only the headers relevant to
    /// the index are kept.
    pub fn from_headers(raw: &[u8]) -> Result<Self> {
        let (headers, _) = mailparse::parse_headers(raw).map_err(Error::ParseHeadersError)?;

        let mut email = Self::default();
        email.subject = headers.get_first_value("Subject");
        email.message_id = headers.get_first_value("Message-ID");
        email.sender = headers
            .get_first_value("Return-Path")
            .or_else(|| headers.get_first_value("From"))
            .map(|addr| addr.trim_matches(|c| c == '<' || c == '>').to_owned());
        email.received = headers
            .get_first_value("Date")
            .and_then(|date| mailparse::dateparse(&date).ok())
            .unwrap_or_default();

        trace!("email from headers: {:?}", email);
        Ok(email)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.is_deleted()
    }

    /// Sets a flag in memory and marks the email as changed when the
    /// flag actually moved.
    pub fn set_flag(&mut self, flag: Flag, on: bool) {
        if self.flags.contains(&flag) != on {
            self.flags.toggle(flag, on);
            self.changed = true;
        }
    }

    pub fn received_date(&self) -> DateTime<Local> {
        Local
            .timestamp_opt(self.received, 0)
            .single()
            .unwrap_or_else(Local::now)
    }
}
