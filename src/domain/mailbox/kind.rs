use serde::Serialize;
use std::{fmt, str::FromStr};

/// Represents the closed set of mailbox backends.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum MailboxType {
    Mbox,
    Mmdf,
    Maildir,
    Mh,
    Imap,
    Pop,
    Nntp,
    Notmuch,
    Compressed,
    Unknown,
}

impl MailboxType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mbox => "mbox",
            Self::Mmdf => "mmdf",
            Self::Maildir => "maildir",
            Self::Mh => "mh",
            Self::Imap => "imap",
            Self::Pop => "pop",
            Self::Nntp => "nntp",
            Self::Notmuch => "notmuch",
            Self::Compressed => "compressed",
            Self::Unknown => "unknown",
        }
    }
}

impl Default for MailboxType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for MailboxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MailboxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mbox" => Ok(Self::Mbox),
            "mmdf" => Ok(Self::Mmdf),
            "maildir" => Ok(Self::Maildir),
            "mh" => Ok(Self::Mh),
            "imap" => Ok(Self::Imap),
            "pop" => Ok(Self::Pop),
            "nntp" => Ok(Self::Nntp),
            "notmuch" => Ok(Self::Notmuch),
            "compressed" => Ok(Self::Compressed),
            kind => Err(kind.to_owned()),
        }
    }
}
