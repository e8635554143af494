use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Flags accepted when opening a mailbox.
    ///
    /// They are independent switches, several can be set at once.
    pub struct OpenFlags: u8 {
        /// Do not sort the mailbox after opening it.
        const NO_SORT = 1 << 0;
        /// Open the mailbox for appending messages.
        const APPEND = 1 << 1;
        const READ_ONLY = 1 << 2;
        /// Do not log lifecycle messages.
        const QUIET = 1 << 3;
        /// Like APPEND, but truncates flat file mailboxes.
        const NEW_FOLDER = 1 << 4;
        /// Restore the access time of the mailbox after a look.
        const PEEK = 1 << 5;
        /// Set by `open_append` when the mailbox does not exist yet,
        /// directory backends then create it.
        const APPEND_NEW = 1 << 6;
    }
}

bitflags! {
    /// Flags accepted when opening a new message for writing.
    pub struct MsgOpenFlags: u8 {
        /// Write the backend separator line (mbox `From ` line) first.
        const ADD_FROM = 1 << 0;
        /// Mark the pending message as a draft.
        const SET_DRAFT = 1 << 1;
    }
}

bitflags! {
    /// Options of `check_stats`. Unknown bits are passed through to
    /// the backend untouched.
    pub struct CheckStatsFlags: u32 {
        /// Rescan even when the store looks unchanged.
        const FORCE = 1 << 0;
    }
}

/// Represents the lifecycle state of a mailbox.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum MailboxState {
    Unopened,
    Opening,
    Open,
    Checking,
    Reopening,
    Syncing,
    Closing,
    Closed,
    /// The open was declined, the mailbox behaves as if it had never
    /// been opened.
    Aborted,
}

impl Default for MailboxState {
    fn default() -> Self {
        Self::Unopened
    }
}

/// Represents the successful outcomes of opening a mailbox.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenStatus {
    Ok,
    /// An interactive prompt was declined.
    Abort,
}

/// Represents the successful outcomes of `check`, `sync` and `close`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CheckStatus {
    NoChange,
    /// The message count increased, existing messages kept their
    /// identity.
    NewMail,
    /// A required lock could not be acquired, nothing changed. The
    /// caller may retry.
    Locked,
    /// The in-memory index was stale and has been rebuilt from the
    /// store. Cached message indices must be discarded.
    Reopened,
    /// Only message flags changed.
    Flags,
}

/// Represents the successful outcomes of `check_stats`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CheckStatsStatus {
    NoChange,
    NewMail,
}

/// Represents the outcome of a tags edition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TagsEdit {
    /// Nothing usable was entered.
    NoInput,
    /// The buffer holds validated tags, ready to be committed.
    Set(String),
}

/// Represents cheap statistics about a mailbox.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MailboxStats {
    pub total: usize,
    pub unread: usize,
    pub flagged: usize,
}
