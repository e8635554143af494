use std::{
    fmt, fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crate::{Flags, MailboxId};

pub(crate) enum Handle {
    Reader(Box<dyn Read>),
    Writer(fs::File),
    Closed,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Reader(_) => write!(f, "Reader"),
            Self::Writer(_) => write!(f, "Writer"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Represents an open email, exclusively owned by its opener.
///
/// A message opened for reading implements [`Read`] over the stored
/// bytes. A message opened for writing implements [`Write`] into a
/// temporary file that only becomes part of the mailbox once
/// committed.
#[derive(Debug)]
pub struct Message {
    pub(crate) mailbox: MailboxId,
    pub(crate) handle: Handle,
    /// Represents the temporary file of a message opened for writing,
    /// or the storage location of a message opened for reading.
    pub(crate) path: PathBuf,
    pub(crate) committed_path: Option<PathBuf>,
    pub(crate) write: bool,
    /// Index of the email inside its mailbox, for read handles.
    pub(crate) index: Option<usize>,
    pub flags: Flags,
    /// Represents the reception time as a unix timestamp.
    pub received: i64,
}

impl Message {
    pub(crate) fn reader<R: Read + 'static>(
        mailbox: MailboxId,
        index: usize,
        reader: R,
        path: PathBuf,
    ) -> Self {
        Self {
            mailbox,
            handle: Handle::Reader(Box::new(reader)),
            committed_path: Some(path.clone()),
            path,
            write: false,
            index: Some(index),
            flags: Flags::default(),
            received: 0,
        }
    }

    pub(crate) fn writer(mailbox: MailboxId, file: fs::File, path: PathBuf) -> Self {
        Self {
            mailbox,
            handle: Handle::Writer(file),
            path,
            committed_path: None,
            write: true,
            index: None,
            flags: Flags::default(),
            received: 0,
        }
    }

    pub fn mailbox(&self) -> MailboxId {
        self.mailbox
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the final location of the message, set once the
    /// message has been committed.
    pub fn committed_path(&self) -> Option<&Path> {
        self.committed_path.as_deref()
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn is_committed(&self) -> bool {
        self.write && self.committed_path.is_some()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Flushes and syncs the temporary file to disk.
    pub(crate) fn sync_all(&mut self) -> io::Result<()> {
        match &mut self.handle {
            Handle::Writer(file) => {
                file.flush()?;
                file.sync_all()
            }
            _ => Ok(()),
        }
    }

    /// Drops the underlying handle.
    pub(crate) fn release(&mut self) {
        self.handle = Handle::Closed;
    }
}

impl Read for Message {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.handle {
            Handle::Reader(reader) => reader.read(buf),
            Handle::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "message is open for writing",
            )),
            Handle::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "message is closed",
            )),
        }
    }
}

impl Write for Message {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.handle {
            Handle::Writer(file) => file.write(buf),
            Handle::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "message is open for reading",
            )),
            Handle::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "message is closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.handle {
            Handle::Writer(file) => file.flush(),
            _ => Ok(()),
        }
    }
}
