//! Backend config module.
//!
//! This module contains the configuration shared by every backend:
//! the base folder used by path shorthands, the type of new local
//! mailboxes, the compression hooks and the header cache location.

use regex::Regex;
use std::{env, path::PathBuf};

use crate::{MailboxType, TagRules};

/// Represents the commands used to read and write one compressed
/// mailbox. `%f` expands to the compressed file and `%t` to its
/// plain copy.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompressHook {
    /// Regular expression matched against the mailbox path.
    pub pattern: String,
    /// Decompresses `%f` into `%t`.
    pub open_cmd: String,
    /// Compresses `%t` into `%f`.
    pub close_cmd: String,
    /// Appends the compressed `%t` to `%f`, when the format allows
    /// it.
    pub append_cmd: Option<String>,
}

impl CompressHook {
    pub fn new<P, O, C>(pattern: P, open_cmd: O, close_cmd: C) -> Self
    where
        P: ToString,
        O: ToString,
        C: ToString,
    {
        Self {
            pattern: pattern.to_string(),
            open_cmd: open_cmd.to_string(),
            close_cmd: close_cmd.to_string(),
            append_cmd: None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        Regex::new(&self.pattern)
            .map(|re| re.is_match(path))
            .unwrap_or(false)
    }

    /// Expands `%f` and `%t` placeholders of the given command.
    pub fn expand(cmd: &str, compressed: &str, plain: &str) -> String {
        cmd.replace("%f", &shell_quote(compressed))
            .replace("%t", &shell_quote(plain))
    }
}

fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Built-in hooks, tried after the user ones.
pub fn default_compress_hooks() -> Vec<CompressHook> {
    vec![
        CompressHook {
            append_cmd: Some("gzip -c %t >> %f".into()),
            ..CompressHook::new(r"\.gz$", "gzip -dc %f > %t", "gzip -c %t > %f")
        },
        CompressHook {
            append_cmd: Some("bzip2 -c %t >> %f".into()),
            ..CompressHook::new(r"\.bz2$", "bzip2 -dc %f > %t", "bzip2 -c %t > %f")
        },
        CompressHook {
            append_cmd: Some("xz -c %t >> %f".into()),
            ..CompressHook::new(r"\.xz$", "xz -dc %f > %t", "xz -c %t > %f")
        },
        CompressHook {
            append_cmd: Some("zstd -qc %t >> %f".into()),
            ..CompressHook::new(r"\.zst$", "zstd -qdc %f > %t", "zstd -qc %t > %f")
        },
    ]
}

/// Represents the configuration of the mailbox layer.
#[derive(Debug, Clone)]
pub struct MxConfig {
    /// Represents the base folder, substituted to `=` and `+`.
    pub folder: PathBuf,
    /// Represents the spool file, substituted to `!`.
    pub spool_file: Option<PathBuf>,
    /// Represents the type of the new local mailboxes.
    pub mbox_type: MailboxType,
    /// Represents the sqlite file used as header cache.
    pub hcache_path: Option<PathBuf>,
    /// Represents the directory holding lock files. Locks live next
    /// to the mailbox when unset.
    pub lock_dir: Option<PathBuf>,
    /// Represents the user compression hooks, tried in order before
    /// the built-in ones.
    pub compress_hooks: Vec<CompressHook>,
    /// Keeps deleted messages that are flagged when syncing.
    pub keep_flagged: bool,
    /// Marks unread messages as old when a flat file is synced.
    pub mark_old: bool,
    /// Represents the tags display rules.
    pub tags: TagRules,
}

impl Default for MxConfig {
    fn default() -> Self {
        Self {
            folder: dirs::home_dir()
                .unwrap_or_else(env::temp_dir)
                .join("Mail"),
            spool_file: None,
            mbox_type: MailboxType::Mbox,
            hcache_path: None,
            lock_dir: None,
            compress_hooks: Vec::new(),
            keep_flagged: false,
            mark_old: true,
            tags: TagRules::default(),
        }
    }
}

impl MxConfig {
    /// Returns the folder as a string, without trailing separator.
    pub fn folder_str(&self) -> String {
        let folder = self.folder.to_string_lossy();
        let trimmed = folder.trim_end_matches('/');
        if trimmed.is_empty() {
            String::from("/")
        } else {
            trimmed.to_owned()
        }
    }

    /// Finds the compression hook matching the given path.
    pub fn find_compress_hook(&self, path: &str) -> Option<CompressHook> {
        self.compress_hooks
            .iter()
            .cloned()
            .chain(default_compress_hooks())
            .find(|hook| hook.matches(path))
    }
}
