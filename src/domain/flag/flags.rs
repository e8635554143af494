use serde::Serialize;
use std::{collections::BTreeSet, fmt, ops};

use crate::Flag;

/// Represents the set of flags of an email.
///
/// The set is ordered so that two equal sets always render the same
/// way, which keeps the on-disk representations stable.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Flags(pub BTreeSet<Flag>);

impl Flags {
    pub fn clone_without_customs(&self) -> Self {
        Self::from_iter(
            self.iter()
                .filter(|f| !matches!(f, Flag::Custom(_)))
                .cloned(),
        )
    }

    pub fn is_seen(&self) -> bool {
        self.contains(&Flag::Seen)
    }

    pub fn is_deleted(&self) -> bool {
        self.contains(&Flag::Deleted)
    }

    pub fn is_flagged(&self) -> bool {
        self.contains(&Flag::Flagged)
    }

    /// Adds or removes the given flag.
    pub fn toggle(&mut self, flag: Flag, on: bool) {
        if on {
            self.insert(flag);
        } else {
            self.remove(&flag);
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut glue = "";

        for flag in &self.0 {
            write!(f, "{}{}", glue, flag)?;
            glue = " ";
        }

        Ok(())
    }
}

impl ops::Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<&str> for Flags {
    fn from(flags: &str) -> Self {
        Flags(
            flags
                .split_whitespace()
                .map(|flag| flag.trim().into())
                .collect(),
        )
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut flags = Flags::default();
        flags.extend(iter);
        flags
    }
}
