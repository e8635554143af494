//! Maildir flags module.
//!
//! This module contains the conversion between the info suffix of a
//! maildir file name (`:2,FRS`) and flags.

use crate::{Flag, Flags};

pub const INFO_SEP: &str = ":2,";

pub fn from_char(c: char) -> Option<Flag> {
    match c {
        'r' | 'R' => Some(Flag::Answered),
        's' | 'S' => Some(Flag::Seen),
        't' | 'T' => Some(Flag::Deleted),
        'd' | 'D' => Some(Flag::Draft),
        'f' | 'F' => Some(Flag::Flagged),
        'p' | 'P' => Some(Flag::Custom(String::from("Passed"))),
        _ => None,
    }
}

pub fn to_normalized_char(flag: &Flag) -> Option<char> {
    match flag {
        Flag::Answered => Some('R'),
        Flag::Seen => Some('S'),
        Flag::Deleted => Some('T'),
        Flag::Draft => Some('D'),
        Flag::Flagged => Some('F'),
        Flag::Custom(name) if name == "Passed" => Some('P'),
        _ => None,
    }
}

/// Reads the flags of an info suffix. Messages of `cur/` that are not
/// seen are old.
pub fn from_info(info: &str, in_cur: bool) -> Flags {
    let mut flags: Flags = info.chars().filter_map(from_char).collect();
    if in_cur && !flags.is_seen() {
        flags.toggle(Flag::Old, true);
    }
    flags
}

/// Builds the info suffix of the given flags, letters in ASCII order.
pub fn to_info(flags: &Flags) -> String {
    let mut chars: Vec<char> = flags.iter().filter_map(to_normalized_char).collect();
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}

/// Splits a maildir file name into its unique part and its info.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.split_once(INFO_SEP) {
        Some((id, info)) => (id, info),
        None => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_suffix() {
        let flags = from_info("FRS", true);
        assert!(flags.contains(&Flag::Flagged));
        assert!(flags.contains(&Flag::Answered));
        assert!(flags.is_seen());
        assert!(!flags.contains(&Flag::Old));
        assert_eq!("FRS", to_info(&flags));

        assert_eq!(Flags::default(), from_info("", false));
        assert!(from_info("", true).contains(&Flag::Old));
        assert_eq!("DT", to_info(&Flags::from_iter([Flag::Deleted, Flag::Draft, Flag::Old])));
    }

    #[test]
    fn split_names() {
        assert_eq!(("123.abc.host", "S"), split_name("123.abc.host:2,S"));
        assert_eq!(("123.abc.host", ""), split_name("123.abc.host"));
    }
}
