//! MH sequences module.
//!
//! This module contains the parser and the writer of the
//! `.mh_sequences` file, which stores the flags of the numbered
//! messages of an MH folder as ranges (`unseen: 1-3 7`).

use std::{collections::BTreeSet, fmt};

use crate::{Flag, Flags};

pub const SEQUENCES_FILE: &str = ".mh_sequences";

/// Represents the sequences of an MH folder. Drafts live in a
/// private `draft` sequence; sequences other than `unseen`,
/// `flagged`, `replied` and `draft` are kept untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Sequences {
    pub unseen: BTreeSet<u32>,
    pub flagged: BTreeSet<u32>,
    pub replied: BTreeSet<u32>,
    pub draft: BTreeSet<u32>,
    others: Vec<String>,
}

fn parse_ranges(list: &str) -> BTreeSet<u32> {
    let mut set = BTreeSet::new();
    for item in list.split_whitespace() {
        match item.split_once('-') {
            Some((from, to)) => {
                if let (Ok(from), Ok(to)) = (from.parse::<u32>(), to.parse::<u32>()) {
                    set.extend(from..=to);
                }
            }
            None => {
                if let Ok(n) = item.parse() {
                    set.insert(n);
                }
            }
        }
    }
    set
}

fn write_ranges(set: &BTreeSet<u32>) -> String {
    let mut out = Vec::new();
    let mut iter = set.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            out.push(start.to_string());
        } else {
            out.push(format!("{}-{}", start, end));
        }
    }
    out.join(" ")
}

impl Sequences {
    pub fn parse(content: &str) -> Self {
        let mut seqs = Self::default();
        for line in content.lines() {
            match line.split_once(':') {
                Some(("unseen", list)) => seqs.unseen = parse_ranges(list),
                Some(("flagged", list)) => seqs.flagged = parse_ranges(list),
                Some(("replied", list)) => seqs.replied = parse_ranges(list),
                Some(("draft", list)) => seqs.draft = parse_ranges(list),
                _ if line.trim().is_empty() => (),
                _ => seqs.others.push(line.to_owned()),
            }
        }
        seqs
    }

    pub fn flags_of(&self, n: u32) -> Flags {
        let mut flags = Flags::default();
        flags.toggle(Flag::Seen, !self.unseen.contains(&n));
        flags.toggle(Flag::Flagged, self.flagged.contains(&n));
        flags.toggle(Flag::Answered, self.replied.contains(&n));
        flags.toggle(Flag::Draft, self.draft.contains(&n));
        flags
    }

    pub fn set(&mut self, n: u32, flags: &Flags) {
        fn toggle(set: &mut BTreeSet<u32>, n: u32, on: bool) {
            if on {
                set.insert(n);
            } else {
                set.remove(&n);
            }
        }
        toggle(&mut self.unseen, n, !flags.is_seen());
        toggle(&mut self.flagged, n, flags.is_flagged());
        toggle(&mut self.replied, n, flags.contains(&Flag::Answered));
        toggle(&mut self.draft, n, flags.contains(&Flag::Draft));
    }
}

impl fmt::Display for Sequences {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, set) in [
            ("unseen", &self.unseen),
            ("flagged", &self.flagged),
            ("replied", &self.replied),
            ("draft", &self.draft),
        ] {
            if !set.is_empty() {
                writeln!(f, "{}: {}", name, write_ranges(set))?;
            }
        }
        for line in &self.others {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ranges_and_singles() {
        let seqs = Sequences::parse("unseen: 1-3 7\nflagged: 2\ncur: 7\n");
        assert_eq!(BTreeSet::from([1, 2, 3, 7]), seqs.unseen);
        assert_eq!(BTreeSet::from([2]), seqs.flagged);
        assert!(seqs.replied.is_empty());

        let flags = seqs.flags_of(2);
        assert!(!flags.is_seen());
        assert!(flags.is_flagged());
        assert!(seqs.flags_of(4).is_seen());
    }

    #[test]
    fn write_keeps_other_sequences() {
        let mut seqs = Sequences::parse("unseen: 1-3 7\ncur: 7\n");
        seqs.set(2, &Flags::from_iter([Flag::Seen, Flag::Answered]));
        assert_eq!("unseen: 1 3 7\nreplied: 2\ncur: 7\n", seqs.to_string());

        seqs.set(8, &Flags::default());
        seqs.set(2, &Flags::default());
        assert_eq!("unseen: 1-3 7-8\ncur: 7\n", seqs.to_string());
    }

    #[test]
    fn drafts_have_their_own_sequence() {
        let mut seqs = Sequences::parse("unseen: 1\n");
        seqs.set(2, &Flags::from_iter([Flag::Seen, Flag::Draft]));
        assert_eq!("unseen: 1\ndraft: 2\n", seqs.to_string());

        let seqs = Sequences::parse(&seqs.to_string());
        assert!(seqs.flags_of(2).contains(&Flag::Draft));
        assert!(!seqs.flags_of(1).contains(&Flag::Draft));
    }
}
