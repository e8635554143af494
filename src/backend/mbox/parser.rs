//! Mbox parser module.
//!
//! This module contains the scanners splitting a flat file into
//! message spans, and the helpers reading and writing the status
//! headers holding the flags.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use mailparse::MailHeaderMap;

use crate::{Email, Flag, Flags, Locator};

pub const MMDF_SEP: &[u8] = b"\x01\x01\x01\x01\n";
const FROM: &[u8] = b"From ";
const FROM_DATE_FMT: &str = "%a %b %e %H:%M:%S %Y";

/// Represents the byte range of one message inside a flat file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Span {
    pub offset: u64,
    pub length: u64,
}

impl Span {
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = (self.offset as usize).min(data.len());
        let end = (start + self.length as usize).min(data.len());
        &data[start..end]
    }
}

fn line_starts(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    std::iter::once(0).chain(
        data.iter()
            .enumerate()
            .filter(|(i, b)| **b == b'\n' && i + 1 < data.len())
            .map(|(i, _)| i + 1),
    )
}

/// Splits an mbox file into messages. A message starts with a `From `
/// line located at the beginning of the file or right after a blank
/// line. Spans include the `From ` line and exclude the blank padding
/// line.
pub fn scan_mbox(data: &[u8]) -> Vec<Span> {
    let starts: Vec<usize> = line_starts(data)
        .filter(|&pos| data[pos..].starts_with(FROM))
        .filter(|&pos| pos == 0 || (pos >= 2 && &data[pos - 2..pos] == b"\n\n"))
        .collect();

    let mut spans = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let mut end = starts.get(i + 1).copied().unwrap_or(data.len());
        if end - start >= 2 && &data[end - 2..end] == b"\n\n" {
            end -= 1;
        }
        spans.push(Span {
            offset: start as u64,
            length: (end - start) as u64,
        });
    }

    spans
}

/// Splits an mmdf file into messages. Spans cover the content between
/// two separator lines, separators excluded.
pub fn scan_mmdf(data: &[u8]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for pos in line_starts(data) {
        if !data[pos..].starts_with(MMDF_SEP) {
            continue;
        }
        match start.take() {
            None => start = Some(pos + MMDF_SEP.len()),
            Some(begin) => spans.push(Span {
                offset: begin as u64,
                length: (pos - begin) as u64,
            }),
        }
    }

    spans
}

/// Builds the `From ` line of a new mbox message.
pub fn from_line(sender: Option<&str>, received: i64) -> String {
    let date: DateTime<Local> = if received > 0 {
        Local
            .timestamp_opt(received, 0)
            .single()
            .unwrap_or_else(Local::now)
    } else {
        Local::now()
    };
    let sender = sender
        .filter(|sender| !sender.trim().is_empty())
        .unwrap_or("MAILER-DAEMON");
    format!("From {} {}\n", sender.trim(), date.format(FROM_DATE_FMT))
}

/// Parses a `From ` line into its sender and its date.
pub fn parse_from_line(line: &[u8]) -> Option<(String, i64)> {
    let line = String::from_utf8_lossy(line);
    let rest = line.strip_prefix("From ")?.trim_end();
    let (sender, date) = rest.split_once(' ')?;
    let date = date.trim();
    // the date may be followed by a timezone or "remote from" suffix
    let date = date.get(..24).unwrap_or(date);
    let received = NaiveDateTime::parse_from_str(date, FROM_DATE_FMT)
        .ok()
        .and_then(|date| Local.from_local_datetime(&date).single())
        .map(|date| date.timestamp())
        .unwrap_or_default();
    Some((sender.to_owned(), received))
}

/// Splits a message into its optional `From ` line and the rest.
pub(crate) fn split_from_line(msg: &[u8]) -> (&[u8], &[u8]) {
    if msg.starts_with(FROM) {
        let end = msg
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(msg.len());
        (&msg[..end], &msg[end..])
    } else {
        (&[], msg)
    }
}

fn is_from_line(line: &[u8]) -> bool {
    let unquoted = line
        .iter()
        .position(|b| *b != b'>')
        .map(|i| &line[i..])
        .unwrap_or(&[]);
    unquoted.starts_with(FROM)
}

/// Quotes the lines that would read as a message separator, the
/// mboxrd way: `From ` and `>From ` lines get one more `>`.
pub fn escape_from_lines(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    for line in body.split_inclusive(|b| *b == b'\n') {
        if is_from_line(line) {
            out.push(b'>');
        }
        out.extend_from_slice(line);
    }
    out
}

/// Reverts [`escape_from_lines`].
pub fn unescape_from_lines(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in body.split_inclusive(|b| *b == b'\n') {
        if line.starts_with(b">") && is_from_line(line) {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

/// Reads the flags stored in `Status:` and `X-Status:` headers.
pub fn parse_flags(headers: &[mailparse::MailHeader]) -> Flags {
    let mut flags = Flags::default();

    for c in headers.get_first_value("Status").unwrap_or_default().chars() {
        match c {
            'R' => flags.toggle(Flag::Seen, true),
            'O' => flags.toggle(Flag::Old, true),
            _ => (),
        }
    }

    for c in headers.get_first_value("X-Status").unwrap_or_default().chars() {
        match c {
            'A' => flags.toggle(Flag::Answered, true),
            'F' => flags.toggle(Flag::Flagged, true),
            'T' => flags.toggle(Flag::Draft, true),
            'D' => flags.toggle(Flag::Deleted, true),
            _ => (),
        }
    }

    flags
}

/// Builds the index entry of the message at the given span.
pub fn parse_email(data: &[u8], span: Span) -> Email {
    let msg = span.slice(data);
    let (from, rest) = split_from_line(msg);

    let mut email = Email::from_headers(rest).unwrap_or_default();
    if let Ok((headers, _)) = mailparse::parse_headers(rest) {
        email.flags = parse_flags(&headers);
    }
    if let Some((sender, received)) = parse_from_line(from) {
        email.sender = Some(sender);
        if received > 0 {
            email.received = received;
        }
    }

    email.id = span.offset.to_string();
    email.locator = Locator::Offset {
        offset: span.offset,
        length: span.length,
    };
    email
}

fn status_values(flags: &Flags) -> (String, String) {
    let mut status = String::new();
    if flags.contains(&Flag::Seen) {
        status.push('R');
    }
    if flags.contains(&Flag::Old) || flags.contains(&Flag::Seen) {
        status.push('O');
    }

    let mut xstatus = String::new();
    for (flag, c) in [
        (Flag::Answered, 'A'),
        (Flag::Flagged, 'F'),
        (Flag::Draft, 'T'),
        (Flag::Deleted, 'D'),
    ] {
        if flags.contains(&flag) {
            xstatus.push(c);
        }
    }

    (status, xstatus)
}

/// Rewrites the status headers of a message so they match the given
/// flags. The `From ` line, the other headers and the body are kept
/// byte for byte.
pub fn rewrite_status(msg: &[u8], flags: &Flags) -> Vec<u8> {
    let (from, rest) = split_from_line(msg);

    let header_end = rest
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|i| i + 1)
        .unwrap_or(rest.len());
    let (headers, body) = rest.split_at(header_end);

    let mut out = Vec::with_capacity(msg.len() + 32);
    out.extend_from_slice(from);

    let mut skipping = false;
    for line in headers.split_inclusive(|b| *b == b'\n') {
        let continuation = line.starts_with(b" ") || line.starts_with(b"\t");
        if continuation && skipping {
            continue;
        }
        let lower = String::from_utf8_lossy(line).to_lowercase();
        skipping = lower.starts_with("status:") || lower.starts_with("x-status:");
        if !skipping {
            out.extend_from_slice(line);
        }
    }
    if !out.ends_with(b"\n") && out.len() > from.len() {
        out.push(b'\n');
    }

    let (status, xstatus) = status_values(flags);
    if !status.is_empty() {
        out.extend_from_slice(format!("Status: {}\n", status).as_bytes());
    }
    if !xstatus.is_empty() {
        out.extend_from_slice(format!("X-Status: {}\n", xstatus).as_bytes());
    }

    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MBOX: &[u8] = b"From alice@localhost Thu Jan  1 00:00:00 1970\nSubject: one\n\nbody\nFrom is not a separator here\n\nFrom bob@localhost Thu Jan  1 00:00:00 1970\nSubject: two\nStatus: RO\nX-Status: F\n\nsecond\n\n";

    #[test]
    fn scan_mbox_spans() {
        let spans = scan_mbox(MBOX);
        assert_eq!(2, spans.len());
        assert!(spans[0].slice(MBOX).starts_with(b"From alice"));
        assert!(spans[0].slice(MBOX).ends_with(b"here\n"));
        assert!(spans[1].slice(MBOX).starts_with(b"From bob"));
        assert!(spans[1].slice(MBOX).ends_with(b"second\n"));
        assert_eq!(MBOX.len() as u64, spans[1].offset + spans[1].length + 1);
    }

    #[test]
    fn scan_mbox_empty() {
        assert!(scan_mbox(b"").is_empty());
        assert!(scan_mbox(b"garbage\n").is_empty());
    }

    #[test]
    fn scan_mmdf_spans() {
        let data = b"\x01\x01\x01\x01\nSubject: one\n\nbody\n\x01\x01\x01\x01\n\x01\x01\x01\x01\nSubject: two\n\nbody\n\x01\x01\x01\x01\n";
        let spans = scan_mmdf(data);
        assert_eq!(2, spans.len());
        assert_eq!(b"Subject: one\n\nbody\n", spans[0].slice(data));
        assert_eq!(b"Subject: two\n\nbody\n", spans[1].slice(data));
    }

    #[test]
    fn parse_email_reads_flags() {
        let spans = scan_mbox(MBOX);
        let first = parse_email(MBOX, spans[0]);
        assert!(first.flags.is_empty());
        assert_eq!(Some("alice@localhost".into()), first.sender);
        assert_eq!(Some("one".into()), first.subject);

        let second = parse_email(MBOX, spans[1]);
        assert!(second.flags.contains(&Flag::Seen));
        assert!(second.flags.contains(&Flag::Old));
        assert!(second.flags.contains(&Flag::Flagged));
        assert_eq!(spans[1].offset.to_string(), second.id);
    }

    #[test]
    fn rewrite_status_replaces_headers() {
        let msg = b"From a Thu Jan  1 00:00:00 1970\nSubject: x\nStatus: O\nX-Status: F\n\nStatus: body line\n";
        let flags = Flags::from_iter([Flag::Seen, Flag::Answered]);
        let out = rewrite_status(msg, &flags);
        assert_eq!(
            &b"From a Thu Jan  1 00:00:00 1970\nSubject: x\nStatus: RO\nX-Status: A\n\nStatus: body line\n"[..],
            &out[..]
        );
    }

    #[test]
    fn from_lines_are_quoted() {
        let body = b"Subject: x\n\nhello\n\nFrom here on\n>From there\nFrom: not a separator\n";
        let escaped = escape_from_lines(body);
        assert_eq!(
            &b"Subject: x\n\nhello\n\n>From here on\n>>From there\n>From: not a separator\n"[..],
            &escaped[..]
        );
        assert_eq!(&body[..], &unescape_from_lines(&escaped)[..]);

        let mut data = b"From a Thu Jan  1 00:00:00 1970\n".to_vec();
        data.extend_from_slice(&escaped);
        assert_eq!(1, scan_mbox(&data).len());
    }

    #[test]
    fn from_line_roundtrip() {
        let line = from_line(Some("alice@localhost"), 86400 * 365);
        assert!(line.starts_with("From alice@localhost "));
        let (sender, received) = parse_from_line(line.as_bytes()).unwrap();
        assert_eq!("alice@localhost", sender);
        assert_eq!(86400 * 365, received);
        assert!(from_line(None, 0).starts_with("From MAILER-DAEMON "));
    }
}
