//! Wire-format framing: serializing a [`MailMessage`] into the line sequence
//! the DATA phase transmits, parsing that sequence back on receipt, and the
//! small regex-free address scanner both directions rely on.
//!
//! The address extraction intentionally avoids pulling in a regex engine: the
//! pattern (`[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+`) is simple enough to scan by
//! hand, in the same spirit as the bracket-matching `extract_email` helper
//! this module is grounded on.

use super::cipher;
use super::message::MailMessage;

pub const ENCRYPTED_MARKER: &str = "_ENCRYPTED_";
pub const NOT_ENCRYPTED_MARKER: &str = "NOT-ENCRYPTED";

/// Produces the ordered line sequence for an outgoing message (spec §4.1).
/// If `msg.encrypted` is set, every line but the marker is substituted.
pub fn serialize_outgoing(msg: &MailMessage) -> Vec<String> {
    let marker = if msg.encrypted {
        ENCRYPTED_MARKER
    } else {
        NOT_ENCRYPTED_MARKER
    };

    let mut lines = vec![marker.to_string()];
    lines.push(format!("From: {}", msg.sender));
    lines.push(format!("To: {}", msg.to.join(", ")));
    lines.push(format!("Cc: {}", msg.cc.join(", ")));
    lines.push(format!("Date: {}", msg.date));
    lines.push(format!("Subject: {}", msg.subject));
    lines.push(String::new());
    lines.extend(msg.body.split('\n').map(|s| s.to_string()));

    if msg.encrypted {
        for line in lines.iter_mut().skip(1) {
            *line = cipher::substitute(line);
        }
    }
    lines
}

/// Reconstructs a [`MailMessage`] from the raw content lines of a DATA phase,
/// `content_lines[0]` being the encryption marker. Per spec §4.1, the
/// reconstructed `body` is the join of every line *after* the marker
/// (including the header block and its blank separator) — a known quirk
/// preserved because the round-trip law only constrains the header fields,
/// not `body` itself.
pub fn parse_incoming_body(content_lines: &[String]) -> MailMessage {
    let encrypted = content_lines.first().map(|s| s.as_str()) == Some(ENCRYPTED_MARKER);

    let decrypted: Vec<String> = content_lines
        .iter()
        .skip(1)
        .map(|line| {
            if encrypted {
                cipher::reverse(line)
            } else {
                line.clone()
            }
        })
        .collect();

    let from_line = decrypted.first().map(|s| s.as_str()).unwrap_or("");
    let to_line = decrypted.get(1).map(|s| s.as_str()).unwrap_or("");
    let cc_line = decrypted.get(2).map(|s| s.as_str()).unwrap_or("");
    let date_line = decrypted.get(3).map(|s| s.as_str()).unwrap_or("");
    let subject_line = decrypted.get(4).map(|s| s.as_str()).unwrap_or("");

    MailMessage {
        encrypted,
        sender: extract_addresses(from_line).into_iter().next().unwrap_or_default(),
        to: extract_addresses(to_line),
        cc: extract_addresses(cc_line),
        date: strip_prefix_field(date_line, "Date:"),
        subject: strip_prefix_field(subject_line, "Subject:"),
        body: decrypted.join("\n"),
    }
}

fn strip_prefix_field(line: &str, prefix: &str) -> String {
    line.strip_prefix(prefix)
        .map(|rest| rest.trim().to_string())
        .unwrap_or_else(|| line.trim().to_string())
}

/// Extracts the address between the first `<` and `>` in a `MAIL FROM:<...>`
/// or `RCPT TO:<...>` command line, mirroring the bracket-matching style used
/// throughout this codebase's command parsing.
pub fn extract_bracketed_address(line: &str) -> Option<String> {
    let start = line.find('<')?;
    let end = line.find('>')?;
    if start < end {
        Some(line[start + 1..end].to_string())
    } else {
        None
    }
}

fn is_local_part_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
}

fn is_domain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Scans `line` for all non-overlapping matches of
/// `[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+`, in order, without a regex engine.
pub fn extract_addresses(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let n = chars.len();
    let mut out = Vec::new();
    let mut floor = 0usize; // local-part growth may not cross into a prior match
    let mut pos = 0usize;

    while pos < n {
        if chars[pos] == '@' {
            let mut end = pos + 1;
            while end < n && is_domain_char(chars[end]) {
                end += 1;
            }
            if end > pos + 1 {
                let mut start = pos;
                while start > floor && is_local_part_char(chars[start - 1]) {
                    start -= 1;
                }
                if start < pos {
                    out.push(chars[start..end].iter().collect());
                    floor = end;
                    pos = end;
                    continue;
                }
            }
        }
        pos += 1;
    }
    out
}
