//! The line-oriented marker protocol.
//!
//! Every marker line starts with `$$`, followed by a keyword and fields
//! separated by a single delimiter. Two dialects exist:
//!
//! ```text
//! $$CASE|<name>                      $$CASE:<name>
//! $$ASSERT_BEGIN|<file>|<line>       $$ASSERT_BEGIN:<file>:<line>
//! $$ASSERT_END|OK                    $$ASSERT_END:OK
//! $$ASSERT_END|<failure message>     $$ASSERT_END:FAILED
//! $$CASE_END|OK                      $$CASE_END:OK
//! $$CASE_END|FAULT|<fault>           $$CASE_END:FAULT:<fault>
//! ```
//!
//! The pipe dialect is canonical and is the only one that carries failure
//! messages. The colon dialect is the legacy form; it is still parsed and can
//! still be written. The parser picks the dialect per line from the first
//! delimiter after the keyword, so consumers only depend on the keywords.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{FaultKind, Outcome, Termination};

pub const MARKER_PREFIX: &str = "$$";

const CASE: &str = "CASE";
const ASSERT_BEGIN: &str = "ASSERT_BEGIN";
const ASSERT_END: &str = "ASSERT_END";
const CASE_END: &str = "CASE_END";
const OK: &str = "OK";
const FAILED: &str = "FAILED";
const FAULT: &str = "FAULT";

/// Delimiter dialect used when writing markers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Pipe,
    Colon,
}

impl WireFormat {
    pub fn delimiter(self) -> char {
        match self {
            WireFormat::Pipe => '|',
            WireFormat::Colon => ':',
        }
    }

    pub fn parse_setting(text: &str) -> Option<WireFormat> {
        match text.trim().to_ascii_lowercase().as_str() {
            "pipe" | "|" => Some(WireFormat::Pipe),
            "colon" | ":" | "legacy" => Some(WireFormat::Colon),
            _ => None,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Pipe => write!(f, "pipe"),
            WireFormat::Colon => write!(f, "colon"),
        }
    }
}

/// One decoded marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Case { name: String },
    AssertBegin { file: String, line: u32 },
    AssertEnd(Outcome),
    CaseEnd(Termination),
}

impl Marker {
    /// Encodes the marker as a single line, without the trailing newline.
    pub fn encode(&self, wire: WireFormat) -> String {
        let d = wire.delimiter();
        match self {
            Marker::Case { name } => format!("{}{}{}{}", MARKER_PREFIX, CASE, d, escape(name)),
            Marker::AssertBegin { file, line } => format!(
                "{}{}{}{}{}{}",
                MARKER_PREFIX,
                ASSERT_BEGIN,
                d,
                escape(file),
                d,
                line
            ),
            Marker::AssertEnd(Outcome::Pass) => {
                format!("{}{}{}{}", MARKER_PREFIX, ASSERT_END, d, OK)
            }
            Marker::AssertEnd(Outcome::Fail(message)) => {
                let body = match wire {
                    WireFormat::Colon => FAILED.to_string(),
                    WireFormat::Pipe => failure_body(message),
                };
                format!("{}{}{}{}", MARKER_PREFIX, ASSERT_END, d, body)
            }
            Marker::CaseEnd(Termination::Completed) => {
                format!("{}{}{}{}", MARKER_PREFIX, CASE_END, d, OK)
            }
            Marker::CaseEnd(Termination::Faulted(kind)) => format!(
                "{}{}{}{}{}{}",
                MARKER_PREFIX,
                CASE_END,
                d,
                FAULT,
                d,
                escape(&kind.to_wire())
            ),
        }
    }
}

/// Classification of one line of captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    Marker(Marker),
    /// Anything the code under test printed itself.
    Console(&'a str),
    /// Starts with `$$` but is not a marker we understand.
    Malformed(&'a str),
}

/// Classifies a single line (trailing `\r`/`\n` are ignored).
pub fn classify(raw: &str) -> Line<'_> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let Some(body) = line.strip_prefix(MARKER_PREFIX) else {
        return Line::Console(line);
    };
    match parse_marker(body) {
        Some(marker) => Line::Marker(marker),
        None => Line::Malformed(line),
    }
}

fn parse_marker(body: &str) -> Option<Marker> {
    let split = body.find(['|', ':'])?;
    let keyword = &body[..split];
    let delimiter = body[split..].chars().next()?;
    let rest = &body[split + 1..];

    match keyword {
        CASE => Some(Marker::Case {
            name: unescape(rest),
        }),
        ASSERT_BEGIN => {
            // The line number is always the last field, so file names that
            // contain the delimiter still parse.
            let (file, line) = rest.rsplit_once(delimiter)?;
            let line = line.trim().parse().ok()?;
            Some(Marker::AssertBegin {
                file: unescape(file),
                line,
            })
        }
        ASSERT_END => match rest {
            OK => Some(Marker::AssertEnd(Outcome::Pass)),
            "" | FAILED => Some(Marker::AssertEnd(Outcome::Fail(
                "assertion failed".to_string(),
            ))),
            message => Some(Marker::AssertEnd(Outcome::Fail(unescape(message)))),
        },
        CASE_END => {
            if rest == OK {
                return Some(Marker::CaseEnd(Termination::Completed));
            }
            let (status, fault) = rest.split_once(delimiter)?;
            if status != FAULT {
                return None;
            }
            let kind = FaultKind::from_wire(&unescape(fault))?;
            Some(Marker::CaseEnd(Termination::Faulted(kind)))
        }
        _ => None,
    }
}

/// A failure message must never be mistaken for the success token.
fn failure_body(message: &str) -> String {
    if message.is_empty() || message == OK || message == FAILED {
        FAILED.to_string()
    } else {
        escape(message)
    }
}

/// Keeps one record on one line.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
