use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Line framing for the raw byte stream.
pub(crate) mod codec;

/// The serial-backed pump behind a [`crate::channel::LineChannel`].
pub(crate) mod port;

/// One line of text read from a port, together with where and when it
/// arrived. Records are transient; they live for one classification or
/// relay step and are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The path of the port this line arrived on.
    pub port: String,

    /// The line itself, without the terminator.
    pub text: String,

    /// Arrival time.
    pub at: DateTime<Utc>,
}

impl Record {
    /// A record arriving now.
    pub fn new(port: &str, text: String) -> Self {
        Self {
            port: port.to_string(),
            text,
            at: Utc::now(),
        }
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.text.chars().take(48).collect::<String>();

        write!(f, "{}: {}", self.port, s.trim())
    }
}

/// How lines on the wire are terminated.
///
/// Devices differ only cosmetically here (`\n` vs `\r\n`), but the
/// terminator is configuration, not a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LineTerminator {
    /// `\n`
    #[default]
    Lf,

    /// `\r\n`
    CrLf,
}

impl LineTerminator {
    /// The bytes appended when writing a line.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineTerminator::Lf => b"\n",
            LineTerminator::CrLf => b"\r\n",
        }
    }
}

impl FromStr for LineTerminator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "\n" | "\\n" => Ok(Self::Lf),
            "\r\n" | "\\r\\n" => Ok(Self::CrLf),
            other => match other.to_lowercase().as_str() {
                "lf" => Ok(Self::Lf),
                "crlf" => Ok(Self::CrLf),
                _ => Err(format!("unknown line terminator `{other}`")),
            },
        }
    }
}

/// How to open a physical port.
#[derive(Debug, Clone)]
pub struct PortSettings {
    /// Baud rate. The workers all run at 38400.
    pub baud: u32,

    /// Line terminator used both for framing reads and ending writes.
    pub terminator: LineTerminator,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud: 38_400,
            terminator: LineTerminator::default(),
        }
    }
}

/// How long a classification stage waits for a qualifying record, and how
/// many malformed records it shrugs off before giving up on the port.
#[derive(Debug, Clone)]
pub struct StagePolicy {
    /// The time window for the whole stage.
    pub window: Duration,

    /// Malformed (non-JSON) records tolerated before abandoning.
    /// Covers e.g. joining the stream halfway through a line.
    pub max_failures: u32,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            max_failures: 5,
        }
    }
}
