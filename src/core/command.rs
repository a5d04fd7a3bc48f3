//! AT command engine
//!
//! One transaction is a single write of `<command>\n[payload]` followed by
//! line reads until the transport stays quiet for a full read window. The
//! lines come back exactly as received and in arrival order; the engine does
//! not interpret them. [`FinalResult`] is available to callers that want to.

use super::error::ModemError;
use super::transport::ModemTransport;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, trace};

/// Line terminator appended to every command
pub const LINE_TERMINATOR: &[u8] = b"\n";

/// Ctrl-Z, ends an SMS body
pub const CTRL_Z: u8 = 0x1A;

/// Default read window for general commands
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// An immutable textual request, optionally followed by a payload blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    payload: Option<Vec<u8>>,
}

impl Command {
    /// Create a plain command line
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: None,
        }
    }

    /// Create a command whose line is followed by a payload (SMS body etc.)
    pub fn with_payload(text: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            payload: Some(payload.into()),
        }
    }

    /// Command line without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Payload following the command line, if any
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Wire form: command line, terminator, then the payload verbatim
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = self.payload.as_ref().map_or(0, Vec::len);
        let mut bytes = Vec::with_capacity(self.text.len() + LINE_TERMINATOR.len() + payload_len);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR);
        if let Some(payload) = &self.payload {
            bytes.extend_from_slice(payload);
        }
        bytes
    }

    /// Whether `line` is the modem echoing this command back
    pub fn is_echo(&self, line: &str) -> bool {
        line.trim() == self.text.trim()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if let Some(payload) = &self.payload {
            write!(f, " (+{} byte payload)", payload.len())?;
        }
        Ok(())
    }
}

/// Final result code closing a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    /// `OK`
    Ok,
    /// `ERROR`
    Error,
    /// `+CME ERROR: <code>` (equipment error)
    CmeError(String),
    /// `+CMS ERROR: <code>` (message service error)
    CmsError(String),
}

fn extended_error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+CM([ES]) ERROR:\s*(.*)$").expect("static pattern"))
}

impl FinalResult {
    /// Classify a single response line
    pub fn classify(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            "OK" => return Some(Self::Ok),
            "ERROR" => return Some(Self::Error),
            _ => {}
        }
        let caps = extended_error_regex().captures(line)?;
        let code = caps[2].trim().to_string();
        match &caps[1] {
            "E" => Some(Self::CmeError(code)),
            _ => Some(Self::CmsError(code)),
        }
    }

    /// Last final result code found in a response, scanning backwards
    pub fn of(lines: &[String]) -> Option<Self> {
        lines.iter().rev().find_map(|line| Self::classify(line))
    }

    /// Is this a success result?
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for FinalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Error => write!(f, "ERROR"),
            Self::CmeError(code) => write!(f, "+CME ERROR: {code}"),
            Self::CmsError(code) => write!(f, "+CMS ERROR: {code}"),
        }
    }
}

/// Run one command/response transaction.
///
/// The caller owns the transport exclusively for the duration of the call.
/// A transaction that receives no line at all fails with
/// [`ModemError::Timeout`]; otherwise the collected lines are returned once
/// a read window passes with nothing new.
pub async fn transact(
    transport: &mut dyn ModemTransport,
    command: &Command,
    read_timeout: Duration,
) -> Result<Vec<String>, ModemError> {
    debug!(command = %command, "TX");
    transport.send(&command.to_bytes()).await?;

    let mut lines = Vec::new();
    while let Some(line) = transport.read_line(read_timeout).await? {
        trace!(line = %line.escape_debug(), "RX");
        lines.push(line);
    }

    if lines.is_empty() {
        let millis = u64::try_from(read_timeout.as_millis()).unwrap_or(u64::MAX);
        return Err(ModemError::Timeout(millis));
    }

    debug!(command = %command, lines = lines.len(), "transaction complete");
    Ok(lines)
}
