//! CLI Exit Codes
//!
//! Stable process exit codes so scripts can tell modem failures apart.

use crate::core::error::ModemError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Modem did not answer
    pub const TIMEOUT: u8 = 4;

    /// Session not connected
    pub const NOT_CONNECTED: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 6;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 7;

    /// Modem answered with an error result
    pub const COMMAND_FAILED: u8 = 8;

    /// Modem response could not be parsed
    pub const MALFORMED_RESPONSE: u8 = 9;

    /// SMS body over the length limit
    pub const MESSAGE_TOO_LONG: u8 = 10;

    /// Unknown status or setting name
    pub const UNKNOWN_OPTION: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 12;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for the user
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn transport_code(err: &TransportError) -> u8 {
    match err {
        TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
        TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
        TransportError::NotConnected => ExitCodes::NOT_CONNECTED,
        TransportError::ConnectionFailed(_)
        | TransportError::Disconnected
        | TransportError::IoError(_) => ExitCodes::CONNECTION_FAILED,
    }
}

impl From<&ModemError> for CliResult {
    fn from(err: &ModemError) -> Self {
        let code = match err {
            ModemError::NotConnected => ExitCodes::NOT_CONNECTED,
            ModemError::Timeout(_) => ExitCodes::TIMEOUT,
            ModemError::MessageTooLong { .. } => ExitCodes::MESSAGE_TOO_LONG,
            ModemError::MalformedResponse(_) => ExitCodes::MALFORMED_RESPONSE,
            ModemError::UnknownOption(_) => ExitCodes::UNKNOWN_OPTION,
            ModemError::CommandFailed(_) => ExitCodes::COMMAND_FAILED,
            ModemError::Transport(e) => transport_code(e),
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ModemError> for CliResult {
    fn from(err: ModemError) -> Self {
        Self::from(&err)
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Modem did not answer",
        5 => "Not connected",
        6 => "Permission denied",
        7 => "Configuration error",
        8 => "Modem reported an error",
        9 => "Malformed modem response",
        10 => "Message too long",
        11 => "Unknown status or setting",
        12 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
