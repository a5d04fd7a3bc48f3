//! Transport layer for the modem link
//!
//! The core only needs a duplex byte stream with a line-based read:
//! - Serial ports (USB-Serial adapters, on-board UARTs)
//! - The in-memory simulated modem (see [`crate::core::simulator`])

mod serial;

pub use serial::{list_ports, SerialConfig, SerialParity, SerialTransport};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Write calls
    pub writes: u64,
    /// Complete lines received
    pub lines_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Duplex, line-oriented byte stream to the modem
#[async_trait]
pub trait ModemTransport: Send {
    /// Open the underlying channel
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the underlying channel
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if the channel is open
    fn is_connected(&self) -> bool;

    /// Write raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read one line.
    ///
    /// Returns the bytes up to, but not including, the `\n` terminator.
    /// A trailing `\r` is left in place. `Ok(None)` means no complete line
    /// arrived within `timeout`; partial input is kept for the next call.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;

    /// Set DTR line state (used for reset sequencing)
    async fn set_dtr(&mut self, _state: bool) -> Result<(), TransportError> {
        Ok(())
    }
}
