//! # Fonacom Core Library
//!
//! Command/response control layer for a serial-attached cellular modem
//! (Adafruit FONA / SIM800 class):
//! - Line-oriented AT command engine over an abstract duplex transport
//! - Status queries and settable options from a closed, typed set
//! - SMS listing, parsing, reading, deleting and sending in text mode
//! - Session lifecycle with handshake, keep-alive and fault transitions
//! - Ring supervisor: heartbeat loop plus hardware "message arrived" path
//!   with automatic replies
//!
//! ## Example
//!
//! ```rust,no_run
//! use fonacom_core::{SerialConfig, SerialTransport, Session, SessionConfig, StatusQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0", 115200));
//!     let session = Session::new(SessionConfig::default(), Box::new(transport));
//!
//!     let mut link = session.lock().await;
//!     link.connect().await?;
//!     for line in link.get(StatusQuery::SignalStrength).await? {
//!         println!("{}", line.trim_end());
//!     }
//!     for message in link.list_messages(true, true).await? {
//!         println!("{message}");
//!     }
//!     link.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::AppConfig;
pub use crate::core::command::{Command, FinalResult};
pub use crate::core::error::ModemError;
pub use crate::core::logger::{LogFormat, Logger, TranscriptLogger};
pub use crate::core::ring::{RingLine, SysfsRingLine};
pub use crate::core::session::{ModemLink, Session, SessionConfig, SessionEvent, SessionState};
pub use crate::core::simulator::SimulatedModem;
pub use crate::core::sms::TextMessage;
pub use crate::core::status::{Setting, StatusQuery};
pub use crate::core::supervisor::{
    FixedReply, ReplyPayload, RingHandle, RingOutcome, RingSupervisor, SupervisorConfig,
    SupervisorHandle, TimestampReply,
};
pub use crate::core::transport::{
    ModemTransport, SerialConfig, SerialParity, SerialTransport, TransportError, TransportStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
