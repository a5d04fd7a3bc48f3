//! Core module containing the modem control layer
//!
//! This module provides:
//! - Transport layer (serial port, simulated modem)
//! - AT command engine (one command, one ordered list of response lines)
//! - Status/setting façade over a closed set of AT commands
//! - SMS subsystem (list, parse, read, delete, send)
//! - Session management with state machine and fault transitions
//! - Ring supervisor (heartbeat loop and ring-triggered auto reply)
//! - Ring line sources (GPIO edge notification)
//! - Transaction transcript logger

pub mod command;
pub mod error;
pub mod logger;
pub mod ring;
pub mod session;
pub mod simulator;
pub mod sms;
pub mod status;
pub mod supervisor;
pub mod transport;
