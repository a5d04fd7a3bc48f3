//! Serial port transport implementation

use super::{ModemTransport, TransportError, TransportStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::debug;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity '{other}'")),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., /dev/ttyUSB0, /dev/ttyACM0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
}

impl SerialConfig {
    /// Create a new serial configuration with 8N1 framing
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115200)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<BufReader<SerialStream>>,
    /// Bytes of a line that has not seen its terminator yet
    pending: Vec<u8>,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl SerialTransport {
    /// Create a new serial transport (not opened yet)
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            pending: Vec::with_capacity(256),
            stats: TransportStats::default(),
            connected_at: None,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

#[async_trait]
impl ModemTransport for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let data_bits = match self.config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| match e.kind() {
                tokio_serial::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(self.config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        debug!(port = %self.config.port, "serial port opened");
        self.port = Some(BufReader::new(stream));
        self.pending.clear();
        self.connected_at = Some(Instant::now());
        self.stats = TransportStats::default();

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.port = None;
        self.pending.clear();
        self.connected_at = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;

        let stream = port.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;

        self.stats.bytes_sent += data.len() as u64;
        self.stats.writes += 1;

        Ok(data.len())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;

        let line = read_terminated_line(port, &mut self.pending, timeout).await?;
        if let Some(line) = &line {
            self.stats.bytes_received += line.len() as u64 + 1;
            self.stats.lines_received += 1;
        }
        Ok(line)
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            match self.config.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.config.stop_bits,
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }

    async fn set_dtr(&mut self, state: bool) -> Result<(), TransportError> {
        if let Some(port) = self.port.as_mut() {
            port.get_mut()
                .write_data_terminal_ready(state)
                .map_err(|e| TransportError::IoError(e.into()))?;
        }
        Ok(())
    }
}

/// Read one `\n`-terminated line, terminator stripped.
///
/// Bytes read before `timeout` expires stay in `pending` and start the next
/// line. End of stream, even in the middle of a line, is `Disconnected`.
async fn read_terminated_line<R>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    timeout: Duration,
) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    match tokio::time::timeout(timeout, reader.read_until(b'\n', pending)).await {
        Err(_elapsed) => Ok(None),
        Ok(Ok(0)) => Err(TransportError::Disconnected),
        Ok(Ok(_)) => {
            if pending.last() != Some(&b'\n') {
                return Err(TransportError::Disconnected);
            }
            let mut line = std::mem::take(pending);
            line.pop();
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
        Ok(Err(e)) => Err(TransportError::IoError(e)),
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_from_str() {
        assert_eq!("N".parse::<SerialParity>(), Ok(SerialParity::None));
        assert_eq!("even".parse::<SerialParity>(), Ok(SerialParity::Even));
        assert_eq!("O".parse::<SerialParity>(), Ok(SerialParity::Odd));
        assert!("mark".parse::<SerialParity>().is_err());
    }

    #[test]
    fn test_connection_info() {
        let transport = SerialTransport::new(SerialConfig::new("/dev/ttyACM0", 115200));
        assert_eq!(transport.connection_info(), "/dev/ttyACM0 @ 115200 baud (8N1)");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_io_before_connect_fails() {
        let mut transport = SerialTransport::new(SerialConfig::default());
        assert!(matches!(
            transport.send(b"AT\n").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.read_line(Duration::from_millis(10)).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_partial_line_survives_timeout() {
        let (mut modem, host) = tokio::io::duplex(64);
        let mut reader = BufReader::new(host);
        let mut pending = Vec::new();
        let window = Duration::from_millis(20);

        modem.write_all(b"+CSQ: 1").await.unwrap();
        let line = read_terminated_line(&mut reader, &mut pending, window).await.unwrap();
        assert_eq!(line, None);
        assert_eq!(pending, b"+CSQ: 1");

        modem.write_all(b"5,0\r\nOK\r\n").await.unwrap();
        let line = read_terminated_line(&mut reader, &mut pending, window).await.unwrap();
        assert_eq!(line.as_deref(), Some("+CSQ: 15,0\r"));
        let line = read_terminated_line(&mut reader, &mut pending, window).await.unwrap();
        assert_eq!(line.as_deref(), Some("OK\r"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_disconnect() {
        let window = Duration::from_millis(20);

        let (mut modem, host) = tokio::io::duplex(64);
        let mut reader = BufReader::new(host);
        let mut pending = Vec::new();
        modem.write_all(b"OK").await.unwrap();
        drop(modem);
        assert!(matches!(
            read_terminated_line(&mut reader, &mut pending, window).await,
            Err(TransportError::Disconnected)
        ));

        let (modem, host) = tokio::io::duplex(64);
        let mut reader = BufReader::new(host);
        drop(modem);
        assert!(matches!(
            read_terminated_line(&mut reader, &mut Vec::new(), window).await,
            Err(TransportError::Disconnected)
        ));
    }
}
