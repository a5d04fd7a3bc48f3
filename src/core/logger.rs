//! Wire transcript
//!
//! Records every command written to the modem and every line read back,
//! in memory and optionally to a file in one of several formats.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared transcript handle, as held by a session
pub type Logger = Arc<Mutex<TranscriptLogger>>;

/// Transcript file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// `[time] TX AT+CSQ\n`
    #[default]
    Text,
    /// Bytes as hex pairs
    Hex,
    /// time, direction, hex, text
    Csv,
    /// One JSON object per entry
    JsonLines,
}

impl LogFormat {
    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "log",
            Self::Hex => "hex",
            Self::Csv => "csv",
            Self::JsonLines => "jsonl",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "hex" => Ok(Self::Hex),
            "csv" => Ok(Self::Csv),
            "jsonl" | "json_lines" | "json" => Ok(Self::JsonLines),
            other => Err(format!("unknown transcript format '{other}'")),
        }
    }
}

/// Which way the bytes went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host to modem
    Tx,
    /// Modem to host
    Rx,
    /// Annotation
    Info,
}

impl Direction {
    fn tag(&self) -> &'static str {
        match self {
            Self::Tx => "TX",
            Self::Rx => "RX",
            Self::Info => "##",
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local time of the entry
    pub timestamp: DateTime<Local>,
    /// Direction
    pub direction: Direction,
    /// Raw bytes
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Create an entry stamped now
    pub fn new(direction: Direction, data: &[u8]) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            data: data.to_vec(),
        }
    }

    fn stamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    /// Render in `format`. Control characters are escaped so one entry is one line.
    pub fn render(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Text => format!(
                "[{}] {} {}",
                self.stamp(),
                self.direction.tag(),
                String::from_utf8_lossy(&self.data).escape_debug()
            ),
            LogFormat::Hex => {
                let pairs: Vec<String> = self.data.iter().map(|b| format!("{b:02X}")).collect();
                format!("[{}] {} {}", self.stamp(), self.direction.tag(), pairs.join(" "))
            }
            LogFormat::Csv => format!(
                "\"{}\",\"{}\",\"{}\",\"{}\"",
                self.stamp(),
                self.direction.tag(),
                hex::encode_upper(&self.data),
                String::from_utf8_lossy(&self.data)
                    .escape_debug()
                    .to_string()
                    .replace('"', "\"\"")
            ),
            LogFormat::JsonLines => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

/// Transcript recorder
pub struct TranscriptLogger {
    file: Option<BufWriter<File>>,
    format: LogFormat,
    path: Option<PathBuf>,
    buffer: VecDeque<LogEntry>,
    max_buffer: usize,
    entries_written: usize,
}

impl Default for TranscriptLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptLogger {
    /// In-memory only transcript
    pub fn new() -> Self {
        Self {
            file: None,
            format: LogFormat::Text,
            path: None,
            buffer: VecDeque::new(),
            max_buffer: 1000,
            entries_written: 0,
        }
    }

    /// Wrap into the shared handle a session takes
    pub fn shared(self) -> Logger {
        Arc::new(Mutex::new(self))
    }

    /// Append to `path` in `format`
    pub fn start(&mut self, path: &Path, format: LogFormat) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if format == LogFormat::Csv && std::fs::metadata(path)?.len() == 0 {
            writeln!(writer, "Timestamp,Direction,Hex,Text")?;
        }

        self.file = Some(writer);
        self.format = format;
        self.path = Some(path.to_path_buf());
        self.entries_written = 0;
        Ok(())
    }

    /// Flush and close the file, keep the in-memory buffer
    pub fn stop(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }

    /// Whether a file is attached
    pub fn is_logging(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the attached file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one entry
    pub fn log(&mut self, direction: Direction, data: &[u8]) {
        let entry = LogEntry::new(direction, data);

        if let Some(file) = self.file.as_mut() {
            let _ = writeln!(file, "{}", entry.render(self.format));
            self.entries_written += 1;
            // Commands are sparse; keep the file current
            let _ = file.flush();
        }

        if self.buffer.len() == self.max_buffer {
            self.buffer.pop_front();
        }
        self.buffer.push_back(entry);
    }

    /// Record bytes written to the modem
    pub fn log_tx(&mut self, data: &[u8]) {
        self.log(Direction::Tx, data);
    }

    /// Record a line read from the modem
    pub fn log_rx(&mut self, data: &[u8]) {
        self.log(Direction::Rx, data);
    }

    /// Record an annotation
    pub fn log_info(&mut self, message: &str) {
        self.log(Direction::Info, message.as_bytes());
    }

    /// Recent entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.buffer.iter()
    }

    /// Number of entries written to the file since `start`
    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Cap the in-memory buffer
    pub fn set_max_buffer(&mut self, size: usize) {
        self.max_buffer = size.max(1);
        while self.buffer.len() > self.max_buffer {
            self.buffer.pop_front();
        }
    }
}

impl Drop for TranscriptLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `<prefix>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn transcript_filename(prefix: &str, format: LogFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", prefix, timestamp, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_text_escapes_line_endings() {
        let entry = LogEntry::new(Direction::Rx, b"OK\r");
        let line = entry.render(LogFormat::Text);
        assert!(line.ends_with("RX OK\\r"));
    }

    #[test]
    fn test_render_hex_and_csv() {
        let entry = LogEntry::new(Direction::Tx, b"AT\n");
        assert!(entry.render(LogFormat::Hex).ends_with("TX 41 54 0A"));
        assert!(entry.render(LogFormat::Csv).ends_with("\"TX\",\"41540A\",\"AT\\n\""));
    }

    #[test]
    fn test_buffer_limit() {
        let mut logger = TranscriptLogger::new();
        logger.set_max_buffer(5);

        for i in 0..10u8 {
            logger.log_rx(&[b'0' + i]);
        }

        let kept: Vec<u8> = logger.entries().map(|e| e.data[0]).collect();
        assert_eq!(kept, b"56789".to_vec());
    }

    #[test]
    fn test_file_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(transcript_filename("modem", LogFormat::JsonLines));

        let mut logger = TranscriptLogger::new();
        logger.start(&path, LogFormat::JsonLines).unwrap();
        logger.log_tx(b"AT\n");
        logger.log_rx(b"OK\r");
        logger.stop();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["direction"], "tx");
        assert_eq!(logger.entries_written(), 2);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("CSV".parse::<LogFormat>(), Ok(LogFormat::Csv));
        assert_eq!("jsonl".parse::<LogFormat>(), Ok(LogFormat::JsonLines));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
