//! Virtual SIM800-style modem
//!
//! An in-memory [`ModemTransport`] that answers AT commands the way the
//! hardware does: echo, data lines, blank line, final result code, each line
//! carriage-return terminated. It keeps a small SMS store so listing, reading,
//! deleting and sending can be exercised without a device attached.
//!
//! Clones share the same device, so a test can hand one clone to a
//! [`Session`](super::session::Session) and inspect the traffic through
//! another.

use super::command::CTRL_Z;
use super::transport::{ModemTransport, TransportError, TransportStats};
use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Settable registers the simulator remembers, with power-on values
const REGISTERS: [(&str, &str); 4] = [
    ("AT+CMGF", "0"),
    ("AT+CMEE", "0"),
    ("AT+CFGRI", "0"),
    ("AT+CLTS", "0"),
];

/// A message held in the simulated SIM storage
#[derive(Debug, Clone)]
struct StoredMessage {
    sender: String,
    timestamp: String,
    body: String,
    read: bool,
}

impl StoredMessage {
    fn status(&self) -> &'static str {
        if self.read {
            "REC READ"
        } else {
            "REC UNREAD"
        }
    }
}

/// A scripted reply: commands starting with `prefix` get `lines` after the echo
#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    lines: Vec<String>,
}

struct DeviceState {
    open: bool,
    link_up: bool,
    silent: bool,
    connect_count: usize,
    disconnect_count: usize,
    connected_at: Option<Instant>,
    stats: TransportStats,
    written: Vec<Vec<u8>>,
    input: BytesMut,
    /// Destination of an `AT+CMGS` whose body has not been terminated yet
    composing: Option<String>,
    output: VecDeque<String>,
    registers: HashMap<&'static str, String>,
    store: BTreeMap<u32, StoredMessage>,
    next_index: u32,
    sent: Vec<(String, String)>,
    next_reference: u32,
    rules: Vec<Rule>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            open: false,
            link_up: true,
            silent: false,
            connect_count: 0,
            disconnect_count: 0,
            connected_at: None,
            stats: TransportStats::default(),
            written: Vec::new(),
            input: BytesMut::with_capacity(256),
            composing: None,
            output: VecDeque::new(),
            registers: REGISTERS
                .iter()
                .map(|(name, value)| (*name, value.to_string()))
                .collect(),
            store: BTreeMap::new(),
            next_index: 1,
            sent: Vec::new(),
            next_reference: 1,
            rules: Vec::new(),
        }
    }

    fn check_io(&self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        if !self.link_up {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }

    /// Consume complete lines (or a terminated SMS body) from the input buffer
    fn process_input(&mut self) {
        loop {
            if let Some(destination) = self.composing.clone() {
                let Some(end) = self.input.iter().position(|b| *b == CTRL_Z) else {
                    return;
                };
                let body = self.input.split_to(end + 1);
                let body = String::from_utf8_lossy(&body[..end]).into_owned();
                self.finish_send(destination, body);
                continue;
            }

            let Some(end) = self.input.iter().position(|b| *b == b'\n') else {
                return;
            };
            let raw = self.input.split_to(end + 1);
            let line = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            if line.is_empty() {
                continue;
            }

            trace!(line = %line, "simulator command");
            if let Some(destination) = line
                .strip_prefix("AT+CMGS=")
                .map(|d| d.trim_matches('"').to_string())
            {
                // Body follows on the wire; answer once Ctrl-Z arrives
                self.composing = Some(destination);
                if !self.silent {
                    self.output.push_back(format!("{line}\r"));
                }
                continue;
            }

            self.respond(&line);
        }
    }

    fn finish_send(&mut self, destination: String, body: String) {
        self.composing = None;
        if self.silent {
            return;
        }
        let reference = self.next_reference;
        self.next_reference += 1;
        self.sent.push((destination, body));
        self.queue_reply(Ok(vec![format!("+CMGS: {reference}")]));
    }

    fn respond(&mut self, line: &str) {
        if self.silent {
            return;
        }
        self.output.push_back(format!("{line}\r"));

        if let Some(rule) = self.rules.iter().find(|r| line.starts_with(&r.prefix)) {
            let scripted: Vec<String> = rule.lines.iter().map(|l| format!("{l}\r")).collect();
            self.output.extend(scripted);
            return;
        }

        let reply = self.answer(line);
        self.queue_reply(reply);
    }

    /// Queue data lines and the closing result code
    fn queue_reply(&mut self, reply: Result<Vec<String>, String>) {
        match reply {
            Ok(data) => {
                if !data.is_empty() {
                    self.output.push_back("\r".to_string());
                    self.output.extend(data.into_iter().map(|l| format!("{l}\r")));
                }
                self.output.push_back("\r".to_string());
                self.output.push_back("OK\r".to_string());
            }
            Err(result) => self.output.push_back(format!("{result}\r")),
        }
    }

    fn text_mode(&self) -> bool {
        self.registers.get("AT+CMGF").map(String::as_str) == Some("1")
    }

    fn answer(&mut self, line: &str) -> Result<Vec<String>, String> {
        let error = || "ERROR".to_string();
        match line {
            "AT" => return Ok(Vec::new()),
            "ATI" => return Ok(vec!["SIM800 R14.18".to_string()]),
            "AT+CCID" => return Ok(vec!["89014104279871234567".to_string()]),
            "AT+COPS?" => return Ok(vec!["+COPS: 0,0,\"SIMULATED\"".to_string()]),
            "AT+CSQ" => return Ok(vec!["+CSQ: 20,0".to_string()]),
            "AT+CBC" => return Ok(vec!["+CBC: 0,85,4012".to_string()]),
            "AT+CCLK?" => {
                let now = chrono::Local::now().format("%y/%m/%d,%H:%M:%S+00");
                return Ok(vec![format!("+CCLK: \"{now}\"")]);
            }
            "AT&V" => {
                let mut profile = vec!["DEFAULT PROFILE".to_string()];
                for (name, _) in REGISTERS {
                    let value = self.registers.get(name).cloned().unwrap_or_default();
                    profile.push(format!("{}: {}", &name[2..], value));
                }
                return Ok(profile);
            }
            _ => {}
        }

        for (name, _) in REGISTERS {
            let Some(rest) = line.strip_prefix(name) else {
                continue;
            };
            if rest == "?" {
                let value = self.registers.get(name).cloned().unwrap_or_default();
                return Ok(vec![format!("{}: {}", &name[2..], value)]);
            }
            if let Some(value) = rest.strip_prefix('=') {
                if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                    return Err(error());
                }
                self.registers.insert(name, value.to_string());
                return Ok(Vec::new());
            }
        }

        if let Some(args) = line.strip_prefix("AT+CMGL=") {
            if !self.text_mode() {
                return Err(error());
            }
            return self.list(args).ok_or_else(error);
        }

        if let Some(index) = line.strip_prefix("AT+CMGR=") {
            if !self.text_mode() {
                return Err(error());
            }
            let index: u32 = index.trim().parse().map_err(|_| error())?;
            let Some(message) = self.store.get_mut(&index) else {
                return Ok(Vec::new());
            };
            let header = format!(
                "+CMGR: \"{}\",\"{}\",\"\",\"{}\"",
                message.status(),
                message.sender,
                message.timestamp
            );
            message.read = true;
            return Ok(vec![header, message.body.clone()]);
        }

        if let Some(index) = line.strip_prefix("AT+CMGD=") {
            let index: u32 = index.trim().parse().map_err(|_| error())?;
            return match self.store.remove(&index) {
                Some(_) => Ok(Vec::new()),
                None => Err("+CMS ERROR: 321".to_string()),
            };
        }

        Err(error())
    }

    fn list(&mut self, args: &str) -> Option<Vec<String>> {
        let (selection, flag) = match args.split_once(',') {
            Some((selection, flag)) => (selection, flag.trim()),
            None => (args, "0"),
        };
        let leave_unread = match flag {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        let wanted = |message: &StoredMessage| match selection.trim_matches('"') {
            "ALL" => Some(true),
            "REC UNREAD" => Some(!message.read),
            "REC READ" => Some(message.read),
            _ => None,
        };

        let mut lines = Vec::new();
        for (index, message) in self.store.iter_mut() {
            if !wanted(&*message)? {
                continue;
            }
            lines.push(format!(
                "+CMGL: {},\"{}\",\"{}\",\"\",\"{}\"",
                index,
                message.status(),
                message.sender,
                message.timestamp
            ));
            lines.push(message.body.clone());
            if !leave_unread {
                message.read = true;
            }
        }
        Some(lines)
    }
}

/// Simulated modem transport
#[derive(Clone)]
pub struct SimulatedModem {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedModem {
    /// Create a powered-on modem with an empty SMS store
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new())),
        }
    }

    /// Store an unread message, returning its slot
    pub fn deliver(&self, sender: &str, body: &str) -> u32 {
        let timestamp = chrono::Local::now().format("%y/%m/%d,%H:%M:%S+00").to_string();
        self.deliver_at(sender, body, &timestamp)
    }

    /// Store an unread message with an explicit modem timestamp
    pub fn deliver_at(&self, sender: &str, body: &str, timestamp: &str) -> u32 {
        let mut state = self.state.lock();
        let index = state.next_index;
        state.next_index += 1;
        state.store.insert(
            index,
            StoredMessage {
                sender: sender.to_string(),
                timestamp: timestamp.to_string(),
                body: body.to_string(),
                read: false,
            },
        );
        index
    }

    /// Number of messages in storage
    pub fn stored_count(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Messages sent through `AT+CMGS`, as (destination, body)
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.state.lock().sent.clone()
    }

    /// Reply to commands starting with `prefix` with `lines` verbatim
    pub fn add_rule(&self, prefix: &str, lines: &[&str]) {
        self.state.lock().rules.push(Rule {
            prefix: prefix.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        });
    }

    /// Every write the host made, byte for byte
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Command line of each write, empty writes left out
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|w| {
                let end = w.iter().position(|b| *b == b'\n').unwrap_or(w.len());
                String::from_utf8_lossy(&w[..end]).into_owned()
            })
            .filter(|l| !l.is_empty())
            .collect()
    }

    /// Forget recorded writes
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Stop answering (commands are still recorded)
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Break the line: I/O fails with [`TransportError::Disconnected`]
    pub fn cut_link(&self) {
        let mut state = self.state.lock();
        state.link_up = false;
        state.output.clear();
    }

    /// Repair the line
    pub fn restore_link(&self) {
        self.state.lock().link_up = true;
    }

    /// How many times the host opened the port
    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    /// How many times the host closed the port
    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnect_count
    }

    /// Whether the host currently has the port open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Default for SimulatedModem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModemTransport for SimulatedModem {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.link_up {
            return Err(TransportError::ConnectionFailed(
                "simulated link is down".to_string(),
            ));
        }
        state.open = true;
        state.connect_count += 1;
        state.connected_at = Some(Instant::now());
        state.stats = TransportStats::default();
        state.input.clear();
        state.output.clear();
        state.composing = None;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.open = false;
        state.disconnect_count += 1;
        state.connected_at = None;
        state.output.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().open
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        state.check_io()?;

        state.written.push(data.to_vec());
        state.stats.bytes_sent += data.len() as u64;
        state.stats.writes += 1;
        state.input.extend_from_slice(data);
        state.process_input();

        Ok(data.len())
    }

    async fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, TransportError> {
        let mut state = self.state.lock();
        state.check_io()?;

        let line = state.output.pop_front();
        if let Some(line) = &line {
            state.stats.bytes_received += line.len() as u64 + 1;
            state.stats.lines_received += 1;
        }
        Ok(line)
    }

    fn connection_info(&self) -> String {
        "simulated SIM800".to_string()
    }

    fn stats(&self) -> TransportStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        if let Some(connected_at) = state.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open() -> SimulatedModem {
        let mut modem = SimulatedModem::new();
        modem.connect().await.unwrap();
        modem
    }

    async fn drain(modem: &mut SimulatedModem) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = modem.read_line(Duration::from_millis(10)).await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_at_modem() {
        let mut modem = open().await;

        modem.send(b"AT\n").await.unwrap();
        assert_eq!(drain(&mut modem).await, vec!["AT\r", "\r", "OK\r"]);

        modem.send(b"AT+FOO\n").await.unwrap();
        assert_eq!(drain(&mut modem).await, vec!["AT+FOO\r", "ERROR\r"]);
    }

    #[tokio::test]
    async fn test_bare_terminator_is_ignored() {
        let mut modem = open().await;
        modem.send(b"\n").await.unwrap();
        assert!(drain(&mut modem).await.is_empty());
        assert!(modem.written_lines().is_empty());
    }

    #[tokio::test]
    async fn test_registers() {
        let mut modem = open().await;

        modem.send(b"AT+CMGF=1\n").await.unwrap();
        drain(&mut modem).await;
        modem.send(b"AT+CMGF?\n").await.unwrap();

        let lines = drain(&mut modem).await;
        assert!(lines.contains(&"+CMGF: 1\r".to_string()));
    }

    #[tokio::test]
    async fn test_listing_requires_text_mode() {
        let mut modem = open().await;
        modem.deliver("+14155550123", "Hello");

        modem.send(b"AT+CMGL=\"ALL\",1\n").await.unwrap();
        assert_eq!(drain(&mut modem).await.last().map(String::as_str), Some("ERROR\r"));
    }

    #[tokio::test]
    async fn test_send_waits_for_ctrl_z() {
        let mut modem = open().await;

        modem.send(b"AT+CMGS=\"5551234567\"\nHel").await.unwrap();
        assert_eq!(drain(&mut modem).await, vec!["AT+CMGS=\"5551234567\"\r"]);
        assert!(modem.sent_messages().is_empty());

        modem.send(b"lo\x1A").await.unwrap();
        let lines = drain(&mut modem).await;
        assert!(lines.contains(&"+CMGS: 1\r".to_string()));
        assert_eq!(
            modem.sent_messages(),
            vec![("5551234567".to_string(), "Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cut_link() {
        let mut modem = open().await;
        modem.cut_link();
        assert!(matches!(modem.send(b"AT\n").await, Err(TransportError::Disconnected)));
        assert!(modem.connect().await.is_err());

        modem.restore_link();
        modem.connect().await.unwrap();
        assert_eq!(modem.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_rule() {
        let mut modem = open().await;
        modem.add_rule("AT+CUSD", &["+CUSD: 0,\"Balance 10\"", "OK"]);

        modem.send(b"AT+CUSD=1,\"*100#\"\n").await.unwrap();
        assert_eq!(
            drain(&mut modem).await,
            vec!["AT+CUSD=1,\"*100#\"\r", "+CUSD: 0,\"Balance 10\"\r", "OK\r"]
        );
    }
}
