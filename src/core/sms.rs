//! SMS subsystem (text mode)
//!
//! Listing grammar, one pair of lines per stored message:
//!
//! ```text
//! +CMGL: <index>,<status>,"+<sender>",<alpha>,<date>,<time>
//! <body>
//! ```
//!
//! Header fields are split on commas outside double quotes, so a quoted
//! `"yy/MM/dd,hh:mm:ss+zz"` timestamp stays one field. The date/time fields
//! (index 4 onwards) are re-joined with `", "` and otherwise kept exactly as
//! the modem reported them.

use super::command::{Command, FinalResult, CTRL_Z};
use super::error::{ModemError, MAX_MESSAGE_LEN};
use super::session::ModemLink;
use super::status::Setting;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Header prefix of a listing entry
pub const LIST_PREFIX: &str = "+CMGL:";

/// Header prefix of a single-message read
pub const READ_PREFIX: &str = "+CMGR:";

/// Senders this short are carrier service numbers, not people
pub const SERVICE_SENDER_MAX_LEN: usize = 8;

/// A parsed text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    index: u32,
    status: String,
    sender: String,
    timestamp: String,
    body: String,
}

impl TextMessage {
    /// Parse a listing header line and the body line following it
    pub fn parse(header: &str, body: &str) -> Result<Self, ModemError> {
        let fields = split_fields(header.trim());
        if fields.len() < 5 {
            return Err(ModemError::MalformedResponse(format!(
                "listing header has {} fields, expected at least 5: {}",
                fields.len(),
                header.trim()
            )));
        }

        let index = fields[0]
            .strip_prefix(LIST_PREFIX)
            .and_then(|n| n.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                ModemError::MalformedResponse(format!("bad listing index: {}", fields[0]))
            })?;

        Ok(Self {
            index,
            status: unquote(fields[1]),
            sender: normalize_sender(fields[2]),
            timestamp: fields[4..].join(", "),
            body: normalize_body(body),
        })
    }

    /// Parse the two data lines of an `AT+CMGR` read of slot `index`
    pub fn parse_read(index: u32, header: &str, body: &str) -> Result<Self, ModemError> {
        let fields = split_fields(header.trim());
        if fields.len() < 4 {
            return Err(ModemError::MalformedResponse(format!(
                "read header has {} fields, expected at least 4: {}",
                fields.len(),
                header.trim()
            )));
        }

        let status = fields[0].strip_prefix(READ_PREFIX).ok_or_else(|| {
            ModemError::MalformedResponse(format!("not a read header: {}", header.trim()))
        })?;

        Ok(Self {
            index,
            status: unquote(status),
            sender: normalize_sender(fields[1]),
            timestamp: fields[3..].join(", "),
            body: normalize_body(body),
        })
    }

    /// Modem-assigned storage slot
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Status flag as listed (`REC UNREAD`, `REC READ`, ...)
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Sender number, without `+` or quotes
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Modem-local date and time as reported
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Message text, carriage returns expanded to CR LF
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether the sender looks like a person rather than a carrier service
    pub fn is_from_human(&self) -> bool {
        self.sender.chars().count() > SERVICE_SENDER_MAX_LEN
    }
}

impl fmt::Display for TextMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message Number: {}\r\nSender: {}\r\nDate: {}\r\nMessage: {}\r\n",
            self.index, self.sender, self.timestamp, self.body
        )
    }
}

/// Split on commas that are not inside double quotes
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);
    fields
}

fn unquote(field: &str) -> String {
    field.trim().trim_matches('"').to_string()
}

fn normalize_sender(field: &str) -> String {
    field.trim().replace(['+', '"'], "")
}

fn normalize_body(line: &str) -> String {
    line.replace('\r', "\r\n")
}

/// `AT+CMGL` for unread or all messages; `leave_unread` keeps their status
pub fn list_command(include_read: bool, leave_unread: bool) -> Command {
    let selection = if include_read { "ALL" } else { "REC UNREAD" };
    Command::new(format!(
        "AT+CMGL=\"{}\",{}",
        selection,
        u8::from(leave_unread)
    ))
}

/// `AT+CMGS="<destination>"` followed by the body and Ctrl-Z
pub fn send_command(destination: &str, body: &str) -> Command {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.extend_from_slice(body.as_bytes());
    payload.push(CTRL_Z);
    Command::with_payload(format!("AT+CMGS=\"{destination}\""), payload)
}

/// Drop blank lines, the echo of `command` and the closing result code.
///
/// A closing error result fails the whole response.
fn data_lines<'a>(lines: &'a [String], command: &Command) -> Result<Vec<&'a str>, ModemError> {
    let mut echo_seen = false;
    let mut data: Vec<&str> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if !echo_seen && command.is_echo(line) {
            echo_seen = true;
            continue;
        }
        data.push(line);
    }

    match data.last().and_then(|line| FinalResult::classify(line)) {
        Some(FinalResult::Ok) => {
            data.pop();
        }
        Some(other) => {
            return Err(ModemError::CommandFailed(format!(
                "{} answered {}",
                command.text(),
                other
            )))
        }
        None => {}
    }

    Ok(data)
}

/// Parse a full `AT+CMGL` response into messages
pub fn parse_listing(lines: &[String], command: &Command) -> Result<Vec<TextMessage>, ModemError> {
    let data = data_lines(lines, command)?;
    if data.len() % 2 != 0 {
        return Err(ModemError::MalformedResponse(format!(
            "{} listing lines cannot be split into header/body pairs",
            data.len()
        )));
    }

    data.chunks_exact(2)
        .map(|pair| TextMessage::parse(pair[0], pair[1]))
        .collect()
}

impl ModemLink {
    /// List stored messages.
    ///
    /// `include_read` selects all messages instead of only unread ones;
    /// `leave_unread` asks the modem not to mark the listed ones as read.
    pub async fn list_messages(
        &mut self,
        include_read: bool,
        leave_unread: bool,
    ) -> Result<Vec<TextMessage>, ModemError> {
        self.set(Setting::TextMode, "1").await?;

        let command = list_command(include_read, leave_unread);
        let lines = self.execute(&command).await?;
        let messages = parse_listing(&lines, &command)?;
        debug!(count = messages.len(), "listed messages");
        Ok(messages)
    }

    /// Read one message by slot. `None` when the slot is empty.
    pub async fn read_message(&mut self, index: u32) -> Result<Option<TextMessage>, ModemError> {
        self.set(Setting::TextMode, "1").await?;

        let command = Command::new(format!("AT+CMGR={index}"));
        let lines = self.execute(&command).await?;
        let data = data_lines(&lines, &command)?;
        match data.as_slice() {
            [] => Ok(None),
            [header, body] => TextMessage::parse_read(index, header, body).map(Some),
            other => Err(ModemError::MalformedResponse(format!(
                "read of slot {} returned {} data lines",
                index,
                other.len()
            ))),
        }
    }

    /// Delete one message by slot
    pub async fn delete_message(&mut self, index: u32) -> Result<Vec<String>, ModemError> {
        let command = Command::new(format!("AT+CMGD={index}"));
        let lines = self.execute(&command).await?;
        match FinalResult::of(&lines) {
            Some(FinalResult::Ok) => Ok(lines),
            Some(other) => Err(ModemError::CommandFailed(format!(
                "{} answered {}",
                command.text(),
                other
            ))),
            None => Err(ModemError::MalformedResponse(format!(
                "{} response carries no result code",
                command.text()
            ))),
        }
    }

    /// Send a text message.
    ///
    /// Bodies over 140 characters are rejected without touching the
    /// transport. The raw response is returned uninterpreted.
    pub async fn send_message(
        &mut self,
        destination: &str,
        body: &str,
    ) -> Result<Vec<String>, ModemError> {
        let len = body.chars().count();
        if len > MAX_MESSAGE_LEN {
            return Err(ModemError::MessageTooLong { len });
        }

        let command = send_command(destination, body);
        let timeout = self.config().send_timeout;
        let lines = self.execute_with_timeout(&command, timeout).await?;
        info!(destination, chars = len, "message sent");
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{Session, SessionConfig};
    use crate::core::simulator::SimulatedModem;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_parse_reference_listing() {
        let header = "+CMGL: 1,\"REC UNREAD\",\"+14155550123\",,\"23/01/01,10:00:00-08\"";
        let message = TextMessage::parse(header, "Hello\r").unwrap();

        assert_eq!(message.index(), 1);
        assert_eq!(message.status(), "REC UNREAD");
        assert_eq!(message.sender(), "14155550123");
        assert_eq!(message.timestamp(), "\"23/01/01,10:00:00-08\"");
        assert_eq!(message.body(), "Hello\r\n");
    }

    #[test]
    fn test_parse_unquoted_date_and_time() {
        let header = "+CMGL: 12,\"REC READ\",\"+447700900123\",,23/01/01,10:00:00-08\r";
        let message = TextMessage::parse(header, "Line one\rLine two\r").unwrap();

        assert_eq!(message.index(), 12);
        assert_eq!(message.timestamp(), "23/01/01, 10:00:00-08");
        assert_eq!(message.body(), "Line one\r\nLine two\r\n");
    }

    #[test]
    fn test_parse_header_errors() {
        assert!(matches!(
            TextMessage::parse("+CMGL: 1,\"REC UNREAD\"", "x"),
            Err(ModemError::MalformedResponse(_))
        ));
        assert!(matches!(
            TextMessage::parse("+CMGL: one,\"REC UNREAD\",\"+1\",,\"d,t\"", "x"),
            Err(ModemError::MalformedResponse(_))
        ));
        assert!(matches!(
            TextMessage::parse("+CMGR: 1,\"REC UNREAD\",\"+1\",,\"d,t\"", "x"),
            Err(ModemError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_listing_pairs() {
        let command = list_command(true, true);
        let lines = owned(&[
            "AT+CMGL=\"ALL\",1\r",
            "+CMGL: 1,\"REC READ\",\"+14155550123\",\"\",\"23/01/01,10:00:00-08\"\r",
            "First\r",
            "+CMGL: 2,\"REC UNREAD\",\"+14155550999\",\"\",\"23/01/02,11:30:00-08\"\r",
            "Second\r",
            "+CMGL: 7,\"REC UNREAD\",\"+12345\",\"\",\"23/01/03,12:00:00-08\"\r",
            "Your balance is low\r",
            "\r",
            "OK\r",
        ]);

        let messages = parse_listing(&lines, &command).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages.iter().map(TextMessage::index).collect::<Vec<_>>(),
            vec![1, 2, 7]
        );
        assert_eq!(messages[1].sender(), "14155550999");
        assert_eq!(messages[1].body(), "Second\r\n");
        assert_eq!(messages[2].timestamp(), "\"23/01/03,12:00:00-08\"");
    }

    #[test]
    fn test_parse_listing_empty() {
        let command = list_command(false, false);
        let lines = owned(&["AT+CMGL=\"REC UNREAD\",0\r", "\r", "OK\r"]);
        assert!(parse_listing(&lines, &command).unwrap().is_empty());
    }

    #[test]
    fn test_parse_listing_odd_lines_is_malformed() {
        let command = list_command(false, true);
        let lines = owned(&[
            "AT+CMGL=\"REC UNREAD\",1\r",
            "+CMGL: 1,\"REC UNREAD\",\"+14155550123\",,\"23/01/01,10:00:00-08\"\r",
            "Hello\r",
            "+CMGL: 2,\"REC UNREAD\",\"+14155550124\",,\"23/01/01,10:05:00-08\"\r",
            "\r",
            "OK\r",
        ]);

        assert!(matches!(
            parse_listing(&lines, &command),
            Err(ModemError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_listing_error_result() {
        let command = list_command(false, true);
        let lines = owned(&["AT+CMGL=\"REC UNREAD\",1\r", "+CMS ERROR: 302\r"]);

        assert!(matches!(
            parse_listing(&lines, &command),
            Err(ModemError::CommandFailed(_))
        ));
    }

    #[test]
    fn test_list_command_flags() {
        assert_eq!(list_command(true, false).text(), "AT+CMGL=\"ALL\",0");
        assert_eq!(list_command(false, true).text(), "AT+CMGL=\"REC UNREAD\",1");
    }

    #[test]
    fn test_human_sender_filter() {
        let header = |sender: &str| format!("+CMGL: 1,\"REC UNREAD\",\"{sender}\",,\"d,t\"");

        let service = TextMessage::parse(&header("+1234567"), "x").unwrap();
        let boundary = TextMessage::parse(&header("12345678"), "x").unwrap();
        let person = TextMessage::parse(&header("+123456789"), "x").unwrap();

        assert!(!service.is_from_human());
        assert!(!boundary.is_from_human());
        assert!(person.is_from_human());
    }

    #[test]
    fn test_display_layout() {
        let header = "+CMGL: 3,\"REC READ\",\"+14155550123\",,\"23/01/01,10:00:00-08\"";
        let message = TextMessage::parse(header, "Hi\r").unwrap();
        assert_eq!(
            message.to_string(),
            "Message Number: 3\r\nSender: 14155550123\r\nDate: \"23/01/01,10:00:00-08\"\r\nMessage: Hi\r\n\r\n"
        );
    }

    #[test]
    fn test_send_command_framing() {
        let command = send_command("5551234567", "Hi there");
        assert_eq!(command.to_bytes(), b"AT+CMGS=\"5551234567\"\nHi there\x1A".to_vec());
    }

    async fn connected() -> (SimulatedModem, Session) {
        let modem = SimulatedModem::new();
        let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
        session.connect().await.unwrap();
        modem.clear_written();
        (modem, session)
    }

    #[tokio::test]
    async fn test_send_message_single_framed_write() {
        let (modem, session) = connected().await;

        let lines = session
            .lock()
            .await
            .send_message("5551234567", "On my way")
            .await
            .unwrap();

        assert_eq!(
            modem.written(),
            vec![b"AT+CMGS=\"5551234567\"\nOn my way\x1A".to_vec()]
        );
        assert_eq!(FinalResult::of(&lines), Some(FinalResult::Ok));
        assert_eq!(
            modem.sent_messages(),
            vec![("5551234567".to_string(), "On my way".to_string())]
        );
    }

    #[tokio::test]
    async fn test_send_message_too_long_writes_nothing() {
        let (modem, session) = connected().await;
        let body = "A".repeat(141);

        let result = session.lock().await.send_message("5551234567", &body).await;

        assert!(matches!(result, Err(ModemError::MessageTooLong { len: 141 })));
        assert!(modem.written().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_at_limit() {
        let (modem, session) = connected().await;
        let body = "B".repeat(140);

        session
            .lock()
            .await
            .send_message("5551234567", &body)
            .await
            .unwrap();

        assert_eq!(modem.written().len(), 1);
    }

    #[tokio::test]
    async fn test_list_messages_enables_text_mode() {
        let (modem, session) = connected().await;
        modem.deliver("+14155550123", "Hello");
        modem.deliver("+14155550124", "World");

        let messages = session.lock().await.list_messages(false, true).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender(), "14155550123");
        assert_eq!(messages[1].body(), "World\r\n");
        assert_eq!(
            modem.written_lines(),
            vec!["AT+CMGF=1", "AT+CMGL=\"REC UNREAD\",1"]
        );
    }

    #[tokio::test]
    async fn test_list_marks_read_unless_left_unread() {
        let (modem, session) = connected().await;
        modem.deliver("+14155550123", "Hello");

        let mut link = session.lock().await;
        assert_eq!(link.list_messages(false, true).await.unwrap().len(), 1);
        assert_eq!(link.list_messages(false, false).await.unwrap().len(), 1);
        assert!(link.list_messages(false, false).await.unwrap().is_empty());
        assert_eq!(link.list_messages(true, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_and_delete_message() {
        let (modem, session) = connected().await;
        let index = modem.deliver("+14155550123", "Stored");

        let mut link = session.lock().await;
        let message = link.read_message(index).await.unwrap().unwrap();
        assert_eq!(message.index(), index);
        assert_eq!(message.sender(), "14155550123");
        assert_eq!(message.body(), "Stored\r\n");

        link.delete_message(index).await.unwrap();
        assert!(link.read_message(index).await.unwrap().is_none());
        assert!(matches!(
            link.delete_message(99).await,
            Err(ModemError::CommandFailed(_))
        ));
    }
}
