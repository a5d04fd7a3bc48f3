//! Status queries and settable options
//!
//! The modem options this crate knows about form a closed set. Each name maps
//! to exactly one AT command; anything outside the set is rejected with
//! [`ModemError::UnknownOption`] before a byte is written.

use super::command::Command;
use super::error::ModemError;
use super::session::ModemLink;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Read-only status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusQuery {
    /// Attention (`AT`), the liveness probe
    Hello,
    /// Product identification (`ATI`)
    Identify,
    /// SIM card ICCID (`AT+CCID`)
    SimNumber,
    /// Registered operator (`AT+COPS?`)
    NetworkStatus,
    /// Signal quality (`AT+CSQ`)
    SignalStrength,
    /// Battery charge state and voltage (`AT+CBC`)
    BatteryState,
    /// Real-time clock (`AT+CCLK?`)
    NetworkClock,
    /// Current configuration profile (`AT&V`)
    AllSettings,
}

impl StatusQuery {
    /// Every status query
    pub const ALL: [StatusQuery; 8] = [
        Self::Hello,
        Self::Identify,
        Self::SimNumber,
        Self::NetworkStatus,
        Self::SignalStrength,
        Self::BatteryState,
        Self::NetworkClock,
        Self::AllSettings,
    ];

    /// Symbolic name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Identify => "identify",
            Self::SimNumber => "sim_number",
            Self::NetworkStatus => "network_status",
            Self::SignalStrength => "signal_strength",
            Self::BatteryState => "battery_state",
            Self::NetworkClock => "network_clock",
            Self::AllSettings => "all_settings",
        }
    }

    /// AT command text
    pub fn command(&self) -> &'static str {
        match self {
            Self::Hello => "AT",
            Self::Identify => "ATI",
            Self::SimNumber => "AT+CCID",
            Self::NetworkStatus => "AT+COPS?",
            Self::SignalStrength => "AT+CSQ",
            Self::BatteryState => "AT+CBC",
            Self::NetworkClock => "AT+CCLK?",
            Self::AllSettings => "AT&V",
        }
    }

    /// Build the command for this query
    pub fn to_command(&self) -> Command {
        Command::new(self.command())
    }
}

impl FromStr for StatusQuery {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|q| q.name() == s)
            .ok_or_else(|| ModemError::UnknownOption(s.to_string()))
    }
}

impl fmt::Display for StatusQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options that take a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    /// SMS message format, 1 = text (`AT+CMGF`)
    TextMode,
    /// Extended error reporting level (`AT+CMEE`)
    ErrorVerbosity,
    /// Take the clock from the network (`AT+CLTS`)
    LocalTimestamp,
    /// Ring indicator behaviour for incoming SMS (`AT+CFGRI`)
    Ringer,
}

impl Setting {
    /// Every settable option
    pub const ALL: [Setting; 4] = [
        Self::TextMode,
        Self::ErrorVerbosity,
        Self::LocalTimestamp,
        Self::Ringer,
    ];

    /// Symbolic name
    pub fn name(&self) -> &'static str {
        match self {
            Self::TextMode => "text_mode",
            Self::ErrorVerbosity => "error_verbosity",
            Self::LocalTimestamp => "local_timestamp",
            Self::Ringer => "ringer",
        }
    }

    /// AT command text, without the `=`/`?` suffix
    pub fn command(&self) -> &'static str {
        match self {
            Self::TextMode => "AT+CMGF",
            Self::ErrorVerbosity => "AT+CMEE",
            Self::LocalTimestamp => "AT+CLTS",
            Self::Ringer => "AT+CFGRI",
        }
    }

    /// `<command>=<value>`
    pub fn assign(&self, value: &str) -> Command {
        Command::new(format!("{}={}", self.command(), value))
    }

    /// `<command>?`, reads the current value
    pub fn query(&self) -> Command {
        Command::new(format!("{}?", self.command()))
    }
}

impl FromStr for Setting {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|setting| setting.name() == s)
            .ok_or_else(|| ModemError::UnknownOption(s.to_string()))
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ModemLink {
    /// Issue a status query
    pub async fn get(&mut self, query: StatusQuery) -> Result<Vec<String>, ModemError> {
        self.execute(&query.to_command()).await
    }

    /// Set an option to `value`
    pub async fn set(&mut self, setting: Setting, value: &str) -> Result<Vec<String>, ModemError> {
        self.execute(&setting.assign(value)).await
    }

    /// Read the current value of an option
    pub async fn query(&mut self, setting: Setting) -> Result<Vec<String>, ModemError> {
        self.execute(&setting.query()).await
    }

    /// Look up a name and read it.
    ///
    /// Status names issue their query; settable names read the current
    /// value.
    pub async fn get_by_name(&mut self, name: &str) -> Result<Vec<String>, ModemError> {
        if let Ok(query) = name.parse::<StatusQuery>() {
            return self.get(query).await;
        }
        let setting: Setting = name.parse()?;
        self.query(setting).await
    }

    /// Look up a settable name and assign it
    pub async fn set_by_name(&mut self, name: &str, value: &str) -> Result<Vec<String>, ModemError> {
        let setting: Setting = name.parse()?;
        self.set(setting, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{Session, SessionConfig};
    use crate::core::simulator::SimulatedModem;

    #[test]
    fn test_status_command_mapping() {
        let expected = [
            ("hello", "AT"),
            ("identify", "ATI"),
            ("sim_number", "AT+CCID"),
            ("network_status", "AT+COPS?"),
            ("signal_strength", "AT+CSQ"),
            ("battery_state", "AT+CBC"),
            ("network_clock", "AT+CCLK?"),
            ("all_settings", "AT&V"),
        ];
        for (name, command) in expected {
            let query: StatusQuery = name.parse().unwrap();
            assert_eq!(query.command(), command);
            assert_eq!(query.name(), name);
        }
    }

    #[test]
    fn test_setting_command_mapping() {
        let expected = [
            ("text_mode", "AT+CMGF=1"),
            ("error_verbosity", "AT+CMEE=2"),
            ("local_timestamp", "AT+CLTS=1"),
            ("ringer", "AT+CFGRI=1"),
        ];
        for ((name, command), value) in expected.into_iter().zip(["1", "2", "1", "1"]) {
            let setting: Setting = name.parse().unwrap();
            assert_eq!(setting.assign(value).text(), command);
        }
        assert_eq!(Setting::TextMode.query().text(), "AT+CMGF?");
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert!(matches!(
            "volume".parse::<StatusQuery>(),
            Err(ModemError::UnknownOption(name)) if name == "volume"
        ));
        assert!(matches!("hello".parse::<Setting>(), Err(ModemError::UnknownOption(_))));
    }

    #[tokio::test]
    async fn test_get_and_set_write_mapped_commands() {
        let modem = SimulatedModem::new();
        let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
        let mut link = session.lock().await;
        link.connect().await.unwrap();
        modem.clear_written();

        link.get(StatusQuery::BatteryState).await.unwrap();
        link.set(Setting::ErrorVerbosity, "2").await.unwrap();
        link.get_by_name("ringer").await.unwrap();

        assert_eq!(modem.written_lines(), vec!["AT+CBC", "AT+CMEE=2", "AT+CFGRI?"]);
    }

    #[tokio::test]
    async fn test_unknown_option_does_no_io() {
        let modem = SimulatedModem::new();
        let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
        let mut link = session.lock().await;
        link.connect().await.unwrap();
        modem.clear_written();

        assert!(matches!(
            link.get_by_name("volume").await,
            Err(ModemError::UnknownOption(_))
        ));
        assert!(matches!(
            link.set_by_name("signal_strength", "1").await,
            Err(ModemError::UnknownOption(_))
        ));
        assert!(modem.written().is_empty());
    }

    #[tokio::test]
    async fn test_get_while_disconnected() {
        let modem = SimulatedModem::new();
        let session = Session::new(SessionConfig::bare(), Box::new(modem.clone()));
        let mut link = session.lock().await;

        assert!(matches!(
            link.get(StatusQuery::SignalStrength).await,
            Err(ModemError::NotConnected)
        ));
        assert!(modem.written().is_empty());
    }
}
