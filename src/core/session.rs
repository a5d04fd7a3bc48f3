//! Session management for the modem link
//!
//! A [`Session`] owns the transport exclusively. All traffic goes through a
//! [`ModemLink`], which is the guard of the session's transport lock: holding
//! one is what entitles a caller to run transactions, so two logical threads
//! (heartbeat and ring handler) can never interleave on the wire.

use super::command::{self, Command, FinalResult, DEFAULT_READ_TIMEOUT, LINE_TERMINATOR};
use super::error::ModemError;
use super::logger::Logger;
use super::status::{Setting, StatusQuery};
use super::transport::{ModemTransport, TransportStats};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected
    Disconnected,
    /// Transport open, handshake in progress
    Connecting,
    /// Handshake done, transactions allowed
    Connected,
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// State changed
    StateChanged(SessionState),
    /// A fault took the link down
    Error(String),
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session name (for logs)
    pub name: String,
    /// Read window for general commands
    pub read_timeout: Duration,
    /// Read window for SMS sends, which the modem answers slowly
    pub send_timeout: Duration,
    /// Options applied after every successful handshake
    pub startup_settings: Vec<(Setting, String)>,
}

impl SessionConfig {
    /// Create a new session configuration
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            send_timeout: Duration::from_secs(3),
            startup_settings: vec![
                (Setting::TextMode, "1".to_string()),
                (Setting::Ringer, "1".to_string()),
                (Setting::LocalTimestamp, "1".to_string()),
            ],
        }
    }

    /// Configuration without startup settings: connect is only the handshake
    pub fn bare() -> Self {
        Self {
            startup_settings: Vec::new(),
            ..Self::new("modem")
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("modem")
    }
}

struct Shared {
    id: Uuid,
    config: SessionConfig,
    state: RwLock<SessionState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

struct Channel {
    transport: Box<dyn ModemTransport>,
    transcript: Option<Logger>,
}

/// Handle to one modem session. Cheap to clone; clones share the link.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    channel: Arc<Mutex<Channel>>,
}

impl Session {
    /// Create a disconnected session over `transport`
    pub fn new(config: SessionConfig, transport: Box<dyn ModemTransport>) -> Self {
        Self::build(config, transport, None)
    }

    /// Create a session that records every transaction to `transcript`
    pub fn with_transcript(
        config: SessionConfig,
        transport: Box<dyn ModemTransport>,
        transcript: Logger,
    ) -> Self {
        Self::build(config, transport, Some(transcript))
    }

    fn build(
        config: SessionConfig,
        transport: Box<dyn ModemTransport>,
        transcript: Option<Logger>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                config,
                state: RwLock::new(SessionState::Disconnected),
                event_tx,
            }),
            channel: Arc::new(Mutex::new(Channel {
                transport,
                transcript,
            })),
        }
    }

    /// Get session ID
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Get session name
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Get the configuration
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Wait for exclusive use of the transport
    pub async fn lock(&self) -> ModemLink {
        ModemLink {
            channel: self.channel.clone().lock_owned().await,
            shared: self.shared.clone(),
        }
    }

    /// Take the transport only if nobody else holds it
    pub fn try_lock(&self) -> Option<ModemLink> {
        let channel = self.channel.clone().try_lock_owned().ok()?;
        Some(ModemLink {
            channel,
            shared: self.shared.clone(),
        })
    }

    /// Lock and connect
    pub async fn connect(&self) -> Result<(), ModemError> {
        self.lock().await.connect().await
    }

    /// Lock and disconnect
    pub async fn disconnect(&self) -> Result<(), ModemError> {
        self.lock().await.disconnect().await
    }

    /// Lock and send a keep-alive
    pub async fn keep_alive(&self) -> Result<Vec<String>, ModemError> {
        self.lock().await.keep_alive().await
    }
}

/// Exclusive access to a session's transport.
///
/// Dropping the link releases the transport for the next caller.
pub struct ModemLink {
    channel: OwnedMutexGuard<Channel>,
    shared: Arc<Shared>,
}

impl ModemLink {
    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Get the owning session's ID
    pub fn session_id(&self) -> Uuid {
        self.shared.id
    }

    /// Get the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Get connection info string
    pub fn connection_info(&self) -> String {
        self.channel.transport.connection_info()
    }

    /// Get transport statistics
    pub fn stats(&self) -> TransportStats {
        self.channel.transport.stats()
    }

    /// Open the transport and handshake.
    ///
    /// A no-op when already connected. Startup settings are applied after
    /// the handshake; a failing setting is logged and skipped unless the
    /// link itself went down.
    pub async fn connect(&mut self) -> Result<(), ModemError> {
        if self.state() == SessionState::Connected {
            debug!(session = %self.shared.id, "connect: already connected");
            return Ok(());
        }

        self.set_state(SessionState::Connecting);

        if !self.channel.transport.is_connected() {
            if let Err(e) = self.channel.transport.connect().await {
                warn!(session = %self.shared.id, "transport open failed: {}", e);
                self.set_state(SessionState::Disconnected);
                let _ = self.shared.event_tx.send(SessionEvent::Error(e.to_string()));
                return Err(e.into());
            }
        }

        if let Err(e) = self.handshake().await {
            warn!(session = %self.shared.id, "handshake failed: {}", e);
            self.close_transport().await;
            self.set_state(SessionState::Disconnected);
            let _ = self.shared.event_tx.send(SessionEvent::Error(e.to_string()));
            return Err(e);
        }

        self.set_state(SessionState::Connected);
        info!(
            session = %self.shared.id,
            "connected: {}",
            self.channel.transport.connection_info()
        );

        let startup = self.shared.config.startup_settings.clone();
        for (setting, value) in startup {
            if let Err(e) = self.set(setting, &value).await {
                warn!(session = %self.shared.id, %setting, "startup setting failed: {}", e);
                if e.is_transport_fault() {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Close the transport and mark the session disconnected
    pub async fn disconnect(&mut self) -> Result<(), ModemError> {
        let closed = if self.channel.transport.is_connected() {
            self.channel.transport.disconnect().await
        } else {
            Ok(())
        };
        self.set_state(SessionState::Disconnected);
        closed.map_err(ModemError::from)
    }

    /// Probe the link with `AT`
    pub async fn keep_alive(&mut self) -> Result<Vec<String>, ModemError> {
        self.get(StatusQuery::Hello).await
    }

    /// Run one transaction with the general read window
    pub async fn execute(&mut self, command: &Command) -> Result<Vec<String>, ModemError> {
        let timeout = self.shared.config.read_timeout;
        self.execute_with_timeout(command, timeout).await
    }

    /// Run one transaction with an explicit read window
    pub async fn execute_with_timeout(
        &mut self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Vec<String>, ModemError> {
        if self.state() != SessionState::Connected {
            return Err(ModemError::NotConnected);
        }
        self.transact(command, timeout).await
    }

    async fn handshake(&mut self) -> Result<(), ModemError> {
        // A bare terminator first, to flush any half-typed line in the modem
        if let Some(transcript) = &self.channel.transcript {
            transcript.lock().log_tx(LINE_TERMINATOR);
        }
        self.channel.transport.send(LINE_TERMINATOR).await?;

        let timeout = self.shared.config.read_timeout;
        let lines = self.transact(&StatusQuery::Hello.to_command(), timeout).await?;
        match FinalResult::of(&lines) {
            Some(FinalResult::Ok) => Ok(()),
            Some(other) => Err(ModemError::CommandFailed(format!("handshake answered {other}"))),
            None => Err(ModemError::MalformedResponse(
                "handshake response carries no result code".to_string(),
            )),
        }
    }

    async fn transact(
        &mut self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Vec<String>, ModemError> {
        let channel = &mut *self.channel;
        if let Some(transcript) = &channel.transcript {
            transcript.lock().log_tx(&command.to_bytes());
        }

        match command::transact(channel.transport.as_mut(), command, timeout).await {
            Ok(lines) => {
                if let Some(transcript) = &channel.transcript {
                    let mut transcript = transcript.lock();
                    for line in &lines {
                        transcript.log_rx(line.as_bytes());
                    }
                }
                Ok(lines)
            }
            Err(e) => {
                if e.is_transport_fault() && self.state() == SessionState::Connected {
                    warn!(session = %self.shared.id, command = %command, "link fault: {}", e);
                    self.close_transport().await;
                    self.set_state(SessionState::Disconnected);
                    let _ = self.shared.event_tx.send(SessionEvent::Error(e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn close_transport(&mut self) {
        if let Err(e) = self.channel.transport.disconnect().await {
            debug!(session = %self.shared.id, "transport close failed: {}", e);
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.shared.state.write(), state);
        if previous != state {
            debug!(session = %self.shared.id, "state {:?} -> {:?}", previous, state);
            let _ = self.shared.event_tx.send(SessionEvent::StateChanged(state));
        }
    }
}
