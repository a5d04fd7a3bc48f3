//! Ring supervisor
//!
//! Two paths share one [`Session`]:
//!
//! - the heartbeat task keeps the link up, waiting its turn for the
//!   transport and probing with `AT` every interval;
//! - the ring path runs when the modem's ring indicator falls. It never
//!   waits: if the transport is free it takes it and hands the fetch/reply
//!   work to the runtime, otherwise the ring is dropped and whatever arrived
//!   is picked up by the next ring.

use super::error::ModemError;
use super::session::{ModemLink, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Produces the text of an automatic reply
#[cfg_attr(test, mockall::automock)]
pub trait ReplyPayload: Send + Sync {
    /// Text to send back to a sender
    fn reply(&self) -> String;
}

/// Always the same text
#[derive(Debug, Clone)]
pub struct FixedReply(pub String);

impl ReplyPayload for FixedReply {
    fn reply(&self) -> String {
        self.0.clone()
    }
}

/// Current local time, ISO-8601 with microseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampReply;

impl ReplyPayload for TimestampReply {
    fn reply(&self) -> String {
        chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string()
    }
}

impl<F> ReplyPayload for F
where
    F: Fn() -> String + Send + Sync,
{
    fn reply(&self) -> String {
        self()
    }
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pause between heartbeats
    pub interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// What a ring did
#[derive(Debug)]
pub enum RingOutcome {
    /// Transport was free; the fetch/reply task is running.
    /// It resolves to the number of replies sent.
    Dispatched(JoinHandle<Result<usize, ModemError>>),
    /// Transport was busy; nothing was done
    Deferred,
}

/// Callback target for the ring indicator. Cheap to clone.
#[derive(Clone)]
pub struct RingHandle {
    session: Session,
    payload: Arc<dyn ReplyPayload>,
    runtime: Handle,
}

impl RingHandle {
    /// Handle a falling edge on the ring line.
    ///
    /// Returns immediately; safe to call from a non-runtime thread.
    pub fn ring(&self) -> RingOutcome {
        let Some(link) = self.session.try_lock() else {
            debug!(session = %self.session.id(), "ring deferred: transport busy");
            return RingOutcome::Deferred;
        };

        debug!(session = %self.session.id(), "ring: fetching new messages");
        let payload = self.payload.clone();
        RingOutcome::Dispatched(self.runtime.spawn(answer_ring(link, payload)))
    }
}

/// Fetch unread messages and reply to every human sender.
///
/// Messages stay unread on the modem. A failed reply is logged and skipped
/// unless the link itself went down.
async fn answer_ring(
    mut link: ModemLink,
    payload: Arc<dyn ReplyPayload>,
) -> Result<usize, ModemError> {
    let messages = match link.list_messages(false, true).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!("ring: listing failed: {}", e);
            return Err(e);
        }
    };

    let mut replied = 0;
    for message in messages.iter().filter(|m| m.is_from_human()) {
        let text = payload.reply();
        match link.send_message(message.sender(), &text).await {
            Ok(_) => {
                info!(index = message.index(), sender = message.sender(), "auto reply sent");
                replied += 1;
            }
            Err(e) if e.is_transport_fault() => {
                warn!(sender = message.sender(), "auto reply failed, link down: {}", e);
                return Err(e);
            }
            Err(e) => warn!(sender = message.sender(), "auto reply failed: {}", e),
        }
    }
    Ok(replied)
}

/// Heartbeat loop plus ring handling over one session
pub struct RingSupervisor {
    session: Session,
    config: SupervisorConfig,
    payload: Arc<dyn ReplyPayload>,
}

impl RingSupervisor {
    /// Create a supervisor replying with `payload`
    pub fn new(
        session: Session,
        config: SupervisorConfig,
        payload: impl ReplyPayload + 'static,
    ) -> Self {
        Self::with_shared_payload(session, config, Arc::new(payload))
    }

    /// Create a supervisor around an already shared payload
    pub fn with_shared_payload(
        session: Session,
        config: SupervisorConfig,
        payload: Arc<dyn ReplyPayload>,
    ) -> Self {
        Self {
            session,
            config,
            payload,
        }
    }

    /// Get the session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Spawn the heartbeat task on the current runtime
    pub fn start(self) -> SupervisorHandle {
        let cancel = CancellationToken::new();
        let ring = RingHandle {
            session: self.session.clone(),
            payload: self.payload.clone(),
            runtime: Handle::current(),
        };
        let task = tokio::spawn(self.run(cancel.clone()));
        SupervisorHandle { cancel, task, ring }
    }

    /// Run the heartbeat loop until `cancel` fires, then disconnect once
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            session = %self.session.id(),
            interval_ms = self.config.interval.as_millis() as u64,
            "supervisor started"
        );

        while !cancel.is_cancelled() {
            self.heartbeat().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        if let Err(e) = self.session.disconnect().await {
            warn!(session = %self.session.id(), "disconnect failed: {}", e);
        }
        info!(session = %self.session.id(), "supervisor stopped");
    }

    async fn heartbeat(&self) {
        let mut link = self.session.lock().await;
        if let Err(e) = link.connect().await {
            warn!(session = %self.session.id(), "connect failed: {}", e);
            return;
        }
        if let Err(e) = link.keep_alive().await {
            warn!(session = %self.session.id(), "keep-alive failed: {}", e);
        }
    }
}

/// Running supervisor
pub struct SupervisorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    ring: RingHandle,
}

impl SupervisorHandle {
    /// Ring callback target
    pub fn ring_handle(&self) -> RingHandle {
        self.ring.clone()
    }

    /// Ask the loop to stop; it exits at its next check
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether stop was requested
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the loop to exit
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }

    /// Stop and wait
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.stop();
        self.join().await
    }
}
