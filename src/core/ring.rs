//! Ring indicator line
//!
//! The modem pulls its RI pin low when an SMS arrives (with `AT+CFGRI=1`).
//! A [`RingLine`] turns those falling edges into callbacks.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Invoked once per debounced falling edge. Must return promptly.
pub type EdgeCallback = Box<dyn Fn() + Send + Sync>;

/// Default pause between two reported edges
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Ring line errors
#[derive(Error, Debug)]
pub enum RingLineError {
    /// GPIO access failed
    #[error("GPIO error: {0}")]
    Io(#[from] io::Error),

    /// A callback is already registered
    #[error("Ring line already has a subscriber")]
    AlreadySubscribed,
}

/// A source of falling-edge notifications
pub trait RingLine: Send {
    /// Register `callback` for falling edges at least `debounce` apart
    fn subscribe(&mut self, debounce: Duration, callback: EdgeCallback)
        -> Result<(), RingLineError>;
}

/// Ring line read from a sysfs GPIO `value` file (`/sys/class/gpio/gpioN/value`).
///
/// The pin must already be exported and configured as an input. The file is
/// polled from a tokio task, so `subscribe` must be called inside a runtime.
pub struct SysfsRingLine {
    path: PathBuf,
    poll_interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SysfsRingLine {
    /// Watch the value file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(10),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Set how often the value file is read
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get the value file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop watching. A later `subscribe` starts a new watch.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.task = None;
    }
}

impl Drop for SysfsRingLine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn is_high(raw: &str) -> bool {
    raw.trim() != "0"
}

impl RingLine for SysfsRingLine {
    fn subscribe(
        &mut self,
        debounce: Duration,
        callback: EdgeCallback,
    ) -> Result<(), RingLineError> {
        if self.task.is_some() {
            return Err(RingLineError::AlreadySubscribed);
        }

        let mut level = is_high(&std::fs::read_to_string(&self.path)?);
        let path = self.path.clone();
        // a closed line leaves its token cancelled
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(path = %path.display(), "watching ring line");
        self.task = Some(tokio::spawn(async move {
            let mut last_edge: Option<Instant> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let high = match tokio::fs::read_to_string(&path).await {
                    Ok(raw) => is_high(&raw),
                    Err(e) => {
                        warn!(path = %path.display(), "ring line read failed: {}", e);
                        continue;
                    }
                };

                if level && !high {
                    let now = Instant::now();
                    if last_edge.map_or(true, |at| now.duration_since(at) >= debounce) {
                        last_edge = Some(now);
                        debug!("ring line fell");
                        callback();
                    }
                }
                level = high;
            }
        }));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, EdgeCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (
            count,
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    async fn set_level(path: &Path, value: &str) {
        std::fs::write(path, value).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn test_falling_edges_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "1\n").unwrap();

        let (count, callback) = counter();
        let mut line = SysfsRingLine::new(&path).poll_interval(Duration::from_millis(5));
        line.subscribe(Duration::ZERO, callback).unwrap();

        set_level(&path, "0\n").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // staying low is not another edge
        set_level(&path, "0\n").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        set_level(&path, "1\n").await;
        set_level(&path, "0\n").await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_debounce_suppresses_bounces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "1\n").unwrap();

        let (count, callback) = counter();
        let mut line = SysfsRingLine::new(&path).poll_interval(Duration::from_millis(5));
        line.subscribe(Duration::from_secs(60), callback).unwrap();

        set_level(&path, "0\n").await;
        set_level(&path, "1\n").await;
        set_level(&path, "0\n").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_errors() {
        let dir = tempfile::tempdir().unwrap();

        let (_, callback) = counter();
        let mut missing = SysfsRingLine::new(dir.path().join("gpio17/value"));
        assert!(matches!(
            missing.subscribe(DEFAULT_DEBOUNCE, callback),
            Err(RingLineError::Io(_))
        ));

        let path = dir.path().join("value");
        std::fs::write(&path, "1\n").unwrap();
        let mut line = SysfsRingLine::new(&path);
        let (_, first) = counter();
        let (_, second) = counter();
        line.subscribe(DEFAULT_DEBOUNCE, first).unwrap();
        assert!(matches!(
            line.subscribe(DEFAULT_DEBOUNCE, second),
            Err(RingLineError::AlreadySubscribed)
        ));
        line.close();
    }

    #[tokio::test]
    async fn test_subscribe_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "1\n").unwrap();

        let mut line = SysfsRingLine::new(&path).poll_interval(Duration::from_millis(5));
        let (stale, first) = counter();
        line.subscribe(Duration::ZERO, first).unwrap();
        line.close();

        let (count, second) = counter();
        line.subscribe(Duration::ZERO, second).unwrap();
        set_level(&path, "1\n").await;
        set_level(&path, "0\n").await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(stale.load(Ordering::SeqCst), 0);
    }
}
