//! Periodic capture scheduler
//!
//! A fixed-delay repeating timer that posts [`Event::TimerFired`] to the
//! orchestrator queue. The orchestrator starts and cancels it; the scheduler
//! itself never looks at interaction state.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::orchestrator::Event;

/// Reference narration interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Cancellable repeating timer
#[derive(Debug)]
pub struct CaptureScheduler {
    interval: Duration,
    events: mpsc::Sender<Event>,
    handle: Option<JoinHandle<()>>,
    epoch: u64,
}

impl CaptureScheduler {
    /// Create a stopped scheduler posting into `events`
    #[must_use]
    pub const fn new(interval: Duration, events: mpsc::Sender<Event>) -> Self {
        Self {
            interval,
            events,
            handle: None,
            epoch: 0,
        }
    }

    /// Start firing; no-op if already running
    ///
    /// Each start begins a new epoch, tagged onto every tick it produces.
    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let interval = self.interval;
        let events = self.events.clone();

        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if events.send(Event::TimerFired { epoch }).await.is_err() {
                    break;
                }
            }
        }));

        tracing::debug!(epoch, interval_ms = interval.as_millis(), "capture scheduler started");
    }

    /// Cancel the pending timer; no-op if stopped
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!(epoch = self.epoch, "capture scheduler cancelled");
        }
    }

    /// Whether the timer is armed
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Epoch of the most recent start
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Configured firing interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
