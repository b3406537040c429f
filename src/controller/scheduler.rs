//! Periodic background task with synchronous cancellation

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A named periodic task.
///
/// Ticks of one task never overlap: the next tick waits for the previous
/// body to finish. Cancelling does not abort a tick already running, so
/// tick bodies re-check their owner's enabled flag first.
pub struct ScheduledTask {
    name: &'static str,
    token: Mutex<Option<CancellationToken>>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: Mutex::new(None),
        }
    }

    /// Start ticking every `period`. With `immediate` the first tick runs
    /// right away instead of after one period. Returns false if already running.
    pub fn start<F, Fut>(&self, period: Duration, immediate: bool, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return false;
        }

        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        let name = self.name;
        let first = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };

        tokio::spawn(async move {
            let mut timer = interval_at(first, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Scheduled task started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }
                tick().await;
            }

            tracing::debug!(task = name, "Scheduled task stopped");
        });
        true
    }

    /// Stop ticking. Safe to call repeatedly or when never started.
    pub fn cancel(&self) -> bool {
        let mut slot = self.token.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
