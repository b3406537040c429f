//! Autoplay: keeps playback going when a track is about to end

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::model::{PlaybackQueue, Track};
use crate::provider::{MusicProvider, ProviderRegistry};

use super::ai_queue::AiQueueOrchestrator;
use super::scheduler::ScheduledTask;

const TICK: Duration = Duration::from_secs(5);
const RECOMMENDATION_LIMIT: u32 = 5;
const RELATED_LIMIT: u32 = 10;

pub struct AutoplayMonitor {
    registry: Arc<ProviderRegistry>,
    queue: PlaybackQueue,
    ai_queue: Arc<AiQueueOrchestrator>,
    enabled: AtomicBool,
    /// Uri of the last track whose ending was handled.
    last_processed: Mutex<Option<String>>,
    task: ScheduledTask,
}

impl AutoplayMonitor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        queue: PlaybackQueue,
        ai_queue: Arc<AiQueueOrchestrator>,
    ) -> Self {
        Self {
            registry,
            queue,
            ai_queue,
            enabled: AtomicBool::new(false),
            last_processed: Mutex::new(None),
            task: ScheduledTask::new("autoplay"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Start watching for track endings. Returns false if already enabled.
    pub fn enable(self: &Arc<Self>) -> bool {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        self.task.start(TICK, false, move || {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.tick().await;
                }
            }
        });
        tracing::info!("Autoplay enabled");
        true
    }

    /// Returns false if it was not enabled.
    pub fn disable(&self) -> bool {
        self.task.cancel();
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return false;
        }
        tracing::info!("Autoplay disabled");
        true
    }

    async fn tick(&self) {
        if !self.is_enabled() {
            return;
        }
        if self.ai_queue.is_active().await {
            tracing::trace!("AI queue active, autoplay idle");
            return;
        }

        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "Autoplay has no active provider");
                return;
            }
        };

        let state = match provider.get_playback_state().await {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                self.handle_error(e);
                return;
            }
        };
        let Some(track) = state.track.clone() else {
            return;
        };

        if self.last_processed.lock().await.as_deref() == Some(track.uri.as_str()) {
            return;
        }
        if !provider.end_of_track_policy().is_ending(&state) {
            return;
        }

        tracing::debug!(track_uri = %track.uri, provider = %provider.tag(), "Track ending, extending playback");
        let result = if provider.capabilities().has_queue {
            self.extend_native_queue(provider.as_ref(), &track).await
        } else {
            self.extend_local_queue(provider.as_ref(), &track).await
        };
        if let Err(e) = result {
            self.handle_error(e);
        }

        *self.last_processed.lock().await = Some(track.uri);
    }

    fn handle_error(&self, error: EngineError) {
        match error {
            EngineError::AuthenticationFailure(msg) => {
                tracing::error!(error = %msg, "Authentication lost, disabling autoplay");
                self.disable();
            }
            e => tracing::warn!(error = %e, "Autoplay tick failed"),
        }
    }

    async fn extend_native_queue(&self, provider: &dyn MusicProvider, current: &Track) -> Result<()> {
        let upcoming = provider.upcoming_queue().await?;
        if !upcoming.is_empty() {
            tracing::debug!(queued = upcoming.len(), "Backend queue not empty, autoplay deferring");
            return Ok(());
        }

        let candidates = provider.recommendations(current, RECOMMENDATION_LIMIT).await?;
        let mut added = 0;
        for candidate in candidates.iter().take(RECOMMENDATION_LIMIT as usize) {
            match provider.add_to_queue(&candidate.uri).await {
                Ok(()) => added += 1,
                Err(e) => tracing::warn!(track_uri = %candidate.uri, error = %e, "Could not enqueue recommendation"),
            }
        }
        tracing::info!(added, seed = %current.uri, "Autoplay queued recommendations");
        Ok(())
    }

    async fn extend_local_queue(&self, provider: &dyn MusicProvider, current: &Track) -> Result<()> {
        let remaining = self.queue.remaining_count().await;
        if remaining > 0 {
            tracing::debug!(remaining, "Local queue not exhausted, autoplay deferring");
            return Ok(());
        }

        let related = provider.related_tracks(current, RELATED_LIMIT).await?;
        let Some(next) = related.into_iter().find(|t| t.uri != current.uri) else {
            tracing::info!(seed = %current.uri, "No related tracks for autoplay");
            return Ok(());
        };

        self.queue.append_tracks(vec![next.clone()]).await;
        self.queue.follow(&next.id).await;
        provider.play_track(&next.uri).await?;
        tracing::info!(track_uri = %next.uri, "Autoplay started related track");
        Ok(())
    }
}
