//! Playlist and single-track playback through the local queue

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::model::{provider_from_uri, PlaybackQueue, ProviderTag, Track};
use crate::provider::{EndOfTrackPolicy, ProviderRegistry};

use super::scheduler::ScheduledTask;

const MONITOR_TICK: Duration = Duration::from_secs(2);
const TRACK_END: EndOfTrackPolicy = EndOfTrackPolicy {
    window_ms: 2_000,
    requires_stopped: true,
};

/// Summary of the local queue for the UI
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub is_active: bool,
    pub is_playlist_mode: bool,
    pub current_index: Option<usize>,
    pub total_tracks: usize,
    pub provider: Option<ProviderTag>,
}

pub struct PlaybackService {
    registry: Arc<ProviderRegistry>,
    queue: PlaybackQueue,
    /// Id of the track the queue monitor last saw playing.
    last_tracked_id: Mutex<Option<String>>,
    monitor: ScheduledTask,
}

impl PlaybackService {
    pub fn new(registry: Arc<ProviderRegistry>, queue: PlaybackQueue) -> Self {
        Self {
            registry,
            queue,
            last_tracked_id: Mutex::new(None),
            monitor: ScheduledTask::new("playback-queue"),
        }
    }

    /// Load a playlist into the queue. Backends with their own queue only get
    /// the bookkeeping; for the others the start track is played here and a
    /// monitor advances through the rest.
    pub async fn start_playlist_playback(
        self: &Arc<Self>,
        playlist_id: &str,
        tracks: Vec<Track>,
        start_index: usize,
    ) -> Result<()> {
        let provider = self.registry.active().await?;
        let count = tracks.len();
        self.queue
            .set_playlist_queue(playlist_id, tracks, start_index, provider.tag())
            .await;
        tracing::info!(playlist_id, tracks = count, start_index, provider = %provider.tag(), "Playlist queued");

        if provider.capabilities().has_queue {
            return Ok(());
        }
        let Some(track) = self.queue.current_track().await else {
            return Ok(());
        };

        provider.play_track(&track.uri).await?;
        *self.last_tracked_id.lock().await = Some(track.id);
        self.start_monitor();
        Ok(())
    }

    pub async fn play_single_track(&self, track: Track) -> Result<()> {
        let provider = self.registry.active().await?;
        if provider_from_uri(&track.uri).is_some_and(|tag| tag != provider.tag()) {
            return Err(EngineError::InvalidUri(track.uri));
        }
        self.queue.set_single_track(track.clone(), provider.tag()).await;
        provider.play_track(&track.uri).await?;
        *self.last_tracked_id.lock().await = Some(track.id);
        tracing::info!(track_uri = %track.uri, "Playing single track");
        Ok(())
    }

    pub async fn clear_playback_queue(&self) {
        self.monitor.cancel();
        self.queue.clear().await;
        *self.last_tracked_id.lock().await = None;
        tracing::debug!("Playback queue cleared");
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.queue.snapshot().await;
        QueueStatus {
            is_active: state.is_active(),
            is_playlist_mode: state.is_playlist_mode,
            current_index: state.current_index,
            total_tracks: state.tracks.len(),
            provider: state.provider,
        }
    }

    fn start_monitor(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.monitor.start(MONITOR_TICK, false, move || {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.monitor_tick().await;
                }
            }
        });
    }

    async fn monitor_tick(&self) {
        let snapshot = self.queue.snapshot().await;
        if !snapshot.is_active() {
            return;
        }

        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "Queue monitor has no active provider");
                return;
            }
        };
        if provider.capabilities().has_queue || snapshot.provider != Some(provider.tag()) {
            tracing::debug!(provider = %provider.tag(), "Active provider changed, stopping queue monitor");
            self.monitor.cancel();
            return;
        }

        let state = match provider.get_playback_state().await {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "Queue monitor could not read playback");
                return;
            }
        };

        if TRACK_END.is_ending(&state) && snapshot.remaining_count() > 0 {
            if let Some(next) = self.queue.advance_to_next().await {
                tracing::debug!(track_uri = %next.uri, "Track ended, playing next in queue");
                if let Err(e) = provider.play_track(&next.uri).await {
                    tracing::warn!(track_uri = %next.uri, error = %e, "Could not play next queued track");
                }
                *self.last_tracked_id.lock().await = Some(next.id);
            }
            return;
        }

        let Some(track) = state.track else {
            return;
        };
        let mut last = self.last_tracked_id.lock().await;
        if last.as_deref() != Some(track.id.as_str()) {
            *last = Some(track.id.clone());
            if self.queue.follow(&track.id).await {
                tracing::debug!(track_id = %track.id, "Queue cursor followed manual selection");
            }
        }
    }
}
