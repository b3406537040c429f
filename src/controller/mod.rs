//! Controller module - Everything that drives playback state over time
//!
//! Each background concern owns its own periodic task and can be switched on
//! and off independently. They are organized into submodules by responsibility:
//!
//! - `scheduler`: Cancellable periodic task shared by the monitors
//! - `playback`: Playlist/single-track playback through the local queue
//! - `autoplay`: Extends playback when a track is about to end
//! - `ai_queue`: Mood-driven AI queue and its drift monitor
//! - `keep_alive`: Session health checks and device recovery

mod scheduler;
mod playback;
mod autoplay;
mod ai_queue;
mod keep_alive;

use std::sync::Arc;

use crate::config::SettingsStore;
use crate::error::{EngineError, Result};
use crate::model::{MoodContext, PlaybackQueue, ProviderTag};
use crate::provider::{EmbeddedPlayer, ProviderRegistry, YouTubeController};
use crate::suggest::SuggestionModel;

pub use ai_queue::AiQueueOrchestrator;
pub use autoplay::AutoplayMonitor;
pub use keep_alive::KeepAliveMonitor;
pub use playback::PlaybackService;

/// Owns the shared playback state and every component that mutates it.
/// Built once per process.
#[derive(Clone)]
pub struct Engine {
    pub registry: Arc<ProviderRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub queue: PlaybackQueue,
    pub ai_queue: Arc<AiQueueOrchestrator>,
    pub autoplay: Arc<AutoplayMonitor>,
    pub keep_alive: Arc<KeepAliveMonitor>,
    pub playback: Arc<PlaybackService>,
    /// Kept aside from the registry so a player can be attached to it.
    youtube: Option<Arc<YouTubeController>>,
}

impl Engine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        settings: Arc<dyn SettingsStore>,
        model: Arc<dyn SuggestionModel>,
    ) -> Self {
        let queue = PlaybackQueue::new();
        let ai_queue = Arc::new(AiQueueOrchestrator::new(
            Arc::clone(&registry),
            model,
            MoodContext::new(),
        ));
        let autoplay = Arc::new(AutoplayMonitor::new(
            Arc::clone(&registry),
            queue.clone(),
            Arc::clone(&ai_queue),
        ));
        let keep_alive = Arc::new(KeepAliveMonitor::new(Arc::clone(&registry)));
        let playback = Arc::new(PlaybackService::new(Arc::clone(&registry), queue.clone()));

        Self {
            registry,
            settings,
            queue,
            ai_queue,
            autoplay,
            keep_alive,
            playback,
            youtube: None,
        }
    }

    /// Hand over the YouTube controller that is also registered with the registry.
    pub fn with_youtube(mut self, controller: Arc<YouTubeController>) -> Self {
        self.youtube = Some(controller);
        self
    }

    /// Attach (or detach with `None`) the player YouTube videos play in.
    pub async fn attach_youtube_player(&self, player: Option<Arc<dyn EmbeddedPlayer>>) -> Result<()> {
        let controller = self
            .youtube
            .as_ref()
            .ok_or_else(|| EngineError::UnknownProvider(ProviderTag::YouTube.to_string()))?;
        tracing::info!(attached = player.is_some(), "YouTube player changed");
        controller.set_player(player).await;
        Ok(())
    }

    /// Switch the monitors on or off to match the persisted settings.
    pub async fn apply_settings(&self) {
        let settings = self.settings.read().await;
        tracing::debug!(
            autoplay = settings.autoplay_enabled,
            keep_alive = settings.keep_alive_enabled,
            provider = %settings.music_provider(),
            "Applying settings"
        );

        if settings.autoplay_enabled {
            self.autoplay.enable();
        } else {
            self.autoplay.disable();
        }

        if settings.keep_alive_enabled {
            self.keep_alive.enable().await;
        } else {
            self.keep_alive.disable().await;
        }
    }

    /// Stop every background task.
    pub async fn shutdown(&self) {
        self.ai_queue.stop().await;
        self.autoplay.disable();
        self.keep_alive.disable().await;
        self.playback.clear_playback_queue().await;
        if let Some(youtube) = &self.youtube {
            youtube.set_player(None).await;
        }
        tracing::info!("Engine stopped");
    }
}
