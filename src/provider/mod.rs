//! Provider module - Uniform control over the streaming backends
//!
//! - `registry`: Maps a backend tag to its lazily-built controller
//! - `spotify`: Spotify Web API controller (native queue, remote devices)
//! - `youtube`: YouTube controller driving a host-embedded player
//! - `youtube_client`: YouTube Data API client used by the YouTube controller

mod registry;
mod spotify;
mod youtube;
mod youtube_client;

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::model::{DeviceInfo, PlaybackState, ProviderTag, Track};

pub use registry::ProviderRegistry;
pub use spotify::SpotifyController;
pub use youtube::{EmbeddedPlayer, PlayerSnapshot, YouTubeController};
pub use youtube_client::{YouTubeClient, YouTubeTokenFile};

/// What a backend can do natively
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub has_playlists: bool,
    /// Backend keeps its own upcoming-tracks queue.
    pub has_queue: bool,
    /// Playback happens on a remote device the backend manages.
    pub has_external_playback: bool,
    pub has_liked_songs: bool,
}

/// How close to the end a track must be before autoplay steps in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndOfTrackPolicy {
    pub window_ms: u64,
    /// The backend's live position is unreliable, so also wait for it to report stopped.
    pub requires_stopped: bool,
}

impl EndOfTrackPolicy {
    pub fn is_ending(&self, state: &PlaybackState) -> bool {
        state.is_near_end(self.window_ms) && (!self.requires_stopped || !state.is_playing)
    }
}

/// A listener's favourite artist, used to summarise their taste
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtistProfile {
    pub name: String,
    pub genres: Vec<String>,
}

/// The capability set every backend controller exposes.
///
/// Transport controls are fire-and-forget: they return immediately and give
/// no completion guarantee. Authentication checks never fail, they answer
/// false instead.
#[async_trait]
pub trait MusicProvider: Send + Sync {
    fn tag(&self) -> ProviderTag;
    fn capabilities(&self) -> ProviderCapabilities;
    fn end_of_track_policy(&self) -> EndOfTrackPolicy;

    async fn is_authenticated(&self) -> bool;
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    async fn get_current_track(&self) -> Result<Option<Track>>;
    async fn get_playback_state(&self) -> Result<Option<PlaybackState>>;

    fn play(&self);
    fn pause(&self);
    fn next_track(&self);
    fn previous_track(&self);
    fn seek(&self, position_ms: u64);
    fn set_volume(&self, volume_percent: u8);

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<Track>>;
    async fn play_track(&self, uri: &str) -> Result<()>;
    async fn add_to_queue(&self, uri: &str) -> Result<()>;
    async fn get_recently_played(&self, limit: u32) -> Result<Vec<Track>>;

    /// Start playing `uris` in order. Backends without a single multi-track
    /// play call start the first and enqueue the rest.
    async fn play_tracks(&self, uris: &[String]) -> Result<()> {
        let Some((first, rest)) = uris.split_first() else {
            return Ok(());
        };
        self.play_track(first).await?;
        for uri in rest {
            self.add_to_queue(uri).await?;
        }
        Ok(())
    }

    /// Tracks waiting in the backend's own queue.
    async fn upcoming_queue(&self) -> Result<Vec<Track>> {
        Err(EngineError::not_supported("upcoming_queue", self.tag()))
    }

    /// Recommendation candidates seeded by `seed`.
    async fn recommendations(&self, seed: &Track, limit: u32) -> Result<Vec<Track>> {
        let _ = (seed, limit);
        Err(EngineError::not_supported("recommendations", self.tag()))
    }

    /// Related-content candidates for `seed`.
    async fn related_tracks(&self, seed: &Track, limit: u32) -> Result<Vec<Track>> {
        let _ = (seed, limit);
        Err(EngineError::not_supported("related_tracks", self.tag()))
    }

    /// Short-term favourite artists. Empty when the backend has no such data.
    async fn top_artists(&self, limit: u32) -> Result<Vec<ArtistProfile>> {
        let _ = limit;
        Ok(Vec::new())
    }

    /// Device/session control, for the backend that plays on remote devices.
    fn device_session(&self) -> Option<&dyn DeviceSession> {
        None
    }
}

/// Remote playback endpoint management
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Device the current session is playing on, if any.
    async fn session_device(&self) -> Result<Option<DeviceInfo>>;
    async fn devices(&self) -> Result<Vec<DeviceInfo>>;
    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()>;
    async fn resume(&self) -> Result<()>;
}
