//! YouTube controller driving a host-embedded player

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::model::{parse_uri, AlbumImage, Artist, PlaybackState, ProviderTag, Track};

use super::youtube_client::{youtube_album, YouTubeClient};
use super::{EndOfTrackPolicy, MusicProvider, ProviderCapabilities};

const MAX_RECENT_TRACKS: usize = 50;
const READY_POLL_ATTEMPTS: u32 = 50;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the embedded player reports about itself
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub is_playing: bool,
    pub current_time_secs: f64,
    pub duration_secs: f64,
}

/// The video player owned by the host application
pub trait EmbeddedPlayer: Send + Sync {
    fn is_ready(&self) -> bool;
    fn state(&self) -> PlayerSnapshot;
    fn load_video(&self, video_id: &str);
    fn play(&self);
    fn pause(&self);
    fn seek(&self, position_secs: f64);
    fn set_volume(&self, volume_percent: u8);
    fn stop(&self);
}

pub struct YouTubeController {
    client: YouTubeClient,
    player: RwLock<Option<Arc<dyn EmbeddedPlayer>>>,
    current_track: RwLock<Option<Track>>,
    recently_played: RwLock<VecDeque<Track>>,
}

/// Accept both `youtube:video:<id>` and a bare video id.
fn video_id(uri: &str) -> Result<&str> {
    match parse_uri(uri) {
        Some((ProviderTag::YouTube, id)) => Ok(id),
        Some(_) => Err(EngineError::InvalidUri(uri.to_string())),
        None if !uri.is_empty() && !uri.contains(':') => Ok(uri),
        None => Err(EngineError::InvalidUri(uri.to_string())),
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0) as u64
}

fn push_recent(recent: &mut VecDeque<Track>, track: Track) {
    recent.retain(|t| t.id != track.id);
    recent.push_front(track);
    recent.truncate(MAX_RECENT_TRACKS);
}

impl YouTubeController {
    pub fn new(client: YouTubeClient) -> Self {
        Self {
            client,
            player: RwLock::new(None),
            current_track: RwLock::new(None),
            recently_played: RwLock::new(VecDeque::new()),
        }
    }

    /// Attach (or detach with `None`) the host's player.
    pub async fn set_player(&self, player: Option<Arc<dyn EmbeddedPlayer>>) {
        *self.player.write().await = player;
    }

    fn with_player(&self, f: impl FnOnce(&dyn EmbeddedPlayer)) {
        // Transport calls are synchronous; skip silently while the lock is busy.
        if let Ok(guard) = self.player.try_read() {
            if let Some(player) = guard.as_ref() {
                f(player.as_ref());
            }
        }
    }

    async fn ready_player(&self) -> Option<Arc<dyn EmbeddedPlayer>> {
        self.player
            .read()
            .await
            .as_ref()
            .filter(|p| p.is_ready())
            .cloned()
    }

    async fn wait_for_player(&self) -> Result<Arc<dyn EmbeddedPlayer>> {
        for _ in 0..READY_POLL_ATTEMPTS {
            if let Some(player) = self.ready_player().await {
                return Ok(player);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        self.ready_player().await.ok_or_else(|| {
            EngineError::TransientNetwork("YouTube player not ready after waiting".to_string())
        })
    }

    async fn set_current(&self, track: Track) {
        push_recent(&mut *self.recently_played.write().await, track.clone());
        *self.current_track.write().await = Some(track);
    }

    /// Record a video from what is known about it without the Data API.
    /// A zero duration is filled in from the player later.
    pub async fn update_current_track(&self, video_id: &str, title: &str, author: &str, duration_secs: u64) {
        let track = Track {
            id: video_id.to_string(),
            name: title.to_string(),
            duration_ms: duration_secs * 1000,
            artists: vec![Artist {
                id: format!("yt-artist-{}", author),
                name: author.to_string(),
            }],
            album: youtube_album(vec![AlbumImage {
                url: format!("https://img.youtube.com/vi/{}/maxresdefault.jpg", video_id),
                width: 1280,
                height: 720,
            }]),
            uri: ProviderTag::YouTube.track_uri(video_id),
            provider: ProviderTag::YouTube,
        };
        self.set_current(track).await;
    }
}

#[async_trait]
impl MusicProvider for YouTubeController {
    fn tag(&self) -> ProviderTag {
        ProviderTag::YouTube
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            has_playlists: true,
            has_queue: false,
            has_external_playback: false,
            has_liked_songs: false,
        }
    }

    fn end_of_track_policy(&self) -> EndOfTrackPolicy {
        EndOfTrackPolicy {
            window_ms: 2_000,
            requires_stopped: true,
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.client.token_file().has_valid().await
    }

    async fn connect(&self) -> Result<()> {
        self.client.forget_tokens().await;
        if self.is_authenticated().await {
            tracing::info!("YouTube tokens found");
            Ok(())
        } else {
            Err(EngineError::AuthenticationFailure(format!(
                "sign in to YouTube to create {}",
                self.client.token_file().path().display()
            )))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.token_file().clear().await;
        self.client.forget_tokens().await;
        *self.current_track.write().await = None;
        self.recently_played.write().await.clear();
        if let Some(player) = self.player.read().await.as_ref() {
            player.stop();
        }
        Ok(())
    }

    async fn get_current_track(&self) -> Result<Option<Track>> {
        Ok(self.current_track.read().await.clone())
    }

    async fn get_playback_state(&self) -> Result<Option<PlaybackState>> {
        let Some(player) = self.ready_player().await else {
            return Ok(None);
        };
        let snapshot = player.state();
        let mut track = self.current_track.read().await.clone();
        // Fall back to the player's duration when the API did not report one
        if let Some(track) = track.as_mut().filter(|t| t.duration_ms == 0) {
            track.duration_ms = secs_to_ms(snapshot.duration_secs);
        }
        Ok(Some(PlaybackState {
            is_playing: snapshot.is_playing,
            progress_ms: secs_to_ms(snapshot.current_time_secs),
            track,
        }))
    }

    fn play(&self) {
        self.with_player(|p| p.play());
    }

    fn pause(&self) {
        self.with_player(|p| p.pause());
    }

    fn next_track(&self) {
        tracing::warn!("YouTube has no native next track, use the playback queue");
    }

    fn previous_track(&self) {
        tracing::warn!("YouTube has no native previous track");
    }

    fn seek(&self, position_ms: u64) {
        self.with_player(|p| p.seek(position_ms as f64 / 1000.0));
    }

    fn set_volume(&self, volume_percent: u8) {
        self.with_player(|p| p.set_volume(volume_percent.min(100)));
    }

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<Track>> {
        self.client.search_videos(query, limit).await
    }

    async fn play_track(&self, uri: &str) -> Result<()> {
        let video_id = video_id(uri)?;
        let player = self.wait_for_player().await?;

        tracing::debug!(video_id, "Loading video");
        player.load_video(video_id);
        player.play();

        match self.client.video_details(video_id).await {
            Ok(Some(track)) => self.set_current(track).await,
            Ok(None) => {
                tracing::warn!(video_id, "Video details not found");
                self.update_current_track(video_id, video_id, "YouTube", 0).await;
            }
            Err(e) => {
                tracing::warn!(video_id, error = %e, "Could not fetch video details");
                self.update_current_track(video_id, video_id, "YouTube", 0).await;
            }
        }
        Ok(())
    }

    async fn add_to_queue(&self, uri: &str) -> Result<()> {
        tracing::warn!(track_uri = %uri, "YouTube has no native queue, playing directly");
        self.play_track(uri).await
    }

    async fn get_recently_played(&self, limit: u32) -> Result<Vec<Track>> {
        Ok(self
            .recently_played
            .read()
            .await
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn related_tracks(&self, seed: &Track, limit: u32) -> Result<Vec<Track>> {
        Ok(self.client.related_videos(&seed.id, limit).await)
    }
}
