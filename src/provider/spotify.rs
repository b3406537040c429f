//! Spotify Web API controller

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use rspotify::{
    model::{
        ArtistId, Device, DeviceType, FullTrack, Image, PlayableId, PlayableItem,
        RecommendationsAttribute, SearchResult, SearchType, SimplifiedAlbum, SimplifiedArtist,
        SimplifiedTrack, TimeRange, TrackId,
    },
    prelude::*,
    AuthCodeSpotify, Config,
};
use tokio::sync::RwLock;

use crate::auth::{self, SpotifyTokens};
use crate::error::{EngineError, Result};
use crate::model::{Album, AlbumImage, Artist, DeviceInfo, DeviceKind, PlaybackState, ProviderTag, Track};

use super::{ArtistProfile, DeviceSession, EndOfTrackPolicy, MusicProvider, ProviderCapabilities};

/// Refresh once less than this many seconds of token lifetime remain.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Spotify controller with token refresh and local-device fallback
#[derive(Clone)]
pub struct SpotifyController {
    client: Arc<AuthCodeSpotify>,
    local_device_name: Option<String>,
    tokens: Arc<RwLock<Option<SpotifyTokens>>>,
}

impl SpotifyController {
    pub fn new(local_device_name: Option<String>) -> Self {
        let client = AuthCodeSpotify::with_config(
            Default::default(),
            Default::default(),
            Config {
                token_cached: false,
                token_refreshing: false,
                ..Default::default()
            },
        );
        Self {
            client: Arc::new(client),
            local_device_name,
            tokens: Arc::new(RwLock::new(None)),
        }
    }

    /// Controller that prefers the Spotify app running on this machine when
    /// no device is active.
    pub fn for_this_host() -> Self {
        let name = hostname::get().ok().and_then(|h| h.into_string().ok());
        tracing::debug!(local_device = ?name, "Resolved local device name");
        Self::new(name)
    }

    async fn install_tokens(&self, tokens: SpotifyTokens) -> Result<()> {
        let mut guard = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| EngineError::AuthenticationFailure("token store unavailable".into()))?;
        *guard = Some(tokens.to_rspotify());
        drop(guard);

        tracing::debug!(expires_at = %tokens.expires_at, "rspotify token set");
        *self.tokens.write().await = Some(tokens);
        Ok(())
    }

    pub async fn token_needs_refresh(&self) -> bool {
        match self.tokens.read().await.as_ref() {
            Some(tokens) => {
                let remaining = tokens.expires_at - chrono::Utc::now();
                remaining.num_seconds() < TOKEN_REFRESH_MARGIN_SECS
            }
            None => false,
        }
    }

    pub async fn refresh_token_if_needed(&self) -> Result<bool> {
        if !self.token_needs_refresh().await {
            return Ok(false);
        }

        let Some(refresh_token) = self
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
        else {
            return Ok(false);
        };

        tracing::info!("Token expiring soon, refreshing...");

        match auth::refresh_access_token(&refresh_token).await {
            Ok(tokens) => {
                self.install_tokens(tokens).await?;
                tracing::info!("Token refreshed successfully");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to refresh token");
                Err(EngineError::AuthenticationFailure(e.to_string()))
            }
        }
    }

    async fn get_device_id(&self) -> Option<String> {
        if let Ok(devices) = self.client.device().await {
            let active_device = devices.iter().find(|d| d.is_active);
            if let Some(device) = active_device {
                tracing::debug!(device_name = %device.name, device_id = ?device.id, "Found active device");
                return device.id.clone();
            }

            if let Some(local_name) = &self.local_device_name {
                let local_device = devices
                    .iter()
                    .find(|d| d.name.eq_ignore_ascii_case(local_name));
                if let Some(device) = local_device {
                    tracing::debug!(device_name = %device.name, device_id = ?device.id, "No active device, using local device as fallback");
                    return device.id.clone();
                }
            }

            tracing::debug!(available_devices = devices.len(), "No active device found and local device not in list");
            None
        } else {
            tracing::debug!("Failed to get devices list");
            None
        }
    }

    /// Run a transport command in the background and log its outcome.
    fn fire<F, Fut>(&self, operation: &'static str, command: F)
    where
        F: FnOnce(SpotifyController) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let result = command(this).await;
            crate::log_api_result!(operation, result);
        });
    }

    async fn resume_playback(&self) -> Result<()> {
        let device_id = self.get_device_id().await;
        crate::log_api_request!("resume_playback", device_id = ?device_id);
        self.client.resume_playback(device_id.as_deref(), None).await?;
        Ok(())
    }

    async fn start_uris(&self, uris: &[String]) -> Result<()> {
        let ids = uris
            .iter()
            .map(|uri| TrackId::from_id_or_uri(uri).map(PlayableId::Track))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let device_id = self.get_device_id().await;
        crate::log_api_request!("start_uris_playback", count = ids.len(), device_id = ?device_id);
        self.client
            .start_uris_playback(ids, device_id.as_deref(), None, None)
            .await?;
        Ok(())
    }
}

fn convert_images(images: &[Image]) -> Vec<AlbumImage> {
    images
        .iter()
        .map(|image| AlbumImage {
            url: image.url.clone(),
            width: image.width.unwrap_or_default(),
            height: image.height.unwrap_or_default(),
        })
        .collect()
}

fn convert_album(album: &SimplifiedAlbum) -> Album {
    Album {
        id: album.id.as_ref().map(|id| id.id().to_string()).unwrap_or_default(),
        name: album.name.clone(),
        images: convert_images(&album.images),
    }
}

fn convert_artists(artists: &[SimplifiedArtist]) -> Vec<Artist> {
    artists
        .iter()
        .map(|artist| Artist {
            id: artist.id.as_ref().map(|id| id.id().to_string()).unwrap_or_default(),
            name: artist.name.clone(),
        })
        .collect()
}

fn duration_ms(duration: chrono::Duration) -> u64 {
    duration.num_milliseconds().max(0) as u64
}

/// Local files have no id and cannot be played through the API.
fn convert_full_track(track: &FullTrack) -> Option<Track> {
    let id = track.id.as_ref()?.id().to_string();
    Some(Track {
        uri: ProviderTag::Spotify.track_uri(&id),
        id,
        name: track.name.clone(),
        duration_ms: duration_ms(track.duration),
        artists: convert_artists(&track.artists),
        album: convert_album(&track.album),
        provider: ProviderTag::Spotify,
    })
}

fn convert_simplified_track(track: &SimplifiedTrack) -> Option<Track> {
    let id = track.id.as_ref()?.id().to_string();
    Some(Track {
        uri: ProviderTag::Spotify.track_uri(&id),
        id,
        name: track.name.clone(),
        duration_ms: duration_ms(track.duration),
        artists: convert_artists(&track.artists),
        album: track.album.as_ref().map(convert_album).unwrap_or_else(|| Album {
            id: String::new(),
            name: String::new(),
            images: Vec::new(),
        }),
        provider: ProviderTag::Spotify,
    })
}

fn convert_playable(item: &PlayableItem) -> Option<Track> {
    match item {
        PlayableItem::Track(track) => convert_full_track(track),
        _ => None,
    }
}

fn device_kind(device_type: &DeviceType) -> DeviceKind {
    match device_type {
        DeviceType::Computer => DeviceKind::Computer,
        DeviceType::Smartphone => DeviceKind::Smartphone,
        DeviceType::Speaker => DeviceKind::Speaker,
        _ => DeviceKind::Other,
    }
}

fn convert_device(device: Device) -> Option<DeviceInfo> {
    Some(DeviceInfo {
        id: device.id?,
        kind: device_kind(&device._type),
        name: device.name,
        is_active: device.is_active,
    })
}

#[async_trait]
impl MusicProvider for SpotifyController {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Spotify
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            has_playlists: true,
            has_queue: true,
            has_external_playback: true,
            has_liked_songs: true,
        }
    }

    fn end_of_track_policy(&self) -> EndOfTrackPolicy {
        EndOfTrackPolicy {
            window_ms: 10_000,
            requires_stopped: false,
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.tokens
            .read()
            .await
            .as_ref()
            .is_some_and(|t| t.expires_at > chrono::Utc::now())
    }

    async fn connect(&self) -> Result<()> {
        let tokens = auth::perform_oauth_flow()
            .await
            .map_err(|e| EngineError::AuthenticationFailure(e.to_string()))?;
        self.install_tokens(tokens).await?;

        match self.client.me().await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "rspotify authorized successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "rspotify authentication failed");
                Err(e.into())
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if let Ok(mut guard) = self.client.token.lock().await {
            *guard = None;
        }
        *self.tokens.write().await = None;
        auth::clear_cached_credentials();
        tracing::info!("Disconnected from Spotify");
        Ok(())
    }

    async fn get_current_track(&self) -> Result<Option<Track>> {
        Ok(self.get_playback_state().await?.and_then(|state| state.track))
    }

    async fn get_playback_state(&self) -> Result<Option<PlaybackState>> {
        tracing::trace!("Fetching current playback state");
        let Some(playback) = self.client.current_playback(None, None::<Vec<_>>).await? else {
            return Ok(None);
        };
        tracing::trace!(
            is_playing = playback.is_playing,
            device = ?playback.device.name,
            "Got playback state"
        );
        Ok(Some(PlaybackState {
            is_playing: playback.is_playing,
            progress_ms: playback.progress.map(duration_ms).unwrap_or_default(),
            track: playback.item.as_ref().and_then(convert_playable),
        }))
    }

    fn play(&self) {
        self.fire("play", |s| async move { s.resume_playback().await });
    }

    fn pause(&self) {
        self.fire("pause", |s| async move {
            let device_id = s.get_device_id().await;
            crate::log_api_request!("pause_playback", device_id = ?device_id);
            s.client.pause_playback(device_id.as_deref()).await?;
            Ok(())
        });
    }

    fn next_track(&self) {
        self.fire("next_track", |s| async move {
            let device_id = s.get_device_id().await;
            crate::log_api_request!("next_track", device_id = ?device_id);
            s.client.next_track(device_id.as_deref()).await?;
            Ok(())
        });
    }

    fn previous_track(&self) {
        self.fire("previous_track", |s| async move {
            let device_id = s.get_device_id().await;
            crate::log_api_request!("previous_track", device_id = ?device_id);
            s.client.previous_track(device_id.as_deref()).await?;
            Ok(())
        });
    }

    fn seek(&self, position_ms: u64) {
        self.fire("seek", move |s| async move {
            let device_id = s.get_device_id().await;
            crate::log_api_request!("seek_track", position_ms, device_id = ?device_id);
            let position = chrono::Duration::milliseconds(position_ms as i64);
            s.client.seek_track(position, device_id.as_deref()).await?;
            Ok(())
        });
    }

    fn set_volume(&self, volume_percent: u8) {
        let volume = volume_percent.min(100);
        self.fire("set_volume", move |s| async move {
            let device_id = s.get_device_id().await;
            crate::log_api_request!("volume", volume, device_id = ?device_id);
            s.client.volume(volume, device_id.as_deref()).await?;
            Ok(())
        });
    }

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<Track>> {
        crate::log_api_request!("search", query, limit);
        let result = self
            .client
            .search(query, SearchType::Track, None, None, Some(limit), None)
            .await?;
        match result {
            SearchResult::Tracks(page) => Ok(page.items.iter().filter_map(convert_full_track).collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn play_track(&self, uri: &str) -> Result<()> {
        self.start_uris(&[uri.to_string()]).await
    }

    async fn play_tracks(&self, uris: &[String]) -> Result<()> {
        if uris.is_empty() {
            return Ok(());
        }
        self.start_uris(uris).await
    }

    async fn add_to_queue(&self, uri: &str) -> Result<()> {
        let id = TrackId::from_id_or_uri(uri)?;
        let device_id = self.get_device_id().await;
        crate::log_api_request!("add_item_to_queue", uri, device_id = ?device_id);
        self.client
            .add_item_to_queue(PlayableId::Track(id), device_id.as_deref())
            .await?;
        Ok(())
    }

    async fn get_recently_played(&self, limit: u32) -> Result<Vec<Track>> {
        crate::log_api_request!("current_user_recently_played", limit);
        let page = self
            .client
            .current_user_recently_played(Some(limit), None)
            .await?;
        Ok(page
            .items
            .iter()
            .filter_map(|history| convert_full_track(&history.track))
            .collect())
    }

    async fn upcoming_queue(&self) -> Result<Vec<Track>> {
        let queue = self.client.current_user_queue().await?;
        Ok(queue.queue.iter().filter_map(convert_playable).collect())
    }

    async fn recommendations(&self, seed: &Track, limit: u32) -> Result<Vec<Track>> {
        let seed_id = TrackId::from_id(seed.id.as_str())?;
        crate::log_api_request!("recommendations", seed = %seed.id, limit);
        let recommendations = self
            .client
            .recommendations(
                Vec::<RecommendationsAttribute>::new(),
                None::<Vec<ArtistId>>,
                None::<Vec<&str>>,
                Some([seed_id]),
                None,
                Some(limit),
            )
            .await?;
        Ok(recommendations
            .tracks
            .iter()
            .filter_map(convert_simplified_track)
            .collect())
    }

    async fn top_artists(&self, limit: u32) -> Result<Vec<ArtistProfile>> {
        let page = self
            .client
            .current_user_top_artists_manual(Some(TimeRange::ShortTerm), Some(limit), None)
            .await?;
        Ok(page
            .items
            .into_iter()
            .map(|artist| ArtistProfile {
                name: artist.name,
                genres: artist.genres,
            })
            .collect())
    }

    fn device_session(&self) -> Option<&dyn DeviceSession> {
        Some(self)
    }
}

#[async_trait]
impl DeviceSession for SpotifyController {
    async fn session_device(&self) -> Result<Option<DeviceInfo>> {
        let playback = self.client.current_playback(None, None::<Vec<_>>).await?;
        Ok(playback.and_then(|p| convert_device(p.device)))
    }

    async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        tracing::debug!("API: get_available_devices");
        let devices: Vec<DeviceInfo> = self
            .client
            .device()
            .await?
            .into_iter()
            .filter_map(convert_device)
            .collect();
        tracing::debug!(count = devices.len(), "Found devices");
        Ok(devices)
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        crate::log_api_request!("transfer_playback", device_id, play);
        self.client.transfer_playback(device_id, Some(play)).await?;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        tracing::debug!("API: resume_playback");
        self.client.resume_playback(None, None).await?;
        Ok(())
    }
}
