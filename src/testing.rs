//! Test doubles shared by the unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{EngineError, Result};
use crate::model::{parse_uri, Album, Artist, DeviceInfo, DeviceKind, PlaybackState, ProviderTag, Track};
use crate::provider::{ArtistProfile, DeviceSession, EndOfTrackPolicy, MusicProvider, ProviderCapabilities};
use crate::suggest::{SuggestionModel, SuggestionRequest};

pub fn named_track(tag: ProviderTag, id: &str, name: &str, artist: &str, duration_ms: u64) -> Track {
    Track {
        id: id.to_string(),
        name: name.to_string(),
        duration_ms,
        artists: vec![Artist {
            id: format!("artist-{}", id),
            name: artist.to_string(),
        }],
        album: Album {
            id: format!("album-{}", id),
            name: format!("Album {}", id),
            images: Vec::new(),
        },
        uri: tag.track_uri(id),
        provider: tag,
    }
}

pub fn track(tag: ProviderTag, id: &str, duration_ms: u64) -> Track {
    named_track(tag, id, &format!("Song {}", id), &format!("Artist {}", id), duration_ms)
}

pub fn device(id: &str, kind: DeviceKind, is_active: bool) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        name: format!("Device {}", id),
        is_active,
        kind,
    }
}

/// Scriptable in-memory backend.
///
/// Spotify-tagged fakes behave like a native-queue backend with device
/// sessions; YouTube-tagged fakes like a local-queue backend.
pub struct FakeProvider {
    tag: ProviderTag,
    capabilities: ProviderCapabilities,
    playback: Mutex<Option<PlaybackState>>,
    search_results: Mutex<HashMap<String, Vec<Track>>>,
    recommendations: Mutex<Vec<Track>>,
    related: Mutex<Vec<Track>>,
    upcoming: Mutex<Vec<Track>>,
    recent: Mutex<Vec<Track>>,
    top_artists: Mutex<Vec<ArtistProfile>>,
    session_device: Mutex<Option<DeviceInfo>>,
    devices: Mutex<Vec<DeviceInfo>>,
    transfer_activates: Mutex<bool>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(tag: ProviderTag) -> Self {
        let capabilities = match tag {
            ProviderTag::Spotify => ProviderCapabilities {
                has_playlists: true,
                has_queue: true,
                has_external_playback: true,
                has_liked_songs: true,
            },
            ProviderTag::YouTube => ProviderCapabilities {
                has_playlists: true,
                ..ProviderCapabilities::default()
            },
        };
        Self {
            tag,
            capabilities,
            playback: Mutex::new(None),
            search_results: Mutex::new(HashMap::new()),
            recommendations: Mutex::new(Vec::new()),
            related: Mutex::new(Vec::new()),
            upcoming: Mutex::new(Vec::new()),
            recent: Mutex::new(Vec::new()),
            top_artists: Mutex::new(Vec::new()),
            session_device: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
            transfer_activates: Mutex::new(false),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_playback(&self, track: Option<Track>, progress_ms: u64, is_playing: bool) {
        *self.playback.lock().unwrap() = Some(PlaybackState {
            is_playing,
            progress_ms,
            track,
        });
    }

    pub fn clear_playback(&self) {
        *self.playback.lock().unwrap() = None;
    }

    pub fn on_search(&self, query: &str, results: Vec<Track>) {
        self.search_results
            .lock()
            .unwrap()
            .insert(query.to_string(), results);
    }

    pub fn set_recommendations(&self, tracks: Vec<Track>) {
        *self.recommendations.lock().unwrap() = tracks;
    }

    pub fn set_related(&self, tracks: Vec<Track>) {
        *self.related.lock().unwrap() = tracks;
    }

    pub fn set_upcoming(&self, tracks: Vec<Track>) {
        *self.upcoming.lock().unwrap() = tracks;
    }

    pub fn set_recent(&self, tracks: Vec<Track>) {
        *self.recent.lock().unwrap() = tracks;
    }

    pub fn set_top_artists(&self, artists: Vec<ArtistProfile>) {
        *self.top_artists.lock().unwrap() = artists;
    }

    pub fn set_session_device(&self, device: Option<DeviceInfo>) {
        *self.session_device.lock().unwrap() = device;
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        *self.devices.lock().unwrap() = devices;
    }

    /// Make a transfer immediately show up as the session device.
    pub fn transfer_activates_device(&self, activates: bool) {
        *self.transfer_activates.lock().unwrap() = activates;
    }

    /// Make `operation` fail with a transient network error.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn heal(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{} ", operation);
        self.calls()
            .into_iter()
            .filter(|c| c == operation || c.starts_with(&prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing.lock().unwrap().contains(operation) {
            Err(EngineError::TransientNetwork(format!("{} failed", operation)))
        } else {
            Ok(())
        }
    }

    fn known_track(&self, uri: &str) -> Track {
        let catalog = self.search_results.lock().unwrap();
        let related = self.related.lock().unwrap();
        let found = catalog
            .values()
            .flatten()
            .chain(related.iter())
            .find(|t| t.uri == uri)
            .cloned();
        found.unwrap_or_else(|| {
            let id = parse_uri(uri).map(|(_, id)| id).unwrap_or(uri);
            track(self.tag, id, 200_000)
        })
    }
}

#[async_trait]
impl MusicProvider for FakeProvider {
    fn tag(&self) -> ProviderTag {
        self.tag
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn end_of_track_policy(&self) -> EndOfTrackPolicy {
        match self.tag {
            ProviderTag::Spotify => EndOfTrackPolicy {
                window_ms: 10_000,
                requires_stopped: false,
            },
            ProviderTag::YouTube => EndOfTrackPolicy {
                window_ms: 2_000,
                requires_stopped: true,
            },
        }
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        self.record("connect".into());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record("disconnect".into());
        Ok(())
    }

    async fn get_current_track(&self) -> Result<Option<Track>> {
        self.check("get_current_track")?;
        Ok(self
            .playback
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.track.clone()))
    }

    async fn get_playback_state(&self) -> Result<Option<PlaybackState>> {
        self.check("get_playback_state")?;
        Ok(self.playback.lock().unwrap().clone())
    }

    fn play(&self) {
        self.record("play".into());
    }

    fn pause(&self) {
        self.record("pause".into());
    }

    fn next_track(&self) {
        self.record("next_track".into());
    }

    fn previous_track(&self) {
        self.record("previous_track".into());
    }

    fn seek(&self, position_ms: u64) {
        self.record(format!("seek {}", position_ms));
    }

    fn set_volume(&self, volume_percent: u8) {
        self.record(format!("set_volume {}", volume_percent));
    }

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<Track>> {
        self.check("search_tracks")?;
        self.record(format!("search_tracks {}", query));
        Ok(self
            .search_results
            .lock()
            .unwrap()
            .get(query)
            .map(|results| results.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn play_track(&self, uri: &str) -> Result<()> {
        self.check("play_track")?;
        self.record(format!("play_track {}", uri));
        let track = self.known_track(uri);
        self.set_playback(Some(track), 0, true);
        Ok(())
    }

    async fn play_tracks(&self, uris: &[String]) -> Result<()> {
        self.check("play_tracks")?;
        self.record(format!("play_tracks {}", uris.join(",")));
        if let Some(first) = uris.first() {
            let track = self.known_track(first);
            self.set_playback(Some(track), 0, true);
        }
        Ok(())
    }

    async fn add_to_queue(&self, uri: &str) -> Result<()> {
        self.check("add_to_queue")?;
        self.record(format!("add_to_queue {}", uri));
        Ok(())
    }

    async fn get_recently_played(&self, limit: u32) -> Result<Vec<Track>> {
        self.check("get_recently_played")?;
        Ok(self
            .recent
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn upcoming_queue(&self) -> Result<Vec<Track>> {
        if !self.capabilities.has_queue {
            return Err(EngineError::not_supported("upcoming_queue", self.tag));
        }
        self.check("upcoming_queue")?;
        Ok(self.upcoming.lock().unwrap().clone())
    }

    async fn recommendations(&self, seed: &Track, limit: u32) -> Result<Vec<Track>> {
        self.check("recommendations")?;
        self.record(format!("recommendations {}", seed.id));
        Ok(self
            .recommendations
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn related_tracks(&self, seed: &Track, limit: u32) -> Result<Vec<Track>> {
        self.check("related_tracks")?;
        self.record(format!("related_tracks {}", seed.id));
        Ok(self
            .related
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn top_artists(&self, limit: u32) -> Result<Vec<ArtistProfile>> {
        self.check("top_artists")?;
        Ok(self
            .top_artists
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn device_session(&self) -> Option<&dyn DeviceSession> {
        match self.tag {
            ProviderTag::Spotify => Some(self),
            ProviderTag::YouTube => None,
        }
    }
}

#[async_trait]
impl DeviceSession for FakeProvider {
    async fn session_device(&self) -> Result<Option<DeviceInfo>> {
        self.check("session_device")?;
        Ok(self.session_device.lock().unwrap().clone())
    }

    async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.check("devices")?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        self.check("transfer_playback")?;
        self.record(format!("transfer_playback {} {}", device_id, play));
        if *self.transfer_activates.lock().unwrap() {
            let device = self
                .devices
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.id == device_id)
                .cloned()
                .map(|d| DeviceInfo { is_active: true, ..d });
            *self.session_device.lock().unwrap() = device;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.check("resume")?;
        self.record("resume".into());
        Ok(())
    }
}

/// Suggestion model that replays canned responses in order.
/// Once the script runs out it answers with an empty list.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<SuggestionRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: impl Into<String>) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(response.into()));
        self
    }

    pub fn fail_with(&self, error: EngineError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<SuggestionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Park the next generation after it is recorded, until the returned
    /// handle is notified. The response is taken once it resumes.
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl SuggestionModel for ScriptedModel {
    async fn generate(&self, request: &SuggestionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}
