//! Ordered playback queue used when a backend has no native queue

use std::sync::Arc;
use tokio::sync::RwLock;

use super::track::{ProviderTag, Track};

/// Queue contents and cursor.
///
/// `current_index` is `None` only while `tracks` is empty. Played tracks are
/// never removed so the UI can look back through the session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackQueueState {
    pub tracks: Vec<Track>,
    pub current_index: Option<usize>,
    pub playlist_id: Option<String>,
    pub provider: Option<ProviderTag>,
    pub is_playlist_mode: bool,
}

impl PlaybackQueueState {
    pub fn playlist(
        playlist_id: String,
        tracks: Vec<Track>,
        start_index: usize,
        provider: ProviderTag,
    ) -> Self {
        let current_index = if tracks.is_empty() {
            None
        } else {
            Some(start_index.min(tracks.len() - 1))
        };
        Self {
            tracks,
            current_index,
            playlist_id: Some(playlist_id),
            provider: Some(provider),
            is_playlist_mode: true,
        }
    }

    pub fn single(track: Track, provider: ProviderTag) -> Self {
        Self {
            tracks: vec![track],
            current_index: Some(0),
            playlist_id: None,
            provider: Some(provider),
            is_playlist_mode: false,
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn next_track(&self) -> Option<&Track> {
        let next = self.current_index.map_or(0, |i| i + 1);
        self.tracks.get(next)
    }

    /// Move the cursor forward if a successor exists. Never wraps.
    pub fn advance_to_next(&mut self) -> Option<Track> {
        let next = self.current_index.map_or(0, |i| i + 1);
        let track = self.tracks.get(next)?.clone();
        self.current_index = Some(next);
        Some(track)
    }

    pub fn append_tracks(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
        if self.current_index.is_none() && !self.tracks.is_empty() {
            self.current_index = Some(0);
        }
    }

    pub fn remaining_count(&self) -> usize {
        match self.current_index {
            Some(i) => self.tracks.len().saturating_sub(i + 1),
            None => self.tracks.len(),
        }
    }

    pub fn position_of(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    /// Point the cursor at an existing entry, e.g. after the user picked a track.
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.tracks.len() {
            self.current_index = Some(index);
            true
        } else {
            false
        }
    }

    pub fn is_active(&self) -> bool {
        !self.tracks.is_empty()
    }
}

/// Shared handle to the queue state.
///
/// Every mutation happens under a single write lock so other tasks never see
/// a half-applied change.
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    state: Arc<RwLock<PlaybackQueueState>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> PlaybackQueueState {
        self.state.read().await.clone()
    }

    pub async fn set_playlist_queue(
        &self,
        playlist_id: impl Into<String>,
        tracks: Vec<Track>,
        start_index: usize,
        provider: ProviderTag,
    ) {
        let next = PlaybackQueueState::playlist(playlist_id.into(), tracks, start_index, provider);
        *self.state.write().await = next;
    }

    pub async fn set_single_track(&self, track: Track, provider: ProviderTag) {
        *self.state.write().await = PlaybackQueueState::single(track, provider);
    }

    pub async fn advance_to_next(&self) -> Option<Track> {
        self.state.write().await.advance_to_next()
    }

    pub async fn append_tracks(&self, tracks: Vec<Track>) {
        self.state.write().await.append_tracks(tracks);
    }

    pub async fn remaining_count(&self) -> usize {
        self.state.read().await.remaining_count()
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.state.read().await.current_track().cloned()
    }

    pub async fn next_track(&self) -> Option<Track> {
        self.state.read().await.next_track().cloned()
    }

    /// Move the cursor to the entry with `track_id`. Returns false if it is not queued.
    pub async fn follow(&self, track_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.position_of(track_id) {
            Some(index) => state.select(index),
            None => false,
        }
    }

    pub async fn clear(&self) {
        *self.state.write().await = PlaybackQueueState::default();
    }
}
