//! State owned by the AI queue orchestrator

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A track placed into the AI queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueuedTrack {
    pub name: String,
    pub artists: String,
    pub uri: String,
}

/// AI queue session state.
///
/// Every uri ever pushed into `queue` is also in `played_uris`; that set only
/// grows until the session is reset.
#[derive(Clone, Debug, Default)]
pub struct AiQueueState {
    pub is_active: bool,
    pub is_loading: bool,
    pub queue: Vec<QueuedTrack>,
    pub current_index: usize,
    pub error: Option<String>,
    pub cached_user_profile: Option<String>,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub played_uris: HashSet<String>,
    /// Bumped whenever a session ends, so work started for an earlier
    /// session can tell it has been superseded.
    pub session: u64,
}

impl AiQueueState {
    /// Drop everything belonging to the current session and move on to the next.
    pub fn reset(&mut self) {
        *self = Self {
            session: self.session.wrapping_add(1),
            ..Self::default()
        };
    }

    /// Replace the queue with a fresh batch and rewind the cursor.
    pub fn set_queue(&mut self, queue: Vec<QueuedTrack>) {
        self.played_uris.extend(queue.iter().map(|t| t.uri.clone()));
        self.queue = queue;
        self.current_index = 0;
    }

    pub fn append(&mut self, tracks: &[QueuedTrack]) {
        self.played_uris.extend(tracks.iter().map(|t| t.uri.clone()));
        self.queue.extend_from_slice(tracks);
    }

    pub fn mark_played(&mut self, uri: &str) {
        self.played_uris.insert(uri.to_string());
    }

    pub fn has_played(&self, uri: &str) -> bool {
        self.played_uris.contains(uri)
    }

    pub fn position_of(&self, uri: &str) -> Option<usize> {
        self.queue.iter().position(|t| t.uri == uri)
    }

    /// Tracks left ahead of the cursor.
    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.current_index + 1)
    }

    pub fn set_cached_profile(&mut self, profile: String, now: DateTime<Utc>) {
        self.cached_user_profile = Some(profile);
        self.last_fetch_time = Some(now);
    }

    /// Cached taste summary if it is younger than `ttl`.
    pub fn fresh_profile(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> Option<&str> {
        let fetched = self.last_fetch_time?;
        if now - fetched < ttl {
            self.cached_user_profile.as_deref()
        } else {
            None
        }
    }
}
