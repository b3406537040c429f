//! Canonical track representation shared by every backend

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Identifies one of the interchangeable streaming backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    #[default]
    Spotify,
    #[serde(rename = "youtube")]
    YouTube,
}

impl ProviderTag {
    pub const ALL: [ProviderTag; 2] = [ProviderTag::Spotify, ProviderTag::YouTube];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::Spotify => "spotify",
            ProviderTag::YouTube => "youtube",
        }
    }

    fn uri_prefix(self) -> &'static str {
        match self {
            ProviderTag::Spotify => "spotify:track:",
            ProviderTag::YouTube => "youtube:video:",
        }
    }

    /// Build the backend-qualified uri for a native track id.
    pub fn track_uri(self, id: &str) -> String {
        format!("{}{}", self.uri_prefix(), id)
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spotify" => Ok(ProviderTag::Spotify),
            "youtube" => Ok(ProviderTag::YouTube),
            other => Err(EngineError::UnknownProvider(other.to_string())),
        }
    }
}

/// Split a backend-qualified uri into its provider and native id.
pub fn parse_uri(uri: &str) -> Option<(ProviderTag, &str)> {
    ProviderTag::ALL.into_iter().find_map(|tag| {
        uri.strip_prefix(tag.uri_prefix())
            .filter(|id| !id.is_empty())
            .map(|id| (tag, id))
    })
}

pub fn provider_from_uri(uri: &str) -> Option<ProviderTag> {
    parse_uri(uri).map(|(tag, _)| tag)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub images: Vec<AlbumImage>,
}

/// A playable track as produced by a provider adapter. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub duration_ms: u64,
    pub artists: Vec<Artist>,
    pub album: Album,
    pub uri: String,
    pub provider: ProviderTag,
}

impl Track {
    pub fn artist_names(&self) -> Vec<&str> {
        self.artists.iter().map(|a| a.name.as_str()).collect()
    }

    /// All artist names joined the way they are shown and sent to the suggestion model.
    pub fn joined_artists(&self) -> String {
        self.artist_names().join(", ")
    }

    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(|a| a.name.as_str()).unwrap_or_default()
    }
}

/// Snapshot of what a provider reports as currently playing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub progress_ms: u64,
    pub track: Option<Track>,
}

impl PlaybackState {
    /// Milliseconds left in the current track, if its duration is known.
    pub fn remaining_ms(&self) -> Option<u64> {
        let track = self.track.as_ref()?;
        if track.duration_ms == 0 {
            return None;
        }
        Some(track.duration_ms.saturating_sub(self.progress_ms))
    }

    /// True when the current track is within `window_ms` of its end.
    pub fn is_near_end(&self, window_ms: u64) -> bool {
        self.remaining_ms().is_some_and(|remaining| remaining <= window_ms)
    }
}
