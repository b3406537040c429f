//! YouTube Data API v3 client
//!
//! Requests are authorised with the access token the host's sign-in flow
//! writes to disk. A 401 reloads the token file once and retries.

use std::path::{Path, PathBuf};

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::model::{Album, AlbumImage, Artist, ProviderTag, Track};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const DEFAULT_TOKEN_FILE: &str = ".cache/youtube_tokens.json";
/// Music category id used to restrict searches.
const MUSIC_CATEGORY: &str = "10";
/// Treat tokens this close to expiry as stale.
const TOKEN_BUFFER_SECS: i64 = 60;

/// Tokens written by the host's YouTube sign-in flow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YouTubeTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp, seconds.
    pub expires_at: i64,
}

impl YouTubeTokens {
    fn is_fresh(&self, buffer_secs: i64) -> bool {
        Utc::now().timestamp() < self.expires_at - buffer_secs
    }
}

/// On-disk location of the YouTube tokens
#[derive(Clone, Debug)]
pub struct YouTubeTokenFile {
    path: PathBuf,
}

impl YouTubeTokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<YouTubeTokens> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|_| {
            EngineError::AuthenticationFailure(format!(
                "no YouTube tokens at {}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::AuthenticationFailure(format!("unreadable YouTube tokens: {}", e)))
    }

    pub async fn has_valid(&self) -> bool {
        self.load().await.is_ok_and(|tokens| tokens.is_fresh(0))
    }

    pub async fn clear(&self) {
        if tokio::fs::remove_file(&self.path).await.is_ok() {
            tracing::info!(path = %self.path.display(), "Removed YouTube tokens");
        }
    }
}

impl Default for YouTubeTokenFile {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_FILE)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: VideoRef,
}

/// Search results nest the id, video listings do not.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VideoRef {
    Plain(String),
    Nested {
        #[serde(rename = "videoId")]
        video_id: String,
    },
}

impl VideoRef {
    fn into_id(self) -> String {
        match self {
            VideoRef::Plain(id) => id,
            VideoRef::Nested { video_id } => video_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VideoItem {
    id: String,
    snippet: Snippet,
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    maxres: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(&self) -> Option<&Thumbnail> {
        self.maxres
            .as_ref()
            .or(self.high.as_ref())
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

/// Parse an ISO-8601 duration such as `PT1H2M3S` into milliseconds.
/// Anything unparseable or out of range counts as unknown (0).
pub fn parse_iso_duration(duration: &str) -> u64 {
    let Some(rest) = duration.strip_prefix("PT") else {
        return 0;
    };

    let mut total_secs = 0u64;
    let mut digits = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let Ok(value) = digits.parse::<u64>() else {
            return 0;
        };
        digits.clear();
        let unit_secs = match c {
            'H' => 3600,
            'M' => 60,
            'S' => 1,
            _ => return 0,
        };
        let Some(total) = value
            .checked_mul(unit_secs)
            .and_then(|secs| total_secs.checked_add(secs))
        else {
            return 0;
        };
        total_secs = total;
    }
    if !digits.is_empty() {
        return 0;
    }
    total_secs.checked_mul(1000).unwrap_or(0)
}

pub(crate) fn video_to_track(item: VideoItem) -> Track {
    let duration_ms = item
        .content_details
        .as_ref()
        .map(|d| parse_iso_duration(&d.duration))
        .unwrap_or_default();
    let images = item
        .snippet
        .thumbnails
        .best()
        .map(|thumb| AlbumImage {
            url: thumb.url.clone(),
            width: thumb.width,
            height: thumb.height,
        })
        .into_iter()
        .collect();

    Track {
        uri: ProviderTag::YouTube.track_uri(&item.id),
        id: item.id,
        name: item.snippet.title,
        duration_ms,
        artists: vec![Artist {
            id: "yt-artist-0".to_string(),
            name: item.snippet.channel_title,
        }],
        album: youtube_album(images),
        provider: ProviderTag::YouTube,
    }
}

pub(crate) fn youtube_album(images: Vec<AlbumImage>) -> Album {
    Album {
        id: "youtube-music".to_string(),
        name: "YouTube Music".to_string(),
        images,
    }
}

pub struct YouTubeClient {
    http: reqwest::Client,
    tokens: YouTubeTokenFile,
    cached: RwLock<Option<YouTubeTokens>>,
}

impl YouTubeClient {
    pub fn new(tokens: YouTubeTokenFile) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            cached: RwLock::new(None),
        }
    }

    pub fn token_file(&self) -> &YouTubeTokenFile {
        &self.tokens
    }

    pub async fn forget_tokens(&self) {
        *self.cached.write().await = None;
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(tokens) = self.cached.read().await.as_ref() {
            if tokens.is_fresh(TOKEN_BUFFER_SECS) {
                return Ok(tokens.access_token.clone());
            }
        }
        let tokens = self.tokens.load().await?;
        let access_token = tokens.access_token.clone();
        *self.cached.write().await = Some(tokens);
        Ok(access_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", API_BASE, endpoint);
        crate::log_api_request!(endpoint, url = %url);

        let token = self.access_token().await?;
        let mut response = self.http.get(&url).query(query).bearer_auth(&token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(endpoint, "YouTube token rejected, reloading");
            self.forget_tokens().await;
            let token = self.access_token().await?;
            response = self.http.get(&url).query(query).bearer_auth(&token).send().await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::from_status(status.as_u16(), format!("YouTube {}", endpoint)));
        }
        Ok(response.json::<T>().await?)
    }

    async fn videos_by_id(&self, ids: &[String]) -> Result<Vec<VideoItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let response: VideoListResponse = self
            .get_json("videos", &[("part", "snippet,contentDetails"), ("id", &joined)])
            .await?;
        Ok(response.items)
    }

    async fn search_ids(&self, params: &[(&str, &str)]) -> Result<Vec<String>> {
        let response: SearchResponse = self.get_json("search", params).await?;
        Ok(response.items.into_iter().map(|item| item.id.into_id()).collect())
    }

    /// Music videos matching `query`, with durations filled in.
    pub async fn search_videos(&self, query: &str, max_results: u32) -> Result<Vec<Track>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let max = max_results.to_string();
        let ids = self
            .search_ids(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("videoCategoryId", MUSIC_CATEGORY),
                ("maxResults", &max),
            ])
            .await?;
        let videos = self.videos_by_id(&ids).await?;
        Ok(videos.into_iter().map(video_to_track).collect())
    }

    pub async fn video_details(&self, video_id: &str) -> Result<Option<Track>> {
        let videos = self.videos_by_id(&[video_id.to_string()]).await?;
        Ok(videos.into_iter().next().map(video_to_track))
    }

    /// Videos related to `video_id`. Lookup failures yield an empty list.
    pub async fn related_videos(&self, video_id: &str, max_results: u32) -> Vec<Track> {
        let max = max_results.to_string();
        let result = async {
            let ids = self
                .search_ids(&[
                    ("part", "snippet"),
                    ("relatedToVideoId", video_id),
                    ("type", "video"),
                    ("videoCategoryId", MUSIC_CATEGORY),
                    ("maxResults", &max),
                ])
                .await?;
            self.videos_by_id(&ids).await
        }
        .await;

        match result {
            Ok(videos) => videos.into_iter().map(video_to_track).collect(),
            Err(e) => {
                tracing::debug!(video_id, error = %e, "Related videos unavailable");
                Vec::new()
            }
        }
    }
}
