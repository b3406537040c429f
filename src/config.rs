//! Settings document shared with the host application

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::model::ProviderTag;

const DEFAULT_SETTINGS_FILE: &str = ".config/settings.json";
const SETTINGS_PATH_ENV: &str = "PLAYFLOW_SETTINGS";

/// Text-generation services the AI queue can use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Groq,
}

impl AiProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AiProviderKind::OpenAi => "openai",
            AiProviderKind::Anthropic => "anthropic",
            AiProviderKind::Google => "google",
            AiProviderKind::Groq => "groq",
        }
    }

    /// Environment variable holding the API key, e.g. `PLAYFLOW_OPENAI_API_KEY`.
    pub fn api_key_var(self) -> String {
        format!("PLAYFLOW_{}_API_KEY", self.as_str().to_uppercase())
    }

    pub fn api_key(self) -> Option<String> {
        std::env::var(self.api_key_var())
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl fmt::Display for AiProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProviderKind {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(AiProviderKind::OpenAi),
            "anthropic" => Ok(AiProviderKind::Anthropic),
            "google" => Ok(AiProviderKind::Google),
            "groq" => Ok(AiProviderKind::Groq),
            other => Err(EngineError::Settings(format!("unknown AI provider '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiProviderConfig {
    pub provider: AiProviderKind,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_music_provider")]
    pub active_music_provider: Option<ProviderTag>,
    #[serde(default)]
    pub ai_providers: Vec<AiProviderConfig>,
    #[serde(default)]
    pub active_ai_provider: Option<AiProviderKind>,
    #[serde(default = "default_true")]
    pub autoplay_enabled: bool,
    #[serde(default = "default_true")]
    pub keep_alive_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_music_provider() -> Option<ProviderTag> {
    Some(ProviderTag::Spotify)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            active_music_provider: default_music_provider(),
            ai_providers: Vec::new(),
            active_ai_provider: None,
            autoplay_enabled: true,
            keep_alive_enabled: true,
        }
    }
}

impl Settings {
    pub fn music_provider(&self) -> ProviderTag {
        self.active_music_provider.unwrap_or_default()
    }

    /// The selected AI provider, if it is configured and enabled.
    pub fn active_ai(&self) -> Option<&AiProviderConfig> {
        let active = self.active_ai_provider?;
        self.ai_providers
            .iter()
            .find(|p| p.provider == active && p.enabled)
    }
}

/// Read/write access to the persisted settings document
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn read(&self) -> Settings;
    async fn write(&self, settings: &Settings) -> Result<()>;
}

/// Settings stored as pretty-printed JSON on disk
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$PLAYFLOW_SETTINGS`, or `.config/settings.json`.
    pub fn from_env() -> Self {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn read(&self) -> Settings {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Settings file unreadable, using defaults");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    async fn write(&self, settings: &Settings) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| EngineError::Settings(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| EngineError::Settings(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| EngineError::Settings(e.to_string()))?;
        tracing::debug!(path = %self.path.display(), "Settings written");
        Ok(())
    }
}

/// In-memory settings, for embedding and tests
#[derive(Clone, Default)]
pub struct MemorySettingsStore {
    settings: Arc<RwLock<Settings>>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn read(&self) -> Settings {
        self.settings.read().await.clone()
    }

    async fn write(&self, settings: &Settings) -> Result<()> {
        *self.settings.write().await = settings.clone();
        Ok(())
    }
}
