//! Provider registry with lazily-constructed, cached controllers

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::SettingsStore;
use crate::error::{EngineError, Result};
use crate::model::ProviderTag;

use super::MusicProvider;

pub type ProviderFactory = Box<dyn Fn() -> Arc<dyn MusicProvider> + Send + Sync>;

pub struct ProviderRegistry {
    factories: RwLock<HashMap<ProviderTag, ProviderFactory>>,
    instances: Mutex<HashMap<ProviderTag, Arc<dyn MusicProvider>>>,
    settings: Arc<dyn SettingsStore>,
}

impl ProviderRegistry {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Register (or replace) the factory for `tag`. A cached instance built
    /// by a previous factory is dropped.
    pub async fn register<F>(&self, tag: ProviderTag, factory: F)
    where
        F: Fn() -> Arc<dyn MusicProvider> + Send + Sync + 'static,
    {
        self.factories.write().await.insert(tag, Box::new(factory));
        self.instances.lock().await.remove(&tag);
        tracing::debug!(provider = %tag, "Provider registered");
    }

    pub async fn registered(&self) -> Vec<ProviderTag> {
        let factories = self.factories.read().await;
        ProviderTag::ALL
            .into_iter()
            .filter(|tag| factories.contains_key(tag))
            .collect()
    }

    pub async fn has(&self, tag: ProviderTag) -> bool {
        self.factories.read().await.contains_key(&tag)
    }

    /// Controller for `tag`, constructed on first use and cached afterwards.
    pub async fn get(&self, tag: ProviderTag) -> Result<Arc<dyn MusicProvider>> {
        let mut instances = self.instances.lock().await;
        if let Some(provider) = instances.get(&tag) {
            return Ok(Arc::clone(provider));
        }

        let factories = self.factories.read().await;
        let factory = factories
            .get(&tag)
            .ok_or_else(|| EngineError::UnknownProvider(tag.to_string()))?;
        let provider = factory();
        instances.insert(tag, Arc::clone(&provider));
        tracing::info!(provider = %tag, "Provider controller constructed");
        Ok(provider)
    }

    /// The user's selected backend, defaulting to Spotify.
    pub async fn active_tag(&self) -> ProviderTag {
        self.settings.read().await.music_provider()
    }

    /// Controller for the currently selected backend. Re-reads the selection
    /// on every call so a settings change takes effect immediately.
    pub async fn active(&self) -> Result<Arc<dyn MusicProvider>> {
        let tag = self.active_tag().await;
        self.get(tag).await
    }

    pub async fn is_authenticated(&self, tag: ProviderTag) -> bool {
        match self.get(tag).await {
            Ok(provider) => provider.is_authenticated().await,
            Err(_) => false,
        }
    }

    pub async fn clear_cache(&self) {
        self.instances.lock().await.clear();
    }
}
