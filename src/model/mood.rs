//! Session-only mood used to bias AI queue generation

use std::sync::Arc;
use tokio::sync::RwLock;

/// The mood the user asked for, if any. Set when a mood request starts and
/// cleared when the AI queue stops; never persisted.
#[derive(Clone, Default)]
pub struct MoodContext {
    mood: Arc<RwLock<Option<String>>>,
}

impl MoodContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, mood: Option<String>) {
        let mood = mood.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        *self.mood.write().await = mood;
    }

    pub async fn get(&self) -> Option<String> {
        self.mood.read().await.clone()
    }

    pub async fn clear(&self) {
        *self.mood.write().await = None;
    }
}
