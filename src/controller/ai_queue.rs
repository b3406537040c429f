//! Mood-driven AI queue: generation, resolution, playback and drift monitoring

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rand::distr::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{Mutex, RwLock};

use crate::error::{EngineError, Result};
use crate::model::{AiQueueState, MoodContext, QueuedTrack, Track};
use crate::provider::{MusicProvider, ProviderRegistry};
use crate::suggest::{
    encode_records, parse_suggestions, Suggestion, SuggestionModel, SuggestionRequest,
    SUGGESTIONS_PER_BATCH,
};

use super::scheduler::ScheduledTask;

const DRIFT_TICK: Duration = Duration::from_secs(3);
const TASTE_TTL_MINUTES: i64 = 10;
const RECENT_FETCH_LIMIT: u32 = 30;
const RECENT_SAMPLE_SIZE: usize = 15;
const TOP_ARTIST_LIMIT: u32 = 10;
const GENRES_PER_ARTIST: usize = 3;
const REFILL_THRESHOLD: usize = 2;
const RESOLVE_SEARCH_LIMIT: u32 = 5;
const TITLE_SEARCH_LIMIT: u32 = 3;
const FALLBACK_SEARCH_LIMIT: u32 = 20;
const FALLBACK_QUERIES: [&str; 3] = ["popular tracks", "top hits", "trending music"];
const SEED_LEN: usize = 6;

/// Snapshot returned by [`AiQueueOrchestrator::status`]
#[derive(Clone, Debug)]
pub struct AiQueueStatus {
    pub state: AiQueueState,
    pub mood: Option<String>,
}

pub struct AiQueueOrchestrator {
    registry: Arc<ProviderRegistry>,
    model: Arc<dyn SuggestionModel>,
    mood: MoodContext,
    state: RwLock<AiQueueState>,
    /// Uri of the track the drift monitor last saw or started.
    last_track_uri: Mutex<Option<String>>,
    monitor: ScheduledTask,
}

fn random_seed() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SEED_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

fn shuffled<T>(mut items: Vec<T>) -> Vec<T> {
    items.shuffle(&mut rand::rng());
    items
}

fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Whether a search hit plausibly is the suggested track.
fn matches_suggestion(track: &Track, suggestion: &Suggestion) -> bool {
    track
        .artists
        .iter()
        .any(|artist| overlaps(&artist.name, &suggestion.artist))
        || overlaps(&track.name, &suggestion.name)
}

fn recent_rows(tracks: &[Track]) -> Vec<Vec<String>> {
    tracks
        .iter()
        .map(|t| vec![t.name.clone(), t.joined_artists(), t.uri.clone()])
        .collect()
}

impl AiQueueOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        model: Arc<dyn SuggestionModel>,
        mood: MoodContext,
    ) -> Self {
        Self {
            registry,
            model,
            mood,
            state: RwLock::new(AiQueueState::default()),
            last_track_uri: Mutex::new(None),
            monitor: ScheduledTask::new("ai-queue-drift"),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.is_active
    }

    pub async fn status(&self) -> AiQueueStatus {
        AiQueueStatus {
            state: self.state.read().await.clone(),
            mood: self.mood.get().await,
        }
    }

    /// Start a session. A no-op while one is already active.
    pub async fn start(self: &Arc<Self>, mood: Option<String>) -> Result<()> {
        let session = {
            let mut state = self.state.write().await;
            if state.is_active {
                tracing::debug!("AI queue already active");
                return Ok(());
            }
            // Leftovers of a failed start must not leak into this session
            state.reset();
            state.is_active = true;
            state.session
        };
        if mood.is_some() {
            self.mood.set(mood).await;
        }

        match self.begin_playback(session).await {
            Ok(true) => {
                self.start_monitor();
                let mood = self.mood.get().await;
                tracing::info!(mood = ?mood, session, "AI queue started");
                Ok(())
            }
            Ok(false) => {
                tracing::debug!(session, "AI queue stopped while starting");
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state.write().await;
                    if state.session != session {
                        tracing::debug!(error = %e, session, "Superseded AI queue start failed");
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "AI queue failed to start");
                    state.reset();
                    state.error = Some(e.user_message());
                }
                self.mood.clear().await;
                Err(e)
            }
        }
    }

    /// Generate the first batch and start playing it. Returns false if
    /// `session` was stopped or replaced in the meantime.
    async fn begin_playback(&self, session: u64) -> Result<bool> {
        let provider = self.registry.active().await?;
        let batch = self.fetch_next_batch().await?;

        let first = {
            let mut state = self.state.write().await;
            if !state.is_active || state.session != session {
                return Ok(false);
            }
            let Some(first) = batch.first().map(|t| t.uri.clone()) else {
                return Err(EngineError::NoSuggestionsResolved);
            };
            state.set_queue(batch.clone());
            first
        };

        if provider.capabilities().has_queue {
            let uris: Vec<String> = batch.iter().map(|t| t.uri.clone()).collect();
            provider.play_tracks(&uris).await?;
        } else {
            provider.play_track(&first).await?;
        }

        if self.state.read().await.session != session {
            return Ok(false);
        }
        *self.last_track_uri.lock().await = Some(first);
        Ok(true)
    }

    fn start_monitor(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.monitor.start(DRIFT_TICK, false, move || {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.drift_tick().await;
                }
            }
        });
    }

    /// End the session and reset all AI queue state. Only cancels the
    /// monitor when no session is active.
    pub async fn stop(&self) {
        self.monitor.cancel();
        {
            let mut state = self.state.write().await;
            if !state.is_active {
                return;
            }
            state.reset();
        }
        self.mood.clear().await;
        *self.last_track_uri.lock().await = None;
        tracing::info!("AI queue stopped");
    }

    /// Produce up to five new tracks for the active backend. Returns an empty
    /// batch when another generation is already in flight, or when the
    /// session ended while this one was running.
    pub async fn fetch_next_batch(&self) -> Result<Vec<QueuedTrack>> {
        let session = {
            let mut state = self.state.write().await;
            if state.is_loading {
                tracing::debug!("Batch generation already in flight");
                return Ok(Vec::new());
            }
            state.is_loading = true;
            state.session
        };

        let result = async {
            let provider = self.registry.active().await?;
            self.generate_batch(provider.as_ref()).await
        }
        .await;

        {
            // The loading flag now belongs to a newer session
            let mut state = self.state.write().await;
            if state.session != session {
                tracing::debug!(session, "Discarding batch of an ended session");
                return Ok(Vec::new());
            }
            state.is_loading = false;
        }
        result
    }

    async fn generate_batch(&self, provider: &dyn MusicProvider) -> Result<Vec<QueuedTrack>> {
        let (recent, taste_summary) = futures::join!(
            provider.get_recently_played(RECENT_FETCH_LIMIT),
            self.taste_summary(provider)
        );
        let recent = recent?;
        let recent_uris: HashSet<String> = recent.iter().map(|t| t.uri.clone()).collect();

        let mut sample = shuffled(recent);
        sample.truncate(RECENT_SAMPLE_SIZE);

        let request = SuggestionRequest {
            seed: random_seed(),
            recent_tracks: encode_records(&["n", "a", "u"], &recent_rows(&sample)),
            taste_summary: taste_summary?,
            mood: self.mood.get().await,
        };

        let text = self.model.generate(&request).await?;
        let suggestions = shuffled(parse_suggestions(&text)?);
        tracing::debug!(count = suggestions.len(), "Model returned suggestions");

        let resolved = join_all(suggestions.iter().map(|s| self.resolve(provider, s))).await;

        let mut batch: Vec<QueuedTrack> = Vec::new();
        for (suggestion, uri) in suggestions.iter().zip(resolved) {
            let Some(uri) = uri else {
                continue;
            };
            if self.is_fresh(&uri, &recent_uris, &batch).await {
                batch.push(QueuedTrack {
                    name: suggestion.name.clone(),
                    artists: suggestion.artist.clone(),
                    uri,
                });
            } else {
                tracing::debug!(track_uri = %uri, "Skipping already played suggestion");
            }
        }

        if batch.is_empty() {
            tracing::info!("No suggestion resolved, trying popular tracks");
            batch = self.fallback_batch(provider, &recent_uris).await;
        }
        if batch.is_empty() {
            return Err(EngineError::NoSuggestionsResolved);
        }
        Ok(shuffled(batch))
    }

    async fn is_fresh(&self, uri: &str, recent: &HashSet<String>, batch: &[QueuedTrack]) -> bool {
        !recent.contains(uri)
            && !batch.iter().any(|t| t.uri == uri)
            && !self.state.read().await.has_played(uri)
    }

    /// Compact summary of the listener's favourite artists, cached for ten minutes.
    async fn taste_summary(&self, provider: &dyn MusicProvider) -> Result<String> {
        let now = Utc::now();
        let ttl = chrono::Duration::minutes(TASTE_TTL_MINUTES);
        if let Some(profile) = self.state.read().await.fresh_profile(now, ttl) {
            return Ok(profile.to_string());
        }

        let artists = match provider.top_artists(TOP_ARTIST_LIMIT).await {
            Ok(artists) => artists,
            Err(EngineError::NotSupported { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };

        let rows: Vec<Vec<String>> = if artists.is_empty() {
            vec![vec!["Various Artists".to_string(), "mixed".to_string()]]
        } else {
            shuffled(artists)
                .into_iter()
                .map(|a| {
                    let genres: Vec<&str> = a.genres.iter().take(GENRES_PER_ARTIST).map(String::as_str).collect();
                    vec![a.name, genres.join(", ")]
                })
                .collect()
        };

        let profile = encode_records(&["n", "g"], &rows);
        self.state
            .write()
            .await
            .set_cached_profile(profile.clone(), now);
        Ok(profile)
    }

    /// Find a playable uri for a suggestion on the active backend.
    async fn resolve(&self, provider: &dyn MusicProvider, suggestion: &Suggestion) -> Option<String> {
        let query = format!("{} {}", suggestion.name, suggestion.artist);
        let results = match provider.search_tracks(query.trim(), RESOLVE_SEARCH_LIMIT).await {
            Ok(results) => results,
            Err(e) => {
                tracing::debug!(query = %query, error = %e, "Suggestion search failed");
                return None;
            }
        };

        if let Some(hit) = results.iter().find(|t| matches_suggestion(t, suggestion)) {
            return Some(hit.uri.clone());
        }
        if let Some(first) = results.first() {
            return Some(first.uri.clone());
        }

        match provider.search_tracks(&suggestion.name, TITLE_SEARCH_LIMIT).await {
            Ok(results) => results.first().map(|t| t.uri.clone()),
            Err(e) => {
                tracing::debug!(title = %suggestion.name, error = %e, "Title search failed");
                None
            }
        }
    }

    async fn fallback_batch(&self, provider: &dyn MusicProvider, recent: &HashSet<String>) -> Vec<QueuedTrack> {
        let mut batch = Vec::new();
        for query in shuffled(FALLBACK_QUERIES.to_vec()) {
            let results = match provider.search_tracks(query, FALLBACK_SEARCH_LIMIT).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::debug!(query, error = %e, "Fallback search failed");
                    continue;
                }
            };

            for track in shuffled(results) {
                if self.is_fresh(&track.uri, recent, &batch).await {
                    batch.push(QueuedTrack {
                        artists: track.joined_artists(),
                        name: track.name,
                        uri: track.uri,
                    });
                }
                if batch.len() >= SUGGESTIONS_PER_BATCH {
                    break;
                }
            }
            if !batch.is_empty() {
                break;
            }
        }
        batch
    }

    async fn drift_tick(&self) {
        if !self.is_active().await {
            return;
        }

        let provider = match self.registry.active().await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "No active provider for AI queue");
                return;
            }
        };

        let playback = match provider.get_playback_state().await {
            Ok(playback) => playback,
            Err(EngineError::AuthenticationFailure(msg)) => {
                tracing::error!(error = %msg, "Authentication lost, stopping AI queue");
                self.stop().await;
                self.state.write().await.error =
                    Some(EngineError::AuthenticationFailure(msg).user_message());
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Queue monitor could not read playback");
                return;
            }
        };
        let Some(playback) = playback else {
            return;
        };

        if !provider.capabilities().has_queue
            && provider.end_of_track_policy().is_ending(&playback)
            && self.advance_local(provider.as_ref()).await
        {
            return;
        }

        let Some(current_uri) = playback.track.as_ref().map(|t| t.uri.clone()) else {
            return;
        };
        {
            let mut last = self.last_track_uri.lock().await;
            if last.as_deref() == Some(current_uri.as_str()) {
                return;
            }
            *last = Some(current_uri.clone());
        }

        let needs_refill = {
            let mut state = self.state.write().await;
            if !state.is_active {
                return;
            }
            let position = state.position_of(&current_uri);
            if position.is_none() && !state.has_played(&current_uri) {
                drop(state);
                tracing::info!(track_uri = %current_uri, "Manual track change detected, stopping AI queue");
                self.stop().await;
                return;
            }

            state.mark_played(&current_uri);
            match position {
                Some(index) => {
                    state.current_index = index;
                    state.remaining() <= REFILL_THRESHOLD && !state.is_loading
                }
                None => false,
            }
        };

        if needs_refill {
            self.refill(provider.as_ref()).await;
        }
    }

    /// Start the queued successor of the last started track on a backend
    /// without its own queue. Returns true if one was started.
    async fn advance_local(&self, provider: &dyn MusicProvider) -> bool {
        let Some(last_uri) = self.last_track_uri.lock().await.clone() else {
            return false;
        };
        let next = {
            let state = self.state.read().await;
            state
                .position_of(&last_uri)
                .and_then(|index| state.queue.get(index + 1).map(|t| (index + 1, t.uri.clone())))
        };
        let Some((index, uri)) = next else {
            return false;
        };

        if let Err(e) = provider.play_track(&uri).await {
            tracing::warn!(track_uri = %uri, error = %e, "Could not start next queued track");
            return false;
        }

        {
            let mut state = self.state.write().await;
            if !state.is_active {
                return true;
            }
            state.current_index = index;
            state.mark_played(&uri);
        }
        *self.last_track_uri.lock().await = Some(uri.clone());
        tracing::debug!(track_uri = %uri, index, "Advanced AI queue");
        true
    }

    async fn refill(&self, provider: &dyn MusicProvider) {
        let session = self.state.read().await.session;
        let batch = match self.fetch_next_batch().await {
            Ok(batch) if batch.is_empty() => return,
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch next batch");
                return;
            }
        };

        {
            let mut state = self.state.write().await;
            if !state.is_active || state.session != session {
                return;
            }
            state.append(&batch);
        }
        tracing::info!(count = batch.len(), "AI queue refilled");

        if provider.capabilities().has_queue {
            for track in &batch {
                if let Err(e) = provider.add_to_queue(&track.uri).await {
                    tracing::warn!(track_uri = %track.uri, error = %e, "Could not enqueue track");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemorySettingsStore, Settings};
    use crate::model::ProviderTag;
    use crate::provider::ArtistProfile;
    use crate::testing::{named_track, track, FakeProvider, ScriptedModel};

    const FIVE: &str = r#"Here are some picks:
[{"n":"One","a":"A1"},{"n":"Two","a":"A2"},{"n":"Three","a":"A3"},{"n":"Four","a":"A4"},{"n":"Five","a":"A5"}]"#;

    struct Harness {
        provider: Arc<FakeProvider>,
        model: Arc<ScriptedModel>,
        ai: Arc<AiQueueOrchestrator>,
        mood: MoodContext,
    }

    async fn harness(tag: ProviderTag) -> Harness {
        let store = MemorySettingsStore::new(Settings {
            active_music_provider: Some(tag),
            ..Settings::default()
        });
        let registry = Arc::new(ProviderRegistry::new(Arc::new(store)));
        let provider = Arc::new(FakeProvider::new(tag));
        let shared = Arc::clone(&provider);
        registry
            .register(tag, move || Arc::clone(&shared) as Arc<dyn MusicProvider>)
            .await;

        for (i, name) in ["One", "Two", "Three", "Four", "Five"].iter().enumerate() {
            let artist = format!("A{}", i + 1);
            let id = name.to_lowercase();
            provider.on_search(
                &format!("{} {}", name, artist),
                vec![named_track(tag, &id, name, &artist, 200_000)],
            );
        }

        let model = Arc::new(ScriptedModel::new());
        let mood = MoodContext::default();
        let ai = Arc::new(AiQueueOrchestrator::new(
            registry,
            Arc::clone(&model) as Arc<dyn SuggestionModel>,
            mood.clone(),
        ));
        Harness {
            provider,
            model,
            ai,
            mood,
        }
    }

    fn uri(tag: ProviderTag, id: &str) -> String {
        tag.track_uri(id)
    }

    #[tokio::test]
    async fn start_plays_the_whole_batch_on_native_queue_backends() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);

        h.ai.start(Some("late night drive".into())).await.unwrap();

        let status = h.ai.status().await;
        assert!(status.state.is_active);
        assert!(!status.state.is_loading);
        assert_eq!(status.state.queue.len(), 5);
        assert_eq!(status.mood.as_deref(), Some("late night drive"));
        for queued in &status.state.queue {
            assert!(status.state.has_played(&queued.uri));
        }

        let plays = h.provider.calls_to("play_tracks");
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].matches("spotify:track:").count(), 5);

        let request = &h.model.requests()[0];
        assert_eq!(request.mood.as_deref(), Some("late night drive"));
        assert_eq!(request.seed.len(), SEED_LEN);
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn start_is_a_no_op_while_active() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.start(None).await.unwrap();
        h.ai.start(Some("ignored".into())).await.unwrap();

        assert_eq!(h.model.requests().len(), 1);
        assert_eq!(h.mood.get().await, None);
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn already_played_suggestions_are_dropped() {
        let h = harness(ProviderTag::Spotify).await;
        {
            let mut state = h.ai.state.write().await;
            state.mark_played(&uri(ProviderTag::Spotify, "one"));
            state.mark_played(&uri(ProviderTag::Spotify, "two"));
        }
        h.model.respond(FIVE);

        let batch = h.ai.fetch_next_batch().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|t| !t.uri.ends_with(":one") && !t.uri.ends_with(":two")));
    }

    #[tokio::test]
    async fn recently_played_tracks_are_excluded() {
        let h = harness(ProviderTag::Spotify).await;
        h.provider.set_recent(vec![named_track(ProviderTag::Spotify, "three", "Three", "A3", 1)]);
        h.model.respond(FIVE);

        let batch = h.ai.fetch_next_batch().await.unwrap();
        assert_eq!(batch.len(), 4);
        assert!(!batch.iter().any(|t| t.uri == uri(ProviderTag::Spotify, "three")));
    }

    #[tokio::test]
    async fn unresolvable_suggestions_fall_back_to_popular_tracks() {
        let h = harness(ProviderTag::YouTube).await;
        h.model.respond(r#"[{"n":"Nowhere","a":"Nobody"}]"#);
        for query in FALLBACK_QUERIES {
            h.provider.on_search(
                query,
                (0..8).map(|i| track(ProviderTag::YouTube, &format!("pop{}", i), 1)).collect(),
            );
        }

        let batch = h.ai.fetch_next_batch().await.unwrap();
        assert_eq!(batch.len(), SUGGESTIONS_PER_BATCH);
        assert!(batch.iter().all(|t| t.uri.starts_with("youtube:video:pop")));
    }

    #[tokio::test]
    async fn nothing_resolvable_is_no_suggestions_resolved() {
        let h = harness(ProviderTag::YouTube).await;
        h.model.respond(r#"[{"n":"Nowhere","a":"Nobody"}]"#);

        let err = h.ai.start(Some("polka".into())).await.unwrap_err();
        assert_eq!(err, EngineError::NoSuggestionsResolved);

        let status = h.ai.status().await;
        assert!(!status.state.is_active);
        assert_eq!(status.state.error.as_deref(), Some("Could not find any new tracks to play"));
        assert_eq!(status.mood, None);
    }

    #[tokio::test]
    async fn malformed_model_output_fails_the_start() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond("Sorry, I can't do that.");

        let err = h.ai.start(None).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedSuggestion(_)));
        assert!(!h.ai.is_active().await);
        assert!(!h.ai.status().await.state.is_loading);
    }

    #[tokio::test]
    async fn suggestion_matching_prefers_overlapping_results() {
        let h = harness(ProviderTag::Spotify).await;
        h.provider.on_search(
            "Dreams Fleetwood Mac",
            vec![
                named_track(ProviderTag::Spotify, "cover", "Sweet Nothing", "Karaoke Band", 1),
                named_track(ProviderTag::Spotify, "real", "Dreams - Remastered", "Fleetwood Mac", 1),
            ],
        );
        let suggestion = Suggestion {
            name: "Dreams".into(),
            artist: "Fleetwood Mac".into(),
        };
        let resolved = h.ai.resolve(h.provider.as_ref(), &suggestion).await;
        assert_eq!(resolved, Some(uri(ProviderTag::Spotify, "real")));

        let title_only = Suggestion {
            name: "One".into(),
            artist: "Unknown".into(),
        };
        h.provider.on_search("One", vec![named_track(ProviderTag::Spotify, "t", "One", "U2", 1)]);
        assert_eq!(
            h.ai.resolve(h.provider.as_ref(), &title_only).await,
            Some(uri(ProviderTag::Spotify, "t"))
        );
    }

    #[tokio::test]
    async fn taste_summary_is_cached_and_falls_back() {
        let h = harness(ProviderTag::YouTube).await;
        let provider: &dyn MusicProvider = h.provider.as_ref();
        let summary = h.ai.taste_summary(provider).await.unwrap();
        assert_eq!(summary, "[1]{n,g}:\n  Various Artists,mixed");

        let s = harness(ProviderTag::Spotify).await;
        s.provider.set_top_artists(vec![ArtistProfile {
            name: "MGMT".into(),
            genres: vec!["indie".into(), "psych".into(), "synth".into(), "rock".into()],
        }]);
        let first = s.ai.taste_summary(s.provider.as_ref()).await.unwrap();
        assert_eq!(first, "[1]{n,g}:\n  MGMT,\"indie, psych, synth\"");

        s.provider.set_top_artists(Vec::new());
        assert_eq!(s.ai.taste_summary(s.provider.as_ref()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn unknown_track_is_a_manual_override() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.start(Some("focus".into())).await.unwrap();

        h.provider.set_playback(Some(track(ProviderTag::Spotify, "c", 200_000)), 1_000, true);
        h.ai.drift_tick().await;

        let status = h.ai.status().await;
        assert!(!status.state.is_active);
        assert!(status.state.queue.is_empty());
        assert!(status.state.played_uris.is_empty());
        assert_eq!(status.mood, None);
    }

    #[tokio::test]
    async fn queued_track_moves_cursor_and_refills_near_the_end() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.start(None).await.unwrap();

        let queue = h.ai.status().await.state.queue;
        let fourth = queue[3].clone();
        let id = fourth.uri.rsplit(':').next().unwrap().to_string();

        for (i, name) in ["Six", "Seven"].iter().enumerate() {
            let artist = format!("B{}", i);
            h.provider.on_search(
                &format!("{} {}", name, artist),
                vec![named_track(ProviderTag::Spotify, &name.to_lowercase(), name, &artist, 1)],
            );
        }
        h.model.respond(r#"[{"n":"Six","a":"B0"},{"n":"Seven","a":"B1"}]"#);

        h.provider.set_playback(Some(track(ProviderTag::Spotify, &id, 200_000)), 1_000, true);
        h.ai.drift_tick().await;

        let state = h.ai.status().await.state;
        assert!(state.is_active);
        assert_eq!(state.current_index, 3);
        assert_eq!(state.queue.len(), 7);
        assert_eq!(h.provider.calls_to("add_to_queue").len(), 2);
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn local_queue_backend_advances_when_track_ends() {
        let h = harness(ProviderTag::YouTube).await;
        h.model.respond(FIVE);
        h.ai.start(None).await.unwrap();

        let queue = h.ai.status().await.state.queue;
        assert_eq!(h.provider.calls_to("play_track"), vec![format!("play_track {}", queue[0].uri)]);

        let first = h.provider.get_current_track().await.unwrap().unwrap();
        h.provider.set_playback(Some(first.clone()), first.duration_ms - 500, false);
        h.ai.drift_tick().await;

        let state = h.ai.status().await.state;
        assert_eq!(state.current_index, 1);
        assert_eq!(
            h.provider.calls_to("play_track").last().cloned(),
            Some(format!("play_track {}", queue[1].uri))
        );
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn stop_when_inactive_changes_nothing() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond("no json here");
        let _ = h.ai.start(None).await;
        let before = h.ai.status().await.state;

        h.ai.stop().await;
        h.ai.stop().await;

        let after = h.ai.status().await.state;
        assert_eq!(before.error, after.error);
        assert!(!after.is_active);
    }

    #[tokio::test]
    async fn failed_start_leaves_nothing_behind_for_the_retry() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE).respond(FIVE);
        h.provider.fail("play_tracks");

        let err = h.ai.start(Some("rainy".into())).await.unwrap_err();
        assert!(matches!(err, EngineError::TransientNetwork(_)));
        let status = h.ai.status().await;
        assert!(!status.state.is_active);
        assert!(status.state.queue.is_empty());
        assert!(status.state.played_uris.is_empty());
        assert_eq!(status.state.error, Some(err.user_message()));
        assert_eq!(status.mood, None);

        h.provider.heal("play_tracks");
        h.ai.start(Some("rainy".into())).await.unwrap();

        let state = h.ai.status().await.state;
        assert!(state.is_active);
        assert_eq!(state.queue.len(), 5);
        assert_eq!(state.error, None);
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn model_failure_is_reported_to_the_listener() {
        let h = harness(ProviderTag::YouTube).await;
        h.model.fail_with(EngineError::TransientNetwork("model timed out".into()));

        let err = h.ai.start(None).await.unwrap_err();
        let state = h.ai.status().await.state;
        assert_eq!(state.error, Some(err.user_message()));
        assert!(!state.is_loading);
        assert!(h.provider.calls_to("play_track").is_empty());
    }

    #[tokio::test]
    async fn superseded_start_cannot_take_over_a_new_session() {
        let h = harness(ProviderTag::Spotify).await;
        h.provider.on_search(
            "Six B0",
            vec![named_track(ProviderTag::Spotify, "six", "Six", "B0", 1)],
        );
        let gate = h.model.hold_next();
        h.model.respond(FIVE).respond(r#"[{"n":"Six","a":"B0"}]"#);

        let ai = Arc::clone(&h.ai);
        let pending = tokio::spawn(async move { ai.start(Some("first".into())).await });
        while h.model.requests().is_empty() {
            tokio::task::yield_now().await;
        }

        h.ai.stop().await;
        h.ai.start(Some("second".into())).await.unwrap();
        // A refill of the new session is running
        h.ai.state.write().await.is_loading = true;

        gate.notify_one();
        pending.await.unwrap().unwrap();

        let status = h.ai.status().await;
        assert!(status.state.is_active);
        assert!(status.state.is_loading);
        assert_eq!(status.mood.as_deref(), Some("second"));
        assert_eq!(status.state.queue.len(), 5);
        assert_eq!(status.state.position_of(&uri(ProviderTag::Spotify, "six")), None);
        assert_eq!(h.provider.calls_to("play_tracks").len(), 1);
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn generation_in_flight_yields_an_empty_batch() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.state.write().await.is_loading = true;

        let batch = h.ai.fetch_next_batch().await.unwrap();
        assert!(batch.is_empty());
        assert!(h.model.requests().is_empty());
        assert!(h.ai.status().await.state.is_loading);
    }

    #[tokio::test]
    async fn drift_does_not_refill_while_a_generation_is_in_flight() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.start(None).await.unwrap();

        let queue = h.ai.status().await.state.queue;
        let id = queue[3].uri.rsplit(':').next().unwrap().to_string();
        h.ai.state.write().await.is_loading = true;

        h.provider.set_playback(Some(track(ProviderTag::Spotify, &id, 200_000)), 1_000, true);
        h.ai.drift_tick().await;

        let state = h.ai.status().await.state;
        assert!(state.is_active);
        assert_eq!(state.current_index, 3);
        assert_eq!(state.queue.len(), 5);
        assert_eq!(h.model.requests().len(), 1);
        assert!(h.provider.calls_to("add_to_queue").is_empty());
        h.ai.stop().await;
    }

    #[tokio::test]
    async fn missing_playback_leaves_the_session_alone() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.start(None).await.unwrap();

        h.provider.clear_playback();
        h.ai.drift_tick().await;

        let state = h.ai.status().await.state;
        assert!(state.is_active);
        assert_eq!(state.queue.len(), 5);
        h.ai.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drift_monitor_runs_on_its_own() {
        let h = harness(ProviderTag::Spotify).await;
        h.model.respond(FIVE);
        h.ai.start(None).await.unwrap();

        h.provider.set_playback(Some(track(ProviderTag::Spotify, "intruder", 200_000)), 0, true);
        tokio::time::sleep(DRIFT_TICK + Duration::from_millis(100)).await;

        assert!(!h.ai.is_active().await);
    }
}
