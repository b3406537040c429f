//! Suggest module - Talking to the text-generation model that picks tracks
//!
//! - `encode`: Compact tabular encoding of tracks and artists for prompts
//! - `parse`: Extracts the suggestion list from free-form model output
//! - `llm`: HTTP clients for the supported model vendors

mod encode;
mod llm;
mod parse;

use async_trait::async_trait;

use crate::error::Result;

pub use encode::encode_records;
pub use llm::LlmClient;
pub use parse::{parse_suggestions, Suggestion};

/// Number of tracks requested per batch.
pub const SUGGESTIONS_PER_BATCH: usize = 5;

pub const SYSTEM_PROMPT: &str = r#"You are a DJ creating a seamless playlist. Based on the user's recent tracks and taste, suggest exactly 5 NEW tracks that flow well together.

## Data Format
Input uses a compact table format: n=name, a=artists, u=uri (for tracks), n=name, g=genres (for artists)

## Output Format
Return ONLY a JSON array of 5 track suggestions. Each object must have:
- n: track name (string, exact track name)
- a: artist name (string, main artist only)

Example response:
[{"n":"Blinding Lights","a":"The Weeknd"},{"n":"Electric Feel","a":"MGMT"},{"n":"Midnight City","a":"M83"},{"n":"Take On Me","a":"a-ha"},{"n":"Dreams","a":"Fleetwood Mac"}]

IMPORTANT RULES:
- Use exact track names as they appear on music services
- Do NOT suggest tracks from the recent tracks list - suggest NEW discoveries
- Keep variety - suggest tracks from DIFFERENT artists (at least 3-4 different)
- Mix popular hits with lesser-known gems for variety
- Maintain mood/energy flow
- No explanations, just the JSON array"#;

/// One generation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuggestionRequest {
    /// Short random tag that nudges the model away from repeating itself.
    pub seed: String,
    pub recent_tracks: String,
    pub taste_summary: String,
    pub mood: Option<String>,
}

impl SuggestionRequest {
    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    pub fn user_prompt(&self) -> String {
        let mood_instruction = self
            .mood
            .as_deref()
            .map(|mood| {
                format!(
                    "\n\nIMPORTANT USER REQUEST: The user specifically wants \"{}\". Prioritize this mood/genre!",
                    mood
                )
            })
            .unwrap_or_default();

        format!(
            "[{}] Recent tracks:\n{}\n\nTop artists:\n{}{}\n\nSuggest {} tracks that would flow well. Consider energy, mood, and genre continuity.",
            self.seed, self.recent_tracks, self.taste_summary, mood_instruction, SUGGESTIONS_PER_BATCH
        )
    }
}

/// The external text-generation capability. Returns the raw model output.
#[async_trait]
pub trait SuggestionModel: Send + Sync {
    async fn generate(&self, request: &SuggestionRequest) -> Result<String>;
}
