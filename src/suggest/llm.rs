//! HTTP clients for the supported text-generation vendors

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{AiProviderKind, SettingsStore};
use crate::error::{EngineError, Result};

use super::{SuggestionModel, SuggestionRequest};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GOOGLE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_TOKENS: u32 = 1024;

fn default_model(kind: AiProviderKind) -> &'static str {
    match kind {
        AiProviderKind::OpenAi => "gpt-4o-mini",
        AiProviderKind::Anthropic => "claude-3-haiku-20240307",
        AiProviderKind::Google => "gemini-1.5-flash",
        AiProviderKind::Groq => "llama-3.1-8b-instant",
    }
}

/// Pull the generated text out of a vendor response body.
fn extract_text(kind: AiProviderKind, body: &Value) -> Option<String> {
    let text = match kind {
        AiProviderKind::OpenAi | AiProviderKind::Groq => body.pointer("/choices/0/message/content"),
        AiProviderKind::Anthropic => body
            .get("content")
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.iter().find(|b| b.get("type") == Some(&json!("text"))))
            .and_then(|block| block.get("text")),
        AiProviderKind::Google => body.pointer("/candidates/0/content/parts/0/text"),
    };
    text.and_then(Value::as_str).map(str::to_string)
}

/// Resolved vendor, key and model for one call
struct Target {
    kind: AiProviderKind,
    api_key: String,
    model: String,
}

/// Suggestion model backed by whichever vendor the settings select.
///
/// The selection and API key are re-read on every call so a settings change
/// applies to the next batch.
pub struct LlmClient {
    http: reqwest::Client,
    settings: Arc<dyn SettingsStore>,
}

impl LlmClient {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    async fn target(&self) -> Result<Target> {
        let settings = self.settings.read().await;
        let config = settings.active_ai().ok_or(EngineError::NoAiProvider)?;
        let api_key = config.provider.api_key().ok_or_else(|| {
            tracing::warn!(variable = %config.provider.api_key_var(), "AI provider has no API key");
            EngineError::NoAiProvider
        })?;
        Ok(Target {
            kind: config.provider,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model(config.provider).to_string()),
        })
    }

    fn build(&self, target: &Target, request: &SuggestionRequest) -> reqwest::RequestBuilder {
        let system = request.system_prompt();
        let user = request.user_prompt();
        match target.kind {
            AiProviderKind::OpenAi | AiProviderKind::Groq => {
                let url = if target.kind == AiProviderKind::Groq { GROQ_URL } else { OPENAI_URL };
                self.http.post(url).bearer_auth(&target.api_key).json(&json!({
                    "model": target.model,
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": user},
                    ],
                }))
            }
            AiProviderKind::Anthropic => self
                .http
                .post(ANTHROPIC_URL)
                .header("x-api-key", &target.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": target.model,
                    "max_tokens": MAX_TOKENS,
                    "system": system,
                    "messages": [{"role": "user", "content": user}],
                })),
            AiProviderKind::Google => self
                .http
                .post(format!("{}/{}:generateContent", GOOGLE_URL, target.model))
                .query(&[("key", target.api_key.as_str())])
                .json(&json!({
                    "systemInstruction": {"parts": [{"text": system}]},
                    "contents": [{"role": "user", "parts": [{"text": user}]}],
                })),
        }
    }
}

#[async_trait]
impl SuggestionModel for LlmClient {
    async fn generate(&self, request: &SuggestionRequest) -> Result<String> {
        let target = self.target().await?;
        crate::log_api_request!("generate", provider = %target.kind, model = %target.model);

        let response = self.build(&target, request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::from_status(
                status.as_u16(),
                format!("{} generation", target.kind),
            ));
        }

        let body: Value = response.json().await?;
        extract_text(target.kind, &body).ok_or_else(|| {
            EngineError::MalformedSuggestion(format!("{} response had no text", target.kind))
        })
    }
}
