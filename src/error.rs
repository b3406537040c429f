//! Error taxonomy for the playback engine

use thiserror::Error;

use crate::model::ProviderTag;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("Network request failed: {0}")]
    TransientNetwork(String),
    #[error("Suggestion response did not contain a track list: {0}")]
    MalformedSuggestion(String),
    #[error("Could not find any new tracks to play")]
    NoSuggestionsResolved,
    #[error("No provider registered for type: {0}")]
    UnknownProvider(String),
    #[error("Playback recovery failed: {0}")]
    RecoveryFailed(String),
    #[error("Operation '{operation}' is not supported by {provider}")]
    NotSupported {
        operation: &'static str,
        provider: ProviderTag,
    },
    #[error("No AI provider configured")]
    NoAiProvider,
    #[error("Settings error: {0}")]
    Settings(String),
    #[error("Not a playable track uri: {0}")]
    InvalidUri(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_supported(operation: &'static str, provider: ProviderTag) -> Self {
        EngineError::NotSupported { operation, provider }
    }

    /// Classify an HTTP status returned by a backend.
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            401 | 403 => EngineError::AuthenticationFailure(format!("{} (HTTP {})", context, status)),
            _ => EngineError::TransientNetwork(format!("{} (HTTP {})", context, status)),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientNetwork(_))
    }

    /// Message shown to the user when an AI queue session fails to start.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::AuthenticationFailure(_) => {
                "Authentication expired. Please reconnect your music account.".to_string()
            }
            EngineError::TransientNetwork(msg) if msg.contains("429") => {
                "Rate limited. Please wait a moment.".to_string()
            }
            EngineError::TransientNetwork(_) => {
                "Network error. Check your connection and try again.".to_string()
            }
            EngineError::NoAiProvider => {
                "No AI provider configured. Add one in settings.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<rspotify::ClientError> for EngineError {
    fn from(err: rspotify::ClientError) -> Self {
        if let rspotify::ClientError::Http(http) = &err {
            if let rspotify::http::HttpError::StatusCode(response) = http.as_ref() {
                return EngineError::from_status(response.status().as_u16(), "Spotify API");
            }
        }
        EngineError::TransientNetwork(err.to_string())
    }
}

impl From<rspotify::model::IdError> for EngineError {
    fn from(err: rspotify::model::IdError) -> Self {
        EngineError::InvalidUri(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => EngineError::from_status(status.as_u16(), err.to_string()),
            None => EngineError::TransientNetwork(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_status_is_authentication_failure() {
        let err = EngineError::from_status(401, "YouTube API");
        assert!(matches!(err, EngineError::AuthenticationFailure(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = EngineError::from_status(503, "Spotify API");
        assert!(err.is_transient());
    }

    #[test]
    fn rate_limit_has_friendly_message() {
        let err = EngineError::from_status(429, "Spotify API");
        assert_eq!(err.user_message(), "Rate limited. Please wait a moment.");
    }

    #[test]
    fn resolution_failure_message_is_readable() {
        assert_eq!(
            EngineError::NoSuggestionsResolved.user_message(),
            "Could not find any new tracks to play"
        );
    }
}
