use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use rspotify::Token;

const SPOTIFY_CLIENT_ID_ENV: &str = "PLAYFLOW_SPOTIFY_CLIENT_ID";
const SPOTIFY_REDIRECT_URI: &str = "http://127.0.0.1:8898/login";
pub const SCOPES: &str =
    "user-read-playback-state user-modify-playback-state user-read-currently-playing user-top-read user-read-recently-played";

const RESPONSE: &str = r#"
<!doctype html>
<html>
<head><title>Success</title></head>
<body><h1>Authentication Successful!</h1><script>window.close();</script></body>
</html>
"#;
const CACHE: &str = ".cache";
const REFRESH_TOKEN_FILE: &str = ".cache/refresh_token";
const FALLBACK_LIFETIME_SECS: i64 = 3600;

/// Tokens for the Spotify Web API
#[derive(Clone, Debug)]
pub struct SpotifyTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SpotifyTokens {
    pub fn to_rspotify(&self) -> Token {
        Token {
            access_token: self.access_token.clone(),
            expires_in: self.expires_at - Utc::now(),
            expires_at: Some(self.expires_at),
            scopes: SCOPES
                .split_whitespace()
                .map(|s| s.to_string())
                .collect::<HashSet<String>>(),
            refresh_token: None,
        }
    }
}

fn client_id() -> Result<String> {
    std::env::var(SPOTIFY_CLIENT_ID_ENV)
        .with_context(|| format!("{} is not set", SPOTIFY_CLIENT_ID_ENV))
}

fn oauth_builder(client_id: &str) -> librespot_oauth::OAuthClientBuilder {
    librespot_oauth::OAuthClientBuilder::new(
        client_id,
        SPOTIFY_REDIRECT_URI,
        SCOPES.split_whitespace().collect(),
    )
}

fn to_tokens(token: librespot_oauth::OAuthToken) -> SpotifyTokens {
    let remaining = token.expires_at.saturating_duration_since(Instant::now());
    let lifetime = chrono::Duration::from_std(remaining)
        .unwrap_or_else(|_| chrono::Duration::seconds(FALLBACK_LIFETIME_SECS));
    SpotifyTokens {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: Utc::now() + lifetime,
    }
}

fn save_refresh_token(refresh_token: &str) {
    if fs::create_dir_all(CACHE).is_ok() && fs::write(REFRESH_TOKEN_FILE, refresh_token).is_ok() {
        tracing::debug!("Saved refresh token to disk");
    } else {
        tracing::warn!("Could not persist refresh token");
    }
}

async fn perform_browser_auth() -> Result<SpotifyTokens> {
    tracing::info!("Starting browser-based OAuth flow");
    let client_id = client_id()?;
    let client = oauth_builder(&client_id)
        .open_in_browser()
        .with_custom_message(RESPONSE)
        .build()?;

    let token = client.get_access_token_async().await?;
    save_refresh_token(&token.refresh_token);

    tracing::info!("Browser authentication completed successfully");
    Ok(to_tokens(token))
}

/// Exchange a refresh token for a fresh access token.
pub async fn refresh_access_token(refresh_token: &str) -> Result<SpotifyTokens> {
    let client_id = client_id()?;
    let client = oauth_builder(&client_id).build()?;
    let token = client.refresh_token_async(refresh_token).await?;
    save_refresh_token(&token.refresh_token);
    tracing::debug!("Token refreshed successfully");
    Ok(to_tokens(token))
}

/// Reuse the cached refresh token when possible, otherwise run the browser flow.
pub async fn perform_oauth_flow() -> Result<SpotifyTokens> {
    match fs::read_to_string(REFRESH_TOKEN_FILE).ok() {
        Some(refresh_token) => {
            tracing::info!("Found cached refresh token");
            match refresh_access_token(refresh_token.trim()).await {
                Ok(tokens) => Ok(tokens),
                Err(e) => {
                    tracing::warn!(error = %e, "Cached refresh token failed, re-authenticating");
                    perform_browser_auth().await
                }
            }
        }
        None => {
            tracing::info!("No cached credentials found, starting browser authentication");
            perform_browser_auth().await
        }
    }
}

pub fn clear_cached_credentials() {
    if fs::remove_file(REFRESH_TOKEN_FILE).is_ok() {
        tracing::info!("Removed cached refresh token");
    }
}
