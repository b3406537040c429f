mod auth;
mod config;
mod controller;
mod error;
mod logging;
mod model;
#[cfg(unix)]
mod player;
mod provider;
mod suggest;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use config::{JsonSettingsStore, SettingsStore};
use controller::Engine;
use model::ProviderTag;
use provider::{MusicProvider, ProviderRegistry, SpotifyController, YouTubeClient, YouTubeController, YouTubeTokenFile};
use suggest::LlmClient;

const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const SEARCH_LIMIT: u32 = 10;

const HELP: &str = "Commands:
  ai [mood]            start the AI queue, optionally for a mood
  stop                 stop the AI queue
  status               show AI queue, local queue and keep-alive state
  search <query>       search the active provider
  play <query>         play the first search result
  provider [name]      list providers, or switch to spotify or youtube
  autoplay on|off      toggle autoplay
  keepalive on|off     toggle the session keep-alive
  recover              make sure a device is active and resume
  logout               sign out of the active provider
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    tracing::info!("=== playflow-rs starting ===");

    let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::from_env());
    let registry = Arc::new(ProviderRegistry::new(Arc::clone(&settings)));

    // Keep a handle to the Spotify controller for token refreshes
    let spotify = SpotifyController::for_this_host();
    let spotify_for_registry = spotify.clone();
    registry
        .register(ProviderTag::Spotify, move || {
            Arc::new(spotify_for_registry.clone()) as Arc<dyn MusicProvider>
        })
        .await;
    // Same for YouTube, which also needs a player attached
    let youtube = Arc::new(YouTubeController::new(YouTubeClient::new(YouTubeTokenFile::default())));
    let youtube_for_registry = Arc::clone(&youtube);
    registry
        .register(ProviderTag::YouTube, move || {
            Arc::clone(&youtube_for_registry) as Arc<dyn MusicProvider>
        })
        .await;

    ensure_connected(&registry).await?;

    let model = Arc::new(LlmClient::new(Arc::clone(&settings)));
    let engine = Engine::new(registry, settings, model).with_youtube(youtube);
    attach_local_player(&engine).await?;
    engine.apply_settings().await;

    let token_task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(TOKEN_CHECK_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            if let Err(e) = spotify.refresh_token_if_needed().await {
                tracing::warn!(error = %e, "Token refresh check failed");
            }
        }
    });

    let res = run_commands(&engine).await;

    token_task.abort();
    engine.shutdown().await;

    if let Err(err) = &res {
        tracing::error!(error = ?err, "Application error");
    }

    tracing::info!("playflow-rs shutting down");
    res
}

/// Give YouTube a local mpv to play in. Without one only Spotify can play.
#[cfg(unix)]
async fn attach_local_player(engine: &Engine) -> Result<()> {
    match player::MpvPlayer::spawn() {
        Ok(player) => engine.attach_youtube_player(Some(Arc::new(player))).await?,
        Err(e) => {
            tracing::warn!(error = %e, "No local player, YouTube playback unavailable");
            println!("warning: {:#}; YouTube playback is unavailable", e);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn attach_local_player(_engine: &Engine) -> Result<()> {
    tracing::warn!("No local player on this platform, YouTube playback unavailable");
    Ok(())
}

/// Connect the selected provider unless it already holds credentials.
async fn ensure_connected(registry: &ProviderRegistry) -> Result<()> {
    let provider = registry.active().await?;
    if provider.is_authenticated().await {
        return Ok(());
    }

    tracing::info!(provider = %provider.tag(), "Connecting music provider");
    provider
        .connect()
        .await
        .with_context(|| format!("Could not connect to {}", provider.tag()))
}

async fn run_commands(engine: &Engine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match handle_command(engine, line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(command = %line.trim(), error = %e, "Command failed");
                        println!("error: {:#}", e);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Run one command. Returns false when the user asked to quit.
async fn handle_command(engine: &Engine, line: &str) -> Result<bool> {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "ai" => {
            let mood = Some(arg.to_string()).filter(|m| !m.is_empty());
            engine.ai_queue.start(mood).await?;
            print_ai_status(engine).await;
        }
        "stop" => {
            engine.ai_queue.stop().await;
            println!("AI queue stopped");
        }
        "status" => {
            print_ai_status(engine).await;
            println!("queue: {}", serde_json::to_string(&engine.playback.queue_status().await)?);
            if let Some(next) = engine.queue.next_track().await {
                println!("  next up: {} - {}", next.name, next.joined_artists());
            }
            println!("keep-alive: {}", serde_json::to_string(&engine.keep_alive.status().await)?);
            println!("autoplay: {}", if engine.autoplay.is_enabled() { "on" } else { "off" });
        }
        "search" => {
            let provider = engine.registry.active().await?;
            for (i, track) in provider.search_tracks(arg, SEARCH_LIMIT).await?.iter().enumerate() {
                println!("{:>2}. {} - {}  [{}]", i + 1, track.name, track.joined_artists(), track.uri);
            }
        }
        "play" => {
            let provider = engine.registry.active().await?;
            let track = provider
                .search_tracks(arg, 1)
                .await?
                .into_iter()
                .next()
                .with_context(|| format!("Nothing found for '{}'", arg))?;
            println!("Playing {} - {}", track.name, track.joined_artists());
            engine.playback.play_single_track(track).await?;
        }
        "provider" => {
            if arg.is_empty() {
                let active = engine.registry.active_tag().await;
                for tag in engine.registry.registered().await {
                    let signed_in = engine.registry.is_authenticated(tag).await;
                    println!(
                        "{} {}{}",
                        if tag == active { "*" } else { " " },
                        tag,
                        if signed_in { "" } else { " (signed out)" }
                    );
                }
                return Ok(true);
            }
            let tag: ProviderTag = arg.parse()?;
            if !engine.registry.has(tag).await {
                anyhow::bail!("{} is not available", tag);
            }
            let mut settings = engine.settings.read().await;
            settings.active_music_provider = Some(tag);
            engine.settings.write(&settings).await?;
            engine.ai_queue.stop().await;
            ensure_connected(&engine.registry).await?;
            println!("Active provider: {}", tag);
        }
        "autoplay" | "keepalive" => {
            let on = match arg {
                "on" => true,
                "off" => false,
                other => anyhow::bail!("expected on or off, got '{}'", other),
            };
            let mut settings = engine.settings.read().await;
            if command == "autoplay" {
                settings.autoplay_enabled = on;
            } else {
                settings.keep_alive_enabled = on;
            }
            engine.settings.write(&settings).await?;
            engine.apply_settings().await;
            println!("{} {}", command, arg);
        }
        "recover" => {
            let ok = engine.keep_alive.recover_and_play().await;
            println!("{}", if ok { "Playback resumed" } else { "No device could be activated" });
        }
        "logout" => {
            let provider = engine.registry.active().await?;
            engine.ai_queue.stop().await;
            engine.playback.clear_playback_queue().await;
            provider.disconnect().await?;
            engine.registry.clear_cache().await;
            println!("Signed out of {}", provider.tag());
        }
        "help" => println!("{}", HELP),
        "quit" | "exit" => return Ok(false),
        other => println!("Unknown command '{}', try 'help'", other),
    }

    Ok(true)
}

async fn print_ai_status(engine: &Engine) {
    let status = engine.ai_queue.status().await;
    let state = &status.state;
    println!(
        "AI queue: {} (mood: {}, track {}/{})",
        if state.is_active { "active" } else { "inactive" },
        status.mood.as_deref().unwrap_or("none"),
        if state.queue.is_empty() { 0 } else { state.current_index + 1 },
        state.queue.len(),
    );
    if let Some(error) = &state.error {
        println!("  last error: {}", error);
    }
    for (i, track) in state.queue.iter().enumerate() {
        let marker = if state.is_active && i == state.current_index { ">" } else { " " };
        println!("  {} {} - {}", marker, track.name, track.artists);
    }
}
