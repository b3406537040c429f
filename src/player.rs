//! Headless YouTube playback through an `mpv` child process
//!
//! mpv resolves YouTube links itself (through yt-dlp) and is driven over its
//! JSON IPC socket. `--keep-open` leaves a finished video paused on its last
//! frame, which is how the end of a track shows up as "stopped near the end".

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::provider::{EmbeddedPlayer, PlayerSnapshot};

const MPV_BINARY: &str = "mpv";
const IPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of one line read from the IPC socket
#[derive(Debug, PartialEq)]
enum Reply {
    /// Unsolicited event notification, not an answer to our command.
    Event,
    Done(Option<Value>),
}

fn parse_reply(line: &str) -> Reply {
    let Ok(reply) = serde_json::from_str::<Value>(line) else {
        return Reply::Done(None);
    };
    if reply.get("event").is_some() {
        return Reply::Event;
    }
    if reply["error"] == "success" {
        Reply::Done(Some(reply["data"].clone()))
    } else {
        Reply::Done(None)
    }
}

/// One-shot request/reply client for mpv's IPC socket
struct MpvIpc {
    socket: PathBuf,
}

impl MpvIpc {
    fn connect(&self) -> Option<UnixStream> {
        let stream = UnixStream::connect(&self.socket).ok()?;
        stream.set_read_timeout(Some(IPC_TIMEOUT)).ok()?;
        stream.set_write_timeout(Some(IPC_TIMEOUT)).ok()?;
        Some(stream)
    }

    /// Run a command and return its `data`, or `None` if mpv is unreachable
    /// or rejected it.
    fn command(&self, args: Value) -> Option<Value> {
        let mut stream = self.connect()?;
        let mut request = json!({ "command": args }).to_string();
        request.push('\n');
        stream.write_all(request.as_bytes()).ok()?;

        for line in BufReader::new(stream).lines() {
            match parse_reply(&line.ok()?) {
                Reply::Event => continue,
                Reply::Done(data) => return data,
            }
        }
        None
    }

    fn send(&self, args: Value) {
        if self.command(args.clone()).is_none() {
            tracing::debug!(command = %args, "mpv command failed");
        }
    }

    fn number(&self, property: &str) -> Option<f64> {
        self.command(json!(["get_property", property]))?.as_f64()
    }

    fn flag(&self, property: &str) -> Option<bool> {
        self.command(json!(["get_property", property]))?.as_bool()
    }

    fn snapshot(&self) -> PlayerSnapshot {
        let paused = self.flag("pause").unwrap_or(true);
        let idle = self.flag("idle-active").unwrap_or(true);
        let finished = self.flag("eof-reached").unwrap_or(false);
        PlayerSnapshot {
            is_playing: !paused && !idle && !finished,
            current_time_secs: self.number("time-pos").unwrap_or(0.0),
            duration_secs: self.number("duration").unwrap_or(0.0),
        }
    }
}

/// Audio-only mpv process owned by the engine for the lifetime of the app
pub struct MpvPlayer {
    ipc: MpvIpc,
    child: Child,
}

impl MpvPlayer {
    /// Start an idle mpv listening on a per-process socket.
    pub fn spawn() -> Result<Self> {
        let socket = std::env::temp_dir().join(format!("playflow-mpv-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&socket);

        let child = Command::new(MPV_BINARY)
            .args([
                "--idle=yes",
                "--no-video",
                "--no-terminal",
                "--keep-open=yes",
                "--ytdl-format=bestaudio/best",
            ])
            .arg(format!("--input-ipc-server={}", socket.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Could not start {}, is it installed?", MPV_BINARY))?;

        tracing::info!(pid = child.id(), socket = %socket.display(), "mpv started");
        Ok(Self {
            ipc: MpvIpc { socket },
            child,
        })
    }
}

impl EmbeddedPlayer for MpvPlayer {
    fn is_ready(&self) -> bool {
        self.ipc.connect().is_some()
    }

    fn state(&self) -> PlayerSnapshot {
        self.ipc.snapshot()
    }

    fn load_video(&self, video_id: &str) {
        let url = format!("https://www.youtube.com/watch?v={}", video_id);
        self.ipc.send(json!(["loadfile", url, "replace"]));
    }

    fn play(&self) {
        self.ipc.send(json!(["set_property", "pause", false]));
    }

    fn pause(&self) {
        self.ipc.send(json!(["set_property", "pause", true]));
    }

    fn seek(&self, position_secs: f64) {
        self.ipc.send(json!(["seek", position_secs, "absolute"]));
    }

    fn set_volume(&self, volume_percent: u8) {
        self.ipc.send(json!(["set_property", "volume", volume_percent]));
    }

    fn stop(&self) {
        self.ipc.send(json!(["stop"]));
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "mpv already exited");
        }
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.ipc.socket);
    }
}
