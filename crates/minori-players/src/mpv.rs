//! mpv pollers: JSON IPC socket and simple-mpv-webui.
//!
//! Both surface the same underlying properties, so they share the
//! playlist-to-vars assembly. The playlist filename is absolute or
//! relative depending on how mpv was launched; relative names resolve
//! against mpv's working directory.

use std::path::{Path, PathBuf};

use minori_core::error::PollError;
use minori_core::source::{PlayerVars, VarsSource};
use minori_core::state::WatchPhase;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::POLL_TIMEOUT;

pub const DEFAULT_WEBUI_PORT: u16 = 14567;

#[cfg(windows)]
pub const DEFAULT_IPC_PATH: &str = r"\\.\pipe\mpv-pipe";
#[cfg(not(windows))]
pub const DEFAULT_IPC_PATH: &str = "/tmp/mpvsocket";

const MISSING_WORKING_DIR_HINT: &str = "missing working-dir in the mpv-webui status; add `[\"working-dir\"] = mp.get_property('working-directory') or ''` to build_status_response() in simple-mpv-webui's main.lua and restart mpv";

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    filename: String,
    #[serde(default)]
    current: bool,
}

fn assemble_vars(
    playlist: &[PlaylistEntry],
    working_dir: &str,
    paused: bool,
    position_secs: f64,
    duration_secs: f64,
) -> Option<PlayerVars> {
    let current = playlist.iter().find(|entry| entry.current)?;

    let mut path = PathBuf::from(&current.filename);
    if path.is_relative() {
        path = Path::new(working_dir).join(path);
    }

    Some(PlayerVars {
        file: path.file_name()?.to_string_lossy().into_owned(),
        file_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        phase: if paused {
            WatchPhase::Paused
        } else {
            WatchPhase::Playing
        },
        position_ms: (position_secs * 1000.0) as u64,
        duration_ms: (duration_secs * 1000.0) as u64,
    })
}

fn parse_seconds(name: &str, raw: &str) -> Result<f64, PollError> {
    raw.parse()
        .map_err(|_| PollError::Protocol(format!("{name} is not a number: `{raw}`")))
}

// ── JSON IPC ──

#[derive(Debug, Deserialize)]
struct IpcReply {
    error: Option<String>,
    data: Option<String>,
    request_id: Option<i64>,
    event: Option<String>,
}

/// Polls mpv over its `--input-ipc-server` socket, one connection per
/// property read.
pub struct MpvIpcSource {
    socket_path: PathBuf,
}

impl MpvIpcSource {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    #[cfg(unix)]
    async fn connect(&self) -> std::io::Result<tokio::net::UnixStream> {
        tokio::net::UnixStream::connect(&self.socket_path).await
    }

    #[cfg(windows)]
    async fn connect(
        &self,
    ) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
        tokio::net::windows::named_pipe::ClientOptions::new().open(&self.socket_path)
    }

    async fn property(&self, name: &str) -> Result<Option<String>, PollError> {
        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(_) => return Ok(None),
        };
        request_property(stream, name).await
    }
}

/// One round of `get_property_string` over an established stream. Event
/// notifications and replies to other requests are skipped; a reply that
/// is not valid JSON is a protocol error. EOF before a matching reply
/// reads as a missing property.
async fn request_property<S>(mut stream: S, name: &str) -> Result<Option<String>, PollError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = format!(
        "{}\n",
        serde_json::json!({ "command": ["get_property_string", name] })
    );
    if stream.write_all(command.as_bytes()).await.is_err() {
        return Ok(None);
    }

    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return Ok(None),
        };
        let reply: IpcReply = serde_json::from_str(&line)
            .map_err(|e| PollError::Protocol(format!("bad IPC reply `{line}`: {e}")))?;
        if reply.event.is_some() || reply.request_id != Some(0) {
            continue;
        }
        return match reply.error.as_deref() {
            Some("success") => Ok(reply.data),
            _ => Ok(None),
        };
    }
}

impl VarsSource for MpvIpcSource {
    fn origin(&self) -> &'static str {
        "mpv-ipc"
    }

    async fn poll(&self) -> Result<Option<PlayerVars>, PollError> {
        let Some(playlist) = self.property("playlist").await? else {
            return Ok(None);
        };
        let playlist: Vec<PlaylistEntry> = serde_json::from_str(&playlist)
            .map_err(|e| PollError::Protocol(format!("bad playlist: {e}")))?;
        let Some(working_dir) = self.property("working-directory").await? else {
            return Ok(None);
        };
        let Some(paused) = self.property("pause").await? else {
            return Ok(None);
        };
        let Some(position) = self.property("time-pos").await? else {
            return Ok(None);
        };
        let Some(duration) = self.property("duration").await? else {
            return Ok(None);
        };

        Ok(assemble_vars(
            &playlist,
            &working_dir,
            paused == "yes",
            parse_seconds("time-pos", &position)?,
            parse_seconds("duration", &duration)?,
        ))
    }
}

// ── simple-mpv-webui ──

#[derive(Debug, Deserialize)]
struct WebuiStatus {
    playlist: Vec<PlaylistEntry>,
    /// Not part of stock simple-mpv-webui; forwarded by a one-line patch
    /// to its status response.
    #[serde(rename = "working-dir")]
    working_dir: Option<String>,
    pause: bool,
    position: f64,
    duration: f64,
}

pub struct MpvWebuiSource {
    http: reqwest::Client,
    url: String,
}

impl MpvWebuiSource {
    pub fn new(port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("http://127.0.0.1:{port}/api/status"),
        }
    }
}

impl VarsSource for MpvWebuiSource {
    fn origin(&self) -> &'static str {
        "mpv-webui"
    }

    async fn poll(&self) -> Result<Option<PlayerVars>, PollError> {
        let response = match self.http.get(&self.url).timeout(POLL_TIMEOUT).send().await {
            Ok(response) => response,
            Err(_) => return Ok(None),
        };
        if !response.status().is_success() {
            return Ok(None);
        }
        let status: WebuiStatus = response.json().await?;
        let Some(working_dir) = status.working_dir else {
            return Err(PollError::Protocol(MISSING_WORKING_DIR_HINT.to_string()));
        };
        Ok(assemble_vars(
            &status.playlist,
            &working_dir,
            status.pause,
            status.position,
            status.duration,
        ))
    }
}
