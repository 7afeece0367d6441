//! Player pollers.
//!
//! Each poller normalizes one local player's status into [`PlayerVars`].
//! An unreachable player (refused connection, missing socket, non-success
//! HTTP status) reads as "nothing playing"; errors are reserved for
//! replies the poller cannot make sense of.

mod mpc;
mod mpv;

use std::path::PathBuf;
use std::time::Duration;

use minori_core::error::PollError;
use minori_core::source::{PlayerVars, VarsSource};

pub use mpc::{MpcSource, DEFAULT_MPC_PORT};
pub use mpv::{MpvIpcSource, MpvWebuiSource, DEFAULT_IPC_PATH, DEFAULT_WEBUI_PORT};

/// Request timeout for the HTTP pollers. Everything polled is local, so a
/// slow answer means a wedged player, not a slow network.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection targets for the individual pollers, fed from CLI flags.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub mpc_port: u16,
    pub mpv_socket: PathBuf,
    pub mpv_webui_port: u16,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            mpc_port: DEFAULT_MPC_PORT,
            mpv_socket: PathBuf::from(DEFAULT_IPC_PATH),
            mpv_webui_port: DEFAULT_WEBUI_PORT,
        }
    }
}

/// Every supported player behind a single [`VarsSource`].
pub enum PlayerSource {
    Mpc(MpcSource),
    MpvIpc(MpvIpcSource),
    MpvWebui(MpvWebuiSource),
}

impl PlayerSource {
    /// Build a poller from its `--players` name.
    pub fn from_name(name: &str, options: &PlayerOptions) -> Option<Self> {
        match name {
            "mpc" => Some(Self::Mpc(MpcSource::new(options.mpc_port))),
            "mpv" => Some(Self::MpvIpc(MpvIpcSource::new(options.mpv_socket.clone()))),
            "mpv-webui" => Some(Self::MpvWebui(MpvWebuiSource::new(options.mpv_webui_port))),
            _ => None,
        }
    }
}

impl VarsSource for PlayerSource {
    fn origin(&self) -> &'static str {
        match self {
            Self::Mpc(source) => source.origin(),
            Self::MpvIpc(source) => source.origin(),
            Self::MpvWebui(source) => source.origin(),
        }
    }

    async fn poll(&self) -> Result<Option<PlayerVars>, PollError> {
        match self {
            Self::Mpc(source) => source.poll().await,
            Self::MpvIpc(source) => source.poll().await,
            Self::MpvWebui(source) => source.poll().await,
        }
    }
}
