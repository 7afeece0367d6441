//! Contract between the reconciliation pipeline and player adapters.

use std::future::Future;
use std::path::PathBuf;

use crate::error::PollError;
use crate::state::WatchPhase;

/// Raw playback facts from one poll of a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerVars {
    /// File name of the playing media, without its directory.
    pub file: String,
    /// Directory containing the playing media.
    pub file_dir: PathBuf,
    pub phase: WatchPhase,
    pub position_ms: u64,
    pub duration_ms: u64,
}

/// A pollable player. One instance per configured player, each driven by
/// its own producer task.
pub trait VarsSource: Send + Sync {
    /// Origin tag attached to every state this source emits.
    fn origin(&self) -> &'static str;

    /// One poll. `None` means the player is unreachable or has no media
    /// loaded; an error is a single-tick failure, not a dead source.
    fn poll(&self) -> impl Future<Output = Result<Option<PlayerVars>, PollError>> + Send;
}
