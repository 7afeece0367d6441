use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("presence client failed: {0}")]
    Presence(#[from] PresenceError),

    #[error("config watcher unavailable: {0}")]
    Watcher(String),
}

/// Failures reading an `rpc.config` file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config line `{0}` (expected key=value)")]
    MalformedLine(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal presence-client failures. Transport hiccups are absorbed inside
/// the client and reported as an unsuccessful push, never as an error.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence worker is gone")]
    WorkerGone,
}

/// A single failed poll of a player source. Producers log these and emit a
/// release state for the tick.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected player response: {0}")]
    Protocol(String),
}
