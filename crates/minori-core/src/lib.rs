//! Core of the presence daemon: viewing states, per-directory config
//! records, the origin arbiter, the presence engine and the pipeline
//! that ties player sources to the Discord transport.

pub mod arbiter;
pub mod builder;
pub mod config;
pub mod discord;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod presence;
pub mod source;
pub mod state;
pub mod timer;
pub mod watcher;

pub use discord::DiscordPresence;
pub use error::{ConfigError, CoreError, PollError, PresenceError};
pub use pipeline::{poll_source, Reconciler, POLL_INTERVAL};
pub use source::{PlayerVars, VarsSource};
pub use state::{Episode, ViewingState, WatchPhase};
pub use timer::UpdateTimer;
pub use watcher::ConfigWatcher;
