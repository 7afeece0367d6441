//! Producer/consumer pipeline.
//!
//! One producer task per configured source polls at a fixed cadence and
//! feeds normalized states into a bounded queue. A single consumer task
//! owns everything stateful: origin arbitration, seek detection, the
//! periodic timer and the presence engine. Producers never touch shared
//! state, so nothing here needs a lock.

use std::sync::Arc;
use std::time::Duration;

use minori_api::MetadataClient;
use minori_pattern::EpisodePattern;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::arbiter::OriginArbiter;
use crate::builder::build_state;
use crate::config::{self, ConfigRecord};
use crate::error::CoreError;
use crate::format::ms2timestamp;
use crate::presence::{PresenceClient, PresenceEngine, UpdateFlags};
use crate::source::{PlayerVars, VarsSource};
use crate::state::{Episode, StateLogger, ViewingState};
use crate::timer::UpdateTimer;
use crate::watcher::{ConfigSubscription, ConfigWatcher};

/// Cadence of every polling source, and of the consumer's idle wakeups.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Position jumps beyond this count as seeks.
const SEEK_TOLERANCE_MS: u64 = 3_000;

/// Polls one source until shutdown, feeding states into the queue.
///
/// A failed poll counts as an idle tick. Config records are owned here:
/// each new media directory replaces the watch subscription, and a fresh
/// record is prepared (pattern inference, metadata fill) before its first
/// use.
pub async fn poll_source<S: VarsSource>(
    source: S,
    watcher: ConfigWatcher,
    metadata: Option<Arc<MetadataClient>>,
    states: mpsc::Sender<ViewingState>,
    cancel: CancellationToken,
) {
    let origin = source.origin();
    let mut subscription: Option<ConfigSubscription> = None;
    let mut config: Option<ConfigRecord> = None;
    let mut prepared = false;

    loop {
        let vars = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = source.poll() => match polled {
                Ok(vars) => vars,
                Err(e) => {
                    debug!(origin, "Poll failed: {e}");
                    None
                }
            },
        };

        let state = match &vars {
            Some(vars) => {
                if subscription
                    .as_ref()
                    .is_none_or(|sub| sub.dir() != vars.file_dir.as_path())
                {
                    config = None;
                    prepared = false;
                    subscription = match watcher.subscribe(&vars.file_dir).await {
                        Ok(sub) => Some(sub),
                        Err(e) => {
                            warn!(
                                origin,
                                dir = %vars.file_dir.display(),
                                "Config watch failed: {e}"
                            );
                            None
                        }
                    };
                }
                if let Some(update) = subscription.as_mut().and_then(|sub| sub.consume()) {
                    config = update;
                    prepared = false;
                }

                match config.as_mut() {
                    Some(record) => {
                        if !prepared {
                            prepared = true;
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = prepare_config(record, vars, metadata.as_deref()) => {}
                            }
                        }
                        if record.is_complete() {
                            build_state(vars, record, origin)
                        } else {
                            debug!(origin, "Config is missing fields, nothing to show");
                            ViewingState::release(origin)
                        }
                    }
                    None => ViewingState::release(origin),
                }
            }
            None => ViewingState::release(origin),
        };

        if states.send(state).await.is_err() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
    debug!(origin, "Poller stopped");
}

/// One-shot preparation of a freshly loaded config: infer a `match`
/// pattern from the directory when none is declared, and fill a missing
/// title or cover from the metadata service. Both results are appended to
/// the file, which comes back through the watcher as a new record.
async fn prepare_config(
    record: &mut ConfigRecord,
    vars: &PlayerVars,
    metadata: Option<&MetadataClient>,
) {
    if record.wants_inferred_pattern() {
        match minori_pattern::infer_from_dir(&vars.file_dir) {
            Ok(Some(inferred)) => match EpisodePattern::compile(&inferred) {
                Ok(pattern) => {
                    info!(
                        pattern = %inferred,
                        dir = %vars.file_dir.display(),
                        "Inferred episode pattern"
                    );
                    if let Err(e) = config::append_inferred_pattern(&vars.file_dir, &inferred) {
                        warn!("Cannot write the inferred pattern back: {e}");
                    }
                    record.set_pattern(pattern);
                }
                Err(e) => warn!(pattern = %inferred, "Inferred pattern does not compile: {e}"),
            },
            Ok(None) => debug!(dir = %vars.file_dir.display(), "No pattern could be inferred"),
            Err(e) => warn!("Directory scan for pattern inference failed: {e}"),
        }
    }

    if record.is_complete() {
        return;
    }
    let Some(client) = metadata else { return };
    let Some(url) = record.url.clone() else { return };

    match client.lookup(&url).await {
        Ok(Some(meta)) => {
            let mut fetched: Vec<(&str, String)> = Vec::new();
            if record.title.is_none() {
                if let Some(title) = meta.title {
                    record.title = Some(title.clone());
                    fetched.push(("title", title));
                }
            }
            if record.image_url.is_none() {
                if let Some(image_url) = meta.image_url {
                    record.image_url = Some(image_url.clone());
                    fetched.push(("image_url", image_url));
                }
            }
            if !fetched.is_empty() {
                if let Err(e) = config::append_fetched_metadata(&vars.file_dir, &fetched) {
                    warn!("Cannot write fetched metadata back: {e}");
                }
            }
        }
        Ok(None) => {}
        Err(e) => warn!(url = %url, "Metadata fetch failed: {e}"),
    }
}

enum Next {
    State(ViewingState),
    Idle,
    Closed,
}

async fn next_state(
    states: &mut mpsc::Receiver<ViewingState>,
    idle_timeout: Option<Duration>,
) -> Next {
    match idle_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, states.recv()).await {
            Ok(Some(state)) => Next::State(state),
            Ok(None) => Next::Closed,
            Err(_) => Next::Idle,
        },
        None => match states.recv().await {
            Some(state) => Next::State(state),
            None => Next::Closed,
        },
    }
}

/// The consumer half: drains the queue, arbitrates origins and drives the
/// presence engine.
pub struct Reconciler<C> {
    engine: PresenceEngine<C>,
    arbiter: OriginArbiter,
    logger: StateLogger,
    timer: UpdateTimer,
    metadata: Option<Arc<MetadataClient>>,
    fetch_episode_titles: bool,
    status: watch::Sender<ViewingState>,
    last_position: Option<u64>,
}

impl<C: PresenceClient> Reconciler<C> {
    pub fn new(
        client: C,
        clear_on_pause: bool,
        timer: UpdateTimer,
        metadata: Option<Arc<MetadataClient>>,
        fetch_episode_titles: bool,
        status: watch::Sender<ViewingState>,
    ) -> Self {
        Self {
            engine: PresenceEngine::new(client, clear_on_pause),
            arbiter: OriginArbiter::new(),
            logger: StateLogger::default(),
            timer,
            metadata,
            fetch_episode_titles,
            status,
            last_position: None,
        }
    }

    /// Runs until the queue closes or `cancel` fires. An `Err` means the
    /// presence transport is gone for good; the caller should shut the
    /// whole process down.
    pub async fn run(
        mut self,
        mut states: mpsc::Receiver<ViewingState>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        // Idle wakeups are only needed to let the periodic timer fire
        // while no producer is emitting.
        let idle_timeout = self.timer.is_enabled().then_some(POLL_INTERVAL);

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = next_state(&mut states, idle_timeout) => received,
            };
            let state = match received {
                Next::State(state) => state,
                Next::Closed => break,
                Next::Idle => {
                    let last = self.engine.last_state();
                    if last.is_empty() {
                        continue;
                    }
                    let Some(owner) = self.arbiter.owner() else {
                        continue;
                    };
                    last.clone().with_origin(owner)
                }
            };

            let Some((mut state, origin)) = self.arbiter.admit(state) else {
                continue;
            };
            self.logger.observe(&state);

            if self.fetch_episode_titles {
                if let Some(client) = &self.metadata {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = fill_episode_title(&mut state, client) => {}
                    }
                }
            }

            self.timer.tick();
            let mut flags = UpdateFlags::empty();
            if self.timer.should_force_update() {
                flags |= UpdateFlags::PERIODIC;
            }
            if let (Some(last), Some(current)) = (self.last_position, state.position) {
                if last.abs_diff(current) > SEEK_TOLERANCE_MS {
                    info!(
                        "Seeking from {} to {}",
                        ms2timestamp(last),
                        ms2timestamp(current)
                    );
                    flags |= UpdateFlags::SEEKING;
                }
            }
            let position = state.position;

            let updated = tokio::select! {
                _ = cancel.cancelled() => break,
                updated = self.engine.update(state, &origin, flags) => updated,
            };
            if let Err(e) = updated {
                error!("Presence transport lost: {e}");
                cancel.cancel();
                return Err(e.into());
            }

            if let Some(position) = position {
                self.last_position = Some(position);
            }
            if self.engine.last_state().is_empty() {
                self.arbiter.release();
                self.last_position = None;
            }
            self.status.send_replace(self.engine.last_state().clone());
        }

        // The closing clear gets one poll interval, then shutdown proceeds
        // without it.
        let _ = tokio::time::timeout(POLL_INTERVAL, self.engine.clear()).await;
        Ok(())
    }
}

/// Best-effort fill of a missing episode title.
async fn fill_episode_title(state: &mut ViewingState, metadata: &MetadataClient) {
    if state.episode_title.is_some() {
        return;
    }
    let (Some(url), Some(Episode::Numbered(number))) = (&state.url, &state.episode) else {
        return;
    };
    match metadata.episode_title(url, number).await {
        Ok(Some(title)) => state.episode_title = Some(title),
        Ok(None) => {}
        Err(e) => warn!("Episode title fetch failed: {e}"),
    }
}
