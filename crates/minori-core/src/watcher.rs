//! Hot-reload of `rpc.config` files.
//!
//! One task owns the OS watcher and fans changes out to per-directory
//! `tokio::watch` channels. Directories are watched non-recursively and
//! refcounted, so several pollers landing in the same directory share one
//! OS watch. Raw events are debounced per directory; only the state of the
//! file once it settles matters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ConfigRecord, CONFIG_FILE_NAME};
use crate::error::CoreError;

const DEBOUNCE: Duration = Duration::from_secs(1);

type ConfigUpdate = Option<ConfigRecord>;

enum Command {
    Subscribe {
        dir: PathBuf,
        reply: oneshot::Sender<Result<watch::Receiver<ConfigUpdate>, String>>,
    },
    Unsubscribe {
        dir: PathBuf,
    },
}

/// Handle to the watcher task. Cheap to clone.
#[derive(Clone)]
pub struct ConfigWatcher {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConfigWatcher {
    /// Starts the watcher task. Needs a running runtime.
    pub fn spawn() -> Result<Self, CoreError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = event_tx.send(event);
        })
        .map_err(|e| CoreError::Watcher(e.to_string()))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(watcher, command_rx, event_rx));
        Ok(Self { commands })
    }

    /// Watches `dir` and returns a subscription primed with the current
    /// config (or `None` when the file is missing or unreadable).
    pub async fn subscribe(&self, dir: &Path) -> Result<ConfigSubscription, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                dir: dir.to_path_buf(),
                reply,
            })
            .map_err(|_| CoreError::Watcher("watcher task is gone".into()))?;
        let mut updates = rx
            .await
            .map_err(|_| CoreError::Watcher("watcher task is gone".into()))?
            .map_err(CoreError::Watcher)?;
        // Surface the initial value through the first consume().
        updates.mark_changed();
        Ok(ConfigSubscription {
            dir: dir.to_path_buf(),
            updates,
            commands: self.commands.clone(),
        })
    }
}

/// A refcounted view of one directory's config. Unsubscribes on drop.
pub struct ConfigSubscription {
    dir: PathBuf,
    updates: watch::Receiver<ConfigUpdate>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConfigSubscription {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The latest delivery since the last call. `None` means nothing new;
    /// `Some(None)` means the config file is gone.
    pub fn consume(&mut self) -> Option<ConfigUpdate> {
        self.updates
            .has_changed()
            .unwrap_or(false)
            .then(|| self.updates.borrow_and_update().clone())
    }
}

impl Drop for ConfigSubscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            dir: self.dir.clone(),
        });
    }
}

struct DirWatch {
    subscribers: usize,
    updates: watch::Sender<ConfigUpdate>,
}

async fn run(
    mut watcher: RecommendedWatcher,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    let mut dirs: HashMap<PathBuf, DirWatch> = HashMap::new();
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_deadline = pending.values().min().copied();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Subscribe { dir, reply }) => {
                    let _ = reply.send(subscribe_dir(&mut watcher, &mut dirs, dir));
                }
                Some(Command::Unsubscribe { dir }) => {
                    let drained = dirs.get_mut(&dir).map(|entry| {
                        entry.subscribers -= 1;
                        entry.subscribers == 0
                    });
                    if drained == Some(true) {
                        dirs.remove(&dir);
                        pending.remove(&dir);
                        if let Err(e) = watcher.unwatch(&dir) {
                            debug!(dir = %dir.display(), "Unwatch failed: {e}");
                        }
                        debug!(dir = %dir.display(), "Stopped watching");
                    }
                }
                None => break,
            },
            event = events.recv() => match event {
                Some(Ok(event)) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        if path.file_name().is_none_or(|name| name != CONFIG_FILE_NAME) {
                            continue;
                        }
                        let Some(dir) = path.parent() else { continue };
                        if dirs.contains_key(dir) {
                            pending.insert(dir.to_path_buf(), Instant::now() + DEBOUNCE);
                        }
                    }
                }
                Some(Err(e)) => warn!("File watcher error: {e}"),
                None => break,
            },
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() =>
            {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, at)| **at <= now)
                    .map(|(dir, _)| dir.clone())
                    .collect();
                for dir in due {
                    pending.remove(&dir);
                    if let Some(entry) = dirs.get(&dir) {
                        reload(&dir, &entry.updates);
                    }
                }
            }
        }
    }
}

fn subscribe_dir(
    watcher: &mut RecommendedWatcher,
    dirs: &mut HashMap<PathBuf, DirWatch>,
    dir: PathBuf,
) -> Result<watch::Receiver<ConfigUpdate>, String> {
    if let Some(entry) = dirs.get_mut(&dir) {
        entry.subscribers += 1;
        return Ok(entry.updates.subscribe());
    }

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| format!("cannot watch {}: {e}", dir.display()))?;
    debug!(dir = %dir.display(), "Watching for config changes");

    let (updates, rx) = watch::channel(initial_load(&dir));
    dirs.insert(
        dir,
        DirWatch {
            subscribers: 1,
            updates,
        },
    );
    Ok(rx)
}

fn initial_load(dir: &Path) -> ConfigUpdate {
    if !dir.join(CONFIG_FILE_NAME).exists() {
        return None;
    }
    match ConfigRecord::load(dir) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(dir = %dir.display(), "Ignoring unreadable config: {e}");
            None
        }
    }
}

/// Re-reads the settled file. A vanished file clears the subscription; a
/// file that no longer parses is ignored so subscribers keep the last good
/// config.
fn reload(dir: &Path, updates: &watch::Sender<ConfigUpdate>) {
    if !dir.join(CONFIG_FILE_NAME).exists() {
        debug!(dir = %dir.display(), "Config file removed");
        updates.send_replace(None);
        return;
    }
    match ConfigRecord::load(dir) {
        Ok(record) => {
            debug!(dir = %dir.display(), "Config reloaded");
            updates.send_replace(Some(record));
        }
        Err(e) => warn!(dir = %dir.display(), "Keeping previous config: {e}"),
    }
}
