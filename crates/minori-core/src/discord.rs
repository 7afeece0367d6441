//! Discord transport for rendered payloads.
//!
//! A dedicated OS thread owns the IPC socket. The async side talks to it
//! through a command channel with a reply oneshot per call, so a wedged
//! socket can never stall the runtime. Reconnect attempts are paced by a
//! growing backoff; while the backoff window is open, pushes report failure
//! without touching the socket.

use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use discord_rich_presence::{activity, DiscordIpc, DiscordIpcClient};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::PresenceError;
use crate::presence::{ActivityPayload, PresenceClient};

const BACKOFF_STEP: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

enum Command {
    Push {
        application_id: u64,
        payload: ActivityPayload,
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable async handle to the IPC worker thread.
#[derive(Clone)]
pub struct DiscordPresence {
    tx: Sender<Command>,
}

impl DiscordPresence {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || Worker::default().run(rx));
        Self { tx }
    }

    /// Asks the worker to clear the activity, close the socket and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

impl PresenceClient for DiscordPresence {
    async fn push(
        &mut self,
        application_id: u64,
        payload: &ActivityPayload,
    ) -> Result<bool, PresenceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Push {
                application_id,
                payload: payload.clone(),
                reply,
            })
            .map_err(|_| PresenceError::WorkerGone)?;
        rx.await.map_err(|_| PresenceError::WorkerGone)
    }

    async fn clear(&mut self) -> Result<(), PresenceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Clear { reply })
            .map_err(|_| PresenceError::WorkerGone)?;
        rx.await.map_err(|_| PresenceError::WorkerGone)
    }
}

fn backoff_delay(streak: u32) -> Duration {
    (BACKOFF_STEP * streak).min(BACKOFF_CAP)
}

/// Failure pacing for the socket. Opens a retry window after each failure
/// and widens it with the streak.
#[derive(Default)]
struct Backoff {
    streak: u32,
    next_retry_at: Option<Instant>,
}

impl Backoff {
    fn ready(&self) -> bool {
        self.next_retry_at.is_none_or(|at| Instant::now() >= at)
    }

    /// Returns true when this failure opens a new episode.
    fn failure(&mut self) -> bool {
        let first = self.streak == 0;
        self.streak += 1;
        self.next_retry_at = Some(Instant::now() + backoff_delay(self.streak));
        first
    }

    /// Returns true when this success closes a failure episode.
    fn success(&mut self) -> bool {
        let recovered = self.streak > 0;
        self.streak = 0;
        self.next_retry_at = None;
        recovered
    }
}

#[derive(Default)]
struct Worker {
    client: Option<DiscordIpcClient>,
    bound_application_id: Option<u64>,
    backoff: Backoff,
}

impl Worker {
    fn run(mut self, rx: mpsc::Receiver<Command>) {
        while let Ok(command) = rx.recv() {
            match command {
                Command::Push {
                    application_id,
                    payload,
                    reply,
                } => {
                    let pushed = self.push(application_id, &payload);
                    let _ = reply.send(pushed);
                }
                Command::Clear { reply } => {
                    self.clear();
                    let _ = reply.send(());
                }
                Command::Shutdown => break,
            }
        }
        if let Some(mut client) = self.client.take() {
            let _ = client.clear_activity();
            let _ = client.close();
        }
    }

    fn push(&mut self, application_id: u64, payload: &ActivityPayload) -> bool {
        if !self.backoff.ready() {
            return false;
        }

        // A different application id needs its own handshake.
        if self.client.is_some() && self.bound_application_id != Some(application_id) {
            self.disconnect();
        }

        if self.client.is_none() {
            let mut client = DiscordIpcClient::new(&application_id.to_string());
            match client.connect() {
                Ok(()) => {
                    debug!(application_id, "Connected to the Discord socket");
                    self.client = Some(client);
                    self.bound_application_id = Some(application_id);
                }
                Err(e) => {
                    self.note_failure(&format!("connect failed: {e}"));
                    return false;
                }
            }
        }

        let Some(client) = self.client.as_mut() else {
            return false;
        };

        let mut activity = activity::Activity::new()
            .activity_type(activity::ActivityType::Watching)
            .details(&payload.details)
            .state(&payload.state)
            .assets(
                activity::Assets::new()
                    .large_image(&payload.large_image)
                    .large_text(&payload.large_text)
                    .small_image(&payload.small_image)
                    .small_text(&payload.small_text),
            );
        if payload.start.is_some() || payload.end.is_some() {
            let mut timestamps = activity::Timestamps::new();
            if let Some(start) = payload.start {
                timestamps = timestamps.start(start);
            }
            if let Some(end) = payload.end {
                timestamps = timestamps.end(end);
            }
            activity = activity.timestamps(timestamps);
        }
        if let Some(button) = &payload.button {
            activity = activity.buttons(vec![activity::Button::new(&button.label, &button.url)]);
        }

        match client.set_activity(activity) {
            Ok(()) => {
                if self.backoff.success() {
                    info!("Discord connection restored");
                }
                true
            }
            Err(e) => {
                self.disconnect();
                self.note_failure(&format!("activity update failed: {e}"));
                false
            }
        }
    }

    fn clear(&mut self) {
        if let Some(client) = self.client.as_mut() {
            if let Err(e) = client.clear_activity() {
                debug!("Clearing the remote activity failed: {e}");
                self.disconnect();
            }
        }
    }

    fn note_failure(&mut self, detail: &str) {
        if self.backoff.failure() {
            warn!("Discord unreachable ({detail}), backing off");
        } else {
            debug!("Discord still unreachable ({detail})");
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            let _ = client.close();
        }
        self.bound_application_id = None;
    }
}
