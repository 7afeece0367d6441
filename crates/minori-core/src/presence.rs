//! Turns viewing states into remote activity payloads.
//!
//! The engine owns the last pushed state and payload. Every admitted state
//! flows through [`PresenceEngine::update`], which decides between pushing a
//! freshly rendered payload, re-issuing the previous one (periodic
//! heartbeats), skipping (duplicate content), or clearing.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use tracing::{info, warn};

use crate::config::DEFAULT_APPLICATION_ID;
use crate::error::PresenceError;
use crate::format::{ms2timestamp, quote, truncate};
use crate::state::{Episode, ViewingState, WatchPhase};

const PLAYING_IMAGE: &str =
    "https://raw.githubusercontent.com/minoridev/minori/main/assets/play.png";
const PAUSED_IMAGE: &str =
    "https://raw.githubusercontent.com/minoridev/minori/main/assets/pause.png";

const MAX_TEXT_LEN: usize = 128;
const MAX_BUTTON_LABEL_LEN: usize = 32;
const MAX_BUTTON_URL_LEN: usize = 512;

/// Invisible suffix toggled on `large_text` so periodic re-pushes differ
/// byte-wise without resetting the visible timestamps.
const HEARTBEAT_MARKER: char = '\u{200B}';

bitflags! {
    /// Reasons to push even when the rendered content is unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u8 {
        /// The playback position jumped beyond the discrepancy tolerance.
        const SEEKING = 0b0000_0001;
        /// The periodic update timer expired.
        const PERIODIC = 0b0000_0010;
    }
}

/// One push's worth of remote activity fields, fully rendered and owned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivityPayload {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub button: Option<PayloadButton>,
}

/// A single clickable link under the activity card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadButton {
    pub label: String,
    pub url: String,
}

/// Transport to the remote presence service.
///
/// `push` reports transient transport failures as `Ok(false)`; an `Err` means
/// the transport is gone for good and the caller should shut down.
pub trait PresenceClient: Send {
    fn push(
        &mut self,
        application_id: u64,
        payload: &ActivityPayload,
    ) -> impl Future<Output = Result<bool, PresenceError>> + Send;

    fn clear(&mut self) -> impl Future<Output = Result<(), PresenceError>> + Send;
}

/// Maps an internal origin tag to the service name shown on the card.
fn service_name(origin: &str) -> &str {
    match origin {
        "mpc" => "MPC-HC",
        "mpv-ipc" | "mpv-webui" => "mpv",
        "www.bilibili.tv" => "BiliBili (Bstation)",
        other => other,
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Renders a validated playing or paused state into a payload.
///
/// Callers guarantee that `title`, `episode`, `position`, `duration` and
/// `image_url` are present; anything else falls back to empty strings.
fn render(state: &ViewingState, origin: &str, paused: bool, now: i64) -> ActivityPayload {
    let title = state.title.as_deref().unwrap_or_default();
    let episode = state.episode.clone().unwrap_or(Episode::Movie);
    let position = state.position.unwrap_or_default();
    let duration = state.duration.unwrap_or_default();

    let verb = if state.rewatching.unwrap_or_default() {
        "Rewatching"
    } else {
        "Watching"
    };
    // While paused with an episode title, the show title moves off `details`
    // and onto the hover text.
    let mut large_text = verb.to_string();
    if paused && state.episode_title.is_some() {
        large_text.push(' ');
        large_text.push_str(&quote(title));
    }
    large_text.push_str(" on ");
    large_text.push_str(service_name(origin));

    let (details, state_line, start, end, small_image, small_text) = if paused {
        let details = match (&episode, &state.episode_title) {
            (Episode::Movie, _) => title.to_string(),
            (Episode::Numbered(n), Some(episode_title)) => {
                format!("Episode {n} {}", quote(episode_title))
            }
            (Episode::Numbered(n), None) => format!("{} E{n}", quote(title)),
        };
        let state_line = format!(
            "Paused - {} / {}",
            ms2timestamp(position),
            ms2timestamp(duration)
        );
        (details, state_line, None, None, PAUSED_IMAGE, "Paused")
    } else {
        let mut state_line = match &episode {
            Episode::Movie => "Movie".to_string(),
            Episode::Numbered(n) => format!("Episode {n}"),
        };
        if let Some(episode_title) = &state.episode_title {
            state_line.push(' ');
            state_line.push_str(&quote(episode_title));
        }
        let start = now - (position / 1000) as i64;
        let end = now + (duration.saturating_sub(position) / 1000) as i64;
        (
            title.to_string(),
            state_line,
            Some(start),
            Some(end),
            PLAYING_IMAGE,
            "Playing",
        )
    };

    let button = match (&state.url, &state.url_text) {
        (Some(url), Some(label)) if !url.is_empty() && !label.is_empty() => Some(PayloadButton {
            label: truncate(label, MAX_BUTTON_LABEL_LEN),
            url: truncate(url, MAX_BUTTON_URL_LEN),
        }),
        _ => None,
    };

    ActivityPayload {
        details: truncate(&details, MAX_TEXT_LEN),
        state: truncate(&state_line, MAX_TEXT_LEN),
        large_image: state
            .image_url
            .clone()
            .unwrap_or_else(|| PLAYING_IMAGE.to_string()),
        // One char of headroom so the heartbeat marker never exceeds the
        // remote field limit.
        large_text: truncate(&large_text, MAX_TEXT_LEN - 1),
        small_image: small_image.to_string(),
        small_text: small_text.to_string(),
        start,
        end,
        button,
    }
}

/// Dedup, heartbeat and clear logic around a [`PresenceClient`].
pub struct PresenceEngine<C> {
    client: C,
    clear_on_pause: bool,
    last_state: ViewingState,
    last_payload: Option<ActivityPayload>,
    retry_pending: bool,
}

impl<C: PresenceClient> PresenceEngine<C> {
    pub fn new(client: C, clear_on_pause: bool) -> Self {
        Self {
            client,
            clear_on_pause,
            last_state: ViewingState::default(),
            last_payload: None,
            retry_pending: false,
        }
    }

    /// The state backing the currently visible presence. Empty when cleared.
    pub fn last_state(&self) -> &ViewingState {
        &self.last_state
    }

    /// Feeds one admitted state through the engine.
    ///
    /// Invalid non-empty states are dropped with a warning and leave the
    /// visible presence untouched. Errors are fatal transport loss.
    pub async fn update(
        &mut self,
        state: ViewingState,
        origin: &str,
        flags: UpdateFlags,
    ) -> Result<(), PresenceError> {
        if state.is_empty() {
            return self.clear().await;
        }

        let missing = state.missing_required();
        if !missing.is_empty() {
            warn!(?missing, "Dropping incomplete state, keeping current presence");
            return Ok(());
        }

        let paused = match state.phase {
            Some(WatchPhase::Playing) => false,
            Some(WatchPhase::Paused) if !self.clear_on_pause => true,
            _ => return self.clear().await,
        };

        let content_equal = state.eq_ignoring_volatile(&self.last_state);
        if content_equal && flags.is_empty() && !self.retry_pending {
            // Same content, nothing forcing a push. Track the position so
            // seek detection and the status endpoint stay current.
            self.last_state = state;
            return Ok(());
        }

        let payload = if content_equal && flags == UpdateFlags::PERIODIC && !self.retry_pending {
            match &self.last_payload {
                // Re-issuing the previous payload keeps the absolute
                // timestamps, so the visible elapsed time does not reset.
                Some(previous) => {
                    let mut payload = previous.clone();
                    if payload.large_text.ends_with(HEARTBEAT_MARKER) {
                        payload.large_text.pop();
                    } else {
                        payload.large_text.push(HEARTBEAT_MARKER);
                    }
                    payload
                }
                None => render(&state, origin, paused, unix_now()),
            }
        } else {
            render(&state, origin, paused, unix_now())
        };

        let label = if paused { "PAUSED" } else { "PLAYING" };
        let mut subject = state.title.clone().unwrap_or_default();
        if let Some(Episode::Numbered(n)) = &state.episode {
            subject.push_str(&format!(" E{n}"));
        }
        info!(
            "Setting presence to [{label}] {subject} @ {}",
            ms2timestamp(state.position.unwrap_or_default())
        );

        let application_id = state.application_id.unwrap_or(DEFAULT_APPLICATION_ID);
        let pushed = self.client.push(application_id, &payload).await?;
        if pushed {
            self.last_payload = Some(payload);
            self.retry_pending = false;
        } else {
            self.retry_pending = true;
        }
        self.last_state = state;
        Ok(())
    }

    /// Clears the visible presence. No transport call when already cleared.
    pub async fn clear(&mut self) -> Result<(), PresenceError> {
        if !self.last_state.is_empty() {
            info!("Clearing presence");
            self.client.clear().await?;
        }
        self.last_state = ViewingState::default();
        self.last_payload = None;
        self.retry_pending = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Default)]
    struct Recorded {
        pushes: Vec<(u64, ActivityPayload)>,
        clears: usize,
        failures_left: usize,
    }

    #[derive(Clone, Default)]
    struct MockClient(Arc<Mutex<Recorded>>);

    impl MockClient {
        fn recorded(&self) -> MutexGuard<'_, Recorded> {
            self.0.lock().unwrap()
        }
    }

    impl PresenceClient for MockClient {
        async fn push(
            &mut self,
            application_id: u64,
            payload: &ActivityPayload,
        ) -> Result<bool, PresenceError> {
            let mut recorded = self.0.lock().unwrap();
            recorded.pushes.push((application_id, payload.clone()));
            if recorded.failures_left > 0 {
                recorded.failures_left -= 1;
                return Ok(false);
            }
            Ok(true)
        }

        async fn clear(&mut self) -> Result<(), PresenceError> {
            self.0.lock().unwrap().clears += 1;
            Ok(())
        }
    }

    fn playing_state() -> ViewingState {
        ViewingState {
            title: Some("Dandadan".into()),
            episode: Some(Episode::Numbered("7".into())),
            episode_title: None,
            position: Some(60_000),
            duration: Some(1_440_000),
            phase: Some(WatchPhase::Playing),
            url: Some("https://example.org/dandadan".into()),
            url_text: Some("View Anime".into()),
            image_url: Some("https://img.example.org/dandadan.jpg".into()),
            rewatching: Some(false),
            origin: None,
            application_id: Some(4242),
        }
    }

    #[tokio::test]
    async fn test_playing_push_renders_episode_line() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let recorded = client.recorded();
        assert_eq!(recorded.pushes.len(), 1);
        let (application_id, payload) = &recorded.pushes[0];
        assert_eq!(*application_id, 4242);
        assert_eq!(payload.details, "Dandadan");
        assert_eq!(payload.state, "Episode 7");
        assert_eq!(payload.large_text, "Watching on MPC-HC");
        assert_eq!(payload.small_text, "Playing");
        assert!(payload.start.is_some() && payload.end.is_some());
        let span = payload.end.unwrap() - payload.start.unwrap();
        assert_eq!(span, 1_440);
        let button = payload.button.as_ref().unwrap();
        assert_eq!(button.label, "View Anime");
        assert_eq!(button.url, "https://example.org/dandadan");
    }

    #[tokio::test]
    async fn test_duplicate_content_pushes_once() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut advanced = playing_state();
        advanced.position = Some(61_000);
        engine
            .update(advanced.clone(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        assert_eq!(client.recorded().pushes.len(), 1);
        assert_eq!(engine.last_state().position, Some(61_000));
    }

    #[tokio::test]
    async fn test_seek_flag_forces_push() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut jumped = playing_state();
        jumped.position = Some(600_000);
        engine
            .update(jumped, "mpc", UpdateFlags::SEEKING)
            .await
            .unwrap();

        let recorded = client.recorded();
        assert_eq!(recorded.pushes.len(), 2);
        let span = recorded.pushes[1].1.end.unwrap() - recorded.pushes[1].1.start.unwrap();
        assert_eq!(span, 1_440);
    }

    #[tokio::test]
    async fn test_heartbeat_reissues_previous_payload() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut later = playing_state();
        later.position = Some(120_000);
        engine
            .update(later.clone(), "mpc", UpdateFlags::PERIODIC)
            .await
            .unwrap();
        engine
            .update(later, "mpc", UpdateFlags::PERIODIC)
            .await
            .unwrap();

        let recorded = client.recorded();
        assert_eq!(recorded.pushes.len(), 3);
        let first = &recorded.pushes[0].1;
        let second = &recorded.pushes[1].1;
        let third = &recorded.pushes[2].1;

        // Timestamps are carried over verbatim, only the marker toggles.
        assert_eq!(second.start, first.start);
        assert_eq!(second.end, first.end);
        assert_eq!(
            second.large_text,
            format!("{}{HEARTBEAT_MARKER}", first.large_text)
        );
        assert_eq!(third, first);
    }

    #[tokio::test]
    async fn test_paused_render_without_episode_title() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.phase = Some(WatchPhase::Paused);
        engine.update(state, "mpv-ipc", UpdateFlags::empty()).await.unwrap();

        let recorded = client.recorded();
        let payload = &recorded.pushes[0].1;
        assert_eq!(payload.details, "\"Dandadan\" E7");
        assert_eq!(payload.state, "Paused - 0:01:00 / 0:24:00");
        assert_eq!(payload.large_text, "Watching on mpv");
        assert_eq!(payload.small_text, "Paused");
        assert!(payload.start.is_none() && payload.end.is_none());
    }

    #[tokio::test]
    async fn test_paused_render_with_episode_title() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.phase = Some(WatchPhase::Paused);
        state.episode_title = Some("The Evil Eye".into());
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        let recorded = client.recorded();
        let payload = &recorded.pushes[0].1;
        assert_eq!(payload.details, "Episode 7 \"The Evil Eye\"");
        assert_eq!(payload.large_text, "Watching \"Dandadan\" on MPC-HC");
    }

    #[tokio::test]
    async fn test_clear_on_pause_clears_instead_of_rendering() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), true);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut state = playing_state();
        state.phase = Some(WatchPhase::Paused);
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        assert_eq!(client.recorded().pushes.len(), 1);
        assert_eq!(client.recorded().clears, 1);
        assert!(engine.last_state().is_empty());
    }

    #[tokio::test]
    async fn test_clear_skips_transport_when_already_cleared() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(ViewingState::default(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();
        engine.clear().await.unwrap();

        assert_eq!(client.recorded().clears, 0);
    }

    #[tokio::test]
    async fn test_stopped_phase_clears_once() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut stopped = playing_state();
        stopped.phase = Some(WatchPhase::Stopped);
        engine.update(stopped, "mpc", UpdateFlags::empty()).await.unwrap();
        engine
            .update(ViewingState::default(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        assert_eq!(client.recorded().clears, 1);
    }

    #[tokio::test]
    async fn test_incomplete_state_keeps_previous_presence() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut broken = playing_state();
        broken.image_url = None;
        engine.update(broken, "mpc", UpdateFlags::empty()).await.unwrap();

        assert_eq!(client.recorded().pushes.len(), 1);
        assert_eq!(client.recorded().clears, 0);
        assert_eq!(engine.last_state(), &playing_state());
    }

    #[tokio::test]
    async fn test_failed_push_retries_on_next_update() {
        let client = MockClient::default();
        client.recorded().failures_left = 1;
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        let mut advanced = playing_state();
        advanced.position = Some(62_000);
        engine
            .update(advanced.clone(), "mpc", UpdateFlags::empty())
            .await
            .unwrap();
        engine
            .update(advanced, "mpc", UpdateFlags::empty())
            .await
            .unwrap();

        // Second call retries with a fresh render, third dedups again.
        let recorded = client.recorded();
        assert_eq!(recorded.pushes.len(), 2);
        assert_eq!(recorded.pushes[1].1.details, "Dandadan");
    }

    #[tokio::test]
    async fn test_movie_renders_without_episode_number() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.episode = Some(Episode::Movie);
        state.title = Some("Suzume".into());
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        let recorded = client.recorded();
        let payload = &recorded.pushes[0].1;
        assert_eq!(payload.details, "Suzume");
        assert_eq!(payload.state, "Movie");
    }

    #[tokio::test]
    async fn test_rewatching_changes_verb() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.rewatching = Some(true);
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        assert_eq!(client.recorded().pushes[0].1.large_text, "Rewatching on MPC-HC");
    }

    #[tokio::test]
    async fn test_long_fields_are_truncated() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.title = Some("x".repeat(300));
        state.url_text = Some("y".repeat(64));
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        let recorded = client.recorded();
        let payload = &recorded.pushes[0].1;
        assert_eq!(payload.details.chars().count(), 128);
        assert!(payload.details.ends_with('…'));
        let button = payload.button.as_ref().unwrap();
        assert_eq!(button.label.chars().count(), 32);
    }

    #[tokio::test]
    async fn test_default_application_id_when_unset() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.application_id = None;
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        assert_eq!(client.recorded().pushes[0].0, DEFAULT_APPLICATION_ID);
    }

    #[tokio::test]
    async fn test_button_omitted_without_url() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        let mut state = playing_state();
        state.url = None;
        engine.update(state, "mpc", UpdateFlags::empty()).await.unwrap();

        assert!(client.recorded().pushes[0].1.button.is_none());
    }

    #[tokio::test]
    async fn test_unmapped_origin_shown_verbatim() {
        let client = MockClient::default();
        let mut engine = PresenceEngine::new(client.clone(), false);
        engine
            .update(playing_state(), "www.example.org", UpdateFlags::empty())
            .await
            .unwrap();

        assert_eq!(
            client.recorded().pushes[0].1.large_text,
            "Watching on www.example.org"
        );
    }

    #[test]
    fn test_cjk_titles_use_corner_bracket_quotes() {
        let mut state = playing_state();
        state.phase = Some(WatchPhase::Paused);
        state.title = Some("ダンダダン".into());
        let payload = render(&state, "mpc", true, 1_000);
        assert_eq!(payload.details, "「ダンダダン」 E7");
    }
}
