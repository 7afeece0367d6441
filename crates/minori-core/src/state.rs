//! Viewing states: the normalized snapshot each source emits every tick.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Playback phase reported by a player.
///
/// Serialized as the integer the browser extensions and pollers exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum WatchPhase {
    NotAvailable = -1,
    Stopped = 0,
    Paused = 1,
    Playing = 2,
}

impl TryFrom<i8> for WatchPhase {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::NotAvailable),
            0 => Ok(Self::Stopped),
            1 => Ok(Self::Paused),
            2 => Ok(Self::Playing),
            other => Err(format!("unknown watching state {other}")),
        }
    }
}

impl From<WatchPhase> for i8 {
    fn from(phase: WatchPhase) -> Self {
        phase as i8
    }
}

/// Episode designator: a number (kept as text so `7.5` specials survive) or
/// the movie marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Episode {
    Numbered(String),
    Movie,
}

impl Episode {
    pub fn is_movie(&self) -> bool {
        matches!(self, Self::Movie)
    }

    pub fn number(&self) -> Option<&str> {
        match self {
            Self::Numbered(n) => Some(n),
            Self::Movie => None,
        }
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numbered(n) => f.write_str(n),
            Self::Movie => f.write_str("Movie"),
        }
    }
}

impl From<&str> for Episode {
    fn from(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("movie") {
            return Self::Movie;
        }
        Self::Numbered(strip_leading_zeros(raw))
    }
}

fn strip_leading_zeros(ep: &str) -> String {
    let mut s = ep;
    while s.len() >= 2 && s.starts_with('0') && s.as_bytes()[1].is_ascii_digit() {
        s = &s[1..];
    }
    s.to_string()
}

impl Serialize for Episode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Episode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EpisodeVisitor;

        impl Visitor<'_> for EpisodeVisitor {
            type Value = Episode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an episode number or the string \"Movie\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Episode, E> {
                Ok(Episode::Numbered(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Episode, E> {
                Ok(Episode::Numbered(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Episode, E> {
                Ok(Episode::Numbered(v.to_string()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Episode, E> {
                Ok(Episode::from(v))
            }
        }

        deserializer.deserialize_any(EpisodeVisitor)
    }
}

/// Snapshot of what one source believes is playing. Sparse on purpose: an
/// unset field means "unknown", and a state with nothing but an origin tag
/// is that origin's release signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewingState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<Episode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    /// Playback position in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    /// Media duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(rename = "watching_state", skip_serializing_if = "Option::is_none")]
    pub phase: Option<WatchPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewatching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Browser extensions send this either as a number or a numeric string.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_application_id"
    )]
    pub application_id: Option<u64>,
}

fn lenient_application_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid application id `{s}`"))),
    }
}

impl ViewingState {
    /// A bare-origin state: "this origin has nothing playing".
    pub fn release(origin: &str) -> Self {
        Self {
            origin: Some(origin.to_string()),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }

    /// True when every field except the origin tag is unset.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.episode.is_none()
            && self.episode_title.is_none()
            && self.position.is_none()
            && self.duration.is_none()
            && self.phase.is_none()
            && self.url.is_none()
            && self.url_text.is_none()
            && self.image_url.is_none()
            && self.rewatching.is_none()
            && self.application_id.is_none()
    }

    /// Content equality for dedup: position churns every second and origin is
    /// routing metadata, so neither counts as a change.
    pub fn eq_ignoring_volatile(&self, other: &Self) -> bool {
        self.title == other.title
            && self.episode == other.episode
            && self.episode_title == other.episode_title
            && self.duration == other.duration
            && self.phase == other.phase
            && self.url == other.url
            && self.url_text == other.url_text
            && self.image_url == other.image_url
            && self.rewatching == other.rewatching
            && self.application_id == other.application_id
    }

    /// Fields a non-empty state must carry to be rendered. Empty result
    /// means the state is pushable.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push("title");
        }
        if self.episode.is_none() {
            missing.push("episode");
        }
        if self.position.is_none() {
            missing.push("position");
        }
        if self.duration.is_none() {
            missing.push("duration");
        }
        if self.phase.is_none() {
            missing.push("watching_state");
        }
        if self.image_url.is_none() {
            missing.push("image_url");
        }
        missing
    }
}

/// Debug-logs received states once per content change. Position and
/// duration churn on every poll of a live player, so they are left out of
/// the comparison; a change of origin does count.
#[derive(Debug, Default)]
pub struct StateLogger {
    last: Option<ViewingState>,
}

impl StateLogger {
    pub fn observe(&mut self, state: &ViewingState) {
        let mut flat = state.clone();
        flat.position = None;
        flat.duration = None;

        if flat == ViewingState::default() {
            return;
        }

        if self.last.as_ref() != Some(&flat) {
            debug!(state = ?flat, "Received state");
        }
        self.last = Some(flat);
    }
}
