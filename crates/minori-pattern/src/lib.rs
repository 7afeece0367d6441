//! Episode-match patterns.
//!
//! A pattern is the `match=` value of an `rpc.config` file: a regex with the
//! placeholders `%ep%` (episode number, required) and `%title%` (embedded
//! episode title, optional), or the literal `movie` which matches any file.

mod infer;

pub use infer::{build_filename_pattern, infer_from_dir};

use regex::Regex;
use thiserror::Error;

const EP_PLACEHOLDER: &str = "%ep%";
const EP_REGEX: &str = r"(?P<ep>\d+(?:\.\d+)?)";
const TITLE_PLACEHOLDER: &str = "%title%";
const TITLE_REGEX: &str = r"(?P<title>.+)";

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern regex: {0}")]
    Regex(#[from] regex::Error),
    #[error("pattern `{0}` has no %ep% placeholder")]
    MissingEpisodePlaceholder(String),
}

/// Result of applying an [`EpisodePattern`] to a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeMatch {
    /// The pattern is the `movie` marker; any file counts as the movie.
    Movie,
    Numbered {
        /// Episode number with leading zeros stripped (`"07"` → `"7"`).
        /// Fractional episodes (`"7.5"`) are kept verbatim.
        episode: String,
        title: Option<String>,
    },
}

/// A compiled episode-match pattern.
///
/// Equality compares the original template, not the compiled regex, so
/// config records can be diffed cheaply on hot-reload.
#[derive(Debug, Clone)]
pub struct EpisodePattern {
    source: String,
    regex: Option<Regex>,
}

impl PartialEq for EpisodePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for EpisodePattern {}

impl EpisodePattern {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        if source.eq_ignore_ascii_case("movie") {
            return Ok(Self {
                source: source.to_string(),
                regex: None,
            });
        }

        if !source.contains(EP_PLACEHOLDER) {
            return Err(PatternError::MissingEpisodePlaceholder(source.to_string()));
        }

        let expanded = source
            .replacen(EP_PLACEHOLDER, EP_REGEX, 1)
            .replacen(TITLE_PLACEHOLDER, TITLE_REGEX, 1);
        let regex = Regex::new(&expanded)?;

        Ok(Self {
            source: source.to_string(),
            regex: Some(regex),
        })
    }

    /// The original template string, as written in the config file.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_movie(&self) -> bool {
        self.regex.is_none()
    }

    /// Match a file name against the pattern. `None` means the file does not
    /// belong to the configured series.
    pub fn apply(&self, file_name: &str) -> Option<EpisodeMatch> {
        let Some(regex) = &self.regex else {
            return Some(EpisodeMatch::Movie);
        };

        let caps = regex.captures(file_name)?;
        let episode = normalize_episode(caps.name("ep")?.as_str());
        let title = caps
            .name("title")
            .map(|m| m.as_str().trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Some(EpisodeMatch::Numbered { episode, title })
    }
}

fn normalize_episode(ep: &str) -> String {
    let mut s = ep;
    while s.len() >= 2 && s.starts_with('0') && s.as_bytes()[1].is_ascii_digit() {
        s = &s[1..];
    }
    s.to_string()
}
