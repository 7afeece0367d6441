//! Per-directory `rpc.config` records.
//!
//! Each watched media directory carries an `rpc.config` of `key=value`
//! lines declaring the show's metadata. Records are replaced wholesale on
//! every reload; nothing mutates one in place.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use minori_pattern::EpisodePattern;
use tracing::warn;

use crate::error::ConfigError;

/// File name looked up in every watched directory.
pub const CONFIG_FILE_NAME: &str = "rpc.config";

/// Application id used when a config does not declare its own.
pub const DEFAULT_APPLICATION_ID: u64 = 1088900742523392133;

const DEFAULT_URL_TEXT: &str = "View Anime";

/// A parsed `rpc.config`. Sparse: `title` and `image_url` may still be
/// missing after parsing and get filled from the metadata service later.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub url_text: String,
    pub rewatching: bool,
    pub application_id: u64,
    /// The `match=` line as written. Kept even when it fails to compile;
    /// pattern inference only runs when no `match` line exists at all.
    pub raw_pattern: Option<String>,
    pub pattern: Option<EpisodePattern>,
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

impl ConfigRecord {
    /// Parse the `rpc.config` inside `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&path)?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: PathBuf) -> Result<Self, ConfigError> {
        let mut record = Self {
            title: None,
            image_url: None,
            url: None,
            url_text: DEFAULT_URL_TEXT.to_string(),
            rewatching: false,
            application_id: DEFAULT_APPLICATION_ID,
            raw_pattern: None,
            pattern: None,
            path,
            loaded_at: Utc::now(),
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine(line.to_string()));
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "title" => record.title = non_empty(value),
                "image_url" => record.image_url = non_empty(value),
                "url" => record.url = non_empty(value),
                "url_text" => record.url_text = value.to_string(),
                "rewatching" => {
                    record.rewatching = value.parse::<i64>().map(|n| n != 0).unwrap_or(false);
                }
                "application_id" => {
                    record.application_id = value.parse().unwrap_or(DEFAULT_APPLICATION_ID);
                }
                "match" => {
                    record.raw_pattern = Some(value.to_string());
                    record.pattern = match EpisodePattern::compile(value) {
                        Ok(pattern) => Some(pattern),
                        Err(e) => {
                            warn!(error = %e, path = %record.path.display(), "config pattern does not compile");
                            None
                        }
                    };
                }
                other => warn!(key = other, path = %record.path.display(), "unknown config key"),
            }
        }

        Ok(record)
    }

    /// Whether the record carries everything a pushable state needs.
    /// Incomplete records make their origin emit release states.
    pub fn is_complete(&self) -> bool {
        self.title.is_some() && self.image_url.is_some()
    }

    /// Whether pattern inference should run for this record.
    pub fn wants_inferred_pattern(&self) -> bool {
        self.raw_pattern.is_none()
    }

    /// Install an inferred pattern without touching the file. The caller
    /// appends the `match=` line separately.
    pub fn set_pattern(&mut self, pattern: EpisodePattern) {
        self.raw_pattern = Some(pattern.source().to_string());
        self.pattern = Some(pattern);
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Append an inferred `match=` line to the directory's config file.
pub fn append_inferred_pattern(dir: &Path, pattern: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(CONFIG_FILE_NAME))?;
    write!(file, "\n# Automatically generated pattern\nmatch={pattern}\n")
}

/// Append `key=value` lines fetched from the metadata service.
pub fn append_fetched_metadata(dir: &Path, entries: &[(&str, String)]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(CONFIG_FILE_NAME))?;
    let lines: Vec<String> = entries
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    write!(file, "\n# Fetched metadata\n{}\n", lines.join("\n"))
}
