//! On-disk metadata cache, one JSON file per anime id.
//!
//! A cache entry is written after the first fetch and consulted forever
//! after, including entries whose fields came back empty. Recording the
//! misses is what keeps a show with no cover or unnamed episodes from
//! being re-fetched on every poll.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything known about one anime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedAnime {
    pub id: u64,
    pub title: Option<String>,
    pub image_url: Option<String>,
    /// Episode number → title. An empty title records a known miss.
    #[serde(default)]
    pub episodes: BTreeMap<String, String>,
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl CachedAnime {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            updated_at_ms: now_ms(),
            ..Self::default()
        }
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = now_ms();
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn entry_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Missing and unreadable entries both read back as `None`; an unreadable
/// one is dropped so the next store can replace it.
pub fn load(dir: &Path, id: u64) -> Option<CachedAnime> {
    let raw = fs::read_to_string(entry_path(dir, id)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            debug!(id, "Discarding unreadable cache entry: {e}");
            None
        }
    }
}

pub fn store(dir: &Path, entry: &CachedAnime) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let raw = serde_json::to_string_pretty(entry)?;
    fs::write(entry_path(dir, entry.id), raw)
}
