//! Response shapes for the Jikan v4 REST API.

use serde::Deserialize;

// ── /anime/{id} ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnimeEnvelope {
    pub data: AnimeBody,
}

#[derive(Debug, Deserialize)]
pub struct AnimeBody {
    pub title: Option<String>,
    pub images: Option<ImageFormats>,
}

#[derive(Debug, Deserialize)]
pub struct ImageFormats {
    pub jpg: Option<ImageSet>,
    pub webp: Option<ImageSet>,
}

#[derive(Debug, Deserialize)]
pub struct ImageSet {
    pub image_url: Option<String>,
    pub large_image_url: Option<String>,
}

impl AnimeBody {
    /// The largest cover available, preferring jpg over webp.
    pub fn best_image(&self) -> Option<String> {
        let formats = self.images.as_ref()?;
        [formats.jpg.as_ref(), formats.webp.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|set| set.large_image_url.clone().or_else(|| set.image_url.clone()))
    }
}

// ── /anime/{id}/episodes ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EpisodePage {
    pub data: Vec<EpisodeEntry>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
pub struct EpisodeEntry {
    pub mal_id: u64,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub has_next_page: bool,
}
