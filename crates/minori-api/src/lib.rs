//! MyAnimeList metadata lookups backed by a local cache.
//!
//! Config files point at a MAL page through their `url` line; this crate
//! resolves that page to a show title, cover image and per-episode titles
//! through the Jikan REST API. Results are cached on disk per anime id, so
//! steady-state playback never touches the network.

mod cache;
mod error;
mod types;

pub use cache::CachedAnime;
pub use error::ApiError;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use directories::ProjectDirs;
use regex::Regex;
use reqwest::Client;
use tracing::{info, warn};

use types::{AnimeBody, AnimeEnvelope, EpisodePage};

const JIKAN_BASE_URL: &str = "https://api.jikan.moe/v4";

/// Upper bound on any one API call; a fetch stalls the producer that
/// asked for it, never the consumer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

static MAL_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://myanimelist\.net/anime/(\d+)").unwrap());

/// Extracts the MyAnimeList id when `url` points at a MAL anime page.
pub fn mal_id(url: &str) -> Option<u64> {
    MAL_URL_RE.captures(url)?.get(1)?.as_str().parse().ok()
}

/// Title and cover for a show, as far as the service knows them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimeMetadata {
    pub title: Option<String>,
    pub image_url: Option<String>,
}

/// Jikan-backed metadata client. Share behind an `Arc`.
pub struct MetadataClient {
    http: Client,
    cache_dir: PathBuf,
    memo: Mutex<HashMap<u64, CachedAnime>>,
}

impl MetadataClient {
    /// Uses the platform cache directory.
    pub fn new() -> Result<Self, ApiError> {
        let dirs = ProjectDirs::from("", "", "minori").ok_or(ApiError::NoCacheDir)?;
        Ok(Self::with_cache_dir(dirs.cache_dir().join("metadata")))
    }

    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            http: Client::new(),
            cache_dir,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Show title and cover for a MAL url. `Ok(None)` when the url is not
    /// a MAL anime page.
    pub async fn lookup(&self, url: &str) -> Result<Option<AnimeMetadata>, ApiError> {
        let Some(id) = mal_id(url) else {
            return Ok(None);
        };
        let entry = self.scraped(id).await?;
        Ok(Some(AnimeMetadata {
            title: entry.title,
            image_url: entry.image_url,
        }))
    }

    /// Title of one episode. `Ok(None)` when the url is not MAL or the
    /// service has no title for that episode.
    pub async fn episode_title(
        &self,
        url: &str,
        episode: &str,
    ) -> Result<Option<String>, ApiError> {
        let Some(id) = mal_id(url) else {
            return Ok(None);
        };
        let mut entry = self.scraped(id).await?;

        if let Some(title) = entry.episodes.get(episode) {
            return Ok(non_empty(title));
        }

        // A number we have never cached; most likely a freshly aired episode.
        info!(id, episode, "Unseen episode number, refreshing the episode cache");
        entry.episodes = self.fetch_episodes(id).await?;
        if !entry.episodes.contains_key(episode) {
            warn!(id, episode, "Episode is unknown to the metadata service");
            entry.episodes.insert(episode.to_string(), String::new());
        }
        entry.touch();
        let title = entry.episodes.get(episode).and_then(|t| non_empty(t));
        self.remember(entry);
        Ok(title)
    }

    /// The cache entry for `id`, fetching and persisting it on first use.
    async fn scraped(&self, id: u64) -> Result<CachedAnime, ApiError> {
        if let Some(entry) = self.memo.lock().unwrap().get(&id) {
            return Ok(entry.clone());
        }
        if let Some(entry) = cache::load(&self.cache_dir, id) {
            self.memo.lock().unwrap().insert(id, entry.clone());
            return Ok(entry);
        }

        info!(id, "Fetching metadata for anime");
        let mut entry = CachedAnime::new(id);
        let anime = self.fetch_anime(id).await?;
        entry.image_url = anime.best_image();
        entry.title = anime.title;
        entry.episodes = self.fetch_episodes(id).await?;
        self.remember(entry.clone());
        Ok(entry)
    }

    async fn fetch_anime(&self, id: u64) -> Result<AnimeBody, ApiError> {
        let url = format!("{JIKAN_BASE_URL}/anime/{id}");
        let resp = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Api {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(resp.json::<AnimeEnvelope>().await?.data)
    }

    async fn fetch_episodes(&self, id: u64) -> Result<BTreeMap<String, String>, ApiError> {
        let mut episodes = BTreeMap::new();
        let mut page = 1u32;
        loop {
            let url = format!("{JIKAN_BASE_URL}/anime/{id}/episodes?page={page}");
            let resp = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
            if !resp.status().is_success() {
                return Err(ApiError::Api {
                    status: resp.status().as_u16(),
                    url,
                });
            }
            let body: EpisodePage = resp.json().await?;
            for episode in body.data {
                episodes.insert(episode.mal_id.to_string(), episode.title.unwrap_or_default());
            }
            if body.pagination.is_none_or(|p| !p.has_next_page) {
                return Ok(episodes);
            }
            page += 1;
        }
    }

    fn remember(&self, entry: CachedAnime) {
        if let Err(e) = cache::store(&self.cache_dir, &entry) {
            warn!(id = entry.id, "Cache write failed: {e}");
        }
        self.memo.lock().unwrap().insert(entry.id, entry);
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_mal_id_matches_anime_pages() {
        assert_eq!(
            mal_id("https://myanimelist.net/anime/57334/Dandadan"),
            Some(57334)
        );
        assert_eq!(mal_id("http://myanimelist.net/anime/1"), Some(1));
        assert_eq!(mal_id("https://myanimelist.net/manga/2"), None);
        assert_eq!(mal_id("https://example.org/anime/3"), None);
        assert_eq!(mal_id("see https://myanimelist.net/anime/4"), None);
    }

    fn seeded_client(dir: &std::path::Path) -> MetadataClient {
        let mut entry = CachedAnime::new(57334);
        entry.title = Some("Dandadan".into());
        entry.image_url = Some("https://img.example.org/dandadan.jpg".into());
        entry.episodes.insert("1".into(), "That's How Love Starts, Ya Know?".into());
        entry.episodes.insert("2".into(), String::new());
        cache::store(dir, &entry).unwrap();
        MetadataClient::with_cache_dir(dir.to_path_buf())
    }

    #[tokio::test]
    async fn test_lookup_uses_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let client = seeded_client(dir.path());

        let meta = client
            .lookup("https://myanimelist.net/anime/57334/Dandadan")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.title.as_deref(), Some("Dandadan"));
        assert_eq!(
            meta.image_url.as_deref(),
            Some("https://img.example.org/dandadan.jpg")
        );
    }

    #[tokio::test]
    async fn test_lookup_ignores_non_mal_urls() {
        let dir = tempfile::tempdir().unwrap();
        let client = MetadataClient::with_cache_dir(dir.path().to_path_buf());
        let meta = client.lookup("https://example.org/anything").await.unwrap();
        assert!(meta.is_none());
    }

    #[tokio::test]
    async fn test_episode_title_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let client = seeded_client(dir.path());

        let title = client
            .episode_title("https://myanimelist.net/anime/57334", "1")
            .await
            .unwrap();
        assert_eq!(title.as_deref(), Some("That's How Love Starts, Ya Know?"));
    }

    #[tokio::test]
    async fn test_cached_miss_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let client = seeded_client(dir.path());

        // Episode 2 is cached as a known miss; a refetch would hit the
        // network and fail this offline test.
        let title = client
            .episode_title("https://myanimelist.net/anime/57334", "2")
            .await
            .unwrap();
        assert!(title.is_none());
    }

    #[tokio::test]
    async fn test_memo_survives_cache_file_removal() {
        let dir = tempfile::tempdir().unwrap();
        let client = seeded_client(dir.path());
        client
            .lookup("https://myanimelist.net/anime/57334")
            .await
            .unwrap();

        fs::remove_file(dir.path().join("57334.json")).unwrap();
        let meta = client
            .lookup("https://myanimelist.net/anime/57334")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.title.as_deref(), Some("Dandadan"));
    }
}
