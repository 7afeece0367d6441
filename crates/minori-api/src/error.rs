use thiserror::Error;

/// Errors from the metadata client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {url}")]
    Api { status: u16, url: String },

    #[error("no cache directory available on this system")]
    NoCacheDir,
}
