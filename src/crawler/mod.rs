//! Background crawler: claims jobs from the crawl queue, fetches each page
//! and stores the extracted metadata as the link's details.

pub mod extract;
pub mod fetch;
pub mod worker;

use thiserror::Error;

pub use extract::{extract_metadata, PageMetadata};
pub use fetch::{FetchedPage, HttpFetcher, PageFetcher};
pub use worker::{spawn_workers, CrawlWorker, WorkerConfig};

/// Why a single crawl attempt failed. Recorded on the job as `last_error`;
/// never surfaced to API callers.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("could not resolve host: {0}")]
    Resolve(String),

    #[error("host {0} resolves to a private or reserved address")]
    PrivateAddress(String),

    #[error("upstream responded with HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] crate::error::AppError),
}

impl CrawlError {
    /// Errors that no retry can fix; the job is dead-lettered at once.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CrawlError::InvalidUrl(_)
                | CrawlError::UnsupportedScheme(_)
                | CrawlError::PrivateAddress(_)
        )
    }
}
