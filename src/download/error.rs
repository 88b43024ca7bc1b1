//! Error types for the fetch pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching a remote file.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The file exceeds the configured size limit.
    ///
    /// `declared` is true when the limit was detected from the advertised
    /// Content-Length before any bytes were transferred.
    #[error("file too large ({size} bytes, limit {limit}): {url}")]
    SizeExceeded {
        url: String,
        limit: u64,
        size: u64,
        declared: bool,
    },

    /// The transfer did not complete within the time budget.
    #[error("download timed out: {url}")]
    Timeout { url: String },

    /// A network-level failure from the HTTP client.
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server responded with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// A local filesystem failure while writing the artifact.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub(crate) fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub(crate) fn size_exceeded(
        url: impl Into<String>,
        limit: u64,
        size: u64,
        declared: bool,
    ) -> Self {
        Self::SizeExceeded {
            url: url.into(),
            limit,
            size,
            declared,
        }
    }

    pub(crate) fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub(crate) fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub(crate) fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// True when the declared or observed size exceeded the limit.
    #[must_use]
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, Self::SizeExceeded { .. })
    }
}
