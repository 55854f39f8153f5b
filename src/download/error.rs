//! Error types for the download module.
//!
//! Asynchronous downloads report failures through their terminal state, not
//! through these errors. They surface only where an operation is synchronous:
//! sink preparation and writes, starting a task, and the one-shot session
//! downloads.

use std::path::PathBuf;

use thiserror::Error;

use super::state::DownloadState;
use super::task::TaskId;

/// Errors raised by a [`ByteSink`](super::ByteSink).
#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination file could not be opened, written, flushed or closed.
    #[error("IO error on sink {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Bytes were offered to a sink that is not open.
    #[error("sink {sink} is not open")]
    NotOpen {
        /// Description of the sink.
        sink: String,
    },
}

impl SinkError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a not-open error.
    pub fn not_open(sink: impl Into<String>) -> Self {
        Self::NotOpen { sink: sink.into() }
    }
}

/// Errors returned when a download cannot be started.
#[derive(Debug, Error)]
pub enum StartError {
    /// The sink could not be prepared; the task is now `Failed`.
    #[error("task {id}: could not prepare sink: {source}")]
    Sink {
        /// The task that failed to start.
        id: TaskId,
        /// The sink preparation failure.
        #[source]
        source: SinkError,
    },

    /// The task already left `NotRunning`; its state is unchanged.
    #[error("task {id} cannot be started from state {state}")]
    AlreadyStarted {
        /// The task that was started twice.
        id: TaskId,
        /// The state the task was in.
        state: DownloadState,
    },

    /// The coordinator has no execution registered for this task.
    #[error("task {id} is not registered with this coordinator")]
    UnknownTask {
        /// The unknown task identifier.
        id: TaskId,
    },
}

/// Errors that can occur during one-shot session downloads.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (anything outside 2xx).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the downloaded body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, mapping timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// URL or path the source error does not carry.
