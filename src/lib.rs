//! Fetcher Core Library
//!
//! Fetches remote resources over HTTP(S), synchronously or asynchronously,
//! into memory buffers or files, with per-download progress reporting and
//! cancellation.
//!
//! # Architecture
//!
//! - [`download`] - task model, single-download state machine and the coordinator
//! - [`transport`] - non-blocking transport boundary and its reqwest/tokio implementation
//! - [`session`] - one-shot downloader with statistics and cookie capture, redirect finder

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod session;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transport;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use download::{
    BufferSink, ByteSink, DownloadCoordinator, DownloadError, DownloadState, DownloadTask,
    EvictionPolicy, FileSink, ProgressListener, Sink, SinkError, SingleDownloadExecution,
    StartError, TaskId, TaskSnapshot,
};
pub use session::{Downloader, RelocationFinder, SessionStats};
pub use transport::{HttpTransport, Transport, TransportConfig, TransportError};
