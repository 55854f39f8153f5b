//! Asynchronous download coordination.
//!
//! A [`DownloadCoordinator`] creates [`DownloadTask`]s, binds each one to a
//! [`SingleDownloadExecution`] on the shared [`Transport`](crate::transport::Transport)
//! and exposes start, cancel and wait operations. Response bytes are streamed
//! into the task's [`Sink`] as they arrive; a [`ProgressListener`] is told
//! about every change.
//!
//! # Features
//!
//! - Non-blocking start; blocking or async wait for termination
//! - Buffer, file and caller-supplied sinks
//! - Fire-and-forget cancellation
//! - Registry eviction on termination (configurable)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fetcher_core::download::{DownloadCoordinator, DownloadState};
//! use fetcher_core::transport::{HttpTransport, TransportConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new(&TransportConfig::default())?);
//! let coordinator = DownloadCoordinator::new(transport);
//! let task = coordinator.sync_download_file("https://example.com/paper.pdf", "paper.pdf", None);
//! if task.state() == DownloadState::Ok {
//!     println!("{} bytes", task.done_size());
//! }
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod coordinator;
mod error;
mod execution;
mod gate;
mod listener;
mod sink;
mod state;
mod task;

pub use coordinator::{DownloadCoordinator, EvictionPolicy};
pub use error::{DownloadError, SinkError, StartError};
pub use execution::SingleDownloadExecution;
pub use gate::TerminationGate;
pub use listener::ProgressListener;
pub use sink::{BufferSink, ByteSink, FileSink, Sink};
pub use state::DownloadState;
pub use task::{DownloadTask, TaskId, TaskSnapshot};
