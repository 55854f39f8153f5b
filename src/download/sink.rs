//! Byte sinks: the destinations that receive downloaded bytes incrementally.
//!
//! A sink goes through `start` → zero or more `handle_bytes` → `terminate`.
//! The execution driving a download calls `terminate` exactly once on every
//! exit path, including when `start` failed.
//!
//! Sinks are synchronous. [`FileSink`] is driven from transport callbacks
//! that run on runtime workers, so its disk I/O goes through
//! [`tokio::task::block_in_place`] whenever it is called on a multi-thread
//! runtime.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use super::error::SinkError;

/// Capability shared by every download destination.
///
/// The `Display` impl is the human-readable sink descriptor carried in task
/// snapshots.
pub trait ByteSink: Send + fmt::Display {
    /// Prepares the destination. No bytes may be offered after an error.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the destination cannot be allocated or opened.
    fn start(&mut self) -> Result<(), SinkError>;

    /// Appends `data` to the destination.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] on any write failure. An error is terminal for
    /// the download.
    fn handle_bytes(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Finalizes the destination.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when buffered data cannot be flushed.
    fn terminate(&mut self) -> Result<(), SinkError>;
}

/// Accumulates downloaded bytes in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: Vec<u8>,
}

impl BufferSink {
    /// Creates an empty buffer sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes received so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Moves the received bytes out, leaving the buffer empty.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

impl ByteSink for BufferSink {
    fn start(&mut self) -> Result<(), SinkError> {
        self.buffer = Vec::new();
        Ok(())
    }

    fn handle_bytes(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl fmt::Display for BufferSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("buffer")
    }
}

/// Streams downloaded bytes into a file.
///
/// The file is created (or truncated) on `start` and closed on `terminate`.
/// Partial files are left in place when a download fails.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Creates a sink targeting `path`. Nothing is opened until `start`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSink for FileSink {
    fn start(&mut self) -> Result<(), SinkError> {
        let file = blocking_io(|| File::create(&self.path))
            .map_err(|e| SinkError::io(self.path.clone(), e))?;
        debug!(path = %self.path.display(), "opened file sink");
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn handle_bytes(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::not_open(self.to_string()));
        };
        blocking_io(|| writer.write_all(data)).map_err(|e| SinkError::io(self.path.clone(), e))
    }

    fn terminate(&mut self) -> Result<(), SinkError> {
        // Never opened: nothing to close.
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        blocking_io(|| writer.flush()).map_err(|e| SinkError::io(self.path.clone(), e))?;
        debug!(path = %self.path.display(), "closed file sink");
        Ok(())
    }
}

/// Runs blocking file work, moving the runtime's other tasks off this worker
/// first when called from a multi-thread runtime.
fn blocking_io<T>(op: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(op)
        }
        _ => op(),
    }
}

impl fmt::Display for FileSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file {}", self.path.display())
    }
}

/// The sink owned by a download task.
pub enum Sink {
    /// In-memory buffer.
    Buffer(BufferSink),
    /// File on disk.
    File(FileSink),
    /// Caller-provided destination.
    Custom(Box<dyn ByteSink>),
}

impl Sink {
    /// Creates an empty buffer sink.
    #[must_use]
    pub fn buffer() -> Self {
        Self::Buffer(BufferSink::new())
    }

    /// Creates a file sink targeting `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(FileSink::new(path))
    }

    /// Wraps a caller-provided sink.
    #[must_use]
    pub fn custom(sink: impl ByteSink + 'static) -> Self {
        Self::Custom(Box::new(sink))
    }

    fn as_dyn_mut(&mut self) -> &mut dyn ByteSink {
        match self {
            Self::Buffer(sink) => sink,
            Self::File(sink) => sink,
            Self::Custom(sink) => sink.as_mut(),
        }
    }
}

impl ByteSink for Sink {
    fn start(&mut self) -> Result<(), SinkError> {
        self.as_dyn_mut().start()
    }

    fn handle_bytes(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.as_dyn_mut().handle_bytes(data)
    }

    fn terminate(&mut self) -> Result<(), SinkError> {
        self.as_dyn_mut().terminate()
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(sink) => fmt::Display::fmt(sink, f),
            Self::File(sink) => fmt::Display::fmt(sink, f),
            Self::Custom(sink) => fmt::Display::fmt(sink, f),
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sink").field(&self.to_string()).finish()
    }
}
