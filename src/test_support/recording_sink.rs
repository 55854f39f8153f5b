use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::download::{ByteSink, SinkError};

/// Calls observed by a [`RecordingSink`].
#[derive(Debug, Default, Clone)]
pub struct SinkLog {
    pub starts: usize,
    pub chunks: Vec<Vec<u8>>,
    pub terminates: usize,
}

/// Sink that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    fail_start: bool,
    /// 1-based index of the chunk whose write fails.
    fail_on_chunk: Option<usize>,
    received: usize,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let sink = Self::default();
        let log = Arc::clone(&sink.log);
        (sink, log)
    }

    pub fn failing_start() -> (Self, Arc<Mutex<SinkLog>>) {
        let (mut sink, log) = Self::new();
        sink.fail_start = true;
        (sink, log)
    }

    pub fn failing_on_chunk(index: usize) -> (Self, Arc<Mutex<SinkLog>>) {
        let (mut sink, log) = Self::new();
        sink.fail_on_chunk = Some(index);
        (sink, log)
    }

    fn log(&self) -> std::sync::MutexGuard<'_, SinkLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ByteSink for RecordingSink {
    fn start(&mut self) -> Result<(), SinkError> {
        self.log().starts += 1;
        if self.fail_start {
            return Err(SinkError::io(
                "/nonexistent/target",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
            ));
        }
        Ok(())
    }

    fn handle_bytes(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.received += 1;
        if self.fail_on_chunk == Some(self.received) {
            return Err(SinkError::io(
                "/full/disk",
                std::io::Error::new(std::io::ErrorKind::StorageFull, "no space left on device"),
            ));
        }
        self.log().chunks.push(data.to_vec());
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), SinkError> {
        self.log().terminates += 1;
        Ok(())
    }
}

impl fmt::Display for RecordingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("recording")
    }
}
