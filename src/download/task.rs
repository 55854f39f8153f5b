//! Download task records and the snapshots handed to listeners.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::error::SinkError;
use super::sink::{ByteSink, Sink};
use super::state::DownloadState;

/// Unique identifier of a download task within a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw identifier.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Point-in-time view of a task, passed to progress listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Resource address.
    pub url: String,
    /// Sink descriptor.
    pub sink: String,
    /// State at the time of the snapshot.
    pub state: DownloadState,
    /// Bytes delivered to the sink so far.
    pub done_size: u64,
    /// Content length announced by the server, when known.
    pub expected_size: Option<u64>,
}

impl fmt::Display for TaskSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "download {} from {} to {}: state={}, done {}/",
            self.id, self.url, self.sink, self.state, self.done_size
        )?;
        match self.expected_size {
            Some(expected) => write!(f, "{expected} bytes"),
            None => f.write_str("? bytes"),
        }
    }
}

/// Handle on one download: identity, target, sink and progress.
///
/// Cloning the handle is cheap; every clone observes the same record.
///
/// The sink lives behind its own lock, separate from the state and counters,
/// so reading progress never waits on sink I/O. Transitions take the sink
/// lock first and the record lock second.
#[derive(Clone)]
pub struct DownloadTask {
    shared: Arc<TaskShared>,
}

/// Result of trying to move a task into `Running`.
#[derive(Debug)]
pub(crate) enum BeginOutcome {
    Started,
    SinkFailed(SinkError),
    NotStartable(DownloadState),
}

struct TaskShared {
    id: TaskId,
    url: String,
    sink_description: String,
    sink: Mutex<Sink>,
    record: Mutex<TaskRecord>,
}

struct TaskRecord {
    state: DownloadState,
    done_size: u64,
    expected_size: Option<u64>,
}

impl DownloadTask {
    /// Creates a task in `NotRunning` owning `sink`.
    ///
    /// The sink descriptor reported in snapshots is captured here.
    #[must_use]
    pub fn new(id: TaskId, url: impl Into<String>, sink: Sink) -> Self {
        Self {
            shared: Arc::new(TaskShared {
                id,
                url: url.into(),
                sink_description: sink.to_string(),
                sink: Mutex::new(sink),
                record: Mutex::new(TaskRecord {
                    state: DownloadState::NotRunning,
                    done_size: 0,
                    expected_size: None,
                }),
            }),
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Returns the resource address.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.record().state
    }

    /// Returns the number of bytes delivered to the sink so far.
    #[must_use]
    pub fn done_size(&self) -> u64 {
        self.record().done_size
    }

    /// Returns the announced content length, when known.
    #[must_use]
    pub fn expected_size(&self) -> Option<u64> {
        self.record().expected_size
    }

    /// Returns the sink descriptor.
    #[must_use]
    pub fn sink_description(&self) -> &str {
        &self.shared.sink_description
    }

    /// Returns a consistent view of the whole task.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let record = self.record();
        TaskSnapshot {
            id: self.shared.id,
            url: self.shared.url.clone(),
            sink: self.shared.sink_description.clone(),
            state: record.state,
            done_size: record.done_size,
            expected_size: record.expected_size,
        }
    }

    /// Moves the bytes out of a buffer sink.
    ///
    /// Returns `None` for file and custom sinks.
    #[must_use]
    pub fn take_buffer(&self) -> Option<Vec<u8>> {
        match &mut *self.sink() {
            Sink::Buffer(buffer) => Some(buffer.take_bytes()),
            Sink::File(_) | Sink::Custom(_) => None,
        }
    }

    /// Returns true when both handles refer to the same task.
    #[must_use]
    pub fn same_task(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Prepares the sink and enters `Running`.
    ///
    /// `on_running` runs under the record lock right before the state flips,
    /// so anything it sets up is in place by the time another thread can
    /// observe `Running`. On sink failure the sink is terminated and the
    /// task is `Failed`.
    pub(crate) fn begin(&self, on_running: impl FnOnce()) -> BeginOutcome {
        let mut sink = self.sink();
        let state = self.state();
        if state != DownloadState::NotRunning {
            return BeginOutcome::NotStartable(state);
        }
        match sink.start() {
            Ok(()) => {
                let mut record = self.record();
                on_running();
                record.state = DownloadState::Running;
                BeginOutcome::Started
            }
            Err(error) => {
                self.record().state = DownloadState::Failed;
                self.terminate_sink(&mut sink);
                BeginOutcome::SinkFailed(error)
            }
        }
    }

    /// Records the announced content length. Only the first value sticks.
    pub(crate) fn record_expected_size(&self, expected_size: u64) -> bool {
        let mut record = self.record();
        if record.state != DownloadState::Running || record.expected_size.is_some() {
            return false;
        }
        record.expected_size = Some(expected_size);
        true
    }

    /// Writes one chunk to the sink, advancing `done_size` only on success.
    ///
    /// Returns `Ok(false)` when the task is no longer running and the chunk
    /// was dropped.
    pub(crate) fn write_chunk(&self, chunk: &[u8]) -> Result<bool, SinkError> {
        let mut sink = self.sink();
        if self.state() != DownloadState::Running {
            return Ok(false);
        }
        sink.handle_bytes(chunk)?;
        let mut record = self.record();
        record.done_size = record.done_size.saturating_add(chunk.len() as u64);
        Ok(true)
    }

    /// Moves the task into `terminal`, terminating the sink.
    ///
    /// Returns false when the task already reached a terminal state, in
    /// which case nothing changes.
    pub(crate) fn finish(&self, terminal: DownloadState) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut sink = self.sink();
        {
            let mut record = self.record();
            if record.state.is_terminal() {
                return false;
            }
            record.state = terminal;
        }
        self.terminate_sink(&mut sink);
        true
    }

    /// Marks a task that never started as `Failed` without touching its sink.
    pub(crate) fn fail_unstarted(&self) -> bool {
        let _sink = self.sink();
        let mut record = self.record();
        if record.state != DownloadState::NotRunning {
            return false;
        }
        record.state = DownloadState::Failed;
        true
    }

    fn terminate_sink(&self, sink: &mut Sink) {
        if let Err(error) = sink.terminate() {
            warn!(task_id = %self.shared.id, error = %error, "failed to terminate sink");
        }
    }

    fn sink(&self) -> MutexGuard<'_, Sink> {
        self.shared.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self) -> MutexGuard<'_, TaskRecord> {
        self.shared
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DownloadTask")
            .field(&self.snapshot())
            .finish()
    }
}

impl fmt::Display for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.snapshot(), f)
    }
}
