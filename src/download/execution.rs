//! Drives one download task to a terminal state.
//!
//! # State machine
//!
//! ```text
//! NotRunning --start, sink ok--> Running --2xx completion--> Ok
//!     |                             |----other status / transport error--> Failed
//!     |                             |----sink write error (transfer cancelled)--> Failed
//!     |                             `----cancellation honored--> Cancelled
//!     `--start, sink error--> Failed   (no request issued)
//! ```
//!
//! Every entry into a terminal state terminates the sink once, notifies the
//! listener once and releases the termination gate. Late callbacks for a
//! task that is already terminal are ignored, so a sink failure that cancels
//! the transfer stays `Failed` even though the transport then reports the
//! cancellation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::error::StartError;
use super::gate::TerminationGate;
use super::listener::ProgressListener;
use super::state::DownloadState;
use super::task::{BeginOutcome, DownloadTask, TaskId};
use crate::transport::{
    ChunkFlow, PendingRequest, ResponseConsumer, ResponseHead, Transport, TransportError,
};

/// Callback run once when the execution reaches a terminal state.
pub(crate) type TerminationHook = Box<dyn Fn(TaskId) + Send + Sync>;

/// Binds one task to the shared transport and advances its state machine.
pub struct SingleDownloadExecution {
    task: DownloadTask,
    transport: Arc<dyn Transport>,
    listener: Mutex<Option<Arc<dyn ProgressListener>>>,
    pending: Mutex<Option<PendingRequest>>,
    gate: TerminationGate,
    on_terminated: Option<TerminationHook>,
}

impl SingleDownloadExecution {
    /// Creates an execution for `task`. Nothing is sent until [`start`](Self::start).
    #[must_use]
    pub fn new(task: DownloadTask, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self::build(task, transport, None))
    }

    pub(crate) fn with_termination_hook(
        task: DownloadTask,
        transport: Arc<dyn Transport>,
        hook: TerminationHook,
    ) -> Arc<Self> {
        Arc::new(Self::build(task, transport, Some(hook)))
    }

    fn build(
        task: DownloadTask,
        transport: Arc<dyn Transport>,
        on_terminated: Option<TerminationHook>,
    ) -> Self {
        Self {
            task,
            transport,
            listener: Mutex::new(None),
            pending: Mutex::new(None),
            gate: TerminationGate::new(),
            on_terminated,
        }
    }

    /// Returns the driven task.
    #[must_use]
    pub fn task(&self) -> &DownloadTask {
        &self.task
    }

    fn install_listener(&self, listener: Option<Arc<dyn ProgressListener>>) {
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Prepares the sink and issues the request. Never blocks on the network.
    ///
    /// `listener` is installed only if the task actually leaves `NotRunning`.
    ///
    /// # Errors
    ///
    /// - [`StartError::Sink`] if the sink cannot be prepared; the task is
    ///   `Failed` and no request was issued.
    /// - [`StartError::AlreadyStarted`] if the task is not `NotRunning`.
    pub fn start(
        self: &Arc<Self>,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<(), StartError> {
        let id = self.task.id();
        // Held from before the task turns `Running` until the request is
        // stored, so a concurrent cancel either sees `NotRunning` or waits
        // for the request.
        let mut pending = self.pending();
        match self.task.begin(|| self.gate.arm()) {
            BeginOutcome::NotStartable(state) => Err(StartError::AlreadyStarted { id, state }),
            BeginOutcome::SinkFailed(source) => {
                drop(pending);
                warn!(task_id = %id, error = %source, "could not prepare sink");
                self.install_listener(listener);
                self.after_termination(DownloadState::Failed);
                Err(StartError::Sink { id, source })
            }
            BeginOutcome::Started => {
                info!(task_id = %id, url = %self.task.url(), sink = %self.task.sink_description(), "starting download");
                self.install_listener(listener);
                let consumer = Box::new(ExecutionConsumer {
                    execution: Arc::clone(self),
                });
                *pending = Some(self.transport.execute(self.task.url(), consumer));
                Ok(())
            }
        }
    }

    /// Requests cancellation of the in-flight request.
    ///
    /// Fire-and-forget: the task becomes `Cancelled` once the transport
    /// honors the request. A no-op when nothing is in flight.
    pub fn cancel(&self) {
        if self.task.state().is_terminal() {
            return;
        }
        if let Some(pending) = self.pending().as_ref() {
            debug!(task_id = %self.task.id(), "cancellation requested");
            pending.cancel();
        }
    }

    /// Blocks the calling thread until the task is terminal.
    ///
    /// Returns immediately if the task already terminated or was never
    /// started. Must not be called from a thread of the transport's runtime.
    pub fn wait_for_termination(&self) {
        self.gate.wait();
    }

    /// Async counterpart of [`wait_for_termination`](Self::wait_for_termination).
    pub async fn wait_for_termination_async(&self) {
        self.gate.wait_async().await;
    }

    fn handle_response(&self, head: &ResponseHead) {
        debug!(task_id = %self.task.id(), status = head.status, content_length = ?head.content_length, "response received");
        if let Some(expected) = head.content_length {
            if self.task.record_expected_size(expected) {
                self.notify_listener();
            }
        }
    }

    fn handle_chunk(&self, chunk: &[u8]) -> ChunkFlow {
        match self.task.write_chunk(chunk) {
            Ok(true) => {
                debug!(task_id = %self.task.id(), bytes = chunk.len(), "chunk written");
                self.notify_listener();
                ChunkFlow::Continue
            }
            Ok(false) => ChunkFlow::Abort,
            Err(error) => {
                warn!(task_id = %self.task.id(), error = %error, "sink write failed; aborting transfer");
                if let Some(pending) = self.pending().as_ref() {
                    pending.cancel();
                }
                self.finish(DownloadState::Failed);
                ChunkFlow::Abort
            }
        }
    }

    fn handle_completion(&self, status: u16) {
        if (200..300).contains(&status) {
            self.finish(DownloadState::Ok);
        } else {
            info!(task_id = %self.task.id(), status, "download completed with error status");
            self.finish(DownloadState::Failed);
        }
    }

    fn handle_failure(&self, error: &TransportError) {
        warn!(task_id = %self.task.id(), error = %error, "download failed");
        self.finish(DownloadState::Failed);
    }

    fn handle_cancellation(&self) {
        self.finish(DownloadState::Cancelled);
    }

    fn finish(&self, terminal: DownloadState) {
        if !self.task.finish(terminal) {
            debug!(task_id = %self.task.id(), state = %terminal, "ignoring transition of terminated task");
            return;
        }
        self.pending().take();
        self.after_termination(terminal);
    }

    fn after_termination(&self, terminal: DownloadState) {
        info!(
            task_id = %self.task.id(),
            state = %terminal,
            done = self.task.done_size(),
            expected = ?self.task.expected_size(),
            "download terminated"
        );
        self.notify_listener();
        if let Some(hook) = &self.on_terminated {
            hook(self.task.id());
        }
        self.gate.release();
    }

    fn notify_listener(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener.task_updated(&self.task.snapshot());
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SingleDownloadExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleDownloadExecution")
            .field("task", &self.task)
            .field("waiting", &self.gate.is_pending())
            .finish_non_exhaustive()
    }
}

/// Adapts transport callbacks to the execution.
struct ExecutionConsumer {
    execution: Arc<SingleDownloadExecution>,
}

impl ResponseConsumer for ExecutionConsumer {
    fn on_response(&mut self, head: &ResponseHead) {
        self.execution.handle_response(head);
    }

    fn on_chunk(&mut self, chunk: &[u8]) -> ChunkFlow {
        self.execution.handle_chunk(chunk)
    }

    fn on_completed(self: Box<Self>, status: u16) {
        self.execution.handle_completion(status);
    }

    fn on_failed(self: Box<Self>, error: TransportError) {
        self.execution.handle_failure(&error);
    }

    fn on_cancelled(self: Box<Self>) {
        self.execution.handle_cancellation();
    }
}
