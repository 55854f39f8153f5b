//! Task registry and the synchronous/asynchronous download façade.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use super::constants::FIRST_TASK_ID;
use super::error::StartError;
use super::execution::{SingleDownloadExecution, TerminationHook};
use super::listener::ProgressListener;
use super::sink::Sink;
use super::state::DownloadState;
use super::task::{DownloadTask, TaskId};
use crate::transport::Transport;

type Registry = DashMap<TaskId, Arc<SingleDownloadExecution>>;

/// When registry entries are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// An execution removes its own entry when it reaches a terminal state.
    #[default]
    OnTermination,
    /// Entries stay until [`DownloadCoordinator::evict`] or
    /// [`DownloadCoordinator::purge_terminated`] removes them.
    Retain,
}

/// Creates tasks, binds them to the shared transport and exposes start,
/// cancel and await operations on them.
///
/// Safe to share between threads; identifiers are unique per coordinator.
pub struct DownloadCoordinator {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    next_id: AtomicU64,
    eviction: EvictionPolicy,
}

impl DownloadCoordinator {
    /// Creates a coordinator that evicts tasks once they terminate.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_eviction(transport, EvictionPolicy::default())
    }

    /// Creates a coordinator with an explicit eviction policy.
    #[must_use]
    pub fn with_eviction(transport: Arc<dyn Transport>, eviction: EvictionPolicy) -> Self {
        Self {
            transport,
            registry: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(FIRST_TASK_ID),
            eviction,
        }
    }

    /// Returns the eviction policy.
    #[must_use]
    pub fn eviction(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Creates a task writing to the file at `path`. Nothing is sent yet.
    pub fn create_file_download(&self, url: &str, path: impl Into<PathBuf>) -> DownloadTask {
        self.create_download(url, Sink::file(path))
    }

    /// Creates a task accumulating into memory. Nothing is sent yet.
    pub fn create_buffer_download(&self, url: &str) -> DownloadTask {
        self.create_download(url, Sink::buffer())
    }

    /// Creates a task for an arbitrary sink and registers its execution.
    pub fn create_download(&self, url: &str, sink: Sink) -> DownloadTask {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = DownloadTask::new(id, url, sink);
        let transport = Arc::clone(&self.transport);
        let execution = match self.eviction {
            EvictionPolicy::OnTermination => SingleDownloadExecution::with_termination_hook(
                task.clone(),
                transport,
                evict_on_termination(Arc::downgrade(&self.registry)),
            ),
            EvictionPolicy::Retain => SingleDownloadExecution::new(task.clone(), transport),
        };
        self.registry.insert(id, execution);
        debug!(task_id = %id, url, sink = %task.sink_description(), "task created");
        task
    }

    /// Starts `task`, installing `listener` for its progress.
    ///
    /// # Errors
    ///
    /// - [`StartError::UnknownTask`] if this coordinator has no execution for
    ///   the task. A task that was never started is marked `Failed`.
    /// - Any error of [`SingleDownloadExecution::start`].
    #[instrument(skip(self, task, listener), fields(task_id = %task.id(), url = %task.url()))]
    pub fn start(
        &self,
        task: &DownloadTask,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Result<(), StartError> {
        let Some(execution) = self.execution_for(task) else {
            warn!("start requested for unknown task");
            task.fail_unstarted();
            return Err(StartError::UnknownTask { id: task.id() });
        };
        execution.start(listener)
    }

    /// Requests cancellation of `task`. A no-op for unknown or idle tasks.
    pub fn cancel(&self, task: &DownloadTask) {
        if let Some(execution) = self.execution_for(task) {
            execution.cancel();
        }
    }

    /// Blocks until `task` is terminal.
    ///
    /// Returns immediately for tasks that were never started or were already
    /// evicted. Must not run on a worker thread of the transport's runtime;
    /// use [`await_termination_async`](Self::await_termination_async) there.
    pub fn await_termination(&self, task: &DownloadTask) {
        if let Some(execution) = self.execution_for(task) {
            execution.wait_for_termination();
        }
    }

    /// Waits asynchronously until `task` is terminal.
    pub async fn await_termination_async(&self, task: &DownloadTask) {
        if let Some(execution) = self.execution_for(task) {
            execution.wait_for_termination_async().await;
        }
    }

    /// Creates, starts and awaits a download into `sink`.
    ///
    /// Failures are reported through the returned task's state.
    #[instrument(skip(self, sink, listener))]
    pub fn sync_download(
        &self,
        url: &str,
        sink: Sink,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> DownloadTask {
        let task = self.create_download(url, sink);
        if let Err(error) = self.start(&task, listener) {
            info!(error = %error, "download did not start");
        }
        self.await_termination(&task);
        task
    }

    /// Synchronously downloads `url` into the file at `path`.
    pub fn sync_download_file(
        &self,
        url: &str,
        path: impl Into<PathBuf>,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> DownloadTask {
        self.sync_download(url, Sink::file(path), listener)
    }

    /// Synchronously downloads `url` into memory.
    ///
    /// Returns `None` for every terminal state other than `Ok`; inspect a
    /// task from [`sync_download`](Self::sync_download) to tell failure from
    /// cancellation.
    pub fn sync_download_buffer(
        &self,
        url: &str,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Option<Vec<u8>> {
        let task = self.sync_download(url, Sink::buffer(), listener);
        if task.state() == DownloadState::Ok {
            task.take_buffer()
        } else {
            None
        }
    }

    /// Async counterpart of [`sync_download`](Self::sync_download).
    #[instrument(skip(self, sink, listener))]
    pub async fn download(
        &self,
        url: &str,
        sink: Sink,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> DownloadTask {
        let task = self.create_download(url, sink);
        if let Err(error) = self.start(&task, listener) {
            info!(error = %error, "download did not start");
        }
        self.await_termination_async(&task).await;
        task
    }

    /// Number of registered executions.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Removes a terminal task from the registry.
    ///
    /// Returns false if the task is unknown or has not terminated yet.
    pub fn evict(&self, task: &DownloadTask) -> bool {
        if !task.state().is_terminal() {
            return false;
        }
        self.registry
            .remove_if(&task.id(), |_, execution| execution.task().same_task(task))
            .is_some()
    }

    /// Removes every terminal task and returns how many were removed.
    pub fn purge_terminated(&self) -> usize {
        let before = self.registry.len();
        self.registry
            .retain(|_, execution| !execution.task().state().is_terminal());
        let removed = before.saturating_sub(self.registry.len());
        debug!(removed, "purged terminated tasks");
        removed
    }

    fn execution_for(&self, task: &DownloadTask) -> Option<Arc<SingleDownloadExecution>> {
        // Clone out so no shard lock is held while the execution runs.
        let execution = self
            .registry
            .get(&task.id())
            .map(|entry| Arc::clone(entry.value()))?;
        execution.task().same_task(task).then_some(execution)
    }
}

impl fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("in_flight", &self.registry.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("eviction", &self.eviction)
            .finish_non_exhaustive()
    }
}

fn evict_on_termination(registry: Weak<Registry>) -> TerminationHook {
    Box::new(move |id| {
        if let Some(registry) = registry.upgrade() {
            registry.remove(&id);
        }
    })
}
