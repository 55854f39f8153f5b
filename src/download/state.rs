//! Lifecycle states of a download task.

use std::fmt;

/// State of a single download.
///
/// `NotRunning` is initial. `Ok`, `Failed` and `Cancelled` are terminal and
/// mutually exclusive: once a task reaches one of them it never runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownloadState {
    /// Created but not started.
    #[default]
    NotRunning,
    /// Request issued, bytes may be streaming.
    Running,
    /// Transfer completed with a success status.
    Ok,
    /// Preparation, transport, status or sink write failure.
    Failed,
    /// Cancellation was requested and honored by the transport.
    Cancelled,
}

impl DownloadState {
    /// Returns true for `Ok`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Cancelled)
    }

    /// Returns the stable label used in logs and snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::Running => "running",
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
