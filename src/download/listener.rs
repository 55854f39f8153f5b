//! Progress listener interface.

use super::task::TaskSnapshot;

/// Observer notified on every progress or state change of a download.
///
/// Invoked on the transport's I/O threads, so implementations should return
/// quickly. A snapshot always reflects a state that has already been reached.
pub trait ProgressListener: Send + Sync {
    /// Called after the task was updated.
    fn task_updated(&self, snapshot: &TaskSnapshot);
}

impl<F> ProgressListener for F
where
    F: Fn(&TaskSnapshot) + Send + Sync,
{
    fn task_updated(&self, snapshot: &TaskSnapshot) {
        self(snapshot);
    }
}
