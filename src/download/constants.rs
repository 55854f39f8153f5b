//! Constants for the download module (timeouts, transport runtime sizing).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes between body reads for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Upper bound accepted for any configured timeout (1 hour).
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Maximum number of redirects followed by the shared transport.
pub const MAX_REDIRECTS: usize = 10;

/// Default number of I/O worker threads for a transport-owned runtime.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Upper bound accepted for the worker thread count.
pub const MAX_WORKER_THREADS: usize = 64;

/// Name given to threads of a transport-owned runtime.
pub const WORKER_THREAD_NAME: &str = "fetcher-io";

/// First identifier handed out by a coordinator.
pub const FIRST_TASK_ID: u64 = 1;
