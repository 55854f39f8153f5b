//! Transport boundary: the non-blocking HTTP layer downloads are driven by.
//!
//! A [`Transport`] issues a GET and reports back through a
//! [`ResponseConsumer`]: the response head once, each body chunk in wire
//! order, then exactly one of completion, failure or cancellation. The
//! consuming `Box<Self>` receivers on the terminal callbacks make "exactly
//! one" a property of the types. Callbacks for one request are delivered
//! sequentially; different requests may run in parallel.
//!
//! [`HttpTransport`] is the reqwest/tokio implementation.

mod http;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub(crate) use http::client_builder;
pub use http::{HttpTransport, TransportConfig};

/// Status line and length information of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Content-Length` header, if present and numeric.
    pub content_length: Option<u64>,
}

/// What the transport should do after delivering a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFlow {
    /// Keep streaming.
    Continue,
    /// Stop the transfer; the transport reports cancellation.
    Abort,
}

/// Receiver of one request's callbacks.
pub trait ResponseConsumer: Send {
    /// Response head received.
    fn on_response(&mut self, head: &ResponseHead);

    /// One body chunk received.
    fn on_chunk(&mut self, chunk: &[u8]) -> ChunkFlow;

    /// Body fully received.
    fn on_completed(self: Box<Self>, status: u16);

    /// Request or transfer failed.
    fn on_failed(self: Box<Self>, error: TransportError);

    /// Cancellation was honored.
    fn on_cancelled(self: Box<Self>);
}

/// Shared, non-blocking request issuer.
pub trait Transport: Send + Sync {
    /// Issues a GET for `url`. Never blocks; callbacks arrive on transport
    /// threads.
    fn execute(&self, url: &str, consumer: Box<dyn ResponseConsumer>) -> PendingRequest;
}

/// Handle on an in-flight request, used only to cancel it.
#[derive(Debug, Clone, Default)]
pub struct PendingRequest {
    token: CancellationToken,
}

impl PendingRequest {
    /// Creates a handle observing `token`.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Requests cancellation. Fire-and-forget and idempotent; a request that
    /// already finished is unaffected.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Errors reported by a transport, either at construction or through
/// [`ResponseConsumer::on_failed`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The I/O runtime could not be started.
    #[error("failed to start transport runtime: {source}")]
    Runtime {
        /// The underlying runtime error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid transport configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// The URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Connect or read timeout elapsed.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Network-level error (DNS, connection refused, TLS, reset).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The transfer stopped for a reason other than a client error.
    #[error("transfer of {url} interrupted: {reason}")]
    Interrupted {
        /// The URL being transferred.
        url: String,
        /// What interrupted it.
        reason: String,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error, mapping timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an interruption error.
    pub fn interrupted(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_request_cancel_is_idempotent() {
        let pending = PendingRequest::default();
        assert!(!pending.is_cancel_requested());
        pending.cancel();
        pending.cancel();
        assert!(pending.is_cancel_requested());
    }

    #[test]
    fn test_pending_request_clones_share_cancellation() {
        let pending = PendingRequest::default();
        let clone = pending.clone();
        clone.cancel();
        assert!(pending.is_cancel_requested());
    }

    #[test]
    fn test_transport_error_interrupted_display() {
        let error = TransportError::interrupted("https://example.com/a", "connection reset");
        let msg = error.to_string();
        assert!(msg.contains("https://example.com/a"), "Expected URL in: {msg}");
        assert!(msg.contains("connection reset"), "Expected reason in: {msg}");
    }
}
