//! reqwest/tokio implementation of the transport boundary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_LENGTH;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ChunkFlow, PendingRequest, ResponseConsumer, ResponseHead, Transport, TransportError};
use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_WORKER_THREADS, MAX_REDIRECTS, MAX_TIMEOUT_SECS,
    MAX_WORKER_THREADS, READ_TIMEOUT_SECS, WORKER_THREAD_NAME,
};
use crate::user_agent;

/// Settings for the shared HTTP transport.
#[derive(Clone)]
pub struct TransportConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum idle time between body reads.
    pub read_timeout: Duration,
    /// Redirects followed before giving up (0 disables following).
    pub max_redirects: usize,
    /// Worker threads of a transport-owned runtime.
    pub worker_threads: usize,
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Cookie jar shared with other clients, if any.
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            max_redirects: MAX_REDIRECTS,
            worker_threads: DEFAULT_WORKER_THREADS,
            user_agent: user_agent::default_user_agent(),
            cookie_jar: None,
        }
    }
}

impl TransportConfig {
    /// Sets the connect timeout in seconds.
    #[must_use]
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout = Duration::from_secs(secs);
        self
    }

    /// Sets the read timeout in seconds.
    #[must_use]
    pub fn with_read_timeout_secs(mut self, secs: u64) -> Self {
        self.read_timeout = Duration::from_secs(secs);
        self
    }

    /// Sets the worker thread count of a transport-owned runtime.
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Sets the User-Agent header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the redirect limit.
    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Attaches a cookie jar.
    #[must_use]
    pub fn with_cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> Result<(), TransportError> {
        validate_timeout("connect_timeout", self.connect_timeout)?;
        validate_timeout("read_timeout", self.read_timeout)?;
        if !(1..=MAX_WORKER_THREADS).contains(&self.worker_threads) {
            return Err(TransportError::invalid_config(format!(
                "worker_threads {} outside 1..={MAX_WORKER_THREADS}",
                self.worker_threads
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(TransportError::invalid_config("user_agent is empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("worker_threads", &self.worker_threads)
            .field("user_agent", &self.user_agent)
            .field("cookie_jar", &self.cookie_jar.is_some())
            .finish()
    }
}

fn validate_timeout(field: &str, value: Duration) -> Result<(), TransportError> {
    let secs = value.as_secs();
    if value.is_zero() || secs > MAX_TIMEOUT_SECS {
        return Err(TransportError::invalid_config(format!(
            "{field} {secs}s outside 1..={MAX_TIMEOUT_SECS}s"
        )));
    }
    Ok(())
}

/// Shared non-blocking HTTP transport.
///
/// Create it once and share it (behind an `Arc`) between every coordinator
/// and task. Either owns a multi-threaded tokio runtime
/// ([`new`](Self::new)) or runs on a runtime the caller owns
/// ([`with_handle`](Self::with_handle)).
pub struct HttpTransport {
    client: Client,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl HttpTransport {
    /// Builds a transport with its own I/O runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the config is invalid, the runtime cannot
    /// be started or the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|source| TransportError::Runtime { source })?;
        let handle = runtime.handle().clone();
        let client = build_client(config, &handle)?;
        info!(
            worker_threads = config.worker_threads,
            "started transport runtime"
        );
        Ok(Self {
            client,
            handle,
            runtime: Some(runtime),
        })
    }

    /// Builds a transport that spawns its requests on `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the config is invalid or the HTTP client
    /// cannot be built.
    #[instrument(level = "debug", skip(handle))]
    pub fn with_handle(config: &TransportConfig, handle: Handle) -> Result<Self, TransportError> {
        config.validate()?;
        let client = build_client(config, &handle)?;
        Ok(Self {
            client,
            handle,
            runtime: None,
        })
    }

    /// Returns the runtime handle requests are spawned on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns true when this transport owns its runtime.
    #[must_use]
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Tears the transport down. In-flight requests on an owned runtime are
    /// abandoned without callbacks.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Safe from any context, including inside another runtime.
            runtime.shutdown_background();
            info!("stopped transport runtime");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("owns_runtime", &self.owns_runtime())
            .finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn execute(&self, url: &str, mut consumer: Box<dyn ResponseConsumer>) -> PendingRequest {
        let token = CancellationToken::new();
        let pending = PendingRequest::new(token.clone());
        let url = url.to_string();

        if Url::parse(&url).is_err() {
            self.handle.spawn(async move {
                consumer.on_failed(TransportError::invalid_url(url));
            });
            return pending;
        }

        let request = self.client.get(&url);
        self.handle.spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => Outcome::Cancelled,
                outcome = stream_response(request, &url, consumer.as_mut()) => outcome,
            };
            match outcome {
                Outcome::Completed(status) => consumer.on_completed(status),
                Outcome::Failed(error) => consumer.on_failed(error),
                Outcome::Cancelled => {
                    debug!(url = %url, "request cancelled");
                    consumer.on_cancelled();
                }
            }
        });
        pending
    }
}

enum Outcome {
    Completed(u16),
    Failed(TransportError),
    Cancelled,
}

/// Sends the request and feeds the body to `consumer` chunk by chunk.
async fn stream_response(
    request: RequestBuilder,
    url: &str,
    consumer: &mut dyn ResponseConsumer,
) -> Outcome {
    let response = match request.send().await {
        Ok(response) => response,
        Err(error) => return Outcome::Failed(TransportError::network(url, error)),
    };

    let head = response_head(&response);
    debug!(url = %url, status = head.status, content_length = ?head.content_length, "received response");
    consumer.on_response(&head);

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if consumer.on_chunk(&bytes) == ChunkFlow::Abort {
                    return Outcome::Cancelled;
                }
            }
            Err(error) => return Outcome::Failed(TransportError::network(url, error)),
        }
    }
    Outcome::Completed(head.status)
}

fn response_head(response: &Response) -> ResponseHead {
    // Raw header rather than `Response::content_length`, which reports the
    // body size hint and can differ.
    let content_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    ResponseHead {
        status: response.status().as_u16(),
        content_length,
    }
}

/// Client builder carrying the timeouts, redirect policy, User-Agent and
/// cookie jar of `config`. Shared with the one-shot session helpers.
pub(crate) fn client_builder(config: &TransportConfig) -> ClientBuilder {
    let redirect = if config.max_redirects == 0 {
        Policy::none()
    } else {
        Policy::limited(config.max_redirects)
    };
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .redirect(redirect)
        .gzip(false)
        .user_agent(config.user_agent.clone());
    if let Some(jar) = &config.cookie_jar {
        builder = builder.cookie_provider(Arc::clone(jar));
    }
    builder
}

fn build_client(config: &TransportConfig, handle: &Handle) -> Result<Client, TransportError> {
    let _runtime = handle.enter();
    client_builder(config).build().map_err(|source| {
        warn!(error = %source, "failed to build transport HTTP client");
        TransportError::Client { source }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let config = TransportConfig::default().with_connect_timeout_secs(0);
        assert!(matches!(
            config.validate(),
            Err(TransportError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_config_rejects_excessive_timeout() {
        let config = TransportConfig::default().with_read_timeout_secs(MAX_TIMEOUT_SECS + 1);
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("read_timeout"), "got: {error}");
    }

    #[test]
    fn test_config_rejects_worker_thread_bounds() {
        assert!(
            TransportConfig::default()
                .with_worker_threads(0)
                .validate()
                .is_err()
        );
        assert!(
            TransportConfig::default()
                .with_worker_threads(MAX_WORKER_THREADS + 1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_config_rejects_blank_user_agent() {
        let config = TransportConfig::default().with_user_agent("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_debug_hides_jar_contents() {
        let config = TransportConfig::default().with_cookie_jar(Arc::new(Jar::default()));
        let debug = format!("{config:?}");
        assert!(debug.contains("cookie_jar: true"), "got: {debug}");
    }

    #[test]
    fn test_owned_runtime_transport_builds_and_closes() {
        let transport = HttpTransport::new(&TransportConfig::default()).unwrap();
        assert!(transport.owns_runtime());
        transport.close();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TransportConfig::default().with_worker_threads(0);
        assert!(matches!(
            HttpTransport::new(&config),
            Err(TransportError::InvalidConfig { .. })
        ));
    }
}
