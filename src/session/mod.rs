//! One-shot session helpers.
//!
//! [`Downloader`] performs a single request per call with no concurrency of
//! its own, keeps download statistics and can capture the cookies set by the
//! server. [`RelocationFinder`] reports where a redirecting URL points.

mod relocation;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

pub use relocation::RelocationFinder;

use crate::download::DownloadError;
use crate::transport::{TransportConfig, client_builder};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Download counters of a [`Downloader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    downloads: u64,
    bytes: u64,
}

impl SessionStats {
    /// Number of successful downloads.
    #[must_use]
    pub fn downloads(&self) -> u64 {
        self.downloads
    }

    /// Total bytes received by successful downloads.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn record(&mut self, bytes: u64) {
        self.downloads += 1;
        self.bytes = self.bytes.saturating_add(bytes);
    }
}

impl fmt::Display for SessionStats {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Downloaded {} item(s) - {:.2} MiB",
            self.downloads,
            self.bytes as f64 / BYTES_PER_MIB
        )
    }
}

/// Blocking-free, one request at a time HTTP downloader.
///
/// Calls on a shared downloader are served in turn, so the statistics and
/// the cookies captured from "the last response" always describe one whole
/// download.
///
/// # Example
///
/// ```no_run
/// use fetcher_core::session::Downloader;
/// use fetcher_core::transport::TransportConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let downloader = Downloader::new(&TransportConfig::default())?.with_store_cookies(true);
/// let page = downloader.download_string("https://example.com/").await?;
/// println!("{} chars, {}", page.len(), downloader.statistics());
/// # Ok(())
/// # }
/// ```
pub struct Downloader {
    client: Client,
    jar: Arc<Jar>,
    store_cookies: bool,
    stats: Mutex<SessionStats>,
    cookies: Mutex<HashMap<String, String>>,
    turn: tokio::sync::Mutex<()>,
}

impl Downloader {
    /// Builds a downloader from the transport settings.
    ///
    /// A cookie jar is always attached so cookies set by earlier responses
    /// are sent back; the one from `config` is reused when present.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, DownloadError> {
        let jar = config.cookie_jar.clone().unwrap_or_default();
        let config = config.clone().with_cookie_jar(Arc::clone(&jar));
        let client = client_builder(&config)
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self {
            client,
            jar,
            store_cookies: false,
            stats: Mutex::new(SessionStats::default()),
            cookies: Mutex::new(HashMap::new()),
            turn: tokio::sync::Mutex::new(()),
        })
    }

    /// Enables or disables capture of the cookies set by each response.
    #[must_use]
    pub fn with_store_cookies(mut self, store_cookies: bool) -> Self {
        self.store_cookies = store_cookies;
        self
    }

    /// The cookie jar attached to this downloader's client.
    #[must_use]
    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Downloads `url` into memory.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the URL is invalid, the request fails or
    /// the server answers outside 2xx.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn download_buffer(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let _turn = self.turn.lock().await;
        let response = self.send(url, self.client.get(url)).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        self.record(body.len() as u64);
        Ok(body.to_vec())
    }

    /// Downloads `url` as text, decoded with the response charset (UTF-8 by
    /// default).
    ///
    /// # Errors
    ///
    /// Same as [`download_buffer`](Self::download_buffer).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn download_string(&self, url: &str) -> Result<String, DownloadError> {
        let _turn = self.turn.lock().await;
        let response = self.send(url, self.client.get(url)).await?;
        let text = response
            .text()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        self.record(text.len() as u64);
        Ok(text)
    }

    /// Streams `url` into the file at `to` and returns the bytes written.
    ///
    /// A partial file is left in place on failure.
    ///
    /// # Errors
    ///
    /// Same as [`download_buffer`](Self::download_buffer), plus
    /// [`DownloadError::Io`] when the file cannot be written.
    #[instrument(skip(self), fields(url = %url, path = %to.display()))]
    pub async fn download_to_file(&self, url: &str, to: &Path) -> Result<u64, DownloadError> {
        let _turn = self.turn.lock().await;
        let response = self.send(url, self.client.get(url)).await?;
        let written = stream_to_file(response, url, to).await?;
        self.record(written);
        Ok(written)
    }

    /// POSTs `parameters` as an url-encoded form and writes the response
    /// body to `to`.
    ///
    /// # Errors
    ///
    /// Same as [`download_to_file`](Self::download_to_file).
    #[instrument(skip(self, parameters), fields(url = %url, path = %to.display()))]
    pub async fn download_form_post(
        &self,
        url: &str,
        to: &Path,
        parameters: &[(&str, &str)],
    ) -> Result<u64, DownloadError> {
        let _turn = self.turn.lock().await;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(parameters)
            .finish();
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        let response = self.send(url, request).await?;
        let written = stream_to_file(response, url, to).await?;
        self.record(written);
        Ok(written)
    }

    /// Counters accumulated since construction.
    #[must_use]
    pub fn statistics(&self) -> SessionStats {
        *self.stats()
    }

    /// Cookies captured from the last response, by name.
    #[must_use]
    pub fn cookies(&self) -> HashMap<String, String> {
        self.cookie_map().clone()
    }

    /// Value of a captured cookie.
    #[must_use]
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        self.cookie_map().get(name).cloned()
    }

    /// Forgets captured cookies.
    pub fn dispose(&self) {
        self.cookie_map().clear();
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        info!("downloading");

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let status = response.status();
        info!(status = status.as_u16(), "received response");

        if self.store_cookies {
            self.capture_cookies(&response);
        }
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    fn capture_cookies(&self, response: &Response) {
        let mut cookies = self.cookie_map();
        cookies.clear();
        for cookie in response.cookies() {
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }
        debug!(count = cookies.len(), "captured cookies");
    }

    fn record(&self, bytes: u64) {
        self.stats().record(bytes);
    }

    fn stats(&self) -> MutexGuard<'_, SessionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cookie_map(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("store_cookies", &self.store_cookies)
            .field("stats", &self.statistics())
            .field("cookies", &self.cookie_map().len())
            .finish_non_exhaustive()
    }
}

async fn stream_to_file(response: Response, url: &str, to: &Path) -> Result<u64, DownloadError> {
    let file = File::create(to)
        .await
        .map_err(|e| DownloadError::io(to, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(to, e))?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| DownloadError::io(to, e))?;
    debug!(bytes = written, "file written");
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn downloader() -> Downloader {
        Downloader::new(&TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_stats_display_format() {
        let mut stats = SessionStats::default();
        assert_eq!(stats.to_string(), "Downloaded 0 item(s) - 0.00 MiB");
        stats.record(1024 * 1024);
        stats.record(512 * 1024);
        assert_eq!(stats.to_string(), "Downloaded 2 item(s) - 1.50 MiB");
        assert_eq!(stats.downloads(), 2);
    }

    #[test]
    fn test_download_buffer_rejects_invalid_url() {
        let result = tokio_test::block_on(downloader().download_buffer("not-a-valid-url"));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_download_buffer_success_updates_stats() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7_u8; 2048]))
            .mount(&server)
            .await;

        let downloader = downloader();
        let body = downloader
            .download_buffer(&format!("{}/data.bin", server.uri()))
            .await
            .unwrap();

        assert_eq!(body.len(), 2048);
        assert_eq!(downloader.statistics().downloads(), 1);
        assert_eq!(downloader.statistics().bytes(), 2048);
    }

    #[tokio::test]
    async fn test_download_string_error_status() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = downloader();
        let result = downloader
            .download_string(&format!("{}/missing", server.uri()))
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(downloader.statistics(), SessionStats::default());
    }

    #[tokio::test]
    async fn test_download_to_file_writes_body() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/page.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("page.html");

        let written = downloader()
            .download_to_file(&format!("{}/page.html", server.uri()), &target)
            .await
            .unwrap();

        assert_eq!(written, 15);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "<html>hi</html>");
    }

    #[tokio::test]
    async fn test_download_form_post_sends_encoded_parameters() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("q=rust+lang"))
            .and(body_string_contains("page=2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("results"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("results.txt");

        let written = downloader()
            .download_form_post(
                &format!("{}/search", server.uri()),
                &target,
                &[("q", "rust lang"), ("page", "2")],
            )
            .await
            .unwrap();

        assert_eq!(written, 7);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "results");
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_served_in_turn() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let delay = std::time::Duration::from_millis(200);
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_string("slow").set_delay(delay))
            .mount(&server)
            .await;
        let url = format!("{}/slow", server.uri());
        let downloader = downloader();

        let started = std::time::Instant::now();
        let (first, second) = tokio::join!(
            downloader.download_string(&url),
            downloader.download_string(&url)
        );

        assert_eq!(first.unwrap(), "slow");
        assert_eq!(second.unwrap(), "slow");
        assert!(started.elapsed() >= delay * 2, "calls overlapped");
        assert_eq!(downloader.statistics().downloads(), 2);
    }

    #[tokio::test]
    async fn test_cookies_captured_only_when_enabled() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session=abc123; Path=/")
                    .set_body_string("ok"),
            )
            .mount(&server)
            .await;
        let url = format!("{}/login", server.uri());

        let plain = downloader();
        plain.download_string(&url).await.unwrap();
        assert!(plain.cookies().is_empty());

        let capturing = downloader().with_store_cookies(true);
        capturing.download_string(&url).await.unwrap();
        assert_eq!(capturing.cookie_value("session").as_deref(), Some("abc123"));

        capturing.dispose();
        assert!(capturing.cookies().is_empty());
    }
}
