//! Redirect lookup without following the redirect.

use reqwest::Client;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};
use url::Url;

use crate::download::DownloadError;
use crate::transport::{TransportConfig, client_builder};

/// Finds where a URL redirects to without following the redirect.
#[derive(Debug, Clone)]
pub struct RelocationFinder {
    client: Client,
}

impl RelocationFinder {
    /// Builds a finder with the transport's timeouts and User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, DownloadError> {
        let client = client_builder(config)
            .redirect(Policy::none())
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self { client })
    }

    /// Returns the `Location` of a redirect response for `url`, or `None`
    /// when the server does not redirect.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the URL is invalid or the request fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn find_relocation(&self, url: &str) -> Result<Option<String>, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_redirection() {
            debug!(status = status.as_u16(), "no relocation");
            return Ok(None);
        }
        let location = response
            .headers()
            .get(LOCATION)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
        debug!(status = status.as_u16(), location = ?location, "relocation found");
        Ok(location)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn finder() -> RelocationFinder {
        RelocationFinder::new(&TransportConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_redirect_location_returned() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://cdn.example.com/new"),
            )
            .mount(&server)
            .await;

        let location = finder()
            .find_relocation(&format!("{}/old", server.uri()))
            .await
            .unwrap();

        assert_eq!(location.as_deref(), Some("https://cdn.example.com/new"));
    }

    #[tokio::test]
    async fn test_plain_response_has_no_relocation() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/here"))
            .respond_with(ResponseTemplate::new(200).set_body_string("content"))
            .mount(&server)
            .await;

        let location = finder()
            .find_relocation(&format!("{}/here", server.uri()))
            .await
            .unwrap();

        assert_eq!(location, None);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let result = finder().find_relocation("::not a url::").await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }
}
