//! Skips wiremock-backed tests where loopback sockets cannot be bound.
//!
//! Shared by the unit tests and, through a `#[path]` include, by the
//! integration tests under `tests/`.

use std::net::TcpListener;

use wiremock::MockServer;

const REQUIRE_SOCKETS_ENV: &str = "FETCHER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_SOCKETS_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a mock server, or returns `None` (after saying so on stderr) when
/// the environment forbids binding `127.0.0.1`.
///
/// # Panics
///
/// Panics instead of skipping when `FETCHER_REQUIRE_SOCKET_TESTS` is set.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return Some(MockServer::start().await);
    }
    let test = std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    assert!(
        !sockets_required(),
        "{test}: cannot bind a loopback socket and {REQUIRE_SOCKETS_ENV} is set"
    );
    eprintln!("{test}: skipped, cannot bind a loopback socket for the mock server");
    None
}
