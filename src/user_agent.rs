//! Default User-Agent string shared by the transport and the session helpers.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/fetcher";

/// Default User-Agent: `fetcher/<version> (+<project url>)`.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fetcher/{version} (+{PROJECT_UA_URL})")
}
