use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::redirect::Policy;
use reqwest::Client;

const APP_USER_AGENT: &str = concat!("Launchkeeper/", env!("CARGO_PKG_VERSION"));

/// Shared client for product downloads.
///
/// Redirects are followed by the acquisition service itself so the chain
/// length can be capped and logged, hence `Policy::none()` here.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .redirect(Policy::none())
        .connect_timeout(Duration::from_secs(20))
        .build()
}
