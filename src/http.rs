//! Downloading raw bytes from a URL
//!
//! Transport failures (refused connections, timeouts, broken bodies) surface as
//! [`Error::Connection`] carrying the URL that failed; non-success statuses surface
//! as [`Error::Http`].

use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

/// Default timeout for downloads in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Download the body at `url` with a default client
pub async fn url_retrieve(url: &str) -> Result<Vec<u8>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()?;
    url_retrieve_with(&client, url).await
}

/// Download the body at `url` using an existing client
#[instrument(skip(client), level = "debug")]
pub async fn url_retrieve_with(client: &Client, url: &str) -> Result<Vec<u8>> {
    let parsed = Url::parse(url)?;

    debug!("Sending GET request to {}", parsed);
    let response = client
        .get(parsed)
        .send()
        .await
        .map_err(|e| classify(url, e))?;

    let status = response.status();
    if !status.is_success() {
        error!("Download of {} failed with status {}", url, status);
    }
    let response = response.error_for_status()?;

    let body = response.bytes().await.map_err(|e| classify(url, e))?;
    debug!("Downloaded {} bytes from {}", body.len(), url);
    Ok(body.to_vec())
}

fn classify(url: &str, source: reqwest::Error) -> Error {
    if source.is_connect() || source.is_timeout() || source.is_request() || source.is_body() {
        error!("Could not download {}: {}", url, source);
        Error::Connection {
            url: url.to_string(),
            source,
        }
    } else {
        Error::Http(source)
    }
}
