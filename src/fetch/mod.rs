mod basic;
mod client;
mod retry;
pub mod auth;
pub mod sink;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use retry::with_retry;

use crate::config::FetchConfig;
use crate::error::DownloadError;
use bytes::Bytes;
use tracing::debug;

/// Issues a single GET and returns the body of a 2xx response.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes, DownloadError> {
    let parsed = url.parse::<reqwest::Url>().map_err(|e| DownloadError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client
        .execute(req)
        .await
        .map_err(|e| transport_error(url, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = resp.bytes().await.map_err(|e| transport_error(url, e))?;
    debug!(url, bytes = body.len(), "Fetched");
    Ok(body)
}

/// [`fetch_bytes`] under the configured retry policy.
pub async fn fetch_with_retry<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    config: &FetchConfig,
) -> Result<Bytes, DownloadError> {
    with_retry(config, url, || fetch_bytes(client, url)).await
}

pub(crate) fn transport_error(url: &str, err: reqwest::Error) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout {
            url: url.to_string(),
        }
    } else {
        DownloadError::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
