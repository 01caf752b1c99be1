//! Writes fetched bytes to disk.

use super::{HttpClient, fetch_with_retry};
use crate::config::FetchConfig;
use crate::error::DownloadError;
use std::path::Path;
use tracing::debug;

/// Fetches `url` and stores the body at `dest`, returning the byte count.
pub async fn write_url_to_file<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    dest: &Path,
    config: &FetchConfig,
) -> Result<u64, DownloadError> {
    let body = fetch_with_retry(client, url, config).await?;
    write_bytes(dest, &body).await?;
    Ok(body.len() as u64)
}

/// Writes `bytes` to `dest`, creating parent directories first.
///
/// The data lands in a sibling `.part` file that is renamed into place, so
/// an interrupted write never leaves a non-empty file at `dest`.
pub async fn write_bytes(dest: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, &e))?;
    }

    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    let part = Path::new(&part);

    let written = match tokio::fs::write(part, bytes).await {
        Ok(()) => tokio::fs::rename(part, dest)
            .await
            .map_err(|e| DownloadError::io(dest, &e)),
        Err(e) => Err(DownloadError::io(part, &e)),
    };
    if let Err(err) = written {
        if let Err(e) = tokio::fs::remove_file(part).await {
            debug!(path = %part.display(), error = %e, "No partial file to remove");
        }
        return Err(err);
    }

    debug!(path = %dest.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}
