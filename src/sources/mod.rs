//! Feed sources: where the list of feeds to download comes from.
//!
//! Each source turns its own input (a CSV manifest, a remote catalog) into
//! [`FeedDescriptor`]s and materializes them with the shared
//! [`crate::downloader::download_descriptor`] routine.

mod catalog;
mod csv_manifest;

pub use catalog::CatalogSource;
pub use csv_manifest::{CsvManifestSource, parse_manifest};

use crate::downloader::FeedDownload;
use crate::error::{DownloadError, SourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One feed to acquire. `region_id` is unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub region_id: String,
    pub title: String,
    pub gtfs_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtfs_rt_url: Option<String>,
}

/// A source's feed list plus the entries it had to reject.
#[derive(Debug, Default)]
pub struct FeedListing {
    pub feeds: Vec<FeedDescriptor>,
    pub rejected: Vec<SourceError>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Short label used in logs and reports.
    fn name(&self) -> &str;

    async fn list_feeds(&self) -> Result<FeedListing, SourceError>;

    async fn download_feed(
        &self,
        descriptor: &FeedDescriptor,
        root: &Path,
        force: bool,
    ) -> Result<FeedDownload, DownloadError>;
}
