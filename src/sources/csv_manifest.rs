use super::{FeedDescriptor, FeedListing, FeedSource};
use crate::config::FetchConfig;
use crate::downloader::{FeedDownload, download_descriptor};
use crate::error::{DownloadError, SourceError};
use crate::fetch::BasicClient;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Feeds listed in a local CSV file with the columns
/// `region_id,title,gtfs_url,gtfs_rt_url`. The header row is optional.
pub struct CsvManifestSource {
    path: PathBuf,
    client: BasicClient,
    fetch: FetchConfig,
}

impl CsvManifestSource {
    pub fn new(path: impl Into<PathBuf>, client: BasicClient, fetch: FetchConfig) -> Self {
        Self {
            path: path.into(),
            client,
            fetch,
        }
    }
}

#[async_trait]
impl FeedSource for CsvManifestSource {
    fn name(&self) -> &str {
        "csv"
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    async fn list_feeds(&self) -> Result<FeedListing, SourceError> {
        let file = std::fs::File::open(&self.path).map_err(|e| SourceError::Manifest {
            path: self.path.clone(),
            source: csv::Error::from(e),
        })?;
        let listing = parse_manifest(file).map_err(|source| SourceError::Manifest {
            path: self.path.clone(),
            source,
        })?;

        info!(
            feeds = listing.feeds.len(),
            rejected = listing.rejected.len(),
            "Manifest loaded"
        );
        Ok(listing)
    }

    async fn download_feed(
        &self,
        descriptor: &FeedDescriptor,
        root: &Path,
        force: bool,
    ) -> Result<FeedDownload, DownloadError> {
        download_descriptor(&self.client, &self.fetch, descriptor, root, force).await
    }
}

/// Reads manifest rows. Malformed rows, including ones that are not valid
/// UTF-8, are rejected individually; only an unreadable stream fails the
/// whole manifest.
pub fn parse_manifest<R: Read>(reader: R) -> Result<FeedListing, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut listing = FeedListing::default();
    let mut seen = HashSet::new();

    for (index, result) in rdr.byte_records().enumerate() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(index as u64 + 1);

        let fields = match record
            .iter()
            .map(std::str::from_utf8)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(fields) => fields,
            Err(e) => {
                let err = SourceError::MalformedRow {
                    line,
                    reason: format!("invalid UTF-8: {e}"),
                };
                warn!(line, error = %err, "Skipping manifest row");
                listing.rejected.push(err);
                continue;
            }
        };
        let field = |i: usize| fields.get(i).copied().unwrap_or("").to_string();

        let region_id = field(0);
        if index == 0 && region_id.eq_ignore_ascii_case("region_id") {
            continue;
        }
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }

        let reject = |reason: &str| SourceError::MalformedRow {
            line,
            reason: reason.to_string(),
        };

        let gtfs_url = field(2);
        let error = if region_id.is_empty() {
            Some(reject("empty region_id"))
        } else if gtfs_url.is_empty() {
            Some(reject("empty gtfs_url"))
        } else if seen.contains(&region_id) {
            Some(reject(&format!("duplicate region_id `{region_id}`")))
        } else {
            None
        };

        if let Some(err) = error {
            warn!(line, error = %err, "Skipping manifest row");
            listing.rejected.push(err);
            continue;
        }

        let rt_url = field(3);
        seen.insert(region_id.clone());
        listing.feeds.push(FeedDescriptor {
            region_id,
            title: field(1),
            gtfs_url,
            gtfs_rt_url: (!rt_url.is_empty()).then_some(rt_url),
        });
    }

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_header() {
        let data = "region_id,title,gtfs_url,gtfs_rt_url\n\
                    R1,Agency One,http://x/gtfs.zip,http://x/rt.pb\n";
        let listing = parse_manifest(data.as_bytes()).unwrap();

        assert_eq!(listing.feeds.len(), 1);
        assert_eq!(listing.feeds[0].region_id, "R1");
        assert_eq!(listing.feeds[0].title, "Agency One");
        assert_eq!(listing.feeds[0].gtfs_rt_url.as_deref(), Some("http://x/rt.pb"));
    }

    #[test]
    fn test_parse_without_header_and_blank_realtime() {
        let listing = parse_manifest("R1,Agency One,http://x/gtfs.zip,\n".as_bytes()).unwrap();

        assert_eq!(listing.feeds.len(), 1);
        assert_eq!(listing.feeds[0].gtfs_rt_url, None);
        assert!(listing.rejected.is_empty());
    }

    #[test]
    fn test_missing_realtime_column_is_allowed() {
        let listing = parse_manifest("R1,Agency One,http://x/gtfs.zip\n".as_bytes()).unwrap();
        assert_eq!(listing.feeds.len(), 1);
        assert_eq!(listing.feeds[0].gtfs_rt_url, None);
    }

    #[test]
    fn test_empty_gtfs_url_is_rejected_not_fatal() {
        let data = "R1,Agency One,,http://x/rt.pb\nR2,Agency Two,http://y/gtfs.zip,\n";
        let listing = parse_manifest(data.as_bytes()).unwrap();

        assert_eq!(listing.feeds.len(), 1);
        assert_eq!(listing.feeds[0].region_id, "R2");
        assert_eq!(listing.rejected.len(), 1);
        assert!(matches!(
            listing.rejected[0],
            SourceError::MalformedRow { line: 1, .. }
        ));
    }

    #[test]
    fn test_duplicate_region_keeps_first() {
        let data = "R1,First,http://x/a.zip,\nR1,Second,http://x/b.zip,\n";
        let listing = parse_manifest(data.as_bytes()).unwrap();

        assert_eq!(listing.feeds.len(), 1);
        assert_eq!(listing.feeds[0].title, "First");
        assert_eq!(listing.rejected.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_row_is_rejected_not_fatal() {
        let data = b"R1,Good,http://x/1.zip,\nR2,Bad \xff\xfe,http://x/2.zip,\nR3,Good,http://x/3.zip,\n";
        let listing = parse_manifest(&data[..]).unwrap();

        let ids: Vec<_> = listing.feeds.iter().map(|f| f.region_id.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R3"]);
        assert_eq!(listing.rejected.len(), 1);
        assert!(matches!(
            &listing.rejected[0],
            SourceError::MalformedRow { line: 2, reason } if reason.starts_with("invalid UTF-8")
        ));
    }

    #[tokio::test]
    async fn test_missing_manifest_file_is_source_error() {
        let config = FetchConfig::default();
        let source = CsvManifestSource::new(
            "/nonexistent/feeds.csv",
            BasicClient::new(&config).unwrap(),
            config,
        );
        assert!(matches!(
            source.list_feeds().await,
            Err(SourceError::Manifest { .. })
        ));
    }
}
