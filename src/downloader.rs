//! Download orchestration.
//!
//! [`Downloader::run`] lists every source, then downloads each feed on a
//! bounded pool of tokio tasks. A feed's failure is recorded in its
//! [`DownloadResult`]; it never stops the batch.

use crate::analyzers::types::{FailureStage, FeedFailure, SourceFailure};
use crate::config::FetchConfig;
use crate::error::DownloadError;
use crate::fetch::{HttpClient, fetch_with_retry, sink};
use crate::layout::OnDiskFeed;
use crate::parser::{parse_feed, snapshot_millis};
use crate::sources::{FeedDescriptor, FeedSource};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

/// What one successful `download_feed` call left on disk.
#[derive(Debug)]
pub struct FeedDownload {
    pub feed: OnDiskFeed,
    /// The static file was already present and was not fetched again.
    pub skipped: bool,
    pub bytes: u64,
    pub snapshots: Vec<PathBuf>,
    pub snapshot_errors: Vec<DownloadError>,
}

#[derive(Debug)]
pub enum DownloadStatus {
    Downloaded,
    Skipped,
    Failed(DownloadError),
}

/// Outcome for one feed; exactly one per listed descriptor.
#[derive(Debug)]
pub struct DownloadResult {
    pub source: String,
    pub descriptor: FeedDescriptor,
    pub directory: PathBuf,
    pub status: DownloadStatus,
    /// Static file bytes written by this run; zero when skipped or failed.
    pub bytes: u64,
    pub snapshots: Vec<PathBuf>,
    pub snapshot_errors: Vec<DownloadError>,
}

impl DownloadResult {
    fn from_outcome(
        source: &str,
        descriptor: FeedDescriptor,
        root: &Path,
        outcome: Result<FeedDownload, DownloadError>,
    ) -> Self {
        match outcome {
            Ok(download) => Self {
                source: source.to_string(),
                descriptor,
                directory: download.feed.directory,
                status: if download.skipped {
                    DownloadStatus::Skipped
                } else {
                    DownloadStatus::Downloaded
                },
                bytes: download.bytes,
                snapshots: download.snapshots,
                snapshot_errors: download.snapshot_errors,
            },
            Err(err) => Self {
                source: source.to_string(),
                directory: OnDiskFeed::locate(root, &descriptor).directory,
                descriptor,
                status: DownloadStatus::Failed(err),
                bytes: 0,
                snapshots: Vec::new(),
                snapshot_errors: Vec::new(),
            },
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, DownloadStatus::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DownloadStatus::Failed(_))
    }
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub results: Vec<DownloadResult>,
    pub source_failures: Vec<SourceFailure>,
}

impl DownloadReport {
    pub fn downloaded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, DownloadStatus::Downloaded))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.results.iter().map(|r| r.bytes).sum()
    }

    /// Per-feed failures in report form, static download first, then
    /// realtime snapshot failures.
    pub fn feed_failures(&self) -> Vec<FeedFailure> {
        let mut failures = Vec::new();
        for result in &self.results {
            let failure = |stage, reason: String| FeedFailure {
                region_id: result.descriptor.region_id.clone(),
                title: result.descriptor.title.clone(),
                stage,
                reason,
            };
            if let DownloadStatus::Failed(err) = &result.status {
                failures.push(failure(FailureStage::Download, err.to_string()));
            }
            for err in &result.snapshot_errors {
                failures.push(failure(FailureStage::Realtime, err.to_string()));
            }
        }
        failures
    }
}

/// One result slot per listed feed, in listing order.
enum Slot {
    Spawned(String, FeedDescriptor, JoinHandle<DownloadResult>),
    Settled(DownloadResult),
}

/// Drives a set of sources into one feed tree.
pub struct Downloader {
    root: PathBuf,
    force: bool,
    concurrency: usize,
}

impl Downloader {
    pub fn new(root: impl Into<PathBuf>, force: bool, concurrency: usize) -> Self {
        Self {
            root: root.into(),
            force,
            concurrency: concurrency.max(1),
        }
    }

    #[tracing::instrument(skip_all, fields(root = %self.root.display(), force = self.force, concurrency = self.concurrency))]
    pub async fn run(&self, sources: &[Arc<dyn FeedSource>]) -> DownloadReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut report = DownloadReport::default();
        let mut seen = HashSet::new();
        let mut directories: HashMap<String, String> = HashMap::new();
        let mut tasks = Vec::new();

        for source in sources {
            let listing = match source.list_feeds().await {
                Ok(listing) => listing,
                Err(e) => {
                    error!(source = source.name(), error = %e, "Feed source failed, skipping its feeds");
                    report.source_failures.push(SourceFailure::new(source.name(), &e));
                    continue;
                }
            };

            for rejected in &listing.rejected {
                report
                    .source_failures
                    .push(SourceFailure::new(source.name(), rejected));
            }

            for descriptor in listing.feeds {
                if !seen.insert(descriptor.region_id.clone()) {
                    warn!(
                        source = source.name(),
                        region_id = %descriptor.region_id,
                        "Feed already listed by an earlier source, ignoring duplicate"
                    );
                    continue;
                }

                let directory = OnDiskFeed::locate(&self.root, &descriptor).directory;
                let dir_key = directory.to_string_lossy().to_lowercase();
                if let Some(owner) = directories.get(&dir_key) {
                    warn!(
                        source = source.name(),
                        region_id = %descriptor.region_id,
                        owner = %owner,
                        "Feed directory already taken, not downloading"
                    );
                    let clash = DownloadError::DirectoryClash {
                        region_id: descriptor.region_id.clone(),
                        directory,
                        owner: owner.clone(),
                    };
                    let result =
                        DownloadResult::from_outcome(source.name(), descriptor, &self.root, Err(clash));
                    tasks.push(Slot::Settled(result));
                    continue;
                }
                directories.insert(dir_key, descriptor.region_id.clone());

                let source_name = source.name().to_string();
                let sem = semaphore.clone();
                let source = Arc::clone(source);
                let root = self.root.clone();
                let force = self.force;
                let span = tracing::info_span!(
                    "download_feed",
                    source = source.name(),
                    region_id = %descriptor.region_id,
                );

                let task_descriptor = descriptor.clone();
                let task = tokio::spawn(
                    async move {
                        let _permit = match sem.acquire().await {
                            Ok(permit) => permit,
                            Err(e) => {
                                return DownloadResult::from_outcome(
                                    source.name(),
                                    task_descriptor,
                                    &root,
                                    Err(DownloadError::Aborted(e.to_string())),
                                );
                            }
                        };

                        let outcome = source.download_feed(&task_descriptor, &root, force).await;
                        match &outcome {
                            Ok(download) if download.skipped => debug!("Feed skipped"),
                            Ok(download) => info!(bytes = download.bytes, "Feed downloaded"),
                            Err(e) => error!(error = %e, "Feed download failed"),
                        }
                        DownloadResult::from_outcome(source.name(), task_descriptor, &root, outcome)
                    }
                    .instrument(span),
                );

                tasks.push(Slot::Spawned(source_name, descriptor, task));
            }
        }

        for slot in tasks {
            let result = match slot {
                Slot::Settled(result) => result,
                Slot::Spawned(source, descriptor, task) => match task.await {
                    Ok(result) => result,
                    Err(e) => DownloadResult::from_outcome(
                        &source,
                        descriptor,
                        &self.root,
                        Err(DownloadError::Aborted(e.to_string())),
                    ),
                },
            };
            report.results.push(result);
        }

        info!(
            downloaded = report.downloaded(),
            skipped = report.skipped(),
            failed = report.failed(),
            bytes = report.bytes_downloaded(),
            source_failures = report.source_failures.len(),
            "Download run complete"
        );
        report
    }
}

/// Materializes one descriptor under `root`. Shared by every source.
///
/// The static file is skipped when `force` is false and it is already on
/// disk. A realtime snapshot, when the feed has one, is fetched on every
/// call and stored under its producer timestamp.
pub async fn download_descriptor<C: HttpClient + ?Sized>(
    client: &C,
    fetch: &FetchConfig,
    descriptor: &FeedDescriptor,
    root: &Path,
    force: bool,
) -> Result<FeedDownload, DownloadError> {
    let feed = OnDiskFeed::locate(root, descriptor);
    let skipped = !force && feed.is_populated();
    let mut bytes = 0;

    if skipped {
        debug!(path = %feed.gtfs_file().display(), "Static GTFS already on disk");
        if !feed.descriptor_file().exists() {
            feed.write_descriptor().await?;
        }
    } else {
        bytes = sink::write_url_to_file(client, &descriptor.gtfs_url, &feed.gtfs_file(), fetch).await?;
        feed.write_descriptor().await?;
    }

    let mut snapshots = Vec::new();
    let mut snapshot_errors = Vec::new();
    if let Some(rt_url) = &descriptor.gtfs_rt_url {
        match fetch_snapshot(client, fetch, rt_url, &feed).await {
            Ok(path) => snapshots.push(path),
            Err(e) => {
                warn!(url = %rt_url, error = %e, "Realtime snapshot failed");
                snapshot_errors.push(e);
            }
        }
    }

    Ok(FeedDownload {
        feed,
        skipped,
        bytes,
        snapshots,
        snapshot_errors,
    })
}

async fn fetch_snapshot<C: HttpClient + ?Sized>(
    client: &C,
    fetch: &FetchConfig,
    url: &str,
    feed: &OnDiskFeed,
) -> Result<PathBuf, DownloadError> {
    let body = fetch_with_retry(client, url, fetch).await?;
    let message = parse_feed(&body).map_err(|e| DownloadError::InvalidSnapshot {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let millis = snapshot_millis(&message).unwrap_or_else(|| Utc::now().timestamp_millis().max(0) as u64);
    let path = feed.realtime_dir().join(format!("{millis}.pb"));
    sink::write_bytes(&path, &body).await?;

    debug!(path = %path.display(), entities = message.entity.len(), "Realtime snapshot stored");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::fetch::BasicClient;
    use crate::gtfs_rt::{FeedHeader, FeedMessage};
    use crate::services::catalog_api::{CatalogApi, CatalogFeed};
    use crate::sources::{CatalogSource, CsvManifestSource, FeedListing};
    use async_trait::async_trait;
    use prost::Message;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manifest_source(dir: &Path, rows: &str) -> Arc<dyn FeedSource> {
        let manifest = dir.join("feeds.csv");
        fs::write(&manifest, rows).unwrap();
        let fetch = FetchConfig::default();
        Arc::new(CsvManifestSource::new(
            manifest,
            BasicClient::new(&fetch).unwrap(),
            fetch,
        ))
    }

    async fn serve(server: &MockServer, route: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    fn feed_dir(root: &Path, region_id: &str, title: &str) -> PathBuf {
        let descriptor = FeedDescriptor {
            region_id: region_id.into(),
            title: title.into(),
            gtfs_url: String::new(),
            gtfs_rt_url: None,
        };
        OnDiskFeed::locate(root, &descriptor).directory
    }

    fn snapshot_bytes(timestamp: u64) -> Vec<u8> {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".into(),
                timestamp: Some(timestamp),
                incrementality: None,
                feed_version: None,
            },
            entity: vec![],
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn test_existing_static_file_is_skipped_without_force() {
        let server = MockServer::start().await;
        serve(&server, "/gtfs.zip", b"new").await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let source = manifest_source(
            work.path(),
            &format!("R1,Agency One,{}/gtfs.zip,\n", server.uri()),
        );

        let existing = feed_dir(&root, "R1", "Agency One").join("gtfs/gtfs.zip");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"old").unwrap();

        let report = Downloader::new(&root, false, 2).run(&[source]).await;

        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].is_skipped());
        assert_eq!(fs::read(&existing).unwrap(), b"old");
        assert_eq!(report.bytes_downloaded(), 0);
    }

    #[tokio::test]
    async fn test_force_overwrites_static_file() {
        let server = MockServer::start().await;
        serve(&server, "/gtfs.zip", b"new").await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let source = manifest_source(
            work.path(),
            &format!("R1,Agency One,{}/gtfs.zip,\n", server.uri()),
        );

        let existing = feed_dir(&root, "R1", "Agency One").join("gtfs/gtfs.zip");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"old").unwrap();

        let report = Downloader::new(&root, true, 2).run(&[source]).await;

        assert!(matches!(report.results[0].status, DownloadStatus::Downloaded));
        assert_eq!(fs::read(&existing).unwrap(), b"new");
        assert_eq!(report.results[0].bytes, 3);
        assert_eq!(report.bytes_downloaded(), 3);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let server = MockServer::start().await;
        serve(&server, "/good.zip", b"zip").await;
        Mock::given(method("GET"))
            .and(path("/bad.zip"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let rows = format!(
            "region_id,title,gtfs_url,gtfs_rt_url\n\
             R1,Bad,{uri}/bad.zip,\n\
             R2,Good,{uri}/good.zip,\n\
             R3,No Url,,\n",
            uri = server.uri()
        );
        let source = manifest_source(work.path(), &rows);

        let report = Downloader::new(&root, true, 4).run(&[source]).await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].descriptor.region_id, "R1");
        assert!(report.results[0].is_failed());
        assert!(matches!(report.results[1].status, DownloadStatus::Downloaded));
        assert_eq!(report.source_failures.len(), 1);

        let failures = report.feed_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].region_id, "R1");
        assert_eq!(failures[0].stage, FailureStage::Download);
    }

    #[tokio::test]
    async fn test_realtime_snapshot_named_by_header_timestamp() {
        let server = MockServer::start().await;
        serve(&server, "/gtfs.zip", b"zip").await;
        serve(&server, "/vp.pb", &snapshot_bytes(1_700_000_000)).await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let source = manifest_source(
            work.path(),
            &format!("R1,A,{uri}/gtfs.zip,{uri}/vp.pb\n", uri = server.uri()),
        );

        let report = Downloader::new(&root, false, 1).run(&[source]).await;

        let dir = feed_dir(&root, "R1", "A");
        let expected = dir.join("gtfs-realtime/1700000000000.pb");
        assert_eq!(report.results[0].snapshots, vec![expected.clone()]);
        assert!(expected.is_file());
        assert!(dir.join("feed.json").is_file());
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_reported_not_written() {
        let server = MockServer::start().await;
        serve(&server, "/gtfs.zip", b"zip").await;
        serve(&server, "/vp.pb", &[0xFF, 0xFE, 0x00, 0x01]).await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let source = manifest_source(
            work.path(),
            &format!("R1,A,{uri}/gtfs.zip,{uri}/vp.pb\n", uri = server.uri()),
        );

        let report = Downloader::new(&root, false, 1).run(&[source]).await;

        assert!(matches!(report.results[0].status, DownloadStatus::Downloaded));
        assert_eq!(report.results[0].snapshot_errors.len(), 1);
        assert!(!feed_dir(&root, "R1", "A").join("gtfs-realtime").exists());
        assert_eq!(report.feed_failures()[0].stage, FailureStage::Realtime);
    }

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(std::time::Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        serve(&server, "/fast.zip", b"fast").await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let rows = format!(
            "A,Slow,{uri}/slow.zip,\nB,Fast,{uri}/fast.zip,\n",
            uri = server.uri()
        );
        let source = manifest_source(work.path(), &rows);

        let report = Downloader::new(&root, true, 2).run(&[source]).await;

        let ids: Vec<_> = report
            .results
            .iter()
            .map(|r| r.descriptor.region_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_case_only_directory_clash_is_reported() {
        let server = MockServer::start().await;
        serve(&server, "/a.zip", b"first").await;
        serve(&server, "/b.zip", b"second").await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let rows = format!(
            "R1,Agency,{uri}/a.zip,\nr1,AGENCY,{uri}/b.zip,\n",
            uri = server.uri()
        );
        let source = manifest_source(work.path(), &rows);

        let report = Downloader::new(&root, true, 2).run(&[source]).await;

        assert_eq!(report.results.len(), 2);
        assert!(matches!(report.results[0].status, DownloadStatus::Downloaded));
        assert!(matches!(
            &report.results[1].status,
            DownloadStatus::Failed(DownloadError::DirectoryClash { owner, .. }) if owner == "R1"
        ));
        let gtfs = feed_dir(&root, "R1", "Agency").join("gtfs/gtfs.zip");
        assert_eq!(fs::read(gtfs).unwrap(), b"first");

        let failures = report.feed_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].region_id, "r1");
        assert_eq!(failures[0].stage, FailureStage::Download);
    }

    #[tokio::test]
    async fn test_lookalike_ids_get_their_own_directories() {
        let server = MockServer::start().await;
        serve(&server, "/a.zip", b"first").await;
        serve(&server, "/b.zip", b"second").await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let rows = format!("R1,A-B,{uri}/a.zip,\nR1-A,B,{uri}/b.zip,\n", uri = server.uri());
        let source = manifest_source(work.path(), &rows);

        let report = Downloader::new(&root, true, 2).run(&[source]).await;

        assert_eq!(report.downloaded(), 2);
        assert_ne!(report.results[0].directory, report.results[1].directory);
        let first = feed_dir(&root, "R1", "A-B").join("gtfs/gtfs.zip");
        let second = feed_dir(&root, "R1-A", "B").join("gtfs/gtfs.zip");
        assert_eq!(fs::read(first).unwrap(), b"first");
        assert_eq!(fs::read(second).unwrap(), b"second");
    }

    /// Lists `count` feeds and records how many downloads overlap.
    struct CountingSource {
        count: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingSource {
        fn new(count: usize) -> Self {
            Self {
                count,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FeedSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn list_feeds(&self) -> Result<FeedListing, SourceError> {
            let feeds = (0..self.count)
                .map(|i| FeedDescriptor {
                    region_id: format!("F{i}"),
                    title: String::new(),
                    gtfs_url: format!("http://x/{i}.zip"),
                    gtfs_rt_url: None,
                })
                .collect();
            Ok(FeedListing {
                feeds,
                rejected: Vec::new(),
            })
        }

        async fn download_feed(
            &self,
            descriptor: &FeedDescriptor,
            root: &Path,
            _force: bool,
        ) -> Result<FeedDownload, DownloadError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FeedDownload {
                feed: OnDiskFeed::locate(root, descriptor),
                skipped: false,
                bytes: 1,
                snapshots: Vec::new(),
                snapshot_errors: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_parallel_downloads() {
        let work = tempfile::tempdir().unwrap();
        let counting = Arc::new(CountingSource::new(8));
        let source: Arc<dyn FeedSource> = counting.clone();

        let report = Downloader::new(work.path(), true, 2).run(&[source]).await;

        assert_eq!(report.downloaded(), 8);
        assert_eq!(report.bytes_downloaded(), 8);
        let peak = counting.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak {peak} exceeds the limit");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_concurrency_of_one_is_sequential() {
        let work = tempfile::tempdir().unwrap();
        let counting = Arc::new(CountingSource::new(4));
        let source: Arc<dyn FeedSource> = counting.clone();

        Downloader::new(work.path(), true, 1).run(&[source]).await;

        assert_eq!(counting.peak.load(Ordering::SeqCst), 1);
    }

    struct RejectingCatalog;

    #[async_trait]
    impl CatalogApi for RejectingCatalog {
        async fn list_feeds(&self) -> Result<Vec<CatalogFeed>, SourceError> {
            Err(SourceError::Auth("refresh token rejected".into()))
        }
    }

    #[tokio::test]
    async fn test_catalog_auth_failure_keeps_manifest_feeds() {
        let server = MockServer::start().await;
        serve(&server, "/gtfs.zip", b"zip").await;

        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("feeds");
        let fetch = FetchConfig::default();
        let catalog: Arc<dyn FeedSource> = Arc::new(CatalogSource::new(
            RejectingCatalog,
            BasicClient::new(&fetch).unwrap(),
            fetch,
        ));
        let manifest = manifest_source(work.path(), &format!("R1,One,{}/gtfs.zip,\n", server.uri()));

        let report = Downloader::new(&root, true, 2).run(&[catalog, manifest]).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].source, "csv");
        assert!(matches!(report.results[0].status, DownloadStatus::Downloaded));
        assert_eq!(report.source_failures.len(), 1);
        assert_eq!(report.source_failures[0].source, "catalog");
        assert!(report.source_failures[0].reason.contains("refresh token rejected"));
    }
}
