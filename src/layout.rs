//! On-disk layout of the feed tree.
//!
//! ```text
//! <root>/
//!   <region_id>-<title>-<digest>/
//!     feed.json                      descriptor the directory was created from
//!     gtfs/gtfs.zip                  static schedule
//!     gtfs-realtime/<millis>.pb      realtime snapshots
//!     gtfs-realtime/<millis>.pb.results.json   validator output
//! ```

use crate::error::DownloadError;
use crate::sources::FeedDescriptor;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const GTFS_DIR: &str = "gtfs";
pub const GTFS_FILE: &str = "gtfs.zip";
pub const REALTIME_DIR: &str = "gtfs-realtime";
pub const DESCRIPTOR_FILE: &str = "feed.json";
pub const RESULTS_SUFFIX: &str = ".results.json";

const KEY_DIGEST_LEN: usize = 12;

/// Makes one path component out of arbitrary text.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other run of characters
/// becomes a single `_`, and leading or trailing runs are dropped. The result
/// can never be `.`, `..` or contain a path separator.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() {
        "feed".to_string()
    } else {
        out
    }
}

/// Directory name for a feed, deterministic in `region_id` and `title`.
///
/// The readable part is lossy, so it is followed by a digest of the
/// lowercased `region_id`. Two ids that differ only in case get the same
/// key, which keeps trees portable to case-insensitive filesystems.
pub fn feed_key(descriptor: &FeedDescriptor) -> String {
    let region = sanitize_component(&descriptor.region_id);
    let digest = region_digest(&descriptor.region_id);
    if descriptor.title.trim().is_empty() {
        format!("{region}-{digest}")
    } else {
        format!(
            "{region}-{}-{digest}",
            sanitize_component(&descriptor.title)
        )
    }
}

fn region_digest(region_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(region_id.to_lowercase().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(KEY_DIGEST_LEN);
    digest
}

/// One feed's directory under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnDiskFeed {
    pub descriptor: FeedDescriptor,
    pub directory: PathBuf,
}

impl OnDiskFeed {
    pub fn locate(root: &Path, descriptor: &FeedDescriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            directory: root.join(feed_key(descriptor)),
        }
    }

    /// Loads a feed directory found on disk. Directories without a readable
    /// `feed.json` fall back to their own name as `region_id`.
    pub fn open(directory: PathBuf) -> Self {
        let descriptor = read_descriptor(&directory).unwrap_or_else(|| {
            let name = directory
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            FeedDescriptor {
                region_id: name,
                title: String::new(),
                gtfs_url: String::new(),
                gtfs_rt_url: None,
            }
        });
        Self {
            descriptor,
            directory,
        }
    }

    pub fn gtfs_file(&self) -> PathBuf {
        self.directory.join(GTFS_DIR).join(GTFS_FILE)
    }

    pub fn realtime_dir(&self) -> PathBuf {
        self.directory.join(REALTIME_DIR)
    }

    pub fn descriptor_file(&self) -> PathBuf {
        self.directory.join(DESCRIPTOR_FILE)
    }

    /// True once a non-empty static file exists, i.e. a previous run
    /// completed the static download.
    pub fn is_populated(&self) -> bool {
        fs::metadata(self.gtfs_file())
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    pub async fn write_descriptor(&self) -> Result<(), DownloadError> {
        let path = self.descriptor_file();
        let json = serde_json::to_vec_pretty(&self.descriptor).map_err(|e| DownloadError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        crate::fetch::sink::write_bytes(&path, &json).await
    }

    /// Realtime snapshot files, sorted by name.
    pub fn snapshots(&self) -> io::Result<Vec<PathBuf>> {
        let dir = self.realtime_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("pb") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_descriptor(directory: &Path) -> Option<FeedDescriptor> {
    let path = directory.join(DESCRIPTOR_FILE);
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable feed descriptor");
            None
        }
    }
}

/// Every feed directory under `root`, sorted by path.
///
/// A feed directory is one holding `feed.json` or a `gtfs/` subdirectory.
pub fn discover_feeds(root: &Path) -> io::Result<Vec<OnDiskFeed>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if path.join(DESCRIPTOR_FILE).is_file() || path.join(GTFS_DIR).is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs.into_iter().map(OnDiskFeed::open).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(region_id: &str, title: &str) -> FeedDescriptor {
        FeedDescriptor {
            region_id: region_id.into(),
            title: title.into(),
            gtfs_url: "http://x/gtfs.zip".into(),
            gtfs_rt_url: None,
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Agency One"), "Agency_One");
        assert_eq!(sanitize_component("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_component("  "), "feed");
        assert_eq!(sanitize_component("São Paulo / SPTrans"), "S_o_Paulo_SPTrans");
        assert_eq!(sanitize_component("mdb-1234"), "mdb-1234");
        assert_eq!(sanitize_component("St. Louis"), "St_Louis");
    }

    #[test]
    fn test_feed_key_is_deterministic() {
        let d = descriptor("R1", "Agency One");
        let key = feed_key(&d);
        assert!(key.starts_with("R1-Agency_One-"));
        assert_eq!(key.len(), "R1-Agency_One-".len() + KEY_DIGEST_LEN);
        assert_eq!(key, feed_key(&d.clone()));
        assert!(feed_key(&descriptor("R2", "")).starts_with("R2-"));
    }

    #[test]
    fn test_feed_key_separates_lookalike_ids() {
        let pairs = [
            (descriptor("R1", "A-B"), descriptor("R1-A", "B")),
            (descriptor("R 1", ""), descriptor("R_1", "")),
            (descriptor("a/b", "x"), descriptor("a.b", "x")),
        ];
        for (a, b) in pairs {
            assert_ne!(feed_key(&a), feed_key(&b), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_feed_key_ignores_region_case() {
        let upper = feed_key(&descriptor("MDB-1", "Metro"));
        let lower = feed_key(&descriptor("mdb-1", "Metro"));
        assert_eq!(upper.to_ascii_lowercase(), lower.to_ascii_lowercase());
    }

    #[test]
    fn test_is_populated_requires_non_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let feed = OnDiskFeed::locate(dir.path(), &descriptor("R1", "A"));
        assert!(!feed.is_populated());

        fs::create_dir_all(feed.gtfs_file().parent().unwrap()).unwrap();
        fs::write(feed.gtfs_file(), b"").unwrap();
        assert!(!feed.is_populated());

        fs::write(feed.gtfs_file(), b"zip").unwrap();
        assert!(feed.is_populated());
    }

    #[tokio::test]
    async fn test_discover_reads_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let feed = OnDiskFeed::locate(dir.path(), &descriptor("R1", "Agency One"));
        feed.write_descriptor().await.unwrap();
        fs::create_dir_all(dir.path().join("not-a-feed")).unwrap();
        fs::create_dir_all(dir.path().join("legacy").join(GTFS_DIR)).unwrap();

        let found = discover_feeds(dir.path()).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].descriptor.region_id, "R1");
        assert_eq!(found[0].descriptor.title, "Agency One");
        assert_eq!(found[1].descriptor.region_id, "legacy");
    }
}
