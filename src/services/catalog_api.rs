//! Trait and types for interacting with a transit feed catalog.

use crate::error::SourceError;

/// Describes how a feed requires authentication.
///
/// Maps directly to the MobilityDatabase `authentication_type` field:
/// - `0` → [`FeedAuth::None`]
/// - `1` → [`FeedAuth::UrlParam`] – API key appended as a query parameter
/// - `2` → [`FeedAuth::Header`] – API key sent as an HTTP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAuth {
    None,
    UrlParam { param_name: String },
    Header { header_name: String },
}

impl FeedAuth {
    pub fn from_catalog(auth_type: i64, param_name: Option<&str>) -> Self {
        let name = param_name.unwrap_or_default().to_string();
        match auth_type {
            0 => FeedAuth::None,
            1 => FeedAuth::UrlParam { param_name: name },
            _ => FeedAuth::Header { header_name: name },
        }
    }

    /// Returns `true` if any authentication credentials are needed.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, FeedAuth::None)
    }
}

/// One realtime feed from the catalog, joined with its static schedule.
#[derive(Debug, Clone)]
pub struct CatalogFeed {
    pub id: String,
    pub provider: String,
    pub static_url: Option<String>,
    pub realtime_url: Option<String>,
    pub auth: FeedAuth,
    pub status: Option<String>,
}

impl CatalogFeed {
    /// Open, not deprecated, and with a static schedule to fetch.
    pub fn is_downloadable(&self) -> bool {
        !self.auth.requires_auth()
            && self.static_url.is_some()
            && self.status.as_deref() != Some("deprecated")
    }
}

/// Abstraction over a feed catalog provider (e.g., MobilityData).
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    /// Returns every realtime feed in the catalog. A rejected API key is
    /// reported as [`SourceError::Auth`].
    async fn list_feeds(&self) -> Result<Vec<CatalogFeed>, SourceError>;
}
