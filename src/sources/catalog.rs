use super::{FeedDescriptor, FeedListing, FeedSource};
use crate::config::FetchConfig;
use crate::downloader::{FeedDownload, download_descriptor};
use crate::error::{DownloadError, SourceError};
use crate::fetch::BasicClient;
use crate::services::catalog_api::{CatalogApi, CatalogFeed};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Feeds discovered through a remote [`CatalogApi`].
///
/// Feed files are fetched with a plain client; catalog credentials are never
/// sent to feed producers.
pub struct CatalogSource<A> {
    api: A,
    client: BasicClient,
    fetch: FetchConfig,
}

impl<A: CatalogApi> CatalogSource<A> {
    pub fn new(api: A, client: BasicClient, fetch: FetchConfig) -> Self {
        Self { api, client, fetch }
    }
}

fn to_descriptor(feed: CatalogFeed) -> Option<FeedDescriptor> {
    if !feed.is_downloadable() {
        debug!(
            feed_id = %feed.id,
            requires_auth = feed.auth.requires_auth(),
            status = feed.status.as_deref().unwrap_or("active"),
            has_static = feed.static_url.is_some(),
            "Skipping catalog feed"
        );
        return None;
    }

    Some(FeedDescriptor {
        region_id: feed.id,
        title: feed.provider,
        gtfs_url: feed.static_url?,
        gtfs_rt_url: feed.realtime_url,
    })
}

#[async_trait]
impl<A: CatalogApi> FeedSource for CatalogSource<A> {
    fn name(&self) -> &str {
        "catalog"
    }

    async fn list_feeds(&self) -> Result<FeedListing, SourceError> {
        let catalog = self.api.list_feeds().await?;
        let total = catalog.len();
        let feeds: Vec<_> = catalog.into_iter().filter_map(to_descriptor).collect();

        info!(total, downloadable = feeds.len(), "Catalog feeds ready");
        Ok(FeedListing {
            feeds,
            rejected: Vec::new(),
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog_api::FeedAuth;

    struct FixedCatalog(Result<Vec<CatalogFeed>, String>);

    #[async_trait]
    impl CatalogApi for FixedCatalog {
        async fn list_feeds(&self) -> Result<Vec<CatalogFeed>, SourceError> {
            self.0.clone().map_err(SourceError::Auth)
        }
    }

    fn source(catalog: FixedCatalog) -> CatalogSource<FixedCatalog> {
        let fetch = FetchConfig::default();
        CatalogSource::new(catalog, BasicClient::new(&fetch).unwrap(), fetch)
    }

    fn feed(id: &str, static_url: Option<&str>) -> CatalogFeed {
        CatalogFeed {
            id: id.into(),
            provider: format!("Provider {id}"),
            static_url: static_url.map(String::from),
            realtime_url: Some(format!("http://x/{id}.pb")),
            auth: FeedAuth::None,
            status: None,
        }
    }

    #[tokio::test]
    async fn test_only_downloadable_feeds_listed() {
        let listing = source(FixedCatalog(Ok(vec![
            feed("mdb-1", Some("http://x/1.zip")),
            feed("mdb-2", None),
        ])))
        .list_feeds()
        .await
        .unwrap();

        assert_eq!(listing.feeds.len(), 1);
        assert_eq!(listing.feeds[0].region_id, "mdb-1");
        assert_eq!(listing.feeds[0].title, "Provider mdb-1");
        assert_eq!(listing.feeds[0].gtfs_rt_url.as_deref(), Some("http://x/mdb-1.pb"));
    }

    #[tokio::test]
    async fn test_auth_error_propagates_to_caller() {
        let result = source(FixedCatalog(Err("bad key".into()))).list_feeds().await;
        assert!(matches!(result, Err(SourceError::Auth(_))));
    }
}
