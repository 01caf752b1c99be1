use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::SourceError;
use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient};
use crate::services::catalog_api::{CatalogApi, CatalogFeed, FeedAuth};

const DEFAULT_PAGE_SIZE: usize = 100;
/// Upper bound on listing requests, for catalogs that never return a short page.
const MAX_PAGES: usize = 1000;

#[derive(Serialize)]
struct TokenRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client for the MobilityDatabase catalog.
///
/// The configured API key is a refresh token; it is exchanged for a
/// short-lived access token on every listing, so an invalid key surfaces
/// from [`CatalogApi::list_feeds`] rather than at construction.
pub struct MobilityDataClient {
    base_url: String,
    refresh_token: String,
    page_size: usize,
    http: BasicClient,
}

impl MobilityDataClient {
    pub fn new(
        base_url: impl Into<String>,
        refresh_token: impl Into<String>,
        fetch: &FetchConfig,
    ) -> Result<Self, SourceError> {
        let http = BasicClient::new(fetch)
            .map_err(|e| SourceError::Catalog(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_token: refresh_token.into(),
            page_size: DEFAULT_PAGE_SIZE,
            http,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn exchange_token(&self) -> Result<String, SourceError> {
        if self.refresh_token.trim().is_empty() {
            return Err(SourceError::Auth("API key is empty".into()));
        }

        let url = format!("{}/v1/tokens", self.base_url);
        let req = self
            .http
            .inner()
            .post(&url)
            .json(&TokenRequest {
                refresh_token: &self.refresh_token,
            })
            .build()
            .map_err(|e| SourceError::Catalog(format!("cannot build token request: {e}")))?;

        let response = self
            .http
            .execute(req)
            .await
            .map_err(|e| SourceError::Catalog(format!("failed to send token request: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(SourceError::Auth(format!("token exchange rejected with status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Catalog(format!(
                "token exchange failed with status {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("failed to parse token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn list_realtime_entries<C: HttpClient>(&self, client: &C) -> Result<Vec<Value>, SourceError> {
        let mut entries = Vec::new();
        let mut offset = 0;
        let mut previous_first: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let url = format!(
                "{}/v1/gtfs_rt_feeds?limit={}&offset={}",
                self.base_url, self.page_size, offset
            );
            let page = match get_json(client, &url).await? {
                Value::Array(items) => items,
                other => {
                    return Err(SourceError::Catalog(format!(
                        "expected a JSON array from {url}, got {}",
                        json_kind(&other)
                    )));
                }
            };

            let first = page.first().and_then(|item| item["id"].as_str()).map(str::to_string);
            if first.is_some() && first == previous_first {
                warn!(offset, "Catalog repeated the previous page, stopping pagination");
                return Ok(entries);
            }

            let count = page.len();
            debug!(offset, count, "Catalog page fetched");
            entries.extend(page);

            if count < self.page_size {
                return Ok(entries);
            }
            previous_first = first;
            offset += count;
        }

        warn!(pages = MAX_PAGES, entries = entries.len(), "Catalog page limit reached");
        Ok(entries)
    }

    /// Looks up the download URL of a static feed, preferring the catalog's
    /// hosted copy of the latest dataset.
    async fn resolve_static_url<C: HttpClient>(&self, client: &C, feed_id: &str) -> Option<String> {
        let url = format!("{}/v1/gtfs_feeds/{}", self.base_url, feed_id);
        match get_json(client, &url).await {
            Ok(item) => item["latest_dataset"]["hosted_url"]
                .as_str()
                .or_else(|| item["source_info"]["producer_url"].as_str())
                .map(str::to_string),
            Err(e) => {
                warn!(feed_id, error = %e, "Cannot resolve static feed");
                None
            }
        }
    }
}

#[async_trait]
impl CatalogApi for MobilityDataClient {
    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn list_feeds(&self) -> Result<Vec<CatalogFeed>, SourceError> {
        let access_token = self.exchange_token().await?;
        let authed = ApiKey::bearer(self.http.clone(), &access_token)?;

        let entries = self.list_realtime_entries(&authed).await?;
        let mut static_urls: HashMap<String, Option<String>> = HashMap::new();
        let mut feeds = Vec::with_capacity(entries.len());

        for item in &entries {
            let Some(mut feed) = parse_realtime_entry(item) else {
                continue;
            };

            let needs_static = !feed.auth.requires_auth() && feed.status.as_deref() != Some("deprecated");
            if needs_static {
                if let Some(reference) = first_reference(item) {
                    if !static_urls.contains_key(&reference) {
                        let resolved = self.resolve_static_url(&authed, &reference).await;
                        static_urls.insert(reference.clone(), resolved);
                    }
                    feed.static_url = static_urls.get(&reference).cloned().flatten();
                }
            }

            feeds.push(feed);
        }

        info!(total = feeds.len(), "Catalog feeds listed");
        Ok(feeds)
    }
}

async fn get_json<C: HttpClient>(client: &C, url: &str) -> Result<Value, SourceError> {
    let parsed = url
        .parse::<reqwest::Url>()
        .map_err(|e| SourceError::Catalog(format!("invalid catalog URL {url}: {e}")))?;
    let response = client
        .execute(reqwest::Request::new(reqwest::Method::GET, parsed))
        .await
        .map_err(|e| SourceError::Catalog(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SourceError::Auth(format!("{url} returned {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Catalog(format!("{url} returned {status}: {body}")));
    }

    response
        .json()
        .await
        .map_err(|e| SourceError::Catalog(format!("failed to parse response from {url}: {e}")))
}

/// Extracts the fields we need from one `/v1/gtfs_rt_feeds` item.
fn parse_realtime_entry(item: &Value) -> Option<CatalogFeed> {
    let id = item["id"].as_str()?.to_string();
    let source_info = &item["source_info"];

    Some(CatalogFeed {
        id,
        provider: item["provider"].as_str().unwrap_or("").to_string(),
        static_url: None,
        realtime_url: source_info["producer_url"].as_str().map(str::to_string),
        auth: FeedAuth::from_catalog(
            source_info["authentication_type"].as_i64().unwrap_or(0),
            source_info["api_key_parameter_name"].as_str(),
        ),
        status: item["status"].as_str().map(str::to_string),
    })
}

fn first_reference(item: &Value) -> Option<String> {
    item["feed_references"]
        .as_array()?
        .iter()
        .find_map(|r| r.as_str())
        .map(str::to_string)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
