use crate::error::SourceError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header is validated once at construction and marked sensitive so it
/// never shows up in debug output.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, SourceError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| SourceError::Auth(format!("invalid header name `{header_name}`: {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|_| SourceError::Auth("API key contains characters not allowed in a header".into()))?;
        value.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// `Authorization: Bearer <token>`, as used by the MobilityDatabase API.
    pub fn bearer(inner: C, token: &str) -> Result<Self, SourceError> {
        Self::new(inner, "Authorization", &format!("Bearer {token}"))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}
