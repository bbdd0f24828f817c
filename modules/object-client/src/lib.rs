pub mod error;

pub use error::{ObjectClientError, Result};

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE};
use reqwest::StatusCode;
use url::Url;

/// Prefix of user-defined metadata headers.
const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Result of a HEAD request against an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    /// User metadata with the `x-amz-meta-` prefix stripped.
    pub metadata: BTreeMap<String, String>,
}

impl ObjectHead {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let metadata = headers
            .iter()
            .filter_map(|(name, value)| {
                let key = name.as_str().strip_prefix(USER_METADATA_PREFIX)?;
                let value = value.to_str().ok()?;
                Some((key.to_string(), value.to_string()))
            })
            .collect();

        Self {
            content_type: header_text(headers, CONTENT_TYPE),
            metadata,
        }
    }
}

fn header_text(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Path-style client for an S3-compatible endpoint: `{endpoint}/{bucket}/{key}`.
pub struct ObjectClient {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl ObjectClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(ObjectClientError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// URL of an object. Each key segment is percent-encoded; `/` separators
    /// are kept.
    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ObjectClientError::InvalidEndpoint(self.endpoint.to_string()))?;
            segments.pop_if_empty().push(bucket).extend(key.split('/'));
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Fetch content type and user metadata of an object.
    pub async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let url = self.object_url(bucket, key)?;
        let resp = self.request(reqwest::Method::HEAD, url).send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ObjectClientError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ObjectClientError::Api {
                status: status.as_u16(),
                message: format!("HEAD {bucket}/{key}"),
            });
        }

        let head = ObjectHead::from_headers(resp.headers());
        tracing::debug!(
            bucket,
            key,
            content_type = head.content_type.as_deref().unwrap_or(""),
            metadata_keys = head.metadata.len(),
            "Fetched object metadata"
        );
        Ok(head)
    }

    /// Delete an object. A missing object counts as deleted.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.object_url(bucket, key)?;
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            tracing::debug!(bucket, key, status = status.as_u16(), "Deleted object");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(ObjectClientError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}
