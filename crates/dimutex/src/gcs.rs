//! Google Cloud Storage JSON API transport.
//!
//! Requests target a single object:
//!
//! | Operation | Request |
//! |---|---|
//! | insert | `POST {api}/upload/storage/v1/b/{bucket}/o?uploadType=multipart` |
//! | get | `GET {api}/storage/v1/b/{bucket}/o/{key}` |
//! | patch | `PATCH {api}/storage/v1/b/{bucket}/o/{key}` |
//! | delete | `DELETE {api}/storage/v1/b/{bucket}/o/{key}` |
//!
//! Preconditions travel as the `ifGenerationMatch` query parameter. The
//! object key is percent-encoded as one path segment, so keys containing
//! `/` address a single object.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::json;
use tracing::{debug, instrument};

use crate::auth::{Authenticator, GcpAuthenticator, NoAuth};
use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::transport::{ObjectId, ObjectStoreTransport, Precondition, StoreResponse, Upload};

/// Transport for the GCS JSON API or a compatible emulator.
#[derive(Clone)]
pub struct GcsTransport {
    api_url: Url,
    client: reqwest::Client,
    auth: Arc<dyn Authenticator>,
}

impl fmt::Debug for GcsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsTransport")
            .field("api_url", &self.api_url.as_str())
            .field("auth", &"<Authenticator>")
            .finish_non_exhaustive()
    }
}

impl GcsTransport {
    /// Creates a transport with an explicit client and authenticator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `api_url` is not a valid base URL.
    pub fn new(
        api_url: &str,
        client: reqwest::Client,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        let api_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| Error::config(format!("invalid api_url {api_url:?}: {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(Error::config(format!("api_url {api_url} cannot be a base")));
        }
        Ok(Self {
            api_url,
            client,
            auth,
        })
    }

    /// Creates a transport from lock configuration.
    ///
    /// Emulator endpoints get no credentials; the public API uses
    /// [`GcpAuthenticator`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the HTTP client
    /// cannot be built, or credentials cannot be discovered.
    pub async fn from_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        let auth: Arc<dyn Authenticator> = if config.is_emulator() {
            Arc::new(NoAuth)
        } else {
            Arc::new(GcpAuthenticator::from_environment().await?)
        };
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Self::new(config.api_url(), client, auth)
    }

    fn upload_url(&self, object: &ObjectId) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["upload", "storage", "v1", "b", object.bucket.as_str(), "o"]);
        }
        url
    }

    /// Returns the URL addressing `object`, with the key as one segment.
    #[must_use]
    pub fn object_url(&self, object: &ObjectId) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "storage",
                "v1",
                "b",
                object.bucket.as_str(),
                "o",
                object.key.as_str(),
            ]);
        }
        url
    }

    async fn send(
        &self,
        request: RequestBuilder,
        precondition: &Precondition,
    ) -> Result<StoreResponse> {
        let mut request = request.header(ACCEPT, "application/json");
        if let Some(generation) = precondition.if_generation_match() {
            request = request.query(&[("ifGenerationMatch", generation)]);
        }
        if let Some(authorization) = self.auth.authorization().await? {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "storage request timed out".to_string()
            } else {
                format!("storage request failed: {e}")
            };
            Error::request_failed(message, e)
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::request_failed(format!("failed reading response body: {e}"), e))?;
        debug!(status = %status, "storage response");
        Ok(StoreResponse { status, body })
    }
}

#[async_trait]
impl ObjectStoreTransport for GcsTransport {
    #[instrument(skip_all, fields(object = %object), level = "debug")]
    async fn insert(
        &self,
        object: &ObjectId,
        upload: Upload,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        let request = self
            .client
            .post(self.upload_url(object))
            .query(&[("uploadType", "multipart")])
            .header(CONTENT_TYPE, upload.content_type)
            .body(upload.body);
        self.send(request, &precondition).await
    }

    #[instrument(skip_all, fields(object = %object), level = "debug")]
    async fn get(&self, object: &ObjectId) -> Result<StoreResponse> {
        let request = self.client.get(self.object_url(object));
        self.send(request, &Precondition::None).await
    }

    #[instrument(skip_all, fields(object = %object), level = "debug")]
    async fn patch_metadata(
        &self,
        object: &ObjectId,
        metadata: HashMap<String, String>,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        let request = self
            .client
            .request(Method::PATCH, self.object_url(object))
            .json(&json!({ "metadata": metadata }));
        self.send(request, &precondition).await
    }

    #[instrument(skip_all, fields(object = %object), level = "debug")]
    async fn delete(
        &self,
        object: &ObjectId,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        let request = self.client.delete(self.object_url(object));
        self.send(request, &precondition).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(api_url: &str) -> GcsTransport {
        GcsTransport::new(api_url, reqwest::Client::new(), Arc::new(NoAuth)).expect("transport")
    }

    #[test]
    fn object_url_encodes_key_as_one_segment() {
        let gcs = transport("https://www.googleapis.com");
        let url = gcs.object_url(&ObjectId::new("bucket", "locks/nightly job"));
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/storage/v1/b/bucket/o/locks%2Fnightly%20job"
        );
    }

    #[test]
    fn upload_url_uses_upload_prefix() {
        let gcs = transport("http://127.0.0.1:4443/");
        let url = gcs.upload_url(&ObjectId::new("bucket", "k"));
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:4443/upload/storage/v1/b/bucket/o"
        );
    }

    #[test]
    fn api_url_with_path_prefix_is_kept() {
        let gcs = transport("http://localhost:9000/gcs");
        let url = gcs.object_url(&ObjectId::new("b", "k"));
        assert_eq!(url.as_str(), "http://localhost:9000/gcs/storage/v1/b/b/o/k");
    }

    #[test]
    fn rejects_invalid_api_url() {
        let result = GcsTransport::new("not a url", reqwest::Client::new(), Arc::new(NoAuth));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn from_config_uses_no_auth_for_emulator() {
        let config = LockConfig::new("b", "k").with_api_url("http://127.0.0.1:1");
        let gcs = GcsTransport::from_config(&config).await.expect("transport");
        assert_eq!(gcs.auth.authorization().await.expect("auth"), None);
    }
}
