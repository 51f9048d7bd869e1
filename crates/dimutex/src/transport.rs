//! Object store transport contract.
//!
//! A transport executes single-object requests against a GCS-compatible
//! JSON API and hands back the raw status and body. It does not interpret
//! status codes: mapping `404`/`412` onto lock states is the job of
//! [`LockHandle`](crate::lock::LockHandle).
//!
//! The generation token is carried as an opaque `String`, matching the JSON
//! API which serializes the numeric generation as a string.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Location of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    /// Bucket name.
    pub bucket: String,
    /// Object key. May contain `/`.
    pub key: String,
}

impl ObjectId {
    /// Creates an object identifier.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.key)
    }
}

/// Generation precondition attached to a mutating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Succeed only if the object does not exist (`ifGenerationMatch=0`).
    DoesNotExist,
    /// Succeed only if the live generation equals the given token.
    MatchesGeneration(String),
    /// No precondition.
    None,
}

impl Precondition {
    /// Returns the `ifGenerationMatch` query value, if any.
    #[must_use]
    pub fn if_generation_match(&self) -> Option<&str> {
        match self {
            Self::DoesNotExist => Some("0"),
            Self::MatchesGeneration(generation) => Some(generation),
            Self::None => None,
        }
    }
}

/// An encoded multipart upload.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Full `Content-Type` header value, including the boundary.
    pub content_type: String,
    /// Encoded request body.
    pub body: Bytes,
}

/// Raw response from the store.
#[derive(Debug, Clone)]
pub struct StoreResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response body.
    pub body: Bytes,
}

impl StoreResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::protocol(format!("invalid response body: {e}")))
    }

    /// Returns the body as lossy UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Converts an unexpected response into a transport error.
    #[must_use]
    pub fn into_error(self) -> Error {
        let body = self.text();
        Error::unexpected_status(self.status, body)
    }
}

/// Object resource as returned by the JSON API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResource {
    /// Object key.
    pub name: String,
    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Content generation.
    pub generation: String,
    /// Metadata generation, bumped by metadata patches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metageneration: Option<String>,
    /// Custom metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Single-object operations against a GCS-compatible store.
///
/// Implementations return `Ok` for every response the store produced,
/// including `404` and `412`. `Err` is reserved for requests that never
/// produced a response (connection failure, timeout, credential failure).
#[async_trait]
pub trait ObjectStoreTransport: Send + Sync + 'static {
    /// Uploads a new object from a multipart body.
    async fn insert(
        &self,
        object: &ObjectId,
        upload: Upload,
        precondition: Precondition,
    ) -> Result<StoreResponse>;

    /// Reads object metadata.
    async fn get(&self, object: &ObjectId) -> Result<StoreResponse>;

    /// Replaces custom metadata entries on an existing object.
    async fn patch_metadata(
        &self,
        object: &ObjectId,
        metadata: HashMap<String, String>,
        precondition: Precondition,
    ) -> Result<StoreResponse>;

    /// Deletes an object.
    async fn delete(&self, object: &ObjectId, precondition: Precondition)
    -> Result<StoreResponse>;

    /// Releases transport resources. Called once when a lock handle closes.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_query_values() {
        assert_eq!(Precondition::DoesNotExist.if_generation_match(), Some("0"));
        assert_eq!(
            Precondition::MatchesGeneration("17".into()).if_generation_match(),
            Some("17")
        );
        assert_eq!(Precondition::None.if_generation_match(), None);
    }

    #[test]
    fn object_resource_decodes_json_api_shape() {
        let body = br#"{
            "kind": "storage#object",
            "name": "locks/a",
            "bucket": "b",
            "generation": "1700000000000001",
            "metageneration": "1",
            "metadata": {"expires": "2020-01-01T00:00:00Z"}
        }"#;
        let response = StoreResponse::new(StatusCode::OK, &body[..]);
        let resource: ObjectResource = response.json().expect("decode");
        assert_eq!(resource.generation, "1700000000000001");
        assert_eq!(
            resource.metadata.get("expires").map(String::as_str),
            Some("2020-01-01T00:00:00Z")
        );
    }

    #[test]
    fn unexpected_response_keeps_status_and_body() {
        let response = StoreResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let err = response.into_error();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn object_id_display() {
        assert_eq!(ObjectId::new("b", "x/y").to_string(), "gs://b/x/y");
    }
}
