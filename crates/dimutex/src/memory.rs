//! In-memory object store for testing.
//!
//! Answers requests with the same status codes and JSON shapes as the GCS
//! JSON API: `200` with an object resource on success, `404` for missing
//! objects, `412` for failed generation preconditions and `204` for deletes.
//! Generations are numeric and strictly increasing across the whole store,
//! so a recreated object never reuses an old generation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde_json::json;

use crate::envelope::decode_upload;
use crate::error::Result;
use crate::transport::{
    ObjectId, ObjectResource, ObjectStoreTransport, Precondition, StoreResponse, Upload,
};

/// In-memory store. Thread-safe via `RwLock`; not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectId, StoredObject>,
    last_generation: i64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    generation: i64,
    metageneration: i64,
    metadata: HashMap<String, String>,
    content: Bytes,
}

impl StoredObject {
    fn resource(&self, object: &ObjectId) -> ObjectResource {
        ObjectResource {
            name: object.key.clone(),
            bucket: object.bucket.clone(),
            generation: self.generation.to_string(),
            metageneration: Some(self.metageneration.to_string()),
            metadata: self.metadata.clone(),
        }
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live generation of an object, if it exists.
    #[must_use]
    pub fn generation(&self, object: &ObjectId) -> Option<String> {
        self.read()
            .objects
            .get(object)
            .map(|o| o.generation.to_string())
    }

    /// Returns the stored content of an object, if it exists.
    #[must_use]
    pub fn content(&self, object: &ObjectId) -> Option<Bytes> {
        self.read().objects.get(object).map(|o| o.content.clone())
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().objects.len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn precondition_holds(current: Option<&StoredObject>, precondition: &Precondition) -> bool {
    match precondition {
        Precondition::None => true,
        Precondition::DoesNotExist => current.is_none(),
        Precondition::MatchesGeneration(expected) => {
            current.is_some_and(|obj| obj.generation.to_string() == *expected)
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> StoreResponse {
    let body = json!({
        "error": { "code": status.as_u16(), "message": message }
    });
    StoreResponse::new(status, body.to_string())
}

fn resource_response(status: StatusCode, resource: &ObjectResource) -> StoreResponse {
    match serde_json::to_vec(resource) {
        Ok(body) => StoreResponse::new(status, body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

#[async_trait]
impl ObjectStoreTransport for MemoryStore {
    async fn insert(
        &self,
        object: &ObjectId,
        upload: Upload,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        let (envelope, content) = match decode_upload(&upload) {
            Ok(decoded) => decoded,
            Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string())),
        };
        if envelope.name != object.key {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "metadata name does not match object",
            ));
        }

        let mut state = self.write();
        if !precondition_holds(state.objects.get(object), &precondition) {
            return Ok(error_response(
                StatusCode::PRECONDITION_FAILED,
                "conditionNotMet",
            ));
        }

        state.last_generation += 1;
        let stored = StoredObject {
            generation: state.last_generation,
            metageneration: 1,
            metadata: envelope.metadata,
            content,
        };
        let resource = stored.resource(object);
        state.objects.insert(object.clone(), stored);
        drop(state);

        Ok(resource_response(StatusCode::OK, &resource))
    }

    async fn get(&self, object: &ObjectId) -> Result<StoreResponse> {
        let state = self.read();
        Ok(match state.objects.get(object) {
            Some(stored) => resource_response(StatusCode::OK, &stored.resource(object)),
            None => error_response(StatusCode::NOT_FOUND, "No such object"),
        })
    }

    async fn patch_metadata(
        &self,
        object: &ObjectId,
        metadata: HashMap<String, String>,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        let mut state = self.write();
        let Some(stored) = state.objects.get_mut(object) else {
            return Ok(error_response(StatusCode::NOT_FOUND, "No such object"));
        };
        if !precondition_holds(Some(stored), &precondition) {
            return Ok(error_response(
                StatusCode::PRECONDITION_FAILED,
                "conditionNotMet",
            ));
        }

        stored.metadata.extend(metadata);
        stored.metageneration += 1;
        Ok(resource_response(StatusCode::OK, &stored.resource(object)))
    }

    async fn delete(
        &self,
        object: &ObjectId,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        let mut state = self.write();
        let current = state.objects.get(object);
        if current.is_none() {
            return Ok(error_response(StatusCode::NOT_FOUND, "No such object"));
        }
        if !precondition_holds(current, &precondition) {
            return Ok(error_response(
                StatusCode::PRECONDITION_FAILED,
                "conditionNotMet",
            ));
        }
        state.objects.remove(object);
        Ok(StoreResponse::new(StatusCode::NO_CONTENT, Bytes::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ObjectEnvelope, encode_upload};
    use chrono::Utc;

    fn upload(key: &str) -> Upload {
        encode_upload(&ObjectEnvelope::for_lock(key, Utc::now()), b"lock").expect("encode")
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = MemoryStore::new();
        let id = ObjectId::new("b", "k");

        let created = store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");
        assert_eq!(created.status, StatusCode::OK);
        let resource: ObjectResource = created.json().expect("json");
        assert_eq!(resource.generation, "1");

        let read = store.get(&id).await.expect("get");
        assert_eq!(read.status, StatusCode::OK);
        assert_eq!(store.content(&id).as_deref(), Some(&b"lock"[..]));
    }

    #[tokio::test]
    async fn does_not_exist_conflicts_on_existing_object() {
        let store = MemoryStore::new();
        let id = ObjectId::new("b", "k");
        store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");

        let second = store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");
        assert_eq!(second.status, StatusCode::PRECONDITION_FAILED);

        let forced = store
            .insert(&id, upload("k"), Precondition::None)
            .await
            .expect("insert");
        assert_eq!(forced.status, StatusCode::OK);
        assert_eq!(store.generation(&id).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn generations_never_repeat_after_delete() {
        let store = MemoryStore::new();
        let id = ObjectId::new("b", "k");
        store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");
        store.delete(&id, Precondition::None).await.expect("delete");
        store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");
        assert_eq!(store.generation(&id).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn conditional_delete_requires_matching_generation() {
        let store = MemoryStore::new();
        let id = ObjectId::new("b", "k");
        store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");

        let stale = store
            .delete(&id, Precondition::MatchesGeneration("7".into()))
            .await
            .expect("delete");
        assert_eq!(stale.status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(store.len(), 1);

        let fresh = store
            .delete(&id, Precondition::MatchesGeneration("1".into()))
            .await
            .expect("delete");
        assert_eq!(fresh.status, StatusCode::NO_CONTENT);
        assert!(store.is_empty());

        let missing = store.delete(&id, Precondition::None).await.expect("delete");
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_keeps_generation_and_bumps_metageneration() {
        let store = MemoryStore::new();
        let id = ObjectId::new("b", "k");
        store
            .insert(&id, upload("k"), Precondition::DoesNotExist)
            .await
            .expect("insert");

        let patched = store
            .patch_metadata(
                &id,
                HashMap::from([("expires".to_string(), "x".to_string())]),
                Precondition::MatchesGeneration("1".into()),
            )
            .await
            .expect("patch");
        assert_eq!(patched.status, StatusCode::OK);
        let resource: ObjectResource = patched.json().expect("json");
        assert_eq!(resource.generation, "1");
        assert_eq!(resource.metageneration.as_deref(), Some("2"));
        assert_eq!(resource.metadata["expires"], "x");
    }

    #[tokio::test]
    async fn malformed_upload_is_bad_request() {
        let store = MemoryStore::new();
        let id = ObjectId::new("b", "k");
        let bad = Upload {
            content_type: "text/plain".into(),
            body: Bytes::from_static(b"lock"),
        };
        let response = store
            .insert(&id, bad, Precondition::None)
            .await
            .expect("insert");
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
    }
}
