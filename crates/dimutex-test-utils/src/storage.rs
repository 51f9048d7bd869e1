//! Recording transport wrapper for lock protocol tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dimutex::{ObjectId, ObjectStoreTransport, Precondition, Result, StoreResponse, Upload};
use futures::future::BoxFuture;

/// Kind of transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Multipart insert.
    Insert,
    /// Metadata read.
    Get,
    /// Metadata patch.
    PatchMetadata,
    /// Delete.
    Delete,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    /// Operation kind.
    pub kind: OpKind,
    /// Target object key.
    pub key: String,
    /// Precondition the call carried.
    pub precondition: Precondition,
    /// Response status, or `None` if the call failed without a response.
    pub status: Option<u16>,
}

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Transport wrapper that records every call and can run a hook before the
/// next call of a given kind.
///
/// Hooks let a test interleave a competing holder between two steps of the
/// protocol, e.g. between the read and the conditional delete of a reclaim.
pub struct RecordingStore<S: ObjectStoreTransport + ?Sized> {
    inner: Arc<S>,
    operations: Mutex<Vec<StoreOp>>,
    hooks: Mutex<Vec<(OpKind, Hook)>>,
}

impl<S: ObjectStoreTransport + ?Sized> std::fmt::Debug for RecordingStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStore")
            .field("operations", &self.operations())
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStoreTransport + ?Sized> RecordingStore<S> {
    /// Wraps `inner`.
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            operations: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the recorded calls in order.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the recorded call kinds in order.
    pub fn kinds(&self) -> Vec<OpKind> {
        self.operations().into_iter().map(|op| op.kind).collect()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Runs `hook` once, just before the next call of `kind` reaches the
    /// wrapped transport.
    pub fn before_next<F>(&self, kind: OpKind, hook: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.hooks.lock().expect("lock").push((kind, Box::new(hook)));
    }

    async fn run_hook(&self, kind: OpKind) {
        let hook = {
            let mut hooks = self.hooks.lock().expect("lock");
            hooks
                .iter()
                .position(|(k, _)| *k == kind)
                .map(|index| hooks.remove(index).1)
        };
        if let Some(hook) = hook {
            hook().await;
        }
    }

    fn record(
        &self,
        kind: OpKind,
        object: &ObjectId,
        precondition: Precondition,
        result: &Result<StoreResponse>,
    ) {
        self.operations.lock().expect("lock").push(StoreOp {
            kind,
            key: object.key.clone(),
            precondition,
            status: result.as_ref().ok().map(|r| r.status.as_u16()),
        });
    }
}

#[async_trait]
impl<S: ObjectStoreTransport + ?Sized> ObjectStoreTransport for RecordingStore<S> {
    async fn insert(
        &self,
        object: &ObjectId,
        upload: Upload,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        self.run_hook(OpKind::Insert).await;
        let result = self
            .inner
            .insert(object, upload, precondition.clone())
            .await;
        self.record(OpKind::Insert, object, precondition, &result);
        result
    }

    async fn get(&self, object: &ObjectId) -> Result<StoreResponse> {
        self.run_hook(OpKind::Get).await;
        let result = self.inner.get(object).await;
        self.record(OpKind::Get, object, Precondition::None, &result);
        result
    }

    async fn patch_metadata(
        &self,
        object: &ObjectId,
        metadata: HashMap<String, String>,
        precondition: Precondition,
    ) -> Result<StoreResponse> {
        self.run_hook(OpKind::PatchMetadata).await;
        let result = self
            .inner
            .patch_metadata(object, metadata, precondition.clone())
            .await;
        self.record(OpKind::PatchMetadata, object, precondition, &result);
        result
    }

    async fn delete(&self, object: &ObjectId, precondition: Precondition) -> Result<StoreResponse> {
        self.run_hook(OpKind::Delete).await;
        let result = self.inner.delete(object, precondition.clone()).await;
        self.record(OpKind::Delete, object, precondition, &result);
        result
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimutex::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn records_calls_and_runs_hook_once() {
        let store = RecordingStore::new(Arc::new(MemoryStore::new()));
        let object = ObjectId::new("bucket", "k");
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        store.before_next(OpKind::Get, move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        store.get(&object).await.expect("get");
        store.get(&object).await.expect("get");
        store
            .delete(&object, Precondition::MatchesGeneration("3".into()))
            .await
            .expect("delete");

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(store.kinds(), vec![OpKind::Get, OpKind::Get, OpKind::Delete]);

        let ops = store.operations();
        assert_eq!(ops[0].status, Some(404));
        assert_eq!(
            ops[2].precondition,
            Precondition::MatchesGeneration("3".into())
        );
    }
}
