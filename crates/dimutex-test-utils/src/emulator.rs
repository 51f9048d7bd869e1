//! In-process GCS JSON API emulator.
//!
//! Serves the subset of the JSON API the lock uses (multipart insert, get,
//! metadata patch, delete, all with `ifGenerationMatch`) on `127.0.0.1:0`,
//! backed by a [`MemoryStore`]. Every request is recorded so tests can
//! assert on headers and query strings, and failures or latency can be
//! injected to exercise transport error paths.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use dimutex::envelope::decode_upload;
use dimutex::{MemoryStore, ObjectId, ObjectStoreTransport, Precondition, StoreResponse, Upload};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::debug;

/// A request received by the emulator.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Raw (still percent-encoded) request path.
    pub path: String,
    /// Raw query string.
    pub query: Option<String>,
    /// `Authorization` header, if sent.
    pub authorization: Option<String>,
}

#[derive(Clone, Default)]
struct EmulatorState {
    store: MemoryStore,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    failures: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl EmulatorState {
    async fn admit(&self, method: Method, uri: &Uri, headers: &HeaderMap) -> Option<Response> {
        debug!(method = %method, uri = %uri, "emulator request");
        self.requests
            .lock()
            .expect("lock")
            .push(RecordedRequest {
                method,
                path: uri.path().to_string(),
                query: uri.query().map(str::to_string),
                authorization: headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            });

        let latency = *self.latency.lock().expect("lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.failures.lock().expect("lock").pop_front();
        failure.map(|(status, body)| (status, body).into_response())
    }
}

#[derive(Debug, Deserialize)]
struct PatchBody {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Running emulator. The server stops when this value is dropped.
pub struct GcsEmulator {
    state: EmulatorState,
    base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for GcsEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsEmulator")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GcsEmulator {
    /// Starts an emulator on an ephemeral local port.
    pub async fn start() -> Self {
        let state = EmulatorState::default();

        let app = Router::new()
            .route("/upload/storage/v1/b/:bucket/o", post(insert_object))
            .route(
                "/storage/v1/b/:bucket/o/:object",
                get(get_object).patch(patch_object).delete(delete_object),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind emulator listener");
        let addr: SocketAddr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
            shutdown_tx: Some(shutdown_tx),
            _task: task,
        }
    }

    /// Returns the base URL (e.g. `http://127.0.0.1:40123`).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.state.store
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("lock").clone()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.state.requests.lock().expect("lock").clear();
    }

    /// Answers the next request with `status` and `body` instead of serving it.
    pub fn fail_next(&self, status: StatusCode, body: impl Into<String>) {
        self.state
            .failures
            .lock()
            .expect("lock")
            .push_back((status, body.into()));
    }

    /// Delays every subsequent response by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.state.latency.lock().expect("lock") = latency;
    }
}

impl Drop for GcsEmulator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn precondition(params: &HashMap<String, String>) -> Precondition {
    match params.get("ifGenerationMatch").map(String::as_str) {
        Some("0") => Precondition::DoesNotExist,
        Some(generation) => Precondition::MatchesGeneration(generation.to_string()),
        None => Precondition::None,
    }
}

fn respond(result: dimutex::Result<StoreResponse>) -> Response {
    match result {
        Ok(response) => (
            response.status,
            [(CONTENT_TYPE, "application/json")],
            response.body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn insert_object(
    State(state): State<EmulatorState>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(failure) = state.admit(Method::POST, &uri, &headers).await {
        return failure;
    }
    if params.get("uploadType").map(String::as_str) != Some("multipart") {
        return (StatusCode::BAD_REQUEST, "uploadType must be multipart").into_response();
    }

    let upload = Upload {
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body,
    };
    let name = match decode_upload(&upload) {
        Ok((envelope, _)) => envelope.name,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let object = ObjectId::new(bucket, name);
    respond(
        state
            .store
            .insert(&object, upload, precondition(&params))
            .await,
    )
}

async fn get_object(
    State(state): State<EmulatorState>,
    Path((bucket, key)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = state.admit(Method::GET, &uri, &headers).await {
        return failure;
    }
    respond(state.store.get(&ObjectId::new(bucket, key)).await)
}

async fn patch_object(
    State(state): State<EmulatorState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(failure) = state.admit(Method::PATCH, &uri, &headers).await {
        return failure;
    }
    let patch: PatchBody = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    respond(
        state
            .store
            .patch_metadata(&ObjectId::new(bucket, key), patch.metadata, precondition(&params))
            .await,
    )
}

async fn delete_object(
    State(state): State<EmulatorState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = state.admit(Method::DELETE, &uri, &headers).await {
        return failure;
    }
    respond(
        state
            .store
            .delete(&ObjectId::new(bucket, key), precondition(&params))
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_object_is_404() {
        let emulator = GcsEmulator::start().await;
        let url = format!("{}/storage/v1/b/bucket/o/locks%2Fmissing", emulator.base_url());

        let response = reqwest::get(&url).await.expect("request");
        assert_eq!(response.status().as_u16(), 404);

        let requests = emulator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/storage/v1/b/bucket/o/locks%2Fmissing");
        assert_eq!(requests[0].authorization, None);
    }

    #[tokio::test]
    async fn injected_failure_is_served_once() {
        let emulator = GcsEmulator::start().await;
        emulator.fail_next(StatusCode::SERVICE_UNAVAILABLE, "try later");
        let url = format!("{}/storage/v1/b/bucket/o/k", emulator.base_url());

        let first = reqwest::get(&url).await.expect("request");
        assert_eq!(first.status().as_u16(), 503);
        assert_eq!(first.text().await.expect("body"), "try later");

        let second = reqwest::get(&url).await.expect("request");
        assert_eq!(second.status().as_u16(), 404);
    }
}
