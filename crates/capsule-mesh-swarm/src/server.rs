//! Transfer Server: read-only HTTP view of the local Capsule Store.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use capsule_mesh_core::{Capsule, CapsuleStore, StoreError};

use crate::key::is_digest;
use crate::protocol::{
    ErrorResponse, HealthResponse, ListResponse, HEADER_DIGEST, HEADER_NAME, HEADER_PUBLISHER,
    HEADER_SIGNATURE,
};

#[derive(Clone)]
struct ServerState {
    store: Arc<CapsuleStore>,
    node_id: Arc<str>,
}

/// Routes: `GET /capsules`, `GET /capsules/:name`, `GET /digests/:digest`, `GET /health`.
pub fn router(store: Arc<CapsuleStore>, node_id: &str) -> Router {
    Router::new()
        .route("/capsules", get(list_capsules))
        .route("/capsules/:name", get(get_by_name))
        .route("/digests/:digest", get(get_by_digest))
        .route("/health", get(health))
        .with_state(ServerState {
            store,
            node_id: Arc::from(node_id),
        })
}

fn error(status: StatusCode, error: &str, key: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            key,
        }),
    )
        .into_response()
}

fn capsule_response(capsule: Capsule) -> Response {
    let manifest = capsule.manifest();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "application/octet-stream".to_string()),
            (HEADER_NAME, urlencoding::encode(&manifest.name).into_owned()),
            (HEADER_DIGEST, manifest.digest),
            (HEADER_SIGNATURE, manifest.signature),
            (HEADER_PUBLISHER, manifest.publisher_public_key),
        ],
        capsule.payload,
    )
        .into_response()
}

fn store_error_response(key: String, err: StoreError) -> Response {
    match err {
        StoreError::NotFound(_) => error(StatusCode::NOT_FOUND, "not_found", Some(key)),
        StoreError::InvalidName(_) => error(StatusCode::BAD_REQUEST, "bad_request", Some(key)),
        StoreError::CorruptEntry { .. } | StoreError::InvalidCapsule { .. } => {
            tracing::warn!(key = %key, err = %err, "Refusing to serve corrupt capsule");
            error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_entry", Some(key))
        }
        StoreError::Io { .. } => {
            tracing::warn!(key = %key, err = %err, "Store read failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "internal", Some(key))
        }
    }
}

/// Store access is blocking file I/O.
async fn with_store<T, F>(store: Arc<CapsuleStore>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&CapsuleStore) -> Result<T, StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&store)).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Io {
            path: Default::default(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        }),
    }
}

async fn list_capsules(State(state): State<ServerState>) -> Response {
    match with_store(state.store, |s| s.list()).await {
        Ok(names) => Json(ListResponse { names }).into_response(),
        Err(e) => store_error_response("*".to_string(), e),
    }
}

async fn get_by_name(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    tracing::debug!(name = %name, "GetCapsule");
    let lookup = name.clone();
    match with_store(state.store, move |s| s.read(&lookup)).await {
        Ok(capsule) => capsule_response(capsule),
        Err(e) => store_error_response(name, e),
    }
}

async fn get_by_digest(State(state): State<ServerState>, Path(digest): Path<String>) -> Response {
    let digest = digest.to_ascii_lowercase();
    if !is_digest(&digest) {
        return error(StatusCode::BAD_REQUEST, "bad_request", Some(digest));
    }
    tracing::debug!(digest = %digest, "GetCapsule by digest");
    let lookup = digest.clone();
    match with_store(state.store, move |s| s.find_by_digest(&lookup)).await {
        Ok(capsule) => capsule_response(capsule),
        Err(e) => store_error_response(format!("sha256:{digest}"), e),
    }
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node_id.to_string(),
    })
}
