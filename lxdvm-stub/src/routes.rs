//! Axum route handlers for the stub LXD REST API.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{daemon::StubDaemon, error::StubError};

type Daemon = Arc<StubDaemon>;

/// Largest request body the stub buffers for its request log.
const BODY_LIMIT: usize = 1024 * 1024;

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router around `daemon`.
pub fn create_router(daemon: Daemon) -> Router {
    Router::new()
        .route("/1.0", get(server_info))
        .route("/1.0/virtual-machines", post(create_instance))
        .route(
            "/1.0/virtual-machines/{name}",
            get(get_instance).patch(patch_instance),
        )
        .route(
            "/1.0/virtual-machines/{name}/state",
            get(get_state).put(put_state),
        )
        .route("/1.0/instances/{name}", get(get_instance).put(put_instance))
        .route("/1.0/networks/{bridge}", get(get_network))
        .route("/1.0/networks/{bridge}/leases", get(get_leases))
        .route("/1.0/operations/{id}", get(get_operation))
        .fallback(unknown_endpoint)
        .with_state(Arc::clone(&daemon))
        .layer(middleware::from_fn_with_state(daemon, record_request))
        .layer(TraceLayer::new_for_http())
}

/// Append every request to the daemon's log before routing it.
async fn record_request(
    State(daemon): State<Daemon>,
    request: Request,
    next: Next,
) -> Result<Response, StubError> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|e| StubError::InvalidRequest(format!("unreadable body: {e}")))?;
    let json = serde_json::from_slice(&bytes).ok();

    daemon.record(parts.method.as_str(), parts.uri.path(), parts.uri.query(), json);
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

fn sync_reply(metadata: Value) -> Response {
    let body = json!({
        "type": "sync",
        "status": "Success",
        "status_code": 200,
        "operation": "",
        "error_code": 0,
        "error": "",
        "metadata": metadata,
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn async_reply(operation: Value) -> Response {
    let id = operation["id"].as_str().unwrap_or_default().to_owned();
    let body = json!({
        "type": "async",
        "status": "Operation created",
        "status_code": 100,
        "operation": format!("/1.0/operations/{id}"),
        "error_code": 0,
        "error": "",
        "metadata": operation,
    });
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /1.0`: server environment; the stub always trusts its client.
pub async fn server_info() -> Response {
    sync_reply(json!({
        "api_version": "1.0",
        "auth": "trusted",
        "environment": { "server": "lxdvm-stub", "server_name": "stub" },
    }))
}

/// `POST /1.0/virtual-machines`: create an instance from an image.
///
/// # Errors
/// Returns [`StubError::InvalidRequest`] without a name and
/// [`StubError::Conflict`] when the name is taken.
pub async fn create_instance(
    State(daemon): State<Daemon>,
    Json(body): Json<Value>,
) -> Result<Response, StubError> {
    let op = daemon.create_instance(&body)?;
    tracing::debug!(name = %body["name"], "stub instance created");
    Ok(async_reply(op))
}

/// `GET /1.0/virtual-machines/{name}` and `GET /1.0/instances/{name}`
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown instance.
pub async fn get_instance(
    State(daemon): State<Daemon>,
    Path(name): Path<String>,
) -> Result<Response, StubError> {
    Ok(sync_reply(daemon.instance_metadata(&name)?))
}

/// `PATCH /1.0/virtual-machines/{name}`: merge config keys and devices.
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown instance.
pub async fn patch_instance(
    State(daemon): State<Daemon>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, StubError> {
    daemon.patch_instance(&name, &body)?;
    Ok(sync_reply(Value::Null))
}

/// `PUT /1.0/instances/{name}`: replace config and devices.
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown instance.
pub async fn put_instance(
    State(daemon): State<Daemon>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, StubError> {
    Ok(async_reply(daemon.replace_instance(&name, &body)?))
}

/// `GET /1.0/virtual-machines/{name}/state`
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown instance.
pub async fn get_state(
    State(daemon): State<Daemon>,
    Path(name): Path<String>,
) -> Result<Response, StubError> {
    Ok(sync_reply(daemon.instance_state(&name)?))
}

/// `PUT /1.0/virtual-machines/{name}/state`: start, stop, freeze or unfreeze.
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown instance and
/// [`StubError::InvalidRequest`] for an unknown action.
pub async fn put_state(
    State(daemon): State<Daemon>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, StubError> {
    Ok(async_reply(daemon.apply_action(&name, &body)?))
}

/// `GET /1.0/networks/{bridge}`
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown network.
pub async fn get_network(
    State(daemon): State<Daemon>,
    Path(bridge): Path<String>,
) -> Result<Response, StubError> {
    if !daemon.has_network(&bridge) {
        return Err(StubError::NotFound(format!("Network {bridge}")));
    }
    Ok(sync_reply(json!({ "name": bridge, "type": "bridge", "managed": true })))
}

/// `GET /1.0/networks/{bridge}/leases`
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown network.
pub async fn get_leases(
    State(daemon): State<Daemon>,
    Path(bridge): Path<String>,
) -> Result<Response, StubError> {
    let leases = daemon.network_leases(&bridge)?;
    Ok(sync_reply(json!(leases)))
}

/// `GET /1.0/operations/{id}`
///
/// # Errors
/// Returns [`StubError::NotFound`] for an unknown or vanished operation.
pub async fn get_operation(
    State(daemon): State<Daemon>,
    Path(id): Path<String>,
) -> Result<Response, StubError> {
    Ok(sync_reply(daemon.poll_operation(&id)?))
}

async fn unknown_endpoint() -> StubError {
    StubError::NotFound("endpoint".to_owned())
}
