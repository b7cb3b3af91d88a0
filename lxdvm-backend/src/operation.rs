//! Polling of LXD background operations.
//!
//! Mutating LXD calls answer with an `async` envelope naming an operation.
//! The caller owns the outcome, so [`wait_for_operation`] re-reads the
//! operation until it settles or the caller's deadline passes.

use std::time::Duration;

use hyper::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{BackendError, Lookup};
use crate::unix_client::LxdClient;

/// Delay between two reads of an operation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// LXD status codes for operations.
const OPERATION_SUCCESS: i64 = 200;
const OPERATION_FAILURE: i64 = 400;
const OPERATION_CANCELLED: i64 = 401;

/// An in-flight daemon task, alive for one polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Operation id assigned by the daemon.
    pub id: String,
    /// Endpoint the operation's status is read from.
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct AsyncEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    metadata: Option<OperationMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationMetadata {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    err: String,
}

impl PendingOperation {
    /// Extract the operation from a reply, or `None` for synchronous replies.
    #[must_use]
    pub fn from_reply(reply: &Value) -> Option<Self> {
        let envelope = AsyncEnvelope::deserialize(reply).ok()?;
        if envelope.kind != "async" {
            return None;
        }

        let metadata_id = envelope
            .metadata
            .map(|m| m.id)
            .filter(|id| !id.is_empty());

        let operation_path = envelope.operation.filter(|p| !p.is_empty());

        match (operation_path, metadata_id) {
            (Some(path), id) => {
                let id = id.unwrap_or_else(|| {
                    let trimmed = path.split('?').next().unwrap_or(&path);
                    trimmed.rsplit('/').next().unwrap_or(trimmed).to_owned()
                });
                Some(Self { id, path })
            }
            (None, Some(id)) => Some(Self {
                path: format!("/1.0/operations/{id}"),
                id,
            }),
            (None, None) => None,
        }
    }
}

/// Where a single read left the operation.
enum Progress {
    Done,
    Running(String),
}

/// Wait for the operation in `reply` to finish.
///
/// Synchronous replies return immediately. An operation the daemon no longer
/// knows about is taken as finished: LXD reaps completed operations, so a
/// late poll can miss the final state.
///
/// # Errors
/// Returns [`BackendError::OperationFailed`] with the daemon's message when
/// the operation fails or is cancelled, [`BackendError::OperationTimeout`]
/// when `timeout` elapses first, and propagates transport errors.
pub async fn wait_for_operation(
    client: &LxdClient,
    reply: &Value,
    timeout: Duration,
) -> Result<(), BackendError> {
    let Some(operation) = PendingOperation::from_reply(reply) else {
        return Ok(());
    };

    let deadline = Instant::now() + timeout;
    tracing::debug!(operation = %operation.id, timeout_ms = timeout.as_millis(), "waiting for LXD operation");

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let request_timeout = client.request_timeout().min(remaining.max(POLL_INTERVAL));

        match poll_once(client, &operation, request_timeout).await {
            Ok(Progress::Done) => return Ok(()),
            Ok(Progress::Running(status)) => {
                tracing::trace!(operation = %operation.id, %status, "LXD operation still running");
            }
            // A poll cut short by the deadline is the deadline passing.
            Err(BackendError::TransportUnavailable(reason)) if Instant::now() >= deadline => {
                tracing::debug!(operation = %operation.id, %reason, "LXD operation poll hit the deadline");
                return Err(BackendError::OperationTimeout {
                    operation: operation.id,
                    timeout,
                });
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BackendError::OperationTimeout {
                operation: operation.id,
                timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

async fn poll_once(
    client: &LxdClient,
    operation: &PendingOperation,
    request_timeout: Duration,
) -> Result<Progress, BackendError> {
    let reply = client
        .request_with_timeout(Method::GET, &operation.path, None, request_timeout)
        .await?;

    let Lookup::Found(reply) = reply else {
        tracing::debug!(operation = %operation.id, "LXD operation vanished, treating as finished");
        return Ok(Progress::Done);
    };

    let metadata = reply
        .get("metadata")
        .filter(|m| !m.is_null())
        .map(OperationMetadata::deserialize)
        .transpose()
        .map_err(|e| BackendError::InvalidResponse(format!("operation {}: {e}", operation.id)))?
        .unwrap_or_default();

    match metadata.status_code {
        OPERATION_SUCCESS => Ok(Progress::Done),
        OPERATION_FAILURE | OPERATION_CANCELLED => Err(BackendError::OperationFailed {
            operation: operation.id.clone(),
            message: if metadata.err.is_empty() {
                metadata.status
            } else {
                metadata.err
            },
        }),
        _ => Ok(Progress::Running(metadata.status)),
    }
}
