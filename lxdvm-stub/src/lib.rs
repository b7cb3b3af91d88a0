//! A fake LXD daemon serving the REST subset the VM backend speaks.
//!
//! State lives in [`daemon::StubDaemon`]; [`routes::create_router`] exposes
//! it over HTTP and [`serve_unix`] binds the router to a Unix socket the
//! way the real daemon listens.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod daemon;
pub mod error;
pub mod routes;

use std::{path::Path, sync::Arc};

use tokio::{net::UnixListener, task::JoinHandle};

pub use daemon::{OperationOutcome, OperationPlan, RecordedRequest, StubDaemon};

/// Serve `daemon` on a Unix socket at `path`.
///
/// A stale socket file at `path` is replaced. The returned task runs until
/// aborted.
///
/// # Errors
/// Returns the bind error when the socket cannot be created.
pub fn serve_unix(path: &Path, daemon: Arc<StubDaemon>) -> std::io::Result<JoinHandle<()>> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    let app = routes::create_router(daemon);
    let socket = path.display().to_string();

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(socket = %socket, error = %e, "stub daemon stopped");
        }
    }))
}
