//! Entry point for the `lxdvm-stub` fake LXD daemon.

use std::{path::PathBuf, sync::Arc};

use lxdvm_stub::{serve_unix, StubDaemon};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let socket = std::env::var("LXDVM_STUB_SOCKET")
        .map_or_else(|_| PathBuf::from("/tmp/lxdvm-stub.socket"), PathBuf::from);

    let daemon = Arc::new(StubDaemon::new());
    let server = match serve_unix(&socket, daemon) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(socket = %socket.display(), error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(socket = %socket.display(), "lxdvm-stub listening");

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server task failed");
        std::process::exit(1);
    }
}
