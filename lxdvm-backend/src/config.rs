//! Backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the LXD daemon lives and how instances are laid out in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct LxdBackendConfig {
    /// Path to the LXD API Unix socket.
    pub socket_path: PathBuf,

    /// API version prefix, without slashes.
    pub api_version: String,

    /// LXD project every request is scoped to. `None` uses the default project.
    pub project: Option<String>,

    /// Bridge the default interface is attached to and whose leases are read.
    pub bridge_name: String,

    /// Storage pool holding root disks.
    pub storage_pool: String,

    /// Timeout for a single request/response exchange.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Snap common directory, used to detect a snap refresh in progress.
    pub snap_common_dir: Option<PathBuf>,
}

impl LxdBackendConfig {
    /// Create a config for the given socket with defaults for everything else.
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            api_version: "1.0".to_owned(),
            project: Some("multipass".to_owned()),
            bridge_name: "mpbr0".to_owned(),
            storage_pool: "default".to_owned(),
            request_timeout: Duration::from_secs(30),
            snap_common_dir: None,
        }
    }

    /// Create a config pointing at the snap-packaged LXD daemon.
    ///
    /// Picks up `SNAP_COMMON` for the refresh sentinel when running inside a snap.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut config = Self::new(PathBuf::from("/var/snap/lxd/common/lxd/unix.socket"));
        config.snap_common_dir = std::env::var_os("SNAP_COMMON").map(PathBuf::from);
        config
    }

    /// Start from [`Self::with_defaults`] and apply `LXD_SOCKET`,
    /// `LXD_PROJECT`, `LXD_BRIDGE` and `LXD_STORAGE_POOL` overrides.
    ///
    /// An empty `LXD_PROJECT` selects the default project.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::with_defaults();
        if let Some(socket) = std::env::var_os("LXD_SOCKET") {
            config.socket_path = PathBuf::from(socket);
        }
        if let Ok(project) = std::env::var("LXD_PROJECT") {
            config.project = (!project.is_empty()).then_some(project);
        }
        if let Ok(bridge) = std::env::var("LXD_BRIDGE") {
            config.bridge_name = bridge;
        }
        if let Ok(pool) = std::env::var("LXD_STORAGE_POOL") {
            config.storage_pool = pool;
        }
        config
    }

    /// Use a different project.
    #[must_use]
    pub fn project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    /// Use a different bridge.
    #[must_use]
    pub fn bridge_name(mut self, bridge_name: impl Into<String>) -> Self {
        self.bridge_name = bridge_name.into();
        self
    }

    /// Use a different snap common directory.
    #[must_use]
    pub fn snap_common_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snap_common_dir = dir;
        self
    }

    /// The path prefix all endpoints hang off, e.g. `/1.0`.
    #[must_use]
    pub fn base_path(&self) -> String {
        format!("/{}", self.api_version)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
