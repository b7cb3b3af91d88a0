//! LXD backend entry point.
//!
//! Owns the daemon connection shared by every instance and builds
//! [`LxdVirtualMachine`]s on it.

use std::sync::Arc;

use hyper::Method;
use lxdvm_core::VirtualMachineDescription;
use serde_json::Value;

use crate::backend::VmStatusMonitor;
use crate::unix_client::LxdClient;
use crate::vm::LxdVirtualMachine;
use crate::{BackendError, LxdBackendConfig};

/// LXD VM backend.
///
/// Cloning is cheap; all clones talk to the same daemon.
#[derive(Debug, Clone)]
pub struct LxdBackend {
    config: LxdBackendConfig,
    client: LxdClient,
}

impl LxdBackend {
    /// Create a backend for the given configuration.
    #[must_use]
    pub fn new(config: LxdBackendConfig) -> Self {
        let client = LxdClient::new(&config);
        Self { config, client }
    }

    /// Create a backend for the snap-packaged LXD with environment overrides.
    ///
    /// See [`LxdBackendConfig::from_env`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LxdBackendConfig::from_env())
    }

    /// Backend configuration.
    #[must_use]
    pub fn config(&self) -> &LxdBackendConfig {
        &self.config
    }

    /// Shared daemon connection.
    #[must_use]
    pub fn client(&self) -> &LxdClient {
        &self.client
    }

    /// Attach to (or create) the instance described by `desc`.
    ///
    /// # Errors
    /// See [`LxdVirtualMachine::new`].
    pub async fn create_virtual_machine(
        &self,
        desc: &VirtualMachineDescription,
        monitor: Arc<dyn VmStatusMonitor>,
    ) -> Result<LxdVirtualMachine, BackendError> {
        LxdVirtualMachine::new(desc, monitor, self.client.clone(), &self.config).await
    }

    /// Check that the daemon answers and the configured bridge exists.
    ///
    /// # Errors
    /// Returns [`BackendError::TransportUnavailable`] if the socket is dead,
    /// [`BackendError::NotFound`] if the bridge is missing, and
    /// [`BackendError::InvalidResponse`] if the daemon does not trust us.
    pub async fn health_check(&self) -> Result<(), BackendError> {
        let base = self.config.base_path();
        let server = self
            .client
            .request(Method::GET, &base, None)
            .await?
            .require(&base)?;

        let auth = server["metadata"]["auth"].as_str().unwrap_or_default();
        if auth != "trusted" {
            return Err(BackendError::InvalidResponse(format!(
                "LXD does not trust this client (auth: {auth:?})"
            )));
        }

        let network = format!("{base}/networks/{}", self.config.bridge_name);
        self.client
            .request(Method::GET, &network, None)
            .await?
            .require(&format!("network {}", self.config.bridge_name))
            .map(|_: Value| ())
    }
}
