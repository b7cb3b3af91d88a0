//! LXD virtual machine lifecycle.
//!
//! [`LxdVirtualMachine`] drives one LXD instance through the daemon's REST
//! API and keeps a local view of its status. Every read or write of that
//! status goes through a single lock, so a `stop` racing a `start` or a
//! status refresh always sees a consistent value.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use lxdvm_core::{MemorySize, VirtualMachineDescription, VmMount, VmStatus};
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};

use crate::backend::{MountHandler, VirtualMachine, VmStatusMonitor};
use crate::endpoints::VmEndpoints;
use crate::error::{BackendError, Lookup};
use crate::instance;
use crate::leases::{get_ip_for, wait_for_ip};
use crate::mount::LxdMountHandler;
use crate::operation::wait_for_operation;
use crate::status::status_for_code;
use crate::unix_client::LxdClient;
use crate::LxdBackendConfig;

/// How long [`VirtualMachine::ensure_vm_is_running`] callers usually allow
/// LXD to reboot an instance.
pub const DEFAULT_START_GRACE: Duration = Duration::from_secs(20);

const STATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const STATE_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);
const CREATE_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Name of the file the snap hooks drop while LXD is being refreshed.
const SNAP_REFRESH_SENTINEL: &str = "snap_refresh";

#[derive(Debug)]
struct StatusCell {
    status: VmStatus,
    management_ip: Option<Ipv4Addr>,
}

/// One virtual machine managed by the LXD daemon.
pub struct LxdVirtualMachine {
    name: String,
    username: String,
    mac_addr: String,
    storage_pool: String,
    snap_common_dir: Option<PathBuf>,
    endpoints: VmEndpoints,
    client: LxdClient,
    monitor: Arc<dyn VmStatusMonitor>,
    cell: Mutex<StatusCell>,
    /// Set by the start sequence once it has seen the instance go down, so a
    /// `stop` issued mid-boot can return.
    shutdown_ack: watch::Sender<bool>,
    /// Serializes device-list rewrites by mount handlers of this instance.
    device_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for LxdVirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LxdVirtualMachine")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl LxdVirtualMachine {
    /// Attach to the instance described by `desc`, creating it when LXD does
    /// not know it yet.
    ///
    /// Creation waits up to ten minutes for LXD to unpack the image.
    ///
    /// # Errors
    /// Returns [`BackendError::Core`] for an invalid description and
    /// propagates transport and operation errors from the create request.
    pub async fn new(
        desc: &VirtualMachineDescription,
        monitor: Arc<dyn VmStatusMonitor>,
        client: LxdClient,
        config: &LxdBackendConfig,
    ) -> Result<Self, BackendError> {
        desc.validate()?;

        let (shutdown_ack, _) = watch::channel(false);
        let vm = Self {
            name: desc.vm_name.clone(),
            username: desc.ssh_username.clone(),
            mac_addr: desc.default_mac_address.clone(),
            storage_pool: config.storage_pool.clone(),
            snap_common_dir: config.snap_common_dir.clone(),
            endpoints: VmEndpoints::new(config.base_path(), &desc.vm_name, &config.bridge_name),
            client,
            monitor,
            cell: Mutex::new(StatusCell {
                status: VmStatus::Off,
                management_ip: None,
            }),
            shutdown_ack,
            device_lock: Arc::new(Mutex::new(())),
        };

        {
            let mut cell = vm.cell.lock().await;
            if vm.query_status(&mut cell).await?.is_not_found() {
                tracing::debug!(vm = %vm.name, image = %desc.image_id, "creating instance");

                let body = instance::create_request(desc, &config.bridge_name, &config.storage_pool);
                let reply = vm
                    .client
                    .request(Method::POST, &vm.endpoints.collection(), Some(&body))
                    .await?
                    .require(&vm.endpoints.collection())?;

                wait_for_operation(&vm.client, &reply, CREATE_OPERATION_TIMEOUT).await?;

                let status = vm.query_status(&mut cell).await?.require(&vm.name)?;
                tracing::info!(vm = %vm.name, %status, "instance created");
            }
        }

        Ok(vm)
    }

    /// Status as last observed, without asking the daemon.
    pub async fn cached_status(&self) -> VmStatus {
        self.cell.lock().await.status
    }

    /// Advance a booting instance to running once the caller has confirmed
    /// the guest is up (e.g. SSH answered).
    ///
    /// Until then a `running` report from LXD leaves the status at
    /// `starting`.
    pub async fn confirm_running(&self) {
        let mut cell = self.cell.lock().await;
        cell.status = VmStatus::Running;
        self.monitor.persist_state_for(&self.name, cell.status);
    }

    /// Best-effort shutdown for when the orchestrator drops this instance.
    ///
    /// A running instance is stopped, unless the LXD snap is mid-refresh,
    /// and the final status is not persisted; any other status is persisted
    /// as is. Never fails: errors are logged and swallowed.
    pub async fn teardown(&self) {
        match self.teardown_inner().await {
            Ok(()) => {}
            Err(BackendError::NotFound(what)) => {
                tracing::debug!(vm = %self.name, %what, "LXD object not found");
            }
            Err(e) => {
                tracing::warn!(vm = %self.name, error = %e, "instance teardown failed");
            }
        }
    }

    async fn teardown_inner(&self) -> Result<(), BackendError> {
        let status = {
            let mut cell = self.cell.lock().await;
            self.query_status(&mut cell).await?.require(&self.name)?
        };

        if status != VmStatus::Running {
            self.monitor.persist_state_for(&self.name, status);
            return Ok(());
        }

        match self.snap_refresh_in_progress() {
            Ok(true) => {
                tracing::info!(vm = %self.name, "LXD snap refresh in progress, leaving instance running");
                Ok(())
            }
            Ok(false) => self.stop_with(false).await,
            Err(e) => {
                tracing::debug!(vm = %self.name, error = %e, "cannot check for snap refresh");
                self.stop_with(false).await
            }
        }
    }

    fn snap_refresh_in_progress(&self) -> Result<bool, BackendError> {
        let dir = self
            .snap_common_dir
            .as_ref()
            .ok_or_else(|| BackendError::SnapEnvironment("SNAP_COMMON is not set".to_owned()))?;
        Ok(dir.join(SNAP_REFRESH_SENTINEL).exists())
    }

    pub(crate) fn client(&self) -> &LxdClient {
        &self.client
    }

    pub(crate) fn endpoints(&self) -> &VmEndpoints {
        &self.endpoints
    }

    pub(crate) fn device_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.device_lock)
    }

    /// Read the live status and fold it into `cell`.
    ///
    /// An unreachable daemon or an unreadable reply downgrades the status to
    /// `unknown` instead of failing. A booting instance that LXD already
    /// reports as running keeps its local status.
    async fn query_status(&self, cell: &mut StatusCell) -> Result<Lookup<VmStatus>, BackendError> {
        let reply = match self.client.request(Method::GET, &self.endpoints.state(), None).await {
            Ok(Lookup::Found(reply)) => reply,
            Ok(Lookup::NotFound) => return Ok(Lookup::NotFound),
            Err(BackendError::TransportUnavailable(reason) | BackendError::InvalidResponse(reason)) => {
                tracing::warn!(vm = %self.name, %reason, "cannot read instance state");
                cell.status = VmStatus::Unknown;
                return Ok(Lookup::Found(cell.status));
            }
            Err(e) => return Err(e),
        };

        let live = self.status_from_reply(&reply);

        if matches!(cell.status, VmStatus::DelayedShutdown | VmStatus::Starting) && live == VmStatus::Running {
            return Ok(Lookup::Found(cell.status));
        }

        cell.status = live;
        Ok(Lookup::Found(live))
    }

    fn status_from_reply(&self, reply: &Value) -> VmStatus {
        let metadata = &reply["metadata"];
        let text = metadata["status"].as_str().unwrap_or_default();
        let code = metadata["status_code"].as_i64().unwrap_or(-1);
        tracing::trace!(vm = %self.name, status = %text, "got LXD instance state");

        status_for_code(code).unwrap_or_else(|| {
            tracing::error!(vm = %self.name, status = %text, code, "unexpected LXD state");
            VmStatus::Unknown
        })
    }

    /// PUT a state action and wait for LXD to carry it out.
    async fn request_state(&self, action: &str) -> Result<(), BackendError> {
        let body = json!({ "action": action });
        let reply = self
            .client
            .request_with_timeout(Method::PUT, &self.endpoints.state(), Some(&body), STATE_REQUEST_TIMEOUT)
            .await?
            .require(&self.name)?;

        wait_for_operation(&self.client, &reply, STATE_OPERATION_TIMEOUT).await
    }

    async fn stop_with(&self, persist: bool) -> Result<(), BackendError> {
        let mut cell = self.cell.lock().await;
        let present = self.query_status(&mut cell).await?.require(&self.name)?;

        match present {
            VmStatus::Stopped => {
                tracing::debug!(vm = %self.name, "ignoring stop request since instance is already stopped");
                return Ok(());
            }
            VmStatus::Suspended => {
                tracing::info!(vm = %self.name, "ignoring shutdown issued while suspended");
                return Ok(());
            }
            _ => {}
        }

        self.request_state("stop").await?;

        cell.status = VmStatus::Stopped;
        cell.management_ip = None;
        drop(cell);

        if present == VmStatus::Starting {
            tracing::debug!(vm = %self.name, "waiting for the start sequence to observe the shutdown");
            let mut ack = self.shutdown_ack.subscribe();
            while !*ack.borrow_and_update() {
                // The sender lives in `self`, so the channel cannot close here.
                if ack.changed().await.is_err() {
                    break;
                }
            }
        }

        tracing::info!(vm = %self.name, "instance stopped");

        if persist {
            let status = self.cell.lock().await.status;
            self.monitor.persist_state_for(&self.name, status);
        }
        Ok(())
    }

    async fn patch_instance(&self, patch: &Value) -> Result<(), BackendError> {
        self.client
            .request(Method::PATCH, &self.endpoints.instance(), Some(patch))
            .await?
            .require(&self.name)?;
        Ok(())
    }
}

#[async_trait]
impl VirtualMachine for LxdVirtualMachine {
    fn vm_name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), BackendError> {
        let mut cell = self.cell.lock().await;

        let action = if cell.status == VmStatus::Suspended {
            tracing::info!(vm = %self.name, "resuming from a suspended state");
            "unfreeze"
        } else {
            "start"
        };

        self.shutdown_ack.send_replace(false);
        self.request_state(action).await?;

        cell.status = VmStatus::Starting;
        self.monitor.persist_state_for(&self.name, cell.status);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackendError> {
        self.stop_with(true).await
    }

    async fn suspend(&self) -> Result<(), BackendError> {
        Err(BackendError::UnsupportedOperation("suspend"))
    }

    async fn current_state(&self) -> Result<VmStatus, BackendError> {
        let mut cell = self.cell.lock().await;
        self.query_status(&mut cell).await?.require(&self.name)
    }

    async fn ensure_vm_is_running(&self, timeout: Duration) -> Result<(), BackendError> {
        {
            let mut cell = self.cell.lock().await;
            if self.query_status(&mut cell).await?.require(&self.name)? != VmStatus::Stopped {
                return Ok(());
            }
        }

        // LXD may just be rebooting the instance.
        tokio::time::sleep(timeout).await;

        let mut cell = self.cell.lock().await;
        if self.query_status(&mut cell).await?.require(&self.name)? != VmStatus::Stopped {
            cell.status = VmStatus::Starting;
            return Ok(());
        }

        self.shutdown_ack.send_replace(true);
        Err(BackendError::StartFailed {
            name: self.name.clone(),
            reason: "Instance shutdown during start".to_owned(),
        })
    }

    fn ssh_port(&self) -> u16 {
        22
    }

    async fn ssh_hostname(&self, timeout: Duration) -> Result<String, BackendError> {
        let ip = wait_for_ip(
            &self.client,
            &self.name,
            &self.mac_addr,
            &self.endpoints.network_leases(),
            timeout,
        )
        .await?;
        Ok(ip.to_string())
    }

    fn ssh_username(&self) -> &str {
        &self.username
    }

    async fn management_ipv4(&self) -> Result<Option<Ipv4Addr>, BackendError> {
        let mut cell = self.cell.lock().await;
        if cell.management_ip.is_none() {
            cell.management_ip =
                get_ip_for(&self.client, &self.mac_addr, &self.endpoints.network_leases()).await?;
            if cell.management_ip.is_none() {
                tracing::trace!(vm = %self.name, "IP address not found");
            }
        }
        Ok(cell.management_ip)
    }

    fn ipv6(&self) -> Vec<String> {
        Vec::new()
    }

    async fn update_cpus(&self, num_cores: u32) -> Result<(), BackendError> {
        if num_cores == 0 {
            return Err(BackendError::InvariantViolation("core count must be positive".to_owned()));
        }
        let patch = json!({ "config": { "limits.cpu": num_cores.to_string() } });
        self.patch_instance(&patch).await
    }

    async fn resize_memory(&self, new_size: MemorySize) -> Result<(), BackendError> {
        if new_size.in_bytes() == 0 {
            return Err(BackendError::InvariantViolation("memory size must be positive".to_owned()));
        }
        let patch = json!({ "config": { "limits.memory": new_size.in_bytes().to_string() } });
        self.patch_instance(&patch).await
    }

    async fn resize_disk(&self, new_size: MemorySize) -> Result<(), BackendError> {
        if new_size.in_bytes() == 0 {
            return Err(BackendError::InvariantViolation("disk size must be positive".to_owned()));
        }
        let patch = json!({ "devices": { "root": instance::root_device(&self.storage_pool, new_size) } });
        self.patch_instance(&patch).await
    }

    async fn make_native_mount_handler(
        &self,
        target: &str,
        mount: &VmMount,
    ) -> Result<Box<dyn MountHandler>, BackendError> {
        let handler = LxdMountHandler::new(self, target, mount).await?;
        Ok(Box::new(handler))
    }
}
