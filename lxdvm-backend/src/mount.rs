//! Native LXD mounts.
//!
//! A native mount is a `disk` device on the instance whose `source` is a
//! host directory. LXD only accepts new disk devices on a stopped VM, so the
//! handler checks the power state before touching the device list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use lxdvm_core::VmMount;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::backend::{MountHandler, VirtualMachine};
use crate::error::BackendError;
use crate::operation::wait_for_operation;
use crate::unix_client::LxdClient;
use crate::vm::LxdVirtualMachine;

/// Deadline for LXD to apply a device list change.
pub const MOUNT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// LXD caps device names at 27 characters; two go to the prefix.
const DEVICE_ID_LEN: usize = 25;
const DEVICE_PREFIX: &str = "d_";

/// Device name used for a mount at `target`.
///
/// Stable across runs, so re-mounting a target overwrites its old entry.
#[must_use]
pub fn device_name_for(target: &str) -> String {
    let digest = Sha256::digest(target.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{DEVICE_PREFIX}{}", &hex[..DEVICE_ID_LEN])
}

/// A host directory attached to an LXD instance as a disk device.
///
/// The device is added on construction. Await [`LxdMountHandler::unmount`]
/// to remove it; a handler dropped while still attached schedules the
/// removal on the current tokio runtime.
pub struct LxdMountHandler {
    vm_name: String,
    target: String,
    source: String,
    device_name: String,
    devices_path: String,
    client: LxdClient,
    device_lock: Arc<Mutex<()>>,
    active: Mutex<bool>,
}

impl std::fmt::Debug for LxdMountHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LxdMountHandler")
            .field("vm_name", &self.vm_name)
            .field("target", &self.target)
            .field("source", &self.source)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

impl LxdMountHandler {
    /// Attach `mount.source_path` at `target` inside `vm`.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidMountState`] when the mount asks for
    /// uid/gid translation (checked before any daemon call) or when the
    /// instance is not powered off. Propagates errors from the device update.
    pub async fn new(vm: &LxdVirtualMachine, target: &str, mount: &VmMount) -> Result<Self, BackendError> {
        if mount.has_id_mappings() {
            return Err(BackendError::InvalidMountState(
                "LXD native mount does not accept gid or uid".to_owned(),
            ));
        }

        let state = vm.current_state().await?;
        if !state.is_powered_off() {
            return Err(BackendError::InvalidMountState(format!(
                "please stop the instance {} before mounting it natively",
                vm.vm_name()
            )));
        }

        let handler = Self {
            vm_name: vm.vm_name().to_owned(),
            target: target.to_owned(),
            source: mount.source_path.clone(),
            device_name: device_name_for(target),
            devices_path: vm.endpoints().devices(),
            client: vm.client().clone(),
            device_lock: vm.device_lock(),
            active: Mutex::new(false),
        };

        tracing::info!(
            vm = %handler.vm_name,
            source = %handler.source,
            target = %handler.target,
            "initializing native mount"
        );
        handler.activate().await?;

        Ok(handler)
    }

    /// Name of the LXD device backing this mount.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Host directory being mounted.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Remove the device and dispose of the handler.
    ///
    /// # Errors
    /// Propagates errors from the device update.
    pub async fn unmount(self) -> Result<(), BackendError> {
        self.deactivate().await
    }
}

#[async_trait]
impl MountHandler for LxdMountHandler {
    fn target(&self) -> &str {
        &self.target
    }

    async fn is_active(&self) -> bool {
        *self.active.lock().await
    }

    async fn activate(&self) -> Result<(), BackendError> {
        let mut active = self.active.lock().await;
        let _devices = self.device_lock.lock().await;

        let device = json!({ "path": self.target, "source": self.source, "type": "disk" });
        let name = self.device_name.clone();
        let reply = submit_devices(&self.client, &self.devices_path, move |devices| {
            devices.insert(name, device);
        })
        .await?;

        // The daemon took the new list; if applying it fails the entry may
        // still be there, so take it out again before reporting.
        if let Err(e) = wait_for_operation(&self.client, &reply, MOUNT_OPERATION_TIMEOUT).await {
            tracing::warn!(vm = %self.vm_name, device = %self.device_name, error = %e, "native mount failed, removing device");
            let name = self.device_name.clone();
            let removed = rewrite_devices(&self.client, &self.devices_path, move |devices| {
                devices.remove(&name);
            })
            .await;
            if let Err(cleanup) = removed {
                tracing::warn!(vm = %self.vm_name, device = %self.device_name, error = %cleanup, "failed to remove native mount");
            }
            return Err(e);
        }

        *active = true;
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), BackendError> {
        let mut active = self.active.lock().await;
        if !*active {
            return Ok(());
        }
        let _devices = self.device_lock.lock().await;

        tracing::info!(vm = %self.vm_name, target = %self.target, "stopping native mount");
        let name = self.device_name.clone();
        rewrite_devices(&self.client, &self.devices_path, move |devices| {
            devices.remove(&name);
        })
        .await?;

        *active = false;
        Ok(())
    }
}

impl Drop for LxdMountHandler {
    fn drop(&mut self) {
        if !*self.active.get_mut() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                vm = %self.vm_name,
                device = %self.device_name,
                "no runtime to remove native mount, device left attached"
            );
            return;
        };

        let client = self.client.clone();
        let devices_path = self.devices_path.clone();
        let device_lock = Arc::clone(&self.device_lock);
        let name = self.device_name.clone();
        let vm_name = self.vm_name.clone();

        runtime.spawn(async move {
            let _devices = device_lock.lock().await;
            let removed = rewrite_devices(&client, &devices_path, |devices| {
                devices.remove(&name);
            })
            .await;
            match removed {
                Ok(()) => tracing::info!(vm = %vm_name, device = %name, "native mount removed"),
                Err(BackendError::NotFound(what)) => {
                    tracing::debug!(vm = %vm_name, %what, "LXD object not found");
                }
                Err(e) => tracing::warn!(vm = %vm_name, device = %name, error = %e, "failed to remove native mount"),
            }
        });
    }
}

/// Read-modify-write of an instance's device list.
///
/// There is no ETag check: a concurrent writer from another process can
/// still lose an update between the GET and the PUT.
async fn rewrite_devices(
    client: &LxdClient,
    devices_path: &str,
    edit: impl FnOnce(&mut Map<String, Value>),
) -> Result<(), BackendError> {
    let reply = submit_devices(client, devices_path, edit).await?;
    wait_for_operation(client, &reply, MOUNT_OPERATION_TIMEOUT).await
}

/// GET the instance, apply `edit` to its devices and PUT it back, returning
/// the daemon's reply without waiting on it.
async fn submit_devices(
    client: &LxdClient,
    devices_path: &str,
    edit: impl FnOnce(&mut Map<String, Value>),
) -> Result<Value, BackendError> {
    let info = client
        .request(Method::GET, devices_path, None)
        .await?
        .require(devices_path)?;

    let Some(Value::Object(metadata)) = info.get("metadata") else {
        return Err(BackendError::InvalidResponse(format!(
            "{devices_path}: instance metadata is not an object"
        )));
    };
    let mut metadata = metadata.clone();

    let devices = metadata
        .entry("devices")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(device_list) = devices else {
        return Err(BackendError::InvalidResponse(format!(
            "{devices_path}: device list is not an object"
        )));
    };
    edit(device_list);

    client
        .request(Method::PUT, devices_path, Some(&Value::Object(metadata)))
        .await?
        .require(devices_path)
}
