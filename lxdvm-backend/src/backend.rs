//! Backend abstraction traits.
//!
//! The orchestrator talks to every hypervisor through [`VirtualMachine`]
//! and [`MountHandler`]; the LXD driver is one implementation.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use lxdvm_core::{MemorySize, VmMount, VmStatus};

use crate::BackendError;

/// Sink for status transitions, owned by the orchestrator.
pub trait VmStatusMonitor: Send + Sync {
    /// Record that `name` is now in `status`.
    fn persist_state_for(&self, name: &str, status: VmStatus);
}

/// Lifecycle contract every VM backend fulfils.
///
/// Implementations must be `Send + Sync`; one VM may be driven from several
/// tasks at once (a lifecycle command and a status refresher, say).
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Instance name.
    fn vm_name(&self) -> &str;

    /// Power the instance on, or resume it when suspended.
    ///
    /// Returns as soon as the hypervisor accepted the request.
    ///
    /// # Errors
    /// Propagates transport and operation errors.
    async fn start(&self) -> Result<(), BackendError>;

    /// Power the instance off.
    ///
    /// # Errors
    /// Propagates transport and operation errors.
    async fn stop(&self) -> Result<(), BackendError>;

    /// Same as [`Self::stop`].
    ///
    /// # Errors
    /// See [`Self::stop`].
    async fn shutdown(&self) -> Result<(), BackendError> {
        self.stop().await
    }

    /// Freeze the instance.
    ///
    /// # Errors
    /// Backends without suspend support return
    /// [`BackendError::UnsupportedOperation`].
    async fn suspend(&self) -> Result<(), BackendError>;

    /// Ask the hypervisor for the live status.
    ///
    /// An unreachable hypervisor yields [`VmStatus::Unknown`], not an error.
    ///
    /// # Errors
    /// Returns [`BackendError::NotFound`] when the instance no longer exists.
    async fn current_state(&self) -> Result<VmStatus, BackendError>;

    /// Fail if the instance stopped during boot, allowing `timeout` for a
    /// hypervisor-side reboot to settle.
    ///
    /// # Errors
    /// Returns [`BackendError::StartFailed`] when the instance stays stopped.
    async fn ensure_vm_is_running(&self, timeout: Duration) -> Result<(), BackendError>;

    /// SSH port inside the guest.
    fn ssh_port(&self) -> u16;

    /// Address to SSH to, waiting up to `timeout` for one to be assigned.
    ///
    /// # Errors
    /// Returns [`BackendError::IpAddressTimeout`] when none shows up.
    async fn ssh_hostname(&self, timeout: Duration) -> Result<String, BackendError>;

    /// User to SSH as.
    fn ssh_username(&self) -> &str;

    /// Management IPv4 address, or `None` when not leased yet.
    ///
    /// # Errors
    /// Propagates transport errors.
    async fn management_ipv4(&self) -> Result<Option<Ipv4Addr>, BackendError>;

    /// IPv6 addresses of the guest.
    fn ipv6(&self) -> Vec<String>;

    /// Change the number of virtual CPUs.
    ///
    /// # Errors
    /// Returns [`BackendError::InvariantViolation`] for zero cores.
    async fn update_cpus(&self, num_cores: u32) -> Result<(), BackendError>;

    /// Change the memory allocation.
    ///
    /// # Errors
    /// Returns [`BackendError::InvariantViolation`] for a zero size.
    async fn resize_memory(&self, new_size: MemorySize) -> Result<(), BackendError>;

    /// Grow the root disk.
    ///
    /// # Errors
    /// Returns [`BackendError::InvariantViolation`] for a zero size.
    async fn resize_disk(&self, new_size: MemorySize) -> Result<(), BackendError>;

    /// Expose a host directory at `target` using the hypervisor's own
    /// passthrough, instead of an SSH-based mount.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidMountState`] when the mount cannot be
    /// attached in the current state.
    async fn make_native_mount_handler(
        &self,
        target: &str,
        mount: &VmMount,
    ) -> Result<Box<dyn MountHandler>, BackendError>;
}

/// A host directory attached to a guest.
#[async_trait]
pub trait MountHandler: Send + Sync + std::fmt::Debug {
    /// Path inside the guest.
    fn target(&self) -> &str;

    /// Whether the mount is currently attached.
    async fn is_active(&self) -> bool;

    /// Attach the mount. Attaching an active mount rewrites the same entry.
    ///
    /// # Errors
    /// Propagates transport and operation errors.
    async fn activate(&self) -> Result<(), BackendError>;

    /// Detach the mount. Detaching an inactive mount does nothing.
    ///
    /// # Errors
    /// Propagates transport and operation errors.
    async fn deactivate(&self) -> Result<(), BackendError>;
}
