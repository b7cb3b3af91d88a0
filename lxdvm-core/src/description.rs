use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::memory::MemorySize;

/// An additional network interface attached to a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct NetworkInterface {
    /// Host network the interface is bridged to.
    pub id: String,
    /// Hardware address, e.g. `52:54:00:12:34:56`.
    pub mac_address: String,
}

impl NetworkInterface {
    /// Creates an interface bridged to `id` with the given MAC.
    pub fn new(id: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mac_address: mac_address.into(),
        }
    }
}

/// Rendered cloud-init documents handed to the guest.
///
/// Empty documents are omitted from the instance configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CloudInitDocuments {
    pub meta_data: String,
    pub vendor_data: String,
    pub user_data: String,
    pub network_config: String,
}

impl CloudInitDocuments {
    /// Creates a document set from already rendered YAML strings.
    pub fn new(
        meta_data: impl Into<String>,
        vendor_data: impl Into<String>,
        user_data: impl Into<String>,
        network_config: impl Into<String>,
    ) -> Self {
        Self {
            meta_data: meta_data.into(),
            vendor_data: vendor_data.into(),
            user_data: user_data.into(),
            network_config: network_config.into(),
        }
    }
}

/// Immutable description of a guest, supplied once when its backend is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VirtualMachineDescription {
    /// Instance name, unique per hypervisor project.
    pub vm_name: String,
    /// Number of virtual CPUs.
    pub num_cores: u32,
    /// Guest memory.
    pub mem_size: MemorySize,
    /// Root disk size.
    pub disk_space: MemorySize,
    /// Hardware address of the default interface.
    pub default_mac_address: String,
    /// Interfaces beyond the default one, in attachment order.
    pub extra_interfaces: Vec<NetworkInterface>,
    /// Cloud-init documents.
    pub cloud_init: CloudInitDocuments,
    /// User the orchestrator logs in as.
    pub ssh_username: String,
    /// Fingerprint of the image the root disk is created from.
    pub image_id: String,
}

impl VirtualMachineDescription {
    /// Creates a description with one core, 1 GiB of memory, a 5 GiB disk and
    /// no extra interfaces.
    pub fn new(
        vm_name: impl Into<String>,
        default_mac_address: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        Self {
            vm_name: vm_name.into(),
            num_cores: 1,
            mem_size: MemorySize::from_gib(1),
            disk_space: MemorySize::from_gib(5),
            default_mac_address: default_mac_address.into(),
            extra_interfaces: Vec::new(),
            cloud_init: CloudInitDocuments::default(),
            ssh_username: "ubuntu".to_owned(),
            image_id: image_id.into(),
        }
    }

    /// Sets the CPU, memory and disk allocation.
    #[must_use]
    pub fn with_resources(mut self, num_cores: u32, mem_size: MemorySize, disk_space: MemorySize) -> Self {
        self.num_cores = num_cores;
        self.mem_size = mem_size;
        self.disk_space = disk_space;
        self
    }

    /// Appends an extra interface.
    #[must_use]
    pub fn with_interface(mut self, interface: NetworkInterface) -> Self {
        self.extra_interfaces.push(interface);
        self
    }

    /// Sets the cloud-init documents.
    #[must_use]
    pub fn with_cloud_init(mut self, cloud_init: CloudInitDocuments) -> Self {
        self.cloud_init = cloud_init;
        self
    }

    /// Sets the login user.
    #[must_use]
    pub fn with_ssh_username(mut self, ssh_username: impl Into<String>) -> Self {
        self.ssh_username = ssh_username.into();
        self
    }

    /// Checks the fields a hypervisor would reject.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidDescription`] naming the first bad field.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |field: &str, reason: &str| CoreError::InvalidDescription {
            field: field.to_owned(),
            reason: reason.to_owned(),
        };

        if self.vm_name.is_empty() {
            return Err(invalid("vm_name", "must not be empty"));
        }
        if self.num_cores == 0 {
            return Err(invalid("num_cores", "must be at least 1"));
        }
        if self.mem_size.in_bytes() == 0 {
            return Err(invalid("mem_size", "must be non-zero"));
        }
        if self.disk_space.in_bytes() == 0 {
            return Err(invalid("disk_space", "must be non-zero"));
        }
        if self.default_mac_address.is_empty() {
            return Err(invalid("default_mac_address", "must not be empty"));
        }
        Ok(())
    }
}
