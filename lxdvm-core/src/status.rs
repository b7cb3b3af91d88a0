use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a single virtual machine as seen by its backend.
///
/// Exactly one value is current per VM instance. Only the backend's state
/// machine moves a VM between statuses; everyone else observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Defined but never powered on.
    Off,
    /// A start was requested and the guest has not been seen running yet.
    Starting,
    /// The hypervisor reports the guest as running.
    Running,
    /// A shutdown has been scheduled for later.
    DelayedShutdown,
    /// The hypervisor is freezing the guest.
    Suspending,
    /// The guest is frozen.
    Suspended,
    /// A shutdown is in progress.
    Stopping,
    /// The guest is powered off.
    Stopped,
    /// The hypervisor is unreachable or reported an error state.
    Unknown,
    /// The hypervisor no longer has a record of the guest.
    Deleted,
}

impl VmStatus {
    /// Returns `true` when the guest is powered off and its definition may
    /// be edited offline.
    #[must_use]
    pub fn is_powered_off(self) -> bool {
        matches!(self, VmStatus::Off | VmStatus::Stopped)
    }

    /// Returns the status name as a static string.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            VmStatus::Off => "off",
            VmStatus::Starting => "starting",
            VmStatus::Running => "running",
            VmStatus::DelayedShutdown => "delayed_shutdown",
            VmStatus::Suspending => "suspending",
            VmStatus::Suspended => "suspended",
            VmStatus::Stopping => "stopping",
            VmStatus::Stopped => "stopped",
            VmStatus::Unknown => "unknown",
            VmStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
