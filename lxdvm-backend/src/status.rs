//! LXD instance status codes.

use lxdvm_core::VmStatus;

/// Instance status codes reported by LXD and the status each one means here.
///
/// `Stopping` counts as running: the guest is still up until LXD says
/// otherwise. `Thawed` is a guest that just came back from a freeze.
pub const STATUS_CODES: &[(i64, &str, VmStatus)] = &[
    (101, "Started", VmStatus::Running),
    (102, "Stopped", VmStatus::Stopped),
    (103, "Running", VmStatus::Running),
    (104, "Cancelling", VmStatus::Unknown),
    (106, "Starting", VmStatus::Starting),
    (107, "Stopping", VmStatus::Running),
    (108, "Aborting", VmStatus::Unknown),
    (109, "Freezing", VmStatus::Suspending),
    (110, "Frozen", VmStatus::Suspended),
    (111, "Thawed", VmStatus::Running),
    (112, "Error", VmStatus::Unknown),
];

/// Look up an instance status code. `None` for codes LXD should never send.
#[must_use]
pub fn status_for_code(code: i64) -> Option<VmStatus> {
    STATUS_CODES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, _, status)| *status)
}
