//! LXD virtual machine backend.
//!
//! Drives instances of the LXD daemon over its Unix-socket REST API:
//! lifecycle and status tracking, background operation polling, DHCP lease
//! lookup, resource resizing, and native directory mounts.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod endpoints;
pub mod error;
mod instance;
pub mod leases;
pub mod lxd;
pub mod mount;
pub mod operation;
pub mod status;
pub mod unix_client;
pub mod vm;

pub use backend::{MountHandler, VirtualMachine, VmStatusMonitor};
pub use config::LxdBackendConfig;
pub use endpoints::VmEndpoints;
pub use error::{BackendError, Lookup};
pub use lxd::LxdBackend;
pub use mount::{device_name_for, LxdMountHandler};
pub use operation::{wait_for_operation, PendingOperation};
pub use status::status_for_code;
pub use unix_client::LxdClient;
pub use vm::{LxdVirtualMachine, DEFAULT_START_GRACE};
