//! Core types for the LXD virtual-machine backend.
//!
//! Defines the vocabulary shared between the driver and its callers: VM
//! descriptions, lifecycle statuses, sizes, and mount requests. Nothing in
//! here performs I/O.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod description;
pub mod error;
pub mod memory;
pub mod mount;
pub mod status;

pub use description::{CloudInitDocuments, NetworkInterface, VirtualMachineDescription};
pub use error::CoreError;
pub use memory::MemorySize;
pub use mount::{IdMapping, VmMount};
pub use status::VmStatus;
