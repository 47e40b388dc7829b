//! PCI/PCIe enumeration and resource assignment.
//!
//! Boot-time walk of the configuration-space hierarchy: assigns bus numbers,
//! sizes and programs BARs, and computes bridge forwarding windows, all from
//! four linear resource pools threaded through the recursion. Runs once,
//! synchronously, before anything else owns the devices.
//!
//! # Reference
//! - PCI Local Bus Specification 3.0
//! - PCI Express Base Specification (ECAM layout)

pub mod access;
pub mod alloc;
pub mod bar;
pub mod bridge;
pub mod host;
pub mod regs;
pub mod scan;

#[cfg(test)]
pub(crate) mod mock;

pub use access::{ConfigAccess, DeviceFunction, EcamAccess};
pub use alloc::{align_up_checked, EnumError, HostWindows, ResourcePools, ResourceWindow};
pub use bar::program_bar;
pub use bridge::program_bridge;
pub use host::{enumerate_host, host_ecam, init_host_ecam};
pub use regs::{Command, HeaderKind};
pub use scan::{
    enable_bus_master, enumerate, enumerate_bus, find_by_class, find_device, probe_function,
    EnumSummary, FunctionInfo,
};
