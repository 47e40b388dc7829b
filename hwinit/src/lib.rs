//! Hardware Discovery Layer
//!
//! Boot-time PCI/PCIe discovery for OxBoot. Runs once during bring-up,
//! before the next boot stage takes over, and leaves configuration space in
//! a stable state: every reachable function sized and addressed, every
//! bridge numbered and windowed.
//!
//! # Architecture
//!
//! ```text
//! enumerate() / enumerate_host()
//!        │
//!        ▼
//! enumerate_bus(0) ──── endpoint ──▶ program_bar() per BAR slot
//!        │
//!        └───────────── bridge ────▶ program_bridge()
//!                                       │  bus number hand-out
//!                                       ▼
//!                                   enumerate_bus(secondary)   (recursion)
//!                                       │
//!                                       ▼
//!                                   window computation + commit
//! ```
//!
//! A single allocator value (four linear cursors: memory, prefetchable
//! memory, I/O, bus numbers) is threaded by exclusive reference through the
//! whole walk. Failed functions and bridges roll back to their pre-call
//! state and the sweep continues — an unmapped device is inert, not fatal.
//!
//! # Usage
//!
//! ```ignore
//! use oxboot_hwinit::pci;
//!
//! // Bring-up, once, with the platform's ECAM window:
//! unsafe { pci::init_host_ecam(0xB000_0000 as *mut u8) };
//! let summary = pci::enumerate_host()?;
//!
//! // Drivers afterwards:
//! if let Some(nvme) = pci::find_by_class(pci::host_ecam().unwrap(), 0x01, 0x08) {
//!     pci::enable_bus_master(pci::host_ecam().unwrap(), nvme.df);
//! }
//! ```
//!
//! # What This Crate Does
//!
//! - Configuration space access (ECAM, plus a trait seam for tests)
//! - Bus/device/function scanning with multifunction handling
//! - BAR sizing (including 64-bit pairs) and address assignment
//! - Bridge bus numbering and forwarding-window programming
//! - Linear resource-pool accounting with rollback
//! - Post-enumeration device lookup and bus-master enablement
//!
//! # What This Crate Does NOT Do
//!
//! - Device-specific register programming
//! - Interrupt (MSI/MSI-X) or power-state configuration
//! - Hot-plug; the topology is walked exactly once

#![no_std]
#![allow(dead_code)]

pub mod pci;

// ═══════════════════════════════════════════════════════════════════════════
// PCI RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════

pub use pci::{ConfigAccess, DeviceFunction, EcamAccess};
pub use pci::{EnumError, EnumSummary, FunctionInfo, HostWindows, ResourcePools};
pub use pci::{enumerate, enumerate_host, init_host_ecam};
pub use pci::{enable_bus_master, find_by_class, find_device, probe_function};
