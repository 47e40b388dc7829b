//! PCI configuration space register map.
//!
//! Standard type 0 (endpoint) and type 1 (bridge) header layout, plus the
//! bit-level views used by the enumerator.
//!
//! # Reference
//! PCI Local Bus Specification 3.0, chapter 6

use bitflags::bitflags;

/// Vendor ID read back from an empty slot.
pub const VENDOR_NONE: u16 = 0xFFFF;

/// Pattern written to a BAR to put it in size-probe mode.
pub const BAR_PROBE: u32 = 0xFFFF_FFFF;

/// BAR slots in a type 0 header.
pub const ENDPOINT_BARS: usize = 6;

/// BAR slots in a type 1 header.
pub const BRIDGE_BARS: usize = 2;

// ═══════════════════════════════════════════════════════════════════════════
// REGISTER OFFSETS
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration space register offsets (shared and type 1 header).
pub mod offset {
    pub const VENDOR_ID: u16 = 0x00;
    pub const DEVICE_ID: u16 = 0x02;
    pub const COMMAND: u16 = 0x04;
    pub const STATUS: u16 = 0x06;
    pub const REVISION_ID: u16 = 0x08;
    pub const PROG_IF: u16 = 0x09;
    pub const SUBCLASS: u16 = 0x0A;
    pub const CLASS_CODE: u16 = 0x0B;
    pub const HEADER_TYPE: u16 = 0x0E;
    pub const BAR0: u16 = 0x10;
    // Type 1 (bridge) header
    pub const PRIMARY_BUS: u16 = 0x18;
    pub const SECONDARY_BUS: u16 = 0x19;
    pub const SUBORDINATE_BUS: u16 = 0x1A;
    pub const IO_BASE: u16 = 0x1C;
    pub const IO_LIMIT: u16 = 0x1D;
    pub const MEMORY_BASE: u16 = 0x20;
    pub const MEMORY_LIMIT: u16 = 0x22;
    pub const PREFETCH_BASE: u16 = 0x24;
    pub const PREFETCH_LIMIT: u16 = 0x26;
}

/// Offset of BAR slot `index` (panics on an out-of-header index).
pub const fn bar_offset(index: usize) -> u16 {
    assert!(index < ENDPOINT_BARS);
    offset::BAR0 + (index as u16) * 4
}

// ═══════════════════════════════════════════════════════════════════════════
// HEADER TYPE
// ═══════════════════════════════════════════════════════════════════════════

/// Multifunction flag in the header-type register.
pub const HEADER_TYPE_MULTIFUNC: u8 = 0x80;

/// Layout mask of the header-type register (low 7 bits).
pub const HEADER_TYPE_KIND_MASK: u8 = 0x7F;

/// The layout of a function's configuration header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Type 0: ordinary device function.
    Endpoint,
    /// Type 1: PCI-to-PCI bridge.
    Bridge,
    /// Type 2: CardBus bridge (not configured by this layer).
    CardBus,
    /// Anything else the hardware reports.
    Unknown(u8),
}

impl HeaderKind {
    /// Decode the header-type register (multifunction bit stripped).
    pub const fn from_raw(raw: u8) -> Self {
        match raw & HEADER_TYPE_KIND_MASK {
            0x00 => HeaderKind::Endpoint,
            0x01 => HeaderKind::Bridge,
            0x02 => HeaderKind::CardBus,
            other => HeaderKind::Unknown(other),
        }
    }

    /// BAR slots implemented by this header layout.
    pub const fn bar_slots(self) -> usize {
        match self {
            HeaderKind::Endpoint => ENDPOINT_BARS,
            HeaderKind::Bridge => BRIDGE_BARS,
            _ => 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BAR FIELDS
// ═══════════════════════════════════════════════════════════════════════════

/// Bit 0: set in I/O BARs, clear in memory BARs.
pub const BAR_IO_SPACE: u32 = 0x1;

/// Bits 2:1 of a memory BAR select the address width.
pub const BAR_MEM_TYPE_MASK: u32 = 0x6;

/// Width field value for a 64-bit BAR (spans two consecutive slots).
pub const BAR_MEM_TYPE_64: u32 = 0x4;

/// Bit 3: prefetchable memory BAR.
pub const BAR_MEM_PREFETCH: u32 = 0x8;

/// Address portion of a memory BAR.
pub const BAR_MEM_ADDR_MASK: u32 = 0xFFFF_FFF0;

/// Address portion of an I/O BAR.
pub const BAR_IO_ADDR_MASK: u32 = 0xFFFF_FFFC;

// ═══════════════════════════════════════════════════════════════════════════
// COMMAND REGISTER
// ═══════════════════════════════════════════════════════════════════════════

bitflags! {
    /// The command register at offset 0x04.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Command: u16 {
        /// The function responds to I/O space accesses.
        const IO_SPACE = 1 << 0;
        /// The function responds to memory space accesses.
        const MEMORY_SPACE = 1 << 1;
        /// The function may initiate transactions (forwarding, for bridges).
        const BUS_MASTER = 1 << 2;
        /// Normal parity-error reporting.
        const PARITY_ERROR_RESPONSE = 1 << 6;
        /// SERR# driver enabled.
        const SERR_ENABLE = 1 << 8;
        /// Legacy INTx# assertion disabled.
        const INTERRUPT_DISABLE = 1 << 10;
    }
}

/// Class codes this layer cares about.
pub mod class {
    /// Mass storage controllers.
    pub const MASS_STORAGE: u8 = 0x01;
    /// Network controllers.
    pub const NETWORK: u8 = 0x02;
    /// Bridge devices.
    pub const BRIDGE: u8 = 0x06;
    /// Bridge subclass: PCI-to-PCI.
    pub const SUBCLASS_PCI_TO_PCI: u8 = 0x04;
}
