//! Bus walking: enumeration, the entry point and discovery helpers.
//!
//! The walk visits device and function slots in increasing numeric order.
//! That order is load-bearing — it decides which bus numbers and addresses
//! every function ends up with — so it must never be reordered.

use log::{debug, info, warn};

use super::access::{ConfigAccess, DeviceFunction};
use super::alloc::{HostWindows, ResourcePools, Result};
use super::bar::program_bar;
use super::bridge::program_bridge;
use super::regs::{
    offset, Command, HeaderKind, ENDPOINT_BARS, HEADER_TYPE_MULTIFUNC, VENDOR_NONE,
};

/// Device slots per bus.
const MAX_DEVICES: u8 = 32;

/// Functions per device slot.
const MAX_FUNCTIONS: u8 = 8;

/// Counters reported by one enumeration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumSummary {
    /// Present functions visited.
    pub functions: u32,
    /// BARs sized and mapped.
    pub bars: u32,
    /// Bridges fully configured.
    pub bridges: u32,
}

/// Identity of one present function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    pub df: DeviceFunction,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision: u8,
    pub header: HeaderKind,
    pub multifunction: bool,
}

/// Read a function's identity registers, `None` if the slot is empty.
pub fn probe_function<A: ConfigAccess>(access: &A, df: DeviceFunction) -> Option<FunctionInfo> {
    let id = access.read32(df, offset::VENDOR_ID);
    let vendor_id = (id & 0xFFFF) as u16;
    if vendor_id == VENDOR_NONE {
        return None;
    }
    let device_id = (id >> 16) as u16;

    let class_rev = access.read32(df, offset::REVISION_ID & !0x3);
    let header_raw = access.read8(df, offset::HEADER_TYPE);

    Some(FunctionInfo {
        df,
        vendor_id,
        device_id,
        class: (class_rev >> 24) as u8,
        subclass: (class_rev >> 16) as u8,
        prog_if: (class_rev >> 8) as u8,
        revision: class_rev as u8,
        header: HeaderKind::from_raw(header_raw),
        multifunction: header_raw & HEADER_TYPE_MULTIFUNC != 0,
    })
}

/// Walk one bus: endpoints get their BARs programmed, bridges recurse.
///
/// A failed BAR or bridge is logged and stepped past; nothing on a bus can
/// abort the sweep of its siblings.
pub fn enumerate_bus<A: ConfigAccess>(
    access: &A,
    bus: u8,
    pools: &mut ResourcePools,
    summary: &mut EnumSummary,
) {
    for device in 0..MAX_DEVICES {
        let df0 = DeviceFunction::new(bus, device, 0);
        if access.read16(df0, offset::VENDOR_ID) == VENDOR_NONE {
            continue;
        }
        let multifunction =
            access.read8(df0, offset::HEADER_TYPE) & HEADER_TYPE_MULTIFUNC != 0;
        let functions = if multifunction { MAX_FUNCTIONS } else { 1 };

        for function in 0..functions {
            let df = DeviceFunction::new(bus, device, function);
            if function > 0 && access.read16(df, offset::VENDOR_ID) == VENDOR_NONE {
                continue;
            }
            summary.functions += 1;

            let kind = HeaderKind::from_raw(access.read8(df, offset::HEADER_TYPE));
            match kind {
                HeaderKind::Endpoint => {
                    program_endpoint_bars(access, df, pools, summary);
                }
                HeaderKind::Bridge => {
                    if let Err(err) = program_bridge(access, df, pools, summary) {
                        warn!(
                            "pci {:02x}:{:02x}.{}: bridge left unconfigured: {:?}",
                            df.bus, df.device, df.function, err
                        );
                    }
                }
                other => {
                    debug!(
                        "pci {:02x}:{:02x}.{}: skipping header type {:?}",
                        df.bus, df.device, df.function, other
                    );
                }
            }
        }
    }
}

/// Size and map every BAR of one endpoint, decode disabled while the
/// registers change, original command register restored afterwards.
fn program_endpoint_bars<A: ConfigAccess>(
    access: &A,
    df: DeviceFunction,
    pools: &mut ResourcePools,
    summary: &mut EnumSummary,
) {
    let saved_command = access.read16(df, offset::COMMAND);
    let disabled = saved_command & !(Command::IO_SPACE | Command::MEMORY_SPACE).bits();
    access.write16(df, offset::COMMAND, disabled);

    let mut index = 0;
    while index < ENDPOINT_BARS {
        let mut two_slot = false;
        match program_bar(access, df, index, pools, &mut two_slot) {
            Ok(Some(addr)) => {
                debug!(
                    "pci {:02x}:{:02x}.{} BAR{}: {:#010x}",
                    df.bus, df.device, df.function, index, addr
                );
                summary.bars += 1;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    "pci {:02x}:{:02x}.{} BAR{}: left unmapped: {:?}",
                    df.bus, df.device, df.function, index, err
                );
            }
        }
        index += if two_slot { 2 } else { 1 };
    }

    access.write16(df, offset::COMMAND, saved_command);
}

/// Enumerate the whole hierarchy starting at bus 0.
///
/// Seeds the resource pools from `windows` and walks the tree. Individual
/// failures self-heal by rollback, so the run as a whole succeeds; the
/// summary says what was found.
pub fn enumerate<A: ConfigAccess>(access: &A, windows: &HostWindows) -> Result<EnumSummary> {
    let mut pools = ResourcePools::new(windows);
    let mut summary = EnumSummary::default();
    enumerate_bus(access, 0, &mut pools, &mut summary);
    info!(
        "pci: {} functions, {} BARs mapped, {} bridges",
        summary.functions, summary.bars, summary.bridges
    );
    Ok(summary)
}

// ═══════════════════════════════════════════════════════════════════════════
// DISCOVERY HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Every function present in the configured topology, in enumeration order.
fn visit_functions<A: ConfigAccess>(
    access: &A,
    mut want: impl FnMut(&FunctionInfo) -> bool,
) -> Option<FunctionInfo> {
    for bus in 0..=u8::MAX {
        for device in 0..MAX_DEVICES {
            let df0 = DeviceFunction::new(bus, device, 0);
            let Some(info0) = probe_function(access, df0) else {
                continue;
            };
            if want(&info0) {
                return Some(info0);
            }
            if info0.multifunction {
                for function in 1..MAX_FUNCTIONS {
                    let df = DeviceFunction::new(bus, device, function);
                    if let Some(info) = probe_function(access, df) {
                        if want(&info) {
                            return Some(info);
                        }
                    }
                }
            }
        }
    }
    None
}

/// Find a function by vendor/device ID. Only meaningful after enumeration,
/// once bridge routing reaches the whole tree.
pub fn find_device<A: ConfigAccess>(
    access: &A,
    vendor_id: u16,
    device_id: u16,
) -> Option<FunctionInfo> {
    visit_functions(access, |info| {
        info.vendor_id == vendor_id && info.device_id == device_id
    })
}

/// Find a function by class/subclass code.
pub fn find_by_class<A: ConfigAccess>(
    access: &A,
    class: u8,
    subclass: u8,
) -> Option<FunctionInfo> {
    visit_functions(access, |info| {
        info.class == class && info.subclass == subclass
    })
}

/// Turn on bus mastering for one function (drivers need it before DMA).
pub fn enable_bus_master<A: ConfigAccess>(access: &A, df: DeviceFunction) {
    let command = Command::from_bits_truncate(access.read16(df, offset::COMMAND));
    access.write16(df, offset::COMMAND, (command | Command::BUS_MASTER).bits());
}
