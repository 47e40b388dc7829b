//! PCI-to-PCI bridge programming.
//!
//! A bridge is configured in one atomic-looking step: hand out a secondary
//! bus number, enumerate the subtree behind it, then derive the three
//! forwarding windows (memory, prefetchable memory, I/O) from what the
//! subtree actually consumed. If anything along the way fails, every touched
//! register and every pool cursor is put back exactly as found — a failed
//! bridge is left disabled, which is a safe, inert outcome.
//!
//! Window registers use the hardware granularity: 1 MiB for both memory
//! classes (16-bit base/limit fields holding address bits 31:16), 4 KiB for
//! I/O (8-bit fields holding bits 15:8). A window nobody used is written
//! closed (base above limit) rather than zero-sized.

use log::debug;

use super::access::{ConfigAccess, DeviceFunction};
use super::alloc::{ResourcePools, ResourceWindow, Result};
use super::regs::{offset, Command};
use super::scan::{enumerate_bus, EnumSummary};

/// Memory and prefetchable windows are 1 MiB granular.
pub(crate) const MEM_WINDOW_ALIGN: u32 = 0x10_0000;

/// I/O windows are 4 KiB granular.
pub(crate) const IO_WINDOW_ALIGN: u32 = 0x1000;

/// Closed-window encodings (base strictly above limit).
const MEM_WINDOW_CLOSED: (u16, u16) = (0xFFFF, 0x0000);
const IO_WINDOW_CLOSED: (u8, u8) = (0xFF, 0x00);

/// Subordinate value routing the entire downstream range while the subtree
/// is still being numbered.
const SUBORDINATE_OPEN: u8 = 0xFF;

/// Number a bridge, enumerate everything behind it and commit its windows.
///
/// Rollback is all-or-nothing: on any failure the pools, the command
/// register and the secondary/subordinate bus registers are restored, and
/// the error is returned for the caller to log and step past.
pub fn program_bridge<A: ConfigAccess>(
    access: &A,
    df: DeviceFunction,
    pools: &mut ResourcePools,
    summary: &mut EnumSummary,
) -> Result<()> {
    let saved_command = access.read16(df, offset::COMMAND);

    // Known state while the subtree is renumbered: decode off, no routing.
    access.write16(df, offset::COMMAND, 0);
    access.write8(df, offset::SECONDARY_BUS, 0);
    access.write8(df, offset::SUBORDINATE_BUS, 0);

    let snapshot = pools.snapshot();

    let result = configure(access, df, pools, summary);
    if result.is_err() {
        pools.restore(snapshot);
        access.write16(df, offset::COMMAND, saved_command);
        access.write8(df, offset::SECONDARY_BUS, 0);
        access.write8(df, offset::SUBORDINATE_BUS, 0);
    }
    result
}

fn configure<A: ConfigAccess>(
    access: &A,
    df: DeviceFunction,
    pools: &mut ResourcePools,
    summary: &mut EnumSummary,
) -> Result<()> {
    // Provisional window bases: each class cursor rounded up to its
    // granularity before anything behind the bridge allocates.
    let mem_base = pools.mem.round_to(MEM_WINDOW_ALIGN)?;
    let prefetch_base = pools.mem_pf.round_to(MEM_WINDOW_ALIGN)?;
    let io_base = pools.io.round_to(IO_WINDOW_ALIGN)?;

    let secondary = pools.alloc_bus()?;
    access.write8(df, offset::PRIMARY_BUS, df.bus);
    access.write8(df, offset::SECONDARY_BUS, secondary);
    access.write8(df, offset::SUBORDINATE_BUS, SUBORDINATE_OPEN);

    enumerate_bus(access, secondary, pools, summary);

    // Window ends: cursor still at the base means nobody used the class.
    let mem_end = window_end(&mut pools.mem, mem_base, MEM_WINDOW_ALIGN)?;
    let prefetch_end = window_end(&mut pools.mem_pf, prefetch_base, MEM_WINDOW_ALIGN)?;
    let io_end = window_end(&mut pools.io, io_base, IO_WINDOW_ALIGN)?;

    // The highest bus number the subtree used.
    let subordinate = (pools.bus.current - 1) as u8;
    access.write8(df, offset::SUBORDINATE_BUS, subordinate);

    let (mem_lo, mem_hi) = match mem_end {
        Some(end) => ((mem_base >> 16) as u16, ((end >> 16) - 1) as u16),
        None => MEM_WINDOW_CLOSED,
    };
    access.write16(df, offset::MEMORY_BASE, mem_lo);
    access.write16(df, offset::MEMORY_LIMIT, mem_hi);

    let (prefetch_lo, prefetch_hi) = match prefetch_end {
        Some(end) => ((prefetch_base >> 16) as u16, ((end >> 16) - 1) as u16),
        None => MEM_WINDOW_CLOSED,
    };
    access.write16(df, offset::PREFETCH_BASE, prefetch_lo);
    access.write16(df, offset::PREFETCH_LIMIT, prefetch_hi);

    let (io_lo, io_hi) = match io_end {
        Some(end) => ((io_base >> 8) as u8, ((end >> 8) - 1) as u8),
        None => IO_WINDOW_CLOSED,
    };
    access.write8(df, offset::IO_BASE, io_lo);
    access.write8(df, offset::IO_LIMIT, io_hi);

    // Forwarding is always on; decode enables only for open windows.
    let mut command = Command::BUS_MASTER;
    if mem_end.is_some() || prefetch_end.is_some() {
        command |= Command::MEMORY_SPACE;
    }
    if io_end.is_some() {
        command |= Command::IO_SPACE;
    }
    access.write16(df, offset::COMMAND, command.bits());

    debug!(
        "pci {:02x}:{:02x}.{}: bridge buses {}-{} cmd {:#06x}",
        df.bus,
        df.device,
        df.function,
        secondary,
        subordinate,
        command.bits()
    );
    summary.bridges += 1;
    Ok(())
}

/// End of one window class: `None` when the subtree left the cursor at the
/// provisional base, otherwise the cursor rounded up to the granularity.
fn window_end(window: &mut ResourceWindow, base: u32, align: u32) -> Result<Option<u32>> {
    if window.current == base {
        return Ok(None);
    }
    window.round_to(align).map(Some)
}
