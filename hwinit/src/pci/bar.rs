//! BAR sizing and programming.
//!
//! One visit of one BAR slot: probe the size mask with the all-ones write,
//! decode type and size, carve a region out of the matching resource pool and
//! commit the address, or put the register file back exactly as it was found.
//!
//! 64-bit BARs span two slots and the probe is order-sensitive: the lower
//! half only reports its size once the upper half has also been written with
//! the probe pattern. The upper half itself must read back as all-ones —
//! anything less means the device insists on address bits this design does
//! not map (every aperture lives below 4 GiB).

use log::warn;

use super::access::{ConfigAccess, DeviceFunction};
use super::alloc::{EnumError, ResourcePools, Result};
use super::regs::{
    bar_offset, offset, HeaderKind, BAR_IO_ADDR_MASK, BAR_IO_SPACE, BAR_MEM_ADDR_MASK,
    BAR_MEM_PREFETCH, BAR_MEM_TYPE_64, BAR_MEM_TYPE_MASK, BAR_PROBE,
};

/// I/O BARs are placed at 4 KiB boundaries (the bridge window granularity)
/// even when the BAR itself is smaller.
const IO_BAR_MIN_ALIGN: u32 = 0x1000;

/// Size, program and enable one BAR slot.
///
/// Returns the assigned address, or `None` for an unimplemented slot (a
/// no-op, not an error). `two_slot` is set whenever the slot turned out to
/// be the lower half of a 64-bit pair — including on the error paths — so
/// the caller always knows to skip the consumed upper slot.
///
/// On any failure the touched register(s) and the pools are left bit-for-bit
/// as they were.
pub fn program_bar<A: ConfigAccess>(
    access: &A,
    df: DeviceFunction,
    index: usize,
    pools: &mut ResourcePools,
    two_slot: &mut bool,
) -> Result<Option<u32>> {
    *two_slot = false;

    let header = HeaderKind::from_raw(access.read8(df, offset::HEADER_TYPE));
    let slots = header.bar_slots();
    if index >= slots {
        return Err(EnumError::BadBarIndex);
    }

    let reg = bar_offset(index);
    let saved = access.read32(df, reg);

    access.write32(df, reg, BAR_PROBE);
    let mask = access.read32(df, reg);

    if mask == 0 {
        // Slot not implemented.
        access.write32(df, reg, saved);
        return Ok(None);
    }

    if mask & BAR_IO_SPACE != 0 {
        return program_io_bar(access, df, reg, saved, mask, pools);
    }

    let prefetch = mask & BAR_MEM_PREFETCH != 0;
    let wide = mask & BAR_MEM_TYPE_MASK == BAR_MEM_TYPE_64;

    let mut size_mask = mask;
    let mut saved_upper = 0;
    if wide {
        *two_slot = true;
        if index + 1 >= slots {
            // A 64-bit BAR in the last slot has nowhere to put its upper
            // half; refuse it.
            access.write32(df, reg, saved);
            return Err(EnumError::BadBarIndex);
        }
        let upper_reg = bar_offset(index + 1);
        saved_upper = access.read32(df, upper_reg);
        access.write32(df, upper_reg, BAR_PROBE);

        // Only now is the lower half's size mask valid.
        size_mask = access.read32(df, reg);

        let upper = access.read32(df, upper_reg);
        if upper != BAR_PROBE {
            access.write32(df, reg, saved);
            access.write32(df, upper_reg, saved_upper);
            return Err(EnumError::UpperBarMismatch);
        }
    }

    let decode = size_mask & BAR_MEM_ADDR_MASK;
    if decode == 0 {
        // Type bits without a size: treat like an unimplemented slot.
        access.write32(df, reg, saved);
        if wide {
            access.write32(df, bar_offset(index + 1), saved_upper);
        }
        return Ok(None);
    }

    let size = (!decode).wrapping_add(1);
    if !size.is_power_of_two() {
        // Non-contiguous size mask: broken decoder, leave the slot alone.
        warn!("pci {:02x}:{:02x}.{} BAR{index}: bad size mask {size_mask:#010x}",
            df.bus, df.device, df.function);
        access.write32(df, reg, saved);
        if wide {
            access.write32(df, bar_offset(index + 1), saved_upper);
        }
        return Ok(None);
    }

    let pool = if prefetch {
        &mut pools.mem_pf
    } else {
        &mut pools.mem
    };
    let addr = match pool.reserve(size, size) {
        Ok(addr) => addr,
        Err(err) => {
            access.write32(df, reg, saved);
            if wide {
                access.write32(df, bar_offset(index + 1), saved_upper);
            }
            return Err(err);
        }
    };

    access.write32(df, reg, addr);
    if wide {
        // The aperture sits below 4 GiB; the upper half is zero.
        access.write32(df, bar_offset(index + 1), 0);
    }
    Ok(Some(addr))
}

fn program_io_bar<A: ConfigAccess>(
    access: &A,
    df: DeviceFunction,
    reg: u16,
    saved: u32,
    mask: u32,
    pools: &mut ResourcePools,
) -> Result<Option<u32>> {
    let mut decode = mask & BAR_IO_ADDR_MASK;
    if decode == 0 {
        // No writable address bits at all.
        access.write32(df, reg, saved);
        return Ok(None);
    }
    if decode & 0xFFFF_0000 == 0 {
        // 16-bit decoder: the upper half of the mask reads as zero.
        decode |= 0xFFFF_0000;
    }
    let size = (!decode).wrapping_add(1);
    if size == 0 || !size.is_power_of_two() {
        access.write32(df, reg, saved);
        return Ok(None);
    }

    let align = size.max(IO_BAR_MIN_ALIGN);
    let addr = match pools.io.reserve(size, align) {
        Ok(addr) => addr,
        Err(err) => {
            access.write32(df, reg, saved);
            return Err(err);
        }
    };

    // Bit 0 is the I/O space marker (read-only on real hardware).
    access.write32(df, reg, addr | BAR_IO_SPACE);
    Ok(Some(addr))
}
