//! Resource pools for the enumeration pass.
//!
//! Address space is handed out by four independent linear cursors: 32-bit
//! memory, prefetchable memory, I/O ports, and bus numbers. A cursor only
//! moves forward when an allocation commits; rollback restores a snapshot of
//! all four taken before the failing operation started.
//!
//! All 32-bit boundary policy lives in [`align_up_checked`]: every pool
//! advance and every bridge-window alignment step goes through it.

/// Enumeration error. Every variant is recovered locally: the failing
/// function or bridge is restored to its pre-call state and the sweep moves
/// on to the next sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumError {
    /// An allocation would reach or pass the pool's limit.
    OutOfSpace,
    /// Rounding up wrapped past the top of the 32-bit address space.
    AlignmentOverflow,
    /// A 64-bit BAR's upper half wants more than 32 bits of address space.
    UpperBarMismatch,
    /// BAR index outside the header's slot count.
    BadBarIndex,
    /// Host entry point called before the ECAM window was registered.
    NoHostAccess,
}

/// Result type for enumeration operations.
pub type Result<T> = core::result::Result<T, EnumError>;

/// Round `addr` up to a multiple of `align` (a power of two), failing if the
/// result would wrap past the 32-bit address space or reach `limit`.
///
/// The comparison against `limit` is strict: an allocation that would start
/// exactly at the limit has zero usable bytes and is refused.
pub fn align_up_checked(addr: u32, align: u32, limit: u32) -> Result<u32> {
    debug_assert!(align.is_power_of_two());
    let aligned = (addr as u64 + (align as u64 - 1)) & !(align as u64 - 1);
    if aligned > u32::MAX as u64 {
        return Err(EnumError::AlignmentOverflow);
    }
    let aligned = aligned as u32;
    if aligned >= limit {
        return Err(EnumError::OutOfSpace);
    }
    Ok(aligned)
}

/// One linear allocation cursor over `[current, limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceWindow {
    /// Next free address.
    pub current: u32,
    /// First address past the pool.
    pub limit: u32,
}

impl ResourceWindow {
    /// Create a cursor over `[base, limit)`.
    pub const fn new(base: u32, limit: u32) -> Self {
        Self {
            current: base,
            limit,
        }
    }

    /// Reserve `size` bytes at `align` alignment.
    ///
    /// Returns the allocated base and advances the cursor past it. On error
    /// the cursor is untouched.
    pub fn reserve(&mut self, size: u32, align: u32) -> Result<u32> {
        let addr = align_up_checked(self.current, align, self.limit)?;
        let end = addr.checked_add(size).ok_or(EnumError::OutOfSpace)?;
        if end > self.limit {
            return Err(EnumError::OutOfSpace);
        }
        self.current = end;
        Ok(addr)
    }

    /// Round the cursor itself up to `align`, returning the new position.
    /// Used for bridge-window base/limit computation.
    pub fn round_to(&mut self, align: u32) -> Result<u32> {
        let aligned = align_up_checked(self.current, align, self.limit)?;
        self.current = aligned;
        Ok(aligned)
    }
}

/// Externally supplied host windows the pools are seeded from.
///
/// The defaults describe the canonical layout: 128 MiB of non-prefetchable
/// MMIO, prefetchable space up to the top of the 32-bit hole, and the 16-bit
/// I/O port range above the legacy devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostWindows {
    pub mem_base: u32,
    pub mem_limit: u32,
    pub prefetch_base: u32,
    pub prefetch_limit: u32,
    pub io_base: u32,
    pub io_limit: u32,
}

impl Default for HostWindows {
    fn default() -> Self {
        Self {
            mem_base: 0x8000_0000,
            mem_limit: 0x8800_0000,
            prefetch_base: 0x9000_0000,
            prefetch_limit: 0xFFFF_FFFF,
            io_base: 0x2000,
            io_limit: 0x1_0000,
        }
    }
}

/// First bus number handed out to a bridge (bus 0 is the root).
const FIRST_CHILD_BUS: u32 = 1;

/// One past the last assignable bus number.
const BUS_POOL_LIMIT: u32 = 0x100;

/// The allocation state threaded through the whole walk.
///
/// Exactly one of these exists per enumeration run; it is created by the
/// entry point and passed down by exclusive reference, so sibling visits can
/// never alias a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePools {
    /// Non-prefetchable memory.
    pub mem: ResourceWindow,
    /// Prefetchable memory.
    pub mem_pf: ResourceWindow,
    /// I/O ports.
    pub io: ResourceWindow,
    /// Bus numbers; `current` is the next number to hand out.
    pub bus: ResourceWindow,
}

/// Saved pool state for all-or-nothing rollback.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot(ResourcePools);

impl ResourcePools {
    /// Seed the pools from the host windows.
    pub const fn new(windows: &HostWindows) -> Self {
        Self {
            mem: ResourceWindow::new(windows.mem_base, windows.mem_limit),
            mem_pf: ResourceWindow::new(windows.prefetch_base, windows.prefetch_limit),
            io: ResourceWindow::new(windows.io_base, windows.io_limit),
            bus: ResourceWindow::new(FIRST_CHILD_BUS, BUS_POOL_LIMIT),
        }
    }

    /// Capture all four cursors.
    pub const fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot(*self)
    }

    /// Restore all four cursors to a snapshot.
    pub fn restore(&mut self, snapshot: PoolSnapshot) {
        *self = snapshot.0;
    }

    /// Hand out the next bus number.
    pub fn alloc_bus(&mut self) -> Result<u8> {
        self.bus.reserve(1, 1).map(|bus| bus as u8)
    }
}
