//! Software-backed PCI topology for tests.
//!
//! Stands in for the ECAM window: a small tree of functions with a 256-byte
//! config register backing store each. The parts of real hardware the
//! enumerator depends on are emulated faithfully:
//!
//! - reads of an absent function, or of a function behind a bridge whose bus
//!   registers are not configured yet, return all-ones and writes there are
//!   dropped;
//! - writing the probe pattern to a BAR latches the size mask, and the lower
//!   half of a 64-bit pair reports type bits only until the upper half has
//!   also been probed (the ordering real hardware imposes);
//! - a normal write to a BAR slot takes it back out of probe mode.

use core::cell::RefCell;

use super::access::{ConfigAccess, DeviceFunction};
use super::regs::{offset, BAR_PROBE, HEADER_TYPE_MULTIFUNC};

const MAX_NODES: usize = 10;
const CFG_SIZE: usize = 256;
const NODE_BARS: usize = 6;

/// BAR behavior of one mock function.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarSpec {
    /// Power-of-two size in bytes; 0 = slot not implemented.
    pub size: u32,
    /// I/O BAR (otherwise MMIO).
    pub io: bool,
    /// 64-bit MMIO BAR; consumes the next slot as its upper half.
    pub wide: bool,
    /// Prefetchable MMIO.
    pub prefetch: bool,
    /// I/O BAR with a 16-bit decoder: upper 16 mask bits read as zero.
    pub io_hi16_zero: bool,
    /// Probe mask of the upper half (0 = the usual all-ones).
    pub upper_mask: u32,
}

impl BarSpec {
    const EMPTY: Self = Self {
        size: 0,
        io: false,
        wide: false,
        prefetch: false,
        io_hi16_zero: false,
        upper_mask: 0,
    };

    /// 32-bit non-prefetchable MMIO.
    pub const fn mmio(size: u32) -> Self {
        Self { size, ..Self::EMPTY }
    }

    /// 32-bit prefetchable MMIO.
    pub const fn mmio_prefetch(size: u32) -> Self {
        Self {
            size,
            prefetch: true,
            ..Self::EMPTY
        }
    }

    /// I/O ports.
    pub const fn io(size: u32) -> Self {
        Self {
            size,
            io: true,
            ..Self::EMPTY
        }
    }

    /// 64-bit prefetchable MMIO.
    pub const fn mmio64_prefetch(size: u32) -> Self {
        Self {
            size,
            wide: true,
            prefetch: true,
            ..Self::EMPTY
        }
    }
}

#[derive(Clone, Copy)]
struct Node {
    in_use: bool,
    device: u8,
    function: u8,
    bridge: bool,
    /// `None` = directly on the root bus, else index of the parent bridge.
    parent: Option<usize>,
    vendor: u16,
    device_id: u16,
    bars: [BarSpec; NODE_BARS],
    probed: [bool; NODE_BARS],
    cfg: [u8; CFG_SIZE],
}

impl Node {
    const fn empty() -> Self {
        Self {
            in_use: false,
            device: 0,
            function: 0,
            bridge: false,
            parent: None,
            vendor: 0,
            device_id: 0,
            bars: [BarSpec {
                size: 0,
                io: false,
                wide: false,
                prefetch: false,
                io_hi16_zero: false,
                upper_mask: 0,
            }; NODE_BARS],
            probed: [false; NODE_BARS],
            cfg: [0; CFG_SIZE],
        }
    }

    fn read_u32(&self, off: usize) -> u32 {
        u32::from_le_bytes([
            self.cfg[off],
            self.cfg[off + 1],
            self.cfg[off + 2],
            self.cfg[off + 3],
        ])
    }

    fn write_u32(&mut self, off: usize, value: u32) {
        self.cfg[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn max_bars(&self) -> usize {
        if self.bridge {
            2
        } else {
            6
        }
    }

    /// Size mask a probe of `index` reports, or 0 for an unimplemented slot.
    fn probe_mask(&self, index: usize) -> u32 {
        if index >= self.max_bars() {
            return 0;
        }
        let bar = &self.bars[index];
        if bar.size > 0 {
            if bar.io {
                let mut mask = !(bar.size - 1) & 0xFFFF_FFFC;
                if bar.io_hi16_zero {
                    mask &= 0x0000_FFFF;
                }
                mask | 0x1
            } else {
                let mut mask = !(bar.size - 1) & 0xFFFF_FFF0;
                if bar.wide {
                    mask |= 0x4;
                }
                if bar.prefetch {
                    mask |= 0x8;
                }
                mask
            }
        } else if index > 0 && self.bars[index - 1].wide && self.bars[index - 1].size > 0 {
            // Upper half of a 64-bit pair.
            match self.bars[index - 1].upper_mask {
                0 => 0xFFFF_FFFF,
                mask => mask,
            }
        } else {
            0
        }
    }
}

struct Inner {
    nodes: [Node; MAX_NODES],
    count: usize,
}

/// A mock PCI tree implementing [`ConfigAccess`].
pub struct MockTopology {
    inner: RefCell<Inner>,
}

impl MockTopology {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                nodes: [Node::empty(); MAX_NODES],
                count: 0,
            }),
        }
    }

    fn add_node(
        &mut self,
        device: u8,
        function: u8,
        vendor: u16,
        device_id: u16,
        parent: Option<usize>,
        bridge: bool,
    ) -> usize {
        let inner = self.inner.get_mut();
        let index = inner.count;
        assert!(index < MAX_NODES, "mock topology full");
        if let Some(parent) = parent {
            assert!(parent < index && inner.nodes[parent].bridge, "bad parent");
        }
        inner.nodes[index] = Node {
            in_use: true,
            device,
            function,
            bridge,
            parent,
            vendor,
            device_id,
            ..Node::empty()
        };
        inner.count += 1;
        index
    }

    /// Add an endpoint; `parent` is a bridge index, `None` for the root bus.
    pub fn add_device(
        &mut self,
        device: u8,
        function: u8,
        vendor: u16,
        device_id: u16,
        parent: Option<usize>,
    ) -> usize {
        self.add_node(device, function, vendor, device_id, parent, false)
    }

    /// Add a PCI-to-PCI bridge.
    pub fn add_bridge(
        &mut self,
        device: u8,
        function: u8,
        vendor: u16,
        device_id: u16,
        parent: Option<usize>,
    ) -> usize {
        self.add_node(device, function, vendor, device_id, parent, true)
    }

    /// Configure one BAR slot of a node.
    pub fn set_bar(&mut self, node: usize, index: usize, spec: BarSpec) {
        assert!(spec.size == 0 || spec.size.is_power_of_two());
        assert!(!(spec.io && (spec.wide || spec.prefetch)));
        self.inner.get_mut().nodes[node].bars[index] = spec;
    }

    /// Initialize every node's config backing store from its identity.
    pub fn commit(&mut self) {
        let inner = self.inner.get_mut();
        for node in inner.nodes[..inner.count].iter_mut() {
            if !node.in_use {
                continue;
            }
            node.cfg = [0; CFG_SIZE];
            node.probed = [false; NODE_BARS];
            node.cfg[offset::VENDOR_ID as usize..][..2].copy_from_slice(&node.vendor.to_le_bytes());
            node.cfg[offset::DEVICE_ID as usize..][..2]
                .copy_from_slice(&node.device_id.to_le_bytes());
            node.cfg[offset::HEADER_TYPE as usize] = if node.bridge { 0x01 } else { 0x00 };
            if node.bridge {
                node.cfg[offset::CLASS_CODE as usize] = 0x06;
                node.cfg[offset::SUBCLASS as usize] = 0x04;
            }
        }
    }

    /// Mark a committed function as multifunction.
    pub fn set_multifunction(&mut self, node: usize) {
        self.inner.get_mut().nodes[node].cfg[offset::HEADER_TYPE as usize] |=
            HEADER_TYPE_MULTIFUNC;
    }

    /// Overwrite a config dword directly (test seeding, bypasses routing).
    pub fn seed_u32(&mut self, node: usize, off: u16, value: u32) {
        self.inner.get_mut().nodes[node].write_u32(off as usize, value);
    }

    /// Bus this node sits on: the parent bridge's secondary bus, or 0.
    pub fn node_bus(&self, node: usize) -> u8 {
        let inner = self.inner.borrow();
        Self::bus_of(&inner, node)
    }

    fn bus_of(inner: &Inner, node: usize) -> u8 {
        match inner.nodes[node].parent {
            None => 0,
            Some(parent) => inner.nodes[parent].cfg[offset::SECONDARY_BUS as usize],
        }
    }

    /// Walk the configured bridge registers from the root toward `target`.
    /// Mirrors how hardware routes type 1 configuration cycles.
    fn reachable(inner: &Inner, target: u8) -> bool {
        if target == 0 {
            return true;
        }
        let mut current = 0u8;
        while current != target {
            let mut advanced = false;
            for index in 0..inner.count {
                let node = &inner.nodes[index];
                if !node.in_use || !node.bridge {
                    continue;
                }
                if Self::bus_of(inner, index) != current {
                    continue;
                }
                let secondary = node.cfg[offset::SECONDARY_BUS as usize];
                let subordinate = node.cfg[offset::SUBORDINATE_BUS as usize];
                if secondary == 0 {
                    continue; // bridge not configured yet
                }
                if secondary <= target && target <= subordinate {
                    assert!(secondary > current, "bridge routes backwards");
                    current = secondary;
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                return false;
            }
        }
        true
    }

    fn find_node(inner: &Inner, df: DeviceFunction) -> Option<usize> {
        if !Self::reachable(inner, df.bus) {
            return None;
        }
        (0..inner.count).find(|&index| {
            let node = &inner.nodes[index];
            node.in_use
                && node.device == df.device
                && node.function == df.function
                && match node.parent {
                    None => df.bus == 0,
                    Some(_) => df.bus > 0 && Self::bus_of(inner, index) == df.bus,
                }
        })
    }
}

impl ConfigAccess for MockTopology {
    fn read32(&self, df: DeviceFunction, off: u16) -> u32 {
        let inner = self.inner.borrow();
        let off = off as usize;
        let Some(index) = Self::find_node(&inner, df) else {
            return 0xFFFF_FFFF;
        };
        if off + 4 > CFG_SIZE {
            return 0xFFFF_FFFF;
        }
        inner.nodes[index].read_u32(off)
    }

    fn write32(&self, df: DeviceFunction, off: u16, value: u32) {
        let mut inner = self.inner.borrow_mut();
        let off = off as usize;
        let Some(index) = Self::find_node(&inner, df) else {
            return; // write to the void
        };
        if off + 4 > CFG_SIZE {
            return;
        }
        let bar_base = offset::BAR0 as usize;
        let node = &mut inner.nodes[index];
        let bar_span = node.max_bars() * 4;
        let in_bar_range = off >= bar_base && off < bar_base + bar_span;

        if value == BAR_PROBE && in_bar_range {
            let bar = (off - bar_base) / 4;
            node.probed[bar] = true;

            // Lower half of a 64-bit pair: the full size mask only appears
            // once the upper half is in probe mode too. Until then the read
            // back value carries the type bits alone, size portion zero.
            if node.bars[bar].wide
                && node.bars[bar].size > 0
                && (bar + 1 >= NODE_BARS || !node.probed[bar + 1])
            {
                let mut type_bits = 0x4;
                if node.bars[bar].prefetch {
                    type_bits |= 0x8;
                }
                node.write_u32(off, type_bits);
                return;
            }

            // Upper half: latch its own mask and, if the lower half was
            // probed too early, repair it with the full mask.
            if bar > 0 && node.bars[bar - 1].wide && node.bars[bar - 1].size > 0 {
                let mask = node.probe_mask(bar);
                node.write_u32(off, mask);
                if node.probed[bar - 1] {
                    let low_mask = node.probe_mask(bar - 1);
                    node.write_u32(bar_base + (bar - 1) * 4, low_mask);
                }
                return;
            }

            let mask = node.probe_mask(bar);
            node.write_u32(off, mask);
            return;
        }

        // A normal write takes a BAR slot out of probe mode.
        if in_bar_range {
            node.probed[(off - bar_base) / 4] = false;
        }
        node.write_u32(off, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_mask_values() {
        let mut topo = MockTopology::new();
        let dev = topo.add_device(0, 0, 0x1234, 0x5678, None);
        topo.set_bar(dev, 0, BarSpec::mmio(0x1_0000));
        topo.set_bar(dev, 2, BarSpec::mmio64_prefetch(0x10_0000));
        topo.set_bar(dev, 4, BarSpec::io(256));
        topo.commit();

        let inner = topo.inner.borrow();
        let node = &inner.nodes[dev];
        assert_eq!(node.probe_mask(0), 0xFFFF_0000);
        assert_eq!(node.probe_mask(2), 0xFFF0_000C);
        assert_eq!(node.probe_mask(3), 0xFFFF_FFFF); // upper half
        assert_eq!(node.probe_mask(4), 0xFFFF_FF01);
        assert_eq!(node.probe_mask(1), 0); // unimplemented
        assert_eq!(node.probe_mask(6), 0); // out of range
    }

    #[test]
    fn probe_and_reprogram_round_trip() {
        let mut topo = MockTopology::new();
        let dev = topo.add_device(3, 0, 0xAAAA, 0xBBBB, None);
        topo.set_bar(dev, 0, BarSpec::mmio(0x1_0000));
        topo.commit();

        let df = DeviceFunction::new(0, 3, 0);
        topo.write32(df, offset::BAR0, BAR_PROBE);
        assert_eq!(topo.read32(df, offset::BAR0), 0xFFFF_0000);

        topo.write32(df, offset::BAR0, 0x8001_0000);
        assert_eq!(topo.read32(df, offset::BAR0), 0x8001_0000);

        // Unimplemented slot probes as zero.
        topo.write32(df, offset::BAR0 + 4, BAR_PROBE);
        assert_eq!(topo.read32(df, offset::BAR0 + 4), 0);
    }

    #[test]
    fn wide_bar_low_half_hides_size_until_upper_probed() {
        let mut topo = MockTopology::new();
        let dev = topo.add_device(0, 0, 0x1234, 0x5678, None);
        topo.set_bar(dev, 0, BarSpec::mmio64_prefetch(0x10_0000));
        topo.commit();

        let df = DeviceFunction::new(0, 0, 0);

        // Low half first: type bits only.
        topo.write32(df, offset::BAR0, BAR_PROBE);
        assert_eq!(topo.read32(df, offset::BAR0), 0xC);

        // After the upper half goes into probe mode the low half repairs.
        topo.write32(df, offset::BAR0 + 4, BAR_PROBE);
        assert_eq!(topo.read32(df, offset::BAR0 + 4), 0xFFFF_FFFF);
        assert_eq!(topo.read32(df, offset::BAR0), 0xFFF0_000C);
    }

    #[test]
    fn unreachable_until_bridge_configured() {
        let mut topo = MockTopology::new();
        let bridge = topo.add_bridge(1, 0, 0x1111, 0x2222, None);
        let leaf = topo.add_device(0, 0, 0x3333, 0x4444, Some(bridge));
        topo.commit();

        let behind = DeviceFunction::new(1, 0, 0);
        assert_eq!(topo.read32(behind, offset::VENDOR_ID), 0xFFFF_FFFF);

        // Configure the bridge: primary 0, secondary 1, subordinate 1.
        topo.seed_u32(bridge, offset::PRIMARY_BUS & !0x3, 0x0001_0100);
        assert_eq!(topo.read32(behind, offset::VENDOR_ID), 0x4444_3333);
        assert_eq!(topo.node_bus(leaf), 1);

        // Bus 2 stays out of range.
        assert_eq!(
            topo.read32(DeviceFunction::new(2, 0, 0), offset::VENDOR_ID),
            0xFFFF_FFFF
        );
    }

    #[test]
    fn nested_routing_follows_subordinate_ranges() {
        let mut topo = MockTopology::new();
        let bridge_a = topo.add_bridge(0, 0, 0x1111, 0x2222, None);
        let bridge_b = topo.add_bridge(0, 0, 0x3333, 0x4444, Some(bridge_a));
        let _leaf = topo.add_device(0, 0, 0x5555, 0x6666, Some(bridge_b));
        topo.commit();

        // A: primary 0, secondary 1, subordinate 2; B: 1/2/2.
        topo.seed_u32(bridge_a, 0x18, 0x0002_0100);
        topo.seed_u32(bridge_b, 0x18, 0x0002_0201);

        let deep = DeviceFunction::new(2, 0, 0);
        assert_eq!(topo.read32(deep, offset::VENDOR_ID), 0x6666_5555);

        // Shrink A's subordinate range: bus 2 becomes unreachable.
        topo.seed_u32(bridge_a, 0x18, 0x0001_0100);
        assert_eq!(topo.read32(deep, offset::VENDOR_ID), 0xFFFF_FFFF);

        // Restore A, deconfigure B.
        topo.seed_u32(bridge_a, 0x18, 0x0002_0100);
        topo.seed_u32(bridge_b, 0x18, 0x0002_0001);
        assert_eq!(topo.read32(deep, offset::VENDOR_ID), 0xFFFF_FFFF);
    }
}
