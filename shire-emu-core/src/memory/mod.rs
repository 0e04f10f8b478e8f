//! Physical memory: a flat router dispatching accesses to a sorted list of disjoint regions.
//!
//! Dense (RAM/ROM), PLIC, and timer regions are handled locally. ESR-space accesses are routed
//! back to the caller ([`Routed::Esr`]), because ESR reads and writes have side effects that
//! reach across the whole system and cannot be resolved inside the router.

pub mod dense;
pub mod plic;
pub mod timer;

use crate::address_map::AddressMap;
use crate::pma::{erbium_map, map};
use crate::topology::{self, SHIRE_COUNT};
use crate::trap::MemoryError;
use crate::{address_range, AddressRange};
use dense::DenseRegion;
use plic::Plic;
use timer::RvTimer;

/// Bytes of L2 scratchpad backed per shire.
pub const L2_SCP_SHIRE_SPAN: u64 = 1 << 20;

/// Which PLIC instance a routed access touched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlicId {
    Pu,
    Spio,
}

/// One physical region.
#[derive(Debug)]
pub enum Region {
    Dense(DenseRegion),
    /// ESR space; accesses are bounced back to the system for decode and dispatch.
    Sysreg,
    Plic(PlicId, Plic),
    Timer(RvTimer),
}

/// Outcome of a routed access: either the router completed it, or the caller must finish it
/// (and possibly refresh derived interrupt state).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Routed {
    Done,
    /// The access targets ESR space; the router did not touch it.
    Esr,
    /// The access completed against a PLIC; external-interrupt lines may have changed.
    Plic(PlicId),
    /// The access completed against the timer; timer-interrupt lines may have changed.
    Timer,
}

/// The flat physical router.
#[derive(Debug)]
pub struct MainMemory {
    regions: AddressMap<Region>,
}

impl MainMemory {
    /// Builds the full-chip memory map. `dram_size` must be a power of two; the PMA layer
    /// guarantees DRAM offsets arrive already truncated below it.
    pub fn new_soc(dram_size: u64) -> Self {
        assert!(dram_size.is_power_of_two());
        let mut regions = vec![
            (
                address_range![map::SP_ROM_BASE, map::SP_ROM_BASE + map::SP_ROM_SIZE - 1],
                Region::Dense(DenseRegion::rom(map::SP_ROM_SIZE as usize)),
            ),
            (
                address_range![map::SP_RAM_BASE, map::SP_RAM_BASE + map::SP_RAM_SIZE - 1],
                Region::Dense(DenseRegion::ram(map::SP_RAM_SIZE as usize)),
            ),
            (
                address_range![map::PU_PLIC_BASE, map::PU_PLIC_BASE + map::PLIC_SIZE - 1],
                Region::Plic(PlicId::Pu, Plic::new()),
            ),
            (
                address_range![map::SPIO_PLIC_BASE, map::SPIO_PLIC_BASE + map::PLIC_SIZE - 1],
                Region::Plic(PlicId::Spio, Plic::new()),
            ),
            (
                address_range![map::TIMER_BASE, map::TIMER_BASE + map::TIMER_SIZE - 1],
                Region::Timer(RvTimer::new()),
            ),
            (
                address_range![map::IO_BASE, map::IO_BASE + map::IO_SIZE - 1],
                Region::Dense(DenseRegion::ram(0x1_0000)),
            ),
            (
                address_range![map::ESR_BASE, map::ESR_BASE + map::ESR_SIZE - 1],
                Region::Sysreg,
            ),
            (
                address_range![map::DRAM_BASE, map::DRAM_BASE + dram_size - 1],
                Region::Dense(DenseRegion::ram(dram_size as usize)),
            ),
        ];
        // One scratchpad slab per shire, at its id's slot in the window.
        for index in 0..SHIRE_COUNT {
            if index == topology::IO_SHIRE_SP {
                continue;
            }
            let id = topology::shire_index_to_id(index) as u64;
            let base = map::L2_SCP_BASE | id << map::L2_SCP_SHIRE_SHIFT;
            regions.push((
                address_range![base, base + L2_SCP_SHIRE_SPAN - 1],
                Region::Dense(DenseRegion::ram(L2_SCP_SHIRE_SPAN as usize)),
            ));
        }
        Self {
            regions: AddressMap::try_from(regions).unwrap(),
        }
    }

    /// Builds the Erbium memory map.
    pub fn new_erbium() -> Self {
        use erbium_map as m;
        let regions = vec![
            (
                address_range![m::BOOTROM_BASE, m::BOOTROM_BASE + m::BOOTROM_SIZE - 1],
                Region::Dense(DenseRegion::rom(m::BOOTROM_SIZE as usize)),
            ),
            (
                address_range![m::ESR_BASE, m::ESR_BASE + m::ESR_SIZE - 1],
                Region::Sysreg,
            ),
            (
                address_range![m::PLIC_BASE, m::PLIC_BASE + m::PLIC_SIZE - 1],
                Region::Plic(PlicId::Pu, Plic::new()),
            ),
            (
                address_range![m::SRAM_BASE, m::SRAM_BASE + m::SRAM_SIZE - 1],
                Region::Dense(DenseRegion::ram(m::SRAM_SIZE as usize)),
            ),
            (
                address_range![m::MRAM_BASE, m::MRAM_BASE + m::MRAM_SIZE - 1],
                Region::Dense(DenseRegion::ram(m::MRAM_SIZE as usize)),
            ),
        ];
        Self {
            regions: AddressMap::try_from(regions).unwrap(),
        }
    }

    fn region_at(&mut self, paddr: u64, size: usize) -> Result<(u64, &mut Region), MemoryError> {
        // Split borrow via an explicit range probe: find the range first, then re-borrow.
        let range = match self.regions.range_value(paddr) {
            Some((range, _)) if range.contains_access(paddr, size as u64) => range,
            _ => return Err(MemoryError(paddr)),
        };
        let offset = range.offset_of(paddr);
        let region = self.regions.value_mut(paddr).unwrap();
        Ok((offset, region))
    }

    /// Routes a read of `buf.len()` bytes at `paddr`.
    pub fn read(&mut self, paddr: u64, buf: &mut [u8]) -> Result<Routed, MemoryError> {
        let (offset, region) = self.region_at(paddr, buf.len())?;
        match region {
            Region::Dense(dense) => dense.read(offset, buf).map(|()| Routed::Done),
            Region::Sysreg => Ok(Routed::Esr),
            Region::Plic(id, plic) => {
                let id = *id;
                plic.read(offset, buf).map(|()| Routed::Plic(id))
            }
            Region::Timer(timer) => timer.read(offset, buf).map(|()| Routed::Timer),
        }
    }

    /// Routes a write of `buf` at `paddr`.
    pub fn write(&mut self, paddr: u64, buf: &[u8]) -> Result<Routed, MemoryError> {
        let (offset, region) = self.region_at(paddr, buf.len())?;
        match region {
            Region::Dense(dense) => dense.write(offset, buf).map(|()| Routed::Done),
            Region::Sysreg => Ok(Routed::Esr),
            Region::Plic(id, plic) => {
                let id = *id;
                plic.write(offset, buf).map(|()| Routed::Plic(id))
            }
            Region::Timer(timer) => timer.write(offset, buf).map(|()| Routed::Timer),
        }
    }

    /// Loader-context write: reaches ROM, never devices.
    pub fn init(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let (offset, region) = self.region_at(paddr, buf.len())?;
        match region {
            Region::Dense(dense) => dense.init(offset, buf),
            _ => Err(MemoryError(paddr)),
        }
    }

    /// Access to a PLIC instance for source injection and interrupt-line queries.
    pub fn plic_mut(&mut self, id: PlicId) -> &mut Plic {
        let base = match id {
            PlicId::Pu => map::PU_PLIC_BASE,
            PlicId::Spio => map::SPIO_PLIC_BASE,
        };
        let has_plic_at_base = matches!(self.regions.value(base), Some(Region::Plic(_, _)));
        if has_plic_at_base {
            match self.regions.value_mut(base) {
                Some(Region::Plic(_, plic)) => plic,
                _ => unreachable!(),
            }
        } else {
            // The Erbium map carries its single PLIC under the Pu id.
            match self.regions.value_mut(erbium_map::PLIC_BASE) {
                Some(Region::Plic(_, plic)) => plic,
                _ => panic!("memory map has no PLIC"),
            }
        }
    }

    /// Access to the timer for ticking and interrupt-line queries.
    pub fn timer_mut(&mut self) -> &mut RvTimer {
        match self.regions.value_mut(map::TIMER_BASE) {
            Some(Region::Timer(timer)) => timer,
            _ => panic!("memory map has no timer"),
        }
    }

    pub fn timer(&self) -> &RvTimer {
        match self.regions.value(map::TIMER_BASE) {
            Some(Region::Timer(timer)) => timer,
            _ => panic!("memory map has no timer"),
        }
    }

    /// The address range backing `paddr`, for diagnostics.
    pub fn range_of(&self, paddr: u64) -> Option<AddressRange> {
        self.regions.range_value(paddr).map(|(range, _)| range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_dense() {
        let mut memory = MainMemory::new_soc(1 << 20);
        let addr = map::DRAM_BASE + 0x40;
        assert_eq!(
            Routed::Done,
            memory.write(addr, &[1, 2, 3, 4]).unwrap()
        );
        let mut buf = [0; 4];
        assert_eq!(Routed::Done, memory.read(addr, &mut buf).unwrap());
        assert_eq!([1, 2, 3, 4], buf);
    }

    #[test]
    fn test_routes_esr_back_to_caller() {
        let mut memory = MainMemory::new_soc(1 << 20);
        let mut buf = [0; 8];
        assert_eq!(
            Routed::Esr,
            memory.read(map::ESR_BASE + 0x100, &mut buf).unwrap()
        );
    }

    #[test]
    fn test_unmapped_is_memory_error() {
        let mut memory = MainMemory::new_soc(1 << 20);
        let mut buf = [0; 4];
        assert!(memory.read(0x2000_0000, &mut buf).is_err());
        // Access crossing the end of a region is rejected.
        let end = map::DRAM_BASE + (1 << 20) - 2;
        assert!(memory.read(end, &mut [0; 4]).is_err());
    }

    #[test]
    fn test_init_reaches_rom() {
        let mut memory = MainMemory::new_soc(1 << 20);
        assert!(memory.write(map::SP_ROM_BASE, &[1]).is_err());
        memory.init(map::SP_ROM_BASE, &[1]).unwrap();
        let mut buf = [0];
        memory.read(map::SP_ROM_BASE, &mut buf).unwrap();
        assert_eq!([1], buf);
    }

    #[test]
    fn test_scratchpad_slabs_per_shire() {
        let mut memory = MainMemory::new_soc(1 << 20);
        let shire2 = map::L2_SCP_BASE | 2 << map::L2_SCP_SHIRE_SHIFT;
        memory.write(shire2 + 0x80, &[9]).unwrap();
        let mut buf = [0];
        memory.read(shire2 + 0x80, &mut buf).unwrap();
        assert_eq!([9], buf);
        // Different shire, different slab.
        let shire3 = map::L2_SCP_BASE | 3 << map::L2_SCP_SHIRE_SHIFT;
        memory.read(shire3 + 0x80, &mut buf).unwrap();
        assert_eq!([0], buf);
    }
}
