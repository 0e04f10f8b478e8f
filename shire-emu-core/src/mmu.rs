//! Virtual memory: the Sv39/Sv48 page-table walker and the typed memory accessors used by
//! instruction handlers.
//!
//! Every access translates through the active translation base (`matp` in effective M-mode,
//! `satp` otherwise), passes the PMA checker (which may rewrite the physical address), and
//! finally routes through main memory. Accesses that cross a page boundary are split and each
//! part translated separately.

use crate::observer::Observer;
use crate::hart::{FETCH_LINE, VLENB};
use crate::pma::{AccessClass, AccessType, PmaRequest};
use crate::system::System;
use crate::topology::HartIndex;
use crate::trap::Exception;
use crate::{Agent, Alignment, PrivilegeLevel};
use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use log::{debug, trace};
use thiserror::Error;

/// Page size is 4 KiB at every level.
const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
/// PTEs are 8 bytes.
const PTE_SHIFT: u32 = 3;

/// Translation modes, as encoded in the top four bits of `satp`/`matp`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AtpMode {
    Bare,
    Sv39,
    Sv48,
}

impl AtpMode {
    pub fn from_atp(atp: u64) -> Option<Self> {
        match atp >> 60 {
            0 => Some(Self::Bare),
            8 => Some(Self::Sv39),
            9 => Some(Self::Sv48),
            _ => None,
        }
    }

    /// Index widths per level, root first. The root index is widened beyond the standard nine
    /// bits so both modes span a 56-bit virtual space.
    fn index_widths(self) -> &'static [u32] {
        match self {
            Self::Bare => &[],
            Self::Sv39 => &[26, 9, 9],
            Self::Sv48 => &[17, 9, 9, 9],
        }
    }
}

/// The lock bit of `matp`: once set, further `matp` writes are ignored.
pub const MATP_LOCK: u64 = 1 << 59;

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    MisalignedAccess,
    #[error("access fault")]
    AccessFault,
    #[error("page fault")]
    PageFault,
    /// A physical bus error on an otherwise-permitted access; delivered as the asynchronous
    /// bus-error interrupt by some tensor paths and as an access fault elsewhere.
    #[error("bus error")]
    BusError,
}

impl MemoryError {
    /// Maps this error to the architectural exception for an access of `access` type at
    /// `vaddr`.
    pub fn to_exception(self, access: AccessType, vaddr: u64) -> Exception {
        match (self, access) {
            (MemoryError::MisalignedAccess, AccessType::Read) => {
                Exception::LoadAddressMisaligned(vaddr)
            }
            (MemoryError::MisalignedAccess, AccessType::Write) => {
                Exception::StoreOrAmoAddressMisaligned(vaddr)
            }
            (MemoryError::MisalignedAccess, AccessType::Execute) => {
                Exception::InstructionAddressMisaligned(vaddr)
            }
            (MemoryError::PageFault, AccessType::Read) => Exception::LoadPageFault(vaddr),
            (MemoryError::PageFault, AccessType::Write) => Exception::StoreOrAmoPageFault(vaddr),
            (MemoryError::PageFault, AccessType::Execute) => Exception::InstructionPageFault(vaddr),
            (_, AccessType::Read) => Exception::LoadAccessFault(vaddr),
            (_, AccessType::Write) => Exception::StoreOrAmoAccessFault(vaddr),
            (_, AccessType::Execute) => Exception::InstructionAccessFault(vaddr),
        }
    }
}

mod pte {
    pub const V: usize = 0;
    pub const R: usize = 1;
    pub const W: usize = 2;
    pub const X: usize = 3;
    pub const U: usize = 4;
    pub const A: usize = 6;
    pub const D: usize = 7;
    pub const PPN_RANGE: std::ops::Range<usize> = 10..54;
}

/// Access wrapper around the system to address memory from one hart's point of view.
///
/// This takes into account the hart's (effective) privilege level, its translation bases, the
/// PMA rules of its neighborhood, and the fetch line cache.
pub struct Mmu<'s> {
    system: &'s mut System,
    hart: HartIndex,
}

macro_rules! scalar_access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Typed scalar load. Misaligned addresses are legal and may split across pages.
            pub fn $read_fn(&mut self, vaddr: u64) -> Result<$u, MemoryError> {
                trace!("{} reading {} at vaddr {vaddr:#x}", self.hart, stringify!($u));
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read_bytes(vaddr, &mut buf, AccessClass::Scalar)?;
                let value = $u::from_le_bytes(buf);
                self.system
                    .observer
                    .mem_read(self.hart, vaddr, vaddr, buf.len() as u64, value as u64);
                Ok(value)
            }

            /// Typed scalar store. Misaligned addresses are legal and may split across pages.
            pub fn $write_fn(&mut self, vaddr: u64, value: $u) -> Result<(), MemoryError> {
                trace!(value = value as u64; "{} writing {} at vaddr {vaddr:#x}", self.hart, stringify!($u));
                let buf = value.to_le_bytes();
                self.write_bytes(vaddr, &buf, AccessClass::Scalar)?;
                self.system
                    .observer
                    .mem_write(self.hart, vaddr, vaddr, buf.len() as u64, value as u64);
                Ok(())
            }
        )*
    };
}

impl<'s> Mmu<'s> {
    pub fn new(system: &'s mut System, hart: HartIndex) -> Self {
        Self { system, hart }
    }

    scalar_access_fns! {
        load8, store8 => u8,
        load16, store16 => u16,
        load32, store32 => u32,
        load64, store64 => u64,
    }

    /// Translates `vaddr` for an `access` of the given class, returning the physical address.
    ///
    /// Exposed for address-inspection paths (tensor row loops, cacheop checks); data accessors
    /// call it internally.
    pub fn translate(
        &mut self,
        vaddr: u64,
        access: AccessType,
        class: AccessClass,
        size: u64,
    ) -> Result<u64, MemoryError> {
        let privilege = match access {
            AccessType::Execute => self.system.hart(self.hart).prv,
            _ => self.system.hart(self.hart).effective_privilege(),
        };
        let core = self.system.core(self.hart);
        let atp = match privilege {
            PrivilegeLevel::Machine => core.matp,
            _ => core.satp,
        };
        let mode = AtpMode::from_atp(atp).unwrap_or(AtpMode::Bare);
        let paddr = match mode {
            AtpMode::Bare => vaddr & crate::pma::map::PA_MASK,
            _ => self.walk(vaddr, atp, mode, access, privilege)?,
        };
        self.pma_check(vaddr, paddr, size, access, class, privilege)
    }

    fn pma_check(
        &mut self,
        vaddr: u64,
        paddr: u64,
        size: u64,
        access: AccessType,
        class: AccessClass,
        privilege: PrivilegeLevel,
    ) -> Result<u64, MemoryError> {
        let request = PmaRequest {
            agent: Agent::Hart(self.hart),
            privilege,
            vaddr,
            paddr,
            size,
            access,
            class,
        };
        let mprot = self.system.mprot_view_of(self.hart);
        self.system
            .pma
            .check(&request, &mprot)
            .map_err(|_| MemoryError::AccessFault)
    }

    /// The Sv39/Sv48 walk.
    fn walk(
        &mut self,
        vaddr: u64,
        atp: u64,
        mode: AtpMode,
        access: AccessType,
        privilege: PrivilegeLevel,
    ) -> Result<u64, MemoryError> {
        let widths = mode.index_widths();
        let levels = widths.len();
        let mstatus = self.system.hart(self.hart).mstatus;
        let mut table = (atp & 0xFFF_FFFF_FFFF) << PAGE_SHIFT;
        // Low-to-high bit offset of each level's index within the virtual address.
        let mut shifts = [0u32; 4];
        {
            let mut shift = PAGE_SHIFT;
            for level in (0..levels).rev() {
                shifts[level] = shift;
                shift += widths[level];
            }
        }
        for level in 0..levels {
            let index = (vaddr >> shifts[level]) & ((1 << widths[level]) - 1);
            let entry_address = table + (index << PTE_SHIFT);
            let entry = self.read_pte(entry_address, privilege)?;
            let bits = entry.view_bits::<Lsb0>();
            if !bits[pte::V] || (!bits[pte::R] && bits[pte::W]) {
                debug!(vaddr, entry_address, entry; "page fault: invalid pte");
                return Err(MemoryError::PageFault);
            }
            if !bits[pte::R] && !bits[pte::X] {
                // Pointer to the next level; at the last level this is a fault.
                if level == levels - 1 {
                    return Err(MemoryError::PageFault);
                }
                table = bits[pte::PPN_RANGE].load_le::<u64>() << PAGE_SHIFT;
                continue;
            }
            // Leaf. Permission checks first.
            let user_page = bits[pte::U];
            let allowed = match access {
                AccessType::Read => bits[pte::R] || (bits[pte::X] && mstatus.mxr()),
                AccessType::Write => bits[pte::W],
                AccessType::Execute => bits[pte::X],
            };
            let privilege_ok = match (privilege, access) {
                (PrivilegeLevel::User, _) => user_page,
                (_, AccessType::Execute) => !user_page,
                (PrivilegeLevel::Supervisor, _) => !user_page || mstatus.sum(),
                (PrivilegeLevel::Machine, _) => !user_page || mstatus.sum(),
            };
            if !allowed || !privilege_ok {
                debug!(vaddr, entry, access:%; "page fault: permission");
                return Err(MemoryError::PageFault);
            }
            let ppn = bits[pte::PPN_RANGE].load_le::<u64>();
            // Superpages must be aligned to their span.
            let span_shift = shifts[level] - PAGE_SHIFT;
            if ppn & ((1 << span_shift) - 1) != 0 {
                debug!(vaddr, entry; "page fault: misaligned superpage");
                return Err(MemoryError::PageFault);
            }
            // A/D are never updated by the walker; their absence faults.
            if !bits[pte::A] || (access == AccessType::Write && !bits[pte::D]) {
                debug!(vaddr, entry, access:%; "page fault: A/D clear");
                return Err(MemoryError::PageFault);
            }
            let span_mask = (1u64 << shifts[level]) - 1;
            return Ok((ppn << PAGE_SHIFT) & !span_mask | vaddr & span_mask);
        }
        // Both supported modes have at least one level, and every level either continues,
        // faults, or returns a leaf.
        unreachable!()
    }

    fn read_pte(&mut self, entry_address: u64, privilege: PrivilegeLevel) -> Result<u64, MemoryError> {
        let paddr = self.pma_check(
            entry_address,
            entry_address,
            8,
            AccessType::Read,
            AccessClass::Ptw,
            privilege,
        )?;
        let mut buf = [0u8; 8];
        self.system
            .phys_read(Agent::Hart(self.hart), paddr, &mut buf)
            .map_err(|_| MemoryError::AccessFault)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads `buf.len()` bytes at `vaddr`, splitting at page boundaries.
    pub fn read_bytes(
        &mut self,
        vaddr: u64,
        buf: &mut [u8],
        class: AccessClass,
    ) -> Result<(), MemoryError> {
        let mut offset = 0usize;
        while offset < buf.len() {
            let address = vaddr + offset as u64;
            let chunk = chunk_len(address, buf.len() - offset);
            let paddr = self.translate(address, AccessType::Read, class, chunk as u64)?;
            self.system
                .phys_read(Agent::Hart(self.hart), paddr, &mut buf[offset..offset + chunk])
                .map_err(|_| MemoryError::BusError)?;
            offset += chunk;
        }
        Ok(())
    }

    /// Writes `buf` at `vaddr`, splitting at page boundaries.
    pub fn write_bytes(
        &mut self,
        vaddr: u64,
        buf: &[u8],
        class: AccessClass,
    ) -> Result<(), MemoryError> {
        // Translate every page first so a fault in the second half does not leave a torn
        // partial store.
        let mut offset = 0usize;
        let mut parts: Vec<(u64, usize, usize)> = Vec::new();
        while offset < buf.len() {
            let address = vaddr + offset as u64;
            let chunk = chunk_len(address, buf.len() - offset);
            let paddr = self.translate(address, AccessType::Write, class, chunk as u64)?;
            parts.push((paddr, offset, chunk));
            offset += chunk;
        }
        for (paddr, offset, chunk) in parts {
            self.system
                .phys_write(Agent::Hart(self.hart), paddr, &buf[offset..offset + chunk])
                .map_err(|_| MemoryError::BusError)?;
        }
        Ok(())
    }

    /// Full-vector load, masked by `mask` (one bit per byte lane). Masked-off lanes are left
    /// untouched in the returned buffer. Handles the line-crossing cases by splitting at page
    /// boundaries like any other access.
    pub fn load_vector(&mut self, vaddr: u64, mask: u32) -> Result<[u8; VLENB], MemoryError> {
        let mut buf = [0u8; VLENB];
        if mask == u32::MAX {
            self.read_bytes(vaddr, &mut buf, AccessClass::Vector)?;
        } else {
            for lane in mask_runs(mask) {
                let mut chunk = [0u8; VLENB];
                let part = &mut chunk[..lane.len()];
                self.read_bytes(vaddr + lane.start as u64, part, AccessClass::Vector)?;
                buf[lane.clone()].copy_from_slice(part);
            }
        }
        self.system
            .observer
            .mem_read(self.hart, vaddr, vaddr, VLENB as u64, 0);
        Ok(buf)
    }

    /// Full-vector store, masked by `mask` (one bit per byte lane).
    pub fn store_vector(
        &mut self,
        vaddr: u64,
        data: &[u8; VLENB],
        mask: u32,
    ) -> Result<(), MemoryError> {
        if mask == u32::MAX {
            self.write_bytes(vaddr, data, AccessClass::Vector)?;
        } else {
            for lane in mask_runs(mask) {
                self.write_bytes(
                    vaddr + lane.start as u64,
                    &data[lane],
                    AccessClass::Vector,
                )?;
            }
        }
        self.system
            .observer
            .mem_write(self.hart, vaddr, vaddr, VLENB as u64, 0);
        Ok(())
    }

    /// Tensor-width load (16/32/64 bytes), naturally aligned by contract.
    pub fn load_tensor(&mut self, vaddr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        debug_assert!(matches!(buf.len(), 16 | 32 | 64));
        self.read_bytes(vaddr, buf, AccessClass::Tensor)
    }

    /// Tensor-width store (16/32/64 bytes), naturally aligned by contract.
    pub fn store_tensor(&mut self, vaddr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        debug_assert!(matches!(buf.len(), 16 | 32 | 64));
        self.write_bytes(vaddr, buf, AccessClass::Tensor)
    }

    /// Atomic read-modify-write of a naturally-aligned 32- or 64-bit location. `global`
    /// selects the far-atomic path, which is also legal on scratchpad space.
    pub fn amo<F: FnOnce(u64) -> u64>(
        &mut self,
        vaddr: u64,
        size: u64,
        global: bool,
        op: F,
    ) -> Result<u64, MemoryError> {
        if !Alignment::natural_for_size(size)
            .map(|alignment| alignment.is_aligned(vaddr))
            .unwrap_or(false)
        {
            return Err(MemoryError::MisalignedAccess);
        }
        let class = if global {
            AccessClass::AtomicGlobal
        } else {
            AccessClass::AtomicLocal
        };
        // One translation with write intent covers both halves of the RMW.
        let paddr = self.translate(vaddr, AccessType::Write, class, size)?;
        let mut buf = [0u8; 8];
        self.system
            .phys_read(Agent::Hart(self.hart), paddr, &mut buf[..size as usize])
            .map_err(|_| MemoryError::BusError)?;
        let old = u64::from_le_bytes(buf);
        let old = if size == 4 { old as u32 as u64 } else { old };
        let new = op(old);
        self.system
            .phys_write(Agent::Hart(self.hart), paddr, &new.to_le_bytes()[..size as usize])
            .map_err(|_| MemoryError::BusError)?;
        self.system.observer.mem_read_write(self.hart, vaddr, old, new);
        Ok(old)
    }

    /// Compare-exchange of a naturally-aligned 32- or 64-bit location. Returns the observed
    /// value; the store happens only on match.
    pub fn compare_exchange(
        &mut self,
        vaddr: u64,
        size: u64,
        expected: u64,
        desired: u64,
    ) -> Result<u64, MemoryError> {
        self.amo(vaddr, size, true, |old| {
            if old == expected {
                desired
            } else {
                old
            }
        })
    }

    /// `true` if a cache-maintenance operation may target `vaddr`.
    pub fn check_cacheop(&mut self, vaddr: u64) -> bool {
        self.translate(vaddr, AccessType::Read, AccessClass::CacheOp, 64)
            .is_ok()
    }

    /// Fetches the 16-bit parcel at `pc`, going through the fetch line cache.
    pub fn fetch_parcel(&mut self, pc: u64) -> Result<u16, MemoryError> {
        if pc & 0b1 != 0 {
            return Err(MemoryError::MisalignedAccess);
        }
        let line_offset = (pc as usize) & (FETCH_LINE - 1);
        if let Some(line) = self.system.hart(self.hart).fetch_cache.lookup(pc) {
            let value = u16::from_le_bytes([line[line_offset], line[line_offset + 1]]);
            return Ok(value);
        }
        let line_vaddr = pc & !(FETCH_LINE as u64 - 1);
        let paddr = self.translate(
            line_vaddr,
            AccessType::Execute,
            AccessClass::Scalar,
            FETCH_LINE as u64,
        )?;
        let mut line = [0u8; FETCH_LINE];
        self.system
            .phys_read(Agent::Hart(self.hart), paddr, &mut line)
            .map_err(|_| MemoryError::AccessFault)?;
        self.system
            .hart_mut(self.hart)
            .fetch_cache
            .fill(pc, line);
        Ok(u16::from_le_bytes([line[line_offset], line[line_offset + 1]]))
    }
}

/// Longest run length that stays within `vaddr`'s page.
fn chunk_len(vaddr: u64, remaining: usize) -> usize {
    let to_page_end = (PAGE_SIZE - (vaddr & (PAGE_SIZE - 1))) as usize;
    remaining.min(to_page_end)
}

/// Iterates the contiguous runs of set bits in a byte-lane mask.
fn mask_runs(mask: u32) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for lane in 0..=VLENB {
        let set = lane < VLENB && mask & (1 << lane) != 0;
        match (set, start) {
            (true, None) => start = Some(lane),
            (false, Some(s)) => {
                runs.push(s..lane);
                start = None;
            }
            _ => {}
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pma::map;
    use crate::system::{SocConfig, System};

    const DRAM: u64 = map::DRAM_BASE;

    fn test_system() -> System {
        let mut system = System::new(SocConfig {
            dram_size: 1 << 24,
            ..SocConfig::default()
        });
        system.config_simulated_harts(0, 0x1, true, true);
        system.cold_reset();
        system
    }

    fn hart() -> HartIndex {
        HartIndex::new(0, 0, 0)
    }

    /// Builds a two-level Sv39 mapping of one 4 KiB page at `vaddr -> paddr` with full RWXAD
    /// permissions, rooted at `root`.
    fn map_page(system: &mut System, root: u64, vaddr: u64, paddr: u64, flags: u64) {
        let widths = AtpMode::Sv39.index_widths();
        let idx2 = (vaddr >> 30) & ((1 << widths[0]) - 1);
        let idx1 = (vaddr >> 21) & 0x1FF;
        let idx0 = (vaddr >> 12) & 0x1FF;
        let l1 = root + 0x10_000;
        let l0 = root + 0x20_000;
        let entry = |target: u64, flags: u64| ((target >> 12) << 10) | flags;
        system
            .phys_write_raw(root + idx2 * 8, &entry(l1, 0b1).to_le_bytes())
            .unwrap();
        system
            .phys_write_raw(l1 + idx1 * 8, &entry(l0, 0b1).to_le_bytes())
            .unwrap();
        system
            .phys_write_raw(l0 + idx0 * 8, &entry(paddr, flags).to_le_bytes())
            .unwrap();
    }

    const RWXAD_U: u64 = 0b1101_1111;
    const RWXAD: u64 = 0b1100_1111;

    fn enable_sv39(system: &mut System, root: u64) {
        let atp = (8u64 << 60) | (root >> 12);
        system.core_at_mut(0, 0).satp = atp;
        system.core_at_mut(0, 0).matp = atp;
    }

    #[test]
    fn test_bare_mode_truncates_to_40_bits() {
        let mut system = test_system();
        let mut mmu = Mmu::new(&mut system, hart());
        let paddr = mmu
            .translate(
                0xABCD_0040_0000_1234,
                AccessType::Read,
                AccessClass::Scalar,
                8,
            )
            .unwrap();
        assert_eq!(0x0040_0000_1234 & map::PA_MASK, paddr);
    }

    #[test]
    fn test_scalar_round_trip() {
        let mut system = test_system();
        let mut mmu = Mmu::new(&mut system, hart());
        mmu.store64(DRAM + 0x100, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(0x1122_3344_5566_7788, mmu.load64(DRAM + 0x100).unwrap());
        assert_eq!(0x5566_7788, mmu.load32(DRAM + 0x100).unwrap());
        assert_eq!(0x1122, mmu.load16(DRAM + 0x106).unwrap());
    }

    #[test]
    fn test_line_crossing_load() {
        // Bytes 0..64 at a 64-byte-aligned base; a 32-bit load at +60 straddles the line.
        let mut system = test_system();
        let mut mmu = Mmu::new(&mut system, hart());
        let base = DRAM + 0x1000;
        for i in 0..64u8 {
            mmu.store8(base + i as u64, i).unwrap();
        }
        assert_eq!(0x3F3E_3D3C, mmu.load32(base + 60).unwrap());
    }

    #[test]
    fn test_sv39_walk_and_round_trip() {
        let mut system = test_system();
        let root = DRAM;
        let vaddr = 0x4000_1000u64;
        map_page(&mut system, root, vaddr, DRAM + 0x3000, RWXAD);
        enable_sv39(&mut system, root);
        let mut mmu = Mmu::new(&mut system, hart());
        let paddr = mmu
            .translate(vaddr + 0x24, AccessType::Read, AccessClass::Scalar, 4)
            .unwrap();
        assert_eq!(DRAM + 0x3024, paddr);
        // Same translation twice without intervening state changes.
        let paddr2 = mmu
            .translate(vaddr + 0x24, AccessType::Read, AccessClass::Scalar, 4)
            .unwrap();
        assert_eq!(paddr, paddr2);
        mmu.store32(vaddr + 0x24, 0xFEED_BEEF).unwrap();
        assert_eq!(0xFEED_BEEF, mmu.load32(vaddr + 0x24).unwrap());
    }

    #[test]
    fn test_sv39_unmapped_faults() {
        let mut system = test_system();
        enable_sv39(&mut system, DRAM);
        let mut mmu = Mmu::new(&mut system, hart());
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(0x7000_0000, AccessType::Read, AccessClass::Scalar, 4)
        );
    }

    #[test]
    fn test_sv39_write_requires_dirty() {
        let mut system = test_system();
        let root = DRAM;
        let vaddr = 0x4000_2000u64;
        // A set, D clear: loads fine, stores fault.
        map_page(&mut system, root, vaddr, DRAM + 0x4000, 0b0100_1111);
        enable_sv39(&mut system, root);
        let mut mmu = Mmu::new(&mut system, hart());
        assert!(mmu
            .translate(vaddr, AccessType::Read, AccessClass::Scalar, 4)
            .is_ok());
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(vaddr, AccessType::Write, AccessClass::Scalar, 4)
        );
    }

    #[test]
    fn test_sv39_user_page_supervisor_sum() {
        let mut system = test_system();
        let root = DRAM;
        let vaddr = 0x4000_3000u64;
        map_page(&mut system, root, vaddr, DRAM + 0x5000, RWXAD_U);
        enable_sv39(&mut system, root);
        system.hart_mut(hart()).prv = PrivilegeLevel::Supervisor;
        let mut mmu = Mmu::new(&mut system, hart());
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(vaddr, AccessType::Read, AccessClass::Scalar, 4)
        );
        // SUM opens user pages for supervisor data accesses, never fetches.
        system.hart_mut(hart()).mstatus.write(1 << 18, 1 << 18);
        let mut mmu = Mmu::new(&mut system, hart());
        assert!(mmu
            .translate(vaddr, AccessType::Read, AccessClass::Scalar, 4)
            .is_ok());
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(vaddr, AccessType::Execute, AccessClass::Scalar, 4)
        );
    }

    #[test]
    fn test_vector_masked_store() {
        let mut system = test_system();
        let mut mmu = Mmu::new(&mut system, hart());
        let base = DRAM + 0x2000;
        for i in 0..VLENB as u64 {
            mmu.store8(base + i, 0xAA).unwrap();
        }
        let data = [0x55u8; VLENB];
        // Only lanes 0..4 and 8..12 enabled.
        mmu.store_vector(base, &data, 0x0F0F).unwrap();
        assert_eq!(0x55, mmu.load8(base).unwrap());
        assert_eq!(0xAA, mmu.load8(base + 4).unwrap());
        assert_eq!(0x55, mmu.load8(base + 8).unwrap());
        assert_eq!(0xAA, mmu.load8(base + 12).unwrap());
    }

    #[test]
    fn test_amo_and_compare_exchange() {
        let mut system = test_system();
        let mut mmu = Mmu::new(&mut system, hart());
        let addr = DRAM + 0x3000;
        mmu.store64(addr, 10).unwrap();
        let old = mmu.amo(addr, 8, true, |v| v + 5).unwrap();
        assert_eq!(10, old);
        assert_eq!(15, mmu.load64(addr).unwrap());
        // Mismatched expected value leaves memory untouched.
        assert_eq!(15, mmu.compare_exchange(addr, 8, 99, 1).unwrap());
        assert_eq!(15, mmu.load64(addr).unwrap());
        assert_eq!(15, mmu.compare_exchange(addr, 8, 15, 1).unwrap());
        assert_eq!(1, mmu.load64(addr).unwrap());
        // Misaligned AMOs fault.
        assert_eq!(
            Err(MemoryError::MisalignedAccess),
            mmu.amo(addr + 1, 8, true, |v| v)
        );
    }

    #[test]
    fn test_fetch_uses_line_cache() {
        let mut system = test_system();
        let mut mmu = Mmu::new(&mut system, hart());
        let pc = DRAM + 0x4000;
        mmu.store32(pc, 0x1234_5678).unwrap();
        assert_eq!(0x5678, mmu.fetch_parcel(pc).unwrap());
        assert_eq!(0x1234, mmu.fetch_parcel(pc + 2).unwrap());
        // The line is cached: a store that bypasses invalidation is not observed.
        mmu.store32(pc, 0xAAAA_BBBB).unwrap();
        assert_eq!(0x5678, mmu.fetch_parcel(pc).unwrap());
        system.hart_mut(hart()).fetch_cache.invalidate();
        let mut mmu = Mmu::new(&mut system, hart());
        assert_eq!(0xBBBB, mmu.fetch_parcel(pc).unwrap());
    }

    #[test]
    fn test_mask_runs() {
        assert_eq!(vec![0..4, 8..12], mask_runs(0x0F0F));
        assert!(mask_runs(0).is_empty());
        assert_eq!(vec![0..VLENB], mask_runs(u32::MAX));
    }
}
