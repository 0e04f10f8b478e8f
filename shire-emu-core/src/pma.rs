//! Physical Memory Attributes: per-SoC-variant partitioning of the physical address space with
//! per-privilege, per-access-class rules.
//!
//! Every memory access (including page-table walks and fetches) passes through a [`Pma`]
//! implementation, which either rejects the access or accepts it, possibly rewriting the
//! physical address (DRAM aliasing, local-shire scratchpad rewrite).
//!
//! The two SoC variants place their regions (and the ESR privilege bits) differently, so the
//! checker is a trait with one implementation per variant, selected at chip-init time.

use crate::topology::{self, IO_SHIRE_SP};
use crate::{Agent, PrivilegeLevel};
use log::debug;
use std::fmt::Debug;
use thiserror::Error;

/// Fixed physical-map constants of the primary (full-chip) variant.
pub mod map {
    /// Base of the boot ROM of the service processor.
    pub const SP_ROM_BASE: u64 = 0x0000_0000_1000;
    pub const SP_ROM_SIZE: u64 = 0x0000_0001_0000;
    /// Base of the service processor's private RAM.
    pub const SP_RAM_BASE: u64 = 0x0000_0800_0000;
    pub const SP_RAM_SIZE: u64 = 0x0000_0080_0000;
    /// PLIC register block serving the processing-unit shires.
    pub const PU_PLIC_BASE: u64 = 0x0000_1000_0000;
    /// PLIC register block serving the service-processor I/O complex.
    pub const SPIO_PLIC_BASE: u64 = 0x0000_1100_0000;
    pub const PLIC_SIZE: u64 = 0x0000_0040_0000;
    /// Memory-mapped RISC-V timer (mtime/mtimecmp).
    pub const TIMER_BASE: u64 = 0x0000_1200_0000;
    pub const TIMER_SIZE: u64 = 0x0000_0001_0000;
    /// Peripheral window (UARTs and friends; devices live behind region objects).
    pub const IO_BASE: u64 = 0x0000_4000_0000;
    pub const IO_SIZE: u64 = 0x0000_1000_0000;
    /// ESR region: 4 GiB carved into the per-shire layout of the ESR plane.
    pub const ESR_BASE: u64 = 0x0001_0000_0000;
    pub const ESR_SIZE: u64 = 0x0001_0000_0000;
    /// L2 scratchpad window; addresses carry a shire id field.
    pub const L2_SCP_BASE: u64 = 0x0020_0000_0000;
    pub const L2_SCP_SIZE: u64 = 0x0010_0000_0000;
    /// PCIe/host-bridge window.
    pub const PCIE_BASE: u64 = 0x0030_0000_0000;
    pub const PCIE_SIZE: u64 = 0x0008_0000_0000;
    /// DRAM occupies the top half of the 40-bit space (bit 38 set).
    pub const DRAM_BASE: u64 = 0x0040_0000_0000;
    pub const DRAM_SPAN: u64 = 0x0040_0000_0000;

    /// Width of the physical address space.
    pub const PA_BITS: u32 = 40;
    pub const PA_MASK: u64 = (1 << PA_BITS) - 1;

    /// Shire-id field of an L2 scratchpad address: bits `[35:28]`. All-ones selects the
    /// requesting agent's own shire.
    pub const L2_SCP_SHIRE_SHIFT: u32 = 28;
    pub const L2_SCP_SHIRE_MASK: u64 = 0xFF;
}

/// Fixed physical-map constants of the Erbium variant.
pub mod erbium_map {
    pub const BOOTROM_BASE: u64 = 0x0000_1000;
    pub const BOOTROM_SIZE: u64 = 0x0001_0000;
    pub const ESR_BASE: u64 = 0x0100_0000;
    pub const ESR_SIZE: u64 = 0x0100_0000;
    pub const PLIC_BASE: u64 = 0x1000_0000;
    pub const PLIC_SIZE: u64 = 0x0040_0000;
    pub const SRAM_BASE: u64 = 0x4000_0000;
    pub const SRAM_SIZE: u64 = 0x0080_0000;
    pub const MRAM_BASE: u64 = 0x8000_0000;
    pub const MRAM_SIZE: u64 = 0x8000_0000;
}

/// What an access does.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessType {
    /// Regular reads.
    Read,
    /// Regular writes.
    Write,
    /// Instruction fetches.
    Execute,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match *self {
            Self::Read => "R",
            Self::Write => "W",
            Self::Execute => "X",
        })
    }
}

/// What kind of operation performs the access; regions reject classes the hardware does not
/// wire up to them.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessClass {
    Scalar,
    Vector,
    Tensor,
    /// Atomics executed in the core (disallowed on scratchpad space).
    AtomicLocal,
    /// Atomics executed at the shared cache.
    AtomicGlobal,
    CacheOp,
    /// Page-table-walker reads.
    Ptw,
}

/// A physical access to be validated.
#[derive(Debug, Copy, Clone)]
pub struct PmaRequest {
    pub agent: Agent,
    /// Effective privilege of the access (not necessarily the hart's current privilege).
    pub privilege: PrivilegeLevel,
    /// Virtual address, for diagnostics only.
    pub vaddr: u64,
    pub paddr: u64,
    pub size: u64,
    pub access: AccessType,
    pub class: AccessClass,
}

/// View of the `mprot` neighborhood ESR consulted by DRAM checks.
#[derive(Debug, Copy, Clone)]
pub struct MprotView {
    /// Installed-DRAM limit: offsets at or above this fault.
    pub dram_size: u64,
    /// Secure-mode partitioning enabled.
    pub secure: bool,
    /// In secure mode, the machine-code window (offset, size) within DRAM.
    pub mcode: (u64, u64),
    /// In secure mode, the supervisor-code window within DRAM.
    pub scode: (u64, u64),
    /// The OS-box window within DRAM: all that U-mode may touch.
    pub osbox: (u64, u64),
    /// I/O window accessible from this neighborhood's harts.
    pub io_enable: bool,
    /// PCIe window accessible from this neighborhood's harts.
    pub pcie_enable: bool,
}

impl Default for MprotView {
    fn default() -> Self {
        Self {
            dram_size: map::DRAM_SPAN,
            secure: false,
            mcode: (0, map::DRAM_SPAN),
            scode: (0, map::DRAM_SPAN),
            osbox: (0, map::DRAM_SPAN),
            io_enable: true,
            pcie_enable: true,
        }
    }
}

impl MprotView {
    fn in_window(window: (u64, u64), offset: u64, size: u64) -> bool {
        let (base, span) = window;
        offset >= base && offset - base < span && span - (offset - base) >= size
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("physical access fault at {paddr:#012x} ({access})")]
pub struct PmaFault {
    pub paddr: u64,
    pub access: AccessType,
}

fn fault(request: &PmaRequest, why: &str) -> PmaFault {
    debug!(
        paddr = request.paddr,
        size = request.size,
        access:% = request.access,
        class:? = request.class,
        privilege:% = request.privilege;
        "pma reject: {why}"
    );
    PmaFault {
        paddr: request.paddr,
        access: request.access,
    }
}

/// Per-variant physical-memory-attribute checker.
pub trait Pma: Debug {
    /// Validates `request` against `mprot`, returning the (possibly rewritten) physical
    /// address to use for the access.
    fn check(&self, request: &PmaRequest, mprot: &MprotView) -> Result<u64, PmaFault>;

    /// Validates a page-table-walker read. PTW accesses never target code windows, devices, or
    /// the ESR plane.
    fn check_ptw(&self, request: &PmaRequest, mprot: &MprotView) -> Result<u64, PmaFault> {
        if request.class != AccessClass::Ptw {
            return Err(fault(request, "ptw check on non-ptw access"));
        }
        self.check(request, mprot)
    }
}

/// Truncates a DRAM offset modulo the installed DRAM size, modeling controller address
/// aliasing. Idempotent.
pub fn truncated_dram_offset(offset: u64, dram_size: u64) -> u64 {
    debug_assert!(dram_size.is_power_of_two());
    offset & (dram_size - 1)
}

/// The full-chip PMA.
#[derive(Debug)]
pub struct SocPma {
    /// Bytes of DRAM actually installed (power of two).
    pub dram_size: u64,
}

impl SocPma {
    pub fn new(dram_size: u64) -> Self {
        assert!(dram_size.is_power_of_two());
        Self { dram_size }
    }

    fn check_dram(&self, request: &PmaRequest, mprot: &MprotView) -> Result<u64, PmaFault> {
        let offset = request.paddr - map::DRAM_BASE;
        if offset >= mprot.dram_size.min(map::DRAM_SPAN) {
            return Err(fault(request, "beyond mprot dram_size"));
        }
        match (request.privilege, request.access) {
            (PrivilegeLevel::User, _) => {
                if !MprotView::in_window(mprot.osbox, offset, request.size) {
                    return Err(fault(request, "user access outside osbox"));
                }
            }
            (PrivilegeLevel::Machine, AccessType::Execute) if mprot.secure => {
                if !MprotView::in_window(mprot.mcode, offset, request.size) {
                    return Err(fault(request, "secure fetch outside mcode"));
                }
            }
            (PrivilegeLevel::Supervisor, AccessType::Execute) if mprot.secure => {
                if !MprotView::in_window(mprot.scode, offset, request.size) {
                    return Err(fault(request, "secure fetch outside scode"));
                }
            }
            _ => {}
        }
        // The controller ignores address bits above the installed size.
        Ok(map::DRAM_BASE + truncated_dram_offset(offset, self.dram_size))
    }

    fn check_l2_scp(&self, request: &PmaRequest) -> Result<u64, PmaFault> {
        match request.class {
            AccessClass::AtomicLocal => {
                return Err(fault(request, "local atomic on scratchpad"));
            }
            AccessClass::CacheOp => {
                return Err(fault(request, "cacheop on scratchpad"));
            }
            _ => {}
        }
        if request.access == AccessType::Execute {
            return Err(fault(request, "fetch from scratchpad"));
        }
        // Normalize the shire-id field: all-ones selects the requesting agent's own shire.
        let field = (request.paddr >> map::L2_SCP_SHIRE_SHIFT) & map::L2_SCP_SHIRE_MASK;
        if field == map::L2_SCP_SHIRE_MASK {
            let Some(shire) = request.agent.shire() else {
                return Err(fault(request, "local-shire scratchpad access without agent"));
            };
            if shire == IO_SHIRE_SP {
                return Err(fault(request, "service processor has no scratchpad"));
            }
            let id = topology::shire_index_to_id(shire) as u64;
            let rewritten = request.paddr & !(map::L2_SCP_SHIRE_MASK << map::L2_SCP_SHIRE_SHIFT)
                | id << map::L2_SCP_SHIRE_SHIFT;
            return Ok(rewritten);
        }
        if topology::shire_id_to_index(field as usize).is_none() {
            return Err(fault(request, "scratchpad shire id out of range"));
        }
        Ok(request.paddr)
    }

    fn check_esr(&self, request: &PmaRequest) -> Result<u64, PmaFault> {
        if !matches!(request.class, AccessClass::Scalar) {
            return Err(fault(request, "non-scalar ESR access"));
        }
        if request.access == AccessType::Execute {
            return Err(fault(request, "fetch from ESR space"));
        }
        if request.size != 8 || request.paddr & 0b111 != 0 {
            return Err(fault(request, "ESR access must be one aligned doubleword"));
        }
        // The PP field of the offset encodes the required privilege; the ESR plane itself
        // re-checks it with agent context, here we only reject plainly insufficient
        // privilege.
        let pp = crate::esr::required_privilege(request.paddr - map::ESR_BASE);
        if (request.privilege as usize) < pp as usize && !request.agent.is_service_processor() {
            return Err(fault(request, "insufficient privilege for ESR"));
        }
        Ok(request.paddr)
    }

    fn check_sp_private(&self, request: &PmaRequest, writable: bool) -> Result<u64, PmaFault> {
        if !request.agent.is_service_processor() && request.agent != Agent::None {
            return Err(fault(request, "service-processor-private region"));
        }
        if request.access == AccessType::Write && !writable {
            return Err(fault(request, "write to ROM"));
        }
        Ok(request.paddr)
    }

    fn check_device(&self, request: &PmaRequest, enabled: bool) -> Result<u64, PmaFault> {
        if !enabled {
            return Err(fault(request, "device window disabled by mprot"));
        }
        if request.privilege != PrivilegeLevel::Machine {
            return Err(fault(request, "device access below M-mode"));
        }
        if request.access == AccessType::Execute {
            return Err(fault(request, "fetch from device space"));
        }
        if !matches!(request.class, AccessClass::Scalar) {
            return Err(fault(request, "non-scalar device access"));
        }
        Ok(request.paddr)
    }
}

fn in_region(paddr: u64, size: u64, base: u64, span: u64) -> bool {
    paddr >= base && paddr - base < span && span - (paddr - base) >= size
}

impl Pma for SocPma {
    fn check(&self, request: &PmaRequest, mprot: &MprotView) -> Result<u64, PmaFault> {
        let paddr = request.paddr;
        if paddr > map::PA_MASK || request.size == 0 {
            return Err(fault(request, "outside physical space"));
        }
        let size = request.size;
        if request.class == AccessClass::Ptw {
            // PTW reads may only target DRAM data space.
            if in_region(paddr, size, map::DRAM_BASE, map::DRAM_SPAN) {
                return self.check_dram(request, mprot);
            }
            return Err(fault(request, "ptw outside dram"));
        }
        if in_region(paddr, size, map::DRAM_BASE, map::DRAM_SPAN) {
            self.check_dram(request, mprot)
        } else if in_region(paddr, size, map::L2_SCP_BASE, map::L2_SCP_SIZE) {
            self.check_l2_scp(request)
        } else if in_region(paddr, size, map::ESR_BASE, map::ESR_SIZE) {
            self.check_esr(request)
        } else if in_region(paddr, size, map::SP_ROM_BASE, map::SP_ROM_SIZE) {
            self.check_sp_private(request, false)
        } else if in_region(paddr, size, map::SP_RAM_BASE, map::SP_RAM_SIZE) {
            self.check_sp_private(request, true)
        } else if in_region(paddr, size, map::PU_PLIC_BASE, map::PLIC_SIZE)
            || in_region(paddr, size, map::SPIO_PLIC_BASE, map::PLIC_SIZE)
            || in_region(paddr, size, map::TIMER_BASE, map::TIMER_SIZE)
        {
            self.check_device(request, true)
        } else if in_region(paddr, size, map::IO_BASE, map::IO_SIZE) {
            self.check_device(request, mprot.io_enable)
        } else if in_region(paddr, size, map::PCIE_BASE, map::PCIE_SIZE) {
            self.check_device(request, mprot.pcie_enable)
        } else {
            Err(fault(request, "unmapped physical address"))
        }
    }
}

/// The Erbium PMA: a flat single-tile map with MRAM, boot ROM, SRAM, ESRs, and a PLIC.
#[derive(Debug)]
pub struct ErbiumPma;

impl Pma for ErbiumPma {
    fn check(&self, request: &PmaRequest, _mprot: &MprotView) -> Result<u64, PmaFault> {
        use erbium_map as m;
        let paddr = request.paddr;
        let size = request.size;
        if request.class == AccessClass::Ptw {
            if in_region(paddr, size, m::MRAM_BASE, m::MRAM_SIZE)
                || in_region(paddr, size, m::SRAM_BASE, m::SRAM_SIZE)
            {
                return Ok(paddr);
            }
            return Err(fault(request, "ptw outside ram"));
        }
        if in_region(paddr, size, m::MRAM_BASE, m::MRAM_SIZE)
            || in_region(paddr, size, m::SRAM_BASE, m::SRAM_SIZE)
        {
            Ok(paddr)
        } else if in_region(paddr, size, m::BOOTROM_BASE, m::BOOTROM_SIZE) {
            match request.access {
                AccessType::Write => Err(fault(request, "write to boot ROM")),
                _ => Ok(paddr),
            }
        } else if in_region(paddr, size, m::ESR_BASE, m::ESR_SIZE) {
            if request.size != 8 || paddr & 0b111 != 0 {
                return Err(fault(request, "ESR access must be one aligned doubleword"));
            }
            // Erbium carries the PP field at bits [23:22] of the offset.
            let pp = crate::RawPrivilegeLevel::from_u2(((paddr - m::ESR_BASE) >> 22 & 0b11) as u8);
            if (request.privilege as usize) < pp as usize {
                return Err(fault(request, "insufficient privilege for ESR"));
            }
            Ok(paddr)
        } else if in_region(paddr, size, m::PLIC_BASE, m::PLIC_SIZE) {
            if request.privilege != PrivilegeLevel::Machine {
                return Err(fault(request, "PLIC access below M-mode"));
            }
            Ok(paddr)
        } else {
            Err(fault(request, "unmapped physical address"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::HartIndex;

    fn request(paddr: u64, size: u64, access: AccessType) -> PmaRequest {
        PmaRequest {
            agent: Agent::Hart(HartIndex::new(3, 0, 0)),
            privilege: PrivilegeLevel::Machine,
            vaddr: paddr,
            paddr,
            size,
            access,
            class: AccessClass::Scalar,
        }
    }

    #[test]
    fn test_dram_alias_truncation() {
        let pma = SocPma::new(1 << 30);
        let mprot = MprotView::default();
        // An offset beyond the installed gigabyte wraps around.
        let paddr = map::DRAM_BASE + (1 << 30) + 0x1234;
        let got = pma
            .check(&request(paddr, 8, AccessType::Read), &mprot)
            .unwrap();
        assert_eq!(map::DRAM_BASE + 0x1234, got);
        // Truncation is idempotent.
        assert_eq!(
            truncated_dram_offset(truncated_dram_offset(0x5_1234_5678, 1 << 30), 1 << 30),
            truncated_dram_offset(0x5_1234_5678, 1 << 30)
        );
    }

    #[test]
    fn test_user_outside_osbox_faults() {
        let pma = SocPma::new(1 << 34);
        let mprot = MprotView {
            osbox: (0x1000_0000, 0x1000_0000),
            ..MprotView::default()
        };
        let mut req = request(map::DRAM_BASE + 0x2000, 8, AccessType::Read);
        req.privilege = PrivilegeLevel::User;
        assert!(pma.check(&req, &mprot).is_err());
        let req_in = PmaRequest {
            paddr: map::DRAM_BASE + 0x1000_0000,
            privilege: PrivilegeLevel::User,
            ..req
        };
        assert!(pma.check(&req_in, &mprot).is_ok());
    }

    #[test]
    fn test_l2_scp_local_rewrite() {
        let pma = SocPma::new(1 << 34);
        let mprot = MprotView::default();
        let local = map::L2_SCP_BASE | (map::L2_SCP_SHIRE_MASK << map::L2_SCP_SHIRE_SHIFT) | 0x40;
        let got = pma.check(&request(local, 8, AccessType::Read), &mprot).unwrap();
        // The requesting agent sits in shire 3.
        assert_eq!(
            map::L2_SCP_BASE | (3 << map::L2_SCP_SHIRE_SHIFT) | 0x40,
            got
        );
    }

    #[test]
    fn test_l2_scp_rejects_local_atomics() {
        let pma = SocPma::new(1 << 34);
        let mprot = MprotView::default();
        let mut req = request(map::L2_SCP_BASE | 0x40, 8, AccessType::Read);
        req.class = AccessClass::AtomicLocal;
        assert!(pma.check(&req, &mprot).is_err());
        req.class = AccessClass::AtomicGlobal;
        assert!(pma.check(&req, &mprot).is_ok());
    }

    #[test]
    fn test_esr_requires_aligned_doubleword() {
        let pma = SocPma::new(1 << 34);
        let mprot = MprotView::default();
        assert!(pma
            .check(&request(map::ESR_BASE + 8, 8, AccessType::Read), &mprot)
            .is_ok());
        assert!(pma
            .check(&request(map::ESR_BASE + 4, 8, AccessType::Read), &mprot)
            .is_err());
        assert!(pma
            .check(&request(map::ESR_BASE + 8, 4, AccessType::Read), &mprot)
            .is_err());
    }

    #[test]
    fn test_ptw_confined_to_dram() {
        let pma = SocPma::new(1 << 34);
        let mprot = MprotView::default();
        let mut req = request(map::DRAM_BASE + 0x1000, 8, AccessType::Read);
        req.class = AccessClass::Ptw;
        assert!(pma.check(&req, &mprot).is_ok());
        req.paddr = map::ESR_BASE;
        assert!(pma.check(&req, &mprot).is_err());
    }

    #[test]
    fn test_unmapped_faults() {
        let pma = SocPma::new(1 << 34);
        let mprot = MprotView::default();
        assert!(pma.check(&request(0x0000_0000, 8, AccessType::Read), &mprot).is_err());
    }
}
