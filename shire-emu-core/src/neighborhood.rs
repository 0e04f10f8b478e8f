//! Per-neighborhood state: ESR-backed registers and the cooperative tensor-load table.

use crate::pma::{map, MprotView};
use crate::topology::MINIONS_PER_SHIRE;

/// Register indices within the neighborhood ESR subregion.
pub mod reg {
    pub const ICACHE_ERR_LOG_INFO: u16 = 0;
    pub const IPI_REDIRECT_PC: u16 = 1;
    pub const MINION_BOOT: u16 = 2;
    pub const MPROT: u16 = 3;
    pub const HACTRL: u16 = 4;
    pub const HASTATUS0: u16 = 5;
    pub const HASTATUS1: u16 = 6;
    pub const TEXTURE_IMAGE_TABLE_PTR: u16 = 7;
    pub const TEXTURE_CONTROL: u16 = 8;
    pub const TEXTURE_STATUS: u16 = 9;
    pub const NEIGH_CHICKEN: u16 = 10;
    pub const VMSPAGESIZE: u16 = 11;
    pub const PMU_CONTROL: u16 = 12;
}

/// `hactrl` bit positions.
pub mod hactrl {
    pub const HALTREQ: u64 = 1 << 0;
    pub const RESUMEREQ: u64 = 1 << 1;
    pub const RESETHALT: u64 = 1 << 2;
    /// 16-bit hart-select mask (one bit per hart of the neighborhood).
    pub const HARTSEL_SHIFT: u32 = 4;
    pub const HARTSEL_MASK: u64 = 0xFFFF;
}

/// One cooperative tensor-load rendezvous entry.
///
/// `all` names every participating minion of the shire; `pending` the ones that have not yet
/// arrived. `all == 0` means the entry is free.
#[derive(Debug, Copy, Clone, Default)]
pub struct CoopTloadState {
    pub all: u32,
    pub pending: u32,
}

impl CoopTloadState {
    pub fn is_free(&self) -> bool {
        self.all == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Cooperative rendezvous groups per load unit.
pub const COOP_GROUPS: usize = 32;

/// Per-neighborhood rendezvous tables, one row per group id of the `tensor_coop` CSR.
#[derive(Debug, Clone)]
pub struct CoopTloadTable {
    pub tload_a: [[CoopTloadState; COOP_GROUPS]; 2],
    pub tload_b: [CoopTloadState; COOP_GROUPS],
}

impl Default for CoopTloadTable {
    fn default() -> Self {
        Self {
            tload_a: [[CoopTloadState::default(); COOP_GROUPS]; 2],
            tload_b: [CoopTloadState::default(); COOP_GROUPS],
        }
    }
}

impl CoopTloadTable {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// `true` if any entry is mid-rendezvous.
    pub fn any_pending(&self) -> bool {
        self.tload_a
            .iter()
            .flatten()
            .chain(self.tload_b.iter())
            .any(|entry| !entry.is_free())
    }
}

/// Per-neighborhood register state.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    pub icache_err_log_info: u64,
    pub ipi_redirect_pc: u64,
    /// Reset vector for this neighborhood's minions.
    pub minion_boot: u64,
    pub mprot: u64,
    pub hactrl: u64,
    pub hastatus0: u64,
    pub hastatus1: u64,
    pub texture_image_table_ptr: u64,
    pub texture_control: u64,
    pub texture_status: u64,
    pub neigh_chicken: u64,
    pub vmspagesize: u64,
    pub pmu_control: u64,
    pub coop: CoopTloadTable,
}

impl Default for Neighborhood {
    fn default() -> Self {
        Self::new()
    }
}

impl Neighborhood {
    pub fn new() -> Self {
        Self {
            icache_err_log_info: 0,
            ipi_redirect_pc: 0,
            minion_boot: map::DRAM_BASE,
            mprot: 0,
            hactrl: 0,
            hastatus0: 0,
            hastatus1: 0,
            texture_image_table_ptr: 0,
            texture_control: 0,
            texture_status: 0,
            neigh_chicken: 0,
            vmspagesize: 0,
            pmu_control: 0,
            coop: CoopTloadTable::default(),
        }
    }

    /// Cold-reset values.
    pub fn cold_reset(&mut self) {
        let hactrl = self.hactrl & hactrl::RESETHALT;
        *self = Self::new();
        // resethalt survives reset so harts can be brought up halted.
        self.hactrl = hactrl;
    }

    /// Warm reset keeps boot configuration but clears the rendezvous tables.
    pub fn warm_reset(&mut self) {
        self.coop.clear();
        self.hactrl &= hactrl::RESETHALT;
        self.hastatus0 = 0;
        self.hastatus1 = 0;
    }

    /// Decodes the `mprot` register into the view consumed by the PMA.
    ///
    /// Field layout: bit 0 secure, bit 1 I/O disable, bit 2 PCIe disable, bits `[7:4]`
    /// dram-size selector (`0` = full span, else `2^sel * 256 MiB`), bits `[23:8]` OS-box
    /// base and `[39:24]` OS-box size in 64 MiB units (size `0` = full span), bits `[47:40]`
    /// and `[55:48]` machine/supervisor code-window selectors in 64 MiB units.
    pub fn mprot_view(&self) -> MprotView {
        const UNIT: u64 = 64 << 20;
        let raw = self.mprot;
        let secure = raw & 1 != 0;
        let io_enable = raw & 2 == 0;
        let dram_size = match (raw >> 4) & 0xF {
            0 => map::DRAM_SPAN,
            sel => (256 << 20) << sel,
        };
        let osbox_base = ((raw >> 8) & 0xFFFF) * UNIT;
        let osbox_size = match (raw >> 24) & 0xFFFF {
            0 => map::DRAM_SPAN,
            size => size * UNIT,
        };
        let mcode = (((raw >> 40) & 0xFF) * UNIT, UNIT);
        let scode = (((raw >> 48) & 0xFF) * UNIT, UNIT);
        MprotView {
            dram_size: dram_size.min(map::DRAM_SPAN),
            secure,
            mcode: if secure { mcode } else { (0, map::DRAM_SPAN) },
            scode: if secure { scode } else { (0, map::DRAM_SPAN) },
            osbox: (osbox_base, osbox_size),
            io_enable,
            pcie_enable: raw & 4 == 0,
        }
    }

    /// The `resethalt` routing decision for a hart of this neighborhood.
    pub fn should_halt_on_reset(&self, hart_in_neigh: usize) -> bool {
        self.hactrl & hactrl::RESETHALT != 0
            && (self.hactrl >> hactrl::HARTSEL_SHIFT) & (1 << hart_in_neigh) != 0
    }
}

const_assert!(COOP_GROUPS <= 64);
const_assert!(MINIONS_PER_SHIRE <= 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mprot_view_defaults() {
        let neigh = Neighborhood::new();
        let view = neigh.mprot_view();
        assert!(!view.secure);
        assert_eq!(map::DRAM_SPAN, view.dram_size);
        assert_eq!((0, map::DRAM_SPAN), view.osbox);
    }

    #[test]
    fn test_mprot_dram_size_selector() {
        let mut neigh = Neighborhood::new();
        neigh.mprot = 2 << 4; // 2^2 * 256 MiB = 1 GiB
        assert_eq!(1 << 30, neigh.mprot_view().dram_size);
    }

    #[test]
    fn test_resethalt_selection() {
        let mut neigh = Neighborhood::new();
        neigh.hactrl = hactrl::RESETHALT | (0b10 << hactrl::HARTSEL_SHIFT);
        assert!(!neigh.should_halt_on_reset(0));
        assert!(neigh.should_halt_on_reset(1));
    }

    #[test]
    fn test_warm_reset_clears_coop() {
        let mut neigh = Neighborhood::new();
        neigh.coop.tload_b[3].all = 0xF;
        neigh.minion_boot = 0x1234;
        neigh.warm_reset();
        assert!(!neigh.coop.any_pending());
        assert_eq!(0x1234, neigh.minion_boot);
    }
}
