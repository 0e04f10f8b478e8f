//! Per-shire state: cache-bank ESRs, the "other" ESR bank (barriers, IPI plumbing, thread
//! enables), the broadcast latch, and the shire's neighborhoods and minions.

use crate::minion::Minion;
use crate::neighborhood::Neighborhood;
use crate::topology::{self, IO_SHIRE_SP, MINIONS_PER_SHIRE, NEIGH_PER_SHIRE};

/// Register indices within a shire-cache bank.
pub mod cache_reg {
    pub const L2_CONTROL: u16 = 0;
    pub const L3_CONTROL: u16 = 1;
    pub const ERR_LOG: u16 = 2;
    pub const ERR_LOG_INFO: u16 = 3;
    pub const PERFMON_CTL: u16 = 4;
    pub const PERFMON_CNT0: u16 = 5;
    pub const PERFMON_CNT1: u16 = 6;
    pub const RAM_CONFIG: u16 = 7;
    pub const CACHE_CHICKEN: u16 = 8;

    pub const COUNT: usize = 9;
}

/// Register indices within the shire-other subregion.
pub mod other_reg {
    /// Fast local barriers occupy the first 32 slots.
    pub const FLB0: u16 = 0;
    pub const FLB31: u16 = 31;
    pub const IPI_REDIRECT_FILTER: u16 = 32;
    pub const IPI_REDIRECT_TRIGGER: u16 = 33;
    pub const IPI_TRIGGER: u16 = 34;
    pub const PLL_CONFIG: u16 = 35;
    pub const DLL_CONFIG: u16 = 36;
    pub const COOP_MODE: u16 = 37;
    pub const THREAD0_DISABLE: u16 = 38;
    pub const THREAD1_DISABLE: u16 = 39;
    pub const MINION_FEATURE: u16 = 40;
    pub const SHIRE_CONFIG: u16 = 41;
    pub const MTIME_LOCAL_TARGET: u16 = 42;
    pub const CACHERAM_CONFIG: u16 = 43;
    pub const CLOCK_GATE: u16 = 44;
    pub const ICACHE_PREFETCH_U: u16 = 45;
    pub const ICACHE_PREFETCH_S: u16 = 46;
    pub const ICACHE_PREFETCH_M: u16 = 47;
    pub const BROADCAST_DATA: u16 = 48;
    pub const UBROADCAST: u16 = 49;
    pub const SBROADCAST: u16 = 50;
    pub const MBROADCAST: u16 = 51;
    pub const FCC_CREDINC0: u16 = 52;
    pub const FCC_CREDINC1: u16 = 53;
    /// Read-only revision id.
    pub const SHIRE_REVISION: u16 = 54;
}

/// `minion_feature` bit assignments: per-feature enables for the shire's minions.
pub mod minion_feature {
    pub const ML: u64 = 1 << 0;
    pub const GRAPHICS: u64 = 1 << 1;
    pub const CACHE_OPS: u64 = 1 << 2;
    pub const SCRATCHPAD: u64 = 1 << 3;
    pub const LOCK_UNLOCK: u64 = 1 << 4;
    pub const MULTITHREAD_DISABLE: u64 = 1 << 5;
}

/// Value reported by [`other_reg::SHIRE_REVISION`].
pub const SHIRE_REVISION_ID: u64 = 0x0001_0002;

/// One of the four cache banks' ESR block.
#[derive(Debug, Clone)]
pub struct ShireCacheBank {
    pub regs: [u64; cache_reg::COUNT],
}

impl Default for ShireCacheBank {
    fn default() -> Self {
        Self {
            regs: [0; cache_reg::COUNT],
        }
    }
}

/// The shire-other ESR bank.
#[derive(Debug, Clone)]
pub struct ShireOther {
    /// Fast local barriers: 32 counters.
    pub flb: [u64; 32],
    pub ipi_redirect_filter: u64,
    pub pll_config: u64,
    pub dll_config: u64,
    /// Cooperative mode: gates cooperative tensor loads and stores on this shire.
    pub coop_mode: bool,
    /// One disable bit per minion for thread 0.
    pub thread0_disable: u64,
    /// One disable bit per minion for thread 1.
    pub thread1_disable: u64,
    pub minion_feature: u64,
    pub shire_config: u64,
    /// Local timer-interrupt target; the shire's harts take MTIP when `mtime` reaches it.
    pub mtime_local_target: u64,
    pub cacheram_config: u64,
    pub clock_gate: u64,
    pub icache_prefetch: [u64; 3],
    /// 64-bit payload latch for broadcast writes.
    pub broadcast_data: u64,
}

impl ShireOther {
    fn new(minion_feature: u64) -> Self {
        Self {
            flb: [0; 32],
            ipi_redirect_filter: 0,
            pll_config: 0,
            dll_config: 0,
            coop_mode: false,
            thread0_disable: 0,
            thread1_disable: 0,
            minion_feature,
            shire_config: 0,
            mtime_local_target: u64::MAX,
            cacheram_config: 0,
            clock_gate: 0,
            icache_prefetch: [0; 3],
            broadcast_data: 0,
        }
    }
}

/// One shire: four neighborhoods of minions plus the cache block, or the specialized
/// service-processor / memory-controller tiles.
#[derive(Debug, Clone)]
pub struct Shire {
    /// This shire's array index (not its external id).
    pub index: usize,
    pub neighborhoods: Vec<Neighborhood>,
    pub minions: Vec<Minion>,
    pub cache_banks: [ShireCacheBank; 4],
    pub other: ShireOther,
}

impl Shire {
    pub fn new(index: usize) -> Self {
        let (neigh_count, minion_count) = if index == IO_SHIRE_SP {
            (1, 1)
        } else if topology::shire_has_harts(index) {
            (NEIGH_PER_SHIRE, MINIONS_PER_SHIRE)
        } else {
            // Memory shires carry cache ESRs but no harts.
            (0, 0)
        };
        Self {
            index,
            neighborhoods: (0..neigh_count).map(|_| Neighborhood::new()).collect(),
            minions: (0..minion_count).map(|m| Minion::new(index, m)).collect(),
            cache_banks: Default::default(),
            other: ShireOther::new(Self::minion_feature_reset(index)),
        }
    }

    /// Reset value of `minion_feature` for this shire.
    pub fn minion_feature_reset(index: usize) -> u64 {
        if index == IO_SHIRE_SP {
            0x3B
        } else {
            minion_feature::ML
        }
    }

    /// Cold-reset the ESR planes. Hart lifecycle is handled by the system's reset ladder.
    pub fn cold_reset(&mut self) {
        for neigh in &mut self.neighborhoods {
            neigh.cold_reset();
        }
        self.cache_banks = Default::default();
        self.other = ShireOther::new(Self::minion_feature_reset(self.index));
        for minion in &mut self.minions {
            minion.core.reset();
        }
    }

    /// Warm reset: ESRs to warm defaults, cooperative tables cleared, thread enables kept.
    pub fn warm_reset(&mut self) {
        for neigh in &mut self.neighborhoods {
            neigh.warm_reset();
        }
        let thread0 = self.other.thread0_disable;
        let thread1 = self.other.thread1_disable;
        let feature = self.other.minion_feature;
        self.other = ShireOther::new(feature);
        self.other.thread0_disable = thread0;
        self.other.thread1_disable = thread1;
    }

    /// The external shire id used in ESR addressing and `mhartid`.
    pub fn external_id(&self) -> usize {
        topology::shire_index_to_id(self.index)
    }

    /// Joins fast local barrier `id` with `expected` participants. Returns 1 to the last
    /// arrival (and resets the counter), 0 to everyone else.
    pub fn flb_join(&mut self, id: usize, expected: u64) -> u64 {
        let count = self.flb_count(id) + 1;
        if count >= expected {
            self.other.flb[id] = 0;
            1
        } else {
            self.other.flb[id] = count;
            0
        }
    }

    pub fn flb_count(&self, id: usize) -> u64 {
        self.other.flb[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shire_shapes() {
        let compute = Shire::new(0);
        assert_eq!(4, compute.neighborhoods.len());
        assert_eq!(32, compute.minions.len());
        let memory = Shire::new(topology::COMPUTE_SHIRE_COUNT);
        assert_eq!(0, memory.minions.len());
        let io = Shire::new(IO_SHIRE_SP);
        assert_eq!(1, io.neighborhoods.len());
        assert_eq!(1, io.minions.len());
        assert_eq!(0x3B, io.other.minion_feature);
    }

    #[test]
    fn test_flb_barrier() {
        let mut shire = Shire::new(0);
        assert_eq!(0, shire.flb_join(3, 3));
        assert_eq!(0, shire.flb_join(3, 3));
        assert_eq!(1, shire.flb_join(3, 3));
        // Counter reset for reuse.
        assert_eq!(0, shire.flb_count(3));
        // Other barriers unaffected.
        assert_eq!(0, shire.flb_count(4));
    }

    #[test]
    fn test_warm_reset_preserves_thread_enables() {
        let mut shire = Shire::new(1);
        shire.other.thread0_disable = 0xF0;
        shire.other.broadcast_data = 0x1234;
        shire.warm_reset();
        assert_eq!(0xF0, shire.other.thread0_disable);
        assert_eq!(0, shire.other.broadcast_data);
    }
}
