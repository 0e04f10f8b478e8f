//! The minion core: state shared by the two harts of a minion.

use crate::hart::Hart;
use crate::tensor::{TLoad, TMul, TQuant, TReduce, TStore, TensorQueue};
use crate::topology::HartIndex;

/// Cache-line-sized entries in the L1 scratchpad.
pub const L1_SCP_ENTRIES: usize = 48;

/// TenB entries; addressed as scratchpad rows at offset [`L1_SCP_ENTRIES`].
pub const TENB_ENTRIES: usize = 16;

/// Bytes per scratchpad entry.
pub const SCP_LINE: usize = 64;

/// f32/i32 lanes per scratchpad entry.
pub const SCP_LANES: usize = SCP_LINE / 4;

/// One cache-line-sized scratchpad entry, viewable as u8/u16/u32/f16/f32 lanes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScpEntry(pub [u8; SCP_LINE]);

impl Default for ScpEntry {
    fn default() -> Self {
        Self([0; SCP_LINE])
    }
}

impl ScpEntry {
    pub fn u8_lane(&self, lane: usize) -> u8 {
        self.0[lane]
    }

    pub fn set_u8_lane(&mut self, lane: usize, value: u8) {
        self.0[lane] = value;
    }

    pub fn u16_lane(&self, lane: usize) -> u16 {
        u16::from_le_bytes(self.0[lane * 2..lane * 2 + 2].try_into().unwrap())
    }

    pub fn set_u16_lane(&mut self, lane: usize, value: u16) {
        self.0[lane * 2..lane * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn u32_lane(&self, lane: usize) -> u32 {
        u32::from_le_bytes(self.0[lane * 4..lane * 4 + 4].try_into().unwrap())
    }

    pub fn set_u32_lane(&mut self, lane: usize, value: u32) {
        self.0[lane * 4..lane * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Data-cache operating mode held in `mcache_control`/`ucache_control`.
///
/// The value obeys a transition table (`0 -> {0,1}`, `1 -> {1,3}`, `3 -> {1,3}`): the L1
/// scratchpad can only be enabled from cached mode, and bypass can only be re-entered through
/// cached mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum CacheMode {
    #[default]
    Bypass = 0,
    Cached = 1,
    CachedWithScp = 3,
}

impl CacheMode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Bypass),
            1 => Some(Self::Cached),
            3 => Some(Self::CachedWithScp),
            _ => None,
        }
    }

    /// `true` if the transition table permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: CacheMode) -> bool {
        matches!(
            (self, next),
            (CacheMode::Bypass, CacheMode::Bypass)
                | (CacheMode::Bypass, CacheMode::Cached)
                | (CacheMode::Cached, CacheMode::Cached)
                | (CacheMode::Cached, CacheMode::CachedWithScp)
                | (CacheMode::CachedWithScp, CacheMode::Cached)
                | (CacheMode::CachedWithScp, CacheMode::CachedWithScp)
        )
    }

    /// `true` while the L1 scratchpad is usable.
    pub fn scp_enabled(self) -> bool {
        self == CacheMode::CachedWithScp
    }
}

/// State shared by the two harts of a minion: translation bases, cache mode, the L1
/// scratchpad with its TenB extension, the TenC accumulator, and the tensor units.
#[derive(Debug, Clone)]
pub struct MinionCore {
    pub satp: u64,
    pub matp: u64,
    pub mcache_control: CacheMode,
    pub ucache_control: CacheMode,
    pub menable_shadows: u64,
    pub excl_mode: bool,

    pub l1_scp: [ScpEntry; L1_SCP_ENTRIES],
    pub tenb: [ScpEntry; TENB_ENTRIES],
    /// TensorFMA int8 accumulator: 16x16 lanes of i32.
    pub tenc: [[i32; 16]; 16],

    /// A-operand load units.
    pub tload_a: [TLoad; 2],
    /// The TenB load unit.
    pub tload_b: TLoad,
    /// A-operand load units targeting the L2 scratchpad.
    pub tload_l2: [TLoad; 2],
    pub tmul: TMul,
    pub tquant: TQuant,
    pub tstore: TStore,
    pub reduce: TReduce,
    /// Intra-core ordering queue; `None` selects eager execution.
    pub tqueue: Option<TensorQueue>,
    /// Monotonic id used only for log correlation.
    pub tensor_uuid: u64,
}

impl Default for MinionCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MinionCore {
    pub fn new() -> Self {
        Self {
            satp: 0,
            matp: 0,
            mcache_control: CacheMode::Bypass,
            ucache_control: CacheMode::Bypass,
            menable_shadows: 0,
            excl_mode: false,
            l1_scp: [ScpEntry::default(); L1_SCP_ENTRIES],
            tenb: [ScpEntry::default(); TENB_ENTRIES],
            tenc: [[0; 16]; 16],
            tload_a: [TLoad::default(), TLoad::default()],
            tload_b: TLoad::default(),
            tload_l2: [TLoad::default(), TLoad::default()],
            tmul: TMul::default(),
            tquant: TQuant::default(),
            tstore: TStore::default(),
            reduce: TReduce::default(),
            tqueue: None,
            tensor_uuid: 0,
        }
    }

    pub fn reset(&mut self) {
        let tqueue = self.tqueue.clone();
        *self = Self::new();
        self.tqueue = tqueue.map(|_| TensorQueue::default());
    }

    /// Reads a scratchpad row by tensor index: rows `0..L1_SCP_ENTRIES` are the scratchpad,
    /// rows beyond are the TenB extension (wrapping within it).
    pub fn scp_row(&self, row: usize) -> &ScpEntry {
        if row < L1_SCP_ENTRIES {
            &self.l1_scp[row]
        } else {
            &self.tenb[(row - L1_SCP_ENTRIES) % TENB_ENTRIES]
        }
    }

    pub fn scp_row_mut(&mut self, row: usize) -> &mut ScpEntry {
        if row < L1_SCP_ENTRIES {
            &mut self.l1_scp[row]
        } else {
            &mut self.tenb[(row - L1_SCP_ENTRIES) % TENB_ENTRIES]
        }
    }

    /// `true` while any coprocessor has outstanding work.
    pub fn any_tensor_busy(&self) -> bool {
        !self.tload_a[0].is_idle()
            || !self.tload_a[1].is_idle()
            || !self.tload_b.is_idle()
            || !self.tload_l2[0].is_idle()
            || !self.tload_l2[1].is_idle()
            || !self.tmul.is_idle()
            || !self.tquant.is_idle()
            || !self.tstore.is_idle()
            || !self.reduce.is_idle()
    }

    /// `true` while a cooperative TensorLoad is parked on the rendezvous.
    pub fn any_coop_load_waiting(&self) -> bool {
        use crate::tensor::LoadState;
        self.tload_a
            .iter()
            .chain(std::iter::once(&self.tload_b))
            .any(|unit| unit.state == LoadState::WaitingCoop)
    }

    pub fn next_tensor_uuid(&mut self) -> u64 {
        self.tensor_uuid += 1;
        self.tensor_uuid
    }
}

/// A minion: two harts and their shared core.
#[derive(Debug, Clone)]
pub struct Minion {
    pub harts: [Hart; 2],
    pub core: MinionCore,
}

impl Minion {
    pub fn new(shire: usize, minion: usize) -> Self {
        Self {
            harts: [
                Hart::new(HartIndex::new(shire, minion, 0)),
                Hart::new(HartIndex::new(shire, minion, 1)),
            ],
            core: MinionCore::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_mode_transition_table() {
        use CacheMode::*;
        assert!(Bypass.can_transition_to(Cached));
        assert!(!Bypass.can_transition_to(CachedWithScp));
        assert!(Cached.can_transition_to(CachedWithScp));
        assert!(!Cached.can_transition_to(Bypass));
        assert!(CachedWithScp.can_transition_to(Cached));
        assert!(!CachedWithScp.can_transition_to(Bypass));
    }

    #[test]
    fn test_scp_row_indexing() {
        let mut core = MinionCore::new();
        core.l1_scp[5].set_u32_lane(0, 0x11);
        core.tenb[2].set_u32_lane(0, 0x22);
        assert_eq!(0x11, core.scp_row(5).u32_lane(0));
        assert_eq!(0x22, core.scp_row(L1_SCP_ENTRIES + 2).u32_lane(0));
    }
}
