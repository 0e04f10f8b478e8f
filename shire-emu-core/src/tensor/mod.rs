//! Tensor coprocessor state machines.
//!
//! Each minion core carries five coprocessor families (load, store, FMA, quant, reduce), each
//! driven by writes to its launch CSR. This module defines their state; the sibling modules
//! implement launch decode and execution. Transitions are always driven by explicit events
//! (CSR write, scheduler tick, partner rendezvous, ESR write), never implicitly.

pub mod fma;
pub mod load;
pub mod quant;
pub mod reduce;
pub mod store;

use crate::topology::HartIndex;
use std::collections::VecDeque;

/// Sticky `tensor_error` CSR bits.
pub mod error {
    /// Reserved command encoding.
    pub const RESERVED_COMMAND: u16 = 1 << 1;
    /// Operation requires the L1 scratchpad, but `mcache_control` has it disabled.
    pub const SCP_DISABLED: u16 = 1 << 4;
    /// TensorFMA/TenB pairing violation (row-count mismatch or orphan TenB load).
    pub const TENB_PAIRING: u16 = 1 << 6;
    /// Translation or protection fault in the middle of a row loop.
    pub const ACCESS_FAULT: u16 = 1 << 7;
    /// Illegal cooperative-store parameter combination.
    pub const COOP_PARAMS: u16 = 1 << 8;
    /// Reserved reduce function code or self-partnered reduce.
    pub const REDUCE_FUNCTION: u16 = 1 << 9;
}

/// State of a TensorLoad unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    /// Cooperative load parked until the leader's pending set drains.
    WaitingCoop,
    /// Rendezvous complete; the fill runs at the next scheduler visit.
    Ready,
    /// TenB only: fill complete, contents owned until a paired TensorFMA consumes them.
    Loading,
}

/// One TensorLoad unit (two A-operand slots plus the TenB slot per core).
#[derive(Debug, Clone, Default)]
pub struct TLoad {
    pub state: LoadState,
    /// The raw command word written to the launch CSR.
    pub value: u64,
    /// Row stride, taken from `x31` at launch.
    pub stride: u64,
    /// Row mask latched from `tensor_mask` for masked loads.
    pub mask: u16,
    /// Cooperative descriptor latched from `tensor_coop`.
    pub tcoop: u64,
    /// Hart that launched the load (owner of error reporting and wake-up).
    pub launcher: Option<HartIndex>,
    /// Set when a TensorFMA has committed to consuming this TenB load.
    pub paired: bool,
}

impl TLoad {
    pub fn is_idle(&self) -> bool {
        self.state == LoadState::Idle
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// State of the TensorFMA unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum MulState {
    #[default]
    Idle,
    /// Waiting for the paired TenB load to finish filling.
    WaitingTenb,
    Ready,
}

#[derive(Debug, Clone, Default)]
pub struct TMul {
    pub state: MulState,
    pub value: u64,
    pub rounding: u8,
    pub row_mask: u16,
    pub launcher: Option<HartIndex>,
}

impl TMul {
    pub fn is_idle(&self) -> bool {
        self.state == MulState::Idle
    }
}

/// State of the TensorQuant unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum QuantState {
    #[default]
    Idle,
    Ready,
}

#[derive(Debug, Clone, Default)]
pub struct TQuant {
    pub state: QuantState,
    pub value: u64,
    pub rounding: u8,
    pub launcher: Option<HartIndex>,
}

impl TQuant {
    pub fn is_idle(&self) -> bool {
        self.state == QuantState::Idle
    }
}

/// State of the TensorStore unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum StoreState {
    #[default]
    Idle,
    Ready,
}

#[derive(Debug, Clone, Default)]
pub struct TStore {
    pub state: StoreState,
    pub value: u64,
    pub stride: u64,
    pub launcher: Option<HartIndex>,
}

impl TStore {
    pub fn is_idle(&self) -> bool {
        self.state == StoreState::Idle
    }
}

/// State of the TensorReduce unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ReduceState {
    #[default]
    Idle,
    WaitingToSend,
    WaitingToReceive,
    ReadyToSend,
    ReadyToReceive,
}

/// Reduce function codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReduceFunc {
    Fadd,
    Fmax,
    Fmin,
    Add,
    Max,
    Min,
    Move,
}

impl ReduceFunc {
    /// Decodes the 3-bit function field; `None` for the reserved encoding.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Fadd),
            1 => Some(Self::Fmax),
            2 => Some(Self::Fmin),
            3 => Some(Self::Add),
            4 => Some(Self::Max),
            5 => Some(Self::Min),
            6 => Some(Self::Move),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TReduce {
    pub state: ReduceState,
    /// The hart on the other side of the rendezvous.
    pub partner: Option<HartIndex>,
    /// First `f` register of the transfer window.
    pub reg_base: u8,
    /// Number of registers in the window.
    pub count: u8,
    pub func: Option<ReduceFunc>,
    pub rounding: u8,
    pub launcher: Option<HartIndex>,
}

impl TReduce {
    pub fn is_idle(&self) -> bool {
        self.state == ReduceState::Idle
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Intra-core tensor ordering queue entries.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TensorOp {
    Fma,
    Quant,
    Store,
    Reduce,
}

/// Optional FIFO enforcing intra-core tensor ordering. When absent, operations execute
/// eagerly at launch.
#[derive(Debug, Clone, Default)]
pub struct TensorQueue {
    queue: VecDeque<TensorOp>,
}

impl TensorQueue {
    pub fn push(&mut self, op: TensorOp) {
        self.queue.push_back(op);
    }

    pub fn front(&self) -> Option<TensorOp> {
        self.queue.front().copied()
    }

    pub fn pop(&mut self) -> Option<TensorOp> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
