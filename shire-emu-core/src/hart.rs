//! Per-hart architectural state: register files, privilege and status, waiting reasons,
//! lifecycle, the fetch line cache, and trap delivery.

use crate::topology::HartIndex;
use crate::trap::{DebugCause, Exception, Interrupt, TrapCause};
use crate::{PrivilegeLevel, RawPrivilegeLevel};
use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use core::fmt;
use log::debug;
use std::fmt::Formatter;

/// The bit width of the `x` registers.
pub const XLEN: u32 = 64;

/// The bit width of the `f` (vector) registers.
pub const VLEN: u32 = 256;

/// Bytes per `f` register.
pub const VLENB: usize = (VLEN / 8) as usize;

/// The bit width of the `m` (mask) registers: one bit per byte lane of an `f` register.
pub const MLEN: u32 = VLEN / 8;

/// The number of registers in each file.
pub const LEN: u8 = 32;

/// f32 lanes per `f` register.
pub const F32_LANES: usize = VLENB / 4;

/// Bytes per fetch-cache line.
pub const FETCH_LINE: usize = 32;

const_assert!(MLEN == 32);

/// An `x` register specifier. Can take values in the range `0..LEN`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Specifier(u8);

impl Specifier {
    /// Register `x0`, a.k.a. register `zero`, always returns `0` on read, and ignores any
    /// writes.
    pub const X0: Self = Specifier(0);
    /// Register `x31` carries the side parameters (stride, id) of tensor commands.
    pub const X31: Self = Specifier(31);

    /// Convert a 5-bit value into a register specifier.
    /// Panics if the value doesn't fit in 5 bits (`0..=31`).
    pub fn from_u5(value_u5: u8) -> Self {
        const_assert_eq!(LEN, 32);
        if value_u5 > 31 {
            panic!("out of range u5 used");
        }
        Self(value_u5)
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// The general purpose (`x`) register file.
///
/// Register `x0` is hardwired to zero; writes to it are ignored. It is not possible to get a
/// mutable reference to an `x` register, since that would allow unchecked writes to `x0`.
#[derive(Debug, Clone)]
pub struct Xregs {
    regs: [u64; LEN as usize],
}

impl Default for Xregs {
    fn default() -> Self {
        Self::new()
    }
}

impl Xregs {
    pub fn new() -> Self {
        Self {
            regs: [0; LEN as usize],
        }
    }

    /// Returns the value of an `x` register.
    pub fn x(&self, specifier: Specifier) -> u64 {
        self.regs[usize::from(specifier)]
    }

    /// Sets the value of an `x` register. Writes to register `x0` are ignored.
    pub fn set_x(&mut self, specifier: Specifier, value: u64) {
        if specifier.0 != 0 {
            self.regs[specifier.0 as usize] = value;
        }
    }
}

/// One `f` register: [`VLENB`] bytes viewable as u8/u16/u32/f16/f32 lanes.
///
/// Realized as a plain byte buffer with typed lane accessors; lanes are little-endian.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FReg(pub [u8; VLENB]);

impl Default for FReg {
    fn default() -> Self {
        Self([0; VLENB])
    }
}

impl FReg {
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

    pub fn u64_lane(&self, lane: usize) -> u64 {
        u64::from_le_bytes(self.0[lane * 8..lane * 8 + 8].try_into().unwrap())
    }

    pub fn set_u64_lane(&mut self, lane: usize, value: u64) {
        self.0[lane * 8..lane * 8 + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// All u32 lanes, low to high.
    pub fn u32_lanes(&self) -> [u32; F32_LANES] {
        std::array::from_fn(|lane| self.u32_lane(lane))
    }
}

/// The floating-point/vector (`f`) register file.
///
/// Besides per-register lane access, the file is addressable as a flat sequence of
/// `32 * F32_LANES` f32 lanes; the tensor units deposit result tiles in that lane space.
#[derive(Debug, Clone)]
pub struct Fregs {
    regs: [FReg; LEN as usize],
}

impl Default for Fregs {
    fn default() -> Self {
        Self::new()
    }
}

impl Fregs {
    /// Total f32 lanes in the file.
    pub const F32_LANE_COUNT: usize = LEN as usize * F32_LANES;

    pub fn new() -> Self {
        Self {
            regs: [FReg::default(); LEN as usize],
        }
    }

    pub fn f(&self, reg: u8) -> &FReg {
        &self.regs[reg as usize]
    }

    pub fn f_mut(&mut self, reg: u8) -> &mut FReg {
        &mut self.regs[reg as usize]
    }

    /// Reads the f32 lane at a flat lane index, wrapping modulo the file size.
    pub fn f32_lane(&self, lane: usize) -> u32 {
        let lane = lane % Self::F32_LANE_COUNT;
        self.regs[lane / F32_LANES].u32_lane(lane % F32_LANES)
    }

    /// Writes the f32 lane at a flat lane index, wrapping modulo the file size.
    pub fn set_f32_lane(&mut self, lane: usize, value: u32) {
        let lane = lane % Self::F32_LANE_COUNT;
        self.regs[lane / F32_LANES].set_u32_lane(lane % F32_LANES, value);
    }

    /// Reads a 128-bit tile at a flat tile index (two tiles per register), wrapping modulo the
    /// file size.
    pub fn tile128(&self, tile: usize) -> [u8; 16] {
        let tile = tile % (LEN as usize * 2);
        let reg = &self.regs[tile / 2];
        let offset = (tile % 2) * 16;
        reg.0[offset..offset + 16].try_into().unwrap()
    }
}

/// The mask (`m`) register file: 8 registers of [`MLEN`] bits.
#[derive(Debug, Clone, Default)]
pub struct Mregs {
    regs: [u32; 8],
}

impl Mregs {
    pub fn m(&self, reg: u8) -> u32 {
        self.regs[reg as usize]
    }

    pub fn set_m(&mut self, reg: u8, value: u32) {
        self.regs[reg as usize] = value;
    }

    /// `m0` masks vector memory accesses, one bit per byte lane.
    pub fn m0(&self) -> u32 {
        self.regs[0]
    }
}

/// Reasons a hart can be unable to make progress. A hart carries a set of these; it is runnable
/// only while the set is empty.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Waiting {
    TloadA0 = 0,
    TloadA1 = 1,
    TloadTenb = 2,
    TloadL2A0 = 3,
    TloadL2A1 = 4,
    Tfma = 5,
    Reduce = 6,
    Tquant = 7,
    Tstore = 8,
    Credit0 = 9,
    Credit1 = 10,
    Interrupt = 11,
}

/// Bitmask over [`Waiting`] reasons.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct WaitingSet(u16);

impl WaitingSet {
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, reason: Waiting) -> bool {
        self.0 & (1 << reason as u16) != 0
    }

    pub fn insert(&mut self, reason: Waiting) {
        self.0 |= 1 << reason as u16;
    }

    pub fn remove(&mut self, reason: Waiting) {
        self.0 &= !(1 << reason as u16);
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Lifecycle of a hart.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Lifecycle {
    /// Permanently absent (not populated by `config_simulated_harts`).
    Nonexistent,
    /// Disabled via `thread0_disable`/`thread1_disable` or parked by the test harness.
    Unavailable,
    /// Executing (in one of the scheduler sets).
    Running,
    /// In debug mode, with program-buffer capability.
    Halted,
}

/// Scheduler set a hart currently belongs to. Tracked on the hart so set membership can be
/// checked without scanning the set vectors.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SchedSet {
    /// Not in any set (Nonexistent, Unavailable, or Halted).
    None,
    Active,
    Awaking,
    Sleeping,
}

/// The fetch line cache: one [`FETCH_LINE`]-byte line tagged by its aligned physical... by its
/// aligned virtual address. Invalidated on translation-affecting state changes.
#[derive(Debug, Clone)]
pub struct FetchCache {
    tag: Option<u64>,
    line: [u8; FETCH_LINE],
}

impl Default for FetchCache {
    fn default() -> Self {
        Self {
            tag: None,
            line: [0; FETCH_LINE],
        }
    }
}

impl FetchCache {
    /// Returns the cached line for `address`'s line, if present.
    pub fn lookup(&self, address: u64) -> Option<&[u8; FETCH_LINE]> {
        match self.tag {
            Some(tag) if tag == address & !(FETCH_LINE as u64 - 1) => Some(&self.line),
            _ => None,
        }
    }

    pub fn fill(&mut self, address: u64, line: [u8; FETCH_LINE]) {
        self.tag = Some(address & !(FETCH_LINE as u64 - 1));
        self.line = line;
    }

    pub fn invalidate(&mut self) {
        self.tag = None;
    }
}

/// The `mstatus` register, with typed accessors for the fields this chip implements.
#[derive(Debug, Copy, Clone, Default)]
pub struct Mstatus(u64);

mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11; // 2 bits
    pub const FS: usize = 13; // 2 bits
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
}

/// Writable mask for `mstatus`: the fields above, nothing else.
const MSTATUS_MASK: u64 = 0
    | 1 << idx::SIE
    | 1 << idx::MIE
    | 1 << idx::SPIE
    | 1 << idx::MPIE
    | 1 << idx::SPP
    | 0b11 << idx::MPP
    | 0b11 << idx::FS
    | 1 << idx::MPRV
    | 1 << idx::SUM
    | 1 << idx::MXR;

// Mask to be applied to mstatus to get sstatus.
const SSTATUS_MASK: u64 = 0
    | 1 << idx::SIE
    | 1 << idx::SPIE
    | 1 << idx::SPP
    | 0b11 << idx::FS
    | 1 << idx::SUM
    | 1 << idx::MXR;

impl Mstatus {
    pub fn read(self) -> u64 {
        let sd = (self.fs() == 0b11) as u64;
        self.0 | sd << 63
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let mask = mask & MSTATUS_MASK;
        let mut new = self.0 & !mask | value & mask;
        // MPP is WARL; a reserved value leaves the field unchanged.
        let mpp = new.view_bits::<Lsb0>()[idx::MPP..idx::MPP + 2].load_le::<u8>();
        if RawPrivilegeLevel::from_u2(mpp).is_debug() {
            new = new & !(0b11 << idx::MPP) | self.0 & (0b11 << idx::MPP);
        }
        self.0 = new;
    }

    pub fn read_sstatus(self) -> u64 {
        self.read() & (SSTATUS_MASK | 1 << 63)
    }

    pub fn write_sstatus(&mut self, value: u64, mask: u64) {
        self.write(value, mask & SSTATUS_MASK);
    }

    pub fn mie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MIE]
    }

    pub fn set_mie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    pub fn sie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SIE]
    }

    pub fn set_sie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    pub fn mpie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MPIE]
    }

    pub fn set_mpie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    pub fn spie(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SPIE]
    }

    pub fn set_spie(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    pub fn mpp(self) -> PrivilegeLevel {
        let raw = self.0.view_bits::<Lsb0>()[idx::MPP..idx::MPP + 2].load_le::<u8>();
        // The WARL filter in `write` keeps the field at a defined level.
        RawPrivilegeLevel::from_u2(raw).try_into().unwrap()
    }

    pub fn set_mpp(&mut self, value: PrivilegeLevel) {
        self.0.view_bits_mut::<Lsb0>()[idx::MPP..idx::MPP + 2].store_le(value as u8);
    }

    pub fn spp(self) -> PrivilegeLevel {
        match self.0.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    pub fn set_spp(&mut self, value: PrivilegeLevel) {
        self.0
            .view_bits_mut::<Lsb0>()
            .set(idx::SPP, value != PrivilegeLevel::User);
    }

    pub fn mprv(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MPRV]
    }

    pub fn set_mprv(&mut self, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    pub fn sum(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::SUM]
    }

    pub fn mxr(self) -> bool {
        self.0.view_bits::<Lsb0>()[idx::MXR]
    }

    pub fn fs(self) -> u8 {
        self.0.view_bits::<Lsb0>()[idx::FS..idx::FS + 2].load_le()
    }

    pub fn set_fs(&mut self, value: u8) {
        self.0.view_bits_mut::<Lsb0>()[idx::FS..idx::FS + 2].store_le(value & 0b11);
    }

    /// `true` when the floating-point unit is enabled (`FS != Off`).
    pub fn fp_enabled(self) -> bool {
        self.fs() != 0
    }
}

/// Debug-mode state: `dcsr`/`dpc`/`ddata0` and the program buffer.
#[derive(Debug, Clone, Default)]
pub struct DebugRegs {
    pub dcsr: u64,
    pub dpc: u64,
    pub ddata0: u64,
    pub progbuf: [u32; 8],
    /// Set while the hart is executing out of the program buffer.
    pub in_progbuf: bool,
    /// Index of the next program-buffer slot to execute.
    pub progbuf_pc: usize,
}

impl DebugRegs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_cause(&mut self, cause: DebugCause) {
        self.dcsr = self.dcsr & !(0b111 << 6) | ((cause as u64) << 6);
    }

    /// Single-step request bit of `dcsr`.
    pub fn step(&self) -> bool {
        self.dcsr & (1 << 2) != 0
    }
}

/// One hardware thread.
///
/// A hart stores only its [`HartIndex`]; anything shared (the core, the neighborhood, the
/// shire, main memory) is reached through the system aggregate using that index.
#[derive(Debug, Clone)]
pub struct Hart {
    pub index: HartIndex,
    pub lifecycle: Lifecycle,
    pub sched_set: SchedSet,
    pub waiting: WaitingSet,

    pub pc: u64,
    /// The next PC, written by the execute handler and committed after it returns.
    pub npc: u64,
    pub xregs: Xregs,
    pub fregs: Fregs,
    pub mregs: Mregs,
    pub prv: PrivilegeLevel,
    pub fetch_cache: FetchCache,

    pub mstatus: Mstatus,
    pub mie: u64,
    pub mip: u64,
    pub medeleg: u64,
    pub mideleg: u64,
    pub mtvec: u64,
    pub stvec: u64,
    pub mscratch: u64,
    pub sscratch: u64,
    pub mepc: u64,
    pub sepc: u64,
    pub mcause: u64,
    pub scause: u64,
    pub mtval: u64,
    pub stval: u64,
    pub mcounteren: u64,
    pub scounteren: u64,

    pub fflags: u8,
    pub frm: u8,
    pub cycle: u64,
    pub instret: u64,
    /// Cycle value latched when an hpm counter is programmed to count cycles.
    pub cycle_base: u64,
    pub mhpmevent: [u64; 29],
    pub mhpmcounter: [u64; 29],

    pub tensor_mask: u16,
    pub tensor_conv_size: u64,
    pub tensor_conv_ctrl: u64,
    pub tensor_coop: u64,
    pub tensor_error: u16,
    pub fcc: [u16; 2],
    pub gsc_progress: u64,
    pub portctrl: [u64; 4],
    pub validation: [u64; 4],
    /// Line buffer of the `uart_tx` CSR, flushed to the host log on newline.
    pub uart_line: String,
    /// Active LR reservation, if any.
    pub reservation: Option<u64>,

    pub debug: DebugRegs,
}

impl Hart {
    pub fn new(index: HartIndex) -> Self {
        Self {
            index,
            lifecycle: Lifecycle::Nonexistent,
            sched_set: SchedSet::None,
            waiting: WaitingSet::default(),
            pc: 0,
            npc: 0,
            xregs: Xregs::new(),
            fregs: Fregs::new(),
            mregs: Mregs::default(),
            prv: PrivilegeLevel::Machine,
            fetch_cache: FetchCache::default(),
            mstatus: Mstatus::default(),
            mie: 0,
            mip: 0,
            medeleg: 0,
            mideleg: 0,
            mtvec: 0,
            stvec: 0,
            mscratch: 0,
            sscratch: 0,
            mepc: 0,
            sepc: 0,
            mcause: 0,
            scause: 0,
            mtval: 0,
            stval: 0,
            mcounteren: 0,
            scounteren: 0,
            fflags: 0,
            frm: 0,
            cycle: 0,
            instret: 0,
            cycle_base: 0,
            mhpmevent: [0; 29],
            mhpmcounter: [0; 29],
            tensor_mask: 0,
            tensor_conv_size: 0,
            tensor_conv_ctrl: 0,
            tensor_coop: 0,
            tensor_error: 0,
            fcc: [0; 2],
            gsc_progress: 0,
            portctrl: [0; 4],
            validation: [0; 4],
            uart_line: String::new(),
            reservation: None,
            debug: DebugRegs::default(),
        }
    }

    /// Architectural reset: registers cleared, pc at the reset vector, M-mode, FP on.
    pub fn reset(&mut self, reset_pc: u64) {
        let index = self.index;
        let lifecycle = self.lifecycle;
        *self = Self::new(index);
        self.lifecycle = lifecycle;
        self.pc = reset_pc;
        self.npc = reset_pc;
        // The chip boots with the FP unit in the Initial state.
        self.mstatus.set_fs(0b01);
    }

    /// Returns the current *effective privilege mode*: the privilege at which loads and stores
    /// (but not fetches) execute.
    pub fn effective_privilege(&self) -> PrivilegeLevel {
        match self.mstatus.mprv() {
            true => self.mstatus.mpp(),
            false => self.prv,
        }
    }

    /// Returns `true` if this hart is runnable: Running, with an empty waiting set.
    pub fn is_runnable(&self) -> bool {
        self.lifecycle == Lifecycle::Running && self.waiting.is_empty()
    }

    /// The highest-priority interrupt that would be taken at the next instruction boundary, if
    /// any.
    ///
    /// An interrupt destined for privilege `x` is taken when the hart runs below `x`, or runs
    /// at `x` with `xstatus.xIE` set; it is never taken while running above `x`.
    pub fn pending_interrupt(&self) -> Option<Interrupt> {
        let pending = self.mip & self.mie;
        if pending == 0 {
            return None;
        }
        Interrupt::by_priority().find(|interrupt| {
            let bit = 1u64 << interrupt.code();
            if pending & bit == 0 {
                return false;
            }
            let delegated = self.mideleg & bit != 0;
            match delegated {
                false => {
                    self.prv < PrivilegeLevel::Machine
                        || (self.prv == PrivilegeLevel::Machine && self.mstatus.mie())
                }
                true => {
                    self.prv < PrivilegeLevel::Supervisor
                        || (self.prv == PrivilegeLevel::Supervisor && self.mstatus.sie())
                }
            }
        })
    }

    /// `true` if any enabled interrupt is pending, regardless of the global enables. This is
    /// the wake-up condition for `stall` and WFI.
    pub fn interrupt_would_wake(&self) -> bool {
        self.mip & self.mie != 0
    }

    /// Delivers a trap, committing the PC to the selected handler.
    pub fn deliver_trap(&mut self, cause: TrapCause) {
        let pc = self.pc;
        debug!(pc, cause:?; "{} trap", self.index);
        // Determine if we should be delegating. Note that delegation does not apply to traps
        // that occur in M-mode.
        let delegate = match cause {
            TrapCause::Exception(exception) => self.medeleg & (1 << exception.code()) != 0,
            TrapCause::Interrupt(interrupt) => self.mideleg & (1 << interrupt.code()) != 0,
        };
        let to_s_mode = delegate && self.prv < PrivilegeLevel::Machine;
        let tval = match cause {
            TrapCause::Exception(exception) => exception.tval(pc),
            TrapCause::Interrupt(_) => 0,
        };
        let tvec = match to_s_mode {
            true => {
                self.scause = cause.xcause();
                self.sepc = pc;
                self.stval = tval;
                self.mstatus.set_spie(self.mstatus.sie());
                self.mstatus.set_sie(false);
                self.mstatus.set_spp(self.prv);
                self.prv = PrivilegeLevel::Supervisor;
                self.stvec
            }
            false => {
                self.mcause = cause.xcause();
                self.mepc = pc;
                self.mtval = tval;
                self.mstatus.set_mpie(self.mstatus.mie());
                self.mstatus.set_mie(false);
                self.mstatus.set_mpp(self.prv);
                self.prv = PrivilegeLevel::Machine;
                self.mtvec
            }
        };
        self.npc = crate::trap::handler_address(tvec, cause);
        self.pc = self.npc;
    }

    /// Return from an M-mode trap handler.
    pub fn mret(&mut self) {
        let previous = self.mstatus.mpp();
        self.mstatus.set_mie(self.mstatus.mpie());
        self.mstatus.set_mpie(true);
        self.mstatus.set_mpp(PrivilegeLevel::User);
        if previous != PrivilegeLevel::Machine {
            self.mstatus.set_mprv(false);
        }
        self.prv = previous;
        self.npc = self.mepc;
    }

    /// Return from an S-mode trap handler.
    pub fn sret(&mut self) {
        let previous = self.mstatus.spp();
        self.mstatus.set_sie(self.mstatus.spie());
        self.mstatus.set_spie(true);
        self.mstatus.set_spp(PrivilegeLevel::User);
        self.mstatus.set_mprv(false);
        self.prv = previous;
        self.npc = self.sepc;
    }

    /// Enters debug mode: records the cause and parking PC, halts the hart.
    pub fn enter_debug(&mut self, cause: DebugCause) {
        self.debug.dpc = self.pc;
        self.debug.set_cause(cause);
        self.lifecycle = Lifecycle::Halted;
        self.waiting.clear();
    }

    /// Leaves debug mode, resuming at `dpc`.
    pub fn resume_from_debug(&mut self) {
        self.pc = self.debug.dpc;
        self.npc = self.debug.dpc;
        self.debug.in_progbuf = false;
        self.lifecycle = Lifecycle::Running;
    }

    /// Raises an environment-call exception appropriate for the current privilege.
    pub fn ecall_exception(&self) -> Exception {
        match self.prv {
            PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hart() -> Hart {
        let mut hart = Hart::new(HartIndex::new(0, 0, 0));
        hart.lifecycle = Lifecycle::Running;
        hart.reset(0x1000);
        hart
    }

    #[test]
    fn test_x0_hardwired() {
        let mut xregs = Xregs::new();
        xregs.set_x(Specifier::X0, 0xDEADBEEF);
        assert_eq!(0, xregs.x(Specifier::X0));
        xregs.set_x(Specifier::from_u5(5), 42);
        assert_eq!(42, xregs.x(Specifier::from_u5(5)));
    }

    #[test]
    fn test_freg_lanes() {
        let mut reg = FReg::default();
        reg.set_u32_lane(3, 0xAABBCCDD);
        assert_eq!(0xAABBCCDD, reg.u32_lane(3));
        assert_eq!(0xDD, reg.u8_lane(12));
        assert_eq!(0xAABB, reg.u16_lane(7));
    }

    #[test]
    fn test_freg_flat_lanes() {
        let mut fregs = Fregs::new();
        fregs.set_f32_lane(0, 1);
        fregs.set_f32_lane(F32_LANES, 2);
        assert_eq!(1, fregs.f(0).u32_lane(0));
        assert_eq!(2, fregs.f(1).u32_lane(0));
        // Lane indices wrap modulo the file.
        assert_eq!(1, fregs.f32_lane(Fregs::F32_LANE_COUNT));
    }

    #[test]
    fn test_fetch_cache() {
        let mut cache = FetchCache::default();
        assert!(cache.lookup(0x1000).is_none());
        cache.fill(0x1010, [7; FETCH_LINE]);
        assert!(cache.lookup(0x1000).is_some());
        assert!(cache.lookup(0x101F).is_some());
        assert!(cache.lookup(0x1020).is_none());
        cache.invalidate();
        assert!(cache.lookup(0x1000).is_none());
    }

    #[test]
    fn test_mstatus_mpp_warl() {
        let mut mstatus = Mstatus::default();
        mstatus.write(0b11 << 11, u64::MAX);
        assert_eq!(PrivilegeLevel::Machine, mstatus.mpp());
        // Writing the reserved level 2 leaves the field unchanged.
        mstatus.write(0b10 << 11, u64::MAX);
        assert_eq!(PrivilegeLevel::Machine, mstatus.mpp());
        mstatus.write(0b00 << 11, 0b11 << 11);
        assert_eq!(PrivilegeLevel::User, mstatus.mpp());
    }

    #[test]
    fn test_trap_delivery_to_m() {
        let mut hart = test_hart();
        hart.mtvec = 0x8000;
        hart.mstatus.set_mie(true);
        hart.deliver_trap(Exception::IllegalInstruction(Some(0x13)).into());
        assert_eq!(0x8000, hart.pc);
        assert_eq!(0x1000, hart.mepc);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.mcause);
        assert_eq!(0x13, hart.mtval);
        assert_eq!(PrivilegeLevel::Machine, hart.prv);
        assert!(!hart.mstatus.mie());
        assert!(hart.mstatus.mpie());
    }

    #[test]
    fn test_trap_delegation_to_s() {
        let mut hart = test_hart();
        hart.prv = PrivilegeLevel::User;
        hart.stvec = 0x4000;
        hart.medeleg = 1 << Exception::ENVIRONMENT_CALL_FROM_U_MODE;
        hart.deliver_trap(Exception::EnvironmentCallFromUMode.into());
        assert_eq!(0x4000, hart.pc);
        assert_eq!(PrivilegeLevel::Supervisor, hart.prv);
        assert_eq!(0x1000, hart.sepc);
        // Delegation does not apply from M-mode.
        let mut hart = test_hart();
        hart.mtvec = 0x8000;
        hart.stvec = 0x4000;
        hart.medeleg = 1 << Exception::ENVIRONMENT_CALL_FROM_M_MODE;
        hart.deliver_trap(Exception::EnvironmentCallFromMMode.into());
        assert_eq!(0x8000, hart.pc);
        assert_eq!(PrivilegeLevel::Machine, hart.prv);
    }

    #[test]
    fn test_mret_round_trip() {
        let mut hart = test_hart();
        hart.prv = PrivilegeLevel::User;
        hart.mtvec = 0x8000;
        hart.mstatus.set_mie(true);
        hart.deliver_trap(Exception::EnvironmentCallFromUMode.into());
        assert_eq!(PrivilegeLevel::Machine, hart.prv);
        hart.mret();
        assert_eq!(PrivilegeLevel::User, hart.prv);
        assert_eq!(0x1000, hart.npc);
        assert!(hart.mstatus.mie());
    }

    #[test]
    fn test_pending_interrupt_priority_and_masking() {
        let mut hart = test_hart();
        hart.mie = (1 << Interrupt::MACHINE_TIMER) | (1 << Interrupt::MACHINE_EXTERNAL);
        hart.mip = hart.mie;
        // M-mode with MIE clear: nothing taken.
        assert_eq!(None, hart.pending_interrupt());
        hart.mstatus.set_mie(true);
        assert_eq!(Some(Interrupt::MachineExternal), hart.pending_interrupt());
        // U-mode takes M-destined interrupts regardless of MIE.
        hart.mstatus.set_mie(false);
        hart.prv = PrivilegeLevel::User;
        assert_eq!(Some(Interrupt::MachineExternal), hart.pending_interrupt());
    }
}
