//! The execution engine: fetch, decode, execute, trap delivery, and the CSR plane.
//!
//! The scheduler calls [`step`] once per active hart per pass. A handler that cannot make
//! progress records a waiting reason and returns [`ExecutionInterrupt::Restart`]; the PC is
//! then left in place and the instruction re-runs after wake-up.

use crate::observer::Observer;
use crate::csr::{self, CsrSpecifier};
use crate::fpu::{self, RoundingMode};
use crate::hart::{Lifecycle, Specifier, Waiting, F32_LANES, MLEN};
use crate::instruction::{
    AmoOp, AmoWidth, BranchCondition, CsrOp, FpFmaOp, FpOp, Instruction, LoadWidth, MaskOp,
    PackedOp, RegImm32Op, RegImmOp, RegReg32Op, RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::minion::CacheMode;
use crate::mmu::{MemoryError, Mmu, MATP_LOCK};
use crate::pma::AccessType;
use crate::system::System;
use crate::tensor;
use crate::topology::HartIndex;
use crate::trap::{Exception, ExecutionInterrupt, ExecutionResult};
use crate::PrivilegeLevel;
use log::{debug, info, trace};

/// `mhpmevent` value selecting the cycle counter relative to its programming point.
pub const PMU_MINION_EVENT_CYCLES: u64 = 1;

/// Test-harness sentinel: a hart that has passed parks itself.
pub const VALIDATION_PASS: u64 = 0x1FEE_D000;
/// Test-harness sentinel: global failure.
pub const VALIDATION_FAIL: u64 = 0x50BA_D000;
/// `validation1` end-of-test byte (ASCII EOT).
pub const VALIDATION_EOT: u64 = 0x4;

/// Executes one instruction (or takes one pending interrupt) on `hart`.
pub fn step(system: &mut System, hart: HartIndex) {
    // Interrupts take effect only at instruction boundaries.
    if let Some(interrupt) = system.hart(hart).pending_interrupt() {
        system.hart_mut(hart).waiting.remove(Waiting::Interrupt);
        system.hart_mut(hart).deliver_trap(interrupt.into());
        return;
    }
    let pc = system.hart(hart).pc;
    let (instruction, length) = match fetch_and_decode(system, hart, pc) {
        Ok(pair) => pair,
        Err(exception) => {
            system.hart_mut(hart).deliver_trap(exception.into());
            return;
        }
    };
    system.hart_mut(hart).npc = pc.wrapping_add(length);
    let mut executor = Executor {
        system: &mut *system,
        hart,
    };
    match executor.execute(instruction) {
        Ok(()) => {
            let npc = system.hart(hart).npc;
            system.hart_mut(hart).pc = npc;
            system.hart_mut(hart).instret += 1;
            system.observer.pc_update(hart, npc);
        }
        Err(ExecutionInterrupt::Trap(exception)) => {
            system.hart_mut(hart).deliver_trap(exception.into());
        }
        Err(ExecutionInterrupt::Restart) => {
            // Re-execute after wake-up; the handler has recorded its waiting reason.
            system.hart_mut(hart).npc = pc;
        }
        Err(ExecutionInterrupt::DebugEntry(cause)) => {
            system.hart_mut(hart).enter_debug(cause);
            system.halt_hart(hart);
        }
    }
}

/// Executes one program-buffer slot on a halted hart.
pub fn step_progbuf(system: &mut System, hart: HartIndex) {
    let slot = system.hart(hart).debug.progbuf_pc;
    if slot >= system.hart(hart).debug.progbuf.len() {
        system.hart_mut(hart).debug.in_progbuf = false;
        return;
    }
    let raw = system.hart(hart).debug.progbuf[slot];
    system.hart_mut(hart).debug.progbuf_pc = slot + 1;
    let instruction = if Instruction::is_compressed(raw as u16) {
        Instruction::decode_compressed(raw as u16)
    } else {
        Instruction::decode(raw)
    };
    let instruction = match instruction {
        Ok(instruction) => instruction,
        Err(_) => {
            debug!("{hart} illegal instruction in program buffer; aborting");
            system.hart_mut(hart).debug.in_progbuf = false;
            return;
        }
    };
    if matches!(instruction, Instruction::Ebreak) {
        system.hart_mut(hart).debug.in_progbuf = false;
        return;
    }
    let pc = system.hart(hart).pc;
    system.hart_mut(hart).npc = pc;
    let mut executor = Executor {
        system: &mut *system,
        hart,
    };
    if let Err(err) = executor.execute(instruction) {
        debug!("{hart} program-buffer instruction failed: {err:?}");
        system.hart_mut(hart).debug.in_progbuf = false;
    }
}

fn fetch_and_decode(
    system: &mut System,
    hart: HartIndex,
    pc: u64,
) -> Result<(Instruction, u64), Exception> {
    let mut mmu = Mmu::new(system, hart);
    let low = mmu
        .fetch_parcel(pc)
        .map_err(|err| err.to_exception(AccessType::Execute, pc))?;
    if Instruction::is_compressed(low) {
        let instruction = Instruction::decode_compressed(low)
            .map_err(|_| Exception::IllegalInstruction(Some(low as u32)))?;
        return Ok((instruction, 2));
    }
    // The upper parcel may sit on the next fetch line (or page).
    let high = mmu
        .fetch_parcel(pc.wrapping_add(2))
        .map_err(|err| err.to_exception(AccessType::Execute, pc.wrapping_add(2)))?;
    let raw = (high as u32) << 16 | low as u32;
    let instruction =
        Instruction::decode(raw).map_err(|_| Exception::IllegalInstruction(Some(raw)))?;
    Ok((instruction, 4))
}

pub struct Executor<'s> {
    pub system: &'s mut System,
    pub hart: HartIndex,
}

impl<'s> Executor<'s> {
    fn x(&self, specifier: Specifier) -> u64 {
        self.system.hart(self.hart).xregs.x(specifier)
    }

    fn set_x(&mut self, specifier: Specifier, value: u64) {
        self.system.hart_mut(self.hart).xregs.set_x(specifier, value);
        self.system
            .observer
            .xreg_write(self.hart, u8::from(specifier), value);
    }

    fn mmu(&mut self) -> Mmu<'_> {
        Mmu::new(self.system, self.hart)
    }

    fn prv(&self) -> PrivilegeLevel {
        self.system.hart(self.hart).prv
    }

    /// FP instructions require the FS field of `mstatus` to be non-zero.
    fn require_fp(&self) -> ExecutionResult {
        if self.system.hart(self.hart).mstatus.fp_enabled() {
            Ok(())
        } else {
            Err(Exception::IllegalInstruction(None).into())
        }
    }

    fn mark_fp_dirty(&mut self) {
        self.system.hart_mut(self.hart).mstatus.set_fs(0b11);
    }

    fn resolve_rm(&self, rm_field: u8) -> Result<RoundingMode, ExecutionInterrupt> {
        let bits = match rm_field {
            0b111 => self.system.hart(self.hart).frm,
            bits => bits,
        };
        RoundingMode::from_bits(bits).ok_or_else(|| Exception::IllegalInstruction(None).into())
    }

    fn accrue(&mut self, flags: u8) {
        if flags != 0 {
            self.system.accrue_fflags(self.hart, flags);
        }
    }

    fn f32_scalar(&self, reg: u8) -> u32 {
        self.system.hart(self.hart).fregs.f(reg).u32_lane(0)
    }

    fn set_f32_scalar(&mut self, reg: u8, value: u32) {
        self.system
            .hart_mut(self.hart)
            .fregs
            .f_mut(reg)
            .set_u32_lane(0, value);
        self.mark_fp_dirty();
        self.system.observer.freg_write(self.hart, reg, &[value]);
    }

    /// Executes a single decoded instruction.
    pub fn execute(&mut self, instruction: Instruction) -> ExecutionResult {
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let s = self.x(src);
                let result = match op {
                    RegImmOp::Addi => s.wrapping_add_signed(immediate),
                    RegImmOp::Slti => ((s as i64) < immediate) as u64,
                    RegImmOp::Sltiu => (s < immediate as u64) as u64,
                    RegImmOp::Xori => s ^ immediate as u64,
                    RegImmOp::Ori => s | immediate as u64,
                    RegImmOp::Andi => s & immediate as u64,
                };
                self.set_x(dest, result);
                Ok(())
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u6,
            } => {
                let s = self.x(src);
                let result = match op {
                    RegShiftImmOp::Slli => s << shift_amount_u6,
                    RegShiftImmOp::Srli => s >> shift_amount_u6,
                    RegShiftImmOp::Srai => ((s as i64) >> shift_amount_u6) as u64,
                    RegShiftImmOp::Slliw => ((s as u32) << shift_amount_u6) as i32 as u64,
                    RegShiftImmOp::Srliw => ((s as u32) >> shift_amount_u6) as i32 as u64,
                    RegShiftImmOp::Sraiw => ((s as i32) >> shift_amount_u6) as u64,
                };
                self.set_x(dest, result);
                Ok(())
            }
            Instruction::OpImm32 {
                op: RegImm32Op::Addiw,
                dest,
                src,
                immediate,
            } => {
                let result = (self.x(src) as i32).wrapping_add(immediate as i32) as u64;
                self.set_x(dest, result);
                Ok(())
            }
            Instruction::Auipc { dest, immediate } => {
                let pc = self.system.hart(self.hart).pc;
                self.set_x(dest, pc.wrapping_add_signed(immediate));
                Ok(())
            }
            Instruction::Lui { dest, immediate } => {
                self.set_x(dest, immediate as u64);
                Ok(())
            }
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let (a, b) = (self.x(src1), self.x(src2));
                let result = match op {
                    RegRegOp::Add => a.wrapping_add(b),
                    RegRegOp::Sub => a.wrapping_sub(b),
                    RegRegOp::Slt => ((a as i64) < (b as i64)) as u64,
                    RegRegOp::Sltu => (a < b) as u64,
                    RegRegOp::And => a & b,
                    RegRegOp::Or => a | b,
                    RegRegOp::Xor => a ^ b,
                    RegRegOp::Sll => a << (b & 0x3F),
                    RegRegOp::Srl => a >> (b & 0x3F),
                    RegRegOp::Sra => ((a as i64) >> (b & 0x3F)) as u64,
                    RegRegOp::Mul => a.wrapping_mul(b),
                    RegRegOp::Mulh => (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64,
                    RegRegOp::Mulhsu => (((a as i64 as i128) * (b as u128 as i128)) >> 64) as u64,
                    RegRegOp::Mulhu => (((a as u128) * (b as u128)) >> 64) as u64,
                    RegRegOp::Div => match b {
                        0 => u64::MAX,
                        _ => (a as i64).overflowing_div(b as i64).0 as u64,
                    },
                    RegRegOp::Divu => a.checked_div(b).unwrap_or(u64::MAX),
                    RegRegOp::Rem => match b {
                        0 => a,
                        _ => (a as i64).overflowing_rem(b as i64).0 as u64,
                    },
                    RegRegOp::Remu => a.checked_rem(b).unwrap_or(a),
                };
                self.set_x(dest, result);
                Ok(())
            }
            Instruction::Op32 {
                op,
                dest,
                src1,
                src2,
            } => {
                let (a, b) = (self.x(src1) as u32, self.x(src2) as u32);
                let result = match op {
                    RegReg32Op::Addw => a.wrapping_add(b) as i32 as u64,
                    RegReg32Op::Subw => a.wrapping_sub(b) as i32 as u64,
                    RegReg32Op::Sllw => (a << (b & 0x1F)) as i32 as u64,
                    RegReg32Op::Srlw => (a >> (b & 0x1F)) as i32 as u64,
                    RegReg32Op::Sraw => ((a as i32) >> (b & 0x1F)) as u64,
                    RegReg32Op::Mulw => a.wrapping_mul(b) as i32 as u64,
                    RegReg32Op::Divw => match b {
                        0 => u64::MAX,
                        _ => (a as i32).overflowing_div(b as i32).0 as u64,
                    },
                    RegReg32Op::Divuw => a.checked_div(b).map(|v| v as i32 as u64).unwrap_or(u64::MAX),
                    RegReg32Op::Remw => match b {
                        0 => a as i32 as u64,
                        _ => (a as i32).overflowing_rem(b as i32).0 as u64,
                    },
                    RegReg32Op::Remuw => a.checked_rem(b).map(|v| v as i32 as u64).unwrap_or(a as i32 as u64),
                };
                self.set_x(dest, result);
                Ok(())
            }
            Instruction::Jal { dest, offset } => {
                let pc = self.system.hart(self.hart).pc;
                let npc = self.system.hart(self.hart).npc;
                self.set_x(dest, npc);
                self.system.hart_mut(self.hart).npc = pc.wrapping_add_signed(offset);
                Ok(())
            }
            Instruction::Jalr { dest, base, offset } => {
                let npc = self.system.hart(self.hart).npc;
                let target = self.x(base).wrapping_add_signed(offset) & !1;
                self.set_x(dest, npc);
                self.system.hart_mut(self.hart).npc = target;
                Ok(())
            }
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let (a, b) = (self.x(src1), self.x(src2));
                let taken = match condition {
                    BranchCondition::Beq => a == b,
                    BranchCondition::Bne => a != b,
                    BranchCondition::Blt => (a as i64) < (b as i64),
                    BranchCondition::Bge => (a as i64) >= (b as i64),
                    BranchCondition::Bltu => a < b,
                    BranchCondition::Bgeu => a >= b,
                };
                if taken {
                    let pc = self.system.hart(self.hart).pc;
                    self.system.hart_mut(self.hart).npc = pc.wrapping_add_signed(offset);
                }
                Ok(())
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let vaddr = self.x(base).wrapping_add_signed(offset);
                let value = self.load(width, vaddr)?;
                self.set_x(dest, value);
                Ok(())
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let vaddr = self.x(base).wrapping_add_signed(offset);
                let value = self.x(src);
                self.store(width, vaddr, value)
            }
            Instruction::Amo {
                op,
                width,
                aq: _,
                rl: _,
                src,
                addr,
                dest,
            } => self.amo(op, width, src, addr, dest),
            Instruction::LoadFp { dest, base, offset } => {
                self.require_fp()?;
                let vaddr = self.x(base).wrapping_add_signed(offset);
                let value = self
                    .mmu()
                    .load32(vaddr)
                    .map_err(|err| err.to_exception(AccessType::Read, vaddr))?;
                self.set_f32_scalar(dest, value);
                Ok(())
            }
            Instruction::StoreFp { src, base, offset } => {
                self.require_fp()?;
                let vaddr = self.x(base).wrapping_add_signed(offset);
                let value = self.f32_scalar(src);
                self.mmu()
                    .store32(vaddr, value)
                    .map_err(|err| err.to_exception(AccessType::Write, vaddr))
                    .map_err(ExecutionInterrupt::from)
            }
            Instruction::OpFp {
                op,
                dest,
                src1,
                src2,
                rm,
            } => self.op_fp(op, dest, src1, src2, rm),
            Instruction::FpFma {
                op,
                dest,
                src1,
                src2,
                src3,
                rm,
            } => {
                self.require_fp()?;
                let rm = self.resolve_rm(rm)?;
                let (a, b, c) = (
                    self.f32_scalar(src1),
                    self.f32_scalar(src2),
                    self.f32_scalar(src3),
                );
                const SIGN: u32 = 0x8000_0000;
                let (result, flags) = match op {
                    FpFmaOp::Madd => fpu::f32_mul_add(a, b, c, rm),
                    FpFmaOp::Msub => fpu::f32_mul_add(a, b, c ^ SIGN, rm),
                    FpFmaOp::Nmsub => fpu::f32_mul_add(a ^ SIGN, b, c, rm),
                    FpFmaOp::Nmadd => fpu::f32_mul_add(a ^ SIGN, b, c ^ SIGN, rm),
                };
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
                Ok(())
            }
            Instruction::VLoad { dest, base, offset } => {
                self.require_fp()?;
                let vaddr = self.x(base).wrapping_add_signed(offset);
                let mask = self.system.hart(self.hart).mregs.m0();
                let data = self
                    .mmu()
                    .load_vector(vaddr, mask)
                    .map_err(|err| err.to_exception(AccessType::Read, vaddr))?;
                let fregs = &mut self.system.hart_mut(self.hart).fregs;
                fregs.f_mut(dest).0 = data;
                self.mark_fp_dirty();
                Ok(())
            }
            Instruction::VStore { src, base, offset } => {
                self.require_fp()?;
                let vaddr = self.x(base).wrapping_add_signed(offset);
                let mask = self.system.hart(self.hart).mregs.m0();
                let data = self.system.hart(self.hart).fregs.f(src).0;
                self.mmu()
                    .store_vector(vaddr, &data, mask)
                    .map_err(|err| err.to_exception(AccessType::Write, vaddr))
                    .map_err(ExecutionInterrupt::from)
            }
            Instruction::OpPacked {
                op,
                dest,
                src1,
                src2,
            } => {
                self.require_fp()?;
                let rm = self.resolve_rm(0b111)?;
                let mask = self.system.hart(self.hart).mregs.m0();
                let mut flags = 0u8;
                let mut lanes = [0u32; F32_LANES];
                for lane in 0..F32_LANES {
                    let a = self.system.hart(self.hart).fregs.f(src1).u32_lane(lane);
                    let b = self.system.hart(self.hart).fregs.f(src2).u32_lane(lane);
                    let d = self.system.hart(self.hart).fregs.f(dest).u32_lane(lane);
                    // Lane enable comes from the byte-granular m0 mask.
                    if mask & (1 << (lane * 4)) == 0 {
                        lanes[lane] = d;
                        continue;
                    }
                    let (r, fl) = match op {
                        PackedOp::Add => fpu::f32_add(a, b, rm),
                        PackedOp::Mul => fpu::f32_mul(a, b, rm),
                        PackedOp::Fmadd => fpu::f32_mul_add(a, b, d, rm),
                    };
                    flags |= fl;
                    lanes[lane] = r;
                }
                self.accrue(flags);
                let fregs = &mut self.system.hart_mut(self.hart).fregs;
                for (lane, value) in lanes.iter().enumerate() {
                    fregs.f_mut(dest).set_u32_lane(lane, *value);
                }
                self.mark_fp_dirty();
                self.system.observer.freg_write(self.hart, dest, &lanes);
                Ok(())
            }
            Instruction::VBroadcast { dest, src } => {
                self.require_fp()?;
                let value = self.x(src) as u32;
                let fregs = &mut self.system.hart_mut(self.hart).fregs;
                for lane in 0..F32_LANES {
                    fregs.f_mut(dest).set_u32_lane(lane, value);
                }
                self.mark_fp_dirty();
                Ok(())
            }
            Instruction::OpMask {
                op,
                dest,
                mask,
                src,
            } => {
                match op {
                    MaskOp::MovXM => {
                        let value = self.x(src) as u32;
                        self.system.hart_mut(self.hart).mregs.set_m(mask, value);
                        self.system.observer.mreg_write(self.hart, mask, value);
                    }
                    MaskOp::MovMX => {
                        let value = self.system.hart(self.hart).mregs.m(mask);
                        self.set_x(dest, value as u64);
                    }
                    MaskOp::Popc => {
                        let value = self.system.hart(self.hart).mregs.m(mask);
                        self.set_x(dest, value.count_ones() as u64);
                    }
                }
                Ok(())
            }
            Instruction::Fence { .. } => Ok(()),
            Instruction::Ecall => Err(self.system.hart(self.hart).ecall_exception().into()),
            Instruction::Ebreak => {
                if self.system.hart(self.hart).debug.in_progbuf {
                    self.system.hart_mut(self.hart).debug.in_progbuf = false;
                    Ok(())
                } else {
                    Err(Exception::Breakpoint.into())
                }
            }
            Instruction::Sret => {
                if self.prv() < PrivilegeLevel::Supervisor {
                    return Err(Exception::IllegalInstruction(None).into());
                }
                self.system.hart_mut(self.hart).sret();
                Ok(())
            }
            Instruction::Mret => {
                if self.prv() != PrivilegeLevel::Machine {
                    return Err(Exception::IllegalInstruction(None).into());
                }
                self.system.hart_mut(self.hart).mret();
                Ok(())
            }
            Instruction::Wfi => {
                let hart = self.system.hart_mut(self.hart);
                if !hart.interrupt_would_wake() {
                    hart.waiting.insert(Waiting::Interrupt);
                }
                Ok(())
            }
            Instruction::SfenceVma { .. } => {
                if self.prv() < PrivilegeLevel::Supervisor {
                    return Err(Exception::IllegalInstruction(None).into());
                }
                self.system.invalidate_fetch_caches_of_core(self.hart);
                Ok(())
            }
            Instruction::Csr { op, dest, csr, src } => {
                let source = self.x(src);
                let write = match op {
                    CsrOp::ReadWrite => Some(source),
                    CsrOp::ReadSet if u8::from(src) != 0 => Some(source),
                    CsrOp::ReadClear if u8::from(src) != 0 => Some(source),
                    _ => None,
                };
                self.csr_op(op, dest, csr, write)
            }
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => {
                let write = match op {
                    CsrOp::ReadWrite => Some(immediate),
                    CsrOp::ReadSet if immediate != 0 => Some(immediate),
                    CsrOp::ReadClear if immediate != 0 => Some(immediate),
                    _ => None,
                };
                self.csr_op(op, dest, csr, write)
            }
        }
    }

    fn load(&mut self, width: LoadWidth, vaddr: u64) -> Result<u64, ExecutionInterrupt> {
        let map = |err: MemoryError| err.to_exception(AccessType::Read, vaddr);
        let value = match width {
            LoadWidth::Lb => self.mmu().load8(vaddr).map_err(map)? as i8 as u64,
            LoadWidth::Lbu => self.mmu().load8(vaddr).map_err(map)? as u64,
            LoadWidth::Lh => self.mmu().load16(vaddr).map_err(map)? as i16 as u64,
            LoadWidth::Lhu => self.mmu().load16(vaddr).map_err(map)? as u64,
            LoadWidth::Lw => self.mmu().load32(vaddr).map_err(map)? as i32 as u64,
            LoadWidth::Lwu => self.mmu().load32(vaddr).map_err(map)? as u64,
            LoadWidth::Ld => self.mmu().load64(vaddr).map_err(map)?,
        };
        Ok(value)
    }

    fn store(&mut self, width: StoreWidth, vaddr: u64, value: u64) -> ExecutionResult {
        let map = |err: MemoryError| err.to_exception(AccessType::Write, vaddr);
        match width {
            StoreWidth::Sb => self.mmu().store8(vaddr, value as u8).map_err(map)?,
            StoreWidth::Sh => self.mmu().store16(vaddr, value as u16).map_err(map)?,
            StoreWidth::Sw => self.mmu().store32(vaddr, value as u32).map_err(map)?,
            StoreWidth::Sd => self.mmu().store64(vaddr, value).map_err(map)?,
        }
        Ok(())
    }

    fn amo(
        &mut self,
        op: AmoOp,
        width: AmoWidth,
        src: Specifier,
        addr: Specifier,
        dest: Specifier,
    ) -> ExecutionResult {
        let vaddr = self.x(addr);
        let size = match width {
            AmoWidth::W => 4,
            AmoWidth::D => 8,
        };
        let map = |err: MemoryError| err.to_exception(AccessType::Write, vaddr);
        let sign_extend = |value: u64| match width {
            AmoWidth::W => value as u32 as i32 as u64,
            AmoWidth::D => value,
        };
        match op {
            AmoOp::Lr => {
                if vaddr % size != 0 {
                    return Err(Exception::LoadAddressMisaligned(vaddr).into());
                }
                let value = match width {
                    AmoWidth::W => self
                        .mmu()
                        .load32(vaddr)
                        .map_err(|err| err.to_exception(AccessType::Read, vaddr))?
                        as i32 as u64,
                    AmoWidth::D => self
                        .mmu()
                        .load64(vaddr)
                        .map_err(|err| err.to_exception(AccessType::Read, vaddr))?,
                };
                self.system.hart_mut(self.hart).reservation = Some(vaddr);
                self.set_x(dest, value);
                Ok(())
            }
            AmoOp::Sc => {
                let reserved = self.system.hart(self.hart).reservation == Some(vaddr);
                self.system.hart_mut(self.hart).reservation = None;
                if vaddr % size != 0 {
                    return Err(Exception::StoreOrAmoAddressMisaligned(vaddr).into());
                }
                if reserved {
                    let value = self.x(src);
                    match width {
                        AmoWidth::W => self.mmu().store32(vaddr, value as u32).map_err(map)?,
                        AmoWidth::D => self.mmu().store64(vaddr, value).map_err(map)?,
                    }
                    self.set_x(dest, 0);
                } else {
                    self.set_x(dest, 1);
                }
                Ok(())
            }
            _ => {
                let operand = self.x(src);
                let old = self
                    .mmu()
                    .amo(vaddr, size, true, |old| {
                        let (a, b) = match width {
                            AmoWidth::W => (old as u32 as i32 as i64, operand as u32 as i32 as i64),
                            AmoWidth::D => (old as i64, operand as i64),
                        };
                        let result = match op {
                            AmoOp::Swap => operand,
                            AmoOp::Add => (a.wrapping_add(b)) as u64,
                            AmoOp::Xor => old ^ operand,
                            AmoOp::And => old & operand,
                            AmoOp::Or => old | operand,
                            AmoOp::Min => a.min(b) as u64,
                            AmoOp::Max => a.max(b) as u64,
                            AmoOp::Minu => match width {
                                AmoWidth::W => (old as u32).min(operand as u32) as u64,
                                AmoWidth::D => old.min(operand),
                            },
                            AmoOp::Maxu => match width {
                                AmoWidth::W => (old as u32).max(operand as u32) as u64,
                                AmoWidth::D => old.max(operand),
                            },
                            AmoOp::Lr | AmoOp::Sc => unreachable!(),
                        };
                        match width {
                            AmoWidth::W => result as u32 as u64,
                            AmoWidth::D => result,
                        }
                    })
                    .map_err(map)?;
                self.set_x(dest, sign_extend(old));
                Ok(())
            }
        }
    }

    fn op_fp(&mut self, op: FpOp, dest: u8, src1: u8, src2: u8, rm: u8) -> ExecutionResult {
        self.require_fp()?;
        let a = self.f32_scalar(src1);
        let b = self.f32_scalar(src2);
        let dest_x = Specifier::from_u5(dest);
        let src1_x = Specifier::from_u5(src1);
        match op {
            FpOp::Add | FpOp::Sub | FpOp::Mul | FpOp::Div | FpOp::Sqrt => {
                let rm = self.resolve_rm(rm)?;
                let (result, flags) = match op {
                    FpOp::Add => fpu::f32_add(a, b, rm),
                    FpOp::Sub => fpu::f32_sub(a, b, rm),
                    FpOp::Mul => fpu::f32_mul(a, b, rm),
                    FpOp::Div => fpu::f32_div(a, b, rm),
                    FpOp::Sqrt => fpu::f32_sqrt(a, rm),
                    _ => unreachable!(),
                };
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::SgnJ => self.set_f32_scalar(dest, a & !0x8000_0000 | b & 0x8000_0000),
            FpOp::SgnJn => self.set_f32_scalar(dest, a & !0x8000_0000 | !b & 0x8000_0000),
            FpOp::SgnJx => self.set_f32_scalar(dest, a ^ b & 0x8000_0000),
            FpOp::Min => {
                let (result, flags) = fpu::f32_min(a, b);
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::Max => {
                let (result, flags) = fpu::f32_max(a, b);
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::CvtWS => {
                let rm = self.resolve_rm(rm)?;
                let (result, flags) = fpu::f32_to_i32(a, rm);
                self.accrue(flags);
                self.set_x(dest_x, result as u64);
            }
            FpOp::CvtWuS => {
                let rm = self.resolve_rm(rm)?;
                let (result, flags) = fpu::f32_to_u32(a, rm);
                self.accrue(flags);
                self.set_x(dest_x, result as i32 as u64);
            }
            FpOp::CvtLS => {
                let rm = self.resolve_rm(rm)?;
                let (result, flags) = fpu::f32_to_i64(a, rm);
                self.accrue(flags);
                self.set_x(dest_x, result as u64);
            }
            FpOp::CvtLuS => {
                let rm = self.resolve_rm(rm)?;
                let (result, flags) = fpu::f32_to_u64(a, rm);
                self.accrue(flags);
                self.set_x(dest_x, result);
            }
            FpOp::CvtSW => {
                let rm = self.resolve_rm(rm)?;
                let value = self.x(src1_x) as i32;
                let (result, flags) = fpu::i32_to_f32(value, rm);
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::CvtSWu => {
                let rm = self.resolve_rm(rm)?;
                let value = self.x(src1_x) as u32;
                let (result, flags) = fpu::u32_to_f32(value, rm);
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::CvtSL => {
                let rm = self.resolve_rm(rm)?;
                let value = self.x(src1_x) as i64;
                let (result, flags) = fpu::i64_to_f32(value, rm);
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::CvtSLu => {
                let rm = self.resolve_rm(rm)?;
                let value = self.x(src1_x);
                let (result, flags) = fpu::u64_to_f32(value, rm);
                self.accrue(flags);
                self.set_f32_scalar(dest, result);
            }
            FpOp::MvXW => self.set_x(dest_x, a as i32 as u64),
            FpOp::MvWX => {
                let value = self.x(src1_x) as u32;
                self.set_f32_scalar(dest, value);
            }
            FpOp::Eq => {
                let (result, flags) = fpu::f32_eq(a, b);
                self.accrue(flags);
                self.set_x(dest_x, result as u64);
            }
            FpOp::Lt => {
                let (result, flags) = fpu::f32_lt(a, b);
                self.accrue(flags);
                self.set_x(dest_x, result as u64);
            }
            FpOp::Le => {
                let (result, flags) = fpu::f32_le(a, b);
                self.accrue(flags);
                self.set_x(dest_x, result as u64);
            }
            FpOp::Class => self.set_x(dest_x, fpu::f32_classify(a) as u64),
        }
        Ok(())
    }

    /// CSR instruction body: read old value, apply the operation, write back, commit the old
    /// value to `rd`.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        specifier: CsrSpecifier,
        write: Option<u64>,
    ) -> ExecutionResult {
        // The fast-local-barrier join channel returns its result through `rd`, so it cannot
        // go through the plain read-then-write path.
        if specifier == csr::FLB {
            let Some(value) = write else {
                self.set_x(dest, 0);
                return Ok(());
            };
            let id = (value & 0x1F) as usize;
            let expected = value >> 16 & 0xFFFF;
            let result = self.system.shires[self.hart.shire].flb_join(id, expected.max(1));
            self.set_x(dest, result);
            return Ok(());
        }
        let old = self.csrget(specifier)?;
        if let Some(source) = write {
            if csr::is_read_only(specifier) {
                return Err(Exception::IllegalInstruction(None).into());
            }
            let value = match op {
                CsrOp::ReadWrite => source,
                CsrOp::ReadSet => old | source,
                CsrOp::ReadClear => old & !source,
            };
            self.csrset(specifier, value)?;
        }
        self.set_x(dest, old);
        Ok(())
    }

    fn check_csr_privilege(&self, specifier: CsrSpecifier) -> ExecutionResult {
        if !csr::is_valid(specifier) {
            return Err(Exception::IllegalInstruction(None).into());
        }
        let required = csr::required_privilege_level(specifier);
        if (self.prv() as usize) < required as usize {
            return Err(Exception::IllegalInstruction(None).into());
        }
        Ok(())
    }

    /// Reads a CSR. Side-effect-only CSRs (tensor command channels, `fcc`, `stall`) read as
    /// zero.
    pub fn csrget(&mut self, specifier: CsrSpecifier) -> Result<u64, ExecutionInterrupt> {
        self.check_csr_privilege(specifier)?;
        let hart = self.system.hart(self.hart);
        let core = self.system.core_at(self.hart.shire, self.hart.minion);
        let value = match specifier {
            csr::FFLAGS | csr::FRM | csr::FCSR => {
                if !hart.mstatus.fp_enabled() {
                    return Err(Exception::IllegalInstruction(None).into());
                }
                match specifier {
                    csr::FFLAGS => hart.fflags as u64,
                    csr::FRM => hart.frm as u64,
                    _ => (hart.frm as u64) << 5 | hart.fflags as u64,
                }
            }
            csr::CYCLE | csr::MCYCLE => self.counter_read(csr::CYCLE)?,
            csr::TIME => self.counter_read(csr::TIME)?,
            csr::INSTRET | csr::MINSTRET => self.counter_read(csr::INSTRET)?,
            csr::HPMCOUNTER3..=csr::HPMCOUNTER31 => {
                self.hpm_read((specifier - csr::HPMCOUNTER3) as usize)
            }
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => {
                self.hpm_read((specifier - csr::MHPMCOUNTER3) as usize)
            }
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => {
                hart.mhpmevent[(specifier - csr::MHPMEVENT3) as usize]
            }
            csr::MCOUNTINHIBIT => 0,
            csr::SSTATUS => hart.mstatus.read_sstatus(),
            csr::SIE => hart.mie & hart.mideleg,
            csr::SIP => hart.mip & hart.mideleg,
            csr::STVEC => hart.stvec,
            csr::SCOUNTEREN => hart.scounteren,
            csr::SSCRATCH => hart.sscratch,
            csr::SEPC => hart.sepc,
            csr::SCAUSE => hart.scause,
            csr::STVAL => hart.stval,
            csr::SATP => core.satp,
            csr::MVENDORID => 0,
            csr::MARCHID => 0,
            csr::MIMPID => 0,
            csr::MHARTID => self.hart.mhartid(),
            csr::MSTATUS => hart.mstatus.read(),
            csr::MISA => {
                // MXL=64 with I, M, A, F, C, U, S, and X (non-standard extensions).
                let extensions = ['i', 'm', 'a', 'f', 'c', 'u', 's', 'x']
                    .iter()
                    .fold(0u64, |acc, &e| acc | 1 << (e as u8 - b'a'));
                2 << 62 | extensions
            }
            csr::MEDELEG => hart.medeleg,
            csr::MIDELEG => hart.mideleg,
            csr::MIE => hart.mie,
            csr::MTVEC => hart.mtvec,
            csr::MCOUNTEREN => hart.mcounteren,
            csr::MSCRATCH => hart.mscratch,
            csr::MEPC => hart.mepc,
            csr::MCAUSE => hart.mcause,
            csr::MTVAL => hart.mtval,
            csr::MIP => hart.mip,
            csr::DCSR | csr::DPC | csr::DDATA0 => {
                if hart.lifecycle != Lifecycle::Halted {
                    return Err(Exception::IllegalInstruction(None).into());
                }
                match specifier {
                    csr::DCSR => hart.debug.dcsr,
                    csr::DPC => hart.debug.dpc,
                    _ => hart.debug.ddata0,
                }
            }
            csr::MCACHE_CONTROL => core.mcache_control as u64,
            csr::UCACHE_CONTROL => core.ucache_control as u64,
            csr::MENABLE_SHADOWS => {
                let other = &self.system.shires[self.hart.shire].other;
                other.thread0_disable | other.thread1_disable << 32
            }
            csr::EXCL_MODE => core.excl_mode as u64,
            csr::MATP => core.matp,
            csr::CACHE_INVALIDATE => 0,
            csr::VALIDATION0..=csr::VALIDATION3 => {
                hart.validation[(specifier - csr::VALIDATION0) as usize]
            }
            csr::TENSOR_MASK => hart.tensor_mask as u64,
            csr::TENSOR_CONV_SIZE => hart.tensor_conv_size,
            csr::TENSOR_CONV_CTRL => hart.tensor_conv_ctrl,
            csr::TENSOR_COOP => hart.tensor_coop,
            csr::TENSOR_ERROR => hart.tensor_error as u64,
            csr::TENSOR_LOAD
            | csr::TENSOR_LOAD_L2
            | csr::TENSOR_STORE
            | csr::TENSOR_FMA
            | csr::TENSOR_QUANT
            | csr::TENSOR_REDUCE
            | csr::TENSOR_WAIT
            | csr::FCC
            | csr::STALL
            | csr::UART_TX => 0,
            csr::FCC0 => hart.fcc[0] as u64,
            csr::FCC1 => hart.fcc[1] as u64,
            csr::FLB => 0,
            csr::GSC_PROGRESS => hart.gsc_progress,
            csr::PORTCTRL0..=csr::PORTCTRL3 => {
                hart.portctrl[(specifier - csr::PORTCTRL0) as usize]
            }
            // Port heads are stubs; both blocking and non-blocking reads return empty.
            csr::PORTHEAD0..=csr::PORTHEADNB3 => 0,
            _ => return Err(Exception::IllegalInstruction(None).into()),
        };
        Ok(value)
    }

    fn counter_read(&self, which: CsrSpecifier) -> Result<u64, ExecutionInterrupt> {
        let hart = self.system.hart(self.hart);
        if self.prv() < PrivilegeLevel::Machine {
            let bit = match which {
                csr::CYCLE => 0,
                csr::TIME => 1,
                _ => 2,
            };
            if hart.mcounteren & (1 << bit) == 0 {
                return Err(Exception::IllegalInstruction(None).into());
            }
        }
        Ok(match which {
            csr::CYCLE => hart.cycle,
            csr::TIME => self.system.memory.timer().mtime(),
            _ => hart.instret,
        })
    }

    fn hpm_read(&self, index: usize) -> u64 {
        let hart = self.system.hart(self.hart);
        if hart.mhpmevent[index] == PMU_MINION_EVENT_CYCLES {
            hart.cycle - hart.cycle_base
        } else {
            hart.mhpmcounter[index]
        }
    }

    /// Writes a CSR, applying WARL masks and performing side effects.
    pub fn csrset(&mut self, specifier: CsrSpecifier, value: u64) -> ExecutionResult {
        self.check_csr_privilege(specifier)?;
        self.system.observer.csr_write(self.hart, specifier, value);
        match specifier {
            csr::FFLAGS => {
                self.require_fp()?;
                self.system.hart_mut(self.hart).fflags = (value & 0x1F) as u8;
                self.mark_fp_dirty();
            }
            csr::FRM => {
                self.require_fp()?;
                self.system.hart_mut(self.hart).frm = (value & 0b111) as u8;
                self.mark_fp_dirty();
            }
            csr::FCSR => {
                self.require_fp()?;
                let hart = self.system.hart_mut(self.hart);
                hart.fflags = (value & 0x1F) as u8;
                hart.frm = (value >> 5 & 0b111) as u8;
                self.mark_fp_dirty();
            }
            csr::SSTATUS => {
                self.system
                    .hart_mut(self.hart)
                    .mstatus
                    .write_sstatus(value, u64::MAX);
                self.invalidate_fetch_after_translation_change();
            }
            csr::SIE => {
                let hart = self.system.hart_mut(self.hart);
                let mask = hart.mideleg;
                hart.mie = hart.mie & !mask | value & mask;
                self.system.reconcile_interrupt_wakeup(self.hart);
            }
            csr::SIP => {
                let hart = self.system.hart_mut(self.hart);
                // Only SSIP is writable from this window.
                let mask = hart.mideleg & (1 << 1);
                hart.mip = hart.mip & !mask | value & mask;
                self.system.reconcile_interrupt_wakeup(self.hart);
            }
            csr::STVEC => self.system.hart_mut(self.hart).stvec = value & !0b10,
            csr::SCOUNTEREN => self.system.hart_mut(self.hart).scounteren = value & 0x7,
            csr::SSCRATCH => self.system.hart_mut(self.hart).sscratch = value,
            csr::SEPC => self.system.hart_mut(self.hart).sepc = value & !0b1,
            csr::SCAUSE => self.system.hart_mut(self.hart).scause = value,
            csr::STVAL => self.system.hart_mut(self.hart).stval = value,
            csr::SATP => {
                if crate::mmu::AtpMode::from_atp(value).is_some() {
                    self.system
                        .core_at_mut(self.hart.shire, self.hart.minion)
                        .satp = value;
                    // The translation base is core state; both harts refetch.
                    self.system.invalidate_fetch_caches_of_core(self.hart);
                }
                // Unsupported modes leave the register unchanged (WARL).
            }
            csr::MSTATUS => {
                self.system.hart_mut(self.hart).mstatus.write(value, u64::MAX);
                self.invalidate_fetch_after_translation_change();
            }
            csr::MISA => {} // WARL read-only zero-effect
            csr::MEDELEG => {
                // M-mode ecall delegation is not permitted.
                let mask = !(1u64 << Exception::ENVIRONMENT_CALL_FROM_M_MODE);
                self.system.hart_mut(self.hart).medeleg = value & mask;
            }
            csr::MIDELEG => {
                // Only supervisor interrupts are delegable.
                let mask = (1 << 1) | (1 << 5) | (1 << 9);
                self.system.hart_mut(self.hart).mideleg = value & mask;
            }
            csr::MIE => {
                self.system.hart_mut(self.hart).mie = value;
                self.system.reconcile_interrupt_wakeup(self.hart);
            }
            csr::MTVEC => self.system.hart_mut(self.hart).mtvec = value & !0b10,
            csr::MCOUNTEREN => self.system.hart_mut(self.hart).mcounteren = value & 0x7,
            csr::MSCRATCH => self.system.hart_mut(self.hart).mscratch = value,
            csr::MEPC => self.system.hart_mut(self.hart).mepc = value & !0b1,
            csr::MCAUSE => self.system.hart_mut(self.hart).mcause = value,
            csr::MTVAL => self.system.hart_mut(self.hart).mtval = value,
            csr::MIP => {
                let hart = self.system.hart_mut(self.hart);
                // Supervisor pending bits are software-writable; machine bits are wired.
                let mask = (1 << 1) | (1 << 5) | (1 << 9);
                hart.mip = hart.mip & !mask | value & mask;
                self.system.reconcile_interrupt_wakeup(self.hart);
            }
            csr::MCYCLE => self.system.hart_mut(self.hart).cycle = value,
            csr::MINSTRET => self.system.hart_mut(self.hart).instret = value,
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => {
                let index = (specifier - csr::MHPMCOUNTER3) as usize;
                self.system.hart_mut(self.hart).mhpmcounter[index] = value;
            }
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => {
                let index = (specifier - csr::MHPMEVENT3) as usize;
                let hart = self.system.hart_mut(self.hart);
                hart.mhpmevent[index] = value;
                if value == PMU_MINION_EVENT_CYCLES {
                    // Cycle events count relative to their programming point.
                    hart.cycle_base = hart.cycle;
                }
            }
            csr::MCOUNTINHIBIT => {}
            csr::DCSR | csr::DPC | csr::DDATA0 => {
                let hart = self.system.hart_mut(self.hart);
                if hart.lifecycle != Lifecycle::Halted {
                    return Err(Exception::IllegalInstruction(None).into());
                }
                match specifier {
                    csr::DCSR => hart.debug.dcsr = value,
                    csr::DPC => hart.debug.dpc = value,
                    _ => hart.debug.ddata0 = value,
                }
            }
            csr::MCACHE_CONTROL => self.cache_control_write(value, true)?,
            csr::UCACHE_CONTROL => self.cache_control_write(value, false)?,
            csr::MENABLE_SHADOWS => {
                self.system
                    .core_at_mut(self.hart.shire, self.hart.minion)
                    .menable_shadows = value;
            }
            csr::EXCL_MODE => {
                self.system
                    .core_at_mut(self.hart.shire, self.hart.minion)
                    .excl_mode = value & 1 != 0;
            }
            csr::MATP => {
                let core = self.system.core_at_mut(self.hart.shire, self.hart.minion);
                if core.matp & MATP_LOCK != 0 {
                    // Locked until the next cold reset.
                    return Ok(());
                }
                if crate::mmu::AtpMode::from_atp(value).is_some() {
                    core.matp = value;
                    self.system.invalidate_fetch_caches_of_core(self.hart);
                }
            }
            csr::CACHE_INVALIDATE => {
                self.system.invalidate_fetch_caches_of_core(self.hart);
            }
            csr::VALIDATION0 => {
                self.system.hart_mut(self.hart).validation[0] = value;
                match value {
                    VALIDATION_PASS => {
                        info!("{} reports pass; parking", self.hart);
                        self.system.park_hart(self.hart);
                    }
                    VALIDATION_FAIL => {
                        info!("{} reports failure; stopping", self.hart);
                        self.system.set_emu_done(true, true);
                    }
                    _ => {}
                }
            }
            csr::VALIDATION1 => {
                self.system.hart_mut(self.hart).validation[1] = value;
                if value == VALIDATION_EOT {
                    info!("{} signals end of test", self.hart);
                    self.system.set_emu_done(true, false);
                }
            }
            csr::VALIDATION2 | csr::VALIDATION3 => {
                let index = (specifier - csr::VALIDATION0) as usize;
                self.system.hart_mut(self.hart).validation[index] = value;
            }
            csr::TENSOR_MASK => {
                self.system.hart_mut(self.hart).tensor_mask = value as u16;
            }
            csr::TENSOR_CONV_SIZE => self.system.hart_mut(self.hart).tensor_conv_size = value,
            csr::TENSOR_CONV_CTRL => self.system.hart_mut(self.hart).tensor_conv_ctrl = value,
            csr::TENSOR_COOP => {
                self.system.hart_mut(self.hart).tensor_coop = value & 0x1F_0FFF;
            }
            csr::TENSOR_ERROR => {
                let hart = self.system.hart_mut(self.hart);
                hart.tensor_error = (value & 0x3FF) as u16;
                let bits = hart.tensor_error;
                self.system.observer.tensor_error_update(self.hart, bits);
            }
            csr::TENSOR_LOAD => tensor::load::launch(self.system, self.hart, false, value)?,
            csr::TENSOR_LOAD_L2 => tensor::load::launch(self.system, self.hart, true, value)?,
            csr::TENSOR_STORE => tensor::store::launch(self.system, self.hart, value)?,
            csr::TENSOR_FMA => tensor::fma::launch(self.system, self.hart, value)?,
            csr::TENSOR_QUANT => tensor::quant::launch(self.system, self.hart, value)?,
            csr::TENSOR_REDUCE => tensor::reduce::launch(self.system, self.hart, value)?,
            csr::TENSOR_WAIT => self.tensor_wait(value)?,
            csr::FCC => {
                let which = (value & 1) as usize;
                let hart = self.system.hart_mut(self.hart);
                if hart.fcc[which] == 0 {
                    // Block until a credit arrives.
                    let reason = if which == 0 {
                        Waiting::Credit0
                    } else {
                        Waiting::Credit1
                    };
                    hart.waiting.insert(reason);
                    return Err(ExecutionInterrupt::Restart);
                }
                hart.fcc[which] -= 1;
            }
            csr::FCC0 => self.system.hart_mut(self.hart).fcc[0] = value as u16,
            csr::FCC1 => self.system.hart_mut(self.hart).fcc[1] = value as u16,
            csr::STALL => {
                let core_excl = self
                    .system
                    .core_at(self.hart.shire, self.hart.minion)
                    .excl_mode;
                let hart = self.system.hart_mut(self.hart);
                if !core_excl && !hart.interrupt_would_wake() {
                    hart.waiting.insert(Waiting::Interrupt);
                }
            }
            csr::UART_TX => self.uart_tx(value as u8),
            csr::GSC_PROGRESS => self.system.hart_mut(self.hart).gsc_progress = value,
            csr::PORTCTRL0..=csr::PORTCTRL3 => {
                let index = (specifier - csr::PORTCTRL0) as usize;
                self.system.hart_mut(self.hart).portctrl[index] = value;
            }
            csr::PORTHEAD0..=csr::PORTHEADNB3 => {}
            _ => return Err(Exception::IllegalInstruction(None).into()),
        }
        Ok(())
    }

    /// `mstatus`/`satp`/`matp` writes can change how the current PC translates.
    fn invalidate_fetch_after_translation_change(&mut self) {
        self.system
            .hart_mut(self.hart)
            .fetch_cache
            .invalidate();
    }

    fn cache_control_write(&mut self, value: u64, machine: bool) -> ExecutionResult {
        let Some(next) = CacheMode::from_bits((value & 0b11) as u8) else {
            return Ok(()); // WARL: unsupported encodings are dropped.
        };
        let core = self.system.core_at(self.hart.shire, self.hart.minion);
        let current = if machine {
            core.mcache_control
        } else {
            core.ucache_control
        };
        if !current.can_transition_to(next) {
            return Ok(());
        }
        if machine && current.scp_enabled() && !next.scp_enabled() {
            // The hardware cannot revoke the scratchpad under a parked rendezvous; refusing
            // to emulate it beats silently corrupting the cooperating minions.
            let waiting = self
                .system
                .core_at(self.hart.shire, self.hart.minion)
                .any_coop_load_waiting();
            if waiting {
                panic!(
                    "{} disabled the L1 scratchpad while a cooperative tensor load is pending",
                    self.hart
                );
            }
        }
        let core = self.system.core_at_mut(self.hart.shire, self.hart.minion);
        if machine {
            core.mcache_control = next;
        } else {
            core.ucache_control = next;
        }
        self.system
            .observer
            .cache_control_update(self.hart, next as u8);
        Ok(())
    }

    fn uart_tx(&mut self, byte: u8) {
        let hart = self.system.hart_mut(self.hart);
        if byte == b'\n' {
            let line = std::mem::take(&mut hart.uart_line);
            info!("[{}] {line}", self.hart);
        } else {
            hart.uart_line.push(byte as char);
        }
    }

    /// `tensor_wait`: blocks the hart while the selected unit has outstanding work.
    fn tensor_wait(&mut self, value: u64) -> ExecutionResult {
        let event = (value & 0xF) as u8;
        if event > 10 {
            return Err(Exception::IllegalInstruction(None).into());
        }
        // Thread 1 may only wait on the L2 scratchpad units.
        if self.hart.thread != 0 && !matches!(event, 3 | 4) {
            return Err(Exception::IllegalInstruction(None).into());
        }
        self.system.observer.tensor_wait(self.hart, event);
        let core = self.system.core_at(self.hart.shire, self.hart.minion);
        let busy = match event {
            0 => !core.tload_a[0].is_idle(),
            1 => !core.tload_a[1].is_idle(),
            2 => !core.tload_b.is_idle(),
            3 => !core.tload_l2[0].is_idle(),
            4 => !core.tload_l2[1].is_idle(),
            5 => !core.tmul.is_idle(),
            6 => !core.reduce.is_idle(),
            7 => !core.tquant.is_idle(),
            8 => !core.tstore.is_idle(),
            // Events 9 and 10 name L2 evict engines that complete synchronously here.
            _ => false,
        };
        if busy {
            let reason = match event {
                0 => Waiting::TloadA0,
                1 => Waiting::TloadA1,
                2 => Waiting::TloadTenb,
                3 => Waiting::TloadL2A0,
                4 => Waiting::TloadL2A1,
                5 => Waiting::Tfma,
                6 => Waiting::Reduce,
                7 => Waiting::Tquant,
                _ => Waiting::Tstore,
            };
            trace!("{} tensor_wait parks on {reason:?}", self.hart);
            self.system.hart_mut(self.hart).waiting.insert(reason);
        }
        Ok(())
    }
}

const_assert!(MLEN == 32);
