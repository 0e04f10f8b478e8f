//! TensorFMA: the matrix multiply-accumulate unit.
//!
//! Command word layout (launch CSR value):
//!
//! - bit 63: `msk` — apply the `tensor_mask` row mask to the A rows
//! - bit 62: `tenb` — B operand comes from the paired TenB load
//! - bits `[61:60]`: element type — 0 fp32, 1 fp16-to-fp32, 2 int8-to-int32, 3 reserved
//! - bit 59: `dst` — copy TenC to the FP file after the last step (int8 path)
//! - bit 58: `mul` — first pass: plain multiply instead of accumulate
//! - bit 57: `ua` — A operand int8 values are unsigned
//! - bit 56: `ub` — B operand int8 values are unsigned
//! - bits `[55:54]`: `bcols` selector — 4, 8, 12, 16 columns
//! - bits `[53:50]`: `arows - 1`
//! - bits `[49:46]`: `acols - 1` (the shared k axis)
//! - bits `[45:40]`: `aoffset` — starting lane within the A rows
//! - bits `[39:32]`: `bstart` — first B row (TenB row or scratchpad row)
//! - bits `[31:24]`: `astart` — first A scratchpad row
//!
//! fp32 and fp16 results accumulate into the flat f32 lane space of the FP file, element
//! `(i, j)` at lane `i * bcols + j`. int8 products accumulate in the TenC array.

use super::{error, LoadState, MulState};
use crate::observer::Observer;
use crate::fpu::{self, RoundingMode};
use crate::hart::Waiting;
use crate::system::System;
use crate::topology::HartIndex;
use crate::trap::{Exception, ExecutionInterrupt, ExecutionResult};
use log::{debug, trace};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FmaType {
    Fp32,
    Fp16A32,
    Int8A32,
}

#[derive(Debug, Copy, Clone)]
pub struct FmaCommand {
    pub msk: bool,
    pub tenb: bool,
    pub ty: Option<FmaType>,
    pub dst: bool,
    pub mul: bool,
    pub ua: bool,
    pub ub: bool,
    pub bcols: usize,
    pub arows: usize,
    pub acols: usize,
    pub aoffset: usize,
    pub bstart: usize,
    pub astart: usize,
}

impl FmaCommand {
    pub fn decode(value: u64) -> Self {
        Self {
            msk: value >> 63 & 1 != 0,
            tenb: value >> 62 & 1 != 0,
            ty: match value >> 60 & 0b11 {
                0 => Some(FmaType::Fp32),
                1 => Some(FmaType::Fp16A32),
                2 => Some(FmaType::Int8A32),
                _ => None,
            },
            dst: value >> 59 & 1 != 0,
            mul: value >> 58 & 1 != 0,
            ua: value >> 57 & 1 != 0,
            ub: value >> 56 & 1 != 0,
            bcols: 4 * ((value >> 54 & 0b11) as usize + 1),
            arows: (value >> 50 & 0xF) as usize + 1,
            acols: (value >> 46 & 0xF) as usize + 1,
            aoffset: (value >> 40 & 0x3F) as usize,
            bstart: (value >> 32 & 0xFF) as usize,
            astart: (value >> 24 & 0xFF) as usize,
        }
    }
}

/// Handles a write to the TensorFMA launch CSR.
pub fn launch(system: &mut System, hart: HartIndex, value: u64) -> ExecutionResult {
    let command = FmaCommand::decode(value);
    let core = system.core_at(hart.shire, hart.minion);
    let tmul_idle = core.tmul.is_idle();
    let scp_enabled = core.mcache_control.scp_enabled();
    let tenb_state = core.tload_b.state;
    let tenb_value = core.tload_b.value;
    let tenb_stride = core.tload_b.stride;
    if !tmul_idle {
        system.hart_mut(hart).waiting.insert(Waiting::Tfma);
        return Err(ExecutionInterrupt::Restart);
    }
    let Some(ty) = command.ty else {
        return Err(Exception::IllegalInstruction(None).into());
    };
    system.observer.tensor_fma(hart, value);
    if !scp_enabled {
        system.set_tensor_error(hart, error::SCP_DISABLED);
        return Ok(());
    }
    // TenB pairing contract: the last prior TenB load must be present and its row count must
    // match the k axis.
    if command.tenb {
        match tenb_state {
            LoadState::WaitingCoop | LoadState::Ready => {
                // The TenB fill has not landed yet; re-run once it does.
                debug!("{hart} tensor fma parked on TenB fill");
                system.hart_mut(hart).waiting.insert(Waiting::Tfma);
                return Err(ExecutionInterrupt::Restart);
            }
            LoadState::Loading => {
                let tenb_rows = super::load::LoadCommand::decode(tenb_value, tenb_stride).rows;
                if tenb_rows != command.acols {
                    system.set_tensor_error(hart, error::TENB_PAIRING);
                    return Ok(());
                }
                system.core_at_mut(hart.shire, hart.minion).tload_b.paired = true;
            }
            LoadState::Idle => {
                system.set_tensor_error(hart, error::TENB_PAIRING);
                return Ok(());
            }
        }
    }
    let rm = match ty {
        FmaType::Fp32 => match RoundingMode::from_bits(system.hart(hart).frm) {
            Some(rm) => rm,
            None => return Err(Exception::IllegalInstruction(None).into()),
        },
        _ => RoundingMode::Rtz,
    };
    let uuid = system.core_at_mut(hart.shire, hart.minion).next_tensor_uuid();
    trace!(uuid, value; "{hart} tensor fma");
    system.core_at_mut(hart.shire, hart.minion).tmul.state = MulState::Ready;
    execute(system, hart, &command, ty, rm);
    system.core_at_mut(hart.shire, hart.minion).tmul = Default::default();
    if command.tenb {
        super::load::consume_tenb(system, hart);
    }
    Ok(())
}

fn execute(
    system: &mut System,
    hart: HartIndex,
    command: &FmaCommand,
    ty: FmaType,
    rm: RoundingMode,
) {
    let row_mask = system.hart(hart).tensor_mask;
    let mut fflags: u8 = 0;
    for k in 0..command.acols {
        for i in 0..command.arows {
            if command.msk && row_mask & (1 << i) == 0 {
                continue;
            }
            for j in 0..command.bcols {
                step(system, hart, command, ty, rm, k, i, j, &mut fflags);
            }
        }
    }
    if fflags != 0 {
        system.accrue_fflags(hart, fflags);
    }
    // On the last step the int8 path optionally drains TenC into the FP file.
    if ty == FmaType::Int8A32 && command.dst {
        for i in 0..command.arows {
            for j in 0..command.bcols {
                let value = system.core_at(hart.shire, hart.minion).tenc[i][j];
                let lane = i * command.bcols + j;
                system
                    .hart_mut(hart)
                    .fregs
                    .set_f32_lane(lane, value as u32);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn step(
    system: &mut System,
    hart: HartIndex,
    command: &FmaCommand,
    ty: FmaType,
    rm: RoundingMode,
    k: usize,
    i: usize,
    j: usize,
    fflags: &mut u8,
) {
    let core = system.core_at(hart.shire, hart.minion);
    let b_row = if command.tenb {
        core.scp_row(crate::minion::L1_SCP_ENTRIES + command.bstart + k)
    } else {
        core.scp_row(command.bstart + k)
    };
    let a_row = core.scp_row(command.astart + i);
    let first = command.mul && k == 0;
    match ty {
        FmaType::Fp32 => {
            let a = a_row.u32_lane((command.aoffset + k) % crate::minion::SCP_LANES);
            let b = b_row.u32_lane(j);
            // Zero operands are skipped; only the notification stream can tell.
            if a == 0 || b == 0 {
                if first {
                    let lane = i * command.bcols + j;
                    system.hart_mut(hart).fregs.set_f32_lane(lane, 0);
                }
                return;
            }
            let lane = i * command.bcols + j;
            let acc = if first {
                0
            } else {
                system.hart(hart).fregs.f32_lane(lane)
            };
            let (result, fl) = if first {
                fpu::f32_mul(a, b, rm)
            } else {
                fpu::f32_mul_add(a, b, acc, rm)
            };
            *fflags |= fl;
            system.hart_mut(hart).fregs.set_f32_lane(lane, result);
        }
        FmaType::Fp16A32 => {
            let a = a_row.u16_lane((command.aoffset + k) % (crate::minion::SCP_LINE / 2));
            let b = b_row.u16_lane(j);
            if a == 0 || b == 0 {
                if first {
                    let lane = i * command.bcols + j;
                    system.hart_mut(hart).fregs.set_f32_lane(lane, 0);
                }
                return;
            }
            let lane = i * command.bcols + j;
            let acc = if first {
                0
            } else {
                system.hart(hart).fregs.f32_lane(lane)
            };
            let (result, fl) = fpu::f1632_mul_add(a, b, acc, rm);
            *fflags |= fl;
            system.hart_mut(hart).fregs.set_f32_lane(lane, result);
        }
        FmaType::Int8A32 => {
            let a_raw = a_row.u8_lane((command.aoffset + k) % crate::minion::SCP_LINE);
            let b_raw = b_row.u8_lane(j);
            let a = if command.ua {
                a_raw as i32
            } else {
                a_raw as i8 as i32
            };
            let b = if command.ub {
                b_raw as i32
            } else {
                b_raw as i8 as i32
            };
            let core = system.core_at_mut(hart.shire, hart.minion);
            let acc = if first { 0 } else { core.tenc[i][j] };
            core.tenc[i][j] = acc.wrapping_add(a.wrapping_mul(b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        // tenb, fp32, bcols=8, arows=2, acols=4, bstart=3, astart=5
        let value = (1u64 << 62)
            | (0b01 << 54)
            | (1 << 50)
            | (3 << 46)
            | (3 << 32)
            | (5 << 24);
        let command = FmaCommand::decode(value);
        assert!(command.tenb);
        assert_eq!(Some(FmaType::Fp32), command.ty);
        assert_eq!(8, command.bcols);
        assert_eq!(2, command.arows);
        assert_eq!(4, command.acols);
        assert_eq!(3, command.bstart);
        assert_eq!(5, command.astart);
        assert_eq!(None, FmaCommand::decode(0b11 << 60).ty);
    }
}
