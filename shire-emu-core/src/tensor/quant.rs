//! TensorQuant: an in-register transformation pipeline over a tile of the FP file.
//!
//! Command word layout (launch CSR value):
//!
//! - bits `[63:60]`: `arows - 1`
//! - bits `[59:58]`: `acols` selector — 4, 8, 12, 16
//! - bits `[57:52]`: scratchpad row providing the row/col operand vectors
//! - bits `[39:0]`: ten 4-bit transformation slots, applied low slot first; 0 terminates
//!
//! The tile occupies the flat f32 lane space of the FP file starting at lane 0, element
//! `(i, j)` at lane `i * acols + j`.

use super::{error, QuantState};
use crate::observer::Observer;
use crate::fpu::{self, RoundingMode};
use crate::system::System;
use crate::topology::HartIndex;
use crate::trap::{Exception, ExecutionResult};
use log::trace;

/// Transformation codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transform {
    IntToFp32,
    Fp32ToInt32,
    Int32Relu,
    Int32AddRow,
    Int32SubRow,
    Int32AddCol,
    Int32SubCol,
    Fp32MulRow,
    Fp32MulCol,
    SatInt8,
    SatUint8,
    Pack128,
}

impl Transform {
    fn from_bits(bits: u8) -> Option<Option<Self>> {
        Some(match bits {
            0 => None,
            1 => Some(Self::IntToFp32),
            2 => Some(Self::Fp32ToInt32),
            3 => Some(Self::Int32Relu),
            4 => Some(Self::Int32AddRow),
            5 => Some(Self::Int32SubRow),
            6 => Some(Self::Int32AddCol),
            7 => Some(Self::Int32SubCol),
            8 => Some(Self::Fp32MulRow),
            9 => Some(Self::Fp32MulCol),
            10 => Some(Self::SatInt8),
            11 => Some(Self::SatUint8),
            12 => Some(Self::Pack128),
            _ => return None,
        })
    }

    /// Row/col operand transforms read the scratchpad and need it enabled.
    fn needs_scp(self) -> bool {
        matches!(
            self,
            Self::Int32AddRow
                | Self::Int32SubRow
                | Self::Int32AddCol
                | Self::Int32SubCol
                | Self::Fp32MulRow
                | Self::Fp32MulCol
        )
    }
}

/// Handles a write to the TensorQuant launch CSR.
pub fn launch(system: &mut System, hart: HartIndex, value: u64) -> ExecutionResult {
    let arows = (value >> 60 & 0xF) as usize + 1;
    let acols = 4 * ((value >> 58 & 0b11) as usize + 1);
    let scp_row = (value >> 52 & 0x3F) as usize;
    // The rounding mode is validated up-front, before any transform runs.
    let rm = match RoundingMode::from_bits(system.hart(hart).frm) {
        Some(rm) => rm,
        None => return Err(Exception::IllegalInstruction(None).into()),
    };
    let mut transforms = Vec::new();
    for slot in 0..10 {
        let bits = (value >> (slot * 4) & 0xF) as u8;
        match Transform::from_bits(bits) {
            Some(Some(transform)) => transforms.push(transform),
            Some(None) => break,
            None => {
                system.set_tensor_error(hart, error::RESERVED_COMMAND);
                return Ok(());
            }
        }
    }
    system.observer.tensor_quant(hart, value);
    if transforms.iter().any(|t| t.needs_scp())
        && !system
            .core_at(hart.shire, hart.minion)
            .mcache_control
            .scp_enabled()
    {
        system.set_tensor_error(hart, error::SCP_DISABLED);
        return Ok(());
    }
    let uuid = system.core_at_mut(hart.shire, hart.minion).next_tensor_uuid();
    trace!(uuid, value; "{hart} tensor quant");
    system.core_at_mut(hart.shire, hart.minion).tquant.state = QuantState::Ready;
    let mut fflags = 0u8;
    for transform in transforms {
        apply(system, hart, transform, arows, acols, scp_row, rm, &mut fflags);
    }
    if fflags != 0 {
        system.accrue_fflags(hart, fflags);
    }
    system.core_at_mut(hart.shire, hart.minion).tquant = Default::default();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply(
    system: &mut System,
    hart: HartIndex,
    transform: Transform,
    arows: usize,
    acols: usize,
    scp_row: usize,
    rm: RoundingMode,
    fflags: &mut u8,
) {
    if transform == Transform::Pack128 {
        // Pack the low byte of every element, row-major, into the head of the tile region.
        let mut bytes = Vec::with_capacity(arows * acols);
        for i in 0..arows {
            for j in 0..acols {
                let lane = i * acols + j;
                bytes.push(system.hart(hart).fregs.f32_lane(lane) as u8);
            }
        }
        let fregs = &mut system.hart_mut(hart).fregs;
        for (index, chunk) in bytes.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            fregs.set_f32_lane(index, u32::from_le_bytes(word));
        }
        return;
    }
    for i in 0..arows {
        for j in 0..acols {
            let lane = i * acols + j;
            let value = system.hart(hart).fregs.f32_lane(lane);
            let operand_lane = match transform {
                Transform::Int32AddRow | Transform::Int32SubRow | Transform::Fp32MulRow => j,
                _ => i,
            };
            let operand = system
                .core_at(hart.shire, hart.minion)
                .scp_row(scp_row)
                .u32_lane(operand_lane % crate::minion::SCP_LANES);
            let result = match transform {
                Transform::IntToFp32 => {
                    let (r, fl) = fpu::i32_to_f32(value as i32, rm);
                    *fflags |= fl;
                    r
                }
                Transform::Fp32ToInt32 => {
                    let (r, fl) = fpu::f32_to_i32(value, rm);
                    *fflags |= fl;
                    r as u32
                }
                Transform::Int32Relu => (value as i32).max(0) as u32,
                Transform::Int32AddRow | Transform::Int32AddCol => {
                    (value as i32).wrapping_add(operand as i32) as u32
                }
                Transform::Int32SubRow | Transform::Int32SubCol => {
                    (value as i32).wrapping_sub(operand as i32) as u32
                }
                Transform::Fp32MulRow | Transform::Fp32MulCol => {
                    let (r, fl) = fpu::f32_mul(value, operand, rm);
                    *fflags |= fl;
                    r
                }
                Transform::SatInt8 => {
                    (value as i32).clamp(i8::MIN as i32, i8::MAX as i32) as u32
                }
                Transform::SatUint8 => (value as i32).clamp(0, u8::MAX as i32) as u32,
                Transform::Pack128 => unreachable!(),
            };
            system.hart_mut(hart).fregs.set_f32_lane(lane, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_codes() {
        assert_eq!(Some(None), Transform::from_bits(0));
        assert_eq!(Some(Some(Transform::IntToFp32)), Transform::from_bits(1));
        assert_eq!(Some(Some(Transform::Pack128)), Transform::from_bits(12));
        assert_eq!(None, Transform::from_bits(13));
    }

    #[test]
    fn test_needs_scp() {
        assert!(Transform::Int32AddRow.needs_scp());
        assert!(Transform::Fp32MulCol.needs_scp());
        assert!(!Transform::SatInt8.needs_scp());
        assert!(!Transform::IntToFp32.needs_scp());
    }
}
