//! TensorStore: scratchpad rows or FP-register tiles out to memory.
//!
//! Command word layout (launch CSR value), selected by bit 63:
//!
//! Store-from-SCP (bit 63 clear):
//! - bits `[57:52]`: source scratchpad row
//! - bits `[51:48]`: `rows - 1`
//! - bits `[47:0]`: base virtual address, sign-extended
//!
//! Store-from-FREGS (bit 63 set):
//! - bits `[62:61]`: `cols` selector — 1, 2, or 4 128-bit tiles per row (3 reserved)
//! - bits `[60:59]`: `coop - 1` — cooperating minion count
//! - bits `[58:52]`: `regstart` — first 128-bit tile of the FP file
//! - bits `[51:48]`: `rows - 1`
//! - bits `[47:0]`: base virtual address, sign-extended
//!
//! The `x31` side register carries the row stride in bits `[47:0]` and, for the FREGS
//! flavor, the per-row tile increment in bits `[53:48]`.

use super::{error, StoreState};
use crate::observer::Observer;
use crate::hart::Waiting;
use crate::minion::SCP_LINE;
use crate::mmu::{MemoryError, Mmu};
use crate::system::System;
use crate::topology::HartIndex;
use crate::trap::{Exception, ExecutionInterrupt, ExecutionResult};
use log::trace;

fn sign_extend48(value: u64) -> u64 {
    ((value << 16) as i64 >> 16) as u64
}

/// Legal (cols, coop) pairs for cooperative FREGS stores: wider rows leave less room for
/// cooperation.
fn coop_comb_legal(cols: usize, coop: usize) -> bool {
    matches!((cols, coop), (1, 1) | (1, 2) | (1, 4) | (2, 1) | (2, 2) | (4, 1))
}

/// Handles a write to the TensorStore launch CSR.
pub fn launch(system: &mut System, hart: HartIndex, value: u64) -> ExecutionResult {
    if !system.core_at(hart.shire, hart.minion).tstore.is_idle() {
        system.hart_mut(hart).waiting.insert(Waiting::Tstore);
        return Err(ExecutionInterrupt::Restart);
    }
    system.observer.tensor_store(hart, value);
    let x31 = system.hart(hart).xregs.x(crate::hart::Specifier::X31);
    let stride = sign_extend48(x31 & 0xFFFF_FFFF_FFFF) as i64;
    let uuid = system.core_at_mut(hart.shire, hart.minion).next_tensor_uuid();
    trace!(uuid, value; "{hart} tensor store");
    system.core_at_mut(hart.shire, hart.minion).tstore.state = StoreState::Ready;
    let result = if value >> 63 & 1 == 0 {
        store_from_scp(system, hart, value, stride)
    } else {
        store_from_fregs(system, hart, value, stride, x31)
    };
    system.core_at_mut(hart.shire, hart.minion).tstore = Default::default();
    result
}

fn store_from_scp(
    system: &mut System,
    hart: HartIndex,
    value: u64,
    stride: i64,
) -> ExecutionResult {
    if !system
        .core_at(hart.shire, hart.minion)
        .mcache_control
        .scp_enabled()
    {
        system.set_tensor_error(hart, error::SCP_DISABLED);
        return Ok(());
    }
    let start = (value >> 52 & 0x3F) as usize;
    let rows = (value >> 48 & 0xF) as usize + 1;
    let addr = sign_extend48(value & 0xFFFF_FFFF_FFFF);
    for i in 0..rows {
        let row_addr = addr.wrapping_add_signed(stride * i as i64);
        let line = system.core_at(hart.shire, hart.minion).scp_row(start + i).0;
        match Mmu::new(system, hart).store_tensor(row_addr, &line) {
            Ok(()) => {}
            Err(MemoryError::BusError) => {
                system.raise_bus_error_interrupt(hart);
                continue;
            }
            Err(_) => {
                system.set_tensor_error(hart, error::ACCESS_FAULT);
                break;
            }
        }
    }
    Ok(())
}

fn store_from_fregs(
    system: &mut System,
    hart: HartIndex,
    value: u64,
    stride: i64,
    x31: u64,
) -> ExecutionResult {
    let cols = match value >> 61 & 0b11 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => {
            system.set_tensor_error(hart, error::COOP_PARAMS);
            return Ok(());
        }
    };
    let coop = (value >> 59 & 0b11) as usize + 1;
    let regstart = (value >> 52 & 0x7F) as usize;
    let rows = (value >> 48 & 0xF) as usize + 1;
    let addr = sign_extend48(value & 0xFFFF_FFFF_FFFF);
    let srcinc = (x31 >> 48 & 0x3F) as usize;
    if !coop_comb_legal(cols, coop) {
        system.set_tensor_error(hart, error::COOP_PARAMS);
        return Ok(());
    }
    if coop > 1 && !system.shires[hart.shire].other.coop_mode {
        return Err(Exception::IllegalInstruction(None).into());
    }
    // With N cooperating minions the row is N*cols tiles wide; each participant stores its
    // own column slice, selected by its position in the group.
    let slice = hart.minion % coop;
    for r in 0..rows {
        let mut tile_index = regstart + r * srcinc;
        let row_addr = addr
            .wrapping_add_signed(stride * r as i64)
            .wrapping_add(slice as u64 * cols as u64 * 16);
        for c in 0..cols {
            let tile = system.hart(hart).fregs.tile128(tile_index);
            match Mmu::new(system, hart).store_tensor(row_addr + c as u64 * 16, &tile) {
                Ok(()) => {}
                Err(MemoryError::BusError) => {
                    system.raise_bus_error_interrupt(hart);
                }
                Err(_) => {
                    system.set_tensor_error(hart, error::ACCESS_FAULT);
                    return Ok(());
                }
            }
            tile_index += 1;
        }
    }
    Ok(())
}

const_assert!(SCP_LINE == 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coop_comb_table() {
        assert!(coop_comb_legal(1, 1));
        assert!(coop_comb_legal(1, 4));
        assert!(coop_comb_legal(2, 2));
        assert!(coop_comb_legal(4, 1));
        assert!(!coop_comb_legal(4, 2));
        assert!(!coop_comb_legal(2, 4));
        assert!(!coop_comb_legal(1, 3));
    }
}
