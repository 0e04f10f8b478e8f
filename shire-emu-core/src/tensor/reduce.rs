//! TensorReduce: point-to-point and tree register-window transfers between minions.
//!
//! Command word layout (launch CSR value):
//!
//! - bits `[63:62]`: command — 0 send, 1 receive, 2 broadcast, 3 reduce
//! - bits `[61:59]`: function code (reserved encoding 7 faults softly on the receiver)
//! - bits `[58:52]`: tree height (broadcast/reduce only)
//! - bit 50: partner thread (send/receive only)
//! - bits `[49:44]`: partner minion within the shire (send/receive only)
//! - bits `[43:36]`: first `f` register of the window
//! - bits `[35:28]`: register count
//!
//! For broadcast/reduce the partner is derived from the minion index and the height field:
//! with `minmask = (1 << height) - 1` and `distance = 1 << (height - 1)`, a minion with
//! `minion & minmask == 0` pairs downward with `minion + distance`, and one with
//! `minion & minmask == distance` pairs upward. Other minions do not participate.

use super::{error, ReduceFunc, ReduceState, TReduce};
use crate::observer::Observer;
use crate::fpu::{self, RoundingMode};
use crate::hart::{Waiting, F32_LANES, LEN};
use crate::system::System;
use crate::topology::HartIndex;
use crate::trap::{ExecutionInterrupt, ExecutionResult};
use log::{trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Command {
    Send,
    Receive,
    Broadcast,
    Reduce,
}

/// Handles a write to the TensorReduce launch CSR.
pub fn launch(system: &mut System, hart: HartIndex, value: u64) -> ExecutionResult {
    if !system.core_at(hart.shire, hart.minion).reduce.is_idle() {
        system.hart_mut(hart).waiting.insert(Waiting::Reduce);
        return Err(ExecutionInterrupt::Restart);
    }
    system.observer.tensor_reduce(hart, value);
    let command = match value >> 62 & 0b11 {
        0 => Command::Send,
        1 => Command::Receive,
        2 => Command::Broadcast,
        3 => Command::Reduce,
        _ => unreachable!(),
    };
    let func = ReduceFunc::from_bits((value >> 59 & 0b111) as u8);
    let height = (value >> 52 & 0x7F) as u32;
    let reg_base = (value >> 36 & 0xFF) as u8 % LEN;
    let count = (value >> 28 & 0xFF) as u8;
    let rounding = system.hart(hart).frm;

    let (sending, partner) = match command {
        Command::Send => (true, partner_from_fields(hart, value)),
        Command::Receive => (false, partner_from_fields(hart, value)),
        Command::Broadcast | Command::Reduce => {
            if height == 0 || height > 6 {
                system.set_tensor_error(hart, error::RESERVED_COMMAND);
                return Ok(());
            }
            let minmask = (1usize << height) - 1;
            let distance = 1usize << (height - 1);
            let position = hart.minion & minmask;
            // In a reduce tree the aligned minion receives; broadcast reverses the flow.
            let (lower_sends, upper_sends) = match command {
                Command::Reduce => (false, true),
                _ => (true, false),
            };
            if position == 0 {
                let partner = HartIndex::new(hart.shire, hart.minion + distance, hart.thread);
                (lower_sends, Some(partner))
            } else if position == distance {
                let partner = HartIndex::new(hart.shire, hart.minion - distance, hart.thread);
                (upper_sends, Some(partner))
            } else {
                // Not a participant at this height; fenced nop.
                return Ok(());
            }
        }
    };
    let Some(partner) = partner else {
        system.set_tensor_error(hart, error::REDUCE_FUNCTION);
        return Ok(());
    };
    if partner == hart {
        system.set_tensor_error(hart, error::REDUCE_FUNCTION);
        return Ok(());
    }
    if count == 0 {
        return Ok(());
    }
    // A receiver with a reserved function code fails immediately.
    if !sending && func.is_none() {
        system.set_tensor_error(hart, error::REDUCE_FUNCTION);
        return Ok(());
    }
    let uuid = system.core_at_mut(hart.shire, hart.minion).next_tensor_uuid();
    trace!(uuid, value, sending, partner:%; "{hart} tensor reduce");
    {
        let unit = &mut system.core_at_mut(hart.shire, hart.minion).reduce;
        unit.state = if sending {
            ReduceState::WaitingToSend
        } else {
            ReduceState::WaitingToReceive
        };
        unit.partner = Some(partner);
        unit.reg_base = reg_base;
        unit.count = count;
        unit.func = func;
        unit.rounding = rounding;
        unit.launcher = Some(hart);
    }
    try_rendezvous(system, hart, partner);
    // If the partner has not arrived, park this hart on the unit.
    if !system.core_at(hart.shire, hart.minion).reduce.is_idle() {
        system.hart_mut(hart).waiting.insert(Waiting::Reduce);
    }
    Ok(())
}

fn partner_from_fields(hart: HartIndex, value: u64) -> Option<HartIndex> {
    let minion = (value >> 44 & 0x3F) as usize;
    let thread = (value >> 50 & 1) as usize;
    if minion >= crate::topology::MINIONS_PER_SHIRE {
        return None;
    }
    Some(HartIndex::new(hart.shire, minion, thread))
}

/// Completes the transfer if both sides are ready and name each other.
fn try_rendezvous(system: &mut System, a: HartIndex, b: HartIndex) {
    let unit_a = system.core_at(a.shire, a.minion).reduce.clone();
    let unit_b = system.core_at(b.shire, b.minion).reduce.clone();
    let (sender, receiver, send_unit, recv_unit) = match (unit_a.state, unit_b.state) {
        (ReduceState::WaitingToSend, ReduceState::WaitingToReceive) => (a, b, unit_a, unit_b),
        (ReduceState::WaitingToReceive, ReduceState::WaitingToSend) => (b, a, unit_b, unit_a),
        _ => return,
    };
    if send_unit.partner != Some(receiver) || recv_unit.partner != Some(sender) {
        return;
    }
    // Both ends present and agreeing: advance through the ready states and run the transfer.
    system.core_at_mut(sender.shire, sender.minion).reduce.state = ReduceState::ReadyToSend;
    system.core_at_mut(receiver.shire, receiver.minion).reduce.state =
        ReduceState::ReadyToReceive;
    // Window-shape mismatch is a programming error the hardware cannot express.
    if send_unit.count != recv_unit.count {
        panic!(
            "tensor reduce count mismatch: {sender} sends {} registers, {receiver} expects {}",
            send_unit.count, recv_unit.count
        );
    }
    execute(system, &send_unit, sender, &recv_unit, receiver);
    system.core_at_mut(sender.shire, sender.minion).reduce.clear();
    system.core_at_mut(receiver.shire, receiver.minion).reduce.clear();
    system.wake_core_waiters(sender.shire, sender.minion, Waiting::Reduce);
    system.wake_core_waiters(receiver.shire, receiver.minion, Waiting::Reduce);
}

/// Applies the receiver's function over `count` register pairs, element-wise, in place at the
/// receiver. Both windows advance together.
fn execute(
    system: &mut System,
    send_unit: &TReduce,
    sender: HartIndex,
    recv_unit: &TReduce,
    receiver: HartIndex,
) {
    let func = recv_unit.func.expect("checked at launch");
    let rm = RoundingMode::from_bits(recv_unit.rounding).unwrap_or(RoundingMode::Rne);
    let mut fflags = 0u8;
    for step in 0..recv_unit.count as usize {
        let src_reg = ((send_unit.reg_base as usize + step) % LEN as usize) as u8;
        let dst_reg = ((recv_unit.reg_base as usize + step) % LEN as usize) as u8;
        let src = *system.hart(sender).fregs.f(src_reg);
        let dst = system.hart(receiver).fregs.f(dst_reg).clone();
        let mut result = dst;
        for lane in 0..F32_LANES {
            let s = src.u32_lane(lane);
            let d = dst.u32_lane(lane);
            let value = match func {
                ReduceFunc::Move => s,
                ReduceFunc::Fadd => {
                    let (r, fl) = fpu::f32_add(d, s, rm);
                    fflags |= fl;
                    r
                }
                ReduceFunc::Fmax => {
                    let (r, fl) = fpu::f32_max(d, s);
                    fflags |= fl;
                    r
                }
                ReduceFunc::Fmin => {
                    let (r, fl) = fpu::f32_min(d, s);
                    fflags |= fl;
                    r
                }
                ReduceFunc::Add => (d as i32).wrapping_add(s as i32) as u32,
                ReduceFunc::Max => (d as i32).max(s as i32) as u32,
                ReduceFunc::Min => (d as i32).min(s as i32) as u32,
            };
            result.set_u32_lane(lane, value);
        }
        *system.hart_mut(receiver).fregs.f_mut(dst_reg) = result;
        let lanes = result.u32_lanes();
        system.observer.freg_write(receiver, dst_reg, &lanes);
    }
    if fflags != 0 {
        system.accrue_fflags(receiver, fflags);
    }
    if send_unit.func.is_some() && send_unit.func != recv_unit.func {
        warn!(
            "tensor reduce function mismatch between {sender} and {receiver}; receiver wins"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partner_from_fields() {
        let hart = HartIndex::new(2, 0, 0);
        let value = (5u64 << 44) | (1 << 50);
        assert_eq!(
            Some(HartIndex::new(2, 5, 1)),
            partner_from_fields(hart, value)
        );
        assert_eq!(None, partner_from_fields(hart, 60 << 44));
    }
}
