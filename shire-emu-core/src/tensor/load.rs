//! TensorLoad: scratchpad and TenB fills, including the cooperative rendezvous.
//!
//! Command word layout (launch CSR value):
//!
//! - bit 63: `msk` — apply the `tensor_mask` row mask
//! - bit 62: `coop` — cooperative load, rendezvous via `tensor_coop`
//! - bits `[61:59]`: `cmd` — 0 line fill, 1 interleave-8, 2 interleave-16, 3/4/5
//!   transpose-8/16/32, 6/7 reserved
//! - bit 58: `tenb` — destination is the TenB extension
//! - bits `[57:52]`: `start` — destination scratchpad row
//! - bits `[51:48]`: `rows - 1`
//! - bits `[47:0]`: base virtual address, sign-extended to 64 bits
//!
//! The `x31` side register carries the row stride in bits `[47:0]` (sign-extended), a byte
//! offset in bits `[53:48]`, and a software tag in bits `[63:56]` used only for log
//! correlation.

use super::{error, LoadState, TLoad};
use crate::observer::Observer;
use crate::hart::Waiting;
use crate::minion::{ScpEntry, L1_SCP_ENTRIES, SCP_LINE};
use crate::mmu::{MemoryError, Mmu};
use crate::system::System;
use crate::topology::{HartIndex, MINIONS_PER_NEIGH};
use crate::trap::{ExecutionInterrupt, ExecutionResult};
use log::{debug, trace};

/// Which load unit a launch addresses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadUnit {
    A(usize),
    B,
    L2(usize),
}

impl LoadUnit {
    pub fn waiting_reason(self) -> Waiting {
        match self {
            LoadUnit::A(0) => Waiting::TloadA0,
            LoadUnit::A(_) => Waiting::TloadA1,
            LoadUnit::B => Waiting::TloadTenb,
            LoadUnit::L2(0) => Waiting::TloadL2A0,
            LoadUnit::L2(_) => Waiting::TloadL2A1,
        }
    }
}

/// Decoded command word.
#[derive(Debug, Copy, Clone)]
pub struct LoadCommand {
    pub msk: bool,
    pub coop: bool,
    pub cmd: u8,
    pub tenb: bool,
    pub start: usize,
    pub rows: usize,
    pub addr: u64,
    pub stride: i64,
    pub boffset: u64,
}

impl LoadCommand {
    pub fn decode(value: u64, x31: u64) -> Self {
        Self {
            msk: value >> 63 & 1 != 0,
            coop: value >> 62 & 1 != 0,
            cmd: (value >> 59 & 0b111) as u8,
            tenb: value >> 58 & 1 != 0,
            start: (value >> 52 & 0x3F) as usize,
            rows: (value >> 48 & 0xF) as usize + 1,
            addr: sign_extend48(value & 0xFFFF_FFFF_FFFF),
            stride: sign_extend48(x31 & 0xFFFF_FFFF_FFFF) as i64,
            boffset: x31 >> 48 & 0x3F,
        }
    }
}

fn sign_extend48(value: u64) -> u64 {
    ((value << 16) as i64 >> 16) as u64
}

/// Handles a write to a TensorLoad launch CSR.
pub fn launch(system: &mut System, hart: HartIndex, l2: bool, value: u64) -> ExecutionResult {
    let x31 = system.hart(hart).xregs.x(crate::hart::Specifier::X31);
    let command = LoadCommand::decode(value, x31);
    let core = system.core_at(hart.shire, hart.minion);
    let unit = if l2 {
        match core.tload_l2.iter().position(|u| u.is_idle()) {
            Some(slot) => LoadUnit::L2(slot),
            None => return suspend(system, hart, LoadUnit::L2(0)),
        }
    } else if command.tenb {
        match core.tload_b.state {
            LoadState::Idle => LoadUnit::B,
            // A back-to-back unpaired TenB load cancels the previous one.
            LoadState::Loading if !core.tload_b.paired => {
                system.core_at_mut(hart.shire, hart.minion).tload_b.clear();
                LoadUnit::B
            }
            _ => return suspend(system, hart, LoadUnit::B),
        }
    } else {
        match core.tload_a.iter().position(|u| u.is_idle()) {
            Some(slot) => LoadUnit::A(slot),
            None => return suspend(system, hart, LoadUnit::A(0)),
        }
    };
    system.observer.tensor_load(hart, value, command.tenb);
    // Prerequisites: reserved command encodings and the scratchpad gate fail softly, leaving
    // the unit idle with a sticky error bit.
    if command.cmd > 5 {
        system.set_tensor_error(hart, error::RESERVED_COMMAND);
        return Ok(());
    }
    if !l2 && !system.core_at(hart.shire, hart.minion).mcache_control.scp_enabled() {
        system.set_tensor_error(hart, error::SCP_DISABLED);
        return Ok(());
    }
    let uuid = system.core_at_mut(hart.shire, hart.minion).next_tensor_uuid();
    trace!(uuid, value, unit:?; "{hart} tensor load launch");

    if command.coop && !l2 {
        return launch_cooperative(system, hart, unit, command, value);
    }
    let unit_state = TLoad {
        state: LoadState::Ready,
        value,
        stride: command.stride as u64,
        mask: system.hart(hart).tensor_mask,
        tcoop: 0,
        launcher: Some(hart),
        paired: false,
    };
    *load_unit_mut(system, hart, unit) = unit_state;
    execute_fill(system, hart, unit, &command, &[hart.minion]);
    Ok(())
}

fn suspend(system: &mut System, hart: HartIndex, unit: LoadUnit) -> ExecutionResult {
    let reason = unit.waiting_reason();
    debug!("{hart} tensor load unit busy; waiting on {reason:?}");
    system.hart_mut(hart).waiting.insert(reason);
    Err(ExecutionInterrupt::Restart)
}

fn load_unit_mut<'s>(system: &'s mut System, hart: HartIndex, unit: LoadUnit) -> &'s mut TLoad {
    let core = system.core_at_mut(hart.shire, hart.minion);
    match unit {
        LoadUnit::A(slot) => &mut core.tload_a[slot],
        LoadUnit::B => &mut core.tload_b,
        LoadUnit::L2(slot) => &mut core.tload_l2[slot],
    }
}

/// Cooperative launch: join (or install) the rendezvous entries of every cooperating
/// neighborhood; the last arrival executes the fill for all participants.
fn launch_cooperative(
    system: &mut System,
    hart: HartIndex,
    unit: LoadUnit,
    command: LoadCommand,
    value: u64,
) -> ExecutionResult {
    let tcoop = system.hart(hart).tensor_coop;
    let neigh_mask = (tcoop & 0xF) as usize;
    let minion_mask = (tcoop >> 4 & 0xFF) as usize;
    let group = (tcoop >> 16 & 0x1F) as usize;
    // Expand the per-neighborhood minion mask into the shire-wide participant set.
    let mut participants: u32 = 0;
    for neigh in 0..4 {
        if neigh_mask & (1 << neigh) != 0 {
            participants |= (minion_mask as u32) << (neigh * MINIONS_PER_NEIGH);
        }
    }
    let own_bit = 1u32 << hart.minion;
    if participants & own_bit == 0 || participants == own_bit {
        // Degenerate group: nothing to wait for, run it alone.
        let unit_state = TLoad {
            state: LoadState::Ready,
            value,
            stride: command.stride as u64,
            mask: system.hart(hart).tensor_mask,
            tcoop,
            launcher: Some(hart),
            paired: false,
        };
        *load_unit_mut(system, hart, unit) = unit_state;
        execute_fill(system, hart, unit, &command, &[hart.minion]);
        return Ok(());
    }
    *load_unit_mut(system, hart, unit) = TLoad {
        state: LoadState::WaitingCoop,
        value,
        stride: command.stride as u64,
        mask: system.hart(hart).tensor_mask,
        tcoop,
        launcher: Some(hart),
        paired: false,
    };
    let slot = match unit {
        LoadUnit::A(slot) => Some(slot),
        LoadUnit::B => None,
        LoadUnit::L2(_) => unreachable!("L2 loads are never cooperative"),
    };
    for neigh in 0..system.shires[hart.shire].neighborhoods.len() {
        if neigh_mask & (1 << neigh) == 0 {
            continue;
        }
        let table = &mut system.shires[hart.shire].neighborhoods[neigh].coop;
        let entry = match slot {
            Some(slot) => &mut table.tload_a[slot][group],
            None => &mut table.tload_b[group],
        };
        if entry.is_free() {
            entry.all = participants;
            entry.pending = participants;
        }
        entry.pending &= !own_bit;
    }
    // The leader neighborhood is picked from physical-base bits, a deterministic tie-break
    // among the cooperating neighborhoods.
    let leader = leader_neighborhood(command.addr, neigh_mask);
    let leader_entry = {
        let table = &system.shires[hart.shire].neighborhoods[leader].coop;
        match slot {
            Some(slot) => table.tload_a[slot][group],
            None => table.tload_b[group],
        }
    };
    if leader_entry.pending != 0 {
        // Not everyone has arrived; park this hart on the unit.
        system.hart_mut(hart).waiting.insert(unit.waiting_reason());
        return Ok(());
    }
    // Last arrival: run the fill once into every participating minion's scratchpad, then
    // release the whole group.
    let minions: Vec<usize> = (0..32).filter(|m| participants & (1 << m) != 0).collect();
    execute_fill(system, hart, unit, &command, &minions);
    for neigh in 0..system.shires[hart.shire].neighborhoods.len() {
        if neigh_mask & (1 << neigh) == 0 {
            continue;
        }
        let table = &mut system.shires[hart.shire].neighborhoods[neigh].coop;
        match slot {
            Some(slot) => table.tload_a[slot][group].clear(),
            None => table.tload_b[group].clear(),
        }
    }
    for &minion in &minions {
        if minion == hart.minion {
            continue;
        }
        release_peer(system, hart.shire, minion, unit);
    }
    Ok(())
}

/// Leader selection: bits `[7:6]` of the physical base address, folded onto the cooperation
/// mask (lowest cooperating neighborhood wins if the addressed one is absent).
fn leader_neighborhood(addr: u64, neigh_mask: usize) -> usize {
    let candidate = (addr >> 6 & 0b11) as usize;
    if neigh_mask & (1 << candidate) != 0 {
        return candidate;
    }
    (0..4).find(|n| neigh_mask & (1 << n) != 0).unwrap_or(0)
}

/// Moves a peer minion's load unit to idle (or `Loading` for TenB) and wakes its parked hart.
fn release_peer(system: &mut System, shire: usize, minion: usize, unit: LoadUnit) {
    let core = system.core_at_mut(shire, minion);
    let (unit_ref, reason) = match unit {
        LoadUnit::A(slot) => (&mut core.tload_a[slot], unit.waiting_reason()),
        LoadUnit::B => (&mut core.tload_b, Waiting::TloadTenb),
        LoadUnit::L2(_) => unreachable!(),
    };
    match unit {
        LoadUnit::B => unit_ref.state = LoadState::Loading,
        _ => unit_ref.clear(),
    }
    // Either thread of the core may be parked on the unit (its launcher, or a sibling that
    // found it busy).
    system.wake_core_waiters(shire, minion, reason);
    // Waking an FMA parked on the TenB fill.
    if unit == LoadUnit::B {
        system.wake_core_waiters(shire, minion, Waiting::Tfma);
    }
}

/// Runs the fill described by `command` once, writing the loaded rows into the scratchpad of
/// every minion in `minions`. A translation fault sets the sticky access-fault bit and aborts
/// the row loop; a bus error raises the bus-error interrupt and continues.
fn execute_fill(
    system: &mut System,
    hart: HartIndex,
    unit: LoadUnit,
    command: &LoadCommand,
    minions: &[usize],
) {
    let mask = system.hart(hart).tensor_mask;
    let base = command.addr.wrapping_add(command.boffset * 8);
    'rows: for i in 0..command.rows {
        if command.msk && mask & (1 << i) == 0 {
            continue;
        }
        let row_addr = base.wrapping_add_signed(command.stride * i as i64);
        let mut line = [0u8; SCP_LINE];
        let result = match command.cmd {
            0 => read_line(system, hart, row_addr, &mut line),
            1 => read_interleave(system, hart, row_addr, &mut line, 1),
            2 => read_interleave(system, hart, row_addr, &mut line, 2),
            3 => read_transpose(system, hart, command, i, &mut line, 1),
            4 => read_transpose(system, hart, command, i, &mut line, 2),
            5 => read_transpose(system, hart, command, i, &mut line, 4),
            _ => unreachable!("reserved commands rejected at launch"),
        };
        match result {
            Ok(()) => {}
            Err(MemoryError::BusError) => {
                system.raise_bus_error_interrupt(hart);
                continue;
            }
            Err(_) => {
                system.set_tensor_error(hart, error::ACCESS_FAULT);
                break 'rows;
            }
        }
        let row = command.start + i;
        for &minion in minions {
            match unit {
                LoadUnit::L2(_) => {
                    system.write_l2_scp_row(hart.shire, row, &line);
                }
                _ => {
                    let entry = system
                        .core_at_mut(hart.shire, minion)
                        .scp_row_mut(if command.tenb { L1_SCP_ENTRIES + row } else { row });
                    *entry = ScpEntry(line);
                }
            }
        }
    }
    // The unit retires unless it owns TenB contents awaiting a paired FMA.
    let unit_ref = load_unit_mut(system, hart, unit);
    if command.tenb {
        unit_ref.state = LoadState::Loading;
    } else {
        unit_ref.clear();
    }
}

fn read_line(
    system: &mut System,
    hart: HartIndex,
    addr: u64,
    line: &mut [u8; SCP_LINE],
) -> Result<(), MemoryError> {
    Mmu::new(system, hart).load_tensor(addr, line)
}

/// Interleaved fill: the line is gathered from four 128-bit groups; lane `j` of the
/// destination takes element `j / groups` of group `j % groups`.
fn read_interleave(
    system: &mut System,
    hart: HartIndex,
    addr: u64,
    line: &mut [u8; SCP_LINE],
    elem: usize,
) -> Result<(), MemoryError> {
    let mut raw = [0u8; SCP_LINE];
    Mmu::new(system, hart).load_tensor(addr, &mut raw)?;
    let groups = 4;
    let group_bytes = SCP_LINE / groups;
    let lanes = SCP_LINE / elem;
    for j in 0..lanes {
        let group = j % groups;
        let index = j / groups;
        let src = group * group_bytes + index * elem;
        let dst = j * elem;
        line[dst..dst + elem].copy_from_slice(&raw[src..src + elem]);
    }
    Ok(())
}

/// Transposed fill: destination row `i`, element `j` comes from `addr + j*stride + i*elem`.
fn read_transpose(
    system: &mut System,
    hart: HartIndex,
    command: &LoadCommand,
    i: usize,
    line: &mut [u8; SCP_LINE],
    elem: usize,
) -> Result<(), MemoryError> {
    // The row loop already added i*stride to the base; undo that, transpose indexes columns
    // by stride instead.
    let base = command
        .addr
        .wrapping_add(command.boffset * 8)
        .wrapping_add((i * elem) as u64);
    let lanes = SCP_LINE / elem;
    let mut mmu = Mmu::new(system, hart);
    for j in 0..lanes {
        let src = base.wrapping_add_signed(command.stride * j as i64);
        let mut buf = [0u8; 4];
        mmu.read_bytes(src, &mut buf[..elem], crate::pma::AccessClass::Tensor)?;
        line[j * elem..j * elem + elem].copy_from_slice(&buf[..elem]);
    }
    Ok(())
}

/// Raised when an FMA with `tenb=1` commits: releases the TenB unit.
pub fn consume_tenb(system: &mut System, hart: HartIndex) {
    system.core_at_mut(hart.shire, hart.minion).tload_b.clear();
    system.wake_core_waiters(hart.shire, hart.minion, Waiting::TloadTenb);
}
