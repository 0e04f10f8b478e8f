//! The ESR plane: decoding of physical ESR offsets into tiled register banks, read/write
//! dispatch with privilege gating and side effects, and the cross-shire broadcast mechanism.
//!
//! ESR offsets (within the ESR region) are laid out as:
//!
//! - Bits `[31:30]`: **PP**, the privilege required (U=0, S=1, M=3; 2 is debug, restricted to
//!   the service processor).
//! - Bits `[29:22]`: shire id; all-ones selects the requesting agent's own shire.
//! - Bits `[21:20]`: subregion: `00` hart, `01` neighborhood, `10` shire-other, `11`
//!   shire-cache bank.
//! - Hart subregion: `[19:12]` hart id, `[11:3]` register index.
//! - Neighborhood subregion: `[19:16]` neighborhood id (`0xF` broadcasts to all), `[15:3]`
//!   register index.
//! - Shire-cache subregion: `[16:13]` bank (`0xF` broadcasts to the four banks), `[12:3]`
//!   register index.

use crate::hart::Lifecycle;
use crate::neighborhood::{hactrl, reg as nreg};
use crate::shire::{cache_reg, other_reg, SHIRE_REVISION_ID};
use crate::system::System;
use crate::topology::{self, HartIndex, THREADS_PER_MINION, THREADS_PER_SHIRE};
use crate::trap::MemoryError;
use crate::{Agent, RawPrivilegeLevel};
use log::{debug, trace, warn};

/// Build id folded into the revision register.
const BUILD_ID: u64 = 0x0045_4d55;

/// Register indices within the hart ESR subregion.
pub mod hart_reg {
    /// Read-only lifecycle/halt status.
    pub const STATUS: u16 = 0;
    pub const DCSR: u16 = 1;
    pub const DPC: u16 = 2;
    pub const DDATA0: u16 = 3;
    /// Abstract debug command channel.
    pub const ABSCMD: u16 = 4;
    pub const PROGBUF0: u16 = 8;
    pub const PROGBUF7: u16 = 15;
}

/// Abstract-command encodings accepted by [`hart_reg::ABSCMD`].
pub mod abscmd {
    /// `ddata0 := x[regno]`
    pub const READ_XREG: u64 = 0;
    /// `x[regno] := ddata0`
    pub const WRITE_XREG: u64 = 1;
    /// Start executing the program buffer.
    pub const RUN_PROGBUF: u64 = 2;
}

/// Extracts the PP (required privilege) field of an ESR offset.
pub fn required_privilege(offset: u64) -> RawPrivilegeLevel {
    RawPrivilegeLevel::from_u2(((offset >> 30) & 0b11) as u8)
}

/// A decoded ESR offset.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EsrAddress {
    pub pp: RawPrivilegeLevel,
    pub shire: usize,
    pub target: EsrTarget,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EsrTarget {
    /// `hart` is the thread index within the shire.
    Hart { hart: usize, reg: u16 },
    /// `neigh == 0xF` broadcasts to every neighborhood of the shire.
    Neigh { neigh: usize, reg: u16 },
    ShireOther { reg: u16 },
    /// `bank == 0xF` broadcasts to the four banks.
    ShireCache { bank: usize, reg: u16 },
}

/// Decodes an ESR offset, resolving the "local shire" encoding against `agent`.
pub fn decode(offset: u64, agent: Agent) -> Result<EsrAddress, MemoryError> {
    let pp = required_privilege(offset);
    let shire_field = (offset >> 22) & 0xFF;
    let shire = if shire_field == 0xFF {
        match agent {
            Agent::Hart(index) if !agent.is_service_processor() => index.shire,
            // The service processor (and system-initiated accesses) have no local shire.
            _ => return Err(MemoryError(offset)),
        }
    } else {
        topology::shire_id_to_index(shire_field as usize).ok_or(MemoryError(offset))?
    };
    let target = match (offset >> 20) & 0b11 {
        0b00 => EsrTarget::Hart {
            hart: ((offset >> 12) & 0xFF) as usize,
            reg: ((offset >> 3) & 0x1FF) as u16,
        },
        0b01 => EsrTarget::Neigh {
            neigh: ((offset >> 16) & 0xF) as usize,
            reg: ((offset >> 3) & 0x1FFF) as u16,
        },
        0b10 => EsrTarget::ShireOther {
            reg: ((offset >> 3) & 0x1FFF) as u16,
        },
        _ => EsrTarget::ShireCache {
            bank: ((offset >> 13) & 0xF) as usize,
            reg: ((offset >> 3) & 0x3FF) as u16,
        },
    };
    Ok(EsrAddress { pp, shire, target })
}

fn check_privilege(address: &EsrAddress, agent: Agent, system: &System) -> Result<(), MemoryError> {
    if address.pp.is_debug() && !agent.is_service_processor() && agent != Agent::None {
        return Err(MemoryError(0));
    }
    if let Agent::Hart(index) = agent {
        let privilege = system.hart(index).effective_privilege();
        if !address.pp.is_debug() && (privilege as usize) < address.pp as usize {
            return Err(MemoryError(0));
        }
    }
    Ok(())
}

/// Reads the ESR at `offset` on behalf of `agent`.
pub fn read(system: &mut System, agent: Agent, offset: u64) -> Result<u64, MemoryError> {
    let address = decode(offset, agent)?;
    check_privilege(&address, agent, system).map_err(|_| MemoryError(offset))?;
    let value = match address.target {
        EsrTarget::Hart { hart, reg } => read_hart(system, address.shire, hart, reg),
        EsrTarget::Neigh { neigh, reg } => read_neigh(system, address.shire, neigh, reg),
        EsrTarget::ShireOther { reg } => read_shire_other(system, address.shire, reg),
        EsrTarget::ShireCache { bank, reg } => read_shire_cache(system, address.shire, bank, reg),
    };
    let value = value.ok_or(MemoryError(offset))?;
    trace!(offset, value; "esr read");
    Ok(value)
}

/// Writes the ESR at `offset` on behalf of `agent`, applying field masks and side effects.
pub fn write(system: &mut System, agent: Agent, offset: u64, value: u64) -> Result<(), MemoryError> {
    let address = decode(offset, agent)?;
    check_privilege(&address, agent, system).map_err(|_| MemoryError(offset))?;
    debug!(offset, value, shire = address.shire, target:? = address.target; "esr write");
    match address.target {
        EsrTarget::Hart { hart, reg } => write_hart(system, address.shire, hart, reg, value),
        EsrTarget::Neigh { neigh: 0xF, reg } => {
            for neigh in 0..system.shires[address.shire].neighborhoods.len() {
                write_neigh(system, address.shire, neigh, reg, value)?;
            }
            Ok(())
        }
        EsrTarget::Neigh { neigh, reg } => write_neigh(system, address.shire, neigh, reg, value),
        EsrTarget::ShireOther { reg } => write_shire_other(system, address.shire, reg, value),
        EsrTarget::ShireCache { bank: 0xF, reg } => {
            for bank in 0..4 {
                write_shire_cache(system, address.shire, bank, reg, value)?;
            }
            Ok(())
        }
        EsrTarget::ShireCache { bank, reg } => {
            write_shire_cache(system, address.shire, bank, reg, value)
        }
    }
    .map_err(|_| MemoryError(offset))
}

fn hart_index(system: &System, shire: usize, hart: usize) -> Option<HartIndex> {
    if hart >= THREADS_PER_SHIRE {
        return None;
    }
    let index = HartIndex::new(shire, hart / THREADS_PER_MINION, hart % THREADS_PER_MINION);
    let shire_obj = system.shires.get(shire)?;
    if index.minion >= shire_obj.minions.len() {
        return None;
    }
    Some(index)
}

fn read_hart(system: &System, shire: usize, hart: usize, reg: u16) -> Option<u64> {
    let index = hart_index(system, shire, hart)?;
    let hart = system.hart(index);
    match reg {
        hart_reg::STATUS => Some(match hart.lifecycle {
            Lifecycle::Nonexistent => 0,
            Lifecycle::Unavailable => 1,
            Lifecycle::Running => 2,
            Lifecycle::Halted => 3,
        }),
        hart_reg::DCSR => Some(hart.debug.dcsr),
        hart_reg::DPC => Some(hart.debug.dpc),
        hart_reg::DDATA0 => Some(hart.debug.ddata0),
        hart_reg::ABSCMD => Some(0),
        hart_reg::PROGBUF0..=hart_reg::PROGBUF7 => {
            Some(hart.debug.progbuf[(reg - hart_reg::PROGBUF0) as usize] as u64)
        }
        _ => None,
    }
}

fn write_hart(
    system: &mut System,
    shire: usize,
    hart: usize,
    reg: u16,
    value: u64,
) -> Result<(), MemoryError> {
    let index = hart_index(system, shire, hart).ok_or(MemoryError(0))?;
    let halted = system.hart(index).lifecycle == Lifecycle::Halted;
    let hart = system.hart_mut(index);
    match reg {
        hart_reg::STATUS => {} // read-only
        hart_reg::DCSR => hart.debug.dcsr = value,
        hart_reg::DPC => hart.debug.dpc = value,
        hart_reg::DDATA0 => hart.debug.ddata0 = value,
        hart_reg::ABSCMD => {
            // Abstract commands only act on halted harts; otherwise the write is dropped.
            if !halted {
                warn!("abscmd write to non-halted hart {index}; ignored");
                return Ok(());
            }
            let regno = crate::hart::Specifier::from_u5(((value >> 8) & 0x1F) as u8);
            match value & 0xFF {
                abscmd::READ_XREG => hart.debug.ddata0 = hart.xregs.x(regno),
                abscmd::WRITE_XREG => {
                    let data = hart.debug.ddata0;
                    hart.xregs.set_x(regno, data);
                }
                abscmd::RUN_PROGBUF => {
                    hart.debug.in_progbuf = true;
                    hart.debug.progbuf_pc = 0;
                }
                _ => return Err(MemoryError(0)),
            }
        }
        hart_reg::PROGBUF0..=hart_reg::PROGBUF7 => {
            // A program-buffer write to a hart that is neither halted nor executing the
            // buffer is dropped silently.
            if halted || system.hart(index).debug.in_progbuf {
                system.hart_mut(index).debug.progbuf[(reg - hart_reg::PROGBUF0) as usize] =
                    value as u32;
            }
        }
        _ => return Err(MemoryError(0)),
    }
    Ok(())
}

fn read_neigh(system: &System, shire: usize, neigh: usize, reg: u16) -> Option<u64> {
    let neigh = system.shires.get(shire)?.neighborhoods.get(neigh)?;
    match reg {
        nreg::ICACHE_ERR_LOG_INFO => Some(neigh.icache_err_log_info),
        nreg::IPI_REDIRECT_PC => Some(neigh.ipi_redirect_pc),
        nreg::MINION_BOOT => Some(neigh.minion_boot),
        nreg::MPROT => Some(neigh.mprot),
        nreg::HACTRL => Some(neigh.hactrl),
        nreg::HASTATUS0 => Some(neigh.hastatus0),
        nreg::HASTATUS1 => Some(neigh.hastatus1),
        nreg::TEXTURE_IMAGE_TABLE_PTR => Some(neigh.texture_image_table_ptr),
        nreg::TEXTURE_CONTROL => Some(neigh.texture_control),
        nreg::TEXTURE_STATUS => Some(neigh.texture_status),
        nreg::NEIGH_CHICKEN => Some(neigh.neigh_chicken),
        nreg::VMSPAGESIZE => Some(neigh.vmspagesize),
        nreg::PMU_CONTROL => Some(neigh.pmu_control),
        _ => None,
    }
}

fn write_neigh(
    system: &mut System,
    shire: usize,
    neigh_idx: usize,
    reg: u16,
    value: u64,
) -> Result<(), MemoryError> {
    let neigh_count = system.shires[shire].neighborhoods.len();
    if neigh_idx >= neigh_count {
        return Err(MemoryError(0));
    }
    let neigh = &mut system.shires[shire].neighborhoods[neigh_idx];
    match reg {
        nreg::ICACHE_ERR_LOG_INFO => neigh.icache_err_log_info = value,
        nreg::IPI_REDIRECT_PC => neigh.ipi_redirect_pc = value & !0b1,
        nreg::MINION_BOOT => neigh.minion_boot = value & !0b1,
        nreg::MPROT => {
            neigh.mprot = value;
            // mprot affects translation results; fetched lines may no longer be valid.
            system.invalidate_fetch_caches_of_neighborhood(shire, neigh_idx);
        }
        nreg::HACTRL => {
            // The request bits are self-clearing; only the sticky configuration is stored.
            neigh.hactrl = value & !(hactrl::HALTREQ | hactrl::RESUMEREQ);
            let haltreq = value & hactrl::HALTREQ != 0;
            let resumereq = value & hactrl::RESUMEREQ != 0;
            let select = (value >> hactrl::HARTSEL_SHIFT) & hactrl::HARTSEL_MASK;
            system.debug_halt_resume(shire, neigh_idx, select, haltreq, resumereq);
        }
        nreg::HASTATUS0 => {} // read-only status
        nreg::HASTATUS1 => {}
        nreg::TEXTURE_IMAGE_TABLE_PTR => {
            // No texture hardware is modeled behind this pointer.
            neigh.texture_image_table_ptr = value;
        }
        nreg::TEXTURE_CONTROL => neigh.texture_control = value,
        nreg::TEXTURE_STATUS => {}
        nreg::NEIGH_CHICKEN => neigh.neigh_chicken = value,
        nreg::VMSPAGESIZE => neigh.vmspagesize = value & 0b11,
        nreg::PMU_CONTROL => neigh.pmu_control = value,
        _ => return Err(MemoryError(0)),
    }
    Ok(())
}

fn read_shire_other(system: &System, shire: usize, reg: u16) -> Option<u64> {
    let other = &system.shires.get(shire)?.other;
    match reg {
        other_reg::FLB0..=other_reg::FLB31 => Some(other.flb[reg as usize]),
        other_reg::IPI_REDIRECT_FILTER => Some(other.ipi_redirect_filter),
        other_reg::IPI_REDIRECT_TRIGGER | other_reg::IPI_TRIGGER => Some(0),
        other_reg::PLL_CONFIG => Some(other.pll_config),
        other_reg::DLL_CONFIG => Some(other.dll_config),
        other_reg::COOP_MODE => Some(other.coop_mode as u64),
        other_reg::THREAD0_DISABLE => Some(other.thread0_disable),
        other_reg::THREAD1_DISABLE => Some(other.thread1_disable),
        other_reg::MINION_FEATURE => Some(other.minion_feature),
        other_reg::SHIRE_CONFIG => Some(other.shire_config),
        other_reg::MTIME_LOCAL_TARGET => Some(other.mtime_local_target),
        other_reg::CACHERAM_CONFIG => Some(other.cacheram_config),
        other_reg::CLOCK_GATE => Some(other.clock_gate),
        other_reg::ICACHE_PREFETCH_U..=other_reg::ICACHE_PREFETCH_M => {
            Some(other.icache_prefetch[(reg - other_reg::ICACHE_PREFETCH_U) as usize])
        }
        other_reg::BROADCAST_DATA => Some(other.broadcast_data),
        other_reg::UBROADCAST | other_reg::SBROADCAST | other_reg::MBROADCAST => Some(0),
        other_reg::FCC_CREDINC0 | other_reg::FCC_CREDINC1 => Some(0),
        other_reg::SHIRE_REVISION => Some(SHIRE_REVISION_ID | BUILD_ID << 32),
        _ => None,
    }
}

fn write_shire_other(
    system: &mut System,
    shire: usize,
    reg: u16,
    value: u64,
) -> Result<(), MemoryError> {
    let other = &mut system.shires[shire].other;
    match reg {
        other_reg::FLB0..=other_reg::FLB31 => other.flb[reg as usize] = value & 0xFFFF,
        other_reg::IPI_REDIRECT_FILTER => other.ipi_redirect_filter = value,
        other_reg::IPI_REDIRECT_TRIGGER => {
            let mask = value & other.ipi_redirect_filter;
            system.ipi_redirect(shire, mask);
        }
        other_reg::IPI_TRIGGER => {
            system.raise_machine_software_interrupt(shire, value);
        }
        other_reg::PLL_CONFIG => other.pll_config = value,
        other_reg::DLL_CONFIG => other.dll_config = value,
        other_reg::COOP_MODE => other.coop_mode = value & 1 != 0,
        other_reg::THREAD0_DISABLE => {
            other.thread0_disable = value;
            system.recalculate_thread_enables(shire);
        }
        other_reg::THREAD1_DISABLE => {
            other.thread1_disable = value;
            system.recalculate_thread_enables(shire);
        }
        other_reg::MINION_FEATURE => {
            other.minion_feature = value & 0x3F;
            system.recalculate_thread_enables(shire);
        }
        other_reg::SHIRE_CONFIG => other.shire_config = value,
        other_reg::MTIME_LOCAL_TARGET => {
            other.mtime_local_target = value;
            system.refresh_timer_interrupts();
        }
        other_reg::CACHERAM_CONFIG => other.cacheram_config = value,
        other_reg::CLOCK_GATE => other.clock_gate = value,
        other_reg::ICACHE_PREFETCH_U..=other_reg::ICACHE_PREFETCH_M => {
            other.icache_prefetch[(reg - other_reg::ICACHE_PREFETCH_U) as usize] = value;
        }
        other_reg::BROADCAST_DATA => other.broadcast_data = value,
        other_reg::UBROADCAST => broadcast(system, shire, value, RawPrivilegeLevel::User)?,
        other_reg::SBROADCAST => broadcast(system, shire, value, RawPrivilegeLevel::Supervisor)?,
        other_reg::MBROADCAST => broadcast(system, shire, value, RawPrivilegeLevel::Machine)?,
        other_reg::FCC_CREDINC0 => system.fcc_credit_increment(shire, 0, value),
        other_reg::FCC_CREDINC1 => system.fcc_credit_increment(shire, 1, value),
        other_reg::SHIRE_REVISION => {} // read-only
        _ => return Err(MemoryError(0)),
    }
    Ok(())
}

fn read_shire_cache(system: &System, shire: usize, bank: usize, reg: u16) -> Option<u64> {
    if bank >= 4 || reg as usize >= cache_reg::COUNT {
        return None;
    }
    Some(system.shires.get(shire)?.cache_banks[bank].regs[reg as usize])
}

fn write_shire_cache(
    system: &mut System,
    shire: usize,
    bank: usize,
    reg: u16,
    value: u64,
) -> Result<(), MemoryError> {
    if bank >= 4 || reg as usize >= cache_reg::COUNT {
        return Err(MemoryError(0));
    }
    let regs = &mut system.shires[shire].cache_banks[bank].regs;
    match reg {
        cache_reg::ERR_LOG | cache_reg::ERR_LOG_INFO => {
            // Write-one-to-clear error logs.
            regs[reg as usize] &= !value;
        }
        _ => regs[reg as usize] = value,
    }
    Ok(())
}

/// Broadcast-payload layout: bits `[39:0]` are the destination-shire bitmap, bits `[58:40]`
/// are bits `[21:3]` of the per-shire ESR offset to write (subregion, selector, and register
/// index).
fn broadcast(
    system: &mut System,
    source_shire: usize,
    payload: u64,
    pp: RawPrivilegeLevel,
) -> Result<(), MemoryError> {
    let latch = system.shires[source_shire].other.broadcast_data;
    let destinations = payload & 0xFF_FFFF_FFFF;
    let field = (payload >> 40) & 0x7_FFFF;
    debug!(destinations, field, latch; "esr broadcast");
    for id in 0..40usize {
        if destinations & (1 << id) == 0 {
            continue;
        }
        let Some(_) = topology::shire_id_to_index(id) else {
            continue;
        };
        let offset = (pp as u64) << 30 | (id as u64) << 22 | field << 3;
        // Replaying as a system access: the broadcast carries its own privilege plane.
        write(system, Agent::None, offset, latch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fields() {
        // PP=M, shire 5, neighborhood 2, register MINION_BOOT.
        let offset = 0b11u64 << 30
            | 5 << 22
            | 0b01 << 20
            | 2 << 16
            | (nreg::MINION_BOOT as u64) << 3;
        let address = decode(offset, Agent::None).unwrap();
        assert_eq!(RawPrivilegeLevel::Machine, address.pp);
        assert_eq!(5, address.shire);
        assert_eq!(
            EsrTarget::Neigh {
                neigh: 2,
                reg: nreg::MINION_BOOT
            },
            address.target
        );
    }

    #[test]
    fn test_decode_local_shire() {
        let offset = 0xFFu64 << 22 | 0b10 << 20 | (other_reg::COOP_MODE as u64) << 3;
        let agent = Agent::Hart(HartIndex::new(7, 0, 0));
        assert_eq!(7, decode(offset, agent).unwrap().shire);
        // System accesses have no local shire.
        assert!(decode(offset, Agent::None).is_err());
        // Neither does the service processor.
        let sp = Agent::Hart(HartIndex::service_processor());
        assert!(decode(offset, sp).is_err());
    }

    #[test]
    fn test_decode_hart_target() {
        let offset = 3 << 22 | (17u64 << 12) | (hart_reg::DPC as u64) << 3;
        let address = decode(offset, Agent::None).unwrap();
        assert_eq!(
            EsrTarget::Hart {
                hart: 17,
                reg: hart_reg::DPC
            },
            address.target
        );
    }
}
