//! Platform-level interrupt controller region.
//!
//! The chip instantiates two of these: one serving the processing-unit shires (`pu_plic`) and
//! one serving the service-processor I/O complex (`spio_plic`). The register block follows the
//! standard PLIC layout (priorities, pending, enables, threshold, claim/complete) for a single
//! context.

use crate::trap::MemoryError;
use bitvec::array::BitArray;
use bitvec::BitArr;

/// Number of interrupt sources, including the reserved source 0.
pub const SOURCE_COUNT: usize = 64;

pub const PRIORITY_BASE: u64 = 0x0;
pub const PENDING_BASE: u64 = 0x1000;
pub const ENABLES_BASE: u64 = 0x2000;
pub const THRESHOLD_ADDR: u64 = 0x20_0000;
pub const CLAIMCOMPLETE_ADDR: u64 = 0x20_0004;

/// A single-context PLIC.
#[derive(Debug)]
pub struct Plic {
    priorities: [u32; SOURCE_COUNT],
    pending: BitArr!(for SOURCE_COUNT, in u32),
    enabled: BitArr!(for SOURCE_COUNT, in u32),
    priority_threshold: u32,
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

impl Plic {
    pub fn new() -> Self {
        Self {
            priorities: [0; SOURCE_COUNT],
            pending: BitArray::ZERO,
            enabled: BitArray::ZERO,
            priority_threshold: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Latches an interrupt source as pending. Source 0 does not exist.
    pub fn interrupt_pending_set(&mut self, source: u32) {
        if source != 0 && (source as usize) < SOURCE_COUNT {
            self.pending.set(source as usize, true);
        }
    }

    /// Clears a pending interrupt source.
    pub fn interrupt_pending_clear(&mut self, source: u32) {
        if (source as usize) < SOURCE_COUNT {
            self.pending.set(source as usize, false);
        }
    }

    /// Returns the id of the highest-priority pending enabled source above the threshold, or 0
    /// if none qualifies.
    pub fn highest_priority_pending(&self) -> u32 {
        let mut best = (0u32, 0u32);
        for source in 1..SOURCE_COUNT {
            if self.pending[source] && self.enabled[source] {
                let priority = self.priorities[source];
                if priority > best.1 {
                    best = (source as u32, priority);
                }
            }
        }
        if best.1 <= self.priority_threshold {
            return 0;
        }
        best.0
    }

    /// `true` while a qualifying source is pending; drives the external-interrupt line.
    pub fn needs_interrupt(&self) -> bool {
        self.highest_priority_pending() != 0
    }

    fn claim(&mut self) -> u32 {
        let source = self.highest_priority_pending();
        if source != 0 {
            self.pending.set(source as usize, false);
        }
        source
    }

    /// Handles a read of the register block at `offset`. Only 32-bit accesses are supported.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        if buf.len() != 4 || offset & 0b11 != 0 {
            return Err(MemoryError(offset));
        }
        let value = match offset {
            THRESHOLD_ADDR => self.priority_threshold,
            CLAIMCOMPLETE_ADDR => self.claim(),
            _ if offset >= PRIORITY_BASE && offset < PRIORITY_BASE + 4 * SOURCE_COUNT as u64 => {
                self.priorities[(offset / 4) as usize]
            }
            _ if offset >= PENDING_BASE && offset < PENDING_BASE + 8 => {
                let word = ((offset - PENDING_BASE) / 4) as usize;
                self.pending.as_raw_slice()[word]
            }
            _ if offset >= ENABLES_BASE && offset < ENABLES_BASE + 8 => {
                let word = ((offset - ENABLES_BASE) / 4) as usize;
                self.enabled.as_raw_slice()[word]
            }
            _ => return Err(MemoryError(offset)),
        };
        buf.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Handles a write to the register block at `offset`. Only 32-bit accesses are supported.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), MemoryError> {
        if buf.len() != 4 || offset & 0b11 != 0 {
            return Err(MemoryError(offset));
        }
        let value = u32::from_le_bytes(buf.try_into().unwrap());
        match offset {
            THRESHOLD_ADDR => self.priority_threshold = value.min(7),
            CLAIMCOMPLETE_ADDR => {
                // Completion: nothing to record for a level-triggered source that was already
                // claimed.
            }
            _ if offset >= PRIORITY_BASE && offset < PRIORITY_BASE + 4 * SOURCE_COUNT as u64 => {
                let index = (offset / 4) as usize;
                if index != 0 {
                    self.priorities[index] = value.min(7);
                }
            }
            _ if offset >= ENABLES_BASE && offset < ENABLES_BASE + 8 => {
                let word = ((offset - ENABLES_BASE) / 4) as usize;
                self.enabled.as_raw_mut_slice()[word] = value;
                self.enabled.set(0, false);
            }
            _ => return Err(MemoryError(offset)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write32(plic: &mut Plic, offset: u64, value: u32) {
        plic.write(offset, &value.to_le_bytes()).unwrap();
    }

    fn read32(plic: &mut Plic, offset: u64) -> u32 {
        let mut buf = [0; 4];
        plic.read(offset, &mut buf).unwrap();
        u32::from_le_bytes(buf)
    }

    #[test]
    fn test_claim_highest_priority() {
        let mut plic = Plic::new();
        write32(&mut plic, PRIORITY_BASE + 4 * 5, 3);
        write32(&mut plic, PRIORITY_BASE + 4 * 9, 7);
        write32(&mut plic, ENABLES_BASE, (1 << 5) | (1 << 9));
        plic.interrupt_pending_set(5);
        plic.interrupt_pending_set(9);
        assert!(plic.needs_interrupt());
        assert_eq!(9, read32(&mut plic, CLAIMCOMPLETE_ADDR));
        assert_eq!(5, read32(&mut plic, CLAIMCOMPLETE_ADDR));
        assert_eq!(0, read32(&mut plic, CLAIMCOMPLETE_ADDR));
        assert!(!plic.needs_interrupt());
    }

    #[test]
    fn test_threshold_masks() {
        let mut plic = Plic::new();
        write32(&mut plic, PRIORITY_BASE + 4 * 2, 1);
        write32(&mut plic, ENABLES_BASE, 1 << 2);
        write32(&mut plic, THRESHOLD_ADDR, 1);
        plic.interrupt_pending_set(2);
        assert!(!plic.needs_interrupt());
        write32(&mut plic, THRESHOLD_ADDR, 0);
        assert!(plic.needs_interrupt());
    }

    #[test]
    fn test_disabled_source_not_claimed() {
        let mut plic = Plic::new();
        write32(&mut plic, PRIORITY_BASE + 4 * 3, 5);
        plic.interrupt_pending_set(3);
        assert_eq!(0, plic.highest_priority_pending());
    }
}
