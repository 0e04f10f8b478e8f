//! Memory-mapped RISC-V timer: `mtime` plus one `mtimecmp` per timer channel.
//!
//! `mtime` advances with the scheduler's cycle count rather than the host wall clock, so runs
//! are reproducible.

use crate::trap::MemoryError;

pub const MTIME_ADDR: u64 = 0x0;
pub const MTIMECMP_BASE: u64 = 0x8;

/// Number of `mtimecmp` channels: channel 0 belongs to the service processor.
pub const CHANNELS: usize = 2;

#[derive(Debug)]
pub struct RvTimer {
    mtime: u64,
    mtimecmp: [u64; CHANNELS],
}

impl Default for RvTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl RvTimer {
    pub fn new() -> Self {
        Self {
            mtime: 0,
            mtimecmp: [u64::MAX; CHANNELS],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Advances `mtime` by `ticks`.
    pub fn tick(&mut self, ticks: u64) {
        self.mtime = self.mtime.wrapping_add(ticks);
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// `true` while the given channel's compare value has been reached.
    pub fn channel_pending(&self, channel: usize) -> bool {
        self.mtime >= self.mtimecmp[channel]
    }

    /// Handles a read at `offset`. Only aligned 64-bit accesses are supported.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let value = self.register(offset, buf.len())?;
        buf.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Handles a write at `offset`. `mtime` itself is read-only from the bus.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), MemoryError> {
        self.register(offset, buf.len())?;
        let value = u64::from_le_bytes(buf.try_into().unwrap());
        match offset {
            MTIME_ADDR => return Err(MemoryError(offset)),
            _ => {
                let channel = ((offset - MTIMECMP_BASE) / 8) as usize;
                self.mtimecmp[channel] = value;
            }
        }
        Ok(())
    }

    fn register(&self, offset: u64, size: usize) -> Result<u64, MemoryError> {
        if size != 8 || offset & 0b111 != 0 {
            return Err(MemoryError(offset));
        }
        match offset {
            MTIME_ADDR => Ok(self.mtime),
            _ if offset >= MTIMECMP_BASE
                && offset < MTIMECMP_BASE + 8 * CHANNELS as u64 =>
            {
                Ok(self.mtimecmp[((offset - MTIMECMP_BASE) / 8) as usize])
            }
            _ => Err(MemoryError(offset)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_and_compare() {
        let mut timer = RvTimer::new();
        timer.write(MTIMECMP_BASE, &100u64.to_le_bytes()).unwrap();
        assert!(!timer.channel_pending(0));
        timer.tick(99);
        assert!(!timer.channel_pending(0));
        timer.tick(1);
        assert!(timer.channel_pending(0));
        let mut buf = [0; 8];
        timer.read(MTIME_ADDR, &mut buf).unwrap();
        assert_eq!(100, u64::from_le_bytes(buf));
    }

    #[test]
    fn test_mtime_read_only() {
        let mut timer = RvTimer::new();
        assert!(timer.write(MTIME_ADDR, &5u64.to_le_bytes()).is_err());
        assert!(timer.write(0x4, &5u64.to_le_bytes()[..]).is_err());
    }
}
