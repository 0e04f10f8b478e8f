//! Chip geometry: shires, neighborhoods, minions, harts, and the id spaces tying them together.

use std::fmt;

/// Number of compute shires.
pub const COMPUTE_SHIRE_COUNT: usize = 32;

/// Number of memory-controller shires. They carry cache ESRs but no harts.
pub const MEM_SHIRE_COUNT: usize = 2;

/// Total number of shire array slots, including the I/O shire.
pub const SHIRE_COUNT: usize = COMPUTE_SHIRE_COUNT + MEM_SHIRE_COUNT + 1;

/// Array index of the I/O shire.
pub const IO_SHIRE_SP: usize = SHIRE_COUNT - 1;

/// External id of the I/O shire, as seen in ESR addresses and `mhartid`.
///
/// The external id deliberately differs from the array index; all conversions between the two
/// spaces go through [`shire_id_to_index`] and [`shire_index_to_id`]. It also deliberately
/// avoids the all-ones encoding, which ESR addressing reserves for "the local shire".
pub const IO_SHIRE_ID: usize = 254;

/// Neighborhoods per compute shire. The I/O shire has a single neighborhood.
pub const NEIGH_PER_SHIRE: usize = 4;

/// Minions per neighborhood.
pub const MINIONS_PER_NEIGH: usize = 8;

/// Minions per compute shire.
pub const MINIONS_PER_SHIRE: usize = NEIGH_PER_SHIRE * MINIONS_PER_NEIGH;

/// Hardware threads per minion.
pub const THREADS_PER_MINION: usize = 2;

/// Hardware threads per compute shire.
pub const THREADS_PER_SHIRE: usize = MINIONS_PER_SHIRE * THREADS_PER_MINION;

/// `mhartid` of the service processor.
pub const SERVICE_HART_ID: u64 = (IO_SHIRE_ID * THREADS_PER_SHIRE) as u64;

const_assert!(MINIONS_PER_SHIRE == 32);
const_assert!(THREADS_PER_SHIRE == 64);
const_assert!(IO_SHIRE_ID >= SHIRE_COUNT);

/// Converts an external shire id into the shire array index.
///
/// Returns `None` for ids that name no shire.
pub fn shire_id_to_index(id: usize) -> Option<usize> {
    match id {
        IO_SHIRE_ID => Some(IO_SHIRE_SP),
        id if id < SHIRE_COUNT - 1 => Some(id),
        _ => None,
    }
}

/// Converts a shire array index into the external shire id.
///
/// Panics if `index` is out of range; array indices are always produced by this crate and must be
/// valid.
pub fn shire_index_to_id(index: usize) -> usize {
    match index {
        IO_SHIRE_SP => IO_SHIRE_ID,
        index if index < SHIRE_COUNT - 1 => index,
        _ => panic!("shire array index {index} out of range"),
    }
}

/// Returns `true` if the shire at `index` carries minions (compute shires and the I/O shire's
/// service processor).
pub fn shire_has_harts(index: usize) -> bool {
    index < COMPUTE_SHIRE_COUNT || index == IO_SHIRE_SP
}

/// Identity of one hart, as arena indices into the [`System`](crate::system::System) aggregate.
///
/// Harts never store back-pointers to their owning structures; they carry this index triple and
/// the system provides accessors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct HartIndex {
    /// Shire array index (not the external shire id).
    pub shire: usize,
    /// Minion index within the shire (`0..MINIONS_PER_SHIRE`).
    pub minion: usize,
    /// Thread index within the minion (`0..THREADS_PER_MINION`).
    pub thread: usize,
}

impl HartIndex {
    pub fn new(shire: usize, minion: usize, thread: usize) -> Self {
        Self {
            shire,
            minion,
            thread,
        }
    }

    /// The service processor's index.
    pub fn service_processor() -> Self {
        Self::new(IO_SHIRE_SP, 0, 0)
    }

    /// Neighborhood index within the shire that this hart's minion belongs to.
    pub fn neighborhood(self) -> usize {
        self.minion / MINIONS_PER_NEIGH
    }

    /// Minion index within its neighborhood.
    pub fn minion_in_neigh(self) -> usize {
        self.minion % MINIONS_PER_NEIGH
    }

    /// Thread index within the shire (`0..THREADS_PER_SHIRE`).
    pub fn thread_in_shire(self) -> usize {
        self.minion * THREADS_PER_MINION + self.thread
    }

    /// The architectural `mhartid` value for this hart.
    pub fn mhartid(self) -> u64 {
        if self.shire == IO_SHIRE_SP {
            SERVICE_HART_ID
        } else {
            (shire_index_to_id(self.shire) * THREADS_PER_SHIRE + self.thread_in_shire()) as u64
        }
    }
}

impl fmt::Display for HartIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}m{}t{}", self.shire, self.minion, self.thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shire_id_bijection() {
        for index in 0..SHIRE_COUNT {
            let id = shire_index_to_id(index);
            assert_eq!(Some(index), shire_id_to_index(id));
        }
        assert_eq!(Some(IO_SHIRE_SP), shire_id_to_index(IO_SHIRE_ID));
        assert_eq!(None, shire_id_to_index(SHIRE_COUNT - 1));
        assert_eq!(None, shire_id_to_index(200));
    }

    #[test]
    fn test_mhartid() {
        let h = HartIndex::new(2, 5, 1);
        assert_eq!(2 * 64 + 11, h.mhartid() as usize);
        assert_eq!(SERVICE_HART_ID, HartIndex::service_processor().mhartid());
    }

    #[test]
    fn test_neighborhood_of_minion() {
        assert_eq!(0, HartIndex::new(0, 7, 0).neighborhood());
        assert_eq!(1, HartIndex::new(0, 8, 0).neighborhood());
        assert_eq!(3, HartIndex::new(0, 31, 1).neighborhood());
    }
}
