#[macro_use]
extern crate static_assertions;

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod address_map;
pub mod address_range;
pub mod codec;
pub mod csr;
pub mod esr;
pub mod execute;
pub mod fpu;
pub mod hart;
pub mod instruction;
pub mod memory;
pub mod minion;
pub mod mmu;
pub mod neighborhood;
pub mod observer;
pub mod pma;
pub mod scheduler;
pub mod shire;
pub mod system;
pub mod tensor;
pub mod topology;
pub mod trap;

/// Re-export of [`AddressRange`] for convenience.
pub use address_range::AddressRange;

/// List of all possible privilege levels, as encodable in a 2-bit field.
///
/// Same as [`PrivilegeLevel`] except that it allows specifying level `2`, which the base ISA
/// reserves. The ESR address layout reuses that encoding for its PP (required privilege) field,
/// where `2` means *debug* and is reserved to the service processor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    /// Privilege level `0b10` is reserved in the base ISA. In the ESR PP field it selects the
    /// debug plane, accessible only to the service processor.
    Debug = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Convert a 2-bit value into a [`RawPrivilegeLevel`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Debug,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }

    pub fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }
}

impl fmt::Display for RawPrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            RawPrivilegeLevel::User => "U",
            RawPrivilegeLevel::Supervisor => "S",
            RawPrivilegeLevel::Debug => "D",
            RawPrivilegeLevel::Machine => "M",
        })
    }
}

/// List of defined privilege levels.
///
/// A privilege level is always referenced by two bits, so only `0`, `1`, `2`, and `3` are valid
/// privilege levels. However, only levels `0`, `1`, and `3` are defined; level `2` is considered
/// *reserved*.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`) is the lowest privilege level.
    User = 0,
    /// Supervisor (abbreviated `S`) is an intermediate privilege level.
    Supervisor = 1,
    // Level 2 is reserved
    /// Machine (abbreviated `M`) is the highest privilege level.
    Machine = 3,
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialEq<RawPrivilegeLevel> for PrivilegeLevel {
    fn eq(&self, other: &RawPrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl PartialOrd<RawPrivilegeLevel> for PrivilegeLevel {
    fn partial_cmp(&self, other: &RawPrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Machine => "M",
        })
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::User => Self::User,
            PrivilegeLevel::Supervisor => Self::Supervisor,
            PrivilegeLevel::Machine => Self::Machine,
        }
    }
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;
    fn try_from(value: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match value {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Debug => Err(ReservedPrivilegeLevelError(value)),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
        }
    }
}

#[derive(Error, Debug)]
#[error("privilege level {0} is reserved")]
pub struct ReservedPrivilegeLevelError(RawPrivilegeLevel);

pub mod unit {
    //! Collection of the units in which memory can be addressed (in bytes).

    /// A _byte_ is 8 bits.
    pub const BYTE: u64 = 1;

    /// A _halfword_ is 16 bits (2 bytes).
    pub const HALFWORD: u64 = 2;

    /// A _word_ is 32 bits (4 bytes).
    pub const WORD: u64 = 4;

    /// A _doubleword_ is 64 bits (8 bytes).
    pub const DOUBLEWORD: u64 = 8;

    /// A _quadword_ is 128 bits (16 bytes).
    pub const QUADWORD: u64 = 16;

    /// A _cache line_ is 512 bits (64 bytes).
    pub const LINE: u64 = 64;
}

/// Address alignment ranging from no alignment (`1`) up to cache-line alignment and beyond.
// Maintains the invariant that self.0 is a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u64);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Doubleword alignment means the address is a multiple of 8 (`address & 0b111 == 0`).
    pub const DOUBLEWORD: Self = Self(8);

    /// Quadword alignment means the address is a multiple of 16 (`address & 0b1111 == 0`).
    pub const QUADWORD: Self = Self(16);

    /// Cache-line alignment means the address is a multiple of 64.
    pub const LINE: Self = Self(64);

    /// Creates the natural alignment for a unit of size `size`. Returns `None` if `size` is not a
    /// power of two.
    ///
    /// If `size` is a power of two, the alignment will be equal to the size.
    pub fn natural_for_size(size: u64) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    /// Returns the alignment as a power of two.
    pub fn as_power_of_two(self) -> u64 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u64) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}

/// Identity under which a memory or ESR access is performed.
///
/// Every access through the memory subsystem or the ESR plane carries the identity of the
/// requester, so privilege and locality ("local shire" ESR addressing) can be consulted. The
/// system itself (reset ladders, DMA, host bridge) accesses memory as [`Agent::None`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Agent {
    /// No specific hart; system-initiated access with machine-level rights.
    None,
    /// The hart with the given global index.
    Hart(topology::HartIndex),
}

impl Agent {
    /// Returns the shire array index of the requester, or `None` for system accesses.
    pub fn shire(self) -> Option<usize> {
        match self {
            Agent::None => None,
            Agent::Hart(index) => Some(index.shire),
        }
    }

    /// Returns `true` if the requester is the service processor.
    pub fn is_service_processor(self) -> bool {
        match self {
            Agent::None => false,
            Agent::Hart(index) => index.shire == topology::IO_SHIRE_SP,
        }
    }
}
