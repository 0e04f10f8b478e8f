//! Exception and interrupt causes, and the vectoring arithmetic of trap delivery.
//!
//! Actual delivery (writing `xepc`/`xcause`/`xtval`, pushing the privilege stack) lives with
//! the hart engine, which owns the registers involved; this module defines the cause space.

use thiserror::Error;

/// Result of executing a single instruction. [`Ok`] if execution went normal, [`Err`] if the
/// instruction did not commit.
pub type ExecutionResult<T = ()> = Result<T, ExecutionInterrupt>;

/// Reasons an instruction fails to commit.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExecutionInterrupt {
    /// Architectural trap: delivered to the configured trap vector.
    Trap(Exception),
    /// The instruction cannot make progress yet; `npc` has been reset to `pc` and the hart has
    /// recorded a waiting reason. The scheduler re-runs the instruction after wake-up. This
    /// never escapes the hart engine.
    Restart,
    /// Control transfers into debug mode (sets `dpc`/`dcsr`, halts the hart).
    DebugEntry(DebugCause),
}

impl From<Exception> for ExecutionInterrupt {
    fn from(value: Exception) -> Self {
        Self::Trap(value)
    }
}

/// Cause of an entry into debug mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DebugCause {
    Ebreak = 1,
    Trigger = 2,
    Haltreq = 3,
    Step = 4,
    ResetHalt = 5,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// The inner value is the faulting virtual address.
    InstructionAddressMisaligned(u64),
    /// The inner value is the faulting virtual address.
    InstructionAccessFault(u64),
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    ///
    /// The inner value is the raw instruction if that data was available.
    IllegalInstruction(Option<u32>),
    Breakpoint,
    /// The inner value is the virtual address of the portion of the access that caused the
    /// fault.
    LoadAddressMisaligned(u64),
    /// The inner value is the faulting virtual address.
    LoadAccessFault(u64),
    /// The inner value is the virtual address of the portion of the access that caused the
    /// fault.
    StoreOrAmoAddressMisaligned(u64),
    /// The inner value is the faulting virtual address.
    StoreOrAmoAccessFault(u64),
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    /// The inner value is the faulting virtual address.
    InstructionPageFault(u64),
    /// The inner value is the faulting virtual address.
    LoadPageFault(u64),
    /// The inner value is the faulting virtual address.
    StoreOrAmoPageFault(u64),
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u64 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u64 = 1;
    pub const ILLEGAL_INSTRUCTION: u64 = 2;
    pub const BREAKPOINT: u64 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u64 = 4;
    pub const LOAD_ACCESS_FAULT: u64 = 5;
    pub const STORE_OR_AMO_ADDRESS_MISALIGNED: u64 = 6;
    pub const STORE_OR_AMO_ACCESS_FAULT: u64 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u64 = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: u64 = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u64 = 11;
    pub const INSTRUCTION_PAGE_FAULT: u64 = 12;
    pub const LOAD_PAGE_FAULT: u64 = 13;
    pub const STORE_OR_AMO_PAGE_FAULT: u64 = 15;

    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault(_) => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned(_) => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreOrAmoAddressMisaligned(_) => Self::STORE_OR_AMO_ADDRESS_MISALIGNED,
            Self::StoreOrAmoAccessFault(_) => Self::STORE_OR_AMO_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
            Self::InstructionPageFault(_) => Self::INSTRUCTION_PAGE_FAULT,
            Self::LoadPageFault(_) => Self::LOAD_PAGE_FAULT,
            Self::StoreOrAmoPageFault(_) => Self::STORE_OR_AMO_PAGE_FAULT,
        }
    }

    /// The value written to `xtval` when this exception is delivered.
    pub fn tval(&self, pc: u64) -> u64 {
        match *self {
            Self::IllegalInstruction(raw) => raw.unwrap_or(0) as u64,
            Self::Breakpoint => pc,
            Self::InstructionAddressMisaligned(vaddr)
            | Self::InstructionAccessFault(vaddr)
            | Self::LoadAddressMisaligned(vaddr)
            | Self::StoreOrAmoAddressMisaligned(vaddr)
            | Self::LoadAccessFault(vaddr)
            | Self::StoreOrAmoAccessFault(vaddr)
            | Self::InstructionPageFault(vaddr)
            | Self::LoadPageFault(vaddr)
            | Self::StoreOrAmoPageFault(vaddr) => vaddr,
            Self::EnvironmentCallFromUMode
            | Self::EnvironmentCallFromSMode
            | Self::EnvironmentCallFromMMode => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftware,
    MachineSoftware,
    SupervisorTimer,
    MachineTimer,
    SupervisorExternal,
    MachineExternal,
    /// A memory-bus error reported asynchronously (implementation-defined cause).
    BusError,
    /// An IPI redirect reached a hart that was not waiting for an interrupt in U-mode
    /// (implementation-defined cause).
    BadIpiRedirect,
}

impl Interrupt {
    pub const SUPERVISOR_SOFTWARE: u64 = 1;
    pub const MACHINE_SOFTWARE: u64 = 3;
    pub const SUPERVISOR_TIMER: u64 = 5;
    pub const MACHINE_TIMER: u64 = 7;
    pub const SUPERVISOR_EXTERNAL: u64 = 9;
    pub const MACHINE_EXTERNAL: u64 = 11;
    pub const BUS_ERROR: u64 = 16;
    pub const BAD_IPI_REDIRECT: u64 = 17;

    /// Returns the exception code (cause) for this interrupt.
    pub const fn code(&self) -> u64 {
        match self {
            Self::SupervisorSoftware => Self::SUPERVISOR_SOFTWARE,
            Self::MachineSoftware => Self::MACHINE_SOFTWARE,
            Self::SupervisorTimer => Self::SUPERVISOR_TIMER,
            Self::MachineTimer => Self::MACHINE_TIMER,
            Self::SupervisorExternal => Self::SUPERVISOR_EXTERNAL,
            Self::MachineExternal => Self::MACHINE_EXTERNAL,
            Self::BusError => Self::BUS_ERROR,
            Self::BadIpiRedirect => Self::BAD_IPI_REDIRECT,
        }
    }

    /// Returns the interrupt for a cause code, if that code is defined.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            Self::SUPERVISOR_SOFTWARE => Some(Self::SupervisorSoftware),
            Self::MACHINE_SOFTWARE => Some(Self::MachineSoftware),
            Self::SUPERVISOR_TIMER => Some(Self::SupervisorTimer),
            Self::MACHINE_TIMER => Some(Self::MachineTimer),
            Self::SUPERVISOR_EXTERNAL => Some(Self::SupervisorExternal),
            Self::MACHINE_EXTERNAL => Some(Self::MachineExternal),
            Self::BUS_ERROR => Some(Self::BusError),
            Self::BAD_IPI_REDIRECT => Some(Self::BadIpiRedirect),
        _ => None,
        }
    }

    /// Iterates all defined interrupts in descending priority order.
    ///
    /// > Multiple simultaneous interrupts destined for M-mode are handled in the following
    /// > decreasing priority order: MEI, MSI, MTI, SEI, SSI, STI.
    pub fn by_priority() -> impl Iterator<Item = Self> {
        [
            Self::BusError,
            Self::BadIpiRedirect,
            Self::MachineExternal,
            Self::MachineSoftware,
            Self::MachineTimer,
            Self::SupervisorExternal,
            Self::SupervisorSoftware,
            Self::SupervisorTimer,
        ]
        .into_iter()
    }
}

/// Cause of a trap: either a synchronous exception or an asynchronous interrupt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    /// The `xcause` register value for this trap: the code, with the top bit set for
    /// interrupts.
    pub fn xcause(&self) -> u64 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => interrupt.code() | (1 << 63),
        }
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

/// Vectoring mode of an `xtvec` register.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VectorMode {
    Direct,
    Vectored,
}

/// Computes the trap-handler address for a trap delivered through the given `xtvec` value.
pub fn handler_address(xtvec: u64, cause: TrapCause) -> u64 {
    let base = xtvec & !0b11;
    let mode = match xtvec & 0b11 {
        1 => VectorMode::Vectored,
        _ => VectorMode::Direct,
    };
    match (mode, cause) {
        (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => base + 4 * interrupt.code(),
        _ => base,
    }
}

/// Raised by regions for unmapped or inaccessible physical addresses. The MMU/PMA layer turns
/// this into an access fault or a bus error depending on the access being performed.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("memory error at physical address {0:#012x}")]
pub struct MemoryError(pub u64);

/// Distinguished error class for timer-ESR special cases.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("sysreg error at physical address {0:#012x}")]
pub struct SysregError(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xcause_encoding() {
        assert_eq!(2, TrapCause::from(Exception::IllegalInstruction(None)).xcause());
        assert_eq!(
            (1 << 63) | 7,
            TrapCause::from(Interrupt::MachineTimer).xcause()
        );
    }

    #[test]
    fn test_handler_address() {
        // Direct mode ignores the cause.
        assert_eq!(
            0x1000,
            handler_address(0x1000, Exception::Breakpoint.into())
        );
        assert_eq!(
            0x1000,
            handler_address(0x1001, Exception::Breakpoint.into())
        );
        // Vectored mode offsets interrupts by 4 * cause.
        assert_eq!(
            0x1000 + 4 * 7,
            handler_address(0x1001, Interrupt::MachineTimer.into())
        );
    }
}
