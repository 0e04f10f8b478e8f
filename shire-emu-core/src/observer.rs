//! Structured observer events emitted by the execution engine.
//!
//! Instruction execution emits notifications for register and memory traffic, PC updates, and
//! tensor-unit milestones. Downstream consumers (trace logging, checkers) implement
//! [`Observer`]; the system carries a single observer, composed from the installed subsystems
//! with [`ComposedObserver`]. Every method has a no-op default so observers implement only what
//! they consume.

use crate::topology::HartIndex;
use log::trace;

/// Receiver for execution events. All methods default to no-ops.
#[allow(unused_variables)]
pub trait Observer {
    fn mem_read(&mut self, hart: HartIndex, vaddr: u64, paddr: u64, size: u64, value: u64) {}
    fn mem_write(&mut self, hart: HartIndex, vaddr: u64, paddr: u64, size: u64, value: u64) {}
    /// Atomic read-modify-write: both the value observed and the value stored.
    fn mem_read_write(&mut self, hart: HartIndex, vaddr: u64, old: u64, new: u64) {}
    fn xreg_write(&mut self, hart: HartIndex, reg: u8, value: u64) {}
    fn freg_write(&mut self, hart: HartIndex, reg: u8, lanes: &[u32]) {}
    fn mreg_write(&mut self, hart: HartIndex, reg: u8, value: u32) {}
    fn pc_update(&mut self, hart: HartIndex, pc: u64) {}
    fn csr_write(&mut self, hart: HartIndex, csr: u16, value: u64) {}
    fn fflags_update(&mut self, hart: HartIndex, fflags: u8) {}
    fn tensor_error_update(&mut self, hart: HartIndex, bits: u16) {}
    fn tensor_load(&mut self, hart: HartIndex, command: u64, tenb: bool) {}
    fn tensor_store(&mut self, hart: HartIndex, command: u64) {}
    fn tensor_fma(&mut self, hart: HartIndex, command: u64) {}
    fn tensor_quant(&mut self, hart: HartIndex, command: u64) {}
    fn tensor_reduce(&mut self, hart: HartIndex, command: u64) {}
    fn tensor_wait(&mut self, hart: HartIndex, event: u8) {}
    fn cache_control_update(&mut self, hart: HartIndex, value: u8) {}
}

/// Observer that drops every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Observer that forwards every event to the `log` crate at trace level.
#[derive(Debug, Default)]
pub struct TraceObserver;

impl Observer for TraceObserver {
    fn mem_read(&mut self, hart: HartIndex, vaddr: u64, paddr: u64, size: u64, value: u64) {
        trace!(vaddr, paddr, size, value; "{hart} mem read");
    }

    fn mem_write(&mut self, hart: HartIndex, vaddr: u64, paddr: u64, size: u64, value: u64) {
        trace!(vaddr, paddr, size, value; "{hart} mem write");
    }

    fn mem_read_write(&mut self, hart: HartIndex, vaddr: u64, old: u64, new: u64) {
        trace!(vaddr, old, new; "{hart} mem amo");
    }

    fn xreg_write(&mut self, hart: HartIndex, reg: u8, value: u64) {
        trace!(value; "{hart} x{reg} write");
    }

    fn freg_write(&mut self, hart: HartIndex, reg: u8, lanes: &[u32]) {
        trace!(lane0 = lanes.first().copied().unwrap_or(0); "{hart} f{reg} write");
    }

    fn mreg_write(&mut self, hart: HartIndex, reg: u8, value: u32) {
        trace!(value; "{hart} m{reg} write");
    }

    fn pc_update(&mut self, hart: HartIndex, pc: u64) {
        trace!(pc; "{hart} pc update");
    }

    fn csr_write(&mut self, hart: HartIndex, csr: u16, value: u64) {
        trace!(csr, value; "{hart} csr write");
    }

    fn fflags_update(&mut self, hart: HartIndex, fflags: u8) {
        trace!(fflags; "{hart} fflags update");
    }

    fn tensor_error_update(&mut self, hart: HartIndex, bits: u16) {
        trace!(bits; "{hart} tensor_error update");
    }

    fn tensor_load(&mut self, hart: HartIndex, command: u64, tenb: bool) {
        trace!(command, tenb; "{hart} tensor load");
    }

    fn tensor_store(&mut self, hart: HartIndex, command: u64) {
        trace!(command; "{hart} tensor store");
    }

    fn tensor_fma(&mut self, hart: HartIndex, command: u64) {
        trace!(command; "{hart} tensor fma");
    }

    fn tensor_quant(&mut self, hart: HartIndex, command: u64) {
        trace!(command; "{hart} tensor quant");
    }

    fn tensor_reduce(&mut self, hart: HartIndex, command: u64) {
        trace!(command; "{hart} tensor reduce");
    }

    fn tensor_wait(&mut self, hart: HartIndex, event: u8) {
        trace!(event; "{hart} tensor wait");
    }

    fn cache_control_update(&mut self, hart: HartIndex, value: u8) {
        trace!(value; "{hart} cache control update");
    }
}

/// Fans every event out to a list of observers, in installation order.
#[derive(Default)]
pub struct ComposedObserver {
    observers: Vec<Box<dyn Observer>>,
}

impl ComposedObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }
}

macro_rules! fan_out {
    ( $( $method:ident ( $( $arg:ident : $ty:ty ),* ); )* ) => {
        impl Observer for ComposedObserver {
            $(
                fn $method(&mut self, hart: HartIndex, $( $arg: $ty ),*) {
                    for observer in &mut self.observers {
                        observer.$method(hart, $( $arg ),*);
                    }
                }
            )*
        }
    };
}

fan_out! {
    mem_read(vaddr: u64, paddr: u64, size: u64, value: u64);
    mem_write(vaddr: u64, paddr: u64, size: u64, value: u64);
    mem_read_write(vaddr: u64, old: u64, new: u64);
    xreg_write(reg: u8, value: u64);
    freg_write(reg: u8, lanes: &[u32]);
    mreg_write(reg: u8, value: u32);
    pc_update(pc: u64);
    csr_write(csr: u16, value: u64);
    fflags_update(fflags: u8);
    tensor_error_update(bits: u16);
    tensor_load(command: u64, tenb: bool);
    tensor_store(command: u64);
    tensor_fma(command: u64);
    tensor_quant(command: u64);
    tensor_reduce(command: u64);
    tensor_wait(event: u8);
    cache_control_update(value: u8);
}
