//! Running routines on the target core.

use std::fmt::Debug;
use std::time::Duration;

use crate::memory::{MemoryError, MemoryInterface};

/// An error that occurred while running a routine on the core.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum CoreError {
    /// The routine did not halt within {0:?}.
    Timeout(Duration),
    /// The core locked up while running the routine at {entry:#010x}.
    LockedUp {
        /// Entry point of the routine.
        entry: u32,
    },
    /// A memory access failed while setting up the routine.
    Memory(#[from] MemoryError),
}

/// The register setup for a routine call on the target.
///
/// The routine is entered in Thumb state at `entry` with `arguments` in `r0` to `r3` and
/// `sp` set to `stack_pointer`. It is expected to end with a breakpoint instruction,
/// at which point `r0` holds its result.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RoutineCall {
    /// Address of the first instruction of the routine.
    pub entry: u32,
    /// Values for the argument registers `r0` to `r3`.
    pub arguments: [u32; 4],
    /// Initial stack pointer.
    pub stack_pointer: u32,
}

impl Debug for RoutineCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}({:#x}, {:#x}, {:#x}, {:#x}) sp={:08x}",
            self.entry,
            self.arguments[0],
            self.arguments[1],
            self.arguments[2],
            self.arguments[3],
            self.stack_pointer
        )
    }
}

/// Control over the target core, to be implemented by the debug link.
pub trait CoreInterface {
    /// Halt the core, load the registers from `call`, resume and wait for the core to halt
    /// again. Returns the content of `r0` after the halt.
    fn call_routine(&mut self, call: &RoutineCall, timeout: Duration) -> Result<u32, CoreError>;
}

impl<T: CoreInterface + ?Sized> CoreInterface for &mut T {
    fn call_routine(&mut self, call: &RoutineCall, timeout: Duration) -> Result<u32, CoreError> {
        (**self).call_routine(call, timeout)
    }
}

/// A target that provides both memory access and core control.
pub trait Target: MemoryInterface + CoreInterface {}

impl<T: MemoryInterface + CoreInterface + ?Sized> Target for T {}
