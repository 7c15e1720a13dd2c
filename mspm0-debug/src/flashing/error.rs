use crate::cpu::CoreError;
use crate::flashing::registers::StatCmd;
use crate::memory::MemoryError;

/// The flash operation that was running when an error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, docsplay::Display)]
pub enum FlashOperation {
    /// sector erase
    Erase,
    /// program
    Program,
    /// bank erase
    MassErase,
}

/// Describes any error that happened during a flash operation.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum FlashError {
    /// The {operation} command at {address:#010x} (length {length:#x}) failed with status {status:?}. A status without the DONE bit means the command timed out.
    CommandFailed {
        /// The operation that failed.
        operation: FlashOperation,
        /// The address the command was issued for.
        address: u64,
        /// The number of bytes the operation covered.
        length: u32,
        /// The last status read from the controller.
        status: StatCmd,
    },
    /// The flash write stub failed with code {code} while writing {address:#010x}.
    StubFailed {
        /// The destination address of the failed chunk.
        address: u64,
        /// The return code of the stub.
        code: u32,
    },
    /// The region has no RAM budget for the flash write stub.
    StubNotAvailable,
    /// A chunk of {len:#x} bytes does not fit the write stub's chunk size of {chunk_size:#x}.
    ChunkTooLarge {
        /// Length of the rejected chunk.
        len: usize,
        /// The largest chunk the stub accepts.
        chunk_size: u32,
    },
    /// {address:#010x}..{end:#010x} is not contained in the flash region at {base:#010x}.
    AddressNotInRegion {
        /// Start of the requested range.
        address: u64,
        /// End of the requested range.
        end: u64,
        /// Base address of the region.
        base: u64,
    },
    /// Something during memory interaction went wrong.
    Memory(#[from] MemoryError),
    /// Something during the interaction with the core went wrong.
    Core(#[from] CoreError),
}

impl FlashError {
    /// Whether this error is a failed or timed out flash command, as opposed to a debug
    /// link failure.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            FlashError::CommandFailed { .. } | FlashError::StubFailed { .. }
        )
    }
}
