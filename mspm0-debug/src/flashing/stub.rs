//! RAM resident flash write routine.
//!
//! Programming through the command registers costs a dozen debug link round trips per
//! flash word. The routine below does the same register sequence on the target itself, so
//! a whole chunk is programmed with a single call.

use std::time::Duration;

use crate::cpu::{RoutineCall, Target};
use crate::flashing::error::FlashError;
use crate::flashing::region::{RamRegion, ERASED_BYTE, WRITE_SIZE};

/// Default SRAM base of MSPM0 devices, where the routine is loaded.
pub const STUB_LOAD_ADDRESS: u64 = 0x2000_0000;

/// Thumb-1 machine code of the write routine.
///
/// Arguments: `r0` flash destination, `r1` source buffer, `r2` length in bytes (a multiple
/// of 8), `r3` flags (unused, must be 0). Programs one flash word per iteration and returns
/// 0 in `r0` on success or 1 on the first failed command, then executes `bkpt`.
pub const STUB_CODE: [u32; 22] = [
    0x4E13_4C12, 0x2A00_4F13, 0x2500_D01B, 0x6075_6035, 0x2501_60B5, 0x2500_6065, 0x6220_60A5,
    0x6265_43ED, 0x6325_680D, 0x6365_684D, 0x6025_2501, 0x2301_683D, 0xD0FB_421D, 0x421D_2302,
    0x3008_D005, 0x3A08_3108, 0x2000_D8E1, 0x2001_BE00, 0xBF00_BE00, 0x400C_E100, 0x400C_E1D0,
    0x400C_E3D0,
];

/// Size of [`STUB_CODE`] in bytes. The staging buffer starts right after it.
pub const STUB_SIZE: u32 = (STUB_CODE.len() * 4) as u32;

/// Bytes kept free at the top of the RAM budget for the routine's stack.
pub const STACK_RESERVE: u32 = 256;

/// Upper bound for a single routine call.
const STUB_TIMEOUT: Duration = Duration::from_secs(2);

/// Pick the write chunk size for a RAM budget.
///
/// Returns the largest power of two that fits both `block_size` and the part of
/// `ram_budget` left after the routine and its stack, or `None` if not even a single flash
/// word fits and staging has to be disabled.
pub fn chunk_size(block_size: u32, ram_budget: u32) -> Option<u32> {
    let room = ram_budget.checked_sub(STUB_SIZE + STACK_RESERVE)?;
    if room < WRITE_SIZE {
        return None;
    }
    let limit = room.min(block_size);
    Some(1 << (u32::BITS - 1 - limit.leading_zeros()))
}

/// Loads the write routine into target RAM and runs it for one chunk at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StubRunner {
    ram: RamRegion,
    chunk_size: u32,
}

impl StubRunner {
    /// Set up a runner for `ram`, or `None` if `ram` is too small to stage at least one
    /// flash word.
    pub fn new(ram: RamRegion, block_size: u32) -> Option<Self> {
        let chunk_size = chunk_size(block_size, ram.size)?;
        Some(Self { ram, chunk_size })
    }

    /// The largest payload a single call can program.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The RAM the runner uses.
    pub fn ram(&self) -> RamRegion {
        self.ram
    }

    /// Where the payload is copied to before the call.
    pub fn staging_address(&self) -> u64 {
        self.ram.base + u64::from(STUB_SIZE)
    }

    /// Initial stack pointer: the end of the RAM budget, 8 byte aligned.
    pub fn stack_pointer(&self) -> u32 {
        ((self.ram.base + u64::from(self.ram.size)) as u32) & !7
    }

    /// Program `data` at `dest` with a single routine call.
    ///
    /// The payload is padded with erased bytes to a whole number of flash words.
    #[tracing::instrument(skip(self, target, dest, data), fields(dest = format!("{dest:#010x}"), len = data.len()))]
    pub fn write_chunk(
        &self,
        target: &mut (impl Target + ?Sized),
        dest: u64,
        data: &[u8],
    ) -> Result<(), FlashError> {
        if data.len() > self.chunk_size as usize {
            return Err(FlashError::ChunkTooLarge {
                len: data.len(),
                chunk_size: self.chunk_size,
            });
        }

        // A link error latched by an earlier access would otherwise be blamed on this write.
        target.flush()?;

        target.write_32(self.ram.base, &STUB_CODE)?;

        let mut payload = data.to_vec();
        payload.resize(data.len().next_multiple_of(WRITE_SIZE as usize), ERASED_BYTE);
        target.write(self.staging_address(), &payload)?;
        target.flush()?;

        let call = RoutineCall {
            entry: self.ram.base as u32,
            arguments: [
                dest as u32,
                self.staging_address() as u32,
                payload.len() as u32,
                0,
            ],
            stack_pointer: self.stack_pointer(),
        };
        tracing::debug!("Calling write routine {:?}", call);

        let code = target.call_routine(&call, STUB_TIMEOUT)?;
        if code != 0 {
            tracing::error!("Write routine failed with {} at {:#010x}", code, dest);
            return Err(FlashError::StubFailed {
                address: dest,
                code,
            });
        }
        Ok(())
    }
}
