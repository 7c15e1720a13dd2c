//! Command sequencing for the MSPM0 flash controller.
//!
//! Only one command can be outstanding at a time: CMDEXEC and STATCMD are shared by all
//! operations, so every command is issued and waited for before the next one starts.

use std::time::{Duration, Instant};

use scroll::Pread;

use crate::flashing::error::{FlashError, FlashOperation};
use crate::flashing::progress::FlashProgress;
use crate::flashing::protection::{unprotect_all, SectorProtection};
use crate::flashing::region::{FlashRegion, SECTOR_SIZE};
use crate::flashing::registers::{
    CmdType, Command, CommandSize, StatCmd, BYTEN, CMDADDR, CMDCTL, CMDDATA0, CMDEXEC,
    CMDEXEC_EXEC, CMDTYPE, STATCMD,
};
use crate::memory::{MemoryError, MemoryInterface};

/// How long a program or sector erase command may take before it counts as failed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

/// A single command for the flash controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashCommand<'data> {
    /// Command and size class.
    pub cmd_type: CmdType,
    /// Target address of the command.
    pub address: u64,
    /// Byte enable mask, if the command uses one.
    pub byte_enable: Option<u32>,
    /// Up to four data words for program commands.
    pub data: &'data [u32],
}

impl FlashCommand<'_> {
    /// Load the command registers and start the command.
    pub fn issue(&self, memory: &mut (impl MemoryInterface + ?Sized)) -> Result<(), MemoryError> {
        debug_assert!(self.data.len() <= 4);
        tracing::trace!("Issuing flash command {:?}", self);

        memory.write_word_32(CMDTYPE, self.cmd_type.into())?;
        memory.write_word_32(CMDCTL, 0)?;
        memory.write_word_32(CMDADDR, self.address as u32)?;
        if let Some(byte_enable) = self.byte_enable {
            memory.write_word_32(BYTEN, byte_enable)?;
        }
        if !self.data.is_empty() {
            memory.write_32(CMDDATA0, self.data)?;
        }
        memory.write_word_32(CMDEXEC, CMDEXEC_EXEC)
    }
}

/// Issues erase, program and bank erase commands and waits for their completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashController {
    timeout: Duration,
}

impl Default for FlashController {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl FlashController {
    /// Create a controller that gives up on program and erase commands after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The program and erase command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read the command status register once.
    pub fn status(
        &self,
        memory: &mut (impl MemoryInterface + ?Sized),
    ) -> Result<StatCmd, MemoryError> {
        memory.read_word_32(STATCMD).map(StatCmd::from)
    }

    /// Poll the status register until DONE is set.
    ///
    /// Returns the last status read, or a status with no bits set if the command did not
    /// complete within the timeout. A timeout can therefore not be told apart from a command
    /// that completed without CMDPASS.
    pub fn wait_done(
        &self,
        memory: &mut (impl MemoryInterface + ?Sized),
    ) -> Result<StatCmd, MemoryError> {
        let start = Instant::now();
        loop {
            let status = self.status(memory)?;
            if status.done() {
                return Ok(status);
            }
            if start.elapsed() >= self.timeout {
                tracing::debug!("Flash command timed out after {:?}", self.timeout);
                return Ok(StatCmd::from(0));
            }
        }
    }

    /// Poll the status register until DONE is set, reporting every poll to `progress`.
    ///
    /// There is no deadline: a device that never completes the command keeps this
    /// polling until the caller is cancelled externally.
    pub fn wait_done_with_progress(
        &self,
        memory: &mut (impl MemoryInterface + ?Sized),
        progress: &FlashProgress,
    ) -> Result<StatCmd, MemoryError> {
        loop {
            let status = self.status(memory)?;
            progress.polled();
            if status.done() {
                return Ok(status);
            }
        }
    }

    /// Erase the sector containing `address`.
    ///
    /// `length` is the part of the caller's request starting at `address`, it is only used
    /// for reporting. The caller guarantees that `address` lies within `region`.
    #[tracing::instrument(skip(self, memory, region, address), fields(address = format!("{address:#010x}")))]
    pub fn erase(
        &self,
        memory: &mut (impl MemoryInterface + ?Sized),
        region: &FlashRegion,
        address: u64,
        length: u32,
    ) -> Result<(), FlashError> {
        tracing::info!(
            "Erasing flash at {:#010x}, length {:#010x}",
            address,
            length
        );

        let sector = address - (address - region.base()) % u64::from(SECTOR_SIZE);
        SectorProtection::for_address(sector, region.base(), region.banks()).apply(memory)?;
        FlashCommand {
            cmd_type: CmdType::new(Command::Erase, CommandSize::Sector),
            address: sector,
            byte_enable: Some(0xffff_ffff),
            data: &[],
        }
        .issue(memory)?;

        let status = self.wait_done(memory)?;
        check(status, FlashOperation::Erase, address, length)
    }

    /// Program one flash word (8 bytes) at `dest`.
    ///
    /// The sector protection is cleared again for every word, even when the previous word
    /// was in the same sector.
    pub fn write_word_pair(
        &self,
        memory: &mut (impl MemoryInterface + ?Sized),
        region: &FlashRegion,
        dest: u64,
        data: &[u8; 8],
    ) -> Result<(), FlashError> {
        let words: [u32; 2] = [
            data.pread_with(0, scroll::LE).map_err(|_| invalid(dest))?,
            data.pread_with(4, scroll::LE).map_err(|_| invalid(dest))?,
        ];

        SectorProtection::for_address(dest, region.base(), region.banks()).apply(memory)?;
        FlashCommand {
            cmd_type: CmdType::new(Command::Program, CommandSize::OneWord),
            address: dest,
            byte_enable: Some(0xffff_ffff),
            data: &words,
        }
        .issue(memory)?;

        let status = self.wait_done(memory)?;
        check(status, FlashOperation::Program, dest, data.len() as u32)
    }

    /// Erase the bank starting at `address`.
    pub fn mass_erase_bank(
        &self,
        memory: &mut (impl MemoryInterface + ?Sized),
        address: u64,
        size: u32,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        tracing::info!(
            "Mass erase flash bank starting {:#010x} length {:#010x}",
            address,
            size
        );

        unprotect_all(memory)?;
        FlashCommand {
            cmd_type: CmdType::new(Command::Erase, CommandSize::Bank),
            address,
            byte_enable: None,
            data: &[],
        }
        .issue(memory)?;

        let status = self.wait_done_with_progress(memory, progress)?;
        check(status, FlashOperation::MassErase, address, size)
    }
}

fn invalid(address: u64) -> FlashError {
    FlashError::Memory(MemoryError::AccessFailed { address })
}

fn check(
    status: StatCmd,
    operation: FlashOperation,
    address: u64,
    length: u32,
) -> Result<(), FlashError> {
    if status.passed() {
        return Ok(());
    }

    tracing::error!(
        "Failed to {}, status {:#010x} addr {:#010x} length {:#010x}",
        operation,
        u32::from(status),
        address,
        length
    );
    Err(FlashError::CommandFailed {
        operation,
        address,
        length,
        status,
    })
}
