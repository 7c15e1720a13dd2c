use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cpu::Target;
use crate::flashing::controller::{FlashController, DEFAULT_COMMAND_TIMEOUT};
use crate::flashing::error::FlashError;
use crate::flashing::stub::StubRunner;

/// Erase granularity of MSPM0 flash.
pub const SECTOR_SIZE: u32 = 1024;
/// Program granularity: one flash word of 64 data bits.
pub const WRITE_SIZE: u32 = 8;
/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xff;

/// Options that apply to every flash region of a device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlashConfig {
    /// How long a sector erase or program command may take, in ms.
    #[serde(with = "crate::config::duration_ms")]
    pub command_timeout: Duration,
    /// Use the RAM routine for writes when enough RAM is available.
    pub stub_enabled: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            stub_enabled: true,
        }
    }
}

/// The two kinds of MSPM0 flash that can be erased and programmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashKind {
    /// Main flash, holding the application.
    Main,
    /// Data flash, available on some parts only.
    Data,
}

/// A block of target RAM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RamRegion {
    /// Start address.
    pub base: u64,
    /// Size in bytes.
    pub size: u32,
}

/// How a region programs its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStrategy {
    /// One program command per flash word, issued over the debug link.
    Direct,
    /// Chunks are staged in RAM and programmed by the write routine.
    Stub(StubRunner),
}

/// A contiguous flash area with uniform geometry, as discovered when probing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashRegion {
    kind: FlashKind,
    base: u64,
    length: u32,
    banks: u32,
    controller: FlashController,
    strategy: WriteStrategy,
}

impl FlashRegion {
    /// Describe a flash region.
    ///
    /// `staging` is the RAM available to the write routine. If it is `None`, too small, or
    /// the routine is disabled in `config`, every write goes through the command registers.
    pub fn new(
        kind: FlashKind,
        base: u64,
        length: u32,
        banks: u32,
        staging: Option<RamRegion>,
        config: &FlashConfig,
    ) -> Self {
        let strategy = match staging.filter(|_| config.stub_enabled) {
            Some(ram) => match StubRunner::new(ram, SECTOR_SIZE) {
                Some(runner) => WriteStrategy::Stub(runner),
                None => {
                    tracing::debug!(
                        "{} bytes of RAM are not enough to stage writes, using direct writes",
                        ram.size
                    );
                    WriteStrategy::Direct
                }
            },
            None => WriteStrategy::Direct,
        };

        Self {
            kind,
            base,
            length,
            banks: banks.max(1),
            controller: FlashController::new(config.command_timeout),
            strategy,
        }
    }

    /// The kind of flash.
    pub fn kind(&self) -> FlashKind {
        self.kind
    }

    /// Start address.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Number of banks. Banks are assumed to be of equal size.
    pub fn banks(&self) -> u32 {
        self.banks
    }

    /// Size of a single bank.
    pub fn bank_size(&self) -> u32 {
        self.length / self.banks
    }

    /// Erase granularity.
    pub fn block_size(&self) -> u32 {
        SECTOR_SIZE
    }

    /// The largest amount of data programmed in one step.
    pub fn chunk_size(&self) -> u32 {
        match self.strategy {
            WriteStrategy::Direct => SECTOR_SIZE,
            WriteStrategy::Stub(runner) => runner.chunk_size(),
        }
    }

    /// The RAM reserved for staged writes, 0 if staging is disabled.
    pub fn ram_budget(&self) -> u32 {
        match self.strategy {
            WriteStrategy::Direct => 0,
            WriteStrategy::Stub(runner) => runner.ram().size,
        }
    }

    /// Whether writes use the RAM routine.
    pub fn uses_stub(&self) -> bool {
        matches!(self.strategy, WriteStrategy::Stub(_))
    }

    /// How writes are carried out.
    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    /// The write routine runner, for callers that stage data themselves.
    pub fn stub_runner(&self) -> Result<StubRunner, FlashError> {
        match self.strategy {
            WriteStrategy::Stub(runner) => Ok(runner),
            WriteStrategy::Direct => Err(FlashError::StubNotAvailable),
        }
    }

    /// The address range of the region.
    pub fn address_range(&self) -> Range<u64> {
        self.base..self.base + u64::from(self.length)
    }

    /// Whether `address..address + length` lies completely within this region.
    pub fn contains(&self, address: u64, length: u64) -> bool {
        let range = self.address_range();
        address >= range.start && address.saturating_add(length) <= range.end
    }

    pub(crate) fn controller(&self) -> &FlashController {
        &self.controller
    }

    fn check_range(&self, address: u64, length: u64) -> Result<(), FlashError> {
        if self.contains(address, length) {
            Ok(())
        } else {
            Err(FlashError::AddressNotInRegion {
                address,
                end: address.saturating_add(length),
                base: self.base,
            })
        }
    }

    /// Erase every sector touched by `address..address + length`.
    pub fn erase(
        &self,
        target: &mut (impl Target + ?Sized),
        address: u64,
        length: u32,
    ) -> Result<(), FlashError> {
        self.check_range(address, u64::from(length))?;

        let sector_size = u64::from(SECTOR_SIZE);
        let first = address - (address - self.base) % sector_size;
        let end = address + u64::from(length);
        for sector in (first..end).step_by(SECTOR_SIZE as usize) {
            // Failures are reported with the part of the request that is left.
            let start = sector.max(address);
            self.controller.erase(target, self, start, (end - start) as u32)?;
        }
        Ok(())
    }

    /// Program `data` at `dest`. The flash must have been erased before.
    ///
    /// Data that does not end on a flash word boundary is padded with erased bytes. The
    /// write stops at the first chunk or flash word that fails.
    #[tracing::instrument(skip(self, target, dest, data), fields(dest = format!("{dest:#010x}"), len = data.len()))]
    pub fn write(
        &self,
        target: &mut (impl Target + ?Sized),
        dest: u64,
        data: &[u8],
    ) -> Result<(), FlashError> {
        self.check_range(dest, data.len() as u64)?;

        match self.strategy {
            WriteStrategy::Stub(runner) => {
                tracing::info!(
                    "Writing flash at {:#010x}, length {:#010x}, in chunks of {:#x}",
                    dest,
                    data.len(),
                    runner.chunk_size()
                );
                let chunk_size = runner.chunk_size() as usize;
                for (index, chunk) in data.chunks(chunk_size).enumerate() {
                    runner.write_chunk(target, dest + (index * chunk_size) as u64, chunk)?;
                }
            }
            WriteStrategy::Direct => {
                tracing::info!(
                    "Writing flash at {:#010x}, length {:#010x}",
                    dest,
                    data.len()
                );
                let write_size = WRITE_SIZE as usize;
                for (index, word) in data.chunks(write_size).enumerate() {
                    let mut pair = [ERASED_BYTE; WRITE_SIZE as usize];
                    pair[..word.len()].copy_from_slice(word);
                    self.controller.write_word_pair(
                        target,
                        self,
                        dest + (index * write_size) as u64,
                        &pair,
                    )?;
                }
            }
        }
        Ok(())
    }
}
