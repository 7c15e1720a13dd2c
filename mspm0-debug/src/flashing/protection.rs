//! Sector write/erase protection.
//!
//! The flash controller re-arms all protection bits after every command, so each erase or
//! program command has to clear the bit covering its sector right before it is started.

use crate::flashing::registers::{CMDWEPROTA, CMDWEPROTB, CMDWEPROTC};
use crate::flashing::region::SECTOR_SIZE;
use crate::memory::{MemoryError, MemoryInterface};

/// Sector index where [`ProtectionRegister::C`] coverage starts.
const PROT_C_FIRST_SECTOR: u32 = 256;
/// Sector index where [`ProtectionRegister::B`] coverage starts on single bank devices.
const PROT_B_FIRST_SECTOR_SINGLE_BANK: u32 = 32;

/// One of the three main flash protection registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionRegister {
    /// CMDWEPROTA, one bit per sector for sectors 0 to 31.
    A,
    /// CMDWEPROTB, one bit per group of 8 sectors.
    B,
    /// CMDWEPROTC, one bit per group of 8 sectors, from sector 256.
    C,
}

impl ProtectionRegister {
    /// Memory mapped address of the register.
    pub const fn address(self) -> u64 {
        match self {
            ProtectionRegister::A => CMDWEPROTA,
            ProtectionRegister::B => CMDWEPROTB,
            ProtectionRegister::C => CMDWEPROTC,
        }
    }
}

/// The protection bit that covers a sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorProtection {
    /// The register holding the bit.
    pub register: ProtectionRegister,
    /// The bit index within the register.
    pub bit: u32,
}

impl SectorProtection {
    /// Find the protection bit for `sector`.
    ///
    /// With a single bank, PROTB continues where PROTA ends (sector 32). With more than one
    /// bank PROTB starts at sector 0 and overlaps PROTA.
    pub fn for_sector(sector: u32, banks: u32) -> Self {
        if sector < 32 {
            Self {
                register: ProtectionRegister::A,
                bit: sector,
            }
        } else if sector < PROT_C_FIRST_SECTOR {
            let first = if banks > 1 {
                0
            } else {
                PROT_B_FIRST_SECTOR_SINGLE_BANK
            };
            Self {
                register: ProtectionRegister::B,
                bit: (sector - first) >> 3,
            }
        } else {
            Self {
                register: ProtectionRegister::C,
                bit: (sector - PROT_C_FIRST_SECTOR) >> 3,
            }
        }
    }

    /// Find the protection bit for the sector containing `address` in a region starting at
    /// `base`.
    pub fn for_address(address: u64, base: u64, banks: u32) -> Self {
        let sector = ((address - base) / u64::from(SECTOR_SIZE)) as u32;
        Self::for_sector(sector, banks)
    }

    /// The register value that unlocks exactly this sector.
    pub fn unlock_mask(&self) -> u32 {
        !1u32.checked_shl(self.bit).unwrap_or(0)
    }

    /// Clear the protection of this sector. The other two registers are left untouched.
    pub fn apply(&self, memory: &mut (impl MemoryInterface + ?Sized)) -> Result<(), MemoryError> {
        tracing::trace!(
            "Unprotecting {:?} bit {} (mask {:#010x})",
            self.register,
            self.bit,
            self.unlock_mask()
        );
        memory.write_word_32(self.register.address(), self.unlock_mask())
    }
}

/// Clear all main flash protection bits, as needed before a bank erase.
pub fn unprotect_all(memory: &mut (impl MemoryInterface + ?Sized)) -> Result<(), MemoryError> {
    for register in [
        ProtectionRegister::A,
        ProtectionRegister::B,
        ProtectionRegister::C,
    ] {
        memory.write_word_32(register.address(), 0)?;
    }
    Ok(())
}
