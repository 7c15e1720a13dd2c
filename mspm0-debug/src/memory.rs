//! Target memory and access port interfaces.
//!
//! The debug link itself is not part of this crate. Whatever transport is used to reach the
//! MSPM0 (CMSIS-DAP, a Black Magic Probe, a simulator) implements these traits.

use scroll::Pread;

/// An error reported by the debug link while accessing the target.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum MemoryError {
    /// Memory access to address {address:#010x} failed.
    AccessFailed {
        /// The address of the failed access.
        address: u64,
    },
    /// Memory access to address {address:#010x} was not aligned to {alignment} bytes.
    NotAligned {
        /// The address of the access.
        address: u64,
        /// The required alignment in bytes.
        alignment: usize,
    },
    /// Access port register {register:#04x} could not be accessed.
    ApAccessFailed {
        /// The register offset within the access port.
        register: u8,
    },
    /// The debug link reported an error: {0}
    Link(String),
}

/// An interface to be implemented by drivers that allow target memory access.
///
/// Only the 32-bit and 8-bit block accesses have to be provided, everything else has
/// a default implementation on top of them.
pub trait MemoryInterface {
    /// Read a block of 32bit words at `address` in the target's endianness.
    ///
    /// The number of words read is `data.len()`.
    /// The address where the read should be performed at has to be a multiple of 4.
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), MemoryError>;

    /// Write a block of 32bit words at `address` in the target's endianness.
    ///
    /// The number of words written is `data.len()`.
    /// The address where the write should be performed at has to be a multiple of 4.
    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), MemoryError>;

    /// Read a block of 8bit words at `address`.
    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), MemoryError>;

    /// Write a block of 8bit words at `address`.
    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError>;

    /// Read a 32bit word of at `address`.
    fn read_word_32(&mut self, address: u64) -> Result<u32, MemoryError> {
        let mut word = 0;
        self.read_32(address, std::slice::from_mut(&mut word))?;
        Ok(word)
    }

    /// Write a 32bit word at `address`.
    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), MemoryError> {
        self.write_32(address, std::slice::from_ref(&data))
    }

    /// Write bytes to `address`.
    ///
    /// Word aligned blocks are written with 32 bit accesses, everything else falls back to
    /// byte accesses. Assumes a little endian target.
    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        if address % 4 == 0 && data.len() % 4 == 0 {
            let mut words = Vec::with_capacity(data.len() / 4);
            for offset in (0..data.len()).step_by(4) {
                let word: u32 = data
                    .pread_with(offset, scroll::LE)
                    .map_err(|_| MemoryError::AccessFailed {
                        address: address + offset as u64,
                    })?;
                words.push(word);
            }
            self.write_32(address, &words)
        } else {
            self.write_8(address, data)
        }
    }

    /// Flush all outstanding writes and report any error the debug link latched while
    /// performing them.
    fn flush(&mut self) -> Result<(), MemoryError> {
        Ok(())
    }
}

impl<T: MemoryInterface + ?Sized> MemoryInterface for &mut T {
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), MemoryError> {
        (**self).read_32(address, data)
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), MemoryError> {
        (**self).write_32(address, data)
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), MemoryError> {
        (**self).read_8(address, data)
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        (**self).write_8(address, data)
    }

    fn flush(&mut self) -> Result<(), MemoryError> {
        (**self).flush()
    }
}

/// Raw register access to a single access port of the debug port.
///
/// This is used for access ports that are not memory APs, like the MSPM0 SEC-AP
/// which carries the debug mailbox.
pub trait ApAccess {
    /// Read the access port register at offset `register`.
    fn read_ap_register(&mut self, register: u8) -> Result<u32, MemoryError>;

    /// The identification register (IDR) of the access port.
    fn idr(&mut self) -> Result<u32, MemoryError> {
        self.read_ap_register(0xFC)
    }
}

impl<T: ApAccess + ?Sized> ApAccess for &mut T {
    fn read_ap_register(&mut self, register: u8) -> Result<u32, MemoryError> {
        (**self).read_ap_register(register)
    }
}

#[cfg(test)]
mod test {
    use super::MemoryInterface;
    use crate::test::MockTarget;

    #[test]
    fn aligned_byte_writes_use_word_accesses() {
        let mut target = MockTarget::new();

        target
            .write(0x2000_0000, &[0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd])
            .unwrap();

        assert_eq!(
            target.writes,
            vec![(0x2000_0000, 0x0403_0201), (0x2000_0004, 0xddcc_bbaa)]
        );
    }

    #[test]
    fn unaligned_byte_writes_use_byte_accesses() {
        let mut target = MockTarget::new();

        target.write(0x2000_0001, &[0x11, 0x22, 0x33]).unwrap();

        assert!(target.writes.is_empty());
        assert_eq!(target.read_word_32(0x2000_0000).unwrap(), 0x3322_1100);
    }
}
