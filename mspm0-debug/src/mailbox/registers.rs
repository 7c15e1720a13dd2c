//! Receive side of the MSPM0 debug mailbox.
//!
//! The device writes to its DEBUGSS TX registers and the data shows up in the RX registers
//! of the SEC-AP. The same registers are mirrored into the memory map, which is useful when
//! the SEC-AP cannot be selected directly.

use bitfield::bitfield;

use crate::memory::{ApAccess, MemoryError, MemoryInterface};
use crate::vendor::ti::TexasInstruments;

/// SEC-AP transmit data register (host to device).
pub const SEC_AP_TXD: u8 = 0x0;
/// SEC-AP transmit control register.
pub const SEC_AP_TXCTL: u8 = 0x4;
/// SEC-AP receive data register (device to host).
pub const SEC_AP_RXD: u8 = 0x8;
/// SEC-AP receive control register.
pub const SEC_AP_RXCTL: u8 = 0xC;

/// Base address of the memory mapped debug subsystem.
pub const DEBUGSS_BASE: u64 = 0x400C_7000;
/// Memory mapped receive data register.
pub const DEBUGSS_RXD: u64 = DEBUGSS_BASE + 0x1108;
/// Memory mapped receive control register.
pub const DEBUGSS_RXCTL: u64 = DEBUGSS_BASE + 0x110C;

bitfield! {
    /// The receive control register (RXCTL).
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct RxCtl(u32);
    impl Debug;
    /// RXD holds a word that has not been read yet.
    pub ready, _: 0;
    /// Length of the message, valid on its first word.
    pub u8, length, _: 6, 1;
}

impl From<u32> for RxCtl {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Read access to the mailbox receive registers.
pub trait MailboxPort {
    /// Read the receive control register.
    fn read_rx_control(&mut self) -> Result<RxCtl, MemoryError>;

    /// Read the receive data register, which acknowledges the word to the device.
    fn read_rx_data(&mut self) -> Result<u32, MemoryError>;
}

impl<T: MailboxPort + ?Sized> MailboxPort for &mut T {
    fn read_rx_control(&mut self) -> Result<RxCtl, MemoryError> {
        (**self).read_rx_control()
    }

    fn read_rx_data(&mut self) -> Result<u32, MemoryError> {
        (**self).read_rx_data()
    }
}

/// The mailbox as seen through the SEC-AP.
#[derive(Debug)]
pub struct SecApMailbox<A> {
    ap: A,
}

impl<A: ApAccess> SecApMailbox<A> {
    /// Use `ap` as the SEC-AP, without checking its IDR.
    pub fn new(ap: A) -> Self {
        Self { ap }
    }

    /// Use `ap` if it is the MSPM0 SEC-AP, or give it back.
    pub fn probe(mut ap: A) -> Result<Result<Self, A>, MemoryError> {
        if TexasInstruments::is_sec_ap(&mut ap)? {
            Ok(Ok(Self::new(ap)))
        } else {
            Ok(Err(ap))
        }
    }

    /// The access port.
    pub fn get_ref(&self) -> &A {
        &self.ap
    }

    /// Release the access port.
    pub fn into_inner(self) -> A {
        self.ap
    }
}

impl<A: ApAccess> MailboxPort for SecApMailbox<A> {
    fn read_rx_control(&mut self) -> Result<RxCtl, MemoryError> {
        self.ap.read_ap_register(SEC_AP_RXCTL).map(RxCtl::from)
    }

    fn read_rx_data(&mut self) -> Result<u32, MemoryError> {
        self.ap.read_ap_register(SEC_AP_RXD)
    }
}

/// The mailbox through its memory mapped DEBUGSS mirror.
#[derive(Debug)]
pub struct DebugSsMailbox<M> {
    memory: M,
}

impl<M: MemoryInterface> DebugSsMailbox<M> {
    /// Read the mailbox through `memory`.
    pub fn new(memory: M) -> Self {
        Self { memory }
    }
}

impl<M: MemoryInterface> MailboxPort for DebugSsMailbox<M> {
    fn read_rx_control(&mut self) -> Result<RxCtl, MemoryError> {
        self.memory.read_word_32(DEBUGSS_RXCTL).map(RxCtl::from)
    }

    fn read_rx_data(&mut self) -> Result<u32, MemoryError> {
        self.memory.read_word_32(DEBUGSS_RXD)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::{
        DebugSsMailbox, MailboxPort, RxCtl, SecApMailbox, DEBUGSS_RXCTL, DEBUGSS_RXD,
        SEC_AP_RXCTL, SEC_AP_RXD,
    };
    use crate::test::{MockAp, MockTarget};

    #[test_case(0x00, false, 0; "idle")]
    #[test_case(0x15, true, 10; "ten bytes")]
    #[test_case(0x7f, true, 63; "maximum length")]
    #[test_case(0xff, true, 63; "upper bits ignored")]
    #[test_case(0x01, true, 0; "empty message")]
    fn control_decoding(value: u32, ready: bool, length: u8) {
        let control = RxCtl::from(value);
        assert_eq!(control.ready(), ready);
        assert_eq!(control.length(), length);
        assert_eq!(control.length() as u32, (value & 0x7f) >> 1);
    }

    #[test]
    fn sec_ap_registers() {
        let mut mailbox = SecApMailbox::new(MockAp::with_frames(&[b"abc"]));

        assert_eq!(mailbox.read_rx_control().unwrap().length(), 3);
        assert_eq!(mailbox.read_rx_data().unwrap(), u32::from_le_bytes(*b"abc\0"));
        assert!(!mailbox.read_rx_control().unwrap().ready());
        assert_eq!(
            mailbox.into_inner().reads,
            vec![SEC_AP_RXCTL, SEC_AP_RXD, SEC_AP_RXCTL]
        );
    }

    #[test]
    fn probe_checks_the_idr() {
        let sec_ap = MockAp::with_idr(0x002e_0000);
        assert!(SecApMailbox::probe(sec_ap).unwrap().is_ok());

        let mem_ap = MockAp::with_idr(0x2477_0011);
        assert!(SecApMailbox::probe(mem_ap).unwrap().is_err());
    }

    #[test]
    fn debugss_mirror() {
        let mut target = MockTarget::new();
        target.set_word(DEBUGSS_RXCTL, 0x09);
        target.set_word(DEBUGSS_RXD, 0x6463_6261);
        let mut mailbox = DebugSsMailbox::new(&mut target);

        let control = mailbox.read_rx_control().unwrap();

        assert!(control.ready());
        assert_eq!(control.length(), 4);
        assert_eq!(mailbox.read_rx_data().unwrap(), 0x6463_6261);
    }
}
