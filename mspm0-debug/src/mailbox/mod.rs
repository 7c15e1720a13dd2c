//! Relay of the MSPM0 debug mailbox.
//!
//! The device sends messages through its debug subsystem mailbox. Each message starts with
//! a receive control word that carries the message length, followed by the data in 32 bit
//! words. The [`RelaySession`] polls the mailbox through a [`MailboxPort`], reassembles the
//! messages and forwards them to an [`OutputSink`]: stdout, a file, or a TCP connection that
//! is re-established whenever it drops.
//!
//! All I/O is non-blocking, so a session can share a thread with other work by calling
//! [`RelaySession::tick`] from an outer loop.

mod frame;
mod registers;
mod relay;
mod sink;
mod socket;

pub use frame::{FlushReason, FrameAssembler, FrameState, Received};
pub use registers::{
    DebugSsMailbox, MailboxPort, RxCtl, SecApMailbox, DEBUGSS_BASE, DEBUGSS_RXCTL, DEBUGSS_RXD,
    SEC_AP_RXCTL, SEC_AP_RXD, SEC_AP_TXCTL, SEC_AP_TXD,
};
pub use relay::{RelayContext, RelaySession};
pub use sink::{ConnectProgress, ConnectionState, FileSink, OutputSink};
#[cfg(unix)]
pub use socket::TcpTransport;
pub use socket::{ConnectStart, ConnectionStateMachine, SocketSink, SocketTransport, Step};

use crate::memory::MemoryError;

/// An error of the mailbox relay.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum RelayError {
    /// Reading the mailbox registers failed.
    Port(#[from] MemoryError),
    /// An I/O error occurred.
    Io(#[from] std::io::Error),
    /// '{0}' is not a valid IP address and port.
    InvalidAddress(String),
}
