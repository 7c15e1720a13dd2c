//! Flash erase and programming for the MSPM0 flash controller.
//!
//! A device's flash is described by one [`FlashRegion`] per flash kind. Regions erase
//! sector by sector and program either one flash word at a time through the command
//! registers or, when target RAM is available, chunk by chunk through a small routine
//! that runs on the target ([`StubRunner`]).
//!
//! [`erase_all`] erases every bank of a list of regions and reports its progress through
//! [`FlashProgress`].

mod controller;
mod erase;
mod error;
mod progress;
pub mod protection;
mod region;
pub mod registers;
mod stub;

pub use controller::{FlashCommand, FlashController, DEFAULT_COMMAND_TIMEOUT};
pub use erase::erase_all;
pub use error::{FlashError, FlashOperation};
pub use progress::{FlashProgress, ProgressEvent};
pub use region::{
    FlashConfig, FlashKind, FlashRegion, RamRegion, WriteStrategy, ERASED_BYTE, SECTOR_SIZE,
    WRITE_SIZE,
};
pub use stub::{chunk_size, StubRunner, STACK_RESERVE, STUB_CODE, STUB_LOAD_ADDRESS, STUB_SIZE};
