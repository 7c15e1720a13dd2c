use crate::commands::CommandError;
use crate::config::ConfigError;
use crate::cpu::CoreError;
use crate::flashing::FlashError;
use crate::mailbox::RelayError;
use crate::memory::MemoryError;

/// The overarching error type which contains all possible errors as variants.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum Error {
    /// An error occurred while accessing target memory.
    Memory(#[from] MemoryError),
    /// An error occurred while running code on the target core.
    Core(#[from] CoreError),
    /// A flash operation failed.
    Flash(#[from] FlashError),
    /// The mailbox relay failed.
    Relay(#[from] RelayError),
    /// The configuration could not be loaded.
    Config(#[from] ConfigError),
    /// A target command failed.
    Command(#[from] CommandError),
}
