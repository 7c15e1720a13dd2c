//! # Flash programming and debug mailbox support for TI MSPM0 devices
//!
//! This crate is the MSPM0 specific part of a debug probe toolchain. It does not talk to a
//! debug probe by itself; register and memory accesses go through the [`MemoryInterface`],
//! [`ApAccess`] and [`CoreInterface`] traits which are implemented by the debug link.
//!
//! Two subsystems are provided:
//!
//! - [`flashing`]: sector erase, programming and mass erase through the MSPM0 flash
//!   controller, with an optional RAM stub that programs whole chunks in one call.
//! - [`mailbox`]: a relay that reassembles the device-to-host debug mailbox stream and
//!   forwards it to a file or TCP socket.
//!
//! # Examples
//!
//! ## Probing and erasing a device
//! ```no_run
//! # fn run(target: &mut dyn mspm0_debug::Target) -> Result<(), mspm0_debug::Error> {
//! use mspm0_debug::flashing::{FlashConfig, FlashProgress};
//! use mspm0_debug::vendor::ti::mspm0;
//!
//! let Some(device) = mspm0::probe(target, &FlashConfig::default())? else {
//!     return Ok(());
//! };
//!
//! let progress = FlashProgress::new(|event| println!("{event:?}"));
//! let erased = device.mass_erase(target, &progress)?;
//! println!("mass erase passed: {erased}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Relaying the debug mailbox to stdout
//! ```no_run
//! # fn run(ap: impl mspm0_debug::ApAccess) -> Result<(), mspm0_debug::Error> {
//! use mspm0_debug::config::RelayConfig;
//! use mspm0_debug::mailbox::{RelaySession, SecApMailbox};
//!
//! let session = RelaySession::from_config(SecApMailbox::new(ap), &RelayConfig::default())?;
//! session.run()?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod cpu;
mod error;
pub mod flashing;
pub mod mailbox;
pub mod memory;
pub mod vendor;


pub use crate::cpu::{CoreError, CoreInterface, RoutineCall, Target};
pub use crate::error::Error;
pub use crate::memory::{ApAccess, MemoryError, MemoryInterface};
