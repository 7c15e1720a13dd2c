//! Register map of the MSPM0 flash controller (FLASHCTL).

use bitfield::bitfield;

/// Base address of the flash controller.
pub const FLASHCTL_BASE: u64 = 0x400c_d000;

/// Command execute register. Writing 1 starts the command set up in the other registers.
pub const CMDEXEC: u64 = FLASHCTL_BASE + 0x1100;
/// Command type and size register.
pub const CMDTYPE: u64 = FLASHCTL_BASE + 0x1104;
/// Command control register.
pub const CMDCTL: u64 = FLASHCTL_BASE + 0x1108;
/// Command target address.
pub const CMDADDR: u64 = FLASHCTL_BASE + 0x1120;
/// Byte enable mask for program commands.
pub const BYTEN: u64 = FLASHCTL_BASE + 0x1124;
/// Data index register.
pub const CMDDATAIDX: u64 = FLASHCTL_BASE + 0x112c;
/// First program data word.
pub const CMDDATA0: u64 = FLASHCTL_BASE + 0x1130;
/// Second program data word.
pub const CMDDATA1: u64 = FLASHCTL_BASE + 0x1134;
/// Third program data word.
pub const CMDDATA2: u64 = FLASHCTL_BASE + 0x1138;
/// Fourth program data word.
pub const CMDDATA3: u64 = FLASHCTL_BASE + 0x113c;
/// Write/erase protection for sectors 0 to 31, one sector per bit.
pub const CMDWEPROTA: u64 = FLASHCTL_BASE + 0x11d0;
/// Write/erase protection for the following 8-sector groups.
pub const CMDWEPROTB: u64 = FLASHCTL_BASE + 0x11d4;
/// Write/erase protection for the 8-sector groups starting at sector 256.
pub const CMDWEPROTC: u64 = FLASHCTL_BASE + 0x11d8;
/// Write/erase protection for the NONMAIN region.
pub const CMDWEPROTNM: u64 = FLASHCTL_BASE + 0x1210;
/// Command status register.
pub const STATCMD: u64 = FLASHCTL_BASE + 0x13d0;

/// Value written to [`CMDEXEC`] to start a command.
pub const CMDEXEC_EXEC: u32 = 1;

/// The operation encoded in the low bits of [`CMDTYPE`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// No operation.
    NoOp = 0,
    /// Program flash words.
    Program = 1,
    /// Erase a sector or bank.
    Erase = 2,
    /// Read and verify.
    ReadVerify = 3,
    /// Blank verify.
    BlankVerify = 6,
}

/// The size class encoded in bits 4 to 6 of [`CMDTYPE`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSize {
    /// One flash word (64 bits of data).
    OneWord = 0,
    /// Two flash words.
    TwoWords = 1,
    /// Four flash words.
    FourWords = 2,
    /// Eight flash words.
    EightWords = 3,
    /// A single sector.
    Sector = 4,
    /// A whole bank.
    Bank = 5,
}

bitfield! {
    /// The command type register (CMDTYPE).
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CmdType(u32);
    impl Debug;
    /// The command to run, see [`Command`].
    pub u8, command, set_command: 2, 0;
    /// The size class of the command, see [`CommandSize`].
    pub u8, size, set_size: 6, 4;
}

impl CmdType {
    /// Encode a command together with its size class.
    pub fn new(command: Command, size: CommandSize) -> Self {
        let mut cmd_type = CmdType(0);
        cmd_type.set_command(command as u8);
        cmd_type.set_size(size as u8);
        cmd_type
    }
}

impl From<CmdType> for u32 {
    fn from(value: CmdType) -> Self {
        value.0
    }
}

bitfield! {
    /// The command status register (STATCMD).
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct StatCmd(u32);
    impl Debug;
    /// The last command has completed.
    pub done, _: 0;
    /// The last command completed successfully.
    pub cmd_pass, _: 1;
    /// A command is currently running.
    pub cmd_in_progress, _: 2;
    /// The command hit a write/erase protected sector.
    pub fail_write_protect, _: 4;
    /// Program verification failed.
    pub fail_verify, _: 5;
    /// The command address was illegal.
    pub fail_illegal_address, _: 6;
    /// The flash was in the wrong mode for the command.
    pub fail_mode, _: 7;
    /// Any other failure.
    pub fail_misc, _: 12;
}

impl StatCmd {
    /// Mask of the DONE bit.
    pub const DONE: u32 = 0x01;
    /// Mask of the CMDPASS bit.
    pub const CMDPASS: u32 = 0x02;

    /// A command counts as passed only if it completed and reported success.
    pub fn passed(&self) -> bool {
        self.done() && self.cmd_pass()
    }
}

impl From<u32> for StatCmd {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<StatCmd> for u32 {
    fn from(value: StatCmd) -> Self {
        value.0
    }
}

#[cfg(test)]
mod test {
    use super::{CmdType, Command, CommandSize, StatCmd};

    #[test]
    fn command_type_encoding() {
        assert_eq!(
            u32::from(CmdType::new(Command::Program, CommandSize::OneWord)),
            0x01
        );
        assert_eq!(
            u32::from(CmdType::new(Command::Erase, CommandSize::Sector)),
            0x42
        );
        assert_eq!(
            u32::from(CmdType::new(Command::Erase, CommandSize::Bank)),
            0x52
        );
        assert_eq!(
            u32::from(CmdType::new(Command::BlankVerify, CommandSize::EightWords)),
            0x36
        );
    }

    #[test]
    fn status_needs_done_and_pass() {
        assert!(StatCmd::from(StatCmd::DONE | StatCmd::CMDPASS).passed());
        assert!(!StatCmd::from(StatCmd::DONE).passed());
        assert!(!StatCmd::from(0).passed());
        assert!(StatCmd::from(0x11).fail_write_protect());
    }
}
