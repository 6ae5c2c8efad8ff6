use libc::c_long;

use crate::syscall::args::{
    ArgContext,
    ArgType,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    On,
    Off,
}

/// Static description of a syscall as it appears in a platform table
#[derive(Debug)]
pub struct SyscallEntry {
    pub name: &'static str,
    pub symbol: c_long,
    pub status: Status,
    /// Only worth trying with root privileges
    pub requires_root: bool,
    /// May block indefinitely and needs an alarm to get interrupted
    pub need_alarm: bool,
    pub args: &'static [ArgType],
}

impl SyscallEntry {
    pub const fn new(name: &'static str, symbol: c_long, args: &'static [ArgType]) -> Self {
        Self {
            name,
            symbol,
            status: Status::On,
            requires_root: false,
            need_alarm: false,
            args,
        }
    }

    pub const fn alarm(mut self) -> Self {
        self.need_alarm = true;
        self
    }

    pub const fn root(mut self) -> Self {
        self.requires_root = true;
        self
    }

    pub const fn off(mut self) -> Self {
        self.status = Status::Off;
        self
    }
}

/// A validated table entry with every argument type resolved to its generator
#[derive(Debug)]
pub struct SyscallEntryShadow {
    name: &'static str,
    symbol: c_long,
    entry_number: u32,
    requires_root: bool,
    need_alarm: bool,
    args: Vec<&'static ArgContext>,
}

impl SyscallEntryShadow {
    pub(crate) fn new(entry: &SyscallEntry, entry_number: u32, args: Vec<&'static ArgContext>) -> Self {
        Self {
            name: entry.name,
            symbol: entry.symbol,
            entry_number,
            requires_root: entry.requires_root,
            need_alarm: entry.need_alarm,
            args,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn symbol(&self) -> c_long {
        self.symbol
    }

    /// Index of the entry in its table
    pub fn entry_number(&self) -> u32 {
        self.entry_number
    }

    pub fn requires_root(&self) -> bool {
        self.requires_root
    }

    pub fn need_alarm(&self) -> bool {
        self.need_alarm
    }

    pub fn number_of_args(&self) -> usize {
        self.args.len()
    }

    pub fn args(&self) -> &[&'static ArgContext] {
        &self.args
    }
}
