use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use thiserror::Error;

use crate::{
    child::{
        ChildContext,
        MAX_ARGS,
    },
    random::{
        RandomError,
        RandomGenerator,
    },
    shm::{
        SharedMemoryError,
        SharedSlice,
    },
    syscall::{
        args::{
            arg_context,
            ArgType,
        },
        entry::{
            Status,
            SyscallEntry,
            SyscallEntryShadow,
        },
        linux,
    },
};

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Syscall {name} uses argument type {ty:?} which has no generator")]
    NoGenerator {
        name: &'static str,
        ty: ArgType,
    },

    #[error("Syscall {name} has {arity} arguments (must be between 1 and {})", MAX_ARGS)]
    InvalidArity {
        name: &'static str,
        arity: usize,
    },

    #[error("Syscall number {0} is out of range")]
    OutOfRange(u32),

    #[error("All syscalls are disabled")]
    NoActiveSyscall,

    #[error("The syscall table has no active entries")]
    Empty,

    #[error("Can't allocate the status array: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    #[error("Can't pick a syscall: {0}")]
    Random(#[from] RandomError),
}

/// The runtime form of a platform table.
///
/// The entries never change after [`SyscallTable::build`]. Only the per-entry
/// status lives in shared memory so that a syscall can be switched off for every process.
pub struct SyscallTable {
    entries: Vec<SyscallEntryShadow>,
    status: SharedSlice<AtomicBool>,
}

/// Build the table of the platform the fuzzer was compiled for
pub fn build_table() -> Result<SyscallTable, TableError> {
    SyscallTable::build(linux::TABLE)
}

impl SyscallTable {
    /// Validate `definitions` and resolve the generators of all arguments.
    /// Entries that are switched off in the definition are left out.
    pub fn build(definitions: &[SyscallEntry]) -> Result<Self, TableError> {
        let mut entries = Vec::with_capacity(definitions.len());

        for definition in definitions {
            if definition.status == Status::Off {
                continue;
            }

            if definition.args.is_empty() || definition.args.len() > MAX_ARGS {
                return Err(TableError::InvalidArity {
                    name: definition.name,
                    arity: definition.args.len(),
                });
            }

            let mut args = Vec::with_capacity(definition.args.len());

            for ty in definition.args {
                let ctx = arg_context(*ty).ok_or(TableError::NoGenerator {
                    name: definition.name,
                    ty: *ty,
                })?;
                args.push(ctx);
            }

            entries.push(SyscallEntryShadow::new(definition, entries.len() as u32, args));
        }

        if entries.is_empty() {
            return Err(TableError::Empty);
        }

        let status = SharedSlice::<AtomicBool>::new(entries.len())?;

        for flag in status.iter() {
            flag.store(true, Ordering::Release);
        }

        Ok(Self {
            entries,
            status,
        })
    }

    pub fn number_of_syscalls(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[SyscallEntryShadow] {
        &self.entries
    }

    pub fn get_entry(&self, number: u32) -> Result<&SyscallEntryShadow, TableError> {
        self.entries.get(number as usize).ok_or(TableError::OutOfRange(number))
    }

    pub fn status(&self, number: u32) -> Result<Status, TableError> {
        let flag = self.status.get(number as usize).ok_or(TableError::OutOfRange(number))?;

        if flag.load(Ordering::Acquire) {
            Ok(Status::On)
        } else {
            Ok(Status::Off)
        }
    }

    pub fn set_status(&self, number: u32, status: Status) -> Result<(), TableError> {
        let flag = self.status.get(number as usize).ok_or(TableError::OutOfRange(number))?;
        flag.store(status == Status::On, Ordering::Release);
        Ok(())
    }

    /// Switch a syscall off for every process of the run
    pub fn disable(&self, number: u32) -> Result<(), TableError> {
        self.set_status(number, Status::Off)
    }

    fn is_active(&self, number: usize) -> bool {
        self.status[number].load(Ordering::Acquire)
    }

    /// Draw a syscall and copy its descriptor into `child`.
    /// A draw that lands on a disabled entry is repeated among the active ones.
    pub fn pick_syscall<R: RandomGenerator>(&self, child: &ChildContext, rng: &mut R) -> Result<u32, TableError> {
        let mut number = rng.range(self.entries.len() as u32)? as usize;

        if !self.is_active(number) {
            let active: Vec<usize> = (0..self.entries.len()).filter(|i| self.is_active(*i)).collect();

            if active.is_empty() {
                return Err(TableError::NoActiveSyscall);
            }

            number = active[rng.range(active.len() as u32)? as usize];
        }

        let entry = &self.entries[number];
        child.select(number as u32, entry.symbol() as i64, entry.number_of_args() as u32, entry.need_alarm());

        Ok(number as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        child::ChildPool,
        random::Random,
    };

    static SMALL: &[SyscallEntry] = &[
        SyscallEntry::new("umask", libc::SYS_umask, &[ArgType::Mode]),
        SyscallEntry::new("mount", libc::SYS_mount, &[ArgType::FilePath]).root().off(),
        SyscallEntry::new("getcwd", libc::SYS_getcwd, &[ArgType::VoidBuf, ArgType::Size]),
        SyscallEntry::new("read", libc::SYS_read, &[ArgType::FileDesc, ArgType::VoidBuf, ArgType::Size]).alarm(),
    ];

    static NO_ARGS: &[SyscallEntry] = &[SyscallEntry::new("getpid", libc::SYS_getpid, &[])];

    #[test]
    fn test_build_skips_off() {
        let table = SyscallTable::build(SMALL).unwrap();
        assert_eq!(table.number_of_syscalls(), 3);
        assert_eq!(table.get_entry(1).unwrap().name(), "getcwd");
        assert_eq!(table.get_entry(2).unwrap().entry_number(), 2);
        assert!(table.get_entry(2).unwrap().need_alarm());
        assert!(matches!(table.get_entry(3), Err(TableError::OutOfRange(3))));
    }

    #[test]
    fn test_build_platform_table() {
        let table = build_table().unwrap();
        assert!(table.number_of_syscalls() > 0);

        for (i, entry) in table.entries().iter().enumerate() {
            assert!((1..=MAX_ARGS).contains(&entry.number_of_args()));
            assert_eq!(table.status(i as u32).unwrap(), Status::On);

            for ctx in entry.args() {
                assert!(!ctx.name.is_empty());
            }
        }
    }

    #[test]
    fn test_build_deterministic() {
        let a = build_table().unwrap();
        let b = build_table().unwrap();
        assert_eq!(a.number_of_syscalls(), b.number_of_syscalls());

        for (x, y) in a.entries().iter().zip(b.entries()) {
            assert_eq!(x.name(), y.name());
            assert_eq!(x.number_of_args(), y.number_of_args());
        }
    }

    #[test]
    fn test_invalid_arity() {
        assert!(matches!(SyscallTable::build(NO_ARGS), Err(TableError::InvalidArity { .. })));
    }

    #[test]
    fn test_pick_covers_table() {
        let table = SyscallTable::build(SMALL).unwrap();
        let pool = ChildPool::new(1).unwrap();
        let child = pool.get_child_from_index(0).unwrap();
        let mut rng = Random::with_seed(42);
        let mut seen = vec![false; table.number_of_syscalls()];

        for _ in 0..1000 {
            child.record_outcome(-1, Some(libc::EINVAL));

            let number = table.pick_syscall(child, &mut rng).unwrap();
            assert!((number as usize) < table.number_of_syscalls());
            assert!(!child.had_error());
            assert_eq!(child.syscall_number(), number);
            assert_eq!(child.number_of_args(), table.get_entry(number).unwrap().number_of_args());
            seen[number as usize] = true;
        }

        assert!(seen.iter().all(|x| *x));
    }

    #[test]
    fn test_pick_skips_disabled() {
        let table = SyscallTable::build(SMALL).unwrap();
        let pool = ChildPool::new(1).unwrap();
        let child = pool.get_child_from_index(0).unwrap();
        let mut rng = Random::with_seed(7);

        table.disable(0).unwrap();
        table.disable(2).unwrap();

        for _ in 0..100 {
            assert_eq!(table.pick_syscall(child, &mut rng).unwrap(), 1);
        }

        table.disable(1).unwrap();
        assert!(matches!(table.pick_syscall(child, &mut rng), Err(TableError::NoActiveSyscall)));
        assert!(matches!(table.disable(9), Err(TableError::OutOfRange(9))));
    }
}
