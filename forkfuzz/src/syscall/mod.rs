//! The syscall table, argument generation and the invocation of a single syscall.

mod args;
mod entry;
pub mod linux;
mod resources;
mod table;

pub use args::{
    arg_context,
    ArgContext,
    ArgType,
    GenerateError,
    GeneratedArg,
    LogType,
    MIN_BUFFER,
};
pub use entry::{
    Status,
    SyscallEntry,
    SyscallEntryShadow,
};
pub use resources::Resources;
pub use table::{
    build_table,
    SyscallTable,
    TableError,
};

use crate::{
    child::{
        wall_clock_secs,
        ChildContext,
        MAX_ARGS,
    },
    map::SharedMap,
    random::RandomGenerator,
};

/// The generated arguments of one invocation, in declaration order.
/// Dropping the set releases every buffer and mapping the arguments point to.
pub struct ArgumentSet {
    args: Vec<GeneratedArg>,
}

impl ArgumentSet {
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GeneratedArg> {
        self.args.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, GeneratedArg> {
        self.args.iter_mut()
    }

    /// The raw register values. Unused positions are zero.
    pub fn values(&self) -> [u64; MAX_ARGS] {
        let mut values = [0; MAX_ARGS];

        for (value, arg) in values.iter_mut().zip(&self.args) {
            *value = arg.value();
        }

        values
    }

    fn publish(&self, child: &ChildContext) {
        for (i, value) in self.values().into_iter().enumerate() {
            child.set_arg(i, value);
        }
    }
}

impl From<Vec<GeneratedArg>> for ArgumentSet {
    fn from(args: Vec<GeneratedArg>) -> Self {
        Self {
            args,
        }
    }
}

/// What a single invocation returned
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub ret: i64,
    /// Set when the syscall failed
    pub errno: Option<i32>,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        self.errno.is_some()
    }
}

/// Produce one value for each declared argument of `entry`, in order.
/// The values are also recorded in `child`.
pub fn generate_arguments<R: RandomGenerator>(entry: &SyscallEntryShadow, child: &ChildContext, rng: &mut R, resources: &Resources) -> Result<ArgumentSet, GenerateError> {
    let mut args = Vec::with_capacity(entry.number_of_args());

    for ctx in entry.args() {
        args.push(ctx.generate(rng, resources)?);
    }

    let set = ArgumentSet {
        args,
    };
    set.publish(child);

    Ok(set)
}

/// Invoke the syscall of `entry` with `args`.
///
/// The test counter is incremented before the call so that an invocation that takes the
/// process down is still counted.
pub fn test_syscall(entry: &SyscallEntryShadow, child: &ChildContext, args: &ArgumentSet, map: &SharedMap) -> Outcome {
    args.publish(child);

    let v = args.values();

    if entry.need_alarm() {
        unsafe { libc::alarm(1) };
    }

    child.stamp(wall_clock_secs());
    map.record_test();

    let ret = unsafe { libc::syscall(entry.symbol(), v[0], v[1], v[2], v[3], v[4], v[5]) } as i64;
    let errno = if ret < 0 { Some(std::io::Error::last_os_error().raw_os_error().unwrap_or(0)) } else { None };

    if entry.need_alarm() {
        unsafe { libc::alarm(0) };
    }

    child.record_outcome(ret, errno);

    Outcome {
        ret,
        errno,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        child::ChildPool,
        config::Config,
        random::Random,
    };

    static SAFE: &[SyscallEntry] = &[
        SyscallEntry::new("umask", libc::SYS_umask, &[ArgType::Mode]),
        SyscallEntry::new("fstat", libc::SYS_fstat, &[ArgType::FileDesc, ArgType::StatBuf]),
    ];

    #[test]
    fn test_invoke() {
        let dir = tempfile::tempdir().unwrap();
        let resources = Resources::open(dir.path(), 0).unwrap();
        let table = SyscallTable::build(SAFE).unwrap();
        let pool = ChildPool::new(1).unwrap();
        let child = pool.get_child_from_index(0).unwrap();
        let map = SharedMap::create(&Config::builder().children(1).build().unwrap()).unwrap();
        let mut rng = Random::with_seed(99);

        let entry = table.get_entry(1).unwrap();
        let args = generate_arguments(entry, child, &mut rng, &resources).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(child.arg(0), Some(args.values()[0]));
        assert_eq!(args.values()[2], 0);

        let outcome = test_syscall(entry, child, &args, &map);
        assert_eq!(map.test_count(), 1);
        assert!(child.time_of_syscall() > 0);
        assert_eq!(child.ret_value(), outcome.ret);
        assert_eq!(child.had_error(), outcome.is_error());
    }

    #[test]
    fn test_invoke_error() {
        let table = SyscallTable::build(SAFE).unwrap();
        let pool = ChildPool::new(1).unwrap();
        let child = pool.get_child_from_index(0).unwrap();
        let map = SharedMap::create(&Config::builder().children(1).build().unwrap()).unwrap();

        let entry = table.get_entry(1).unwrap();
        let args = ArgumentSet {
            args: vec![GeneratedArg::number(u64::MAX), GeneratedArg::buffer(vec![0u8; 4096].into_boxed_slice())],
        };

        let outcome = test_syscall(entry, child, &args, &map);
        assert_eq!(outcome.ret, -1);
        assert_eq!(outcome.errno, Some(libc::EBADF));
        assert!(child.had_error());
        assert_eq!(child.err_value(), libc::EBADF);
    }
}
