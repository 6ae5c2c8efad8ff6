//! Argument types and their generators.
//!
//! Every [`ArgType`] has exactly one registered [`ArgContext`] that knows how to log
//! values of that type and how to produce them.

use std::ffi::{
    CStr,
    CString,
};

use libc::c_void;
use thiserror::Error;

use crate::{
    random::{
        RandomError,
        RandomGenerator,
    },
    syscall::resources::Resources,
};

/// Smallest buffer handed to the kernel. Size arguments never exceed it.
pub const MIN_BUFFER: usize = 4096;

/// Bytes at the start of a fresh buffer that are filled with random data
const RANDOM_PREFIX: usize = 256;

const MAPPING_PAGES: usize = 16;
const PAGE_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Can't prepare {path}: {source}")]
    Resources {
        path: String,
        source: std::io::Error,
    },

    #[error("Can't map memory for an address argument: {0}")]
    Mapping(std::io::Error),

    #[error("Path contains a nul byte: {0}")]
    NulPath(String),

    #[error("The worker has no {0} to hand out")]
    NoResources(&'static str),

    #[error("Random number generator failed: {0}")]
    Random(#[from] RandomError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgType {
    FileDesc,
    DirFd,
    VoidBuf,
    Size,
    FilePath,
    OpenFlag,
    Mode,
    StatBuf,
    StatFs,
    Int,
    Rusage,
    Pid,
    WaitOption,
    Offset,
    Whence,
    Prot,
    Advice,
    MapAddress,
    AtFlag,
    FcntlCmd,
}

impl ArgType {
    pub const ALL: &'static [ArgType] = &[
        ArgType::FileDesc,
        ArgType::DirFd,
        ArgType::VoidBuf,
        ArgType::Size,
        ArgType::FilePath,
        ArgType::OpenFlag,
        ArgType::Mode,
        ArgType::StatBuf,
        ArgType::StatFs,
        ArgType::Int,
        ArgType::Rusage,
        ArgType::Pid,
        ArgType::WaitOption,
        ArgType::Offset,
        ArgType::Whence,
        ArgType::Prot,
        ArgType::Advice,
        ArgType::MapAddress,
        ArgType::AtFlag,
        ArgType::FcntlCmd,
    ];
}

/// How the value of an argument appears in the trace
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogType {
    Path,
    Pointer,
    Number,
}

#[derive(Debug)]
enum Generator {
    Descriptor,
    DirDescriptor,
    Buffer,
    StructBuffer,
    Size,
    Path,
    /// A random subset of the given bits
    Flags(&'static [u64]),
    /// One of the given values
    Choice(&'static [u64]),
    Number,
    Pid,
    Offset,
    Mapping,
}

/// Everything known about one argument type
#[derive(Debug)]
pub struct ArgContext {
    pub ty: ArgType,
    pub name: &'static str,
    pub log_type: LogType,
    /// Whether mutation may change a generated value of this type
    pub mutable: bool,
    generator: Generator,
}

const OPEN_FLAGS: &[u64] = &[
    libc::O_WRONLY as u64,
    libc::O_RDWR as u64,
    libc::O_CREAT as u64,
    libc::O_EXCL as u64,
    libc::O_TRUNC as u64,
    libc::O_APPEND as u64,
    libc::O_NONBLOCK as u64,
    libc::O_DIRECTORY as u64,
    libc::O_NOFOLLOW as u64,
    libc::O_CLOEXEC as u64,
    libc::O_SYNC as u64,
];

const MODE_BITS: &[u64] = &[0o4000, 0o2000, 0o1000, 0o400, 0o200, 0o100, 0o40, 0o20, 0o10, 0o4, 0o2, 0o1];

const WAIT_OPTIONS: &[u64] = &[libc::WNOHANG as u64, libc::WUNTRACED as u64, libc::WCONTINUED as u64];

const PROT_BITS: &[u64] = &[libc::PROT_READ as u64, libc::PROT_WRITE as u64, libc::PROT_EXEC as u64];

const AT_FLAGS: &[u64] = &[
    libc::AT_SYMLINK_NOFOLLOW as u64,
    libc::AT_REMOVEDIR as u64,
    libc::AT_SYMLINK_FOLLOW as u64,
    libc::AT_EMPTY_PATH as u64,
];

const WHENCE: &[u64] = &[
    libc::SEEK_SET as u64,
    libc::SEEK_CUR as u64,
    libc::SEEK_END as u64,
    libc::SEEK_DATA as u64,
    libc::SEEK_HOLE as u64,
    5,
];

const ADVICE: &[u64] = &[
    libc::MADV_NORMAL as u64,
    libc::MADV_RANDOM as u64,
    libc::MADV_SEQUENTIAL as u64,
    libc::MADV_WILLNEED as u64,
    libc::MADV_DONTNEED as u64,
    libc::MADV_FREE as u64,
];

const FCNTL_CMDS: &[u64] = &[
    libc::F_DUPFD as u64,
    libc::F_DUPFD_CLOEXEC as u64,
    libc::F_GETFD as u64,
    libc::F_SETFD as u64,
    libc::F_GETFL as u64,
    libc::F_SETFL as u64,
    libc::F_GETLK as u64,
    libc::F_SETLK as u64,
    libc::F_GETPIPE_SZ as u64,
];

const INTERESTING_INTS: &[u64] = &[0, 1, 2, 4, 8, 0x7f, 0x80, 0xff, 0x7fff_ffff, 0x8000_0000, 0xffff_ffff, u64::MAX];

const INTERESTING_SIZES: &[u64] = &[0, 1, 8, 64, 512, MIN_BUFFER as u64];

/// Offsets beyond every filesystem's size limit
const HUGE_OFFSETS: &[u64] = &[u64::MAX, 1 << 62];

static ARG_CONTEXTS: &[ArgContext] = &[
    ArgContext {
        ty: ArgType::FileDesc,
        name: "FILE_DESC",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::Descriptor,
    },
    ArgContext {
        ty: ArgType::DirFd,
        name: "DIR_FD",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::DirDescriptor,
    },
    ArgContext {
        ty: ArgType::VoidBuf,
        name: "VOID_BUF",
        log_type: LogType::Pointer,
        mutable: false,
        generator: Generator::Buffer,
    },
    ArgContext {
        ty: ArgType::Size,
        name: "SIZE_T",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::Size,
    },
    ArgContext {
        ty: ArgType::FilePath,
        name: "FILE_PATH",
        log_type: LogType::Path,
        mutable: false,
        generator: Generator::Path,
    },
    ArgContext {
        ty: ArgType::OpenFlag,
        name: "OPEN_FLAG",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Flags(OPEN_FLAGS),
    },
    ArgContext {
        ty: ArgType::Mode,
        name: "MODE_T",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Flags(MODE_BITS),
    },
    ArgContext {
        ty: ArgType::StatBuf,
        name: "STAT_BUF",
        log_type: LogType::Pointer,
        mutable: false,
        generator: Generator::StructBuffer,
    },
    ArgContext {
        ty: ArgType::StatFs,
        name: "STAT_FS",
        log_type: LogType::Pointer,
        mutable: false,
        generator: Generator::StructBuffer,
    },
    ArgContext {
        ty: ArgType::Int,
        name: "INT",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Number,
    },
    ArgContext {
        ty: ArgType::Rusage,
        name: "RUSAGE",
        log_type: LogType::Pointer,
        mutable: false,
        generator: Generator::StructBuffer,
    },
    ArgContext {
        ty: ArgType::Pid,
        name: "PID",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::Pid,
    },
    ArgContext {
        ty: ArgType::WaitOption,
        name: "WAIT_OPTION",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Flags(WAIT_OPTIONS),
    },
    ArgContext {
        ty: ArgType::Offset,
        name: "OFF_T",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::Offset,
    },
    ArgContext {
        ty: ArgType::Whence,
        name: "WHENCE",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Choice(WHENCE),
    },
    ArgContext {
        ty: ArgType::Prot,
        name: "PROT",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Flags(PROT_BITS),
    },
    ArgContext {
        ty: ArgType::Advice,
        name: "ADVICE",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::Choice(ADVICE),
    },
    ArgContext {
        ty: ArgType::MapAddress,
        name: "ADDRESS",
        log_type: LogType::Pointer,
        mutable: false,
        generator: Generator::Mapping,
    },
    ArgContext {
        ty: ArgType::AtFlag,
        name: "AT_FLAG",
        log_type: LogType::Number,
        mutable: true,
        generator: Generator::Flags(AT_FLAGS),
    },
    ArgContext {
        ty: ArgType::FcntlCmd,
        name: "FCNTL_CMD",
        log_type: LogType::Number,
        mutable: false,
        generator: Generator::Choice(FCNTL_CMDS),
    },
];

/// Look up the registered context of an argument type
pub fn arg_context(ty: ArgType) -> Option<&'static ArgContext> {
    ARG_CONTEXTS.iter().find(|ctx| ctx.ty == ty)
}

fn pick<R: RandomGenerator>(rng: &mut R, values: &[u64]) -> Result<u64, RandomError> {
    let index = rng.range(values.len() as u32)?;
    Ok(values[index as usize])
}

fn subset<R: RandomGenerator>(rng: &mut R, bits: &[u64]) -> Result<u64, RandomError> {
    let mut value = 0;

    for bit in bits {
        if rng.one_in(3)? {
            value |= *bit;
        }
    }

    Ok(value)
}

impl ArgContext {
    /// Produce a fresh value for an argument of this type
    pub fn generate<R: RandomGenerator>(&self, rng: &mut R, resources: &Resources) -> Result<GeneratedArg, GenerateError> {
        let arg = match &self.generator {
            Generator::Descriptor => {
                if rng.one_in(8)? {
                    GeneratedArg::number(pick(rng, &[u64::MAX, 1 << 20])?)
                } else {
                    let fds = resources.descriptors();

                    if fds.is_empty() {
                        return Err(GenerateError::NoResources("file descriptors"));
                    }

                    GeneratedArg::number(fds[rng.range(fds.len() as u32)? as usize] as i64 as u64)
                }
            },
            Generator::DirDescriptor => match rng.range(3)? {
                0 => GeneratedArg::number(libc::AT_FDCWD as i64 as u64),
                1 => GeneratedArg::number(resources.directory() as i64 as u64),
                _ => {
                    let fds = resources.descriptors();

                    if fds.is_empty() {
                        return Err(GenerateError::NoResources("file descriptors"));
                    }

                    GeneratedArg::number(fds[rng.range(fds.len() as u32)? as usize] as i64 as u64)
                },
            },
            Generator::Buffer => {
                let len = MIN_BUFFER << rng.range(5)?;
                let mut buf = vec![0u8; len].into_boxed_slice();
                rng.fill(&mut buf[..RANDOM_PREFIX])?;
                GeneratedArg::buffer(buf)
            },
            Generator::StructBuffer => GeneratedArg::buffer(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            Generator::Size => {
                if rng.one_in(2)? {
                    GeneratedArg::number(pick(rng, INTERESTING_SIZES)?)
                } else {
                    GeneratedArg::number(rng.range(MIN_BUFFER as u32 + 1)? as u64)
                }
            },
            Generator::Path => {
                let paths = resources.paths();

                if paths.is_empty() {
                    return Err(GenerateError::NoResources("paths"));
                }

                GeneratedArg::path(paths[rng.range(paths.len() as u32)? as usize].clone())
            },
            Generator::Flags(bits) => GeneratedArg::number(subset(rng, bits)?),
            Generator::Choice(values) => GeneratedArg::number(pick(rng, values)?),
            Generator::Number => {
                if rng.one_in(2)? {
                    GeneratedArg::number(pick(rng, INTERESTING_INTS)?)
                } else {
                    GeneratedArg::number(rng.range(256)? as u64)
                }
            },
            Generator::Pid => {
                let pid = match rng.range(4)? {
                    0 => unsafe { libc::getpid() },
                    1 => 0,
                    2 => -1,
                    _ => 1 + rng.range(32767)? as i32,
                };
                GeneratedArg::number(pid as i64 as u64)
            },
            Generator::Offset => {
                if rng.one_in(8)? {
                    GeneratedArg::number(pick(rng, HUGE_OFFSETS)?)
                } else {
                    GeneratedArg::number(rng.range(1 << 20)? as u64)
                }
            },
            Generator::Mapping => GeneratedArg::mapping(MAPPING_PAGES * PAGE_SIZE)?,
        };

        Ok(arg)
    }
}

/// Memory that must outlive the invocation an argument is used in
enum Storage {
    None,
    Buffer(Box<[u8]>),
    Path(CString),
    Mapping {
        addr: *mut c_void,
        len: usize,
    },
}

/// A generated argument value together with the memory it points to
pub struct GeneratedArg {
    value: u64,
    storage: Storage,
}

impl GeneratedArg {
    pub fn number(value: u64) -> Self {
        Self {
            value,
            storage: Storage::None,
        }
    }

    pub fn buffer(buf: Box<[u8]>) -> Self {
        Self {
            value: buf.as_ptr() as u64,
            storage: Storage::Buffer(buf),
        }
    }

    pub fn path(path: CString) -> Self {
        Self {
            value: path.as_ptr() as u64,
            storage: Storage::Path(path),
        }
    }

    fn mapping(len: usize) -> Result<Self, GenerateError> {
        let addr = unsafe { libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0) };

        if addr == libc::MAP_FAILED {
            return Err(GenerateError::Mapping(std::io::Error::last_os_error()));
        }

        Ok(Self {
            value: addr as u64,
            storage: Storage::Mapping {
                addr,
                len,
            },
        })
    }

    /// The raw value passed to the syscall
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Change a plain value. Arguments that own memory keep pointing to it.
    pub fn set_value(&mut self, value: u64) {
        if let Storage::None = self.storage {
            self.value = value;
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Storage::Buffer(buf) => Some(&mut buf[..]),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&CStr> {
        match &self.storage {
            Storage::Path(path) => Some(path.as_c_str()),
            _ => None,
        }
    }
}

impl Drop for GeneratedArg {
    fn drop(&mut self) {
        if let Storage::Mapping {
            addr,
            len,
        } = self.storage
        {
            unsafe {
                libc::munmap(addr, len);
            }
        }
    }
}
