//! <h1 align="center"> forkfuzz </h1><hr/>
//!
//! A syscall fuzzer that keeps a pool of disposable worker processes busy
//! invoking randomly chosen system calls with generated arguments.
//!
//! All coordination between the supervisor, the workers and the reaper
//! happens through a single shared memory region ([`map::SharedMap`]) and a
//! fixed array of worker slots ([`child::ChildPool`]).

mod fixedbuf;
mod logger;

/* The fuzzers interface: */
pub mod child;
pub mod concurrent;
pub mod config;
pub mod map;
pub mod mutate;
pub mod random;
pub mod reaper;
pub mod record;
pub mod runtime;
pub mod shm;
pub mod signals;
pub mod supervisor;
pub mod syscall;
pub mod worker;

pub use config::Config;
pub use logger::{
    Level,
    Logger,
    OutputWriter,
};
pub use runtime::Fuzzer;
