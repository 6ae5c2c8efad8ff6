//! Worker slots and the pool that keeps them occupied.
//!
//! A slot is free when its pid is [`EMPTY`]. The supervisor claims a slot right after forking
//! a worker for it and the worker releases it again in its exit path. Workers that die without
//! running their exit path are reaped by the supervisor with [`ChildPool::reclaim`].
//!
//! Whoever frees a slot goes through [`ChildContext::vacate`], which also takes the occupant
//! out of the running-worker counter if [`ChildContext::count_in`] put it there.

use std::{
    fs::File,
    io::{
        Read,
        Write,
    },
    os::fd::FromRawFd,
    panic::AssertUnwindSafe,
    sync::atomic::{
        AtomicBool,
        AtomicI32,
        AtomicI64,
        AtomicU32,
        AtomicU64,
        Ordering,
    },
    time::{
        SystemTime,
        UNIX_EPOCH,
    },
};

use libc::pid_t;
use thiserror::Error;

use crate::{
    concurrent::{
        cas_loop,
        waitpid,
        WaitStatus,
    },
    logger::Logger,
    map::SharedMap,
    shm::{
        Shareable,
        SharedMemoryError,
        SharedSlice,
    },
};

/// The pid of a slot that has no worker
pub const EMPTY: pid_t = 0;

/// Seconds since the epoch, the unit of [`ChildContext::time_of_syscall`]
pub fn wall_clock_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Exit code of a worker process whose entry point panicked
pub const WORKER_PANIC_EXIT: i32 = 70;

/// Maximum number of arguments a syscall can have
pub const MAX_ARGS: usize = 7;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Can't allocate the worker slots: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    #[error("Can't create the handshake pipe: {0}")]
    Pipe(std::io::Error),

    #[error("fork() failed: {0}")]
    Fork(std::io::Error),

    #[error("Handshake with the worker in slot {index} failed: {source}")]
    Handshake {
        index: usize,
        source: std::io::Error,
    },

    #[error("The worker in slot {0} exited before completing its setup")]
    ShortHandshake(usize),
}

/// Per-worker state in shared memory.
///
/// Apart from `pid`, only the worker that occupies the slot writes to it.
#[repr(C)]
#[derive(Default, Debug)]
pub struct ChildContext {
    pid: AtomicI32,
    /// Whether the occupant is included in the running-worker counter
    counted: AtomicBool,
    syscall_number: AtomicU32,
    syscall_symbol: AtomicI64,
    number_of_args: AtomicU32,
    need_alarm: AtomicBool,
    arg_value_index: [AtomicU64; MAX_ARGS],
    time_of_syscall: AtomicI64,
    ret_value: AtomicI64,
    had_error: AtomicBool,
    err_value: AtomicI32,
}

unsafe impl Shareable for ChildContext {}

impl ChildContext {
    pub fn pid(&self) -> pid_t {
        self.pid.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.pid() == EMPTY
    }

    /// Occupy a free slot. Returns false if the slot already holds a pid.
    pub fn claim(&self, pid: pid_t) -> bool {
        match self.pid.compare_exchange(EMPTY, pid, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(current) => current == pid,
        }
    }

    pub(crate) fn set_pid(&self, pid: pid_t) {
        cas_loop(&self.pid, pid);
    }

    /// Free the slot if it is still occupied by `pid`
    pub fn release(&self, pid: pid_t) -> bool {
        pid != EMPTY && self.pid.compare_exchange(pid, EMPTY, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Add the occupant to the running-worker counter. Counts at most once per occupant.
    pub fn count_in(&self, map: &SharedMap) {
        if !self.counted.swap(true, Ordering::AcqRel) {
            map.child_started();
        }
    }

    /// Remove the occupant from the running-worker counter if it was counted
    fn count_out(&self, map: &SharedMap) {
        if self.counted.swap(false, Ordering::AcqRel) {
            map.child_exited();
        }
    }

    /// Free the slot held by `pid` and uncount its occupant.
    ///
    /// The counter is settled before the pid is released, so a worker forked into the
    /// freed slot can never have its own count taken away. Only atomics are touched,
    /// which makes this safe to call from a signal handler.
    pub fn vacate(&self, pid: pid_t, map: &SharedMap) -> bool {
        if pid == EMPTY || self.pid() != pid {
            return false;
        }

        self.count_out(map);
        self.release(pid)
    }

    pub(crate) fn clear(&self) {
        cas_loop(&self.pid, EMPTY);
    }

    /// Forget everything the previous occupant did so that the reaper
    /// does not judge a new worker by an old timestamp.
    pub(crate) fn reset_activity(&self) {
        self.time_of_syscall.store(0, Ordering::Release);
        self.syscall_number.store(0, Ordering::Relaxed);
        self.syscall_symbol.store(0, Ordering::Relaxed);
        self.number_of_args.store(0, Ordering::Relaxed);
        self.need_alarm.store(false, Ordering::Relaxed);
        self.ret_value.store(0, Ordering::Relaxed);
        self.had_error.store(false, Ordering::Relaxed);
        self.err_value.store(0, Ordering::Relaxed);

        for arg in &self.arg_value_index {
            arg.store(0, Ordering::Relaxed);
        }
    }

    /* Selected syscall */
    pub(crate) fn select(&self, number: u32, symbol: i64, number_of_args: u32, need_alarm: bool) {
        self.syscall_number.store(number, Ordering::Release);
        self.syscall_symbol.store(symbol, Ordering::Release);
        self.number_of_args.store(number_of_args, Ordering::Release);
        self.need_alarm.store(need_alarm, Ordering::Release);
        self.had_error.store(false, Ordering::Release);
    }

    pub fn syscall_number(&self) -> u32 {
        self.syscall_number.load(Ordering::Acquire)
    }

    pub fn syscall_symbol(&self) -> i64 {
        self.syscall_symbol.load(Ordering::Acquire)
    }

    pub fn number_of_args(&self) -> usize {
        self.number_of_args.load(Ordering::Acquire) as usize
    }

    pub fn need_alarm(&self) -> bool {
        self.need_alarm.load(Ordering::Acquire)
    }

    /* Arguments */
    pub(crate) fn set_arg(&self, index: usize, value: u64) {
        if let Some(arg) = self.arg_value_index.get(index) {
            arg.store(value, Ordering::Release);
        }
    }

    pub fn arg(&self, index: usize) -> Option<u64> {
        self.arg_value_index.get(index).map(|arg| arg.load(Ordering::Acquire))
    }

    /* Timing */
    /// Record the wall clock time (in seconds) right before an invocation
    pub fn stamp(&self, secs: i64) {
        self.time_of_syscall.store(secs, Ordering::Release);
    }

    /// Seconds since the epoch of the last invocation or 0 if there was none
    pub fn time_of_syscall(&self) -> i64 {
        self.time_of_syscall.load(Ordering::Acquire)
    }

    /* Outcome */
    pub(crate) fn record_outcome(&self, ret: i64, errno: Option<i32>) {
        self.ret_value.store(ret, Ordering::Release);
        self.had_error.store(errno.is_some(), Ordering::Release);
        self.err_value.store(errno.unwrap_or(0), Ordering::Release);
    }

    pub fn ret_value(&self) -> i64 {
        self.ret_value.load(Ordering::Acquire)
    }

    pub fn had_error(&self) -> bool {
        self.had_error.load(Ordering::Acquire)
    }

    pub fn err_value(&self) -> i32 {
        self.err_value.load(Ordering::Acquire)
    }
}

/// Write end of the one-shot setup pipe, owned by a freshly forked worker
pub struct HandshakeSender {
    pipe: File,
}

impl HandshakeSender {
    /// Tell the supervisor that setup is complete
    pub fn notify(self) -> std::io::Result<()> {
        (&self.pipe).write_all(&[1])
    }
}

struct HandshakeReceiver {
    pipe: File,
}

impl HandshakeReceiver {
    fn wait(mut self, index: usize) -> Result<(), PoolError> {
        let mut byte = [0u8; 1];

        loop {
            match self.pipe.read(&mut byte) {
                Ok(1) => return Ok(()),
                Ok(_) => return Err(PoolError::ShortHandshake(index)),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(PoolError::Handshake {
                        index,
                        source: err,
                    })
                },
            }
        }
    }
}

fn handshake_pipe() -> Result<(HandshakeReceiver, HandshakeSender), PoolError> {
    let mut fds = [0; 2];

    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(PoolError::Pipe(std::io::Error::last_os_error()));
    }

    // Both descriptors are fresh and owned by nobody else
    let receiver = HandshakeReceiver {
        pipe: unsafe { File::from_raw_fd(fds[0]) },
    };
    let sender = HandshakeSender {
        pipe: unsafe { File::from_raw_fd(fds[1]) },
    };

    Ok((receiver, sender))
}

/// The fixed array of worker slots
pub struct ChildPool {
    slots: SharedSlice<ChildContext>,
}

impl ChildPool {
    pub fn new(number_of_children: usize) -> Result<Self, PoolError> {
        Ok(Self {
            slots: SharedSlice::new(number_of_children)?,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get_child_from_index(&self, index: usize) -> Option<&ChildContext> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChildContext> {
        self.slots.iter()
    }

    /// Number of slots that currently hold a pid
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|child| !child.is_empty()).count()
    }

    /// Find the slot that `pid` occupies
    pub fn get_child_index_number(&self, pid: pid_t) -> Option<usize> {
        if pid == EMPTY {
            return None;
        }

        self.slots.iter().position(|child| child.pid() == pid)
    }

    /// Fork a worker into every free slot, in index order.
    ///
    /// `start_worker` runs in the forked process with the slot index and the write end of the
    /// setup pipe. Its return value becomes the exit code of the worker, or [`WORKER_PANIC_EXIT`]
    /// if it panics. A worker that fails
    /// to complete the handshake is logged and its slot stays free for the next pass.
    /// Returns the number of workers that completed their setup.
    pub fn ensure_pool_filled<F>(&self, map: &SharedMap, logger: &Logger, mut start_worker: F) -> Result<usize, PoolError>
    where
        F: FnMut(usize, HandshakeSender) -> i32,
    {
        let mut started = 0;

        for (index, child) in self.slots.iter().enumerate() {
            if map.stop_requested() {
                break;
            }

            if !child.is_empty() {
                continue;
            }

            let (receiver, sender) = handshake_pipe()?;
            child.reset_activity();

            let pid = unsafe { libc::fork() };

            if pid < 0 {
                return Err(PoolError::Fork(std::io::Error::last_os_error()));
            } else if pid == 0 {
                drop(receiver);

                // A panic must never unwind back into the caller's code in the worker
                let code = std::panic::catch_unwind(AssertUnwindSafe(|| start_worker(index, sender))).unwrap_or(WORKER_PANIC_EXIT);
                unsafe { libc::_exit(code) };
            }

            drop(sender);

            if !child.claim(pid) {
                logger.warning(format!("Slot {} was taken while forking worker {}", index, pid));
                continue;
            }

            match receiver.wait(index) {
                Ok(()) => started += 1,
                Err(err) => {
                    // The worker may have counted itself before it died
                    child.vacate(pid, map);
                    logger.warning(format!("Worker {}: {}", pid, err));
                },
            }
        }

        Ok(started)
    }

    /// Send SIGKILL to every occupied slot. Failures are logged and skipped.
    /// Returns the number of workers that were signaled.
    pub fn kill_all_children(&self, logger: &Logger) -> usize {
        let mut killed = 0;

        for (index, child) in self.slots.iter().enumerate() {
            let pid = child.pid();

            if pid == EMPTY {
                continue;
            }

            if unsafe { libc::kill(pid, libc::SIGKILL) } < 0 {
                let err = std::io::Error::last_os_error();
                logger.warning(format!("Can't kill worker {} in slot {}: {}", pid, index, err));
            } else {
                killed += 1;
            }
        }

        killed
    }

    /// Collect every terminated worker of the calling process and free the slots
    /// of those that did not get to release it themselves.
    /// Returns the terminated pids together with their exit status.
    pub fn reclaim(&self, map: &SharedMap) -> Vec<(pid_t, WaitStatus)> {
        let mut reaped = Vec::new();

        while let Ok(Some((pid, status))) = waitpid(-1, libc::WNOHANG) {
            if let Some(index) = self.get_child_index_number(pid) {
                self.slots[index].vacate(pid, map);
            }

            reaped.push((pid, status));
        }

        reaped
    }

    /// Free every slot regardless of its occupant
    pub(crate) fn clear_all(&self) {
        for child in self.slots.iter() {
            child.clear();
        }
    }
}
