//! Lock-free helpers for fields that several processes update concurrently.
//!
//! Nothing in here blocks on an OS lock, so every function may also be
//! called from a signal handler.

use std::{
    hint,
    sync::atomic::{
        fence,
        AtomicBool,
        AtomicI32,
        AtomicI64,
        AtomicU32,
        AtomicU64,
        Ordering,
    },
};

use libc::pid_t;

use crate::child::EMPTY;

/// Busy spins before [`cas_loop`] starts yielding the CPU
const SPIN_LIMIT: u32 = 64;

/// Atomics that can be overwritten with [`cas_loop`]
pub trait CasTarget {
    type Value: Copy;

    fn cas_loop(&self, value: Self::Value);
}

#[inline]
fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

macro_rules! cas_target {
    ($atomic:ty, $value:ty) => {
        impl CasTarget for $atomic {
            type Value = $value;

            fn cas_loop(&self, value: $value) {
                let mut spins = 0;

                loop {
                    let snapshot = self.load(Ordering::Acquire);

                    // The load must happen before the compare and swap below
                    fence(Ordering::SeqCst);

                    if self.compare_exchange_weak(snapshot, value, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                        break;
                    }

                    backoff(&mut spins);
                }
            }
        }
    };
}

cas_target!(AtomicBool, bool);
cas_target!(AtomicI32, i32);
cas_target!(AtomicU32, u32);
cas_target!(AtomicI64, i64);
cas_target!(AtomicU64, u64);

/// Store `value` into `target`, retrying until no concurrent writer gets in the way.
/// This never fails.
#[inline]
pub fn cas_loop<A: CasTarget>(target: &A, value: A::Value) {
    target.cas_loop(value)
}

/// How a process that was waited on terminated
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(i32),
    Other(i32),
}

impl WaitStatus {
    pub(crate) fn from_raw(status: i32) -> Self {
        if libc::WIFEXITED(status) {
            WaitStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            WaitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            WaitStatus::Other(status)
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, WaitStatus::Exited(0))
    }
}

pub(crate) fn waitpid(pid: pid_t, options: i32) -> std::io::Result<Option<(pid_t, WaitStatus)>> {
    loop {
        let mut status = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, options) };

        if ret > 0 {
            return Ok(Some((ret, WaitStatus::from_raw(status))));
        } else if ret == 0 {
            return Ok(None);
        }

        let err = std::io::Error::last_os_error();

        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Block until the process whose pid is stored in `pid` terminates.
/// Returns `None` if the field holds no pid.
pub fn wait_on(pid: &AtomicI32) -> std::io::Result<Option<WaitStatus>> {
    let pid = pid.load(Ordering::Acquire);

    if pid == EMPTY {
        return Ok(None);
    }

    Ok(waitpid(pid, 0)?.map(|(_, status)| status))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_cas_loop_contended() {
        let target = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::new();

        for i in 1..=8u64 {
            let target = target.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    cas_loop(&*target, i);
                }
            }));
        }

        for thread in threads {
            thread.join().unwrap();
        }

        let value = target.load(Ordering::SeqCst);
        assert!((1..=8).contains(&value));
    }

    #[test]
    fn test_cas_loop_bool() {
        let flag = AtomicBool::new(false);
        cas_loop(&flag, true);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_on() {
        let child = std::process::Command::new("sh").arg("-c").arg("exit 3").spawn().unwrap();
        let pid = AtomicI32::new(child.id() as i32);

        assert_eq!(wait_on(&pid).unwrap(), Some(WaitStatus::Exited(3)));
        assert_eq!(wait_on(&AtomicI32::new(EMPTY)).unwrap(), None);
    }
}
