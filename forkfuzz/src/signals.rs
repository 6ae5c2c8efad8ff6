//! Signal dispositions of the fuzzer's processes.
//!
//! Everything reachable from a handler in here only touches atomics and makes
//! async-signal-safe libc calls.

use std::sync::atomic::{
    AtomicI32,
    AtomicPtr,
    Ordering,
};

use libc::c_int;

use crate::{
    child::ChildContext,
    map::SharedMap,
};

/// A signal that interrupted the current invocation, or 0
static PENDING: AtomicI32 = AtomicI32::new(0);

static STOP_MAP: AtomicPtr<SharedMap> = AtomicPtr::new(std::ptr::null_mut());
static FAULT_SLOT: AtomicPtr<ChildContext> = AtomicPtr::new(std::ptr::null_mut());
static FAULT_MAP: AtomicPtr<SharedMap> = AtomicPtr::new(std::ptr::null_mut());

/// Signals a tested syscall may provoke without corrupting the worker
const RECOVERABLE: &[c_int] = &[
    libc::SIGALRM,
    libc::SIGPIPE,
    libc::SIGXFSZ,
    libc::SIGSYS,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGHUP,
];

/// Signals after which the worker can't trust its own state anymore
const FATAL: &[c_int] = &[libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE, libc::SIGABRT, libc::SIGTRAP];

fn install(signal: c_int, handler: extern "C" fn(c_int), flags: c_int) -> std::io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = flags;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(signal, &action, std::ptr::null_mut()) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

extern "C" fn stop_handler(_signal: c_int) {
    let map = STOP_MAP.load(Ordering::Acquire);

    if let Some(map) = unsafe { map.as_ref() } {
        map.request_stop();
    }
}

/// Make SIGINT and SIGTERM request a cooperative stop through `map`.
/// The disposition is inherited by every process forked afterwards.
pub(crate) fn install_stop_handler(map: &SharedMap) -> std::io::Result<()> {
    STOP_MAP.store(map as *const SharedMap as *mut SharedMap, Ordering::Release);
    install(libc::SIGINT, stop_handler, libc::SA_RESTART)?;
    install(libc::SIGTERM, stop_handler, libc::SA_RESTART)
}

extern "C" fn pending_handler(signal: c_int) {
    PENDING.store(signal, Ordering::Release);
}

extern "C" fn fault_handler(_signal: c_int) {
    let slot = FAULT_SLOT.load(Ordering::Acquire);
    let map = FAULT_MAP.load(Ordering::Acquire);

    unsafe {
        if let (Some(slot), Some(map)) = (slot.as_ref(), map.as_ref()) {
            slot.vacate(libc::getpid(), map);
        }

        libc::_exit(1);
    }
}

/// Dispositions of a worker: recoverable signals are recorded and interrupt the
/// running syscall, hardware faults free the slot and end the process.
pub fn install_worker_handlers(slot: &ChildContext, map: &SharedMap) -> std::io::Result<()> {
    FAULT_SLOT.store(slot as *const ChildContext as *mut ChildContext, Ordering::Release);
    FAULT_MAP.store(map as *const SharedMap as *mut SharedMap, Ordering::Release);

    for signal in RECOVERABLE {
        install(*signal, pending_handler, 0)?;
    }

    for signal in FATAL {
        install(*signal, fault_handler, libc::SA_RESETHAND)?;
    }

    Ok(())
}

/// Take the recoverable signal that arrived since the last call, if any
pub(crate) fn take_pending() -> Option<c_int> {
    match PENDING.swap(0, Ordering::AcqRel) {
        0 => None,
        signal => Some(signal),
    }
}

pub(crate) fn clear_pending() {
    PENDING.store(0, Ordering::Release);
}

pub(crate) fn signal_name(signal: c_int) -> &'static str {
    match signal {
        libc::SIGALRM => "SIGALRM",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGSYS => "SIGSYS",
        libc::SIGTTIN => "SIGTTIN",
        libc::SIGTTOU => "SIGTTOU",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGHUP => "SIGHUP",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGILL => "SIGILL",
        libc::SIGFPE => "SIGFPE",
        libc::SIGABRT => "SIGABRT",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGKILL => "SIGKILL",
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        _ => "unknown signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending() {
        clear_pending();
        assert_eq!(take_pending(), None);

        pending_handler(libc::SIGALRM);
        assert_eq!(take_pending(), Some(libc::SIGALRM));
        assert_eq!(take_pending(), None);
        assert_eq!(signal_name(libc::SIGALRM), "SIGALRM");
    }
}
