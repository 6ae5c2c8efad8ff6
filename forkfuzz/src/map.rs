//! Contains the [`SharedMap`], the coordination state every process of a run shares.

use std::sync::atomic::{
    AtomicBool,
    AtomicI32,
    AtomicU32,
    AtomicU64,
    Ordering,
};

use libc::pid_t;

use crate::{
    concurrent::cas_loop,
    config::{
        Config,
        Mode,
        RandomMethod,
    },
    shm::{
        Shareable,
        Shared,
        SharedMemoryError,
    },
};

/// Global state of a fuzzing run.
///
/// It is created once before the first fork and every process of the run maps the same
/// physical memory. All fields are atomics because all of them are read by more than one process.
#[repr(C)]
#[derive(Default, Debug)]
pub struct SharedMap {
    mode: AtomicU32,
    random_method: AtomicU32,
    stop: AtomicBool,
    smart_mode: AtomicBool,
    number_of_children: AtomicU32,
    reaper_pid: AtomicI32,
    runloop_pid: AtomicI32,
    socket_server_pid: AtomicI32,
    test_counter: AtomicU64,
    running_children: AtomicU64,
}

unsafe impl Shareable for SharedMap {}

impl SharedMap {
    /// Map a new shared region and initialize it from the config
    pub fn create(config: &Config) -> Result<Shared<SharedMap>, SharedMemoryError> {
        let map = Shared::<SharedMap>::new()?;
        map.mode.store(config.mode() as u32, Ordering::Release);
        map.random_method.store(config.random() as u32, Ordering::Release);
        map.smart_mode.store(config.smart_mode(), Ordering::Release);
        map.number_of_children.store(config.children() as u32, Ordering::Release);
        Ok(map)
    }

    pub fn mode(&self) -> Option<Mode> {
        Mode::from_raw(self.mode.load(Ordering::Acquire))
    }

    pub fn random_method(&self) -> Option<RandomMethod> {
        RandomMethod::from_raw(self.random_method.load(Ordering::Acquire))
    }

    pub fn smart_mode(&self) -> bool {
        self.smart_mode.load(Ordering::Acquire)
    }

    pub fn number_of_children(&self) -> usize {
        self.number_of_children.load(Ordering::Acquire) as usize
    }

    /* Cancellation */
    /// Whether the run is shutting down. The flag only ever goes from false to true.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        cas_loop(&self.stop, true);
    }

    /* Auxiliary processes */
    pub fn reaper_pid(&self) -> &AtomicI32 {
        &self.reaper_pid
    }

    pub fn runloop_pid(&self) -> &AtomicI32 {
        &self.runloop_pid
    }

    pub fn socket_server_pid(&self) -> &AtomicI32 {
        &self.socket_server_pid
    }

    pub(crate) fn set_reaper_pid(&self, pid: pid_t) {
        cas_loop(&self.reaper_pid, pid);
    }

    pub(crate) fn set_runloop_pid(&self, pid: pid_t) {
        cas_loop(&self.runloop_pid, pid);
    }

    /* Counters */
    /// Count one syscall test. Returns the new total.
    pub fn record_test(&self) -> u64 {
        self.test_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn test_count(&self) -> u64 {
        self.test_counter.load(Ordering::Acquire)
    }

    pub fn running_children(&self) -> u64 {
        self.running_children.load(Ordering::Acquire)
    }

    /// A worker completed its setup
    pub(crate) fn child_started(&self) {
        self.running_children.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn child_exited(&self) {
        let _ = self.running_children.fetch_update(Ordering::AcqRel, Ordering::Acquire, |x| x.checked_sub(1));
    }
}
