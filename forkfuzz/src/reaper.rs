//! The watchdog process that kills workers stuck in a syscall.

use std::time::Duration;

use libc::pid_t;
use thiserror::Error;

use crate::{
    child::{
        wall_clock_secs,
        ChildContext,
        ChildPool,
        EMPTY,
    },
    logger::Logger,
    map::SharedMap,
    runtime::Fuzzer,
};

#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("Can't fork the reaper: {0}")]
    Fork(std::io::Error),
}

pub struct Reaper<'a> {
    map: &'a SharedMap,
    pool: &'a ChildPool,
    threshold: i64,
    poll_interval: Duration,
    logger: Logger,
    /// The pid each slot held when it was last killed, so that a zombie is only killed once
    killed: Vec<pid_t>,
}

impl<'a> Reaper<'a> {
    pub fn new(map: &'a SharedMap, pool: &'a ChildPool, threshold: Duration, poll_interval: Duration, logger: Logger) -> Self {
        Self {
            map,
            pool,
            threshold: threshold.as_secs().max(1) as i64,
            poll_interval,
            logger,
            killed: vec![EMPTY; pool.len()],
        }
    }

    /// The pid to kill if `child` has been inside its current syscall for at least the threshold.
    /// Slots without a worker or without any invocation yet are never reported.
    pub fn check_progress(&self, child: &ChildContext, now: i64) -> Option<pid_t> {
        let pid = child.pid();

        if pid == EMPTY {
            return None;
        }

        let stamp = child.time_of_syscall();

        if stamp == 0 {
            return None;
        }

        if (now - stamp).abs() >= self.threshold {
            Some(pid)
        } else {
            None
        }
    }

    /// Kill every hung worker once. Returns the number of workers that were killed.
    pub fn scan(&mut self, now: i64) -> usize {
        let mut count = 0;

        for (index, child) in self.pool.iter().enumerate() {
            let Some(pid) = self.check_progress(child, now) else {
                continue;
            };

            if self.killed[index] == pid {
                continue;
            }

            if unsafe { libc::kill(pid, libc::SIGKILL) } < 0 {
                let err = std::io::Error::last_os_error();
                self.logger.warning(format!("Can't kill hung worker {} in slot {}: {}", pid, index, err));
                continue;
            }

            self.logger.info(format!("Killed worker {} in slot {} (syscall {} did not return)", pid, index, child.syscall_number()));
            self.killed[index] = pid;
            count += 1;
        }

        count
    }

    /// Scan until the run stops, then kill the remaining workers
    pub fn run(&mut self) {
        while !self.map.stop_requested() {
            self.scan(wall_clock_secs());
            std::thread::sleep(self.poll_interval);
        }

        let killed = self.pool.kill_all_children(&self.logger);
        self.logger.debug(format!("Killed {} workers at shutdown", killed));
    }
}

/// Fork the reaper process and record its pid in the shared map
pub fn setup_reaper_module(fuzzer: &Fuzzer) -> Result<pid_t, ReaperError> {
    let pid = unsafe { libc::fork() };

    if pid < 0 {
        return Err(ReaperError::Fork(std::io::Error::last_os_error()));
    } else if pid == 0 {
        let mut logger = fuzzer.logger().detached();
        logger.set_prefix("reaper");

        let config = fuzzer.config();
        let mut reaper = Reaper::new(fuzzer.map(), fuzzer.pool(), config.hang_threshold(), config.poll_interval(), logger);
        reaper.run();

        unsafe { libc::_exit(0) };
    }

    fuzzer.map().set_reaper_pid(pid);
    Ok(pid)
}
