//! The process that keeps the worker pool filled until the run stops.

use std::time::Instant;

use crate::{
    child::PoolError,
    concurrent::WaitStatus,
    runtime::Fuzzer,
    signals::signal_name,
    worker::start_syscall_child,
};

/// Fork a worker into every free slot. Returns the number of new workers.
pub fn create_syscall_children(fuzzer: &Fuzzer) -> Result<usize, PoolError> {
    fuzzer.pool().ensure_pool_filled(fuzzer.map(), fuzzer.logger(), |index, handshake| start_syscall_child(fuzzer, index, handshake))
}

fn reclaim(fuzzer: &Fuzzer) {
    for (pid, status) in fuzzer.pool().reclaim(fuzzer.map()) {
        if let WaitStatus::Signaled(signal) = status {
            fuzzer.logger().debug(format!("Worker {} was terminated by {}", pid, signal_name(signal)));
        }
    }
}

/// Keep every slot occupied until the run is stopped, then wait for the workers to exit
pub fn start_main_syscall_loop(fuzzer: &Fuzzer) {
    let map = fuzzer.map();
    let pool = fuzzer.pool();
    let logger = fuzzer.logger();

    while !map.stop_requested() {
        reclaim(fuzzer);

        if pool.occupied() < pool.len() {
            if let Err(err) = create_syscall_children(fuzzer) {
                logger.error(format!("Can't fill the worker pool: {}", err));
            }
        }

        logger.set_status(format!("{} syscalls tested, {} workers running", map.test_count(), pool.occupied()));
        std::thread::sleep(fuzzer.config().poll_interval());
    }

    drain(fuzzer);
    logger.finish();
}

/// Wait until every slot is free. Workers still alive after the grace period are killed
/// and slots that stay occupied for another grace period are freed by force.
fn drain(fuzzer: &Fuzzer) {
    let pool = fuzzer.pool();
    let logger = fuzzer.logger();
    let grace = fuzzer.config().shutdown_grace();
    let start = Instant::now();
    let mut killed = false;

    loop {
        reclaim(fuzzer);

        if pool.occupied() == 0 {
            break;
        }

        let elapsed = start.elapsed();

        if elapsed >= grace * 2 {
            logger.warning(format!("{} slots did not become free, clearing them", pool.occupied()));
            pool.clear_all();
            break;
        } else if elapsed >= grace && !killed {
            pool.kill_all_children(logger);
            killed = true;
        }

        std::thread::sleep(fuzzer.config().poll_interval());
    }
}
