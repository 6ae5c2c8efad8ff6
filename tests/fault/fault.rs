use std::time::{
    Duration,
    Instant,
};

use forkfuzz::{
    child::ChildPool,
    concurrent::WaitStatus,
    config::Config,
    map::SharedMap,
    signals::install_worker_handlers,
    worker::exit_child,
    Logger,
};

fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = Instant::now() + Duration::from_secs(10);

    while !cond() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn faulting_worker_frees_its_slot() {
    let config = Config::builder().children(2).build().unwrap();
    let map = SharedMap::create(&config).unwrap();
    let pool = ChildPool::new(config.children()).unwrap();
    let logger = Logger::stdout();

    let started = pool
        .ensure_pool_filled(&map, &logger, |index, handshake| {
            let child = pool.get_child_from_index(index).unwrap();
            child.claim(unsafe { libc::getpid() });

            if install_worker_handlers(child, &map).is_err() {
                exit_child(child, &map, 2);
            }

            child.count_in(&map);

            if handshake.notify().is_err() {
                exit_child(child, &map, 2);
            }

            if index == 0 {
                unsafe { libc::raise(libc::SIGSEGV) };
            }

            while !map.stop_requested() {
                std::thread::sleep(Duration::from_millis(5));
            }

            exit_child(child, &map, 0)
        })
        .unwrap();
    assert_eq!(started, 2);

    // The fault handler frees the slot and uncounts the worker before anyone reaps it
    let faulted = pool.get_child_from_index(0).unwrap();
    let survivor = pool.get_child_from_index(1).unwrap();
    wait_until(|| faulted.is_empty());
    assert_eq!(map.running_children(), 1);
    assert!(!survivor.is_empty());

    let mut reaped = Vec::new();
    wait_until(|| {
        reaped.extend(pool.reclaim(&map));
        !reaped.is_empty()
    });
    assert_eq!(reaped[0].1, WaitStatus::Exited(1));
    assert_eq!(map.running_children(), 1);

    map.request_stop();
    wait_until(|| {
        pool.reclaim(&map);
        pool.occupied() == 0
    });
    assert_eq!(map.running_children(), 0);
}
