use std::{
    collections::HashSet,
    time::{
        Duration,
        Instant,
    },
};

use forkfuzz::{
    child::{
        ChildPool,
        EMPTY,
        WORKER_PANIC_EXIT,
    },
    concurrent::WaitStatus,
    config::Config,
    map::SharedMap,
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
fn fill_and_drain_pool() {
    let config = Config::builder().children(4).build().unwrap();
    let map = SharedMap::create(&config).unwrap();
    let pool = ChildPool::new(config.children()).unwrap();
    let logger = Logger::stdout();

    for child in pool.iter() {
        assert_eq!(child.pid(), EMPTY);
    }

    let started = pool
        .ensure_pool_filled(&map, &logger, |index, handshake| {
            let child = pool.get_child_from_index(index).unwrap();
            child.claim(unsafe { libc::getpid() });
            child.count_in(&map);

            if handshake.notify().is_err() {
                exit_child(child, &map, 1);
            }

            while !map.stop_requested() {
                std::thread::sleep(Duration::from_millis(5));
            }

            exit_child(child, &map, 0)
        })
        .unwrap();

    assert_eq!(started, 4);
    assert_eq!(pool.occupied(), 4);
    assert_eq!(map.running_children(), 4);

    let pids: HashSet<_> = pool.iter().map(|child| child.pid()).collect();
    assert_eq!(pids.len(), 4);
    assert!(!pids.contains(&EMPTY));

    for (index, child) in pool.iter().enumerate() {
        assert_eq!(pool.get_child_index_number(child.pid()), Some(index));
    }

    // A full pool forks nothing
    assert_eq!(pool.ensure_pool_filled(&map, &logger, |_, _| 1).unwrap(), 0);

    // A killed worker's slot becomes free once the supervisor reaps it
    let victim = pool.get_child_from_index(2).unwrap();
    let victim_pid = victim.pid();
    assert_eq!(unsafe { libc::kill(victim_pid, libc::SIGKILL) }, 0);
    wait_until(|| {
        pool.reclaim(&map);
        victim.is_empty()
    });
    assert_eq!(map.running_children(), 3);

    // A worker that counted itself but died before its handshake is uncounted again
    let started = pool
        .ensure_pool_filled(&map, &logger, |index, _handshake| {
            let child = pool.get_child_from_index(index).unwrap();
            child.claim(unsafe { libc::getpid() });
            child.count_in(&map);
            unsafe { libc::raise(libc::SIGKILL) };
            0
        })
        .unwrap();
    assert_eq!(started, 0);
    assert!(victim.is_empty());
    assert_eq!(map.running_children(), 3);

    // A panicking worker exits on its own instead of unwinding into this test
    assert_eq!(pool.ensure_pool_filled(&map, &logger, |_, _| panic!("setup exploded")).unwrap(), 0);
    assert!(victim.is_empty());

    let mut reaped = Vec::new();
    wait_until(|| {
        reaped.extend(pool.reclaim(&map));
        reaped.iter().any(|(_, status)| *status == WaitStatus::Exited(WORKER_PANIC_EXIT))
    });
    assert_eq!(map.running_children(), 3);

    // A worker that fails before its handshake leaves the slot free
    assert_eq!(pool.ensure_pool_filled(&map, &logger, |_, _| 1).unwrap(), 0);
    assert!(victim.is_empty());
    assert_eq!(pool.occupied(), 3);

    map.request_stop();
    wait_until(|| {
        pool.reclaim(&map);
        pool.occupied() == 0
    });
    assert_eq!(map.running_children(), 0);
}
