use std::time::{
    Duration,
    Instant,
};

use forkfuzz::{
    child::{
        wall_clock_secs,
        ChildPool,
    },
    concurrent::WaitStatus,
    config::Config,
    map::SharedMap,
    reaper::Reaper,
    Logger,
};

#[test]
fn reaper_kills_hung_workers() {
    let config = Config::builder().children(3).build().unwrap();
    let map = SharedMap::create(&config).unwrap();
    let pool = ChildPool::new(config.children()).unwrap();
    let logger = Logger::stdout();

    // Workers that never come back on their own
    let started = pool
        .ensure_pool_filled(&map, &logger, |_, handshake| {
            let _ = handshake.notify();

            loop {
                std::thread::sleep(Duration::from_secs(1));
            }
        })
        .unwrap();
    assert_eq!(started, 3);

    let now = wall_clock_secs();
    let hung = pool.get_child_from_index(0).unwrap();
    let busy = pool.get_child_from_index(1).unwrap();
    let idle = pool.get_child_from_index(2).unwrap();
    let hung_pid = hung.pid();

    hung.stamp(now - 6);
    busy.stamp(now - 1);
    assert_eq!(idle.time_of_syscall(), 0);

    let mut reaper = Reaper::new(&map, &pool, Duration::from_secs(5), Duration::from_millis(10), Logger::stdout());
    assert_eq!(reaper.scan(now), 1);

    // The dead worker is not killed a second time while its slot waits to be reclaimed
    assert_eq!(reaper.scan(now), 0);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut reaped = Vec::new();

    while !hung.is_empty() {
        assert!(Instant::now() < deadline, "hung worker was not reclaimed");
        reaped.extend(pool.reclaim(&map));
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(reaped.contains(&(hung_pid, WaitStatus::Signaled(libc::SIGKILL))));
    assert!(!busy.is_empty());
    assert!(!idle.is_empty());

    // On stop the reaper kills everything that is left
    map.request_stop();
    reaper.run();

    let deadline = Instant::now() + Duration::from_secs(10);

    while pool.occupied() > 0 {
        assert!(Instant::now() < deadline, "workers survived the shutdown");
        pool.reclaim(&map);
        std::thread::sleep(Duration::from_millis(10));
    }
}
