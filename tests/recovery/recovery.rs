use std::{
    path::Path,
    time::{
        Duration,
        Instant,
    },
};

use forkfuzz::{
    child::EMPTY,
    syscall::{
        ArgType,
        SyscallEntry,
    },
    Config,
    Fuzzer,
};

/// Reads from the worker's own empty pipe block until the alarm fires
static BLOCKING: &[SyscallEntry] = &[SyscallEntry::new("read", libc::SYS_read, &[ArgType::FileDesc, ArgType::VoidBuf, ArgType::Size]).alarm()];

const INTERRUPTIONS: usize = 3;

fn interrupted_lines(log: &Path) -> usize {
    std::fs::read_to_string(log).map(|trace| trace.lines().filter(|line| line.contains("interrupted by SIGALRM")).count()).unwrap_or(0)
}

#[test]
fn alarm_interrupts_blocking_reads() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("trace.log");
    let config = Config::builder()
        .children(1)
        .output(dir.path().join("out"))
        .log_file(&log)
        .hang_threshold(Duration::from_secs(5))
        .shutdown_grace(Duration::from_secs(2))
        .build()
        .unwrap();

    let fuzzer = Fuzzer::with_definitions(config, BLOCKING).unwrap();
    fuzzer.setup().unwrap();

    let (first, last) = std::thread::scope(|scope| {
        let watcher = scope.spawn(|| {
            let deadline = Instant::now() + Duration::from_secs(60);
            let worker = fuzzer.pool().get_child_from_index(0).unwrap();

            while worker.is_empty() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }

            let first = worker.pid();

            while interrupted_lines(&log) < INTERRUPTIONS && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(100));
            }

            let last = worker.pid();
            fuzzer.shutdown();
            (first, last)
        });

        let stats = fuzzer.start().unwrap();
        assert!(stats.supervisor.unwrap().success());
        watcher.join().unwrap()
    });

    // The same worker survived every interruption
    assert_ne!(first, EMPTY);
    assert_eq!(first, last);
    assert!(interrupted_lines(&log) >= INTERRUPTIONS);

    let trace = std::fs::read_to_string(&log).unwrap();
    assert!(!trace.contains("Killed worker"));
}
