use std::time::{
    Duration,
    Instant,
};

use forkfuzz::{
    syscall::{
        ArgType,
        SyscallEntry,
    },
    Config,
    Fuzzer,
};

/// Syscalls without side effects outside the worker
static HARMLESS: &[SyscallEntry] = &[
    SyscallEntry::new("umask", libc::SYS_umask, &[ArgType::Mode]),
    SyscallEntry::new("getcwd", libc::SYS_getcwd, &[ArgType::VoidBuf, ArgType::Size]),
    SyscallEntry::new("getrusage", libc::SYS_getrusage, &[ArgType::Int, ArgType::Rusage]),
];

const BUDGET: u64 = 2000;

#[test]
fn run_until_budget() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("trace.log");
    let config = Config::builder()
        .children(4)
        .output(dir.path().join("out"))
        .log_file(&log)
        .shutdown_grace(Duration::from_secs(2))
        .build()
        .unwrap();

    let fuzzer = Fuzzer::with_definitions(config, HARMLESS).unwrap();
    fuzzer.setup().unwrap();
    assert!(dir.path().join("out").join("crash_dir").is_dir());

    let stats = std::thread::scope(|scope| {
        scope.spawn(|| {
            let deadline = Instant::now() + Duration::from_secs(60);

            while fuzzer.map().test_count() < BUDGET && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }

            fuzzer.shutdown();
        });

        fuzzer.start().unwrap()
    });

    assert!(stats.tests >= BUDGET);
    assert!(stats.supervisor.unwrap().success());

    for child in fuzzer.pool().iter() {
        assert!(child.is_empty());
    }
    assert_eq!(fuzzer.map().running_children(), 0);

    let trace = std::fs::read_to_string(&log).unwrap();
    let results = trace.lines().filter(|line| line.contains("= ")).count() as u64;
    assert!(results > 0);
    assert!(fuzzer.map().test_count() >= results);
}
