//! The [`Fuzzer`] wires the shared state, the syscall table, the reaper and the
//! supervisor together.

use std::{
    path::PathBuf,
    sync::atomic::{
        AtomicI32,
        Ordering,
    },
};

use libc::pid_t;
use thiserror::Error;

use crate::{
    child::{
        ChildPool,
        PoolError,
    },
    concurrent::{
        wait_on,
        WaitStatus,
    },
    config::{
        Config,
        Mode,
    },
    logger::Logger,
    map::SharedMap,
    reaper::{
        setup_reaper_module,
        ReaperError,
    },
    shm::{
        Shared,
        SharedMemoryError,
    },
    signals,
    supervisor::start_main_syscall_loop,
    syscall::{
        linux,
        SyscallEntry,
        SyscallTable,
        TableError,
    },
};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Can't open the log file: {0}")]
    Logger(std::io::Error),

    #[error("Can't create the shared map: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Syscall table error: {0}")]
    Table(#[from] TableError),

    #[error("Reaper error: {0}")]
    Reaper(#[from] ReaperError),

    #[error("Can't create the output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Can't install the stop handler: {0}")]
    Signals(std::io::Error),

    #[error("The {0:?} mode is not supported")]
    UnsupportedMode(Mode),

    #[error("Can't fork the supervisor: {0}")]
    Fork(std::io::Error),

    #[error("Can't wait for process {pid}: {source}")]
    Wait {
        pid: pid_t,
        source: std::io::Error,
    },
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Number of syscalls invoked by all workers
    pub tests: u64,
    /// How the supervisor process terminated
    pub supervisor: Option<WaitStatus>,
}

/// A syscall fuzzer with a fixed number of worker slots.
///
/// Build it with [`Fuzzer::new`], prepare the run with [`Fuzzer::setup`] and block in
/// [`Fuzzer::start`] until a SIGINT, SIGTERM or [`Fuzzer::shutdown`] stops it.
pub struct Fuzzer {
    config: Config,
    map: Shared<SharedMap>,
    pool: ChildPool,
    table: SyscallTable,
    logger: Logger,
}

impl Fuzzer {
    pub fn new(config: Config) -> Result<Self, RuntimeError> {
        Self::with_definitions(config, linux::TABLE)
    }

    /// Create a fuzzer that only tests the syscalls in `definitions`
    pub fn with_definitions(config: Config, definitions: &[SyscallEntry]) -> Result<Self, RuntimeError> {
        let mut logger = match config.log_file() {
            Some(path) => Logger::file(path).map_err(RuntimeError::Logger)?,
            None if cfg!(feature = "tui") => Logger::stdout().with_spinner(),
            None => Logger::stdout(),
        };
        logger.set_trace(config.trace());

        let map = SharedMap::create(&config)?;
        let pool = ChildPool::new(config.children())?;
        let table = SyscallTable::build(definitions)?;

        if unsafe { libc::geteuid() } != 0 {
            for entry in table.entries() {
                if entry.requires_root() {
                    table.disable(entry.entry_number())?;
                }
            }
        }

        Ok(Self {
            config,
            map,
            pool,
            table,
            logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn map(&self) -> &SharedMap {
        &self.map
    }

    pub fn pool(&self) -> &ChildPool {
        &self.pool
    }

    pub fn table(&self) -> &SyscallTable {
        &self.table
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Create the output root with its crash capture and scratch subdirectories
    pub fn create_out_directory(&self) -> Result<(), RuntimeError> {
        for path in [self.config.output().to_path_buf(), self.config.crash_dir(), self.config.scratch_dir()] {
            std::fs::create_dir_all(&path).map_err(|source| RuntimeError::OutputDirectory {
                path,
                source,
            })?;
        }

        Ok(())
    }

    /// Prepare a run in the configured mode
    pub fn setup(&self) -> Result<(), RuntimeError> {
        match self.config.mode() {
            Mode::Syscall => self.setup_syscall_module(),
            mode => Err(RuntimeError::UnsupportedMode(mode)),
        }
    }

    /// Create the output directory, install the stop handler and fork the reaper
    pub fn setup_syscall_module(&self) -> Result<(), RuntimeError> {
        self.create_out_directory()?;
        signals::install_stop_handler(&self.map).map_err(RuntimeError::Signals)?;

        let reaper = setup_reaper_module(self)?;
        self.logger.debug(format!("Reaper running as {}", reaper));

        if self.map.smart_mode() {
            self.logger.warning("Smart mode is not available, workers fuzz without feedback");
        }

        self.logger.info(format!("Fuzzing {} syscalls with {} workers", self.table.number_of_syscalls(), self.pool.len()));

        Ok(())
    }

    /// Fork the supervisor and block until it and every auxiliary process exited
    pub fn start(&self) -> Result<RunStats, RuntimeError> {
        let pid = unsafe { libc::fork() };

        if pid < 0 {
            return Err(RuntimeError::Fork(std::io::Error::last_os_error()));
        } else if pid == 0 {
            self.map.set_runloop_pid(unsafe { libc::getpid() });
            start_main_syscall_loop(self);
            unsafe { libc::_exit(0) };
        }

        self.map.set_runloop_pid(pid);

        let supervisor = self.join(self.map.runloop_pid())?;

        // The supervisor only returns once the run was stopped, unless it died
        self.map.request_stop();

        self.join(self.map.reaper_pid())?;
        self.join(self.map.socket_server_pid())?;

        let tests = self.map.test_count();
        self.logger.info(format!("Syscall tests completed: {}", tests));

        Ok(RunStats {
            tests,
            supervisor,
        })
    }

    fn join(&self, pid: &AtomicI32) -> Result<Option<WaitStatus>, RuntimeError> {
        wait_on(pid).map_err(|source| RuntimeError::Wait {
            pid: pid.load(Ordering::Acquire),
            source,
        })
    }

    /// Ask every process of the run to stop
    pub fn shutdown(&self) {
        self.map.request_stop();
    }
}
