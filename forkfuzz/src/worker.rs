//! The loop every worker process runs.
//!
//! A worker picks a syscall, generates and mutates its arguments, logs them, invokes the
//! syscall and logs the result until the run is stopped. Any error ends the worker through
//! [`exit_child`] and the supervisor replaces it.

use thiserror::Error;

use crate::{
    child::{
        ChildContext,
        HandshakeSender,
    },
    logger::Logger,
    map::SharedMap,
    mutate::mutate_arguments,
    random::{
        Random,
        RandomError,
    },
    record::{
        log_arguments,
        log_interrupted,
        log_results,
    },
    runtime::Fuzzer,
    signals,
    syscall::{
        generate_arguments,
        test_syscall,
        GenerateError,
        Resources,
        SyscallTable,
        TableError,
    },
};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("There is no slot with index {0}")]
    InvalidSlot(usize),

    #[error("Slot {index} does not hold the pid of this worker")]
    SlotMismatch {
        index: usize,
    },

    #[error("Can't install signal handlers: {0}")]
    Signals(std::io::Error),

    #[error("Can't seed the random number generator: {0}")]
    Seed(RandomError),

    #[error("The random number generator is not configured")]
    UnknownRandomMethod,

    #[error("Can't open the scratch resources: {0}")]
    Resources(GenerateError),

    #[error("Can't complete the handshake: {0}")]
    Handshake(std::io::Error),

    #[error("Can't select a syscall: {0}")]
    Table(#[from] TableError),

    #[error("Can't generate arguments: {0}")]
    Generate(#[from] GenerateError),

    #[error("Can't mutate arguments: {0}")]
    Mutate(#[from] RandomError),

    #[error("Can't write the syscall trace: {0}")]
    Log(std::io::Error),
}

/// Release the slot, update the worker count and end the process without unwinding
/// or running destructors.
pub fn exit_child(child: &ChildContext, map: &SharedMap, code: i32) -> ! {
    child.vacate(unsafe { libc::getpid() }, map);

    unsafe { libc::_exit(code) }
}

struct Worker<'a> {
    map: &'a SharedMap,
    table: &'a SyscallTable,
    child: &'a ChildContext,
    logger: Logger,
    rng: Random,
    resources: Resources,
}

impl<'a> Worker<'a> {
    /// Everything a worker does before it reports readiness
    fn init(fuzzer: &'a Fuzzer, index: usize, logger: Logger) -> Result<Self, WorkerError> {
        let map = fuzzer.map();
        let child = fuzzer.pool().get_child_from_index(index).ok_or(WorkerError::InvalidSlot(index))?;

        child.set_pid(unsafe { libc::getpid() });
        child.reset_activity();

        signals::install_worker_handlers(child, map).map_err(WorkerError::Signals)?;

        let method = map.random_method().ok_or(WorkerError::UnknownRandomMethod)?;
        let mut rng = Random::new(method).map_err(WorkerError::Seed)?;
        rng.reseed().map_err(WorkerError::Seed)?;

        let resources = Resources::open(&fuzzer.config().scratch_dir(), index).map_err(WorkerError::Resources)?;

        Ok(Self {
            map,
            table: fuzzer.table(),
            child,
            logger,
            rng,
            resources,
        })
    }

    fn run(&mut self) -> Result<(), WorkerError> {
        while !self.map.stop_requested() {
            self.iteration()?;
        }

        Ok(())
    }

    /// Test one randomly picked syscall
    fn iteration(&mut self) -> Result<(), WorkerError> {
        signals::clear_pending();

        let number = self.table.pick_syscall(self.child, &mut self.rng)?;
        let entry = self.table.get_entry(number)?;

        let mut args = generate_arguments(entry, self.child, &mut self.rng, &self.resources)?;
        mutate_arguments(entry, &mut args, &mut self.rng)?;

        log_arguments(&self.logger, entry, &args).map_err(WorkerError::Log)?;

        let outcome = test_syscall(entry, self.child, &args, self.map);

        // A signal that interrupted the invocation skips the rest of the iteration
        if let Some(signal) = signals::take_pending() {
            log_interrupted(&self.logger, &outcome, signal).map_err(WorkerError::Log)?;
            return Ok(());
        }

        log_results(&self.logger, &outcome).map_err(WorkerError::Log)?;

        Ok(())
    }
}

/// Entry point of a freshly forked worker for slot `index`.
///
/// Returns the exit code if setup fails before the worker was counted as running.
/// After that the process only ends through [`exit_child`].
pub fn start_syscall_child(fuzzer: &Fuzzer, index: usize, handshake: HandshakeSender) -> i32 {
    let mut logger = fuzzer.logger().detached();
    logger.set_prefix(format!("worker {}", index));

    let mut worker = match Worker::init(fuzzer, index, logger.detached()) {
        Ok(worker) => worker,
        Err(err) => {
            logger.error(format!("Setup failed: {}", err));
            return 1;
        },
    };

    let map = fuzzer.map();
    let child = worker.child;

    child.count_in(map);

    if let Err(err) = handshake.notify() {
        logger.error(WorkerError::Handshake(err).to_string());
        exit_child(child, map, 1);
    }

    let pid = unsafe { libc::getpid() };

    if fuzzer.pool().get_child_index_number(pid) != Some(index) {
        logger.error(
            WorkerError::SlotMismatch {
                index,
            }
            .to_string(),
        );
        exit_child(child, map, 1);
    }

    match worker.run() {
        Ok(()) => exit_child(child, map, 0),
        Err(err) => {
            logger.error(err.to_string());
            exit_child(child, map, 1)
        },
    }
}
