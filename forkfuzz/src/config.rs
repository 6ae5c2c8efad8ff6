use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use thiserror::Error;

/// Upper bound for the number of worker slots
pub const MAX_CHILDREN: usize = 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one child process is required")]
    NoChildren,

    #[error("Too many child processes: {0} (maximum is {})", MAX_CHILDREN)]
    TooManyChildren(usize),

    #[error("Can't determine the number of cores: {0}")]
    CoreCount(std::io::Error),

    #[error("The hang threshold must be at least one second")]
    InvalidHangThreshold,

    #[error("The poll interval must not be zero")]
    InvalidPollInterval,
}

/// Which kind of target is fuzzed
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Syscall = 0,
    File = 1,
    Network = 2,
}

impl Mode {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Mode::Syscall),
            1 => Some(Mode::File),
            2 => Some(Mode::Network),
            _ => None,
        }
    }
}

/// Where random numbers come from
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RandomMethod {
    /// A seeded PRNG. Every worker reseeds it after fork.
    Software = 0,
    /// The operating system's entropy source
    Hardware = 1,
}

impl RandomMethod {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(RandomMethod::Software),
            1 => Some(RandomMethod::Hardware),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    children: usize,
    output: PathBuf,
    mode: Mode,
    random: RandomMethod,
    smart_mode: bool,
    hang_threshold: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
    log_file: Option<PathBuf>,
    trace: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            children: None,
            output: None,
            mode: Mode::Syscall,
            random: RandomMethod::Software,
            smart_mode: false,
            hang_threshold: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(5),
            log_file: None,
            trace: true,
        }
    }

    pub fn children(&self) -> usize {
        self.children
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Crash captures of the file mode go here
    pub fn crash_dir(&self) -> PathBuf {
        self.output.join("crash_dir")
    }

    /// Files and directories that generated path and descriptor arguments refer to
    pub fn scratch_dir(&self) -> PathBuf {
        self.output.join("scratch")
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn random(&self) -> RandomMethod {
        self.random
    }

    pub fn smart_mode(&self) -> bool {
        self.smart_mode
    }

    pub fn hang_threshold(&self) -> Duration {
        self.hang_threshold
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn trace(&self) -> bool {
        self.trace
    }
}

pub struct ConfigBuilder {
    children: Option<usize>,
    output: Option<PathBuf>,
    mode: Mode,
    random: RandomMethod,
    smart_mode: bool,
    hang_threshold: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
    log_file: Option<PathBuf>,
    trace: bool,
}

impl ConfigBuilder {
    /// Number of worker processes. Defaults to the number of cores.
    pub fn children(mut self, children: usize) -> Self {
        self.children = Some(children);
        self
    }

    pub fn output<P: Into<PathBuf>>(mut self, output: P) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn random(mut self, random: RandomMethod) -> Self {
        self.random = random;
        self
    }

    pub fn smart_mode(mut self, smart_mode: bool) -> Self {
        self.smart_mode = smart_mode;
        self
    }

    /// Workers whose last syscall started longer ago than this get killed by the reaper
    pub fn hang_threshold(mut self, threshold: Duration) -> Self {
        self.hang_threshold = threshold;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long the supervisor waits for workers to exit on their own at shutdown
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Whether the arguments and results of every syscall get logged
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let children = match self.children {
            Some(children) => children,
            None => std::thread::available_parallelism().map_err(ConfigError::CoreCount)?.get(),
        };

        if children == 0 {
            return Err(ConfigError::NoChildren);
        } else if children > MAX_CHILDREN {
            return Err(ConfigError::TooManyChildren(children));
        }

        if self.hang_threshold < Duration::from_secs(1) {
            return Err(ConfigError::InvalidHangThreshold);
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }

        Ok(Config {
            children,
            output: self.output.unwrap_or_else(|| PathBuf::from("forkfuzz-out")),
            mode: self.mode,
            random: self.random,
            smart_mode: self.smart_mode,
            hang_threshold: self.hang_threshold,
            poll_interval: self.poll_interval,
            shutdown_grace: self.shutdown_grace,
            log_file: self.log_file,
            trace: self.trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::builder().build().unwrap();
        assert!(config.children() >= 1);
        assert_eq!(config.mode(), Mode::Syscall);
        assert_eq!(config.hang_threshold(), Duration::from_secs(5));
        assert_eq!(config.crash_dir(), PathBuf::from("forkfuzz-out/crash_dir"));
    }

    #[test]
    fn test_paths_follow_output() {
        let config = Config::builder().output("/tmp/run-7").build().unwrap();
        let copy = config.clone();

        assert_eq!(config.output(), Path::new("/tmp/run-7"));
        assert_eq!(copy.crash_dir(), PathBuf::from("/tmp/run-7/crash_dir"));
        assert_eq!(copy.scratch_dir(), PathBuf::from("/tmp/run-7/scratch"));
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(Config::builder().children(0).build(), Err(ConfigError::NoChildren)));
        assert!(matches!(Config::builder().children(MAX_CHILDREN + 1).build(), Err(ConfigError::TooManyChildren(_))));
        assert!(matches!(Config::builder().hang_threshold(Duration::from_millis(10)).build(), Err(ConfigError::InvalidHangThreshold)));
        assert!(matches!(Config::builder().poll_interval(Duration::ZERO).build(), Err(ConfigError::InvalidPollInterval)));
    }

    #[test]
    fn test_raw_roundtrip() {
        for mode in [Mode::Syscall, Mode::File, Mode::Network] {
            assert_eq!(Mode::from_raw(mode as u32), Some(mode));
        }
        assert_eq!(Mode::from_raw(7), None);
        assert_eq!(RandomMethod::from_raw(RandomMethod::Hardware as u32), Some(RandomMethod::Hardware));
    }
}
