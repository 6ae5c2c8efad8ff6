use std::{
    borrow::Cow,
    fmt::Display,
    fs::{
        File,
        OpenOptions,
    },
    io::Write,
    mem::ManuallyDrop,
    os::fd::FromRawFd,
    path::Path,
    sync::Arc,
};

use colored::Colorize;
use indicatif::{
    ProgressBar,
    ProgressStyle,
};

/// Severity of a line handed to an [`OutputWriter`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Syscall trace lines. These are printed without a prefix.
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// The sink boundary for everything the fuzzer reports.
///
/// Implementations must hand the text to the operating system before returning,
/// because the calling process may be killed by the very next syscall it makes.
pub trait OutputWriter {
    fn write(&self, level: Level, text: &str) -> std::io::Result<()>;
}

#[derive(Clone)]
enum Sink {
    Stdout,
    File(Arc<File>),
}

impl Sink {
    fn write_line(&self, line: &str) -> std::io::Result<()> {
        match self {
            Sink::Stdout => {
                // Bypass the std buffer and its lock so that a forked process never waits on
                // a lock that was held by another thread at fork time.
                let stdout = ManuallyDrop::new(unsafe { File::from_raw_fd(libc::STDOUT_FILENO) });
                (&*stdout).write_all(line.as_bytes())
            },
            Sink::File(file) => (&**file).write_all(line.as_bytes()),
        }
    }
}

pub struct Logger {
    bar: Option<ProgressBar>,
    sink: Sink,
    trace: bool,
    prefix: Option<String>,
}

const ANIMATION: &[&str; 9] = &[".  ", ".. ", "...", " ..", "  .", " ..", "...", "..", ""];

impl Logger {
    /// A logger that writes every line straight to stdout
    pub fn stdout() -> Self {
        Self {
            bar: None,
            sink: Sink::Stdout,
            trace: true,
            prefix: None,
        }
    }

    /// A logger that appends every line to the file at `path`
    pub fn file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            bar: None,
            sink: Sink::File(Arc::new(file)),
            trace: true,
            prefix: None,
        })
    }

    pub(crate) fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Attach a status spinner. No ticker thread is started; the owner advances it with [`Logger::set_status`].
    pub(crate) fn with_spinner(mut self) -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(style) = ProgressStyle::with_template("{prefix:.magenta/red} {msg} {spinner}") {
            bar.set_style(style.tick_strings(ANIMATION));
        }

        bar.set_prefix("[forkfuzz]");
        self.bar = Some(bar);
        self
    }

    /// A copy of this logger without the spinner, for use in forked processes
    pub(crate) fn detached(&self) -> Self {
        Self {
            bar: None,
            sink: self.sink.clone(),
            trace: self.trace,
            prefix: self.prefix.clone(),
        }
    }

    pub(crate) fn set_prefix<S: Into<String>>(&mut self, prefix: S) {
        self.prefix = Some(prefix.into());
    }

    pub(crate) fn set_status(&self, status: impl Into<Cow<'static, str>>) {
        if let Some(bar) = &self.bar {
            bar.set_message(status.into());
            bar.tick();
        }
    }

    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    fn emit<L: Display, S: AsRef<str>>(&self, level: L, msg: S) -> std::io::Result<()> {
        let line = if let Some(prefix) = &self.prefix {
            format!("{} {}{}{} {}", level, "(".bold(), prefix.bold(), ")".bold(), msg.as_ref())
        } else {
            format!("{} {}", level, msg.as_ref())
        };

        self.emit_raw(line)
    }

    fn emit_raw(&self, mut line: String) -> std::io::Result<()> {
        if let Some(bar) = &self.bar {
            if !bar.is_hidden() {
                bar.println(line);
                return Ok(());
            }
        }

        line.push('\n');
        self.sink.write_line(&line)
    }

    pub fn info<S: AsRef<str>>(&self, msg: S) {
        let _ = self.emit("[forkfuzz::INFO]".blue().bold(), msg);
    }

    pub fn warning<S: AsRef<str>>(&self, msg: S) {
        let _ = self.emit("[forkfuzz::WARN]".yellow().bold(), msg);
    }

    pub fn debug<S: AsRef<str>>(&self, _msg: S) {
        #[cfg(debug_assertions)]
        {
            let _ = self.emit("[forkfuzz::DEBUG]".black().on_white(), _msg);
        }
    }

    pub fn error<S: AsRef<str>>(&self, msg: S) {
        let _ = self.emit("[forkfuzz::ERROR]".red().bold(), msg);
    }
}

impl OutputWriter for Logger {
    fn write(&self, level: Level, text: &str) -> std::io::Result<()> {
        match level {
            Level::Trace if self.trace => self.emit_raw(text.to_string()),
            Level::Trace => Ok(()),
            Level::Debug => {
                self.debug(text);
                Ok(())
            },
            Level::Info => self.emit("[forkfuzz::INFO]".blue().bold(), text),
            Level::Warning => self.emit("[forkfuzz::WARN]".yellow().bold(), text),
            Level::Error => self.emit("[forkfuzz::ERROR]".red().bold(), text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let mut logger = Logger::file(&path).unwrap();
        logger.write(Level::Trace, "read: FILE_DESC=3").unwrap();
        logger.info("info");

        logger.set_trace(false);
        logger.write(Level::Trace, "hidden").unwrap();

        let detached = logger.detached();
        detached.error("error");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "read: FILE_DESC=3");
        assert!(lines[1].contains("info"));
        assert!(lines[2].contains("error"));
        assert!(!content.contains("hidden"));
    }

    #[test]
    #[ignore]
    fn test_style() {
        let logger = Logger::stdout().with_spinner();
        logger.set_status("STATUS HERE");
        logger.info("info");
        logger.warning("warning");
        logger.debug("debug");
        logger.error("error");
        logger.finish();
    }
}
