//! The syscall trace: one line with the arguments before an invocation and
//! one line with its result afterwards.
//!
//! Lines are assembled in fixed-size buffers and handed to the [`OutputWriter`]
//! in one piece, because the process may die in the very next syscall.

use std::{
    ffi::CStr,
    fmt::Write,
};

use colored::control::SHOULD_COLORIZE;
use libc::{
    c_char,
    c_int,
};

use crate::{
    fixedbuf::FixedBuf,
    logger::{
        Level,
        OutputWriter,
    },
    signals::signal_name,
    syscall::{
        ArgumentSet,
        LogType,
        Outcome,
        SyscallEntryShadow,
    },
};

/// Space for one formatted argument
const ARG_CAPACITY: usize = 1024;

/// Space for a whole line
const LINE_CAPACITY: usize = 4096;

/// Write `name: TYPE=value ...` for the upcoming invocation of `entry`
pub fn log_arguments<W: OutputWriter>(out: &W, entry: &SyscallEntryShadow, args: &ArgumentSet) -> std::io::Result<()> {
    let mut line = FixedBuf::<LINE_CAPACITY>::new();
    line.push_str(entry.name());
    line.push_str(":");

    for (ctx, arg) in entry.args().iter().zip(args.iter()) {
        let mut buf = FixedBuf::<ARG_CAPACITY>::new();

        let _ = match ctx.log_type {
            LogType::Path => match arg.as_path() {
                Some(path) => write!(buf, " {}={}", ctx.name, String::from_utf8_lossy(path.to_bytes())),
                None => write!(buf, " {}={:#x}", ctx.name, arg.value()),
            },
            LogType::Pointer => write!(buf, " {}={:#x}", ctx.name, arg.value()),
            LogType::Number => write!(buf, " {}={}", ctx.name, arg.value() as i64),
        };

        line.push_str(buf.as_str());

        if buf.is_truncated() {
            line.push_str("...");
        }
    }

    out.write(Level::Trace, line.as_str())
}

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Space for the description of an errno value
const ERRNO_CAPACITY: usize = 256;

/// Start a colored span if the terminal settings allow colors. Returns whether it did.
fn paint(line: &mut FixedBuf<LINE_CAPACITY>, color: &str) -> bool {
    let on = SHOULD_COLORIZE.should_colorize();

    if on {
        line.push_str(color);
    }

    on
}

fn push_errno(line: &mut FixedBuf<LINE_CAPACITY>, errno: c_int) {
    let mut text = [0 as c_char; ERRNO_CAPACITY];

    if unsafe { libc::strerror_r(errno, text.as_mut_ptr(), text.len()) } == 0 {
        let text = unsafe { CStr::from_ptr(text.as_ptr()) };
        line.push_str(text.to_str().unwrap_or("unknown error"));
    } else {
        let _ = write!(line, "os error {}", errno);
    }
}

/// Write `= ret` for a successful invocation or `= ret (error)` for a failed one
pub fn log_results<W: OutputWriter>(out: &W, outcome: &Outcome) -> std::io::Result<()> {
    let mut line = FixedBuf::<LINE_CAPACITY>::new();

    let painted = match outcome.errno {
        None => {
            let painted = paint(&mut line, GREEN_BOLD);
            let _ = write!(line, "= {}", outcome.ret);
            painted
        },
        Some(errno) => {
            let painted = paint(&mut line, RED);
            let _ = write!(line, "= {} (", outcome.ret);
            push_errno(&mut line, errno);
            line.push_str(")");
            painted
        },
    };

    if painted {
        line.push_str(RESET);
    }

    out.write(Level::Trace, line.as_str())
}

/// Write the result line of an invocation that was cut short by `signal`
pub fn log_interrupted<W: OutputWriter>(out: &W, outcome: &Outcome, signal: c_int) -> std::io::Result<()> {
    let mut line = FixedBuf::<LINE_CAPACITY>::new();
    let painted = paint(&mut line, YELLOW);
    let _ = write!(line, "= {} (interrupted by {})", outcome.ret, signal_name(signal));

    if painted {
        line.push_str(RESET);
    }

    out.write(Level::Trace, line.as_str())
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        ffi::CString,
    };

    use super::*;
    use crate::syscall::{
        ArgType,
        GeneratedArg,
        SyscallEntry,
        SyscallTable,
    };

    #[derive(Default)]
    struct Capture {
        lines: RefCell<Vec<(Level, String)>>,
    }

    impl OutputWriter for Capture {
        fn write(&self, level: Level, text: &str) -> std::io::Result<()> {
            self.lines.borrow_mut().push((level, text.to_string()));
            Ok(())
        }
    }

    static TABLE: &[SyscallEntry] = &[SyscallEntry::new("openat", libc::SYS_openat, &[ArgType::DirFd, ArgType::FilePath, ArgType::VoidBuf])];

    #[test]
    fn test_arguments_line() {
        let table = SyscallTable::build(TABLE).unwrap();
        let entry = table.get_entry(0).unwrap();
        let args = ArgumentSet::from(vec![
            GeneratedArg::number(libc::AT_FDCWD as i64 as u64),
            GeneratedArg::path(CString::new("/tmp/scratch/slot-0-1").unwrap()),
            GeneratedArg::number(0x1000),
        ]);

        let out = Capture::default();
        log_arguments(&out, entry, &args).unwrap();

        let lines = out.lines.borrow();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, Level::Trace);
        assert_eq!(lines[0].1, "openat: DIR_FD=-100 FILE_PATH=/tmp/scratch/slot-0-1 VOID_BUF=0x1000");
    }

    #[test]
    fn test_long_path_truncated() {
        let table = SyscallTable::build(TABLE).unwrap();
        let entry = table.get_entry(0).unwrap();
        let long = "a".repeat(8192);
        let args = ArgumentSet::from(vec![GeneratedArg::number(3), GeneratedArg::path(CString::new(long).unwrap()), GeneratedArg::number(0)]);

        let out = Capture::default();
        log_arguments(&out, entry, &args).unwrap();

        let lines = out.lines.borrow();
        assert!(lines[0].1.len() <= LINE_CAPACITY);
        assert!(lines[0].1.ends_with("VOID_BUF=0x0"));
    }

    #[test]
    fn test_results_line() {
        let out = Capture::default();
        log_results(
            &out,
            &Outcome {
                ret: 3,
                errno: None,
            },
        )
        .unwrap();
        log_results(
            &out,
            &Outcome {
                ret: -1,
                errno: Some(libc::ENOENT),
            },
        )
        .unwrap();
        log_interrupted(
            &out,
            &Outcome {
                ret: -1,
                errno: Some(libc::EINTR),
            },
            libc::SIGALRM,
        )
        .unwrap();

        let lines = out.lines.borrow();
        assert!(lines[0].1.contains("= 3"));
        assert!(lines[1].1.contains("= -1 ("));
        assert!(lines[1].1.contains("No such file or directory)"));
        assert!(lines[2].1.contains("= -1 (interrupted by SIGALRM)"));
    }

    #[test]
    fn test_unknown_errno() {
        let mut line = FixedBuf::<LINE_CAPACITY>::new();
        push_errno(&mut line, 99999);
        assert!(!line.as_str().is_empty());
    }
}
