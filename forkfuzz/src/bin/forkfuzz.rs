use std::{
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::{
    Parser,
    ValueEnum,
};
use forkfuzz::{
    config::{
        Mode,
        RandomMethod,
    },
    Config,
    Fuzzer,
    Logger,
};

#[derive(Copy, Clone, ValueEnum)]
enum ModeArg {
    Syscall,
    File,
    Network,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Syscall => Mode::Syscall,
            ModeArg::File => Mode::File,
            ModeArg::Network => Mode::Network,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum RandomArg {
    Software,
    Hardware,
}

impl From<RandomArg> for RandomMethod {
    fn from(random: RandomArg) -> Self {
        match random {
            RandomArg::Software => RandomMethod::Software,
            RandomArg::Hardware => RandomMethod::Hardware,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker processes (default: number of cores)
    #[arg(short = 'n', long)]
    children: Option<usize>,

    #[arg(short, long, default_value_t = String::from("forkfuzz-out"))]
    output: String,

    #[arg(short, long, value_enum, default_value_t = ModeArg::Syscall)]
    mode: ModeArg,

    #[arg(long, value_enum, default_value_t = RandomArg::Software)]
    random: RandomArg,

    /// Use the feedback-driven fuzzing loop
    #[arg(long, default_value_t = false)]
    smart: bool,

    /// Seconds a syscall may take before its worker gets killed
    #[arg(long, default_value_t = 5)]
    hang_threshold: u64,

    /// Append the log to this file instead of printing it
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Don't log every syscall
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

fn run(args: Args) -> Result<u64, Box<dyn std::error::Error>> {
    let mut builder = Config::builder()
        .output(args.output)
        .mode(args.mode.into())
        .random(args.random.into())
        .smart_mode(args.smart)
        .hang_threshold(Duration::from_secs(args.hang_threshold))
        .trace(!args.quiet);

    if let Some(children) = args.children {
        builder = builder.children(children);
    }

    if let Some(log_file) = args.log_file {
        builder = builder.log_file(log_file);
    }

    let fuzzer = Fuzzer::new(builder.build()?)?;
    fuzzer.setup()?;
    let stats = fuzzer.start()?;

    Ok(stats.tests)
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            Logger::stdout().error(err.to_string());
            ExitCode::FAILURE
        },
    }
}
