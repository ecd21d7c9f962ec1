use std::io;
use std::os::fd::AsFd;
use std::process::ExitCode;

use clap::Parser;

use fsnotifier::config::LogLevel;
use fsnotifier::protocol::INSTANCE_LIMIT_TEXT;
use fsnotifier::watcher::InitError;
use fsnotifier::{logging, Daemon, Engine, LineReader, OutputSink};

#[derive(Parser)]
#[command(name = "fsnotifier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Companion program for watching and reporting file and directory structure modifications")]
#[command(after_help = "Verbosity is regulated via the FSNOTIFIER_LOG_LEVEL environment variable; \
possible values are: debug, info, warning, error, off; default is warning. Logs go to stderr.")]
struct Cli {
    /// Perform self-diagnostics: watch the current directory once, log at
    /// debug level, and exit
    #[arg(long)]
    selftest: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap renders --help and --version through this same path
            let bad_argument = e.use_stderr();
            let _ = e.print();
            return if bad_argument {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let level = if cli.selftest {
        LogLevel::Debug
    } else {
        LogLevel::from_env()
    };
    logging::init(level);
    tracing::info!(
        "started (v{}){}",
        env!("CARGO_PKG_VERSION"),
        if cli.selftest { " (self-test mode)" } else { "" }
    );

    let stdout = io::stdout();
    let mut out = if cli.selftest {
        OutputSink::quiet(stdout)
    } else {
        OutputSink::new(stdout)
    };

    let engine = match Engine::init() {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("{e}");
            if matches!(e, InitError::InstanceLimit(_)) {
                let _ = out.message(INSTANCE_LIMIT_TEXT);
            }
            let _ = out.give_up();
            tracing::info!("finished (2)");
            return ExitCode::from(2);
        }
    };

    // stdin's own buffering would hide pending commands from poll(2), so
    // the reader works on a duplicate of the descriptor instead
    let input = match io::stdin().as_fd().try_clone_to_owned() {
        Ok(fd) => std::fs::File::from(fd),
        Err(e) => {
            tracing::error!("cannot access stdin: {e}");
            tracing::info!("finished (3)");
            return ExitCode::from(3);
        }
    };

    let mut daemon = Daemon::new(engine, LineReader::new(input), out);
    let result = if cli.selftest {
        daemon.self_test()
    } else {
        daemon.run()
    };

    match result {
        Ok(()) => {
            tracing::info!("finished (0)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            tracing::info!("finished (3)");
            ExitCode::from(3)
        }
    }
}
