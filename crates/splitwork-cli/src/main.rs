//! splitwork CLI entry point.
//!
//! Usage:
//!   splitwork [-j N] [--chunk-size=N] [--] <command> [args...]
//!
//! Reads stdin, deals its lines round-robin to N copies of `<command>`, and
//! writes their outputs to stdout, merged back in input order.

use std::env;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::process::ExitCode;

use anyhow::{Context, Result};
use nix::libc;
use splitwork_kernel::config::parse_count;
use splitwork_kernel::{ExternalCommand, PipelineConfig, SplitworkError};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit code for bad command-line usage.
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the merged stream.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("splitwork: {e:#}");
            let code = e
                .downcast_ref::<SplitworkError>()
                .map_or(1, SplitworkError::exit_code);
            exit_code(code)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Help,
    Version,
    Run {
        workers: Option<usize>,
        chunk_size: Option<usize>,
        program: OsString,
        args: Vec<OsString>,
    },
}

fn run() -> Result<ExitCode> {
    let invocation = match parse_args(env::args_os().skip(1)) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("splitwork: {e}");
            eprintln!("Run 'splitwork --help' for usage.");
            return Ok(ExitCode::from(EXIT_USAGE));
        }
    };

    match invocation {
        Invocation::Help => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }
        Invocation::Version => {
            println!("splitwork {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Invocation::Run {
            workers,
            chunk_size,
            program,
            args,
        } => {
            let mut config = PipelineConfig::from_env()?;
            if let Some(n) = workers {
                config = config.with_workers(n);
            }
            if let Some(n) = chunk_size {
                config = config.with_chunk_size(n);
            }
            run_pipeline(ExternalCommand::new(program).args(args), &config)
        }
    }
}

fn print_help() {
    println!(
        r#"splitwork v{}

Usage:
  splitwork [OPTIONS] [--] <command> [args...]

Runs N copies of <command>. Line i of stdin goes to copy i mod N; the
outputs are merged back to stdout one line per copy in turn.

Options:
  -j, --workers <N>            Number of worker processes (default: CPU count)
      --chunk-size <N>         Bytes per read in splitter and merger (default: 4096)
  -h, --help                   Show this help
  -V, --version                Show version

Environment:
  SPLITWORK_WORKERS            Default worker count
  SPLITWORK_CHUNK_SIZE         Default chunk size
  RUST_LOG                     Log filter, e.g. splitwork_kernel=debug

Examples:
  splitwork -j 4 tr a-z A-Z < in.txt
  splitwork -- sed -e 's/^/> /' < in.txt
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Fork the topology over stdin/stdout, then reap it.
///
/// Every fork happens before the runtime exists, so the children start from a
/// single-threaded parent.
fn run_pipeline(command: ExternalCommand, config: &PipelineConfig) -> Result<ExitCode> {
    let input = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("failed to duplicate stdin")?;
    let output = io::stdout()
        .as_fd()
        .try_clone_to_owned()
        .context("failed to duplicate stdout")?;
    detach_stdio()?;

    tracing::info!(
        program = %command.program().to_string_lossy(),
        workers = config.workers,
        "starting pipeline"
    );
    let pipeline = splitwork_kernel::run(&command, input, Some(output), config)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to build runtime")?;
    let report = rt.block_on(pipeline.wait())?;

    match report.first_failure_code() {
        None => Ok(ExitCode::SUCCESS),
        Some(code) => Ok(exit_code(code)),
    }
}

/// Point fds 0 and 1 at /dev/null.
///
/// Forked stages inherit whatever the orchestrator holds. With the real stdin
/// and stdout parked here, only the splitter reads the input and only the
/// merger writes the output, through the duplicates handed to `run`.
fn detach_stdio() -> Result<()> {
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("failed to open /dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO] {
        nix::unistd::dup2(null.as_raw_fd(), fd)
            .with_context(|| format!("failed to redirect fd {fd} to /dev/null"))?;
    }
    Ok(())
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(status_byte(code))
}

/// Codes outside 0..=255 collapse to 1.
fn status_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn parse_args<I>(args: I) -> Result<Invocation, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut workers = None;
    let mut chunk_size = None;

    let program = loop {
        let Some(arg) = args.next() else {
            return Err("missing command".to_string());
        };
        let Some(flag) = arg.to_str() else {
            break arg;
        };
        if !flag.starts_with('-') || flag == "-" {
            break arg;
        }

        match flag {
            "--" => match args.next() {
                Some(program) => break program,
                None => return Err("missing command after --".to_string()),
            },
            "-h" | "--help" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            "-j" | "--workers" => workers = Some(count(flag, args.next())?),
            "--chunk-size" => chunk_size = Some(count(flag, args.next())?),
            _ => {
                if let Some(raw) = flag.strip_prefix("--workers=") {
                    workers = Some(parse(flag, raw)?);
                } else if let Some(raw) = flag.strip_prefix("--chunk-size=") {
                    chunk_size = Some(parse(flag, raw)?);
                } else if let Some(raw) = flag.strip_prefix("-j") {
                    workers = Some(parse("-j", raw)?);
                } else {
                    return Err(format!("unknown option: {flag}"));
                }
            }
        }
    };

    Ok(Invocation::Run {
        workers,
        chunk_size,
        program,
        args: args.collect(),
    })
}

fn count(flag: &str, value: Option<OsString>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    let raw = value
        .to_str()
        .ok_or_else(|| format!("{flag} value is not valid UTF-8"))?;
    parse(flag, raw)
}

fn parse(flag: &str, raw: &str) -> Result<usize, String> {
    parse_count(flag, raw).map_err(|e| e.to_string())
}
