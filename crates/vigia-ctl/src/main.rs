//! vigia-ctl
//!
//! Sends control messages to a process running vigia diagnostics.
//!
//! # Usage
//!
//! ```bash
//! vigia-ctl log_lvl <off|min|std|max> <pid>
//! vigia-ctl dump_ord [norm|detl|extd|full] <pid>
//! ```
//!
//! Exits with 0 once the signal is queued, 1 on any validation or dispatch
//! failure.

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing_subscriber::EnvFilter;
use vigia_core::{DiagError, DumpLevel, LogLevel, dispatch_dump, dispatch_level};

#[derive(Debug, Parser)]
#[command(name = "vigia-ctl", version)]
#[command(about = "Remote control for vigia runtime diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set the log level of a process
    #[command(name = "log_lvl")]
    LogLevel {
        /// New level: off, min, std or max
        #[arg(value_parser = parse_log_level)]
        level: LogLevel,
        /// Target process id
        pid: String,
    },
    /// Ask a process for a memory-map dump
    #[command(name = "dump_ord")]
    DumpOrder {
        /// Optional detail (norm, detl, extd or full; default norm) followed
        /// by the target process id
        #[arg(num_args = 1..=2, value_name = "[LEVEL] PID", required = true)]
        args: Vec<String>,
    },
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    s.parse().map_err(|e: DiagError| e.to_string())
}

/// A validated request, ready to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Level(i32, LogLevel),
    Dump(i32, DumpLevel),
}

impl Request {
    fn from_command(command: Command) -> Result<Self, DiagError> {
        match command {
            Command::LogLevel { level, pid } => Ok(Self::Level(parse_pid(&pid)?, level)),
            Command::DumpOrder { args } => {
                let (level, pid) = match args.as_slice() {
                    [pid] => (DumpLevel::Normal, pid),
                    [level, pid] => (level.parse()?, pid),
                    _ => {
                        return Err(DiagError::invalid_argument(
                            "expected [LEVEL] PID for dump_ord",
                        ));
                    }
                };
                Ok(Self::Dump(parse_pid(pid)?, level))
            }
        }
    }

    const fn pid(self) -> i32 {
        match self {
            Self::Level(pid, _) | Self::Dump(pid, _) => pid,
        }
    }

    fn dispatch(self) -> Result<(), DiagError> {
        match self {
            Self::Level(pid, level) => dispatch_level(pid, level),
            Self::Dump(pid, level) => dispatch_dump(pid, level),
        }
    }
}

fn parse_pid(raw: &str) -> Result<i32, DiagError> {
    match raw.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(DiagError::invalid_argument(format!(
            "invalid pid number: {raw}"
        ))),
    }
}

/// Checks the pid with the null signal. EPERM still means it exists.
fn ensure_alive(pid: i32) -> Result<(), DiagError> {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(()),
        Err(_) => Err(DiagError::invalid_argument(format!(
            "no process with pid number: {pid}"
        ))),
    }
}

fn run(cli: Cli) -> Result<Request, DiagError> {
    let request = Request::from_command(cli.command)?;
    ensure_alive(request.pid())?;
    request.dispatch()?;
    Ok(request)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(request) => {
            tracing::info!(?request, "control signal queued");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e} (code {})", e.code().as_raw());
            if matches!(e, DiagError::InvalidArgument(_)) {
                eprintln!();
                eprintln!("Usage:");
                eprintln!("  vigia-ctl log_lvl <off|min|std|max> <pid>");
                eprintln!("  vigia-ctl dump_ord [norm|detl|extd|full] <pid>");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn request(args: &[&str]) -> Result<Request, DiagError> {
        let cli = Cli::try_parse_from(std::iter::once("vigia-ctl").chain(args.iter().copied()))
            .map_err(|e| DiagError::invalid_argument(e.to_string()))?;
        Request::from_command(cli.command)
    }

    #[test]
    fn test_log_level_request() {
        assert_eq!(
            request(&["log_lvl", "std", "1234"]).unwrap(),
            Request::Level(1234, LogLevel::Standard)
        );
        assert_eq!(
            request(&["log_lvl", "off", "1"]).unwrap(),
            Request::Level(1, LogLevel::Off)
        );
    }

    #[test]
    fn test_dump_defaults_to_normal() {
        assert_eq!(
            request(&["dump_ord", "77"]).unwrap(),
            Request::Dump(77, DumpLevel::Normal)
        );
        assert_eq!(
            request(&["dump_ord", "extd", "77"]).unwrap(),
            Request::Dump(77, DumpLevel::Extended)
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(request(&["log_lvl", "loud", "1"]).is_err());
        assert!(request(&["dump_ord", "huge", "1"]).is_err());
        assert!(request(&["log_lvl", "min"]).is_err());
        assert!(request(&["dump_ord"]).is_err());
        assert!(request(&["dump_ord", "norm", "1", "2"]).is_err());
        assert!(request(&["reboot", "1"]).is_err());
    }

    #[test]
    fn test_pid_validation() {
        assert_eq!(parse_pid("42").unwrap(), 42);
        assert!(parse_pid("0").is_err());
        assert!(parse_pid("-3").is_err());
        assert!(parse_pid("abc").is_err());
        assert!(request(&["dump_ord", "full", "0"]).is_err());
    }

    #[test]
    fn test_liveness_check() {
        assert!(ensure_alive(std::process::id() as i32).is_ok());
        assert!(ensure_alive(i32::MAX).is_err());
    }
}
