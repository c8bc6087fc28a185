//! tether CLI - runs one worker and demultiplexes its stdio.
//!
//! ```text
//! main() -> load config -> ProcessSupervisor::start() -> wait | Ctrl-C
//!                                                            |
//!                                                            v
//!                                       Session::dispose() -> exit code
//! ```

mod sinks;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitCode, ExitStatus};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tether_config::TetherConfig;
use tether_supervisor::{ProcessSupervisor, WorkerCommand};

/// tether's own log file inside `--log-dir`.
const LOG_FILE_NAME: &str = "tether.log";

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Run a worker process and split its output into wire, trace and general sinks"
)]
struct Cli {
    /// Config file. Defaults to $TETHER_CONFIG, then ~/.tether/config.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append each sink to <DIR>/<sink>.log instead of stdout/stderr.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Worker command line. Overrides `[worker] command` and `args`.
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn init_tracing(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
        return;
    };

    let path = dir.join(LOG_FILE_NAME);
    let opened = fs::create_dir_all(dir).and_then(|()| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
    });
    match opened {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
            tracing::info!(path = %path.display(), "Logging initialized");
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .init();
            tracing::warn!("Failed to open log file {}: {e}", path.display());
        }
    }
}

/// The command line after `--` wins over the configured worker.
fn worker_command(cli_command: &[String], config: &TetherConfig) -> Option<WorkerCommand> {
    let Some((program, args)) = cli_command.split_first() else {
        return config.worker_command();
    };
    let mut command = WorkerCommand::new(program.clone());
    command.args = args.to_vec();
    command.env = config.worker_env();
    Some(command)
}

/// Mirror the worker's exit. Signal deaths map to 128 + signal, as shells do.
fn exit_code(status: Option<ExitStatus>) -> ExitCode {
    let Some(status) = status else {
        return ExitCode::FAILURE;
    };
    if let Some(code) = status.code() {
        return u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from);
    }
    signal_exit_code(status)
}

#[cfg(unix)]
fn signal_exit_code(status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;

    status
        .signal()
        .and_then(|sig| u8::try_from(128 + sig).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: ExitStatus) -> ExitCode {
    ExitCode::FAILURE
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = TetherConfig::load(cli.config.as_deref())
        .context("loading config")?
        .unwrap_or_default();
    let command = worker_command(&cli.command, &config)
        .context("no worker command: pass one after `--` or set [worker] command")?;
    let options = config
        .session_options()
        .context("building session options")?;
    let sinks = match &cli.log_dir {
        Some(dir) => sinks::file_sinks(dir)?,
        None => sinks::stdio_sinks(),
    };

    let supervisor = ProcessSupervisor::new(options, sinks);
    let session = supervisor
        .start(&command)
        .with_context(|| format!("starting {}", command.program))?;

    tokio::select! {
        _ = session.wait() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                tracing::info!(pid = session.pid(), "Interrupted, stopping worker");
                session.stop().await;
            }
            Err(e) => {
                tracing::warn!("Listening for Ctrl-C failed: {e}");
                session.wait().await;
            }
        },
    }

    let status = session.exit_status();
    session.dispose().await;

    Ok(exit_code(status))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_dir.as_deref());
    run(cli).await
}
