//! Public types for starting and controlling a worker.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use tether_demux::{AccumulatorOptions, RecordMarkers, RouterLabels};

use crate::codec::WireFraming;
use crate::env::DEFAULT_ENV_DENYLIST;

/// Default grace period between the termination request and a forced kill.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable name (looked up in `PATH`) or path.
    pub program: String,
    pub args: Vec<String>,
    /// Applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// How a session processes and frames the worker's streams.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub markers: RecordMarkers,
    pub accumulator: AccumulatorOptions,
    pub labels: RouterLabels,
    pub framing: WireFraming,
    /// Inherited variables matching these patterns are removed before spawn.
    pub env_denylist: Vec<String>,
    /// `None` waits for the worker indefinitely after a termination request.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            markers: RecordMarkers::default(),
            accumulator: AccumulatorOptions::default(),
            labels: RouterLabels::default(),
            framing: WireFraming::default(),
            env_denylist: DEFAULT_ENV_DENYLIST
                .iter()
                .map(ToString::to_string)
                .collect(),
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

/// The worker could not be launched.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("{program} not found in PATH")]
    NotFound { program: String },
    #[error("permission denied launching {program}")]
    PermissionDenied {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("spawning {program}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("no {0} pipe from child")]
    MissingPipe(&'static str),
}

impl SpawnError {
    pub(crate) fn from_io(program: &str, source: io::Error) -> Self {
        let program = program.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { program },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { program, source },
            _ => Self::Io { program, source },
        }
    }
}

/// Failure while terminating the worker. Reported to the "general" sink by
/// [`Session::stop`](crate::Session::stop), never returned.
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("termination request failed")]
    Signal(#[source] io::Error),
    #[error("kill failed")]
    Kill(#[source] io::Error),
    #[error("lost track of the worker process before it exited")]
    Detached,
}

/// The outbound wire channel is closed.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("session is stopped")]
    Stopped,
    #[error("wire writer closed")]
    WriterClosed,
}
