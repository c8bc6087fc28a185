//! Shared vocabulary between the demux stages and the process supervisor.

use std::fmt;

/// One of the worker's two output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output: protocol traffic, one JSON document per line.
    Wire,
    /// Standard error: log records with occasional embedded payloads.
    Diagnostics,
}

impl StreamKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wire => "wire",
            Self::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named output destination owned by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Mirror of protocol traffic read from the wire stream.
    Wire,
    /// Reconstructed diagnostics payloads and passthrough log lines.
    Trace,
    /// Lifecycle and error events.
    General,
}

impl SinkKind {
    pub const ALL: [Self; 3] = [Self::Wire, Self::Trace, Self::General];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wire => "wire",
            Self::Trace => "trace",
            Self::General => "general",
        }
    }

    /// Destination for units that originate on `stream`.
    #[must_use]
    pub const fn for_stream(stream: StreamKind) -> Self {
        match stream {
            StreamKind::Wire => Self::Wire,
            StreamKind::Diagnostics => Self::Trace,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed structured unit or a passthrough log line, tagged with the
/// stream it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    origin: StreamKind,
    text: String,
}

impl Unit {
    #[must_use]
    pub fn new(origin: StreamKind, text: String) -> Self {
        Self { origin, text }
    }

    #[must_use]
    pub fn origin(&self) -> StreamKind {
        self.origin
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

/// Worker lifecycle notification, written as one line to the "general" sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Spawned { program: String, pid: u32 },
    /// `code` is `None` when the worker was terminated by a signal.
    Exited { code: Option<i32> },
    StopRequested,
    StopFailed { error: String },
    StreamClosed { stream: StreamKind },
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawned { program, pid } => write!(f, "worker started: {program} (pid {pid})"),
            Self::Exited { code: Some(code) } => write!(f, "worker exited with code {code}"),
            Self::Exited { code: None } => f.write_str("worker exited (terminated by signal)"),
            Self::StopRequested => f.write_str("stop requested"),
            Self::StopFailed { error } => write!(f, "stop failed: {error}"),
            Self::StreamClosed { stream } => write!(f, "{stream} stream closed"),
        }
    }
}

/// Input to [`crate::Demux::process`]: one event from the worker's IO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes read from a stream. Boundaries carry no meaning.
    Chunk { stream: StreamKind, bytes: Vec<u8> },
    /// End of data on a stream.
    Eof { stream: StreamKind },
    /// The worker process exited.
    Exited { code: Option<i32> },
}
