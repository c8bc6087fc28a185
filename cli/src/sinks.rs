//! Sinks backed by the terminal or by per-sink log files.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tether_demux::{OutputSink, SinkKind, Sinks};

/// Writes each line to a shared writer and flushes it.
pub(crate) struct WriterSink {
    name: &'static str,
    out: Mutex<Box<dyn Write + Send>>,
}

impl WriterSink {
    pub(crate) fn new(name: &'static str, out: Box<dyn Write + Send>) -> Self {
        Self {
            name,
            out: Mutex::new(out),
        }
    }
}

impl OutputSink for WriterSink {
    fn append_line(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!(sink = self.name, "Sink write failed: {e}");
        }
    }
}

/// "wire" to stdout; "trace" and "general" share stderr.
pub(crate) fn stdio_sinks() -> Sinks {
    let stderr: Arc<dyn OutputSink> = Arc::new(WriterSink::new("stderr", Box::new(io::stderr())));
    Sinks::new(
        Arc::new(WriterSink::new("stdout", Box::new(io::stdout()))),
        stderr.clone(),
        stderr,
    )
}

/// One `<dir>/<sink>.log` file per sink, opened for append.
pub(crate) fn file_sinks(dir: &Path) -> Result<Sinks> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let open = |kind: SinkKind| -> Result<Arc<dyn OutputSink>> {
        let path = dir.join(format!("{}.log", kind.as_str()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening sink file {}", path.display()))?;
        Ok(Arc::new(WriterSink::new(kind.as_str(), Box::new(file))))
    };

    Ok(Sinks::new(
        open(SinkKind::Wire)?,
        open(SinkKind::Trace)?,
        open(SinkKind::General)?,
    ))
}
