//! Output sinks: where routed lines end up.
//!
//! Sinks belong to the embedding application. The demux only needs a way to
//! append one line at a time; presentation is the owner's business.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::SinkKind;

/// A destination that accepts ordered text lines.
///
/// Implementations must be cheap to call and must not panic; write failures
/// are the sink's to handle.
pub trait OutputSink: Send + Sync {
    fn append_line(&self, line: &str);
}

/// One sink per [`SinkKind`].
#[derive(Clone)]
pub struct Sinks {
    wire: Arc<dyn OutputSink>,
    trace: Arc<dyn OutputSink>,
    general: Arc<dyn OutputSink>,
}

impl Sinks {
    #[must_use]
    pub fn new(
        wire: Arc<dyn OutputSink>,
        trace: Arc<dyn OutputSink>,
        general: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            wire,
            trace,
            general,
        }
    }

    /// Send every kind to the same sink.
    #[must_use]
    pub fn uniform(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            wire: sink.clone(),
            trace: sink.clone(),
            general: sink,
        }
    }

    /// Route each kind into `tracing` events.
    #[must_use]
    pub fn tracing() -> Self {
        Self {
            wire: Arc::new(TracingSink::new(SinkKind::Wire)),
            trace: Arc::new(TracingSink::new(SinkKind::Trace)),
            general: Arc::new(TracingSink::new(SinkKind::General)),
        }
    }

    #[must_use]
    pub fn get(&self, kind: SinkKind) -> &dyn OutputSink {
        match kind {
            SinkKind::Wire => self.wire.as_ref(),
            SinkKind::Trace => self.trace.as_ref(),
            SinkKind::General => self.general.as_ref(),
        }
    }
}

impl fmt::Debug for Sinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinks").finish_non_exhaustive()
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line received so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return every line received so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OutputSink for MemorySink {
    fn append_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Emits each line as an `INFO` event on the `tether::sink` target.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    kind: SinkKind,
}

impl TracingSink {
    #[must_use]
    pub fn new(kind: SinkKind) -> Self {
        Self { kind }
    }
}

impl OutputSink for TracingSink {
    fn append_line(&self, line: &str) {
        tracing::info!(target: "tether::sink", sink = self.kind.as_str(), "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.append_line("a");
        sink.append_line("b");
        assert_eq!(sink.lines(), vec!["a", "b"]);
        assert_eq!(sink.take(), vec!["a", "b"]);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn sinks_dispatch_by_kind() {
        let wire = Arc::new(MemorySink::new());
        let trace = Arc::new(MemorySink::new());
        let general = Arc::new(MemorySink::new());
        let sinks = Sinks::new(wire.clone(), trace.clone(), general.clone());

        sinks.get(SinkKind::Wire).append_line("w");
        sinks.get(SinkKind::Trace).append_line("t");
        sinks.get(SinkKind::General).append_line("g");

        assert_eq!(wire.lines(), vec!["w"]);
        assert_eq!(trace.lines(), vec!["t"]);
        assert_eq!(general.lines(), vec!["g"]);
    }

    #[test]
    fn uniform_sinks_share_one_destination() {
        let all = Arc::new(MemorySink::new());
        let sinks = Sinks::uniform(all.clone());
        for kind in SinkKind::ALL {
            sinks.get(kind).append_line(kind.as_str());
        }
        assert_eq!(all.lines(), vec!["wire", "trace", "general"]);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tracing_sinks_emit_events_with_sink_field() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let sinks = Sinks::tracing();
            sinks.get(SinkKind::Wire).append_line("[wire] {\"id\":1}");
            sinks.get(SinkKind::General).append_line("worker exited with code 0");
        });

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2, "{output}");
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("tether::sink"));
        assert!(lines[0].contains("sink=\"wire\""));
        assert!(lines[0].contains("[wire] {\"id\":1}"));
        assert!(lines[1].contains("sink=\"general\""));
        assert!(lines[1].contains("worker exited with code 0"));
    }
}
