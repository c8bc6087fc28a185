//! Single-owner event processor tying the stages together.

use crate::accumulator::{DiagnosticsAccumulator, Emitted};
use crate::line::LineSplitter;
use crate::types::{LifecycleEvent, StreamEvent, StreamKind, Unit};
use crate::wire;

/// Something for the [`Router`](crate::Router) to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Unit(Unit),
    Lifecycle(LifecycleEvent),
}

/// Owns every piece of per-stream state for one worker.
///
/// Feed events in arrival order; each call runs to completion, so state is
/// never touched by two events at once.
#[derive(Debug, Default)]
pub struct Demux {
    wire_lines: LineSplitter,
    diagnostics_lines: LineSplitter,
    accumulator: DiagnosticsAccumulator,
}

impl Demux {
    #[must_use]
    pub fn new(accumulator: DiagnosticsAccumulator) -> Self {
        Self {
            wire_lines: LineSplitter::new(),
            diagnostics_lines: LineSplitter::new(),
            accumulator,
        }
    }

    pub fn process(&mut self, event: StreamEvent) -> Vec<Output> {
        let mut out = Vec::new();
        match event {
            StreamEvent::Chunk { stream, bytes } => {
                for line in self.splitter(stream).feed(&bytes) {
                    self.handle_line(stream, line, &mut out);
                }
            }
            StreamEvent::Eof { stream } => {
                if let Some(line) = self.splitter(stream).flush() {
                    self.handle_line(stream, line, &mut out);
                }
                if stream == StreamKind::Diagnostics {
                    self.accumulator.discard_pending();
                }
                out.push(Output::Lifecycle(LifecycleEvent::StreamClosed { stream }));
            }
            StreamEvent::Exited { code } => {
                out.push(Output::Lifecycle(LifecycleEvent::Exited { code }));
            }
        }
        out
    }

    fn splitter(&mut self, stream: StreamKind) -> &mut LineSplitter {
        match stream {
            StreamKind::Wire => &mut self.wire_lines,
            StreamKind::Diagnostics => &mut self.diagnostics_lines,
        }
    }

    fn handle_line(&mut self, stream: StreamKind, line: String, out: &mut Vec<Output>) {
        let unit = match stream {
            StreamKind::Wire => wire::classify(line),
            StreamKind::Diagnostics => self
                .accumulator
                .push_line(line)
                .map(Unit::from),
        };
        out.extend(unit.map(Output::Unit));
    }

    /// The diagnostics accumulator, for inspection.
    #[must_use]
    pub fn accumulator(&self) -> &DiagnosticsAccumulator {
        &self.accumulator
    }
}

impl From<Emitted> for Unit {
    fn from(emitted: Emitted) -> Self {
        Unit::new(StreamKind::Diagnostics, emitted.into_text())
    }
}
