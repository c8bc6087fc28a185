//! Dispatch of units and lifecycle events to sinks.

use crate::demux::Output;
use crate::sink::Sinks;
use crate::types::{LifecycleEvent, SinkKind, StreamKind, Unit};

/// Fixed per-stream prefixes written in front of each unit.
///
/// An empty label writes the unit text alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterLabels {
    pub wire: String,
    pub trace: String,
}

impl Default for RouterLabels {
    fn default() -> Self {
        Self {
            wire: "[wire]".to_string(),
            trace: "[trace]".to_string(),
        }
    }
}

impl RouterLabels {
    fn for_stream(&self, stream: StreamKind) -> &str {
        match stream {
            StreamKind::Wire => &self.wire,
            StreamKind::Diagnostics => &self.trace,
        }
    }
}

/// Stateless dispatcher. No buffering, reordering or filtering.
#[derive(Debug, Clone)]
pub struct Router {
    sinks: Sinks,
    labels: RouterLabels,
}

impl Router {
    #[must_use]
    pub fn new(sinks: Sinks, labels: RouterLabels) -> Self {
        Self { sinks, labels }
    }

    pub fn route(&self, unit: &Unit) {
        let label = self.labels.for_stream(unit.origin());
        let line = if label.is_empty() {
            unit.text().to_string()
        } else {
            format!("{label} {}", unit.text())
        };
        self.sinks
            .get(SinkKind::for_stream(unit.origin()))
            .append_line(&line);
    }

    pub fn lifecycle(&self, event: &LifecycleEvent) {
        self.sinks
            .get(SinkKind::General)
            .append_line(&event.to_string());
    }

    pub fn dispatch(&self, output: &Output) {
        match output {
            Output::Unit(unit) => self.route(unit),
            Output::Lifecycle(event) => self.lifecycle(event),
        }
    }

    #[must_use]
    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }
}
