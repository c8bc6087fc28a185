//! Stream demultiplexing for a supervised worker process.
//!
//! The worker writes protocol traffic to one stream (the *wire* stream, one
//! JSON document per line) and free-form log text to another (the
//! *diagnostics* stream), where JSON payloads are sometimes pretty-printed
//! across several lines. This crate turns raw byte chunks from both streams
//! into routed text lines:
//!
//! ```text
//! bytes ─▶ LineSplitter ─▶ wire::classify ──────────▶ Router ─▶ "wire"
//! bytes ─▶ LineSplitter ─▶ DiagnosticsAccumulator ─▶ Router ─▶ "trace"
//!                              lifecycle events ───▶ Router ─▶ "general"
//! ```
//!
//! Everything here is synchronous and owns its state explicitly. [`Demux`]
//! bundles the per-stream state behind a single `process(event)` entry point
//! so an async driver only has to feed it events in arrival order.

pub mod accumulator;
pub mod line;
pub mod router;
pub mod sink;
pub mod types;
pub mod wire;

mod demux;

pub use accumulator::{
    AccumulatorOptions, Balance, DiagnosticsAccumulator, Emitted, PatternError, RecordMarkers,
    ScanMode,
};
pub use demux::{Demux, Output};
pub use line::LineSplitter;
pub use router::{Router, RouterLabels};
pub use sink::{MemorySink, OutputSink, Sinks, TracingSink};
pub use types::{LifecycleEvent, SinkKind, StreamEvent, StreamKind, Unit};
