//! Worker process supervision.
//!
//! [`ProcessSupervisor::start`] spawns a worker, pumps its stdout (wire) and
//! stderr (diagnostics) through [`tether_demux`], and hands back a
//! [`Session`] for sending outbound messages and shutting the worker down.

pub mod codec;
pub mod types;

mod env;
mod session;

pub use codec::WireFraming;
pub use env::DEFAULT_ENV_DENYLIST;
pub use session::{ProcessSupervisor, Session};
pub use types::{
    DEFAULT_SHUTDOWN_TIMEOUT, SendError, SessionOptions, SpawnError, StopError, WorkerCommand,
};
