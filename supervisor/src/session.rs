//! Worker session: owns the child process and the tasks around it.
//!
//! ```text
//!  stdout ─▶ pump ──┐
//!  stderr ─▶ pump ──┼─▶ events ─▶ pipeline (Demux + Router) ─▶ sinks
//!  child  ─▶ watch ─┘
//!  stdin  ◀─ writer ◀─ Session::send
//! ```
//!
//! All stream state lives in the pipeline task, which handles one event at a
//! time. The watcher task is the only owner of the `Child`, so termination
//! requests are funnelled to it over a control channel.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use tether_demux::{
    Demux, DiagnosticsAccumulator, LifecycleEvent, Router, Sinks, StreamEvent, StreamKind,
};

use crate::codec::{FrameWriter, WireFraming};
use crate::env;
use crate::types::{SendError, SessionOptions, SpawnError, StopError, WorkerCommand};

const EVENT_CHANNEL_CAPACITY: usize = 256;

const WRITER_CHANNEL_CAPACITY: usize = 64;

const CONTROL_CHANNEL_CAPACITY: usize = 4;

const READ_BUFFER_BYTES: usize = 8 * 1024;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

type ControlReply = oneshot::Sender<Result<(), StopError>>;

enum ChildControl {
    Terminate(ControlReply),
    Kill(ControlReply),
}

/// Starts workers with a fixed set of options and sinks.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    options: SessionOptions,
    sinks: Sinks,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(options: SessionOptions, sinks: Sinks) -> Self {
        Self { options, sinks }
    }

    /// Spawn `command` and start routing its output.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, command: &WorkerCommand) -> Result<Session, SpawnError> {
        Session::start(command, &self.options, self.sinks.clone())
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}

/// A running (or finished) worker.
///
/// `stop` is idempotent and never fails; `dispose` stops the worker and then
/// waits for every background task to finish. Dropping a session without
/// stopping it kills the worker.
pub struct Session {
    program: String,
    pid: u32,
    router: Router,
    writer_tx: mpsc::Sender<WriterCommand>,
    control_tx: mpsc::Sender<ChildControl>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    stopped: AtomicBool,
    stop_lock: Mutex<()>,
    shutdown_timeout: Option<Duration>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn start(
        command: &WorkerCommand,
        options: &SessionOptions,
        sinks: Sinks,
    ) -> Result<Self, SpawnError> {
        let program = command.program.clone();
        // Fall back to the literal name so the OS reports why it can't run.
        let resolved = which::which(&program).unwrap_or_else(|e| {
            tracing::debug!(program = %program, "Executable lookup failed: {e}");
            PathBuf::from(&program)
        });

        let mut cmd = Command::new(&resolved);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        env::apply_environment(
            &mut cmd,
            std::env::vars_os().filter_map(|(key, _)| key.into_string().ok()),
            &options.env_denylist,
            &command.env,
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&program, e))?;

        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SpawnError::MissingPipe("stderr"))?;
        let pid = child.id().unwrap_or_default();

        let router = Router::new(sinks, options.labels.clone());
        tracing::info!(program = %program, pid, "Worker started");
        router.lifecycle(&LifecycleEvent::Spawned {
            program: program.clone(),
            pid,
        });

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);

        let demux = Demux::new(DiagnosticsAccumulator::new(
            options.markers.clone(),
            options.accumulator.clone(),
        ));

        let tasks = vec![
            tokio::spawn(run_pipeline(demux, router.clone(), event_rx)),
            tokio::spawn(pump(stdout, StreamKind::Wire, event_tx.clone())),
            tokio::spawn(pump(stderr, StreamKind::Diagnostics, event_tx.clone())),
            tokio::spawn(watch_child(child, control_rx, exit_tx, event_tx)),
            tokio::spawn(run_writer(stdin, options.framing, writer_rx)),
        ];

        Ok(Self {
            program,
            pid,
            router,
            writer_tx,
            control_tx,
            exit_rx,
            stopped: AtomicBool::new(false),
            stop_lock: Mutex::new(()),
            shutdown_timeout: options.shutdown_timeout,
            tasks,
        })
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Exit status, if the worker has exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit_rx.borrow()
    }

    /// Wait for the worker to exit. `None` if its status could not be
    /// collected.
    pub async fn wait(&self) -> Option<ExitStatus> {
        wait_for_exit(self.exit_rx.clone()).await.ok()
    }

    /// Queue `message` on the outbound wire channel.
    pub async fn send(&self, message: serde_json::Value) -> Result<(), SendError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SendError::Stopped);
        }
        self.writer_tx
            .send(WriterCommand::Send(message))
            .await
            .map_err(|_| SendError::WriterClosed)
    }

    /// Ask the worker to terminate and wait for it to exit.
    ///
    /// Only the first call does anything, and nothing is requested from a
    /// worker that has already exited. Failures are written to the "general"
    /// sink instead of being returned.
    pub async fn stop(&self) {
        let _guard = self.stop_lock.lock().await;
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(pid = self.pid, "Ignoring stop on stopped session");
            return;
        }
        if self.exit_status().is_some() {
            tracing::debug!(pid = self.pid, "Worker already exited, nothing to stop");
            let _ = self.writer_tx.try_send(WriterCommand::Shutdown);
            return;
        }

        tracing::info!(pid = self.pid, "Stopping worker");
        self.router.lifecycle(&LifecycleEvent::StopRequested);

        if let Err(e) = self.terminate().await {
            tracing::warn!(pid = self.pid, "Worker stop failed: {e}");
            self.router.lifecycle(&LifecycleEvent::StopFailed {
                error: e.to_string(),
            });
        }
    }

    /// Stop the worker, then wait until every queued line has been routed.
    pub async fn dispose(mut self) {
        self.stop().await;
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::warn!(pid = self.pid, "Session task panicked: {e}");
            }
        }
    }

    async fn terminate(&self) -> Result<(), StopError> {
        // Closing stdin is the first shutdown signal a stdio worker sees. A
        // full queue means the worker stopped reading; go straight to the signal.
        let _ = self.writer_tx.try_send(WriterCommand::Shutdown);

        if self.exit_status().is_some() {
            return Ok(());
        }
        self.control(ChildControl::Terminate).await?;

        let exited = wait_for_exit(self.exit_rx.clone());
        let Some(timeout) = self.shutdown_timeout else {
            return exited.await.map(drop);
        };
        match tokio::time::timeout(timeout, exited).await {
            Ok(result) => result.map(drop),
            Err(_) => {
                tracing::debug!(pid = self.pid, "Worker didn't exit in time, killing");
                self.control(ChildControl::Kill).await?;
                wait_for_exit(self.exit_rx.clone()).await.map(drop)
            }
        }
    }

    async fn control(&self, request: fn(ControlReply) -> ChildControl) -> Result<(), StopError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control_tx.send(request(reply_tx)).await.is_err() {
            // The watcher only finishes once the worker has exited.
            return Ok(());
        }
        reply_rx.await.unwrap_or(Ok(()))
    }
}

async fn wait_for_exit(
    mut exit_rx: watch::Receiver<Option<ExitStatus>>,
) -> Result<ExitStatus, StopError> {
    loop {
        let current = *exit_rx.borrow_and_update();
        if let Some(status) = current {
            return Ok(status);
        }
        if exit_rx.changed().await.is_err() {
            let last = *exit_rx.borrow();
            return last.ok_or(StopError::Detached);
        }
    }
}

async fn run_pipeline(mut demux: Demux, router: Router, mut events: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = events.recv().await {
        for output in demux.process(event) {
            router.dispatch(&output);
        }
    }
    tracing::debug!("Worker pipeline drained");
}

async fn pump<R>(mut reader: R, stream: StreamKind, events: mpsc::Sender<StreamEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = StreamEvent::Chunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(%stream, "Read error on worker stream: {e}");
                break;
            }
        }
    }
    let _ = events.send(StreamEvent::Eof { stream }).await;
}

async fn run_writer<W>(stdin: W, framing: WireFraming, mut commands: mpsc::Receiver<WriterCommand>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = FrameWriter::new(stdin, framing);
    while let Some(cmd) = commands.recv().await {
        match cmd {
            WriterCommand::Send(frame) => {
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::warn!("Wire write error: {e:#}");
                    return;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
    if let Err(e) = writer.close().await {
        tracing::debug!("Closing wire channel: {e:#}");
    }
}

async fn watch_child(
    mut child: Child,
    mut control: mpsc::Receiver<ChildControl>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
    events: mpsc::Sender<StreamEvent>,
) {
    let mut session_alive = true;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = control.recv(), if session_alive => match request {
                Some(ChildControl::Terminate(reply)) => {
                    let _ = reply.send(request_termination(&mut child));
                }
                Some(ChildControl::Kill(reply)) => {
                    let _ = reply.send(child.start_kill().map_err(StopError::Kill));
                }
                None => {
                    session_alive = false;
                    tracing::debug!("Session dropped without stop, killing worker");
                    let _ = child.start_kill();
                }
            },
        }
    };

    let code = match status {
        Ok(status) => {
            tracing::info!(code = ?status.code(), "Worker exited");
            exit_tx.send_replace(Some(status));
            status.code()
        }
        Err(e) => {
            tracing::warn!("Waiting on worker failed: {e}");
            None
        }
    };
    let _ = events.send(StreamEvent::Exited { code }).await;
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> Result<(), StopError> {
    // Already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| StopError::Signal(std::io::Error::other("pid out of range")))?;
    // SAFETY: kill(2) has no memory-safety preconditions. The pid belongs to
    // a child this task owns and has not reaped, so it cannot have been reused.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(StopError::Signal(std::io::Error::last_os_error()))
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> Result<(), StopError> {
    child.start_kill().map_err(StopError::Signal)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_demux::{MemorySink, RouterLabels};

    use super::*;

    #[tokio::test]
    async fn test_pump_forwards_chunks_then_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(pump(server, StreamKind::Diagnostics, tx));

        tokio::io::AsyncWriteExt::write_all(&mut client, b"hello\nwor")
            .await
            .unwrap();
        drop(client);
        task.await.unwrap();

        let mut bytes = Vec::new();
        let mut saw_eof = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk { stream, bytes: b } => {
                    assert_eq!(stream, StreamKind::Diagnostics);
                    assert!(!saw_eof, "chunk after eof");
                    bytes.extend(b);
                }
                StreamEvent::Eof { stream } => {
                    assert_eq!(stream, StreamKind::Diagnostics);
                    saw_eof = true;
                }
                StreamEvent::Exited { .. } => panic!("pump never reports exit"),
            }
        }
        assert_eq!(bytes, b"hello\nwor");
        assert!(saw_eof);
    }

    #[tokio::test]
    async fn test_pipeline_routes_in_arrival_order() {
        let sink = Arc::new(MemorySink::new());
        let router = Router::new(Sinks::uniform(sink.clone()), RouterLabels::default());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run_pipeline(Demux::default(), router, rx));

        for event in [
            StreamEvent::Chunk {
                stream: StreamKind::Wire,
                bytes: b"{\"id\":1}\nnoise\n".to_vec(),
            },
            StreamEvent::Chunk {
                stream: StreamKind::Diagnostics,
                bytes: b"[INFO  srv] {\n\"a\":1\n}\n".to_vec(),
            },
            StreamEvent::Exited { code: Some(0) },
        ] {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                "[wire] {\"id\":1}",
                "[trace] [INFO  srv] { \"a\":1 }",
                "worker exited with code 0",
            ]
        );
    }

    #[tokio::test]
    async fn test_writer_frames_until_shutdown() {
        let (client, mut server) = tokio::io::duplex(256);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_writer(client, WireFraming::Newline, rx));

        tx.send(WriterCommand::Send(serde_json::json!({"id": 1})))
            .await
            .unwrap();
        tx.send(WriterCommand::Shutdown).await.unwrap();
        // Queued after shutdown: never written.
        let _ = tx
            .send(WriterCommand::Send(serde_json::json!({"id": 2})))
            .await;
        task.await.unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"{\"id\":1}\n");
    }

    #[tokio::test]
    async fn test_writer_stops_when_session_side_drops() {
        let (client, mut server) = tokio::io::duplex(256);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run_writer(client, WireFraming::ContentLength, rx));
        drop(tx);
        task.await.unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut out)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_exit_detached_when_watcher_gone() {
        let (exit_tx, exit_rx) = watch::channel(None);
        drop(exit_tx);
        assert!(matches!(
            wait_for_exit(exit_rx).await,
            Err(StopError::Detached)
        ));
    }
}
