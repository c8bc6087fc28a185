//! End-to-end tests: real worker processes driven through `/bin/sh`.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tether_demux::{MemorySink, Sinks};
use tether_supervisor::{
    ProcessSupervisor, SendError, Session, SessionOptions, SpawnError, WireFraming, WorkerCommand,
};

struct Harness {
    wire: Arc<MemorySink>,
    trace: Arc<MemorySink>,
    general: Arc<MemorySink>,
    supervisor: ProcessSupervisor,
}

fn harness(options: SessionOptions) -> Harness {
    let wire = Arc::new(MemorySink::new());
    let trace = Arc::new(MemorySink::new());
    let general = Arc::new(MemorySink::new());
    let sinks = Sinks::new(wire.clone(), trace.clone(), general.clone());
    Harness {
        wire,
        trace,
        general,
        supervisor: ProcessSupervisor::new(options, sinks),
    }
}

fn sh(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(script)
}

fn start(h: &Harness, command: &WorkerCommand) -> Session {
    match h.supervisor.start(command) {
        Ok(session) => session,
        Err(e) => panic!("failed to start worker: {e}"),
    }
}

async fn wait_for_line(sink: &MemorySink, expected: &str) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while !sink.lines().iter().any(|l| l == expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "never saw {expected:?} in {:?}", sink.lines());
}

fn count(sink: &MemorySink, needle: &str) -> usize {
    sink.lines().iter().filter(|l| l.contains(needle)).count()
}

#[tokio::test]
async fn test_streams_are_routed_to_their_sinks() {
    let h = harness(SessionOptions::default());
    let script = r#"
printf '{"id":1}\nContent-Length: 8\n\n'
printf '[INFO  srv] params: {\n  "a": 1\n}\n[WARN  srv] plain\n' >&2
"#;
    let session = start(&h, &sh(script));
    let status = session.wait().await;
    assert_eq!(status.and_then(|s| s.code()), Some(0));
    session.dispose().await;
    assert_eq!(count(&h.general, "stop requested"), 0);

    assert_eq!(h.wire.lines(), vec![r#"[wire] {"id":1}"#]);
    assert_eq!(
        h.trace.lines(),
        vec![
            r#"[trace] [INFO  srv] params: { "a": 1 }"#,
            "[trace] [WARN  srv] plain",
        ]
    );

    let general = h.general.lines();
    assert!(general[0].starts_with("worker started: sh (pid "));
    assert_eq!(count(&h.general, "worker exited with code 0"), 1);
    assert_eq!(count(&h.general, "wire stream closed"), 1);
    assert_eq!(count(&h.general, "diagnostics stream closed"), 1);
}

#[tokio::test]
async fn test_wait_reports_exit_code() {
    let h = harness(SessionOptions::default());
    let session = start(&h, &sh("exit 3"));
    let status = session.wait().await;
    assert_eq!(status.and_then(|s| s.code()), Some(3));
    assert_eq!(session.exit_status(), status);
    session.dispose().await;
    assert_eq!(count(&h.general, "worker exited with code 3"), 1);
}

#[tokio::test]
async fn test_missing_executable_is_not_found() {
    let h = harness(SessionOptions::default());
    let Err(err) = h
        .supervisor
        .start(&WorkerCommand::new("tether-no-such-worker-binary"))
    else {
        panic!("spawning a missing program succeeded");
    };
    assert!(matches!(err, SpawnError::NotFound { ref program } if program == "tether-no-such-worker-binary"));
    assert!(h.general.lines().is_empty());
}

#[tokio::test]
async fn test_non_executable_path_is_permission_denied() {
    let h = harness(SessionOptions::default());
    let Err(err) = h.supervisor.start(&WorkerCommand::new("/")) else {
        panic!("spawning a directory succeeded");
    };
    assert!(matches!(err, SpawnError::PermissionDenied { .. }), "{err:?}");
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness(SessionOptions::default());
    let session = start(&h, &sh("exec sleep 30"));

    tokio::join!(session.stop(), session.stop());
    session.stop().await;

    assert!(session.exit_status().is_some());
    session.dispose().await;
    assert_eq!(count(&h.general, "stop requested"), 1);
    assert_eq!(count(&h.general, "stop failed"), 0);
    assert_eq!(count(&h.general, "worker exited (terminated by signal)"), 1);
}

#[tokio::test]
async fn test_stop_after_exit_is_quiet() {
    let h = harness(SessionOptions::default());
    let session = start(&h, &sh("true"));
    session.wait().await;
    session.stop().await;
    session.dispose().await;
    assert_eq!(count(&h.general, "stop requested"), 0);
    assert_eq!(count(&h.general, "stop failed"), 0);
    assert_eq!(count(&h.general, "worker exited with code 0"), 1);
}

#[tokio::test]
async fn test_worker_ignoring_sigterm_is_killed_after_timeout() {
    let h = harness(SessionOptions {
        shutdown_timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    });
    let script = r#"trap '' TERM; printf '{"ready":true}\n'; exec sleep 30"#;
    let session = start(&h, &sh(script));
    wait_for_line(&h.wire, r#"[wire] {"ready":true}"#).await;

    let begun = Instant::now();
    session.stop().await;
    let elapsed = begun.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    assert_eq!(session.exit_status().and_then(|s| s.code()), None);
    session.dispose().await;
    assert_eq!(count(&h.general, "stop failed"), 0);
}

#[tokio::test]
async fn test_send_uses_newline_framing() {
    let h = harness(SessionOptions {
        framing: WireFraming::Newline,
        ..SessionOptions::default()
    });
    let session = start(&h, &WorkerCommand::new("cat"));

    session
        .send(serde_json::json!({"id": 7}))
        .await
        .expect("send");
    wait_for_line(&h.wire, r#"[wire] {"id":7}"#).await;

    session.stop().await;
    assert!(matches!(
        session.send(serde_json::json!({"id": 8})).await,
        Err(SendError::Stopped)
    ));
    session.dispose().await;
    assert_eq!(h.wire.lines(), vec![r#"[wire] {"id":7}"#]);
}

#[tokio::test]
async fn test_content_length_body_is_flushed_at_eof() {
    let h = harness(SessionOptions::default());
    // Ignoring TERM leaves closing stdin as the only way the worker ends,
    // so the queued frame is echoed before exit.
    let session = start(&h, &sh("trap '' TERM; cat"));

    session
        .send(serde_json::json!({"id": 1}))
        .await
        .expect("send");
    // The echoed body has no trailing newline; it surfaces once cat exits.
    session.dispose().await;
    assert_eq!(count(&h.general, "worker exited with code 0"), 1);
    assert_eq!(h.wire.lines(), vec![r#"[wire] {"id":1}"#]);
}

#[tokio::test]
async fn test_environment_overrides_reach_worker() {
    let h = harness(SessionOptions::default());
    let command = sh(r#"printf '{"greeting":"%s"}\n' "$GREETING""#).env("GREETING", "hello");
    let session = start(&h, &command);
    session.wait().await;
    session.dispose().await;
    assert_eq!(h.wire.lines(), vec![r#"[wire] {"greeting":"hello"}"#]);
}
