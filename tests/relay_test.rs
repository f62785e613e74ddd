use async_trait::async_trait;
use ocr_relay::models::{ClientResult, ProcessingRequest, ServerEvent, UploadEvent, UploadOutcome};
use ocr_relay::services::broadcast::SessionRegistry;
use ocr_relay::services::correlator::RequestCorrelator;
use ocr_relay::services::error::RelayError;
use ocr_relay::services::relay::{Relay, RelayState, run_once};
use ocr_relay::services::worker_channel::{WorkerEvent, WorkerTransport, spawn_request_channel};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// Worker double that answers every request with a reply whose OCR text
/// names the file it was asked to process.
struct EchoWorker;

#[async_trait]
impl WorkerTransport for EchoWorker {
    async fn round_trip(&mut self, payload: String) -> anyhow::Result<String> {
        let req: ProcessingRequest = serde_json::from_str(&payload)?;
        Ok(reply_for(&req.file_name, 1.234, 2.345))
    }
}

fn reply_for(file_name: &str, pre: f64, ocr: f64) -> String {
    serde_json::json!({
        "pid": 4711,
        "img_output_path": format!("./output/{0}/{0}-done", file_name),
        "preprocess_exec_time": pre,
        "ocr_exec_time": ocr,
        "ocr_output": { "res_str": format!("text of {}\nline2\nline3", file_name) }
    })
    .to_string()
}

fn saved(file_name: &str, session_id: &str) -> UploadOutcome {
    UploadOutcome::Saved(UploadEvent {
        file_name: file_name.to_string(),
        file_path: PathBuf::from("./input").join(file_name),
        file_size_bytes: 2048,
        session_id: session_id.to_string(),
    })
}

async fn connect_sessions(
    registry: &SessionRegistry,
    n: usize,
) -> Vec<mpsc::UnboundedReceiver<ServerEvent>> {
    let mut receivers = Vec::new();
    for i in 0..n {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(format!("session-{}", i), tx).await;
        receivers.push(rx);
    }
    receivers
}

async fn next_result(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ClientResult {
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for ocr_done")
        .expect("session channel closed");
    assert_eq!(event.event, "ocr_done");
    serde_json::from_str(&event.data).unwrap()
}

#[tokio::test]
async fn test_one_reply_reaches_every_session() {
    let registry = SessionRegistry::new();
    let mut receivers = connect_sessions(&registry, 4).await;

    let channel = spawn_request_channel(EchoWorker);
    let relay = Relay::new(RequestCorrelator::new(99), channel.outbound, registry.clone());
    let (upload_tx, upload_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(relay.run(upload_rx, channel.replies, shutdown_rx));

    upload_tx.send(saved("receipt.jpg", "session-2")).unwrap();

    for rx in receivers.iter_mut() {
        let result = next_result(rx).await;
        assert_eq!(result.message, "PREPROCESS + OCR done in 3.579 seconds");
        assert_eq!(result.output_lines(), vec!["text of receipt.jpg", "line2", "line3"]);
    }

    // Exactly one delivery per session
    tokio::task::yield_now().await;
    for rx in receivers.iter_mut() {
        assert!(rx.try_recv().is_err());
    }

    drop(upload_tx);
    task.abort();
}

#[tokio::test]
async fn test_upload_failure_sends_nothing() {
    let registry = SessionRegistry::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut relay = Relay::new(RequestCorrelator::new(1), outbound_tx, registry);

    relay
        .on_upload(UploadOutcome::Failed {
            file_name: "broken.png".to_string(),
            session_id: "s".to_string(),
            reason: "disk full".to_string(),
        })
        .unwrap();

    assert!(outbound_rx.try_recv().is_err());
    assert_eq!(relay.state(), RelayState::Idle);
}

#[tokio::test]
async fn test_request_payload_and_state_transitions() {
    let registry = SessionRegistry::new();
    let mut receivers = connect_sessions(&registry, 1).await;
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let mut relay = Relay::new(RequestCorrelator::new(321), outbound_tx, registry);

    relay.on_upload(saved("page.png", "abc")).unwrap();
    assert_eq!(relay.state(), RelayState::AwaitingReply);

    let wire: serde_json::Value = serde_json::from_str(&outbound_rx.try_recv().unwrap()).unwrap();
    assert_eq!(
        wire,
        serde_json::json!({
            "pid": 321,
            "filename": "page.png",
            "filesize": 2048,
            "socketio_socket_id": "abc"
        })
    );

    let delivered = relay.on_reply(&reply_for("page.png", 0.5, 0.25)).await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(relay.state(), RelayState::Idle);
    assert_eq!(
        next_result(&mut receivers[0]).await.message,
        "PREPROCESS + OCR done in 0.750 seconds"
    );

    // A reply nobody asked for is still relayed
    let delivered = relay.on_reply(&reply_for("stray.png", 0.0, 0.0)).await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(relay.in_flight(), 0);
}

#[tokio::test]
async fn test_malformed_reply_stops_the_relay() {
    let registry = SessionRegistry::new();
    let mut receivers = connect_sessions(&registry, 2).await;
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    let relay = Relay::new(RequestCorrelator::new(1), outbound_tx, registry);

    let (_upload_tx, upload_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    reply_tx
        .send(WorkerEvent::Reply(
            r#"{"pid": 1, "img_output_path": "x"}"#.to_string(),
        ))
        .unwrap();

    let outcome = timeout(
        Duration::from_secs(5),
        relay.run(upload_rx, reply_rx, shutdown_rx),
    )
    .await
    .expect("relay did not stop");
    assert!(matches!(outcome, Err(RelayError::MalformedReply(_))));

    for rx in receivers.iter_mut() {
        assert!(rx.try_recv().is_err());
    }
}

/// Worker double whose first `failures` exchanges break, then behaves like
/// `EchoWorker`.
struct FlakyWorker {
    failures: usize,
}

#[async_trait]
impl WorkerTransport for FlakyWorker {
    async fn round_trip(&mut self, payload: String) -> anyhow::Result<String> {
        if self.failures > 0 {
            self.failures -= 1;
            anyhow::bail!("connection reset by worker");
        }
        let mut echo = EchoWorker;
        echo.round_trip(payload).await
    }
}

#[tokio::test]
async fn test_dropped_request_returns_relay_to_idle() {
    let registry = SessionRegistry::new();
    let mut receivers = connect_sessions(&registry, 1).await;
    let mut channel = spawn_request_channel(FlakyWorker { failures: 1 });
    let mut relay = Relay::new(RequestCorrelator::new(7), channel.outbound.clone(), registry);

    relay.on_upload(saved("lost.png", "s")).unwrap();
    assert_eq!(relay.state(), RelayState::AwaitingReply);

    let event = timeout(Duration::from_secs(5), channel.replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, WorkerEvent::Dropped(_)));

    relay.on_worker_event(event).await.unwrap();
    assert_eq!(relay.state(), RelayState::Idle);
    assert_eq!(relay.in_flight(), 0);
    assert!(receivers[0].try_recv().is_err());
}

#[tokio::test]
async fn test_relay_keeps_running_after_a_dropped_request() {
    let registry = SessionRegistry::new();
    let mut receivers = connect_sessions(&registry, 1).await;

    let channel = spawn_request_channel(FlakyWorker { failures: 1 });
    let relay = Relay::new(RequestCorrelator::new(7), channel.outbound, registry);
    let (upload_tx, upload_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(relay.run(upload_rx, channel.replies, shutdown_rx));

    upload_tx.send(saved("lost.png", "s")).unwrap();
    upload_tx.send(saved("kept.png", "s")).unwrap();

    let result = next_result(&mut receivers[0]).await;
    assert!(result.ocr_output_text.contains("kept.png"));
    assert!(!task.is_finished());

    task.abort();
}

#[tokio::test]
async fn test_closed_request_channel_is_fatal() {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    drop(outbound_rx);
    let mut relay = Relay::new(RequestCorrelator::new(1), outbound_tx, SessionRegistry::new());

    let err = relay.on_upload(saved("a.png", "s")).unwrap_err();
    assert!(matches!(err, RelayError::ChannelClosed));
}

#[tokio::test]
async fn test_shutdown_stops_the_loop() {
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    let relay = Relay::new(RequestCorrelator::new(1), outbound_tx, SessionRegistry::new());
    let (_upload_tx, upload_rx) = mpsc::unbounded_channel();
    let (_reply_tx, reply_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(relay.run(upload_rx, reply_rx, shutdown_rx));
    shutdown_tx.send(true).unwrap();

    let outcome = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_run_once_returns_client_result() {
    let event = UploadEvent {
        file_name: "input.jpg".to_string(),
        file_path: PathBuf::from("./input/input.jpg"),
        file_size_bytes: 10,
        session_id: "standalone".to_string(),
    };

    let result = run_once(&mut EchoWorker, RequestCorrelator::new(5), event)
        .await
        .unwrap();
    assert_eq!(result.message, "PREPROCESS + OCR done in 3.579 seconds");
    assert_eq!(result.output_lines().len(), 3);
}

/// Worker double that finishes its jobs in reverse order, the way two
/// workers behind one socket could.
struct ReversingWorker {
    held: Option<String>,
}

#[async_trait]
impl WorkerTransport for ReversingWorker {
    async fn round_trip(&mut self, payload: String) -> anyhow::Result<String> {
        let req: ProcessingRequest = serde_json::from_str(&payload)?;
        match self.held.take() {
            None => {
                self.held = Some(req.file_name);
                Ok(reply_for("second.png", 0.0, 0.0))
            }
            Some(first) => Ok(reply_for(&first, 0.0, 0.0)),
        }
    }
}

#[tokio::test]
#[ignore = "replies are paired with requests by arrival order only"]
async fn test_reversed_replies_reach_the_uploading_session() {
    let registry = SessionRegistry::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    registry.register("session-a".into(), tx_a).await;
    registry.register("session-b".into(), tx_b).await;

    let channel = spawn_request_channel(ReversingWorker { held: None });
    let relay = Relay::new(RequestCorrelator::new(1), channel.outbound, registry);
    let (upload_tx, upload_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(relay.run(upload_rx, channel.replies, shutdown_rx));

    upload_tx.send(saved("first.png", "session-a")).unwrap();
    upload_tx.send(saved("second.png", "session-b")).unwrap();

    // Each session should only ever see the result for its own file.
    let a = next_result(&mut rx_a).await;
    assert!(a.ocr_output_text.contains("first.png"));
    assert!(rx_a.try_recv().is_err());

    let b = next_result(&mut rx_b).await;
    assert!(b.ocr_output_text.contains("second.png"));
    assert!(rx_b.try_recv().is_err());

    task.abort();
}
