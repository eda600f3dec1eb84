//! Integration tests for IPC: socket server/client round-trip, error
//! documents, and event subscriptions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use afk_relay::config::Mode;
use afk_relay::error::AfkError;
use afk_relay::ipc::socket_client::IpcClient;
use afk_relay::ipc::socket_server::IpcServer;
use afk_relay::ipc::{
    ControlCommand, ControlHandler, ControlResponse, DaemonEvent, ResponseData, StatusReport,
};

/// Handler that answers `status`, fails `queue_flush`, and acks the rest.
struct FakeHandler {
    events: broadcast::Sender<DaemonEvent>,
}

impl FakeHandler {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self { events })
    }
}

#[async_trait]
impl ControlHandler for FakeHandler {
    async fn handle(&self, command: ControlCommand) -> ControlResponse {
        match command {
            ControlCommand::Status => ControlResponse::ok(ResponseData::Status(StatusReport {
                mode: Mode::Afk,
                voice_enabled: false,
                pending: 3,
                sessions: Vec::new(),
                transport: "fake".into(),
                uptime_secs: 7,
            })),
            ControlCommand::QueueFlush => ControlResponse::error(&AfkError::SessionNotAfk {
                session_id: "s9".into(),
            }),
            _ => ControlResponse::ack(),
        }
    }

    fn subscribe(&self) -> (DaemonEvent, broadcast::Receiver<DaemonEvent>) {
        let rx = self.events.subscribe();
        (
            DaemonEvent::Subscribed {
                mode: Mode::Local,
                voice_enabled: true,
                pending: 0,
            },
            rx,
        )
    }
}

struct Running {
    _tmp: TempDir,
    socket_path: std::path::PathBuf,
    cancel: CancellationToken,
    handler: Arc<FakeHandler>,
    task: tokio::task::JoinHandle<afk_relay::error::Result<()>>,
}

async fn start_server() -> Running {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("test.sock");
    let cancel = CancellationToken::new();
    let handler = FakeHandler::new();

    let server = IpcServer::new(socket_path.clone(), cancel.clone());
    let serve_handler: Arc<dyn ControlHandler> = handler.clone();
    let task = tokio::spawn(async move { server.serve(serve_handler).await });

    // Wait for server to start
    for _ in 0..200 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Running {
        _tmp: tmp,
        socket_path,
        cancel,
        handler,
        task,
    }
}

async fn raw_exchange(socket_path: &std::path::Path, line: &str) -> serde_json::Value {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut buf = String::new();
    stream.read_to_string(&mut buf).await.unwrap();
    serde_json::from_str(buf.trim()).unwrap()
}

// ---------------------------------------------------------------------------
// Request/response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ipc_server_client_roundtrip() {
    let running = start_server().await;
    let client = IpcClient::new(running.socket_path.clone(), 5);

    match client.call(&ControlCommand::Status).await.unwrap() {
        ResponseData::Status(report) => {
            assert_eq!(report.mode, Mode::Afk);
            assert_eq!(report.pending, 3);
            assert_eq!(report.transport, "fake");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let ack = client
        .call(&ControlCommand::SetAfk {
            session_id: "s1".into(),
            active: true,
        })
        .await
        .unwrap();
    assert_eq!(ack, ResponseData::Ack);

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
    assert!(!running.socket_path.exists());
}

#[tokio::test]
async fn failure_document_becomes_remote_error() {
    let running = start_server().await;
    let client = IpcClient::new(running.socket_path.clone(), 5);

    let err = client.call(&ControlCommand::QueueFlush).await.unwrap_err();
    match err {
        AfkError::Remote { code, message } => {
            assert_eq!(code, "not_afk");
            assert!(message.contains("s9"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    running.cancel.cancel();
}

#[tokio::test]
async fn unknown_command_gets_error_document() {
    let running = start_server().await;

    let response = raw_exchange(&running.socket_path, r#"{"cmd":"self_destruct"}"#).await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "unknown_command");
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("self_destruct"));

    let response = raw_exchange(&running.socket_path, "this is not json").await;
    assert_eq!(response["error"]["code"], "invalid_request");

    running.cancel.cancel();
}

#[tokio::test]
async fn ipc_client_missing_socket() {
    let client = IpcClient::new("/tmp/nonexistent-afk-relay-test.sock".into(), 1);
    let err = client.request(&ControlCommand::Status).await.unwrap_err();
    assert!(matches!(err, AfkError::SocketNotFound { .. }));
}

#[tokio::test]
async fn second_server_refuses_live_socket() {
    let running = start_server().await;

    let second = IpcServer::new(running.socket_path.clone(), CancellationToken::new());
    let handler: Arc<dyn ControlHandler> = FakeHandler::new();
    let err = second.serve(handler).await.unwrap_err();
    assert!(matches!(err, AfkError::Ipc { .. }));

    running.cancel.cancel();
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("stale.sock");
    // A bound-then-dropped listener leaves a socket file nobody answers on.
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());

    let cancel = CancellationToken::new();
    let server = IpcServer::new(socket_path.clone(), cancel.clone());
    let handler: Arc<dyn ControlHandler> = FakeHandler::new();
    let task = tokio::spawn(async move { server.serve(handler).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = IpcClient::new(socket_path, 5);
    assert!(client.call(&ControlCommand::Reload).await.is_ok());

    cancel.cancel();
    task.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_streams_snapshot_then_events() {
    let running = start_server().await;
    let client = IpcClient::new(running.socket_path.clone(), 5);

    let mut stream = client.subscribe().await.unwrap();
    let snapshot = stream.next_event().await.unwrap().unwrap();
    assert_eq!(
        snapshot,
        DaemonEvent::Subscribed {
            mode: Mode::Local,
            voice_enabled: true,
            pending: 0
        }
    );

    running
        .handler
        .events
        .send(DaemonEvent::ModeChanged { mode: Mode::Afk })
        .unwrap();
    running.handler.events.send(DaemonEvent::ShuttingDown).unwrap();

    let next = stream.next_event().await.unwrap().unwrap();
    assert_eq!(next, DaemonEvent::ModeChanged { mode: Mode::Afk });
    let last = stream.next_event().await.unwrap().unwrap();
    assert_eq!(last, DaemonEvent::ShuttingDown);
    // The server closes the stream after shutting_down.
    assert!(stream.next_event().await.unwrap().is_none());

    running.cancel.cancel();
}
