use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{AfkError, Result};
use crate::ipc::{parse_command, ControlCommand, ControlHandler, ControlResponse, DaemonEvent, MAX_FRAME_BYTES};

/// Unix socket server for the control protocol.
pub struct IpcServer {
    socket_path: PathBuf,
    cancel: CancellationToken,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            socket_path,
            cancel,
        }
    }

    /// Start listening for connections. Each connection is handled in a
    /// spawned task. Returns once the cancellation token fires.
    pub async fn serve(&self, handler: Arc<dyn ControlHandler>) -> Result<()> {
        if self.socket_path.exists() {
            // A live daemon answers connects; a stale socket file does not.
            if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
                return Err(AfkError::Ipc {
                    reason: format!(
                        "another daemon is already listening on {}",
                        self.socket_path.display()
                    ),
                });
            }
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| AfkError::Ipc {
            reason: format!(
                "failed to bind socket at {}: {}",
                self.socket_path.display(),
                e
            ),
        })?;
        set_socket_permissions(&self.socket_path);

        tracing::info!(socket = %self.socket_path.display(), "control socket listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let handler = handler.clone();
                            let cancel = self.cancel.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handler, cancel).await {
                                    tracing::debug!(error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept error");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("control socket shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Handle a single client connection: one command, one response, except for
/// `subscribe`, which streams events until either side goes away.
async fn handle_connection(
    stream: UnixStream,
    handler: Arc<dyn ControlHandler>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader.take(MAX_FRAME_BYTES));
    let mut line = String::new();

    buf_reader
        .read_line(&mut line)
        .await
        .map_err(|e| AfkError::Ipc {
            reason: format!("read failed: {}", e),
        })?;

    let command = match parse_command(&line) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(error = %e, "rejected control command");
            write_line(&mut writer, &ControlResponse::error(&e)).await?;
            return finish(writer).await;
        }
    };

    if command == ControlCommand::Subscribe {
        let (snapshot, events) = handler.subscribe();
        write_line(&mut writer, &snapshot).await?;
        return stream_events(buf_reader, writer, events, cancel).await;
    }

    let response = handler.handle(command).await;
    write_line(&mut writer, &response).await?;
    finish(writer).await
}

/// Forward broadcast events to a subscriber, in the order they were sent.
async fn stream_events<R, W>(
    mut reader: R,
    mut writer: W,
    mut events: broadcast::Receiver<DaemonEvent>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scratch = String::new();
    loop {
        tokio::select! {
            // The client never sends more than its command; EOF means it left.
            read = reader.read_line(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => scratch.clear(),
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let last = event == DaemonEvent::ShuttingDown;
                    if write_line(&mut writer, &event).await.is_err() || last {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await.map_err(|e| AfkError::Ipc {
        reason: format!("write failed: {}", e),
    })?;
    writer.flush().await.map_err(|e| AfkError::Ipc {
        reason: format!("flush failed: {}", e),
    })
}

async fn finish<W: AsyncWrite + Unpin>(mut writer: W) -> Result<()> {
    writer.shutdown().await.map_err(|e| AfkError::Ipc {
        reason: format!("shutdown failed: {}", e),
    })
}

/// Only the owning user may talk to the daemon.
#[cfg(unix)]
fn set_socket_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &std::path::Path) {}
