use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::error::{AfkError, Result};
use crate::ipc::{ControlCommand, ControlResponse, DaemonEvent, ResponseData, MAX_FRAME_BYTES};

/// Unix socket client for hooks and the operator CLI.
pub struct IpcClient {
    socket_path: PathBuf,
    timeout_secs: u64,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf, timeout_secs: u64) -> Self {
        Self {
            socket_path,
            timeout_secs,
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(AfkError::SocketNotFound {
                path: self.socket_path.clone(),
            });
        }
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| AfkError::Ipc {
                reason: format!("connect failed: {}", e),
            })
    }

    async fn send_line(
        stream: &mut (impl AsyncWrite + Unpin),
        command: &ControlCommand,
    ) -> Result<()> {
        let mut request_json = serde_json::to_vec(command)?;
        request_json.push(b'\n');
        stream
            .write_all(&request_json)
            .await
            .map_err(|e| AfkError::Ipc {
                reason: format!("write failed: {}", e),
            })
    }

    /// Send a command and wait for its response document.
    pub async fn request(&self, command: &ControlCommand) -> Result<ControlResponse> {
        let timeout = Duration::from_secs(self.timeout_secs);

        let result = tokio::time::timeout(timeout, async {
            let mut stream = self.connect().await?;
            Self::send_line(&mut stream, command).await?;
            stream.shutdown().await.map_err(|e| AfkError::Ipc {
                reason: format!("shutdown write failed: {}", e),
            })?;

            // Read response (bounded to prevent OOM)
            let mut response_buf = Vec::new();
            stream
                .take(MAX_FRAME_BYTES)
                .read_to_end(&mut response_buf)
                .await
                .map_err(|e| AfkError::Ipc {
                    reason: format!("read failed: {}", e),
                })?;

            let response: ControlResponse =
                serde_json::from_slice(&response_buf).map_err(|e| AfkError::Ipc {
                    reason: format!("invalid response JSON: {}", e),
                })?;

            Ok::<ControlResponse, AfkError>(response)
        })
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AfkError::DaemonTimeout {
                timeout_secs: self.timeout_secs,
            }),
        }
    }

    /// `request` plus conversion of failure documents into errors.
    pub async fn call(&self, command: &ControlCommand) -> Result<ResponseData> {
        self.request(command).await?.into_result()
    }

    /// Open a subscription. The connection stays open until the returned
    /// stream is dropped.
    pub async fn subscribe(&self) -> Result<EventStream> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        Self::send_line(&mut writer, &ControlCommand::Subscribe).await?;
        Ok(EventStream {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }
}

/// Events pushed by the daemon to a subscriber.
pub struct EventStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Dropping the write half would tell the daemon we left.
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Next event, or `None` once the daemon closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<DaemonEvent>> {
        loop {
            let line = self.lines.next_line().await.map_err(|e| AfkError::Ipc {
                reason: format!("read failed: {}", e),
            })?;
            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(serde_json::from_str(&line)?)),
            }
        }
    }
}
