pub mod socket_client;
pub mod socket_server;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::Mode;
use crate::error::{AfkError, Result};
use crate::request::{PendingRequest, RequestKind, RequestStatus};
use crate::session::Session;

/// Upper bound on a single command line, to keep a bad client from
/// exhausting memory.
pub const MAX_FRAME_BYTES: u64 = 1_048_576;

/// Command sent to the daemon over the control socket, one JSON line per
/// connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    Status,
    SetMode { mode: Mode },
    SetAfk { session_id: String, active: bool },
    Voice { enabled: bool },
    Reload,
    Speak { text: String },
    /// Sent by a hook: queue a request and announce it when it becomes active.
    Enqueue { session_id: String, request: RequestKind },
    /// Sent by a hook whose wait timed out: withdraw its request.
    Cancel { request_id: String },
    QueueList,
    QueueSkip { session_id: String },
    QueueFlush,
    /// Release every waiting hook and return to local mode.
    Deactivate,
    /// Keep the connection open and stream `DaemonEvent`s.
    Subscribe,
    Stop,
}

/// Wire names of every command, used to tell unknown commands apart from
/// malformed known ones.
pub const COMMAND_NAMES: &[&str] = &[
    "status",
    "set_mode",
    "set_afk",
    "voice",
    "reload",
    "speak",
    "enqueue",
    "cancel",
    "queue_list",
    "queue_skip",
    "queue_flush",
    "deactivate",
    "subscribe",
    "stop",
];

/// Parse one command line.
pub fn parse_command(line: &str) -> Result<ControlCommand> {
    let value: serde_json::Value =
        serde_json::from_str(line.trim()).map_err(|e| AfkError::InvalidRequest {
            reason: format!("invalid JSON: {e}"),
        })?;
    let name = value
        .get("cmd")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AfkError::InvalidRequest {
            reason: "missing \"cmd\" field".into(),
        })?;
    if !COMMAND_NAMES.contains(&name) {
        return Err(AfkError::UnknownCommand {
            command: name.to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| AfkError::InvalidRequest {
        reason: e.to_string(),
    })
}

/// Error document carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Reply to a single control command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    Ack,
    Status(StatusReport),
    Enqueued {
        request_id: String,
        /// True when the request was shown to the operator immediately.
        active: bool,
    },
    Queue { requests: Vec<PendingRequest> },
    Removed { requests: Vec<PendingRequest> },
    Released { sessions: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub mode: Mode,
    pub voice_enabled: bool,
    pub pending: usize,
    pub sessions: Vec<Session>,
    pub transport: String,
    pub uptime_secs: u64,
}

impl ControlResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ack() -> Self {
        Self::ok(ResponseData::Ack)
    }

    pub fn error(err: &AfkError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Client side: a failed response becomes `AfkError::Remote` carrying the
    /// daemon's error code.
    pub fn into_result(self) -> Result<ResponseData> {
        if self.ok {
            return Ok(self.data.unwrap_or(ResponseData::Ack));
        }
        let body = self.error.unwrap_or(ErrorBody {
            code: "unknown".into(),
            message: "daemon returned failure without detail".into(),
        });
        Err(AfkError::Remote {
            code: body.code,
            message: body.message,
        })
    }
}

/// Pushed to `subscribe` connections, one JSON line each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// First line of every subscription: the state at subscribe time.
    Subscribed {
        mode: Mode,
        voice_enabled: bool,
        pending: usize,
    },
    ModeChanged {
        mode: Mode,
    },
    SessionChanged {
        session_id: String,
        afk_active: bool,
    },
    RequestQueued {
        request: PendingRequest,
    },
    RequestResolved {
        request_id: String,
        session_id: String,
        status: RequestStatus,
    },
    VoiceChanged {
        enabled: bool,
    },
    Deactivated {
        sessions: Vec<String>,
    },
    ConfigReloaded,
    ShuttingDown,
}

/// Server-side behavior behind the control socket.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    /// Execute one command. Errors are reported in the response document.
    async fn handle(&self, command: ControlCommand) -> ControlResponse;

    /// Start a subscription: the snapshot event plus a receiver for what
    /// follows.
    fn subscribe(&self) -> (DaemonEvent, broadcast::Receiver<DaemonEvent>);
}
