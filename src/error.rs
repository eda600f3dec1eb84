use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AfkError {
    #[error("request not found: {request_id}")]
    NotFound { request_id: String },

    #[error("request is no longer pending: {request_id}")]
    StaleRequest { request_id: String },

    #[error("no active request (session: {session_id:?})")]
    NoActiveRequest { session_id: Option<String> },

    #[error("answer {answer:?} is not valid for a {kind} request")]
    InvalidAnswerForKind { kind: String, answer: String },

    #[error("session {session_id} already has {depth} queued requests")]
    QueueFull { session_id: String, depth: usize },

    #[error("session {session_id} is not in AFK mode")]
    SessionNotAfk { session_id: String },

    #[error("chat transport failure: {reason}")]
    Transport { reason: String },

    #[error("api error: status={status}, body={body}")]
    Api { status: u16, body: String },

    #[error("failed to write answer for session {session_id}: {reason}")]
    HandoffWrite { session_id: String, reason: String },

    #[error("unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("ipc error: {reason}")]
    Ipc { reason: String },

    #[error("socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    #[error("daemon did not answer within {timeout_secs}s")]
    DaemonTimeout { timeout_secs: u64 },

    #[error("daemon returned {code}: {message}")]
    Remote { code: String, message: String },

    #[error("config parse error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AfkError {
    /// Stable machine-readable code used in control protocol error documents.
    pub fn code(&self) -> &'static str {
        match self {
            AfkError::NotFound { .. } => "not_found",
            AfkError::StaleRequest { .. } => "stale_request",
            AfkError::NoActiveRequest { .. } => "no_active_request",
            AfkError::InvalidAnswerForKind { .. } => "invalid_answer",
            AfkError::QueueFull { .. } => "queue_full",
            AfkError::SessionNotAfk { .. } => "not_afk",
            AfkError::Transport { .. } | AfkError::Api { .. } => "transport_failure",
            AfkError::HandoffWrite { .. } => "handoff_write_failure",
            AfkError::UnknownCommand { .. } => "unknown_command",
            AfkError::InvalidRequest { .. } => "invalid_request",
            AfkError::Ipc { .. } | AfkError::SocketNotFound { .. } => "ipc",
            AfkError::DaemonTimeout { .. } => "timeout",
            AfkError::Remote { .. } => "remote",
            AfkError::ConfigParse { .. } => "config",
            AfkError::Io(_) => "io",
            AfkError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, AfkError>;
