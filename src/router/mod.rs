pub mod classify;

use std::sync::Arc;

use crate::error::{AfkError, Result};
use crate::handoff::BlockingHandoff;
use crate::queue::PendingRequestStore;
use crate::request::{Answer, PendingRequest, RequestStatus};
use crate::session::SessionRegistry;

pub use classify::{button_tokens, classify};

/// An inbound operator reply, stripped of any chat-platform detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Inline button press naming the request explicitly.
    Button { request_id: String, token: String },
    /// Free text. `thread` is the chat message it replied to, if any.
    Text { thread: Option<i64>, text: String },
}

/// A reply that was matched, validated and handed off.
#[derive(Debug, Clone)]
pub struct Routed {
    /// The answered request, already removed from the store.
    pub request: PendingRequest,
    pub answer: Answer,
    /// The session's next request, now active, if one was queued.
    pub promoted: Option<PendingRequest>,
}

/// Encode a button payload. Telegram caps callback data at 64 bytes, which a
/// 32-char request id plus a short token fits comfortably.
pub fn button_payload(request_id: &str, token: &str) -> String {
    format!("{request_id}:{token}")
}

pub fn parse_button_payload(data: &str) -> Option<Reply> {
    let (request_id, token) = data.split_once(':')?;
    if request_id.is_empty() || token.is_empty() {
        return None;
    }
    Some(Reply::Button {
        request_id: request_id.to_string(),
        token: token.to_string(),
    })
}

/// Matches replies to pending requests and delivers the answers.
pub struct ReplyRouter {
    store: Arc<PendingRequestStore>,
    registry: Arc<SessionRegistry>,
    handoff: Arc<BlockingHandoff>,
}

impl ReplyRouter {
    pub fn new(
        store: Arc<PendingRequestStore>,
        registry: Arc<SessionRegistry>,
        handoff: Arc<BlockingHandoff>,
    ) -> Self {
        Self {
            store,
            registry,
            handoff,
        }
    }

    /// Find the one request a reply answers.
    pub fn resolve(&self, reply: &Reply) -> Result<PendingRequest> {
        match reply {
            Reply::Button { request_id, .. } => {
                let stale = || AfkError::StaleRequest {
                    request_id: request_id.clone(),
                };
                let request = self.store.get(request_id).ok_or_else(stale)?;
                // Only the head of a session queue shares the session's slot
                // with a blocked hook; anything behind it cannot be answered yet.
                match self.store.peek_active(&request.session_id) {
                    Some(active) if active.id == request.id => Ok(request),
                    _ => Err(stale()),
                }
            }
            Reply::Text { thread, .. } => {
                let session_id = self
                    .registry
                    .resolve_thread(*thread)
                    .ok_or(AfkError::NoActiveRequest { session_id: None })?;
                match self.store.peek_active(&session_id) {
                    // Text can only answer a prompt the operator has seen.
                    Some(request) if request.announced_message_id.is_some() => Ok(request),
                    _ => Err(AfkError::NoActiveRequest {
                        session_id: Some(session_id),
                    }),
                }
            }
        }
    }

    /// Resolve, validate, remove and deliver.
    ///
    /// If two replies race for one request the loser gets `NotFound` from the
    /// store, which callers should ignore.
    pub fn route(&self, reply: &Reply) -> Result<Routed> {
        let request = self.resolve(reply)?;
        let raw = match reply {
            Reply::Button { token, .. } => token,
            Reply::Text { text, .. } => text,
        };
        let answer = classify(&request.kind, raw)?;

        let request = self.store.remove(&request.id, RequestStatus::Answered)?;
        let session_id = request.session_id.clone();
        self.handoff.deliver(&session_id, &request.id, &answer)?;

        let promoted = self.store.peek_active(&session_id);
        self.registry
            .set_waiting(&session_id, promoted.as_ref().map(|next| next.id.as_str()));
        self.registry.touch(&session_id);

        tracing::info!(
            request_id = %request.id,
            %session_id,
            %answer,
            "reply routed"
        );

        Ok(Routed {
            request,
            answer,
            promoted,
        })
    }
}
