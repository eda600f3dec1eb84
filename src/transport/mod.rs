pub mod telegram;

use async_trait::async_trait;

use crate::error::Result;

pub use telegram::TelegramTransport;

/// Inline button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Opaque data echoed back in the press callback.
    pub payload: String,
}

/// An update received from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundUpdate {
    /// An inline button was pressed.
    Callback {
        update_id: i64,
        callback_id: String,
        data: String,
        message_id: Option<i64>,
    },
    /// The operator sent a text message, optionally as a reply to one of ours.
    Text {
        update_id: i64,
        message_id: i64,
        text: String,
        reply_to: Option<i64>,
    },
    /// Anything else (other chats, edits, stickers). Only advances the offset.
    Ignored { update_id: i64 },
}

impl InboundUpdate {
    pub fn update_id(&self) -> i64 {
        match self {
            InboundUpdate::Callback { update_id, .. }
            | InboundUpdate::Text { update_id, .. }
            | InboundUpdate::Ignored { update_id } => *update_id,
        }
    }
}

/// The remote chat channel the operator answers from.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message to the operator. Returns the platform message id.
    async fn send_message(&self, text: &str, buttons: &[Button]) -> Result<i64>;

    /// Acknowledge a button press, optionally with a short toast.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Long-poll for updates with id >= `offset`. May block for the
    /// platform's poll window; callers race it against shutdown.
    async fn poll_updates(&self, offset: i64) -> Result<Vec<InboundUpdate>>;

    /// Human-readable name for logs and status.
    fn name(&self) -> &str;
}
