use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::TelegramConfig;
use crate::error::{AfkError, Result};

use super::{Button, ChatTransport, InboundUpdate};

/// Telegram limits message text to 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Slack added to the HTTP timeout on top of the server-side long-poll window.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram Bot API transport bound to a single operator chat.
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
    chat_id: i64,
    long_poll_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    text: Option<String>,
    reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    data: Option<String>,
    message: Option<Message>,
}

impl TelegramTransport {
    /// Fails if the bot token or chat id is missing.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AfkError::Transport {
                reason: "telegram.bot_token is not configured".into(),
            })?;
        let chat_id = config.chat_id.ok_or_else(|| AfkError::Transport {
            reason: "telegram.chat_id is not configured".into(),
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AfkError::Transport {
                reason: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            chat_id,
            long_poll_secs: config.long_poll_secs,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        // reqwest errors embed the URL, which embeds the token.
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AfkError::Transport {
                reason: format!("{method}: {}", e.without_url()),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| AfkError::Transport {
            reason: format!("{method}: {}", e.without_url()),
        })?;
        if !status.is_success() {
            return Err(AfkError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&text)?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(AfkError::Api {
                status: status.as_u16(),
                body: parsed.description.unwrap_or(text),
            }),
        }
    }

    fn convert(&self, update: Update) -> InboundUpdate {
        let update_id = update.update_id;

        if let Some(query) = update.callback_query {
            let from_operator = query
                .message
                .as_ref()
                .is_some_and(|m| m.chat.id == self.chat_id);
            return match query.data {
                Some(data) if from_operator => InboundUpdate::Callback {
                    update_id,
                    callback_id: query.id,
                    data,
                    message_id: query.message.map(|m| m.message_id),
                },
                _ => InboundUpdate::Ignored { update_id },
            };
        }

        match update.message {
            Some(Message {
                message_id,
                chat,
                text: Some(text),
                reply_to_message,
            }) if chat.id == self.chat_id => InboundUpdate::Text {
                update_id,
                message_id,
                text,
                reply_to: reply_to_message.map(|m| m.message_id),
            },
            Some(message) => {
                if message.chat.id != self.chat_id {
                    tracing::warn!(chat_id = message.chat.id, "ignoring message from unknown chat");
                }
                InboundUpdate::Ignored { update_id }
            }
            None => InboundUpdate::Ignored { update_id },
        }
    }
}

fn inline_keyboard(buttons: &[Button]) -> serde_json::Value {
    // Two buttons per row keeps long option labels readable on phones.
    let rows: Vec<Vec<serde_json::Value>> = buttons
        .chunks(2)
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.payload }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn clamp_text(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{}…", truncated)
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, text: &str, buttons: &[Button]) -> Result<i64> {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": clamp_text(text),
            "disable_web_page_preview": true,
        });
        if !buttons.is_empty() {
            body["reply_markup"] = inline_keyboard(buttons);
        }
        let message: Message = self.call("sendMessage", body, REQUEST_TIMEOUT).await?;
        Ok(message.message_id)
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self
            .call("answerCallbackQuery", body, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn poll_updates(&self, offset: i64) -> Result<Vec<InboundUpdate>> {
        let body = json!({
            "offset": offset,
            "timeout": self.long_poll_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let timeout = Duration::from_secs(self.long_poll_secs) + LONG_POLL_GRACE;
        let updates: Vec<Update> = self.call("getUpdates", body, timeout).await?;
        Ok(updates.into_iter().map(|u| self.convert(u)).collect())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
