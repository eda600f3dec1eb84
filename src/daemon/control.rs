use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{AfkError, Result};
use crate::ipc::{ControlCommand, ControlHandler, ControlResponse, DaemonEvent, ResponseData};

use super::Daemon;

#[async_trait]
impl ControlHandler for Daemon {
    async fn handle(&self, command: ControlCommand) -> ControlResponse {
        tracing::debug!(?command, "control command");
        match self.dispatch(command).await {
            Ok(data) => ControlResponse::ok(data),
            Err(e) => {
                tracing::debug!(error = %e, "control command failed");
                ControlResponse::error(&e)
            }
        }
    }

    fn subscribe(&self) -> (DaemonEvent, broadcast::Receiver<DaemonEvent>) {
        // Subscribe before taking the snapshot so no event falls in between.
        let events = self.events.subscribe();
        let snapshot = DaemonEvent::Subscribed {
            mode: self.mode(),
            voice_enabled: self.voice.is_enabled(),
            pending: self.store.len(),
        };
        (snapshot, events)
    }
}

impl Daemon {
    async fn dispatch(&self, command: ControlCommand) -> Result<ResponseData> {
        match command {
            ControlCommand::Status => Ok(ResponseData::Status(self.status())),
            ControlCommand::SetMode { mode } => {
                self.set_mode(mode)?;
                Ok(ResponseData::Ack)
            }
            ControlCommand::SetAfk { session_id, active } => {
                self.set_afk(&session_id, active);
                Ok(ResponseData::Ack)
            }
            ControlCommand::Voice { enabled } => {
                self.set_voice(enabled);
                Ok(ResponseData::Ack)
            }
            ControlCommand::Reload => {
                self.reload()?;
                Ok(ResponseData::Ack)
            }
            ControlCommand::Speak { text } => {
                self.speak(&text).await?;
                Ok(ResponseData::Ack)
            }
            ControlCommand::Enqueue {
                session_id,
                request,
            } => self.enqueue(&session_id, request),
            ControlCommand::Cancel { request_id } => self.cancel_request(&request_id),
            ControlCommand::QueueList => Ok(ResponseData::Queue {
                requests: self.store.list_all(),
            }),
            ControlCommand::QueueSkip { session_id } => Ok(ResponseData::Removed {
                requests: self.skip_session(&session_id),
            }),
            ControlCommand::QueueFlush => Ok(ResponseData::Removed {
                requests: self.flush_all(),
            }),
            ControlCommand::Deactivate => Ok(ResponseData::Released {
                sessions: self.deactivate()?,
            }),
            // The socket layer streams subscriptions itself.
            ControlCommand::Subscribe => Err(AfkError::InvalidRequest {
                reason: "subscribe must be the only command on its connection".into(),
            }),
            ControlCommand::Stop => {
                self.stop();
                Ok(ResponseData::Ack)
            }
        }
    }
}
