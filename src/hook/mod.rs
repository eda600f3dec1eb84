//! The short-lived hook side: turn the assistant's hook input into a
//! request, hand it to the daemon, and block until the operator answers.

pub mod output;

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{AfkError, Result};
use crate::handoff::{BlockingHandoff, WaitOutcome};
use crate::ipc::socket_client::{EventStream, IpcClient};
use crate::ipc::{ControlCommand, DaemonEvent, ResponseData};
use crate::request::{RequestKind, RequestStatus};

pub use output::render;

/// Lifecycle event the hook was installed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HookKind {
    /// A tool call needs approval.
    Permission,
    /// The assistant finished its turn and waits for the next instruction.
    Stop,
    /// The assistant asked the user a multiple-choice question.
    Question,
}

/// Hook payload on stdin. Only the fields we use; everything is optional so
/// newer assistant versions don't break parsing.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    /// Set when the assistant is already continuing because of a stop hook.
    #[serde(default)]
    pub stop_hook_active: bool,
    #[serde(default)]
    pub last_assistant_message: Option<String>,
}

const STOP_PROMPT: &str = "Finished and waiting for your next instruction.";

/// Build the request to send for this hook, or `None` when there is nothing
/// worth asking the operator.
pub fn build_request(kind: HookKind, input: &HookInput) -> Result<Option<RequestKind>> {
    match kind {
        HookKind::Permission => {
            let tool_name = input
                .tool_name
                .clone()
                .ok_or_else(|| AfkError::InvalidRequest {
                    reason: "permission hook input has no tool_name".into(),
                })?;
            Ok(Some(RequestKind::Permission {
                tool_name,
                tool_input: input.tool_input.clone().unwrap_or(serde_json::Value::Null),
            }))
        }
        HookKind::Stop => {
            // Blocking again would keep the assistant in a stop loop.
            if input.stop_hook_active {
                return Ok(None);
            }
            let prompt = input
                .last_assistant_message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(STOP_PROMPT)
                .to_string();
            Ok(Some(RequestKind::FreeformInput { prompt }))
        }
        HookKind::Question => Ok(question_request(input.tool_input.as_ref())),
    }
}

/// `AskUserQuestion` input: `{"questions":[{"question":..,"options":[{"label":..}]}]}`.
/// Only the first question is relayed. Options may also be plain strings.
fn question_request(tool_input: Option<&serde_json::Value>) -> Option<RequestKind> {
    let tool_input = tool_input?;
    let question = tool_input
        .get("questions")
        .and_then(|q| q.as_array())
        .and_then(|q| q.first())
        .unwrap_or(tool_input);

    let prompt = question
        .get("question")
        .and_then(|q| q.as_str())?
        .to_string();
    let options: Vec<String> = question
        .get("options")
        .and_then(|o| o.as_array())
        .map(|options| {
            options
                .iter()
                .filter_map(|o| {
                    o.as_str()
                        .or_else(|| o.get("label").and_then(|l| l.as_str()))
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    if options.is_empty() {
        Some(RequestKind::FreeformInput { prompt })
    } else {
        Some(RequestKind::MultipleChoice { prompt, options })
    }
}

/// Run one hook invocation. `Ok(None)` means the request was not routed
/// remotely (session not AFK, or nothing to ask) and the assistant should
/// carry on locally.
pub async fn execute(
    kind: HookKind,
    settings: &Settings,
    raw_input: &str,
    cancel: &CancellationToken,
) -> Result<Option<WaitOutcome>> {
    let input: HookInput = if raw_input.trim().is_empty() {
        HookInput::default()
    } else {
        serde_json::from_str(raw_input)?
    };
    let session_id = input
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AfkError::InvalidRequest {
            reason: "hook input has no session_id".into(),
        })?;
    let Some(request) = build_request(kind, &input)? else {
        return Ok(None);
    };

    let client = IpcClient::new(settings.socket_path(), settings.daemon_timeout_secs);
    // Subscribed before enqueueing, so the events about our request can't be missed.
    let events = open_events(&client, Duration::from_secs(settings.daemon_timeout_secs)).await?;

    let enqueued = client
        .call(&ControlCommand::Enqueue {
            session_id: session_id.clone(),
            request,
        })
        .await;
    let request_id = match enqueued {
        Ok(ResponseData::Enqueued { request_id, active }) => {
            tracing::debug!(%request_id, %session_id, active, "waiting for remote answer");
            request_id
        }
        Ok(other) => {
            return Err(AfkError::Ipc {
                reason: format!("unexpected response to enqueue: {other:?}"),
            })
        }
        Err(AfkError::Remote { code, .. }) if code == "not_afk" => return Ok(None),
        Err(e) => return Err(e),
    };

    let handoff = BlockingHandoff::new(settings.handoff_dir(), settings.poll_interval());
    let outcome = tokio::select! {
        outcome = handoff.wait(&session_id, &request_id, settings.hook_timeout(), cancel) => outcome?,
        release = released(events, &request_id) => {
            // An answer that landed just before the release still wins.
            match handoff.take(&session_id, &request_id)? {
                Some(content) => content.into(),
                None => release,
            }
        }
    };

    if outcome == WaitOutcome::TimedOut {
        // Withdraw the request so it doesn't block the session's queue. If it
        // is already gone an answer may have landed just after the deadline.
        let withdraw = ControlCommand::Cancel {
            request_id: request_id.clone(),
        };
        match client.call(&withdraw).await {
            Ok(_) => {}
            Err(AfkError::Remote { code, .. }) if code == "not_found" => {
                if let Some(content) = handoff.take(&session_id, &request_id)? {
                    return Ok(Some(content.into()));
                }
            }
            Err(e) => tracing::debug!(error = %e, "failed to withdraw request"),
        }
    }

    Ok(Some(outcome))
}

/// Subscribe and wait for the snapshot, which tells us the daemon has
/// registered the subscription.
async fn open_events(client: &IpcClient, timeout: Duration) -> Result<EventStream> {
    let mut events = client.subscribe().await?;
    match tokio::time::timeout(timeout, events.next_event()).await {
        Ok(Ok(Some(DaemonEvent::Subscribed { .. }))) => Ok(events),
        Ok(Ok(other)) => Err(AfkError::Ipc {
            reason: format!("unexpected first event: {other:?}"),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AfkError::DaemonTimeout {
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Resolves when the daemon drops `request_id` without answering it. Pends
/// forever once the stream is gone, leaving the slot wait in charge.
async fn released(mut events: EventStream, request_id: &str) -> WaitOutcome {
    loop {
        match events.next_event().await {
            Ok(Some(event)) => {
                if let Some(outcome) = release_outcome(&event, request_id) {
                    return outcome;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "event stream failed");
                break;
            }
        }
    }
    std::future::pending().await
}

fn release_outcome(event: &DaemonEvent, request_id: &str) -> Option<WaitOutcome> {
    match event {
        DaemonEvent::Deactivated { .. } => Some(WaitOutcome::Deactivated),
        DaemonEvent::RequestResolved {
            request_id: resolved,
            status,
            ..
        } if resolved == request_id => match status {
            RequestStatus::Skipped => Some(WaitOutcome::Skipped),
            RequestStatus::Expired => Some(WaitOutcome::TimedOut),
            // Answered: the answer is already in the slot.
            _ => None,
        },
        DaemonEvent::ShuttingDown => Some(WaitOutcome::TimedOut),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(json: serde_json::Value) -> HookInput {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn permission_request_from_hook_input() {
        let hook = input(serde_json::json!({
            "session_id": "abc",
            "hook_event_name": "PermissionRequest",
            "tool_name": "Bash",
            "tool_input": {"command": "cargo publish"},
            "some_future_field": 1
        }));
        match build_request(HookKind::Permission, &hook).unwrap() {
            Some(RequestKind::Permission { tool_name, tool_input }) => {
                assert_eq!(tool_name, "Bash");
                assert_eq!(tool_input["command"], "cargo publish");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn stop_hook_does_not_loop() {
        let hook = input(serde_json::json!({"session_id": "abc", "stop_hook_active": true}));
        assert!(build_request(HookKind::Stop, &hook).unwrap().is_none());

        let hook = input(serde_json::json!({"session_id": "abc"}));
        assert_eq!(
            build_request(HookKind::Stop, &hook).unwrap(),
            Some(RequestKind::FreeformInput {
                prompt: STOP_PROMPT.into()
            })
        );
    }

    #[test]
    fn question_options_accept_labels_and_strings() {
        let hook = input(serde_json::json!({
            "session_id": "abc",
            "tool_input": {"questions": [{
                "question": "Which database?",
                "options": [{"label": "Postgres", "description": "x"}, "SQLite"]
            }]}
        }));
        assert_eq!(
            build_request(HookKind::Question, &hook).unwrap(),
            Some(RequestKind::MultipleChoice {
                prompt: "Which database?".into(),
                options: vec!["Postgres".into(), "SQLite".into()],
            })
        );
    }

    #[test]
    fn release_events_for_other_requests_are_ignored() {
        let resolved = |id: &str, status| DaemonEvent::RequestResolved {
            request_id: id.into(),
            session_id: "s1".into(),
            status,
        };
        assert_eq!(release_outcome(&resolved("other", RequestStatus::Skipped), "mine"), None);
        assert_eq!(release_outcome(&resolved("mine", RequestStatus::Answered), "mine"), None);
        assert_eq!(
            release_outcome(&resolved("mine", RequestStatus::Skipped), "mine"),
            Some(WaitOutcome::Skipped)
        );
        assert_eq!(
            release_outcome(&DaemonEvent::Deactivated { sessions: vec![] }, "mine"),
            Some(WaitOutcome::Deactivated)
        );
    }

    #[test]
    fn question_without_options_becomes_freeform() {
        let hook = input(serde_json::json!({
            "session_id": "abc",
            "tool_input": {"question": "Name the branch"}
        }));
        assert!(matches!(
            build_request(HookKind::Question, &hook).unwrap(),
            Some(RequestKind::FreeformInput { .. })
        ));
    }
}
