//! Operator-facing message text.

use crate::config::Mode;
use crate::request::{PendingRequest, RequestKind};
use crate::router::{button_payload, button_tokens};
use crate::transport::Button;

/// Longest tool input shown inline in a permission prompt.
const MAX_TOOL_INPUT_CHARS: usize = 1500;

pub const HELP: &str = "afk-relay commands:\n\
/queue - list pending requests\n\
/skip [session] - skip the requests of a session (reply to its message or give the id shown in brackets)\n\
/flush - skip every pending request\n\
/afk - route requests here\n\
/back - release every waiting session and return to local mode\n\n\
Reply to a request message to answer it, or tap its buttons.";

/// Short, stable prefix of a session id for display.
pub fn short_session(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

/// Message announcing `request`. `hint` is prepended when re-prompting after
/// an answer that didn't fit.
pub fn request_message(request: &PendingRequest, hint: Option<&str>) -> String {
    let session = short_session(&request.session_id);
    let body = match &request.kind {
        RequestKind::Permission {
            tool_name,
            tool_input,
        } => {
            let input = match tool_input.get("command").and_then(|c| c.as_str()) {
                Some(command) => command.to_string(),
                None => serde_json::to_string_pretty(tool_input)
                    .unwrap_or_else(|_| tool_input.to_string()),
            };
            format!(
                "🔐 [{session}] wants to use {tool_name}:\n\n{}\n\nAllow or deny?",
                truncate(&input, MAX_TOOL_INPUT_CHARS)
            )
        }
        RequestKind::FreeformInput { prompt } => format!(
            "💬 [{session}] is waiting for input:\n\n{prompt}\n\nReply to this message with your instructions."
        ),
        RequestKind::MultipleChoice { prompt, options } => {
            let listed: Vec<String> = options
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}. {}", i + 1, o))
                .collect();
            format!("❓ [{session}] asks:\n\n{prompt}\n\n{}", listed.join("\n"))
        }
    };
    match hint {
        Some(hint) => format!("{hint}\n\n{body}"),
        None => body,
    }
}

pub fn buttons(request: &PendingRequest) -> Vec<Button> {
    button_tokens(&request.kind)
        .into_iter()
        .map(|(label, token)| Button {
            label,
            payload: button_payload(&request.id, &token),
        })
        .collect()
}

pub fn queue_listing(requests: &[PendingRequest], mode: Mode) -> String {
    if requests.is_empty() {
        return format!("Mode: {mode}. No pending requests.");
    }
    let mut lines = vec![format!("Mode: {mode}. {} pending:", requests.len())];
    for request in requests {
        lines.push(format!(
            "• [{}] {} {}",
            short_session(&request.session_id),
            request.kind.name(),
            truncate(&request.kind.summary(), 60)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestStatus;
    use chrono::Utc;

    fn request(kind: RequestKind) -> PendingRequest {
        PendingRequest {
            id: "f00d".into(),
            seq: 1,
            session_id: "0123456789abcdef".into(),
            kind,
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            announced_message_id: None,
        }
    }

    #[test]
    fn permission_prompt_shows_command() {
        let req = request(RequestKind::Permission {
            tool_name: "Bash".into(),
            tool_input: serde_json::json!({"command": "rm -rf /"}),
        });
        let text = request_message(&req, None);
        assert!(text.contains("[01234567]"));
        assert!(text.contains("rm -rf /"));

        let payloads: Vec<String> = buttons(&req).into_iter().map(|b| b.payload).collect();
        assert_eq!(payloads, vec!["f00d:allow", "f00d:deny"]);
    }

    #[test]
    fn freeform_has_no_buttons() {
        let req = request(RequestKind::FreeformInput {
            prompt: "Done. Next?".into(),
        });
        assert!(buttons(&req).is_empty());
        assert!(request_message(&req, Some("Try again.")).starts_with("Try again."));
    }
}
