use serde_json::{json, Value};

use crate::handoff::WaitOutcome;
use crate::request::{Answer, PermissionDecision};

use super::HookKind;

/// The stdout document for a hook outcome. `None` means print nothing and let
/// the assistant continue with its local default.
pub fn render(kind: HookKind, outcome: &WaitOutcome) -> Option<Value> {
    let WaitOutcome::Answer(answer) = outcome else {
        return None;
    };

    match (kind, answer) {
        (HookKind::Permission, Answer::Decision { decision }) => {
            let decision = match decision {
                PermissionDecision::Allow => json!({ "behavior": "allow" }),
                PermissionDecision::Deny => json!({
                    "behavior": "deny",
                    "message": "Denied remotely by the operator."
                }),
            };
            Some(json!({
                "hookSpecificOutput": {
                    "hookEventName": "PermissionRequest",
                    "decision": decision
                }
            }))
        }
        (HookKind::Stop, Answer::Text { text }) => Some(json!({
            "decision": "block",
            "reason": text
        })),
        (HookKind::Question, Answer::Choice { label, .. })
        | (HookKind::Question, Answer::Text { text: label }) => Some(json!({
            "hookSpecificOutput": {
                "hookEventName": "PreToolUse",
                "permissionDecision": "deny",
                "permissionDecisionReason": format!("The user answered remotely: {label}")
            }
        })),
        (kind, answer) => {
            tracing::warn!(?kind, %answer, "answer does not fit hook, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_allow_and_deny() {
        let allow = render(
            HookKind::Permission,
            &WaitOutcome::Answer(Answer::Decision {
                decision: PermissionDecision::Allow,
            }),
        )
        .unwrap();
        assert_eq!(allow["hookSpecificOutput"]["decision"]["behavior"], "allow");

        let deny = render(
            HookKind::Permission,
            &WaitOutcome::Answer(Answer::Decision {
                decision: PermissionDecision::Deny,
            }),
        )
        .unwrap();
        assert_eq!(deny["hookSpecificOutput"]["decision"]["behavior"], "deny");
    }

    #[test]
    fn stop_blocks_with_instructions() {
        let out = render(
            HookKind::Stop,
            &WaitOutcome::Answer(Answer::Text {
                text: "use port 8080".into(),
            }),
        )
        .unwrap();
        assert_eq!(out, json!({"decision": "block", "reason": "use port 8080"}));
    }

    #[test]
    fn question_reason_carries_label() {
        let out = render(
            HookKind::Question,
            &WaitOutcome::Answer(Answer::Choice {
                index: 1,
                label: "SQLite".into(),
            }),
        )
        .unwrap();
        assert!(out["hookSpecificOutput"]["permissionDecisionReason"]
            .as_str()
            .unwrap()
            .ends_with("SQLite"));
    }

    #[test]
    fn fall_through_outcomes_print_nothing() {
        assert!(render(HookKind::Permission, &WaitOutcome::TimedOut).is_none());
        assert!(render(HookKind::Stop, &WaitOutcome::Deactivated).is_none());
    }
}
