use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

impl std::fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionDecision::Allow => write!(f, "allow"),
            PermissionDecision::Deny => write!(f, "deny"),
        }
    }
}

impl std::str::FromStr for PermissionDecision {
    type Err = String;

    /// Accepts the small vocabulary an operator is likely to type.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" | "approve" | "yes" | "y" | "ok" => Ok(PermissionDecision::Allow),
            "deny" | "reject" | "no" | "n" => Ok(PermissionDecision::Deny),
            other => Err(format!("not a permission decision: {other}")),
        }
    }
}

/// What a pending request asks the operator for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestKind {
    /// The assistant wants to run a tool.
    Permission {
        tool_name: String,
        tool_input: serde_json::Value,
    },
    /// The assistant stopped and wants follow-up instructions.
    FreeformInput { prompt: String },
    /// The assistant asked a question with a fixed set of answers.
    MultipleChoice { prompt: String, options: Vec<String> },
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Permission { .. } => "permission",
            RequestKind::FreeformInput { .. } => "freeform",
            RequestKind::MultipleChoice { .. } => "multiple_choice",
        }
    }

    /// One-line summary used by queue listings.
    pub fn summary(&self) -> String {
        match self {
            RequestKind::Permission {
                tool_name,
                tool_input,
            } => format!("{} {}", tool_name, tool_input),
            RequestKind::FreeformInput { prompt } => prompt.clone(),
            RequestKind::MultipleChoice { prompt, options } => {
                format!("{} [{}]", prompt, options.join(" | "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Answered,
    Skipped,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Answered => write!(f, "answered"),
            RequestStatus::Skipped => write!(f, "skipped"),
            RequestStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A question raised by a hook that is waiting for the remote operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: String,

    /// Arrival number; defines the global listing order.
    pub seq: u64,

    pub session_id: String,

    #[serde(flatten)]
    pub kind: RequestKind,

    pub created_at: DateTime<Utc>,

    pub status: RequestStatus,

    /// Chat message the request was announced in, once it became active.
    #[serde(default)]
    pub announced_message_id: Option<i64>,
}

/// A resolved answer, as handed to the waiting hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Answer {
    Decision { decision: PermissionDecision },
    Text { text: String },
    Choice { index: usize, label: String },
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Answer::Decision { decision } => write!(f, "{decision}"),
            Answer::Text { text } => write!(f, "{text}"),
            Answer::Choice { label, .. } => write!(f, "{label}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_vocabulary() {
        assert_eq!("Allow".parse::<PermissionDecision>(), Ok(PermissionDecision::Allow));
        assert_eq!(" y ".parse::<PermissionDecision>(), Ok(PermissionDecision::Allow));
        assert_eq!("REJECT".parse::<PermissionDecision>(), Ok(PermissionDecision::Deny));
        assert!("maybe".parse::<PermissionDecision>().is_err());
    }

    #[test]
    fn pending_request_json_is_flat() {
        let req = PendingRequest {
            id: "abc".into(),
            seq: 1,
            session_id: "s1".into(),
            kind: RequestKind::FreeformInput {
                prompt: "what next?".into(),
            },
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            announced_message_id: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["kind"], "freeform_input");
        assert_eq!(value["prompt"], "what next?");
        assert_eq!(value["status"], "pending");
    }
}
