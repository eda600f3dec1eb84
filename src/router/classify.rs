use crate::error::{AfkError, Result};
use crate::request::{Answer, PermissionDecision, RequestKind};

/// Interpret an operator reply against the shape of the request it answers.
pub fn classify(kind: &RequestKind, reply: &str) -> Result<Answer> {
    let trimmed = reply.trim();
    let invalid = || AfkError::InvalidAnswerForKind {
        kind: kind.name().to_string(),
        answer: reply.to_string(),
    };

    match kind {
        RequestKind::Permission { .. } => trimmed
            .parse::<PermissionDecision>()
            .map(|decision| Answer::Decision { decision })
            .map_err(|_| invalid()),

        RequestKind::MultipleChoice { options, .. } => {
            let wanted = trimmed.to_lowercase();
            if let Some(index) = options
                .iter()
                .position(|o| o.trim().to_lowercase() == wanted)
            {
                return Ok(Answer::Choice {
                    index,
                    label: options[index].clone(),
                });
            }
            // 1-based option number, as carried by the inline buttons.
            match trimmed.parse::<usize>() {
                Ok(n) if n >= 1 && n <= options.len() => Ok(Answer::Choice {
                    index: n - 1,
                    label: options[n - 1].clone(),
                }),
                _ => Err(invalid()),
            }
        }

        RequestKind::FreeformInput { .. } => {
            if trimmed.is_empty() {
                Err(invalid())
            } else {
                Ok(Answer::Text {
                    text: reply.to_string(),
                })
            }
        }
    }
}

/// Button tokens offered for a request kind, as `(label, token)` pairs.
pub fn button_tokens(kind: &RequestKind) -> Vec<(String, String)> {
    match kind {
        RequestKind::Permission { .. } => vec![
            ("✅ Allow".to_string(), PermissionDecision::Allow.to_string()),
            ("❌ Deny".to_string(), PermissionDecision::Deny.to_string()),
        ],
        RequestKind::MultipleChoice { options, .. } => options
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), (i + 1).to_string()))
            .collect(),
        RequestKind::FreeformInput { .. } => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices() -> RequestKind {
        RequestKind::MultipleChoice {
            prompt: "Which database?".into(),
            options: vec!["Postgres".into(), "SQLite".into()],
        }
    }

    #[test]
    fn choice_by_label_is_case_insensitive() {
        let answer = classify(&choices(), "  sqlite ").unwrap();
        assert_eq!(
            answer,
            Answer::Choice {
                index: 1,
                label: "SQLite".into()
            }
        );
    }

    #[test]
    fn choice_by_number() {
        let answer = classify(&choices(), "1").unwrap();
        assert_eq!(answer.to_string(), "Postgres");
        assert!(classify(&choices(), "0").is_err());
        assert!(classify(&choices(), "3").is_err());
    }

    #[test]
    fn permission_rejects_prose() {
        let kind = RequestKind::Permission {
            tool_name: "Bash".into(),
            tool_input: serde_json::json!({"command": "ls"}),
        };
        let err = classify(&kind, "sure, go ahead").unwrap_err();
        assert!(matches!(err, AfkError::InvalidAnswerForKind { .. }));
    }

    #[test]
    fn freeform_keeps_text_verbatim() {
        let kind = RequestKind::FreeformInput {
            prompt: "Next?".into(),
        };
        assert_eq!(
            classify(&kind, " run the tests\n").unwrap(),
            Answer::Text {
                text: " run the tests\n".into()
            }
        );
        assert!(classify(&kind, "   ").is_err());
    }
}
