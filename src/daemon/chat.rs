//! Inbound chat updates: button presses, free-text replies and slash
//! commands from the operator.

use tracing::{debug, warn};

use crate::config::Mode;
use crate::error::AfkError;
use crate::router::{parse_button_payload, Reply, Routed};
use crate::transport::InboundUpdate;

use super::{render, Daemon};

/// Longest answer echoed back in a confirmation.
const MAX_ECHO_CHARS: usize = 80;

/// Words that make a `/`-prefixed message a command. Anything else starting
/// with `/` is an answer, e.g. a path.
const CHAT_COMMANDS: &[&str] = &[
    "skip",
    "flush",
    "back",
    "deactivate",
    "afk",
    "queue",
    "status",
    "help",
    "start",
];

/// `/name@bot rest` -> `("name", "rest")` when `name` is a known command.
fn parse_chat_command(text: &str) -> Option<(String, Option<&str>)> {
    let command_line = text.trim().strip_prefix('/')?;
    let mut parts = command_line.split_whitespace();
    // Group chats append the bot name: `/skip@afk_bot`.
    let name = parts.next()?.split('@').next()?.to_lowercase();
    if !CHAT_COMMANDS.contains(&name.as_str()) {
        return None;
    }
    Some((name, parts.next()))
}

/// How a `/skip` argument matched the known sessions.
#[derive(Debug, PartialEq, Eq)]
enum SessionMatch {
    One(String),
    None,
    Ambiguous(usize),
}

/// Match `arg` against `known` session ids: an exact id, or a prefix shared
/// by exactly one session (prompts only show the first eight characters).
fn match_session<'a>(arg: &str, known: impl IntoIterator<Item = &'a str>) -> SessionMatch {
    let mut candidates: Vec<&str> = known.into_iter().filter(|id| id.starts_with(arg)).collect();
    candidates.sort_unstable();
    candidates.dedup();
    if candidates.contains(&arg) {
        return SessionMatch::One(arg.to_string());
    }
    match candidates.as_slice() {
        [] => SessionMatch::None,
        [only] => SessionMatch::One(only.to_string()),
        many => SessionMatch::Ambiguous(many.len()),
    }
}

impl Daemon {
    pub async fn handle_update(&self, update: InboundUpdate) {
        match update {
            InboundUpdate::Callback {
                callback_id, data, ..
            } => {
                let toast = self.handle_button(&data);
                if let Err(e) = self
                    .transport
                    .answer_callback(&callback_id, toast.as_deref())
                    .await
                {
                    debug!(error = %e, "failed to acknowledge button press");
                }
            }
            InboundUpdate::Text { text, reply_to, .. } => match parse_chat_command(&text) {
                Some((name, arg)) => self.handle_chat_command(&name, arg, reply_to),
                None => self.handle_text(reply_to, text),
            },
            InboundUpdate::Ignored { update_id } => debug!(update_id, "ignored update"),
        }
    }

    /// Route a button press. Returns the toast shown to the operator.
    fn handle_button(&self, data: &str) -> Option<String> {
        let Some(reply) = parse_button_payload(data) else {
            warn!(data, "unrecognised button payload");
            return Some("Unrecognised button.".into());
        };

        match self.router.route(&reply) {
            Ok(routed) => {
                let toast = format!("✓ {}", routed.answer);
                self.after_routed(routed);
                Some(toast)
            }
            // Lost a race with another reply for the same request.
            Err(AfkError::NotFound { .. }) => None,
            Err(AfkError::StaleRequest { .. }) => Some("This request is no longer pending.".into()),
            Err(e) => {
                self.report_route_failure(&e);
                Some(format!("⚠️ {e}"))
            }
        }
    }

    fn handle_text(&self, reply_to: Option<i64>, text: String) {
        let reply = Reply::Text {
            thread: reply_to,
            text,
        };

        match self.router.route(&reply) {
            Ok(routed) => {
                self.notice(format!(
                    "✓ Sent to [{}]: {}",
                    render::short_session(&routed.request.session_id),
                    render::truncate(&routed.answer.to_string(), MAX_ECHO_CHARS)
                ));
                self.after_routed(routed);
            }
            Err(AfkError::NoActiveRequest { .. }) => {
                self.notice("Nothing is waiting for input right now.");
            }
            Err(AfkError::InvalidAnswerForKind { .. }) => {
                // The request stays pending; show it again with a hint.
                if let Ok(request) = self.router.resolve(&reply) {
                    self.queue_announce(
                        &request.id,
                        Some("That doesn't answer this request.".into()),
                    );
                }
            }
            Err(AfkError::NotFound { .. }) => {}
            Err(e) => self.report_route_failure(&e),
        }
    }

    fn after_routed(&self, routed: Routed) {
        if let Some(next) = &routed.promoted {
            debug!(request_id = %next.id, "next request promoted");
        }
        self.after_removal(std::slice::from_ref(&routed.request));
    }

    fn skip_from_chat(&self, arg: Option<&str>, reply_to: Option<i64>) -> String {
        let target = match arg {
            Some(arg) => {
                let known = self.registry.snapshot();
                let pending = self.store.list_all();
                let ids = known
                    .iter()
                    .map(|s| s.session_id.as_str())
                    .chain(pending.iter().map(|r| r.session_id.as_str()));
                match match_session(arg, ids) {
                    SessionMatch::One(session_id) => session_id,
                    SessionMatch::None => return format!("No session matches [{arg}]."),
                    SessionMatch::Ambiguous(count) => {
                        return format!(
                            "[{arg}] matches {count} sessions; give more of the session id."
                        )
                    }
                }
            }
            None => match self.registry.resolve_thread(reply_to) {
                Some(session_id) => session_id,
                None => return "Nothing to skip.".to_string(),
            },
        };

        let skipped = self.skip_session(&target);
        if skipped.is_empty() {
            format!("Nothing queued for [{}].", render::short_session(&target))
        } else {
            format!(
                "Skipped {} request(s) for [{}]; it continues at the terminal.",
                skipped.len(),
                render::short_session(&target)
            )
        }
    }

    fn report_route_failure(&self, err: &AfkError) {
        warn!(error = %err, "failed to route reply");
        if let AfkError::HandoffWrite { session_id, .. } = err {
            self.notice(format!(
                "⚠️ Could not deliver the answer to [{}]: {err}",
                render::short_session(session_id)
            ));
        }
    }

    /// Known `/name [arg]` commands. `help` and `start` get the help text.
    fn handle_chat_command(&self, name: &str, arg: Option<&str>, reply_to: Option<i64>) {
        let reply = match name {
            "skip" => self.skip_from_chat(arg, reply_to),
            "flush" => format!("Flushed {} request(s).", self.flush_all().len()),
            "back" | "deactivate" => match self.deactivate() {
                Ok(released) => format!(
                    "Back to local mode; released {} waiting session(s).",
                    released.len()
                ),
                Err(e) => format!("⚠️ Deactivation failed: {e}"),
            },
            "afk" => match self.set_mode(Mode::Afk) {
                Ok(()) => "AFK mode on. Requests will be sent here.".to_string(),
                Err(e) => format!("⚠️ {e}"),
            },
            "queue" | "status" => render::queue_listing(&self.store.list_all(), self.mode()),
            _ => render::HELP.to_string(),
        };
        self.notice(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_words_are_commands() {
        assert_eq!(parse_chat_command("/skip abc"), Some(("skip".into(), Some("abc"))));
        assert_eq!(parse_chat_command(" /Flush@afk_bot "), Some(("flush".into(), None)));
        assert_eq!(parse_chat_command("/tmp/out is fine"), None);
        assert_eq!(parse_chat_command("/nonsense"), None);
        assert_eq!(parse_chat_command("skip"), None);
    }

    #[test]
    fn sessions_match_by_unique_prefix() {
        let known = ["0123456789abcdef", "01239999", "fedcba98"];
        assert_eq!(
            match_session("01234567", known),
            SessionMatch::One("0123456789abcdef".into())
        );
        assert_eq!(match_session("0123", known), SessionMatch::Ambiguous(2));
        assert_eq!(match_session("zzz", known), SessionMatch::None);
        assert_eq!(match_session("01239999", known), SessionMatch::One("01239999".into()));
    }
}
