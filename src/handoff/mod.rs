//! Cross-process answer delivery.
//!
//! The daemon writes a session's answer into a slot file; the hook process
//! for that session polls for the file, consumes it, and exits. Slot writes
//! go through a temp file and a rename, so a reader never sees a partial
//! payload, and readers claim a slot with a rename of their own, so a payload
//! is consumed at most once. Payloads carry the id of the request they
//! resolve and a waiter only consumes its own.

pub mod slot;

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::request::Answer;
use crate::session::SessionRegistry;

pub use slot::{SlotContent, DEACTIVATE_SENTINEL};

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Answer(Answer),
    TimedOut,
    Deactivated,
    /// The request was skipped or flushed before anyone answered it.
    Skipped,
}

impl From<SlotContent> for WaitOutcome {
    fn from(content: SlotContent) -> Self {
        match content {
            SlotContent::Answer { answer, .. } => WaitOutcome::Answer(answer),
            SlotContent::Deactivated { .. } => WaitOutcome::Deactivated,
        }
    }
}

pub struct BlockingHandoff {
    dir: PathBuf,
    poll_interval: Duration,
}

impl BlockingHandoff {
    pub fn new(dir: PathBuf, poll_interval: Duration) -> Self {
        Self {
            dir,
            poll_interval,
        }
    }

    pub fn slot_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(slot::slot_file_name(session_id))
    }

    /// Publish `answer` to the hook waiting on `request_id`.
    ///
    /// Failures are returned as `HandoffWrite` and are not retried: a late
    /// retry could hand a stale answer to a session that has moved on.
    pub fn deliver(&self, session_id: &str, request_id: &str, answer: &Answer) -> Result<()> {
        self.write(
            session_id,
            &SlotContent::Answer {
                request_id: request_id.to_string(),
                answer: answer.clone(),
            },
        )?;
        tracing::debug!(session_id, request_id, %answer, "answer delivered");
        Ok(())
    }

    /// Release the hook waiting on `request_id` with the deactivation sentinel.
    pub fn deactivate(&self, session_id: &str, request_id: &str) -> Result<()> {
        self.write(
            session_id,
            &SlotContent::Deactivated {
                request_id: request_id.to_string(),
            },
        )
    }

    /// Release every session the registry believes has a live wait.
    /// Returns the sessions that were released.
    ///
    /// A slot still holding an uncollected answer for an earlier request is
    /// left alone; that answer's hook has yet to read it.
    pub fn deactivate_all(&self, registry: &SessionRegistry) -> Result<Vec<String>> {
        let mut released = Vec::new();
        for (session_id, request_id) in registry.waiting_sessions() {
            if self.uncollected_answer_age(&session_id, &request_id).is_some() {
                registry.set_waiting(&session_id, None);
                released.push(session_id);
                continue;
            }
            match self.deactivate(&session_id, &request_id) {
                Ok(()) => {
                    registry.set_waiting(&session_id, None);
                    released.push(session_id);
                }
                Err(e) => tracing::warn!(%session_id, error = %e, "failed to release waiter"),
            }
        }
        Ok(released)
    }

    fn write(&self, session_id: &str, content: &SlotContent) -> Result<()> {
        let bytes = slot::encode(content)?;
        slot::write_atomic(&self.slot_path(session_id), &bytes)
            .map_err(|e| slot::write_failure(session_id, e))
    }

    /// Check the slot once, consuming it if it holds a payload for `request_id`.
    pub fn take(&self, session_id: &str, request_id: &str) -> Result<Option<SlotContent>> {
        slot::consume(&self.slot_path(session_id), request_id)
    }

    /// Read the slot without consuming it.
    pub fn peek(&self, session_id: &str) -> Result<Option<SlotContent>> {
        slot::peek(&self.slot_path(session_id))
    }

    /// Age of an answer in the slot that belongs to a request other than
    /// `request_id` and has not been collected yet.
    pub fn uncollected_answer_age(&self, session_id: &str, request_id: &str) -> Option<Duration> {
        match self.peek(session_id) {
            Ok(Some(SlotContent::Answer {
                request_id: owner, ..
            })) if owner != request_id => slot::age(&self.slot_path(session_id)),
            _ => None,
        }
    }

    /// Drop any unread payload for `session_id`. Returns true if one existed.
    pub fn clear(&self, session_id: &str) -> Result<bool> {
        match std::fs::remove_file(self.slot_path(session_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Block until a payload for `request_id` arrives in the session's slot,
    /// `timeout` elapses, or `cancel` fires. Cancellation is reported as
    /// `TimedOut` so the caller falls through to its default behavior. A
    /// timed-out wait leaves the slot untouched.
    pub async fn wait(
        &self,
        session_id: &str,
        request_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(content) = self.take(session_id, request_id)? {
                return Ok(content.into());
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id, request_id, "wait interrupted");
                    return Ok(WaitOutcome::TimedOut);
                }
            }
        }
    }
}
