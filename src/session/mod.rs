use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of chat-message -> session bindings kept for reply routing.
const MAX_THREAD_BINDINGS: usize = 512;

/// Daemon-side view of one assistant session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,

    /// Whether requests from this session go to the remote operator.
    pub afk_active: bool,

    /// Most recent request raised by the session. The request may already be
    /// gone from the queue.
    pub last_request_id: Option<String>,

    pub last_activity_at: DateTime<Utc>,

    /// Request whose hook is believed to be blocked on the session's slot:
    /// the head of the session's queue.
    pub waiting_on: Option<String>,
}

impl Session {
    fn new(session_id: &str, afk_active: bool) -> Self {
        Self {
            session_id: session_id.to_string(),
            afk_active,
            last_request_id: None,
            last_activity_at: Utc::now(),
            waiting_on: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    threads: HashMap<i64, String>,
    thread_order: VecDeque<i64>,
    last_prompted: Option<String>,
    default_afk: bool,
}

impl Inner {
    fn entry(&mut self, session_id: &str) -> &mut Session {
        let default_afk = self.default_afk;
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, default_afk))
    }
}

/// In-memory registry of sessions known to the daemon.
///
/// Sessions are created on first reference and live as long as the daemon.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}

impl SessionRegistry {
    /// `default_afk` is the AFK state given to sessions seen for the first time.
    pub fn new(default_afk: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                default_afk,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a session, creating it if needed, and bump its activity time.
    pub fn touch(&self, session_id: &str) -> Session {
        let mut inner = self.lock();
        let session = inner.entry(session_id);
        session.last_activity_at = Utc::now();
        session.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.lock().sessions.get(session_id).cloned()
    }

    pub fn is_afk(&self, session_id: &str) -> bool {
        self.lock().entry(session_id).afk_active
    }

    pub fn set_afk(&self, session_id: &str, active: bool) -> Session {
        let mut inner = self.lock();
        let session = inner.entry(session_id);
        session.afk_active = active;
        session.last_activity_at = Utc::now();
        session.clone()
    }

    /// Switch every known session (and future ones) to `active`.
    /// Returns the ids whose state actually changed.
    pub fn set_all_afk(&self, active: bool) -> Vec<String> {
        let mut inner = self.lock();
        inner.default_afk = active;
        let mut changed: Vec<String> = inner
            .sessions
            .values_mut()
            .filter(|s| s.afk_active != active)
            .map(|s| {
                s.afk_active = active;
                s.session_id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    pub fn default_afk(&self) -> bool {
        self.lock().default_afk
    }

    /// Record that `session_id` raised `request_id`.
    pub fn note_request(&self, session_id: &str, request_id: &str) {
        let mut inner = self.lock();
        let session = inner.entry(session_id);
        session.last_request_id = Some(request_id.to_string());
        session.last_activity_at = Utc::now();
    }

    pub fn set_waiting(&self, session_id: &str, request_id: Option<&str>) {
        let mut inner = self.lock();
        inner.entry(session_id).waiting_on = request_id.map(str::to_string);
    }

    /// `(session_id, request_id)` for every session with a live wait, sorted
    /// by session id.
    pub fn waiting_sessions(&self) -> Vec<(String, String)> {
        let inner = self.lock();
        let mut waiting: Vec<(String, String)> = inner
            .sessions
            .values()
            .filter_map(|s| Some((s.session_id.clone(), s.waiting_on.clone()?)))
            .collect();
        waiting.sort();
        waiting
    }

    /// Remember that chat message `message_id` was sent on behalf of `session_id`.
    pub fn bind_thread(&self, message_id: i64, session_id: &str) {
        let mut inner = self.lock();
        if inner
            .threads
            .insert(message_id, session_id.to_string())
            .is_none()
        {
            inner.thread_order.push_back(message_id);
        }
        while inner.thread_order.len() > MAX_THREAD_BINDINGS {
            if let Some(oldest) = inner.thread_order.pop_front() {
                inner.threads.remove(&oldest);
            }
        }
        inner.last_prompted = Some(session_id.to_string());
    }

    /// Map the chat message a reply was attached to onto a session.
    ///
    /// Replies that quote a known message resolve to that message's session.
    /// Anything else goes to the session that was prompted most recently.
    pub fn resolve_thread(&self, thread: Option<i64>) -> Option<String> {
        let inner = self.lock();
        thread
            .and_then(|id| inner.threads.get(&id).cloned())
            .or_else(|| inner.last_prompted.clone())
    }

    /// All sessions, sorted by id.
    pub fn snapshot(&self) -> Vec<Session> {
        let inner = self.lock();
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_inherit_default_afk() {
        let registry = SessionRegistry::new(false);
        assert!(!registry.is_afk("a"));

        let changed = registry.set_all_afk(true);
        assert_eq!(changed, vec!["a".to_string()]);
        assert!(registry.is_afk("b"));
    }

    #[test]
    fn thread_bindings_are_bounded() {
        let registry = SessionRegistry::default();
        for id in 0..(MAX_THREAD_BINDINGS as i64 + 10) {
            registry.bind_thread(id, "s");
        }
        let inner = registry.lock();
        assert_eq!(inner.threads.len(), MAX_THREAD_BINDINGS);
        assert!(!inner.threads.contains_key(&0));
    }

    #[test]
    fn waiting_sessions_name_the_blocked_request() {
        let registry = SessionRegistry::default();
        registry.set_waiting("b", Some("req-b"));
        registry.set_waiting("a", Some("req-a"));
        registry.set_waiting("c", Some("req-c"));
        registry.set_waiting("c", None);

        assert_eq!(
            registry.waiting_sessions(),
            vec![
                ("a".to_string(), "req-a".to_string()),
                ("b".to_string(), "req-b".to_string()),
            ]
        );
    }
}
