use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{AfkError, Result};
use crate::request::{PendingRequest, RequestKind, RequestStatus};

/// Default cap on requests queued for a single session.
pub const DEFAULT_MAX_PENDING_PER_SESSION: usize = 8;

/// Result of a successful enqueue.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub request: PendingRequest,
    /// True when the request is at the head of its session queue and should
    /// be shown to the operator right away.
    pub active: bool,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    requests: HashMap<String, PendingRequest>,
    by_session: HashMap<String, VecDeque<String>>,
    order: BTreeMap<u64, String>,
}

impl Inner {
    fn take(&mut self, request_id: &str, status: RequestStatus) -> Option<PendingRequest> {
        let mut request = self.requests.remove(request_id)?;
        self.order.remove(&request.seq);
        if let Some(queue) = self.by_session.get_mut(&request.session_id) {
            queue.retain(|id| id != request_id);
            if queue.is_empty() {
                self.by_session.remove(&request.session_id);
            }
        }
        request.status = status;
        Some(request)
    }

    fn take_many(&mut self, ids: Vec<String>, status: RequestStatus) -> Vec<PendingRequest> {
        let mut taken: Vec<PendingRequest> = ids
            .iter()
            .filter_map(|id| self.take(id, status))
            .collect();
        taken.sort_by_key(|r| r.seq);
        taken
    }
}

/// Outstanding requests, ordered globally by arrival and FIFO per session.
///
/// Only the head of each session's queue is active; the rest wait until the
/// requests ahead of them are removed.
pub struct PendingRequestStore {
    inner: Mutex<Inner>,
    max_per_session: AtomicUsize,
}

impl Default for PendingRequestStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_PER_SESSION)
    }
}

impl PendingRequestStore {
    pub fn new(max_per_session: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_per_session: AtomicUsize::new(max_per_session.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_max_per_session(&self, max: usize) {
        self.max_per_session.store(max.max(1), Ordering::Relaxed);
    }

    /// Append a new pending request for `session_id`.
    pub fn enqueue(&self, session_id: &str, kind: RequestKind) -> Result<Enqueued> {
        let max = self.max_per_session.load(Ordering::Relaxed);
        let mut inner = self.lock();

        let depth = inner.by_session.get(session_id).map_or(0, VecDeque::len);
        if depth >= max {
            return Err(AfkError::QueueFull {
                session_id: session_id.to_string(),
                depth,
            });
        }

        inner.next_seq += 1;
        let request = PendingRequest {
            id: uuid::Uuid::new_v4().simple().to_string(),
            seq: inner.next_seq,
            session_id: session_id.to_string(),
            kind,
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            announced_message_id: None,
        };

        inner.order.insert(request.seq, request.id.clone());
        inner
            .requests
            .insert(request.id.clone(), request.clone());
        let queue = inner.by_session.entry(session_id.to_string()).or_default();
        queue.push_back(request.id.clone());
        let active = queue.len() == 1;

        Ok(Enqueued { request, active })
    }

    /// The request currently shown to the operator for `session_id`.
    pub fn peek_active(&self, session_id: &str) -> Option<PendingRequest> {
        let inner = self.lock();
        let head = inner.by_session.get(session_id)?.front()?;
        inner.requests.get(head).cloned()
    }

    /// Heads of every session queue, in arrival order.
    pub fn active_requests(&self) -> Vec<PendingRequest> {
        let inner = self.lock();
        let mut heads: Vec<PendingRequest> = inner
            .by_session
            .values()
            .filter_map(|q| q.front())
            .filter_map(|id| inner.requests.get(id).cloned())
            .collect();
        heads.sort_by_key(|r| r.seq);
        heads
    }

    pub fn get(&self, request_id: &str) -> Option<PendingRequest> {
        self.lock().requests.get(request_id).cloned()
    }

    /// Every outstanding request in global arrival order.
    pub fn list_all(&self) -> Vec<PendingRequest> {
        let inner = self.lock();
        inner
            .order
            .values()
            .filter_map(|id| inner.requests.get(id).cloned())
            .collect()
    }

    pub fn has_pending(&self, session_id: &str) -> bool {
        self.lock().by_session.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the chat message a request was announced in.
    /// Returns false if the request is already gone.
    pub fn mark_announced(&self, request_id: &str, message_id: i64) -> bool {
        let mut inner = self.lock();
        match inner.requests.get_mut(request_id) {
            Some(request) => {
                request.announced_message_id = Some(message_id);
                true
            }
            None => false,
        }
    }

    /// Transition a request to a terminal status and drop it from the store.
    ///
    /// A second removal of the same id fails with `NotFound`, which callers
    /// treat as "someone else already resolved it".
    pub fn remove(&self, request_id: &str, status: RequestStatus) -> Result<PendingRequest> {
        if !status.is_terminal() {
            return Err(AfkError::InvalidRequest {
                reason: format!("cannot remove a request as {status}"),
            });
        }
        self.lock()
            .take(request_id, status)
            .ok_or_else(|| AfkError::NotFound {
                request_id: request_id.to_string(),
            })
    }

    /// Skip every request queued for `session_id`.
    pub fn skip(&self, session_id: &str) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        let ids: Vec<String> = inner
            .by_session
            .get(session_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default();
        inner.take_many(ids, RequestStatus::Skipped)
    }

    /// Skip every outstanding request.
    pub fn flush_all(&self) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        let ids: Vec<String> = inner.order.values().cloned().collect();
        inner.take_many(ids, RequestStatus::Skipped)
    }

    /// Expire requests created before `cutoff`.
    pub fn expire_older_than(&self, cutoff: DateTime<Utc>) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        let ids: Vec<String> = inner
            .order
            .values()
            .filter(|id| {
                inner
                    .requests
                    .get(*id)
                    .is_some_and(|r| r.created_at < cutoff)
            })
            .cloned()
            .collect();
        inner.take_many(ids, RequestStatus::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(text: &str) -> RequestKind {
        RequestKind::FreeformInput {
            prompt: text.into(),
        }
    }

    #[test]
    fn remove_keeps_indexes_consistent() {
        let store = PendingRequestStore::default();
        let a = store.enqueue("s1", prompt("a")).unwrap().request;
        store.enqueue("s1", prompt("b")).unwrap();

        store.remove(&a.id, RequestStatus::Answered).unwrap();
        let inner = store.lock();
        assert_eq!(inner.requests.len(), 1);
        assert_eq!(inner.order.len(), 1);
        assert_eq!(inner.by_session["s1"].len(), 1);
    }

    #[test]
    fn empty_session_queues_are_dropped() {
        let store = PendingRequestStore::default();
        let a = store.enqueue("s1", prompt("a")).unwrap().request;
        store.remove(&a.id, RequestStatus::Skipped).unwrap();
        assert!(!store.has_pending("s1"));
        assert!(store.lock().by_session.is_empty());
    }

    #[test]
    fn pending_is_not_a_removal_status() {
        let store = PendingRequestStore::default();
        let a = store.enqueue("s1", prompt("a")).unwrap().request;
        assert!(store.remove(&a.id, RequestStatus::Pending).is_err());
        assert!(store.get(&a.id).is_some());
    }
}
