//! Integration tests for reply routing: store, registry and handoff wired
//! together the way the daemon wires them.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use afk_relay::error::AfkError;
use afk_relay::handoff::{BlockingHandoff, WaitOutcome};
use afk_relay::queue::PendingRequestStore;
use afk_relay::request::{Answer, PermissionDecision, RequestKind};
use afk_relay::router::{Reply, ReplyRouter};
use afk_relay::session::SessionRegistry;

struct Fixture {
    _tmp: TempDir,
    store: Arc<PendingRequestStore>,
    registry: Arc<SessionRegistry>,
    handoff: Arc<BlockingHandoff>,
    router: ReplyRouter,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(PendingRequestStore::default());
    let registry = Arc::new(SessionRegistry::new(true));
    let handoff = Arc::new(BlockingHandoff::new(
        tmp.path().join("handoff"),
        Duration::from_millis(20),
    ));
    let router = ReplyRouter::new(store.clone(), registry.clone(), handoff.clone());
    Fixture {
        _tmp: tmp,
        store,
        registry,
        handoff,
        router,
    }
}

fn button(request_id: &str, token: &str) -> Reply {
    Reply::Button {
        request_id: request_id.into(),
        token: token.into(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permission_denied_by_button() {
    let fx = fixture();
    let request = fx
        .store
        .enqueue(
            "s1",
            RequestKind::Permission {
                tool_name: "Bash".into(),
                tool_input: serde_json::json!({ "command": "rm -rf /" }),
            },
        )
        .unwrap()
        .request;
    fx.registry.note_request("s1", &request.id);

    fx.router.route(&button(&request.id, "deny")).unwrap();

    let outcome = fx
        .handoff
        .wait("s1", &request.id, Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WaitOutcome::Answer(Answer::Decision {
            decision: PermissionDecision::Deny
        })
    );
    assert!(!fx.store.has_pending("s1"));
    assert_eq!(fx.registry.get("s1").unwrap().waiting_on, None);
}

#[tokio::test]
async fn free_text_reply_on_session_thread() {
    let fx = fixture();
    let request = fx
        .store
        .enqueue(
            "s2",
            RequestKind::FreeformInput {
                prompt: "Done. What next?".into(),
            },
        )
        .unwrap()
        .request;
    fx.registry.note_request("s2", &request.id);
    fx.registry.bind_thread(42, "s2");
    fx.store.mark_announced(&request.id, 42);

    let routed = fx
        .router
        .route(&Reply::Text {
            thread: Some(42),
            text: "use port 8080".into(),
        })
        .unwrap();
    assert_eq!(routed.request.id, request.id);

    let outcome = fx
        .handoff
        .wait("s2", &request.id, Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WaitOutcome::Answer(Answer::Text {
            text: "use port 8080".into()
        })
    );
}

#[test]
fn text_with_nothing_pending_is_no_active_request() {
    let fx = fixture();
    fx.registry.bind_thread(7, "s3");

    let err = fx
        .router
        .route(&Reply::Text {
            thread: Some(7),
            text: "hello?".into(),
        })
        .unwrap_err();
    assert!(matches!(err, AfkError::NoActiveRequest { session_id: Some(ref s) } if s == "s3"));
    assert!(fx.store.is_empty());
    assert!(fx.handoff.peek("s3").unwrap().is_none());
}

#[test]
fn text_with_no_known_session_is_no_active_request() {
    let fx = fixture();
    let err = fx
        .router
        .route(&Reply::Text {
            thread: None,
            text: "anyone?".into(),
        })
        .unwrap_err();
    assert!(matches!(err, AfkError::NoActiveRequest { session_id: None }));
}

// ---------------------------------------------------------------------------
// Stale and invalid replies
// ---------------------------------------------------------------------------

#[test]
fn button_for_missing_request_is_stale() {
    let fx = fixture();
    let err = fx
        .router
        .route(&button("00000000000000000000000000000000", "allow"))
        .unwrap_err();
    assert!(matches!(err, AfkError::StaleRequest { .. }));
}

#[test]
fn button_for_queued_but_inactive_request_is_stale() {
    let fx = fixture();
    let kind = RequestKind::Permission {
        tool_name: "Write".into(),
        tool_input: serde_json::json!({ "file_path": "a.txt" }),
    };
    fx.store.enqueue("s1", kind.clone()).unwrap();
    let queued = fx.store.enqueue("s1", kind).unwrap().request;

    let err = fx.router.route(&button(&queued.id, "allow")).unwrap_err();
    assert!(matches!(err, AfkError::StaleRequest { .. }));
    assert_eq!(fx.store.len(), 2);
}

#[test]
fn second_press_on_same_button_is_stale() {
    let fx = fixture();
    let request = fx
        .store
        .enqueue(
            "s1",
            RequestKind::Permission {
                tool_name: "Bash".into(),
                tool_input: serde_json::json!({ "command": "ls" }),
            },
        )
        .unwrap()
        .request;

    fx.router.route(&button(&request.id, "allow")).unwrap();
    let err = fx.router.route(&button(&request.id, "allow")).unwrap_err();
    assert!(matches!(err, AfkError::StaleRequest { .. }));

    // Exactly one answer was handed off.
    assert!(fx.handoff.take("s1", &request.id).unwrap().is_some());
    assert!(fx.handoff.take("s1", &request.id).unwrap().is_none());
}

#[test]
fn invalid_answer_keeps_request_pending() {
    let fx = fixture();
    let request = fx
        .store
        .enqueue(
            "s1",
            RequestKind::MultipleChoice {
                prompt: "Which database?".into(),
                options: vec!["Postgres".into(), "SQLite".into()],
            },
        )
        .unwrap()
        .request;
    fx.registry.bind_thread(9, "s1");
    fx.store.mark_announced(&request.id, 9);

    let err = fx
        .router
        .route(&Reply::Text {
            thread: Some(9),
            text: "MongoDB".into(),
        })
        .unwrap_err();
    assert!(matches!(err, AfkError::InvalidAnswerForKind { .. }));
    assert_eq!(fx.store.peek_active("s1").unwrap().id, request.id);

    let routed = fx
        .router
        .route(&Reply::Text {
            thread: Some(9),
            text: "sqlite".into(),
        })
        .unwrap();
    assert_eq!(
        routed.answer,
        Answer::Choice {
            index: 1,
            label: "SQLite".into()
        }
    );
}

#[test]
fn answering_promotes_next_request() {
    let fx = fixture();
    let first = fx
        .store
        .enqueue("s1", RequestKind::FreeformInput { prompt: "a".into() })
        .unwrap()
        .request;
    let second = fx
        .store
        .enqueue("s1", RequestKind::FreeformInput { prompt: "b".into() })
        .unwrap()
        .request;
    fx.registry.note_request("s1", &second.id);

    let routed = fx
        .router
        .route(&Reply::Text {
            thread: None,
            text: "go".into(),
        })
        .err();
    // No thread binding and nothing prompted yet: nowhere to route.
    assert!(routed.is_some());

    fx.registry.bind_thread(1, "s1");
    fx.store.mark_announced(&first.id, 1);
    let routed = fx
        .router
        .route(&Reply::Text {
            thread: Some(1),
            text: "go".into(),
        })
        .unwrap();
    assert_eq!(routed.request.id, first.id);
    assert_eq!(routed.promoted.unwrap().id, second.id);
    assert_eq!(
        fx.registry.get("s1").unwrap().waiting_on.as_deref(),
        Some(second.id.as_str())
    );

    // The answer is addressed to the first request only.
    assert!(fx.handoff.take("s1", &second.id).unwrap().is_none());
    assert!(fx.handoff.take("s1", &first.id).unwrap().is_some());
}

#[test]
fn text_cannot_answer_a_prompt_not_yet_shown() {
    let fx = fixture();
    let request = fx
        .store
        .enqueue("s1", RequestKind::FreeformInput { prompt: "a".into() })
        .unwrap()
        .request;
    fx.registry.bind_thread(3, "s1");

    let reply = Reply::Text {
        thread: Some(3),
        text: "go".into(),
    };
    let err = fx.router.route(&reply).unwrap_err();
    assert!(matches!(err, AfkError::NoActiveRequest { .. }));

    fx.store.mark_announced(&request.id, 3);
    assert_eq!(fx.router.route(&reply).unwrap().request.id, request.id);
}
