//! The long-running relay: owns the request store, session registry and
//! handoff directory, serves the control socket, polls the chat transport
//! and expires stale requests.
//!
//! Everything that mutates shared state goes through the methods here so the
//! control socket and chat commands stay consistent with each other.

pub mod chat;
pub mod control;
pub mod render;
pub mod voice;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Mode, Settings};
use crate::error::{AfkError, Result};
use crate::handoff::BlockingHandoff;
use crate::ipc::socket_server::IpcServer;
use crate::ipc::{ControlHandler, DaemonEvent, ResponseData, StatusReport};
use crate::queue::PendingRequestStore;
use crate::request::{PendingRequest, RequestKind, RequestStatus};
use crate::router::ReplyRouter;
use crate::session::SessionRegistry;
use crate::transport::ChatTransport;

use self::voice::VoiceControl;

const EVENT_CAPACITY: usize = 100;
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
/// Time given to in-flight control responses after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);
/// How long an answer may sit uncollected in a slot before its hook is
/// considered gone. Until then the session's next prompt is held back.
const UNCOLLECTED_GRACE: Duration = Duration::from_secs(5);

/// Work for the outbound worker. Sending never happens on the caller's task,
/// so a slow chat API cannot stall the control socket.
#[derive(Debug)]
enum Outbound {
    /// Post a request's prompt. With a hint the prompt is re-sent even if it
    /// was already announced.
    Announce {
        request_id: String,
        hint: Option<String>,
    },
    Notice(String),
}

/// Doubling delay between failed polls.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: BACKOFF_MIN,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.current = BACKOFF_MIN;
    }
}

pub struct Daemon {
    settings: RwLock<Settings>,
    config_path: Option<PathBuf>,
    store: Arc<PendingRequestStore>,
    registry: Arc<SessionRegistry>,
    handoff: Arc<BlockingHandoff>,
    router: ReplyRouter,
    transport: Arc<dyn ChatTransport>,
    voice: Arc<dyn VoiceControl>,
    events: broadcast::Sender<DaemonEvent>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    started_at: Instant,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(
        settings: Settings,
        config_path: Option<PathBuf>,
        transport: Arc<dyn ChatTransport>,
        voice: Arc<dyn VoiceControl>,
    ) -> Arc<Self> {
        let store = Arc::new(PendingRequestStore::new(settings.max_pending_per_session));
        let registry = Arc::new(SessionRegistry::new(settings.start_mode == Mode::Afk));
        let handoff = Arc::new(BlockingHandoff::new(
            settings.handoff_dir(),
            settings.poll_interval(),
        ));
        let router = ReplyRouter::new(store.clone(), registry.clone(), handoff.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            settings: RwLock::new(settings),
            config_path,
            store,
            registry,
            handoff,
            router,
            transport,
            voice,
            events,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &Arc<PendingRequestStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn handoff(&self) -> &Arc<BlockingHandoff> {
        &self.handoff
    }

    /// Cancelling this token stops `run`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Global mode: AFK when new sessions start out routed to chat.
    pub fn mode(&self) -> Mode {
        if self.registry.default_afk() {
            Mode::Afk
        } else {
            Mode::Local
        }
    }

    /// Serve the control socket and run the background loops until the
    /// cancellation token fires.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| AfkError::InvalidRequest {
                reason: "daemon is already running".into(),
            })?;

        let settings = self.settings();
        let server = IpcServer::new(settings.socket_path(), self.cancel.clone());

        let workers = vec![
            tokio::spawn(self.clone().poll_loop()),
            tokio::spawn(self.clone().outbound_loop(outbound_rx)),
            tokio::spawn(self.clone().sweep_loop()),
        ];

        info!(
            transport = self.transport.name(),
            mode = %self.mode(),
            handoff_dir = %settings.handoff_dir().display(),
            "daemon started"
        );

        let handler: Arc<dyn ControlHandler> = self.clone();
        let served = server.serve(handler).await;

        self.cancel.cancel();
        let _ = self.events.send(DaemonEvent::ShuttingDown);
        for worker in workers {
            let _ = worker.await;
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        info!("daemon stopped");
        served
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    async fn poll_loop(self: Arc<Self>) {
        let mut offset: i64 = 0;
        let mut backoff = Backoff::new();

        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = self.transport.poll_updates(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        offset = offset.max(update.update_id() + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in_secs = delay.as_secs(), "polling chat updates failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        debug!("poll loop stopped");
    }

    async fn outbound_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = rx.recv() => item,
            };
            let Some(item) = item else { break };

            match item {
                Outbound::Announce { request_id, hint } => {
                    self.announce(&request_id, hint.as_deref()).await
                }
                Outbound::Notice(text) => {
                    if let Err(e) = self.transport.send_message(&text, &[]).await {
                        warn!(error = %e, "failed to send notice");
                    }
                }
            }
        }
        debug!("outbound worker stopped");
    }

    async fn sweep_loop(self: Arc<Self>) {
        loop {
            let interval = self.settings().sweep_interval();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.sweep();
        }
        debug!("sweep loop stopped");
    }

    /// Expire requests older than `stale_after_secs` and retry announcements
    /// that never reached the chat. Returns the expired requests.
    pub fn sweep(&self) -> Vec<PendingRequest> {
        let mut expired = Vec::new();
        if let Some(stale_after) = self.settings().stale_after() {
            let age = chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::zero());
            expired = self.store.expire_older_than(Utc::now() - age);
            for request in &expired {
                info!(request_id = %request.id, session_id = %request.session_id, "request expired");
            }
            if !expired.is_empty() {
                self.notice(format!("⌛ {} request(s) expired unanswered.", expired.len()));
            }
            self.after_removal(&expired);
        }

        for request in self.store.active_requests() {
            if request.announced_message_id.is_none() {
                self.queue_announce(&request.id, None);
            }
        }
        expired
    }

    async fn announce(&self, request_id: &str, hint: Option<&str>) {
        // Resolved while queued.
        let Some(request) = self.store.get(request_id) else {
            return;
        };
        if hint.is_none() && request.announced_message_id.is_some() {
            return;
        }
        // One slot per session: the previous answer must be collected before
        // this request can be answered.
        if let Some(age) = self
            .handoff
            .uncollected_answer_age(&request.session_id, &request.id)
        {
            let poll_interval = self.settings().poll_interval();
            if age < UNCOLLECTED_GRACE.max(poll_interval * 4) {
                debug!(request_id, "previous answer not collected yet, holding prompt back");
                self.announce_later(request_id, hint.map(str::to_string), poll_interval);
                return;
            }
            warn!(request_id, session_id = %request.session_id, "previous answer never collected, discarding it");
            if let Err(e) = self.handoff.clear(&request.session_id) {
                warn!(request_id, error = %e, "failed to discard uncollected answer");
            }
        }

        let text = render::request_message(&request, hint);
        let buttons = render::buttons(&request);
        match self.transport.send_message(&text, &buttons).await {
            Ok(message_id) => {
                self.registry.bind_thread(message_id, &request.session_id);
                self.store.mark_announced(&request.id, message_id);
                debug!(request_id, message_id, "request announced");
            }
            Err(e) => {
                warn!(request_id, error = %e, "failed to announce request, will retry on next sweep");
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared operations
    // ------------------------------------------------------------------

    fn emit(&self, event: DaemonEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notice(&self, text: impl Into<String>) {
        let _ = self.outbound_tx.send(Outbound::Notice(text.into()));
    }

    fn queue_announce(&self, request_id: &str, hint: Option<String>) {
        let _ = self.outbound_tx.send(Outbound::Announce {
            request_id: request_id.to_string(),
            hint,
        });
    }

    fn announce_later(&self, request_id: &str, hint: Option<String>, delay: Duration) {
        let outbound_tx = self.outbound_tx.clone();
        let cancel = self.cancel.clone();
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = outbound_tx.send(Outbound::Announce { request_id, hint });
                }
            }
        });
    }

    /// Bookkeeping after requests leave the store: publish the resolution,
    /// refresh each session's waiting request, announce whatever became active.
    fn after_removal(&self, removed: &[PendingRequest]) {
        let mut sessions = BTreeSet::new();
        for request in removed {
            self.emit(DaemonEvent::RequestResolved {
                request_id: request.id.clone(),
                session_id: request.session_id.clone(),
                status: request.status,
            });
            sessions.insert(request.session_id.as_str());
        }
        for session_id in sessions {
            match self.store.peek_active(session_id) {
                Some(next) => {
                    self.registry.set_waiting(session_id, Some(next.id.as_str()));
                    if next.announced_message_id.is_none() {
                        self.queue_announce(&next.id, None);
                    }
                }
                None => self.registry.set_waiting(session_id, None),
            }
        }
    }

    /// Queue a request from a hook. Fails with `SessionNotAfk` when the
    /// session should be handled at the terminal.
    pub fn enqueue(&self, session_id: &str, kind: RequestKind) -> Result<ResponseData> {
        if !self.registry.is_afk(session_id) {
            return Err(AfkError::SessionNotAfk {
                session_id: session_id.to_string(),
            });
        }

        let enqueued = self.store.enqueue(session_id, kind)?;
        let request = enqueued.request;
        self.registry.note_request(session_id, &request.id);
        if enqueued.active {
            self.registry.set_waiting(session_id, Some(request.id.as_str()));
        }
        info!(
            request_id = %request.id,
            session_id,
            kind = request.kind.name(),
            active = enqueued.active,
            "request queued"
        );

        if enqueued.active {
            self.queue_announce(&request.id, None);
        }
        let request_id = request.id.clone();
        self.emit(DaemonEvent::RequestQueued { request });

        Ok(ResponseData::Enqueued {
            request_id,
            active: enqueued.active,
        })
    }

    /// Withdraw a request whose hook stopped waiting.
    pub fn cancel_request(&self, request_id: &str) -> Result<ResponseData> {
        let removed = self.store.remove(request_id, RequestStatus::Expired)?;
        info!(request_id, session_id = %removed.session_id, "request withdrawn by hook");
        if removed.announced_message_id.is_some() {
            self.notice(format!(
                "⌛ [{}] stopped waiting; answer it at the terminal.",
                render::short_session(&removed.session_id)
            ));
        }
        self.after_removal(std::slice::from_ref(&removed));
        Ok(ResponseData::Removed {
            requests: vec![removed],
        })
    }

    /// Skip every pending request of a session. Each request's hook sees the
    /// `request_resolved` event and falls back to local handling.
    pub fn skip_session(&self, session_id: &str) -> Vec<PendingRequest> {
        let skipped = self.store.skip(session_id);
        if !skipped.is_empty() {
            info!(session_id, count = skipped.len(), "session skipped");
        }
        self.after_removal(&skipped);
        skipped
    }

    pub fn flush_all(&self) -> Vec<PendingRequest> {
        let flushed = self.store.flush_all();
        if !flushed.is_empty() {
            info!(count = flushed.len(), "queue flushed");
        }
        self.after_removal(&flushed);
        flushed
    }

    /// Leave AFK mode everywhere: the hook blocked on each session's slot
    /// gets the sentinel, every subscribed hook gets the `deactivated` event,
    /// and the queue is emptied. Returns the released sessions.
    pub fn deactivate(&self) -> Result<Vec<String>> {
        let changed = self.registry.set_all_afk(false);
        let released = self.handoff.deactivate_all(&self.registry)?;
        let flushed = self.store.flush_all();

        info!(
            released = released.len(),
            flushed = flushed.len(),
            "deactivated, back to local mode"
        );

        self.emit(DaemonEvent::ModeChanged { mode: Mode::Local });
        for session_id in changed {
            self.emit(DaemonEvent::SessionChanged {
                session_id,
                afk_active: false,
            });
        }
        // Ahead of the per-request resolutions, so queued hooks report a
        // deactivation rather than a skip.
        self.emit(DaemonEvent::Deactivated {
            sessions: released.clone(),
        });
        self.after_removal(&flushed);
        Ok(released)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        match mode {
            Mode::Local => self.deactivate().map(|_| ()),
            Mode::Afk => {
                let changed = self.registry.set_all_afk(true);
                info!(sessions = changed.len(), "AFK mode on");
                self.emit(DaemonEvent::ModeChanged { mode: Mode::Afk });
                for session_id in changed {
                    self.emit(DaemonEvent::SessionChanged {
                        session_id,
                        afk_active: true,
                    });
                }
                Ok(())
            }
        }
    }

    /// Toggle AFK for one session. Turning it off releases the session's
    /// waiting hook.
    pub fn set_afk(&self, session_id: &str, active: bool) {
        self.registry.set_afk(session_id, active);
        if !active && self.store.has_pending(session_id) {
            self.skip_session(session_id);
        }
        info!(session_id, active, "session AFK toggled");
        self.emit(DaemonEvent::SessionChanged {
            session_id: session_id.to_string(),
            afk_active: active,
        });
    }

    pub fn set_voice(&self, enabled: bool) {
        self.voice.set_enabled(enabled);
        info!(enabled, "voice toggled");
        self.emit(DaemonEvent::VoiceChanged { enabled });
    }

    pub async fn speak(&self, text: &str) -> Result<()> {
        self.voice.speak(text).await
    }

    /// Re-read the config file. Socket and handoff paths are fixed for the
    /// lifetime of the daemon.
    pub fn reload(&self) -> Result<()> {
        let fresh = Settings::load(self.config_path.as_deref())?;
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());

        if fresh.socket_path() != settings.socket_path()
            || fresh.handoff_dir() != settings.handoff_dir()
        {
            warn!("socket or handoff path changed; restart the daemon to apply");
        }
        self.store.set_max_per_session(fresh.max_pending_per_session);
        *settings = Settings {
            socket_path: settings.socket_path.take(),
            handoff_dir: settings.handoff_dir.take(),
            ..fresh
        };
        drop(settings);

        info!("config reloaded");
        self.emit(DaemonEvent::ConfigReloaded);
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            mode: self.mode(),
            voice_enabled: self.voice.is_enabled(),
            pending: self.store.len(),
            sessions: self.registry.snapshot(),
            transport: self.transport.name().to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn stop(&self) {
        info!("stop requested");
        self.cancel.cancel();
    }
}
