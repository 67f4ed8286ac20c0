//! Session Manager - interactive agent sessions inside a multiplexer
//!
//! Each active session owns a poller task that captures the screen on an
//! interval, feeds it through a [`SessionPipeline`] and emits settled deltas.
//! Records go through the [`SessionStore`]; events go to subscribers and to
//! the [`EventSink`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pipeline::{PipelineOutcome, PipelineSettings, SessionPipeline};
use super::tmux::Multiplexer;
use crate::collab::{ContextLinker, EventSink, SessionStore};
use crate::config::SessionConfig;
use crate::semantic::ExtractOptions;
use crate::types::{CloseReason, MuxTarget, SessionEvent, SessionRecord, SessionStatus};

/// Characters the shell could interpret, stripped from typed input
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '$', '`', '<', '>', '(', ')', '{', '}', '\\'];

/// Parameters for a new session
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    pub owner: String,
    pub workdir: PathBuf,
    /// Multiplexer session name; generated when absent
    pub name: Option<String>,
    /// Command to start; the configured default when absent
    pub command: Option<String>,
    pub context_ids: Vec<String>,
}

/// Parameters for adopting an existing multiplexer target
#[derive(Debug, Clone, Default)]
pub struct ConnectSession {
    /// `"name"` or `"name:pane"`
    pub target: String,
    pub owner: String,
    pub context_ids: Vec<String>,
}

struct SessionHandle {
    record: SessionRecord,
    poller: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

struct ManagerInner {
    mux: Arc<dyn Multiplexer>,
    store: Arc<dyn SessionStore>,
    linker: Arc<dyn ContextLinker>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    pipeline: PipelineSettings,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// Manages interactive sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        store: Arc<dyn SessionStore>,
        linker: Arc<dyn ContextLinker>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
        extract: ExtractOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        let pipeline = PipelineSettings::from_config(&config, extract);
        Self {
            inner: Arc::new(ManagerInner {
                mux,
                store,
                linker,
                sink,
                config,
                pipeline,
                sessions: RwLock::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Start an agent in a new multiplexer session and begin polling it
    pub async fn create_session(&self, request: CreateSession) -> Result<SessionRecord> {
        let id = Uuid::new_v4().to_string();
        let name = request
            .name
            .unwrap_or_else(|| format!("muxd-{}", &id[..8]));
        let command = request
            .command
            .unwrap_or_else(|| self.inner.config.default_command.clone());

        let target = self
            .inner
            .mux
            .spawn(&name, &request.workdir, &command)
            .await
            .with_context(|| format!("failed to start session {}", name))?;

        let now = Utc::now().timestamp_millis();
        let record = SessionRecord {
            id,
            name,
            owner: request.owner,
            target,
            status: SessionStatus::Active,
            workdir: request.workdir,
            created_at: now,
            last_activity_at: now,
            context_ids: request.context_ids,
        };

        self.inner.save(&record).await;
        self.inner.link_contexts(&record).await;
        self.inner.start(record.clone()).await;

        info!(session_id = %record.id, target = %record.target, command = %command, "Session created");
        Ok(record)
    }

    /// Adopt an existing multiplexer target. Connecting to a target that is
    /// already managed returns the existing record.
    pub async fn connect_session(&self, request: ConnectSession) -> Result<SessionRecord> {
        let target = MuxTarget::parse(&request.target)
            .ok_or_else(|| anyhow!("invalid target: {:?}", request.target))?;

        if let Some(existing) = self.find_by_target(&target).await {
            debug!(session_id = %existing.id, target = %target, "Target already managed");
            return Ok(existing);
        }
        if !self.inner.mux.has_target(&target).await {
            bail!("target not found: {}", target);
        }

        let now = Utc::now().timestamp_millis();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            name: target.session.clone(),
            owner: request.owner,
            target,
            status: SessionStatus::Active,
            workdir: PathBuf::new(),
            created_at: now,
            last_activity_at: now,
            context_ids: request.context_ids,
        };

        self.inner.save(&record).await;
        self.inner.link_contexts(&record).await;
        self.inner.start(record.clone()).await;

        info!(session_id = %record.id, target = %record.target, "Session connected");
        Ok(record)
    }

    /// Type `text` into the session and submit it. Returns false when the
    /// session is unknown or the multiplexer rejects the input.
    pub async fn send_input(&self, session_id: &str, text: &str) -> bool {
        let Some(target) = self.target_of(session_id).await else {
            warn!(session_id = %session_id, "Input for unknown session");
            return false;
        };

        let text = sanitize_input(text);
        if let Err(e) = self.inner.mux.send_literal(&target, &text).await {
            self.inner.report_error(session_id, format!("send failed: {}", e));
            return false;
        }
        tokio::time::sleep(self.inner.config.submit_delay()).await;
        if let Err(e) = self.inner.mux.send_key(&target, "Enter").await {
            self.inner.report_error(session_id, format!("submit failed: {}", e));
            return false;
        }

        let record = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.get_mut(session_id).map(|handle| {
                handle.record.last_activity_at = Utc::now().timestamp_millis();
                handle.record.clone()
            })
        };
        if let Some(record) = record {
            self.inner.save(&record).await;
        }

        debug!(session_id = %session_id, chars = text.chars().count(), "Input sent");
        true
    }

    /// Stop polling and kill the target. Returns false for unknown sessions.
    pub async fn close_session(&self, session_id: &str) -> bool {
        self.inner
            .finish(session_id, CloseReason::Requested, true)
            .await
    }

    /// Resume polling for persisted active sessions whose target still
    /// exists; mark the rest closed. Returns the number resumed.
    pub async fn restore(&self) -> Result<usize> {
        let records = self
            .inner
            .store
            .load_all()
            .await
            .context("failed to load session records")?;

        let mut resumed = 0;
        for mut record in records.into_iter().filter(SessionRecord::is_active) {
            if self.inner.sessions.read().await.contains_key(&record.id) {
                continue;
            }
            if self.inner.mux.has_target(&record.target).await {
                info!(session_id = %record.id, target = %record.target, "Session restored");
                self.inner.start(record).await;
                resumed += 1;
            } else {
                info!(session_id = %record.id, target = %record.target, "Session target gone, closing");
                record.status = SessionStatus::Closed;
                self.inner.save(&record).await;
                self.inner.emit(SessionEvent::Closed {
                    session_id: record.id,
                    reason: CloseReason::Dead,
                });
            }
        }
        Ok(resumed)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|handle| handle.record.clone())
    }

    /// Active sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|handle| handle.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Stop every poller. Targets and records are left as they are so a
    /// later [`restore`](Self::restore) picks them up again.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        let count = handles.len();
        for handle in handles {
            if let Some(poller) = handle.poller {
                poller.abort();
            }
        }
        info!(count, "Session pollers stopped");
    }

    async fn target_of(&self, session_id: &str) -> Option<MuxTarget> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|handle| handle.record.target.clone())
    }

    async fn find_by_target(&self, target: &MuxTarget) -> Option<SessionRecord> {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .find(|handle| handle.record.target == *target)
            .map(|handle| handle.record.clone())
    }
}

impl ManagerInner {
    /// Register the session and spawn its poller. The write guard is held
    /// across the spawn so a poller that fails on its first tick always
    /// finds its own handle.
    async fn start(self: &Arc<Self>, record: SessionRecord) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let mut sessions = self.sessions.write().await;
        let poller = spawn_poller(
            Arc::clone(self),
            record.id.clone(),
            record.target.clone(),
            shutdown_rx,
        );
        sessions.insert(
            record.id.clone(),
            SessionHandle {
                record,
                poller: Some(poller),
                shutdown: Some(shutdown_tx),
            },
        );
    }

    /// Tear down a session exactly once. The poller is stopped before the
    /// target is touched. `kill_target` is false when the target is already
    /// gone or unreadable.
    async fn finish(&self, session_id: &str, reason: CloseReason, kill_target: bool) -> bool {
        let handle = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id)
        };
        let Some(mut handle) = handle else {
            return false;
        };

        if let Some(shutdown) = handle.shutdown.take() {
            let _ = shutdown.send(());
        }
        // the poller closes its own session on dead/capture failure and must
        // not abort itself halfway through
        if reason == CloseReason::Requested {
            if let Some(poller) = handle.poller.take() {
                poller.abort();
            }
        }

        if kill_target {
            if let Err(e) = self.mux.kill(&handle.record.target).await {
                warn!(session_id = %session_id, target = %handle.record.target, error = %e, "Failed to kill target");
            }
        }

        let mut record = handle.record;
        record.status = SessionStatus::Closed;
        record.last_activity_at = Utc::now().timestamp_millis();
        self.save(&record).await;
        self.emit(SessionEvent::Closed {
            session_id: record.id.clone(),
            reason,
        });

        info!(session_id = %session_id, reason = ?reason, "Session closed");
        true
    }

    async fn save(&self, record: &SessionRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(session_id = %record.id, error = %e, "Failed to save session record");
        }
    }

    async fn link_contexts(&self, record: &SessionRecord) {
        for context_id in &record.context_ids {
            if let Err(e) = self.linker.link(&record.id, context_id).await {
                warn!(session_id = %record.id, context_id = %context_id, error = %e, "Failed to link context");
            }
        }
    }

    fn report_error(&self, session_id: &str, message: String) {
        warn!(session_id = %session_id, error = %message, "Session error");
        self.emit(SessionEvent::Error {
            session_id: session_id.to_string(),
            message,
        });
    }

    fn emit(&self, event: SessionEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => self.sink.emit(event.event_type(), payload),
            Err(e) => warn!(error = %e, "Failed to serialize session event"),
        }
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

fn spawn_poller(
    inner: Arc<ManagerInner>,
    session_id: String,
    target: MuxTarget,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pipeline = SessionPipeline::new(inner.pipeline.clone());
        let mut interval = tokio::time::interval(inner.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let liveness_every = inner.config.liveness_every_ticks.max(1) as u64;
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = interval.tick() => {}
            }
            ticks += 1;

            if ticks % liveness_every == 0 && !inner.mux.has_target(&target).await {
                warn!(session_id = %session_id, target = %target, "Session target disappeared");
                inner.finish(&session_id, CloseReason::Dead, false).await;
                break;
            }

            let screen = match inner.mux.capture(&target).await {
                Ok(screen) => screen,
                Err(e) => {
                    inner.report_error(&session_id, format!("capture failed: {}", e));
                    inner.finish(&session_id, CloseReason::CaptureFailed, false).await;
                    break;
                }
            };

            match pipeline.observe(&screen, tokio::time::Instant::now().into_std()) {
                PipelineOutcome::Notify(delta) => {
                    debug!(session_id = %session_id, lines = delta.lines.len(), idle = delta.idle, "Screen delta");
                    inner.emit(SessionEvent::ScreenDelta {
                        session_id: session_id.clone(),
                        lines: delta.lines,
                        extracted: delta.extracted,
                        idle: delta.idle,
                        completed: delta.completed,
                        background: delta.background,
                    });
                }
                PipelineOutcome::Suppressed { changed_chars } => {
                    debug!(session_id = %session_id, changed_chars, "Delta below threshold");
                }
                PipelineOutcome::Deferred => {
                    debug!(session_id = %session_id, "Delta deferred");
                }
                PipelineOutcome::Changed | PipelineOutcome::Unchanged => {}
            }
        }
        debug!(session_id = %session_id, "Poller stopped");
    })
}

/// Drop shell metacharacters and control characters. Line breaks and tabs
/// become spaces so the text is submitted as one line.
pub fn sanitize_input(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() || SHELL_METACHARACTERS.contains(&c) => None,
            c => Some(c),
        })
        .collect()
}
