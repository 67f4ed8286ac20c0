//! Engine - composition facade
//!
//! Owns the scheduler, the run executor and the session manager, and wires
//! them to the collaborators supplied by the host.

use std::future::Future;
use std::sync::Arc;

use muxd_runner::{Executor, RunRequest, RunResult};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::scheduler::Scheduler;
use crate::collab::{
    ContextLinker, EventSink, MemorySessionStore, NoopContextLinker, NoopRunReporter, RunReporter,
    SessionStore, TracingEventSink,
};
use crate::config::{ConfigError, EngineConfig};
use crate::session::{Multiplexer, SessionManager};

/// External collaborators the engine calls through
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub linker: Arc<dyn ContextLinker>,
    pub sink: Arc<dyn EventSink>,
    pub reporter: Arc<dyn RunReporter>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            store: Arc::new(MemorySessionStore::new()),
            linker: Arc::new(NoopContextLinker),
            sink: Arc::new(TracingEventSink),
            reporter: Arc::new(NoopRunReporter),
        }
    }
}

pub struct Engine {
    scheduler: Scheduler,
    executor: Arc<Executor>,
    sessions: SessionManager,
    reporter: Arc<dyn RunReporter>,
    sink: Arc<dyn EventSink>,
}

impl Engine {
    /// Build from configuration. Fails only on an invalid backend descriptor.
    pub fn new(
        config: &EngineConfig,
        mux: Arc<dyn Multiplexer>,
        collab: Collaborators,
    ) -> Result<Self, ConfigError> {
        let executor = Executor::new(config.registry()?, config.default_timeout());
        let sessions = SessionManager::new(
            mux,
            collab.store,
            collab.linker,
            Arc::clone(&collab.sink),
            config.session.clone(),
            config.extract,
        );

        info!(
            max_concurrency = config.max_concurrency,
            providers = ?executor.registry().names(),
            "Engine ready"
        );
        Ok(Self {
            scheduler: Scheduler::new(config.max_concurrency),
            executor: Arc::new(executor),
            sessions,
            reporter: collab.reporter,
            sink: collab.sink,
        })
    }

    /// Queue a one-shot run under its scheduling key.
    ///
    /// The run is queued when this is called; the returned future resolves
    /// once it has been admitted and finished.
    pub fn submit_run(&self, request: RunRequest) -> impl Future<Output = RunResult> + Send {
        let run_id = Uuid::new_v4().to_string();
        let key = request.schedule_key();
        let executor = Arc::clone(&self.executor);
        let reporter = Arc::clone(&self.reporter);
        let sink = Arc::clone(&self.sink);
        debug!(run_id = %run_id, key = %key, provider = %request.provider, "Run submitted");

        self.scheduler.enqueue(key, async move {
            reporter.run_started(&run_id, &request).await;
            let provider = request.provider.clone();
            let result = executor.run(request).await;
            reporter.run_finished(&run_id, &result).await;

            info!(
                run_id = %run_id,
                provider = %provider,
                success = result.success,
                duration_ms = result.duration_ms,
                "Run finished"
            );
            sink.emit(
                "run.finished",
                json!({
                    "runId": run_id,
                    "provider": provider,
                    "success": result.success,
                    "sessionId": result.session_id,
                    "durationMs": result.duration_ms,
                    "errorKind": result.error_kind().map(|k| k.as_str()),
                }),
            );
            result
        })
    }

    pub fn set_max_concurrency(&self, max: usize) {
        self.scheduler.set_max_concurrency(max);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}
