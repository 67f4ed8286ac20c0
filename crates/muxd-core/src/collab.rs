//! Collaborator interfaces
//!
//! Persistence, context linking, event fan-out and fleet bookkeeping live
//! outside the engine. These traits are the seams it calls through.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use muxd_runner::{RunRequest, RunResult};

use crate::types::SessionRecord;

/// Stores session records across restarts
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace by id
    async fn save(&self, record: &SessionRecord) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<SessionRecord>>;
}

/// Links sessions to external context ids. Failures are logged, never fatal.
#[async_trait]
pub trait ContextLinker: Send + Sync {
    async fn link(&self, session_id: &str, context_id: &str) -> Result<()>;
}

/// Receives every engine event. The engine does not know who listens.
pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: &str, payload: serde_json::Value);
}

/// Progress reporting for one-shot runs
#[async_trait]
pub trait RunReporter: Send + Sync {
    async fn run_started(&self, run_id: &str, request: &RunRequest);
    async fn run_finished(&self, run_id: &str, result: &RunResult);
}

/// In-process [`SessionStore`]
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<SessionRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<SessionRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}

/// Linker that does nothing
pub struct NoopContextLinker;

#[async_trait]
impl ContextLinker for NoopContextLinker {
    async fn link(&self, _session_id: &str, _context_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Sink that logs each event at debug level
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event_type: &str, payload: serde_json::Value) {
        tracing::debug!(event_type = %event_type, %payload, "Engine event");
    }
}

/// Reporter that does nothing
pub struct NoopRunReporter;

#[async_trait]
impl RunReporter for NoopRunReporter {
    async fn run_started(&self, _run_id: &str, _request: &RunRequest) {}
    async fn run_finished(&self, _run_id: &str, _result: &RunResult) {}
}
