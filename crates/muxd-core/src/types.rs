//! Core types for muxd

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============ Session ============

/// Session status. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Multiplexer address: a session plus an optional pane inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MuxTarget {
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane: Option<String>,
}

impl MuxTarget {
    pub fn session(name: impl Into<String>) -> Self {
        Self {
            session: name.into(),
            pane: None,
        }
    }

    /// Parse `"name"` or `"name:pane"`. Returns `None` for an empty name.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let (session, pane) = match spec.split_once(':') {
            Some((session, pane)) => (session, Some(pane).filter(|p| !p.is_empty())),
            None => (spec, None),
        };
        if session.is_empty() {
            return None;
        }
        Some(Self {
            session: session.to_string(),
            pane: pane.map(str::to_string),
        })
    }
}

impl fmt::Display for MuxTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pane {
            Some(ref pane) => write!(f, "{}:{}", self.session, pane),
            None => f.write_str(&self.session),
        }
    }
}

/// Persisted session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    /// Owning client reference
    pub owner: String,
    pub target: MuxTarget,
    pub status: SessionStatus,
    pub workdir: PathBuf,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub last_activity_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_ids: Vec<String>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ============ Events ============

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit close request
    Requested,
    /// Liveness check found the target gone
    Dead,
    /// Screen capture failed
    CaptureFailed,
}

/// Session event stream item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// New content settled on screen
    #[serde(rename_all = "camelCase")]
    ScreenDelta {
        session_id: String,
        /// Inserted lines after chrome/artifact filtering
        lines: Vec<String>,
        /// Reply text extracted from the inserted lines
        extracted: String,
        /// Screen shows an input prompt
        idle: bool,
        /// Screen reports the task finished
        completed: bool,
        /// New lines report a finished background task
        background: bool,
    },
    #[serde(rename_all = "camelCase")]
    Error { session_id: String, message: String },
    #[serde(rename_all = "camelCase")]
    Closed {
        session_id: String,
        reason: CloseReason,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::ScreenDelta { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::Closed { session_id, .. } => session_id,
        }
    }

    /// Event type name used when forwarding to an [`EventSink`](crate::EventSink)
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::ScreenDelta { .. } => "session.delta",
            SessionEvent::Error { .. } => "session.error",
            SessionEvent::Closed { .. } => "session.closed",
        }
    }
}
