//! Types shared by the runner: requests, normalized results and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with every non-empty stdout line while a run is in flight.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One-shot run request
#[derive(Clone)]
pub struct RunRequest {
    /// Prompt text, always passed as the final argument (may be empty)
    pub prompt: String,
    /// Provider name, resolved through the backend registry
    pub provider: String,
    /// Model override
    pub model: Option<String>,
    /// System prompt injected through the backend's flag
    pub system_prompt: Option<String>,
    /// Working directory of the spawned process
    pub cwd: Option<PathBuf>,
    /// Explicit timeout; the executor default applies when absent
    pub timeout: Option<Duration>,
    /// Prior backend session id
    pub session_id: Option<String>,
    /// Resume `session_id` instead of starting a fresh session with it
    pub resume: bool,
    /// Tool allowlist
    pub allowed_tools: Vec<String>,
    /// Pass the backend's permission-bypass flag
    pub bypass_permissions: bool,
    /// Explicit scheduling key
    pub key: Option<String>,
    /// Streaming callback
    pub on_output: Option<OutputCallback>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            provider: "claude".to_string(),
            model: None,
            system_prompt: None,
            cwd: None,
            timeout: None,
            session_id: None,
            resume: false,
            allowed_tools: Vec::new(),
            bypass_permissions: false,
            key: None,
            on_output: None,
        }
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("provider", &self.provider)
            .field("prompt_len", &self.prompt.len())
            .field("model", &self.model)
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .field("session_id", &self.session_id)
            .field("resume", &self.resume)
            .field("allowed_tools", &self.allowed_tools)
            .field("bypass_permissions", &self.bypass_permissions)
            .field("key", &self.key)
            .finish()
    }
}

impl RunRequest {
    pub fn new(provider: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Key the scheduler serializes this run under.
    ///
    /// Explicit key first, then the prior session id (runs continuing the same
    /// conversation must not overlap), then provider + working directory.
    pub fn schedule_key(&self) -> String {
        if let Some(key) = self.key.as_deref().filter(|k| !k.is_empty()) {
            return key.to_string();
        }
        if let Some(sid) = self.session_id.as_deref().filter(|s| !s.is_empty()) {
            return format!("session:{}", sid);
        }
        let cwd = self
            .cwd
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        format!("{}:{}", self.provider, cwd)
    }

    /// Whether the request resumes a prior session
    pub fn is_resume(&self) -> bool {
        self.resume && self.session_id.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Token usage.
///
/// Cache counters are `None` when the backend never reported them, which is
/// different from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

/// Closed set of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    SessionNotFound,
    PermissionDenied,
    ApiError,
    SpawnError,
    Killed,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::SessionNotFound => "session_not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ApiError => "api_error",
            ErrorKind::SpawnError => "spawn_error",
            ErrorKind::Killed => "killed",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error descriptor attached to a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Normalized result, returned for every outcome including spawn failure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    /// Response text
    pub text: String,
    /// Backend-assigned session id, empty when none was reported
    pub session_id: String,
    pub model: String,
    pub usage: TokenUsage,
    /// Total cost in USD
    pub cost_usd: f64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    pub num_turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunResult {
    /// Failed result with no backend data
    pub fn failure(kind: ErrorKind, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            duration_ms: duration.as_millis() as u64,
            error: Some(RunError {
                kind,
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Intermediate record produced by both output normalizers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub text: String,
    pub session_id: Option<String>,
    pub is_error: bool,
    /// Error text reported by the backend itself
    pub error_message: Option<String>,
    pub model: Option<String>,
    pub cost_usd: f64,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub usage: TokenUsage,
}

/// Runner errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("empty output")]
    EmptyOutput,

    #[error("parse error: {0}")]
    Malformed(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid backend descriptor {name}: {reason}")]
    InvalidBackend { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
