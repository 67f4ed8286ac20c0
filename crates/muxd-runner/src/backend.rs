//! Backend descriptors: how each provider's CLI is invoked and what it prints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::RunnerError;

/// Placeholder substituted with the session id inside a resume template
pub const SESSION_ID_PLACEHOLDER: &str = "{session_id}";

/// Shape of a backend's stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One JSON object for the whole run
    Envelope,
    /// Newline-delimited JSON events
    EventStream,
}

/// Flag tokens; `None` means the backend has no such option
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendFlags {
    pub resume: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub bypass_permissions: Option<String>,
    pub allowed_tools: Option<String>,
}

/// Static description of one provider's CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    /// Provider name used to select this backend. May be omitted in config
    /// files, where the map key names the backend.
    #[serde(default)]
    pub name: String,
    /// Executable
    pub command: String,
    /// Arguments for a fresh run
    #[serde(default)]
    pub base_args: Vec<String>,
    /// Arguments for resuming; may contain `{session_id}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_args: Option<Vec<String>>,
    #[serde(default)]
    pub flags: BackendFlags,
    pub output: OutputFormat,
}

impl BackendDescriptor {
    /// Claude Code in print mode with a single JSON result
    pub fn claude() -> Self {
        Self {
            name: "claude".to_string(),
            command: "claude".to_string(),
            base_args: strings(&["-p", "--output-format", "json"]),
            resume_args: None,
            flags: BackendFlags {
                resume: Some("--resume".to_string()),
                session_id: Some("--session-id".to_string()),
                model: Some("--model".to_string()),
                system_prompt: Some("--append-system-prompt".to_string()),
                bypass_permissions: Some("--dangerously-skip-permissions".to_string()),
                allowed_tools: Some("--allowedTools".to_string()),
            },
            output: OutputFormat::Envelope,
        }
    }

    /// Codex exec with JSONL events
    pub fn codex() -> Self {
        Self {
            name: "codex".to_string(),
            command: "codex".to_string(),
            base_args: strings(&["exec", "--json", "--skip-git-repo-check"]),
            resume_args: Some(strings(&[
                "exec",
                "--json",
                "--skip-git-repo-check",
                "resume",
                SESSION_ID_PLACEHOLDER,
            ])),
            flags: BackendFlags {
                resume: None,
                session_id: None,
                model: Some("--model".to_string()),
                system_prompt: None,
                bypass_permissions: Some("--dangerously-bypass-approvals-and-sandbox".to_string()),
                allowed_tools: None,
            },
            output: OutputFormat::EventStream,
        }
    }

    /// Gemini CLI with a single JSON result
    pub fn gemini() -> Self {
        Self {
            name: "gemini".to_string(),
            command: "gemini".to_string(),
            base_args: strings(&["--output-format", "json"]),
            resume_args: None,
            flags: BackendFlags {
                resume: Some("--resume".to_string()),
                session_id: None,
                model: Some("--model".to_string()),
                system_prompt: None,
                bypass_permissions: Some("--yolo".to_string()),
                allowed_tools: Some("--allowed-tools".to_string()),
            },
            output: OutputFormat::Envelope,
        }
    }

    /// Reject descriptors that could only produce a broken command line
    pub fn validate(&self) -> Result<(), RunnerError> {
        let invalid = |reason: &str| RunnerError::InvalidBackend {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("empty name"));
        }
        if self.command.trim().is_empty() {
            return Err(invalid("empty command"));
        }
        let flags = [
            &self.flags.resume,
            &self.flags.session_id,
            &self.flags.model,
            &self.flags.system_prompt,
            &self.flags.bypass_permissions,
            &self.flags.allowed_tools,
        ];
        if flags
            .iter()
            .any(|f| f.as_deref().is_some_and(|v| v.trim().is_empty()))
        {
            return Err(invalid("empty flag token"));
        }
        if let Some(ref resume) = self.resume_args {
            if resume.is_empty() {
                return Err(invalid("empty resume template"));
            }
        }
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Provider name → descriptor
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, BackendDescriptor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in claude, codex and gemini descriptors
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for backend in [
            BackendDescriptor::claude(),
            BackendDescriptor::codex(),
            BackendDescriptor::gemini(),
        ] {
            registry.backends.insert(backend.name.clone(), backend);
        }
        registry
    }

    /// Add or replace a descriptor
    pub fn register(&mut self, backend: BackendDescriptor) -> Result<(), RunnerError> {
        backend.validate()?;
        self.backends.insert(backend.name.clone(), backend);
        Ok(())
    }

    /// Look up a provider. Unknown names are an error, never a fallback.
    pub fn get(&self, provider: &str) -> Result<&BackendDescriptor, RunnerError> {
        self.backends
            .get(provider)
            .ok_or_else(|| RunnerError::UnknownProvider(provider.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}
