//! Engine configuration
//!
//! Loaded from `muxd.yaml` (camelCase keys). Every field has a default, so a
//! missing file is a valid configuration. `MUXD_MAX_CONCURRENCY` and
//! `MUXD_DEFAULT_TIMEOUT_SECS` override the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use muxd_runner::{BackendDescriptor, BackendRegistry, RunnerError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::semantic::ExtractOptions;

pub const CONFIG_FILE_NAME: &str = "muxd.yaml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error(transparent)]
    Backend(#[from] RunnerError),
}

/// Interactive session tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Screen capture interval
    pub poll_interval_ms: u64,
    /// How long a screen must stay unchanged before it is diffed
    pub quiet_period_ms: u64,
    /// Smaller deltas are suppressed
    pub min_notify_chars: usize,
    /// Minimum spacing between two notifications of one session
    pub min_notify_interval_ms: u64,
    /// Liveness check every N polls
    pub liveness_every_ticks: u32,
    /// Pause between the literal text and the submit key
    pub submit_delay_ms: u64,
    /// Command started in new sessions
    pub default_command: String,
    pub tmux_binary: String,
    /// Scrollback lines included in a capture
    pub capture_lines: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            quiet_period_ms: 1500,
            min_notify_chars: 8,
            min_notify_interval_ms: 3000,
            liveness_every_ticks: 10,
            submit_delay_ms: 150,
            default_command: "claude".to_string(),
            tmux_binary: "tmux".to_string(),
            capture_lines: 200,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn min_notify_interval(&self) -> Duration {
        Duration::from_millis(self.min_notify_interval_ms)
    }

    pub fn submit_delay(&self) -> Duration {
        Duration::from_millis(self.submit_delay_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub default_timeout_secs: u64,
    /// Extra or overriding backends, keyed by provider name
    pub backends: HashMap<String, BackendDescriptor>,
    pub session: SessionConfig,
    pub extract: ExtractOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            default_timeout_secs: 300,
            backends: HashMap::new(),
            session: SessionConfig::default(),
            extract: ExtractOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Load from the default location and apply environment overrides
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut config = Self::load(&config_path())?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        // catch bad descriptors at startup rather than on first run
        config.registry()?;
        Ok(config)
    }

    /// Apply `MUXD_*` overrides read through `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("MUXD_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("MUXD_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("MUXD_DEFAULT_TIMEOUT_SECS") {
            self.default_timeout_secs = parse_env("MUXD_DEFAULT_TIMEOUT_SECS", &value)?;
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Built-in backends plus the configured ones
    pub fn registry(&self) -> Result<BackendRegistry, RunnerError> {
        let mut registry = BackendRegistry::builtin();
        for (name, backend) in &self.backends {
            let mut backend = backend.clone();
            backend.name = name.clone();
            registry.register(backend)?;
        }
        Ok(registry)
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// `MUXD_HOME`, else `~/.muxd`
pub fn muxd_home() -> PathBuf {
    if let Ok(home) = std::env::var("MUXD_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".muxd")
}

/// `MUXD_CONFIG`, else `<home>/muxd.yaml`
pub fn config_path() -> PathBuf {
    std::env::var("MUXD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| muxd_home().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::Locale;
    use muxd_runner::OutputFormat;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.default_timeout(), Duration::from_secs(300));
        assert_eq!(config.session.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.extract.max_chars, 3500);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
maxConcurrency: 5
session:
  quietPeriodMs: 500
extract:
  locale: ja
backends:
  local:
    command: local-agent
    baseArgs: ["run", "--json"]
    flags:
      model: "-m"
    output: event_stream
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.default_timeout_secs, 300);
        assert_eq!(config.session.quiet_period_ms, 500);
        assert_eq!(config.session.poll_interval_ms, 1000);
        assert_eq!(config.extract.locale, Locale::Ja);
        assert_eq!(config.extract.max_chars, 3500);

        let registry = config.registry().unwrap();
        let local = registry.get("local").unwrap();
        assert_eq!(local.name, "local");
        assert_eq!(local.output, OutputFormat::EventStream);
        assert!(registry.get("claude").is_ok());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "maxConcurrency: [not, a, number]\n").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let mut config = EngineConfig::default();
        let mut backend = BackendDescriptor::claude();
        backend.command = String::new();
        config.backends.insert("broken".into(), backend);
        assert!(matches!(
            config.registry(),
            Err(RunnerError::InvalidBackend { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|var| match var {
                "MUXD_MAX_CONCURRENCY" => Some("8".into()),
                "MUXD_DEFAULT_TIMEOUT_SECS" => Some(" 60 ".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.default_timeout_secs, 60);

        let err = config
            .apply_overrides(|var| (var == "MUXD_MAX_CONCURRENCY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MUXD_MAX_CONCURRENCY"));
    }
}
