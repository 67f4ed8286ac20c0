//! Terminal multiplexer access
//!
//! Sessions live inside tmux so they survive daemon restarts and can be
//! attached from any terminal with `tmux attach-session -t <name>`. Input is
//! delivered with `send-keys`, output is read with `capture-pane`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::types::MuxTarget;

/// Multiplexer command failures
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },
}

/// Operations the session manager needs from a multiplexer
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Start `command` in a new detached session named `name`
    async fn spawn(&self, name: &str, workdir: &Path, command: &str) -> Result<MuxTarget, MuxError>;

    async fn has_target(&self, target: &MuxTarget) -> bool;

    /// Current screen contents as plain text
    async fn capture(&self, target: &MuxTarget) -> Result<String, MuxError>;

    /// Type `text` verbatim; no key names are interpreted
    async fn send_literal(&self, target: &MuxTarget, text: &str) -> Result<(), MuxError>;

    /// Press a named key such as `Enter`
    async fn send_key(&self, target: &MuxTarget, key: &str) -> Result<(), MuxError>;

    /// Kill the pane when the target names one, else the whole session
    async fn kill(&self, target: &MuxTarget) -> Result<(), MuxError>;
}

/// [`Multiplexer`] backed by the tmux CLI
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
    capture_lines: u32,
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new("tmux", 200)
    }
}

impl TmuxMultiplexer {
    pub fn new(binary: impl Into<String>, capture_lines: u32) -> Self {
        Self {
            binary: binary.into(),
            capture_lines,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, MuxError> {
        debug!(binary = %self.binary, ?args, "tmux");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| MuxError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MuxError::Command {
                command: format!("{} {}", self.binary, args.first().copied().unwrap_or("")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn spawn(&self, name: &str, workdir: &Path, command: &str) -> Result<MuxTarget, MuxError> {
        let workdir = workdir.to_string_lossy();
        self.run(&[
            "new-session",
            "-d",
            "-s",
            name,
            "-x",
            "200",
            "-y",
            "50",
            "-c",
            &workdir,
            command,
        ])
        .await?;
        Ok(MuxTarget::session(name))
    }

    async fn has_target(&self, target: &MuxTarget) -> bool {
        let spec = target.to_string();
        let result = match target.pane {
            Some(_) => self.run(&["display-message", "-p", "-t", &spec, "#{pane_id}"]).await,
            None => self.run(&["has-session", "-t", &spec]).await,
        };
        result.is_ok()
    }

    async fn capture(&self, target: &MuxTarget) -> Result<String, MuxError> {
        let spec = target.to_string();
        let start = format!("-{}", self.capture_lines);
        self.run(&["capture-pane", "-p", "-J", "-t", &spec, "-S", &start])
            .await
    }

    async fn send_literal(&self, target: &MuxTarget, text: &str) -> Result<(), MuxError> {
        let spec = target.to_string();
        self.run(&["send-keys", "-t", &spec, "-l", "--", text]).await?;
        Ok(())
    }

    async fn send_key(&self, target: &MuxTarget, key: &str) -> Result<(), MuxError> {
        let spec = target.to_string();
        self.run(&["send-keys", "-t", &spec, key]).await?;
        Ok(())
    }

    async fn kill(&self, target: &MuxTarget) -> Result<(), MuxError> {
        let spec = target.to_string();
        match target.pane {
            Some(_) => self.run(&["kill-pane", "-t", &spec]).await?,
            None => self.run(&["kill-session", "-t", &spec]).await?,
        };
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // `echo` stands in for tmux so the exact argument list comes back as output

    #[tokio::test]
    async fn test_capture_arguments() {
        let mux = TmuxMultiplexer::new("echo", 120);
        let target = MuxTarget::parse("work:1.0").unwrap();
        let out = mux.capture(&target).await.unwrap();
        assert_eq!(out.trim(), "capture-pane -p -J -t work:1.0 -S -120");
    }

    #[tokio::test]
    async fn test_spawn_returns_session_target() {
        let mux = TmuxMultiplexer::new("echo", 200);
        let target = mux
            .spawn("muxd-api", Path::new("/tmp"), "claude")
            .await
            .unwrap();
        assert_eq!(target, MuxTarget::session("muxd-api"));
    }

    #[tokio::test]
    async fn test_has_target_follows_exit_status() {
        let target = MuxTarget::session("work");
        assert!(TmuxMultiplexer::new("true", 10).has_target(&target).await);
        assert!(!TmuxMultiplexer::new("false", 10).has_target(&target).await);
    }

    #[tokio::test]
    async fn test_command_failure_and_missing_binary() {
        let target = MuxTarget::session("work");
        let err = TmuxMultiplexer::new("false", 10)
            .send_key(&target, "Enter")
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::Command { .. }));

        let err = TmuxMultiplexer::new("muxd-no-such-binary", 10)
            .kill(&target)
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::Spawn { .. }));
    }
}
