//! Run executor
//!
//! Spawns one backend CLI per request, streams stdout, enforces the timeout
//! and folds every outcome into a [`RunResult`].

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::args::build_args;
use crate::backend::{BackendDescriptor, BackendRegistry};
use crate::classify::{classify_error, EXIT_COMMAND_NOT_FOUND};
use crate::normalize::parse_output;
use crate::types::*;

/// Default per-run timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on waiting for stderr after the process exited
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Executes run requests against the registered backends
pub struct Executor {
    registry: BackendRegistry,
    default_timeout: Duration,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(BackendRegistry::builtin(), DEFAULT_TIMEOUT)
    }
}

impl Executor {
    pub fn new(registry: BackendRegistry, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Execute one request. Never fails: every outcome is a `RunResult`.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let started = Instant::now();

        let backend = match self.registry.get(&request.provider) {
            Ok(backend) => backend,
            Err(e) => {
                warn!(provider = %request.provider, "Rejecting run: {}", e);
                return RunResult::failure(ErrorKind::SpawnError, e.to_string(), started.elapsed());
            }
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let args = build_args(&request, backend);
        debug!(provider = %backend.name, command = %backend.command, ?args, "Starting backend CLI");

        let mut result = match execute(backend, &args, &request, timeout).await {
            Ok(outcome) => interpret(backend, &request, outcome),
            Err(failure) => failure,
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        match result.error {
            None => info!(
                provider = %backend.name,
                duration_ms = result.duration_ms,
                session_id = %result.session_id,
                "Run finished"
            ),
            Some(ref err) => warn!(
                provider = %backend.name,
                duration_ms = result.duration_ms,
                kind = %err.kind,
                "Run failed: {}",
                err.message
            ),
        }
        result
    }
}

/// What a process left behind once it exited
struct ProcessOutcome {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Spawn and await the process. `Err` carries an already-built failure.
async fn execute(
    backend: &BackendDescriptor,
    args: &[String],
    request: &RunRequest,
    timeout: Duration,
) -> Result<ProcessOutcome, RunResult> {
    let mut cmd = Command::new(&backend.command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref dir) = request.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| spawn_failure(&backend.command, request.cwd.as_deref(), e))?;

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        _ => {
            return Err(RunResult::failure(
                ErrorKind::SpawnError,
                "failed to capture process output",
                Duration::ZERO,
            ))
        }
    };

    let stderr_handle = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        let mut collected: Vec<String> = Vec::new();
        loop {
            match read_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        collected.push(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Stopped reading stderr");
                    break;
                }
            }
        }
        collected.join("\n")
    });

    let on_output = request.on_output.clone();
    let process_result = tokio::time::timeout(timeout, async {
        let mut buffer = String::new();
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        while let Some(line) = read_line_lossy(&mut reader, &mut buf).await? {
            if let Some(ref cb) = on_output {
                if !line.trim().is_empty() {
                    cb(&line);
                }
            }
            buffer.push_str(&line);
            buffer.push('\n');
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((buffer, status))
    })
    .await;

    match process_result {
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(?e, "Failed to kill timed out process");
            }
            stderr_handle.abort();
            let kind = classify_error(None, "", true);
            Err(RunResult::failure(
                kind,
                format!("timed out after {}ms", timeout.as_millis()),
                Duration::ZERO,
            ))
        }
        Ok(Err(e)) => {
            let _ = child.kill().await;
            stderr_handle.abort();
            let message = format!("failed to read process output: {}", e);
            Err(RunResult::failure(classify_error(None, &message, false), message, Duration::ZERO))
        }
        Ok(Ok((stdout, status))) => {
            let stderr = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_handle).await {
                Ok(Ok(text)) => text,
                _ => String::new(),
            };
            Ok(ProcessOutcome {
                exit_code: exit_code(&status),
                stdout,
                stderr,
            })
        }
    }
}

/// Next line without its terminator. Invalid UTF-8 is replaced rather than
/// treated as a read error; backends interleave arbitrary diagnostics.
async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

fn spawn_failure(command: &str, cwd: Option<&Path>, err: std::io::Error) -> RunResult {
    let message = match cwd {
        Some(dir) => format!("failed to spawn {} in {}: {}", command, dir.display(), err),
        None => format!("failed to spawn {}: {}", command, err),
    };
    let kind = classify_error(Some(EXIT_COMMAND_NOT_FOUND), &message, false);
    RunResult::failure(kind, message, Duration::ZERO)
}

/// Exit code, with a terminating signal mapped to 128 + signal
fn exit_code(status: &ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    None
}

fn interpret(backend: &BackendDescriptor, request: &RunRequest, outcome: ProcessOutcome) -> RunResult {
    let ProcessOutcome {
        exit_code,
        stdout,
        stderr,
    } = outcome;
    let parsed = parse_output(backend.output, &stdout);

    if exit_code != Some(0) {
        let reported = parsed.as_ref().ok().and_then(|p| p.error_message.clone());
        // stdout is the agent's reply; its wording must not pick the kind
        let combined = join_non_empty(&[reported.as_deref().unwrap_or(""), &stderr]);
        let kind = classify_error(exit_code, &combined, false);
        let message = first_non_empty(&[reported.as_deref().unwrap_or(""), stderr.trim()])
            .map(str::to_string)
            .unwrap_or_else(|| match exit_code {
                Some(code) => format!("process exited with code {}", code),
                None => "process exited abnormally".to_string(),
            });

        let mut result = RunResult::failure(kind, message, Duration::ZERO);
        if let Ok(parsed) = parsed {
            fill_from_parsed(&mut result, parsed, request);
        }
        return result;
    }

    match parsed {
        Err(e) => {
            let kind = classify_error(exit_code, &stderr, false);
            RunResult::failure(kind, e.to_string(), Duration::ZERO)
        }
        Ok(parsed) if parsed.is_error => {
            let message = first_non_empty(&[
                parsed.error_message.as_deref().unwrap_or(""),
                parsed.text.trim(),
            ])
            .unwrap_or("backend reported an error")
            .to_string();
            let kind = classify_error(exit_code, &join_non_empty(&[&message, &stderr]), false);
            let mut result = RunResult::failure(kind, message, Duration::ZERO);
            fill_from_parsed(&mut result, parsed, request);
            result
        }
        Ok(parsed) => {
            let mut result = RunResult {
                success: true,
                ..Default::default()
            };
            fill_from_parsed(&mut result, parsed, request);
            result
        }
    }
}

fn fill_from_parsed(result: &mut RunResult, parsed: ParsedOutput, request: &RunRequest) {
    result.text = parsed.text;
    result.session_id = parsed.session_id.unwrap_or_default();
    result.model = parsed
        .model
        .or_else(|| request.model.clone())
        .unwrap_or_default();
    result.usage = parsed.usage;
    result.cost_usd = parsed.cost_usd;
    result.num_turns = parsed.num_turns;
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().map(|s| s.trim()).find(|s| !s.is_empty())
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
