//! Per-session screen pipeline: capture → stabilize → diff → notify.
//!
//! A pure state machine driven by the poller. Time is passed in, so every
//! transition is testable without a clock.
//!
//! ```text
//!            change                  quiet period elapsed
//! Capturing ───────▶ Stabilizing ─────────────────────────▶ Notified
//!     ▲                 │   ▲                                  │
//!     │                 │   └── deferred (too soon after the   │
//!     │                 │       previous notification)         │
//!     └─────────────────┴──────────── change ◀─────────────────┘
//! ```

use std::time::{Duration, Instant};

use similar::{Algorithm, ChangeTag, TextDiff};

use crate::config::SessionConfig;
use crate::semantic::{
    clean_line, extract_response_with, has_background_activity, is_completed, is_idle,
    is_prompt_marker, strip_ansi, ExtractOptions,
};

/// Debounce and anti-spam thresholds
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub quiet_period: Duration,
    pub min_notify_chars: usize,
    pub min_notify_interval: Duration,
    pub extract: ExtractOptions,
}

impl PipelineSettings {
    pub fn from_config(session: &SessionConfig, extract: ExtractOptions) -> Self {
        Self {
            quiet_period: session.quiet_period(),
            min_notify_chars: session.min_notify_chars,
            min_notify_interval: session.min_notify_interval(),
            extract,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default(), ExtractOptions::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    /// No pending change
    Capturing,
    /// Screen changed; waiting for it to go quiet
    Stabilizing { since: Instant },
    /// Last settled change was handled (notified or suppressed)
    Notified,
}

/// Genuinely new content on a settled screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenDelta {
    pub lines: Vec<String>,
    pub extracted: String,
    pub idle: bool,
    pub completed: bool,
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Nothing to do
    Unchanged,
    /// Screen changed; stabilization (re)started
    Changed,
    /// Settled change too small to report
    Suppressed { changed_chars: usize },
    /// Settled change arrived too soon after the previous notification
    Deferred,
    Notify(ScreenDelta),
}

/// Ephemeral pipeline state for one session. Never persisted.
#[derive(Debug)]
pub struct SessionPipeline {
    settings: PipelineSettings,
    phase: PipelinePhase,
    last_capture: Option<String>,
    /// Screen at the last notification; diffs are taken against it
    baseline: Option<String>,
    last_notify_at: Option<Instant>,
}

impl SessionPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            phase: PipelinePhase::Capturing,
            last_capture: None,
            baseline: None,
            last_notify_at: None,
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Feed one capture taken at `now`
    pub fn observe(&mut self, screen: &str, now: Instant) -> PipelineOutcome {
        let screen = strip_ansi(screen);

        let Some(ref previous) = self.last_capture else {
            // first capture is the baseline
            self.baseline = Some(screen.clone());
            self.last_capture = Some(screen);
            return PipelineOutcome::Unchanged;
        };

        if *previous != screen {
            self.last_capture = Some(screen);
            self.phase = PipelinePhase::Stabilizing { since: now };
            return PipelineOutcome::Changed;
        }

        match self.phase {
            PipelinePhase::Stabilizing { since }
                if now.saturating_duration_since(since) >= self.settings.quiet_period =>
            {
                self.settle(now)
            }
            _ => PipelineOutcome::Unchanged,
        }
    }

    fn settle(&mut self, now: Instant) -> PipelineOutcome {
        let current = self.last_capture.clone().unwrap_or_default();
        let baseline = self.baseline.as_deref().unwrap_or("");
        let lines = inserted_lines(baseline, &current);
        let changed_chars: usize = lines.iter().map(|l| l.trim().chars().count()).sum();

        if changed_chars < self.settings.min_notify_chars {
            // baseline stays put so small changes add up
            self.phase = PipelinePhase::Notified;
            return PipelineOutcome::Suppressed { changed_chars };
        }

        if let Some(last) = self.last_notify_at {
            if now.saturating_duration_since(last) < self.settings.min_notify_interval {
                self.phase = PipelinePhase::Stabilizing { since: now };
                return PipelineOutcome::Deferred;
            }
        }

        let joined = lines.join("\n");
        let delta = ScreenDelta {
            extracted: extract_response_with(&joined, "", &self.settings.extract),
            idle: is_idle(&current),
            completed: is_completed(&current),
            background: has_background_activity(&joined),
            lines,
        };

        self.baseline = Some(current);
        self.last_notify_at = Some(now);
        self.phase = PipelinePhase::Notified;
        PipelineOutcome::Notify(delta)
    }
}

/// Content lines of a screen with chrome, artifacts and bare prompts removed
fn content_lines(screen: &str) -> Vec<&str> {
    screen
        .lines()
        .filter(|line| !is_prompt_marker(line))
        .filter_map(clean_line)
        .map(str::trim_end)
        .collect()
}

/// Lines present in `new` but not in `old`, after filtering both sides so
/// redrawn chrome cannot show up as a difference
fn inserted_lines(old: &str, new: &str) -> Vec<String> {
    let old_lines = content_lines(old);
    let new_lines = content_lines(new);
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&old_lines, &new_lines);

    diff.iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Insert)
        .map(|change| change.value().to_string())
        .collect()
}
