//! Error classification for failed runs.
//!
//! The rules form an ordered cascade; the first matching rule wins:
//!
//! 1. timed out                                  → `timeout`
//! 2. "session not found" / "no such session"    → `session_not_found`
//! 3. permission / authorization denial          → `permission_denied`
//! 4. rate limit / overload / HTTP 429           → `api_error`
//! 5. exit 127, "command not found" / "file not found" → `spawn_error`
//! 6. exit 137 / 143 (SIGKILL / SIGTERM)         → `killed`
//! 7. anything else                              → `unknown`

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ErrorKind;

/// Exit code the shell reports for a missing command
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;
/// 128 + SIGKILL
pub const EXIT_SIGKILL: i32 = 137;
/// 128 + SIGTERM
pub const EXIT_SIGTERM: i32 = 143;

static SESSION_NOT_FOUND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)session\s+not\s+found|no\s+such\s+session|no\s+conversation\s+found|session\s+\S+\s+(?:does\s+not|doesn't)\s+exist|could\s+not\s+find\s+session",
    )
    .unwrap()
});

static PERMISSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)permission\s+denied|not\s+authori[sz]ed|unauthori[sz]ed|forbidden|access\s+denied|authentication\s+(?:failed|required)|invalid\s+api\s+key|\b40[13]\b",
    )
    .unwrap()
});

static API_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)rate[\s_-]?limit|too\s+many\s+requests|overloaded|quota\s+exceeded|\b429\b|\b529\b",
    )
    .unwrap()
});

static SPAWN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)command\s+not\s+found|file\s+not\s+found|no\s+such\s+file\s+or\s+directory|\benoent\b")
        .unwrap()
});

/// Everything known about a failed run
#[derive(Debug, Clone, Copy)]
pub struct FailureSignal<'a> {
    /// Exit code, with signals mapped to 128 + signal number
    pub exit_code: Option<i32>,
    /// Captured error text (stderr, backend error message)
    pub error_text: &'a str,
    pub timed_out: bool,
}

/// One step of the cascade
pub struct ErrorRule {
    pub name: &'static str,
    pub kind: ErrorKind,
    test: fn(&FailureSignal<'_>) -> bool,
}

impl ErrorRule {
    pub fn matches(&self, signal: &FailureSignal<'_>) -> bool {
        (self.test)(signal)
    }
}

/// The cascade, highest priority first
pub static ERROR_RULES: &[ErrorRule] = &[
    ErrorRule {
        name: "timed-out",
        kind: ErrorKind::Timeout,
        test: |s| s.timed_out,
    },
    ErrorRule {
        name: "session-not-found",
        kind: ErrorKind::SessionNotFound,
        test: |s| SESSION_NOT_FOUND_PATTERN.is_match(s.error_text),
    },
    ErrorRule {
        name: "permission-denied",
        kind: ErrorKind::PermissionDenied,
        test: |s| PERMISSION_PATTERN.is_match(s.error_text),
    },
    ErrorRule {
        name: "rate-limited",
        kind: ErrorKind::ApiError,
        test: |s| API_PATTERN.is_match(s.error_text),
    },
    ErrorRule {
        name: "spawn-failed",
        kind: ErrorKind::SpawnError,
        test: |s| s.exit_code == Some(EXIT_COMMAND_NOT_FOUND) || SPAWN_PATTERN.is_match(s.error_text),
    },
    ErrorRule {
        name: "killed-by-signal",
        kind: ErrorKind::Killed,
        test: |s| matches!(s.exit_code, Some(EXIT_SIGKILL) | Some(EXIT_SIGTERM)),
    },
];

/// Classify a failed run. Never fails; falls back to `unknown`.
pub fn classify_error(exit_code: Option<i32>, error_text: &str, timed_out: bool) -> ErrorKind {
    let signal = FailureSignal {
        exit_code,
        error_text,
        timed_out,
    };
    ERROR_RULES
        .iter()
        .find(|rule| rule.matches(&signal))
        .map(|rule| rule.kind)
        .unwrap_or(ErrorKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_overrides_everything() {
        let texts = [
            "",
            "session not found",
            "Permission denied",
            "429 Too Many Requests",
            "bash: claude: command not found",
        ];
        for code in [None, Some(0), Some(1), Some(127), Some(137), Some(143)] {
            for text in texts {
                assert_eq!(classify_error(code, text, true), ErrorKind::Timeout);
            }
        }
    }

    #[test]
    fn test_each_rule() {
        assert_eq!(
            classify_error(Some(1), "Error: No conversation found with session ID abc", false),
            ErrorKind::SessionNotFound
        );
        assert_eq!(
            classify_error(Some(1), "tmux: no such session: work", false),
            ErrorKind::SessionNotFound
        );
        assert_eq!(
            classify_error(Some(1), "401 Unauthorized", false),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_error(Some(1), "API Error: 529 Overloaded", false),
            ErrorKind::ApiError
        );
        assert_eq!(
            classify_error(Some(1), "rate_limit_error: slow down", false),
            ErrorKind::ApiError
        );
        assert_eq!(classify_error(Some(127), "", false), ErrorKind::SpawnError);
        assert_eq!(
            classify_error(None, "No such file or directory (os error 2)", false),
            ErrorKind::SpawnError
        );
        assert_eq!(classify_error(Some(137), "", false), ErrorKind::Killed);
        assert_eq!(classify_error(Some(143), "", false), ErrorKind::Killed);
        assert_eq!(classify_error(Some(1), "segfault", false), ErrorKind::Unknown);
        assert_eq!(classify_error(None, "", false), ErrorKind::Unknown);
    }

    #[test]
    fn test_priority_order() {
        // session beats permission
        assert_eq!(
            classify_error(Some(1), "permission denied: session not found", false),
            ErrorKind::SessionNotFound
        );
        // permission beats rate limit
        assert_eq!(
            classify_error(Some(1), "403 forbidden after rate limit", false),
            ErrorKind::PermissionDenied
        );
        // rate limit beats exit 127
        assert_eq!(
            classify_error(Some(127), "429 too many requests", false),
            ErrorKind::ApiError
        );
        // text-based spawn error beats a signal exit code
        assert_eq!(
            classify_error(Some(137), "command not found", false),
            ErrorKind::SpawnError
        );
    }

    #[test]
    fn test_rules_are_ordered_by_documented_priority() {
        let kinds: Vec<ErrorKind> = ERROR_RULES.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Timeout,
                ErrorKind::SessionNotFound,
                ErrorKind::PermissionDenied,
                ErrorKind::ApiError,
                ErrorKind::SpawnError,
                ErrorKind::Killed,
            ]
        );
    }
}
