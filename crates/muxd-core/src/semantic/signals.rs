//! Buffer-level signals: idle prompt, task completion, background activity.
//!
//! Each detector is an ordered list of [`PatternRule`]s over a trailing
//! window of the buffer, so a stale prompt far up in the scrollback never
//! counts.

use once_cell::sync::Lazy;

use super::ansi::strip_ansi;
use super::chrome::is_permission_banner;
use super::types::{first_match, tail_chars, PatternRule};

/// Characters of trailing buffer the idle detector looks at
pub const IDLE_WINDOW_CHARS: usize = 5000;

/// Characters of trailing buffer the completion detector looks at
pub const COMPLETION_WINDOW_CHARS: usize = 2000;

/// Idle cues, strongest first
pub static IDLE_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            "input-hint",
            r"(?i)\?\s+for\s+shortcuts|type\s+(?:your|a)\s+message|press\s+enter\s+to\s+send",
        ),
        // The marker must start the line; `a > b` mid-sentence is not a prompt
        PatternRule::new("prompt-marker", r"(?m)^[>❯›$][ \t]*$"),
        PatternRule::new(
            "invitation",
            r"(?i)how\s+can\s+i\s+help|what\s+would\s+you\s+like\s+(?:me\s+)?to\s+do|무엇을\s*도와\s*드릴까요|어떻게\s*도와\s*드릴까요|有什么可以帮|需要什么帮助|何をお手伝い|お手伝いできることはありますか",
        ),
        PatternRule::new("box-border", r"(?m)^[╭╰]─"),
    ]
});

/// Task and file-mutation completion phrases
pub static COMPLETION_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            "task-complete",
            r"(?i)\b(?:task|work|job|implementation)\s+(?:is\s+|has\s+been\s+)?(?:complete|completed|done|finished)\b|\ball\s+done\b|\b(?:i've|i\s+have)\s+(?:completed|finished|implemented|fixed)\b|\bsuccessfully\s+(?:completed|finished|implemented)\b",
        ),
        PatternRule::new(
            "file-mutation",
            r"(?i)\bwrote\s+\d+\s+lines?\s+to\b|\bupdated\s+\S+\s+with\s+\d+\s+(?:additions?|removals?)\b|\bfile\s+(?:has\s+been\s+|was\s+)?(?:created|updated|saved|written|modified)\b|\bsuccessfully\s+(?:created|updated|wrote|written|modified|deleted|saved)\b",
        ),
        PatternRule::new(
            "task-complete-ko",
            r"완료(?:되었습니다|했습니다|됐습니다)|작업을?\s*마쳤습니다|끝났습니다",
        ),
        PatternRule::new("file-mutation-ko", r"파일을?\s*(?:생성|수정|저장|작성)했습니다"),
        PatternRule::new("task-complete-zh", r"已完成|完成了|任务完成"),
        PatternRule::new("file-mutation-zh", r"文件已(?:创建|更新|修改|保存)|已(?:创建|更新|修改|保存)文件"),
        PatternRule::new("task-complete-ja", r"完了しました|終わりました"),
        PatternRule::new("file-mutation-ja", r"ファイルを(?:作成|更新|保存|変更)しました"),
    ]
});

/// Background sub-task finished
pub static BACKGROUND_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new(
            "background-finished",
            r"(?i)background\s+(?:task|job|process|shell|command|agent)s?\b[^\n]{0,60}?\b(?:finished|completed|done|exited)\b",
        ),
        PatternRule::new(
            "finished-in-background",
            r"(?i)\b(?:shell|task|agent|command)\b[^\n]{0,60}?\b(?:completed|finished)\s+in\s+the\s+background\b",
        ),
        PatternRule::new(
            "background-finished-ko",
            r"백그라운드\s*(?:작업|태스크|프로세스|셸)[^\n]{0,20}?(?:완료|종료)",
        ),
        PatternRule::new("background-finished-zh", r"后台(?:任务|进程)[^\n]{0,20}?(?:完成|结束)"),
        PatternRule::new("background-finished-ja", r"バックグラウンド[^\n]{0,20}?(?:完了|終了)"),
    ]
});

/// Whether the agent is waiting for input.
///
/// Looks at the last [`IDLE_WINDOW_CHARS`] characters only. Permission-mode
/// banner lines are removed first: they persist while the agent works.
pub fn is_idle(buffer: &str) -> bool {
    idle_rule(buffer).is_some()
}

/// Name of the idle rule that fired
pub fn idle_rule(buffer: &str) -> Option<&'static str> {
    let window = strip_ansi(tail_chars(buffer, IDLE_WINDOW_CHARS));
    let filtered: String = window
        .lines()
        .filter(|line| !is_permission_banner(line))
        .collect::<Vec<_>>()
        .join("\n");
    first_match(&IDLE_RULES, &filtered).map(|r| r.name)
}

/// Whether the tail of the buffer says the task finished
pub fn is_completed(buffer: &str) -> bool {
    completion_rule(buffer).is_some()
}

pub fn completion_rule(buffer: &str) -> Option<&'static str> {
    let window = strip_ansi(tail_chars(buffer, COMPLETION_WINDOW_CHARS));
    first_match(&COMPLETION_RULES, &window).map(|r| r.name)
}

/// Whether a background sub-task reported completion. Escapes are ignored.
pub fn has_background_activity(text: &str) -> bool {
    let clean = strip_ansi(text);
    first_match(&BACKGROUND_RULES, &clean).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_cues() {
        assert_eq!(idle_rule("Some output\n? for shortcuts"), Some("input-hint"));
        assert_eq!(idle_rule("Response text\n> "), Some("prompt-marker"));
        assert_eq!(idle_rule("Response text\n❯\n"), Some("prompt-marker"));
        assert_eq!(idle_rule("user@host:~$ ls\n$ "), Some("prompt-marker"));
        assert_eq!(idle_rule("Hi! How can I help you today?"), Some("invitation"));
        assert_eq!(idle_rule("무엇을 도와드릴까요?"), Some("invitation"));
        assert_eq!(idle_rule("╭──────────╮\n│ >        │\n╰──────────╯"), Some("box-border"));
    }

    #[test]
    fn test_prompt_marker_must_start_line() {
        assert!(!is_idle("if a > b then swap"));
        assert!(!is_idle("the value is > "));
        assert!(!is_idle("> quoted text follows"));
    }

    #[test]
    fn test_permission_banner_is_not_idle() {
        let screen = "✻ Working… (12s)\n⏵⏵ bypass permissions on (shift+tab to cycle)";
        assert!(!is_idle(screen));
    }

    #[test]
    fn test_idle_ignores_escape_sequences() {
        assert!(is_idle("done\n\x1b[1m❯\x1b[0m "));
    }

    #[test]
    fn test_idle_window() {
        let mut buffer = String::from("> \n");
        buffer.push_str(&"x".repeat(IDLE_WINDOW_CHARS + 10));
        assert!(!is_idle(&buffer));

        let mut buffer = "x".repeat(IDLE_WINDOW_CHARS + 10);
        buffer.push_str("\n> ");
        assert!(is_idle(&buffer));
    }

    #[test]
    fn test_completion_phrases() {
        assert_eq!(completion_rule("The task is complete."), Some("task-complete"));
        assert_eq!(completion_rule("ALL DONE"), Some("task-complete"));
        assert_eq!(completion_rule("⏺ Wrote 42 lines to src/main.rs"), Some("file-mutation"));
        assert_eq!(completion_rule("작업이 완료되었습니다."), Some("task-complete-ko"));
        assert_eq!(completion_rule("我已完成修改"), Some("task-complete-zh"));
        assert_eq!(completion_rule("ファイルを作成しました"), Some("file-mutation-ja"));
        assert!(!is_completed("Still working on the parser"));
    }

    #[test]
    fn test_completion_window() {
        let mut buffer = String::from("All done\n");
        buffer.push_str(&"y".repeat(COMPLETION_WINDOW_CHARS + 1));
        assert!(!is_completed(&buffer));

        let mut buffer = "y".repeat(COMPLETION_WINDOW_CHARS * 3);
        buffer.push_str("\nAll done");
        assert!(is_completed(&buffer));
    }

    #[test]
    fn test_background_activity() {
        assert!(has_background_activity("Background shell bash_1 completed"));
        assert!(has_background_activity(
            "\x1b[2mBackground task\x1b[0m \x1b[32mfinished\x1b[0m (exit 0)"
        ));
        assert!(has_background_activity("Agent \"review\" completed in the background"));
        assert!(has_background_activity("백그라운드 작업이 완료되었습니다"));
        assert!(!has_background_activity("Running tests in the foreground"));
    }
}
