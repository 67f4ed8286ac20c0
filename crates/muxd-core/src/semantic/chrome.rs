//! Chrome and artifact line classification
//!
//! ## Terminal furniture this recognises
//!
//! ```text
//! ╭──────────────────────────────────────────╮     divider / box border
//! 🤖 Opus 4.1 │ ▓▓▓░░ 45% │ $0.12                   model / status bar
//! 📁 ~/work/app (main)                              project path
//! ⏵⏵ bypass permissions on (shift+tab to cycle)     permission banner
//! ? for shortcuts                                   input hint
//! ↑ 1.2k tokens · $0.03                             token / cost stats
//! ✻ Pondering… (3m 2s · ↓ 2.8k tokens)              thinking spinner   (artifact)
//! ✻ Worked for 1m 3s                                completed thinking (artifact)
//! ```
//!
//! Chrome is furniture. Artifacts are chrome plus transient decoration:
//! spinners, thinking timers, stray digits and short ASCII fragments left
//! behind by partial redraws.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{first_match, PatternRule, LEADING_GLYPHS, SPINNER_CHARS};

/// Regex character class body with every spinner and leading glyph
fn glyph_class() -> String {
    SPINNER_CHARS
        .iter()
        .chain(LEADING_GLYPHS.iter())
        .map(|c| regex::escape(&c.to_string()))
        .collect()
}

const PERMISSION_BANNER: &str = r"(?i)^\s*(?:⏵⏵|⏸)|^\s*(?:bypass\s+permissions|accept\s+edits|plan\s+mode|auto-accept\s+edits)\s+on\s*(?:\(.*\))?\s*$|\(shift\+tab\s+to\s+cycle\)\s*$";

static PROMPT_MARKER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[>❯›$]\s*$").unwrap());

static PERMISSION_BANNER_RULE: Lazy<PatternRule> =
    Lazy::new(|| PatternRule::new("permission-banner", PERMISSION_BANNER));

/// Chrome cascade, in evaluation order
pub static CHROME_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new("blank", r"^\s*$"),
        PatternRule::new(
            "divider",
            r"^\s*[╭╰┌└├]?[─━═╌┄╍\-=_]{8,}[╮╯┐┘┤]?\s*$",
        ),
        PatternRule::new(
            "status-bar",
            r"(?i)^\s*(?:[^\w\s]{1,2}\s*)?\[?(?:claude\s+)?(?:opus|sonnet|haiku|gpt-?[\w.]*|o[134](?:-mini)?|gemini[\w.\-]*|codex[\w.\-]*)(?:\s*[\w.\-]+)?\]?\s*[|│·•].*(?:\d+%|\$\d|tokens?\b|ctx\b|context)",
        ),
        PatternRule::new(
            "project-path",
            r"(?i)^\s*📁\s*\S|^\s*(?:cwd|dir|directory):\s*[~/]|^\s*~(?:/[\w.\-]+)*/?\s*(?:\([\w./\-]+\))?\s*$|^\s*/[\w.\-]+(?:/[\w.\-]+)*\s+\([\w./\-]+\)\s*$",
        ),
        PatternRule::new("permission-banner", PERMISSION_BANNER),
        PatternRule::new(
            "input-hint",
            r"(?i)^\s*\?\s+for\s+shortcuts\b|^\s*\(?(?:esc|ctrl\+\w)\s+to\s+\w+\)?(?:\s*[·|].*)?$|^\s*press\s+enter\s+to\s+send\s*$|^\s*type\s+(?:your|a)\s+message(?:…|\.{3})?\s*$|^\s*/help\s+for\s+help\b",
        ),
        PatternRule::new(
            "token-stats",
            r"(?i)^\s*total\s+(?:cost|duration|code\s+changes)\b[^:]*:|^\s*[↑↓]\s*[\d.,]+\s*k?\s*tokens?\b|^\s*[\d.,]+\s*k?\s+tokens?\s*(?:·|\||$)|^\s*context\s+left\b|^\s*until\s+auto-compact\b",
        ),
    ]
});

/// Artifact-only rules, evaluated after the chrome cascade
pub static ARTIFACT_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    let g = glyph_class();
    vec![
        // optional ASCII tail left by a partial redraw
        PatternRule::new("spinner-only", &format!(r"^\s*[{g}][{g}\s]*(?:[!-~]{{1,3}})?\s*$")),
        PatternRule::new(
            "thinking-verb",
            &format!(r"^\s*(?:[{g}]\s*)?\(?[A-Za-z]+ing(?:…|\.{{2,3}})\s*(?:\([^)]*\)?)?\s*\)?\s*$"),
        ),
        PatternRule::new(
            "thinking-verb-bare",
            &format!(
                r"(?i)^\s*(?:[{g}]\s*)?(?:thinking|processing|working|pondering|reasoning|generating|analy[sz]ing|loading|searching)\s*$"
            ),
        ),
        PatternRule::new(
            "completed-thinking",
            &format!(r"(?i)^\s*(?:[{g}]\s*)?\(?\s*[a-z]+(?:ed|ght)\s+for\s+(?:\d+(?:\.\d+)?\s*[hms]\s*)+\)?\s*$"),
        ),
        PatternRule::new(
            "time-token-fragment",
            r"^\s*\(?\s*\d+(?:\.\d+)?\s*[hms](?:\s*\d+\s*[ms])*\s*·[^)]*\)?\s*$",
        ),
        PatternRule::new("numeric", r"^\s*\d+\s*$"),
        PatternRule::new("title-remnant", r"\][012];"),
        PatternRule::new("progress-bar", r"[█▉▊▋▌▍▎▏░▒▓]{3,}"),
        PatternRule::new(
            "inline-completed-thinking",
            &format!(r"(?i)(?:[{g}]|\()\s*[a-z]+(?:ed|ght)\s+for\s+\d+(?:\.\d+)?\s*[hms]\b"),
        ),
        // ASCII only: short replies in other scripts are real content
        PatternRule::new("short-ascii-fragment", r"^\s*[A-Za-z]{1,3}\s*$"),
    ]
});

/// Name of the chrome rule matching `line`, if any
pub fn chrome_rule(line: &str) -> Option<&'static str> {
    first_match(&CHROME_RULES, line).map(|r| r.name)
}

/// Name of the chrome or artifact rule matching `line`, if any
pub fn artifact_rule(line: &str) -> Option<&'static str> {
    chrome_rule(line).or_else(|| first_match(&ARTIFACT_RULES, line).map(|r| r.name))
}

pub fn is_chrome_line(line: &str) -> bool {
    chrome_rule(line).is_some()
}

pub fn is_artifact_line(line: &str) -> bool {
    artifact_rule(line).is_some()
}

pub fn is_permission_banner(line: &str) -> bool {
    PERMISSION_BANNER_RULE.is_match(line)
}

/// A bare input prompt (`>`, `❯`, `›` or `$` and nothing else)
pub fn is_prompt_marker(line: &str) -> bool {
    PROMPT_MARKER_LINE.is_match(line)
}

/// Drop one leading spinner/response glyph and the space after it.
///
/// `"⏺ Done"` becomes `"Done"`; lines without such a prefix are returned as is.
pub fn strip_leading_glyph(line: &str) -> &str {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(c) if SPINNER_CHARS.contains(&c) || LEADING_GLYPHS.contains(&c) => {
            let rest = chars.as_str();
            if rest.starts_with(char::is_whitespace) {
                rest.trim_start()
            } else {
                line
            }
        }
        _ => line,
    }
}

/// The content of `line` with its glyph prefix removed, or `None` when the
/// line (before or after stripping) is an artifact.
pub fn clean_line(line: &str) -> Option<&str> {
    if is_artifact_line(line) {
        return None;
    }
    let stripped = strip_leading_glyph(line);
    if stripped.len() != line.len() && is_artifact_line(stripped) {
        return None;
    }
    Some(stripped)
}
