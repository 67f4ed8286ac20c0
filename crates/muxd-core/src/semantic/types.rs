//! Shared types for the terminal signal classifiers

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Spinner glyphs drawn by agent TUIs while they work
pub const SPINNER_CHARS: &[char] = &[
    '·', '✻', '✽', '✶', '✳', '✢', '✺', '✹', '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏',
    '◐', '◓', '◑', '◒',
];

/// Glyphs that prefix a real response or tool-output line
pub const LEADING_GLYPHS: &[char] = &['⏺', '●', '⎿'];

/// One named pattern in an ordered classifier cascade
#[derive(Debug)]
pub struct PatternRule {
    pub name: &'static str,
    regex: Regex,
}

impl PatternRule {
    /// Build from a literal pattern. Panics on an invalid regex, so only call
    /// it from static rule tables.
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).unwrap(),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// First rule in `rules` that matches `text`
pub fn first_match<'a>(rules: &'a [PatternRule], text: &str) -> Option<&'a PatternRule> {
    rules.iter().find(|rule| rule.is_match(text))
}

/// Language of user-facing notices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ko,
    Ja,
    Zh,
}

impl Locale {
    /// Notice appended when extracted output is cut
    pub fn truncation_marker(&self) -> &'static str {
        match self {
            Locale::En => "… (output truncated)",
            Locale::Ko => "… (출력이 잘렸습니다)",
            Locale::Ja => "… (出力は省略されました)",
            Locale::Zh => "… (输出已截断)",
        }
    }
}

/// The last `n` characters of `text`, on a char boundary
pub fn tail_chars(text: &str, n: usize) -> &str {
    match text.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &text[idx..],
        Some(_) => "",
        None => text,
    }
}
