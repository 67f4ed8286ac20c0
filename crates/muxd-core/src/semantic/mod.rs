//! Terminal signal classifiers
//!
//! Pure text heuristics over agent terminal output:
//! - `ansi`: escape-sequence stripping
//! - `chrome`: chrome / artifact line classification
//! - `signals`: idle prompt, completion and background-activity detection
//! - `extract`: buffered response extraction

mod ansi;
mod chrome;
mod extract;
mod signals;
mod types;

pub use ansi::strip_ansi;
pub use chrome::{
    artifact_rule, chrome_rule, clean_line, is_artifact_line, is_chrome_line, is_permission_banner,
    is_prompt_marker, strip_leading_glyph, ARTIFACT_RULES, CHROME_RULES,
};
pub use extract::{extract_response, extract_response_with, ExtractOptions, DEFAULT_MAX_CHARS};
pub use signals::{
    completion_rule, has_background_activity, idle_rule, is_completed, is_idle, BACKGROUND_RULES,
    COMPLETION_RULES, COMPLETION_WINDOW_CHARS, IDLE_RULES, IDLE_WINDOW_CHARS,
};
pub use types::*;
