//! Buffered response extraction
//!
//! Turns a raw terminal buffer captured after sending a prompt into the
//! agent's reply: escapes stripped, echoed prompt cut, chrome and artifacts
//! dropped, blank runs removed, length capped.

use serde::{Deserialize, Serialize};

use super::ansi::strip_ansi;
use super::chrome::{clean_line, is_artifact_line, is_prompt_marker};
use super::types::Locale;

/// Default cap on extracted text, in characters
pub const DEFAULT_MAX_CHARS: usize = 3500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractOptions {
    pub max_chars: usize,
    pub locale: Locale,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            locale: Locale::default(),
        }
    }
}

/// Extract the reply to `prompt` from `buffer` with default options
pub fn extract_response(buffer: &str, prompt: &str) -> String {
    extract_response_with(buffer, prompt, &ExtractOptions::default())
}

pub fn extract_response_with(buffer: &str, prompt: &str, options: &ExtractOptions) -> String {
    let clean = strip_ansi(buffer);
    let body = after_prompt(&clean, prompt);

    let mut lines: Vec<&str> = body.lines().collect();
    while let Some(last) = lines.last() {
        if is_prompt_marker(last) || is_artifact_line(last) {
            lines.pop();
        } else {
            break;
        }
    }

    let kept: Vec<&str> = lines
        .into_iter()
        .filter_map(|line| {
            if line.trim().is_empty() {
                Some("")
            } else {
                clean_line(line).map(str::trim_end)
            }
        })
        .collect();

    let text = drop_blank_runs(&kept).join("\n");
    truncate(text, options)
}

/// Text following the echoed prompt. Falls back to the prompt's last line
/// (long prompts wrap), then to the whole buffer.
fn after_prompt<'a>(text: &'a str, prompt: &str) -> &'a str {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return text;
    }
    if let Some(idx) = text.find(prompt) {
        return &text[idx + prompt.len()..];
    }
    let last_line = prompt.lines().last().map(str::trim).unwrap_or("");
    if !last_line.is_empty() {
        if let Some(idx) = text.find(last_line) {
            return &text[idx + last_line.len()..];
        }
    }
    text
}

/// Remove every run of two or more blank lines, then trim blank edges
fn drop_blank_runs<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if lines[i].is_empty() {
            let start = i;
            while i < lines.len() && lines[i].is_empty() {
                i += 1;
            }
            if i - start == 1 {
                out.push("");
            }
        } else {
            out.push(lines[i]);
            i += 1;
        }
    }

    let first = out.iter().position(|l| !l.is_empty()).unwrap_or(out.len());
    let last = out.iter().rposition(|l| !l.is_empty()).map_or(first, |i| i + 1);
    out[first..last].to_vec()
}

fn truncate(text: String, options: &ExtractOptions) -> String {
    if text.chars().count() <= options.max_chars {
        return text;
    }
    let head: String = text.chars().take(options.max_chars).collect();
    format!("{}\n\n{}", head.trim_end(), options.locale.truncation_marker())
}
