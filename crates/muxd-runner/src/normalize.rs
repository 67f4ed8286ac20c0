//! Result normalizers.
//!
//! Two stdout conventions are supported:
//! - single envelope: one JSON object for the whole run (`claude -p --output-format json`)
//! - event stream: one JSON object per line (`codex exec --json`)
//!
//! Both produce a [`ParsedOutput`].

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::OutputFormat;
use crate::types::{ParsedOutput, RunnerError, TokenUsage};

/// Parse raw stdout according to the backend's format
pub fn parse_output(format: OutputFormat, raw: &str) -> Result<ParsedOutput, RunnerError> {
    match format {
        OutputFormat::Envelope => parse_envelope(raw),
        OutputFormat::EventStream => parse_event_stream(raw),
    }
}

/// Single result envelope
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    subtype: Option<String>,
    result: Option<String>,
    /// gemini uses `response` for the text
    response: Option<String>,
    session_id: Option<String>,
    is_error: bool,
    total_cost_usd: Option<f64>,
    cost_usd: Option<f64>,
    num_turns: u32,
    duration_ms: u64,
    duration_api_ms: u64,
    usage: Option<EnvelopeUsage>,
    model: Option<String>,
    #[serde(rename = "modelUsage")]
    model_usage: Option<serde_json::Map<String, Value>>,
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvelopeUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

/// Parse a single-envelope output
pub fn parse_envelope(raw: &str) -> Result<ParsedOutput, RunnerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RunnerError::EmptyOutput);
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| RunnerError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(RunnerError::Malformed("expected a JSON object".to_string()));
    }
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| RunnerError::Malformed(e.to_string()))?;

    let error_message = envelope.error.as_ref().and_then(error_text);
    let is_error = envelope.is_error
        || error_message.is_some()
        || envelope
            .subtype
            .as_deref()
            .is_some_and(|s| s.starts_with("error"));

    let model = envelope.model.or_else(|| {
        envelope
            .model_usage
            .as_ref()
            .and_then(|m| m.keys().next().cloned())
    });

    let usage = envelope
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_write_tokens: u.cache_creation_input_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
        })
        .unwrap_or_default();

    let text = envelope.result.or(envelope.response).unwrap_or_default();
    let error_message = if is_error {
        error_message.or_else(|| Some(text.clone()).filter(|t| !t.is_empty()))
    } else {
        None
    };

    Ok(ParsedOutput {
        text,
        session_id: envelope.session_id.filter(|s| !s.is_empty()),
        is_error,
        error_message,
        model,
        cost_usd: envelope.total_cost_usd.or(envelope.cost_usd).unwrap_or(0.0),
        num_turns: envelope.num_turns,
        duration_ms: envelope.duration_ms,
        duration_api_ms: envelope.duration_api_ms,
        usage,
    })
}

/// Parse a newline-delimited event stream.
///
/// Lines that are not JSON objects are skipped. Agent messages are joined in
/// arrival order; reasoning and tool items do not contribute text.
pub fn parse_event_stream(raw: &str) -> Result<ParsedOutput, RunnerError> {
    if raw.trim().is_empty() {
        return Err(RunnerError::EmptyOutput);
    }

    let mut out = ParsedOutput::default();
    let mut messages: Vec<String> = Vec::new();
    let mut events = 0usize;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                debug!(line = %line, "Skipping non-JSON line in event stream");
                continue;
            }
        };
        events += 1;

        match value.get("type").and_then(Value::as_str).unwrap_or("") {
            "thread.started" | "session.created" => {
                let id = value
                    .get("thread_id")
                    .or_else(|| value.get("session_id"))
                    .and_then(Value::as_str);
                if let Some(id) = id.filter(|s| !s.is_empty()) {
                    out.session_id = Some(id.to_string());
                }
            }
            "item.completed" => {
                let Some(item) = value.get("item") else { continue };
                let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
                if matches!(item_type, "agent_message" | "assistant_message") {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        messages.push(text.to_string());
                    }
                }
            }
            "turn.completed" => {
                out.num_turns += 1;
                if let Some(usage) = value.get("usage") {
                    let field = |name: &str| usage.get(name).and_then(Value::as_u64);
                    out.usage.input_tokens += field("input_tokens").unwrap_or(0);
                    out.usage.output_tokens += field("output_tokens").unwrap_or(0);
                    if let Some(cached) = field("cached_input_tokens") {
                        *out.usage.cache_read_tokens.get_or_insert(0) += cached;
                    }
                }
            }
            "turn.failed" | "error" => {
                out.is_error = true;
                let message = value
                    .get("error")
                    .and_then(error_text)
                    .or_else(|| value.get("message").and_then(error_text));
                if message.is_some() {
                    out.error_message = message;
                }
            }
            _ => {}
        }
    }

    if events == 0 {
        return Err(RunnerError::Malformed(
            "no JSON events in output".to_string(),
        ));
    }

    out.text = messages.join("\n");
    Ok(out)
}

/// Error text from either a string or an object with a `message` field
fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_full() {
        let raw = r#"{
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "duration_ms": 2400,
            "duration_api_ms": 2100,
            "num_turns": 3,
            "result": "Hello, world!",
            "session_id": "abc123",
            "total_cost_usd": 0.0123,
            "usage": {
                "input_tokens": 100,
                "output_tokens": 50,
                "cache_creation_input_tokens": 0,
                "cache_read_input_tokens": 2048
            },
            "modelUsage": {"claude-sonnet-4-5": {"inputTokens": 100}}
        }"#;

        let out = parse_envelope(raw).unwrap();
        assert_eq!(out.text, "Hello, world!");
        assert_eq!(out.session_id.as_deref(), Some("abc123"));
        assert!(!out.is_error);
        assert_eq!(out.num_turns, 3);
        assert_eq!(out.duration_api_ms, 2100);
        assert_eq!(out.model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(out.usage.cache_write_tokens, Some(0));
        assert_eq!(out.usage.cache_read_tokens, Some(2048));
        assert!((out.cost_usd - 0.0123).abs() < f64::EPSILON);
    }

    #[test]
    fn test_envelope_missing_fields_default() {
        let out = parse_envelope(r#"{"result": "ok"}"#).unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(out.num_turns, 0);
        assert_eq!(out.cost_usd, 0.0);
        assert_eq!(out.usage.input_tokens, 0);
        assert_eq!(out.usage.cache_write_tokens, None);
        assert_eq!(out.usage.cache_read_tokens, None);
        assert!(out.session_id.is_none());
    }

    #[test]
    fn test_envelope_empty_and_malformed() {
        assert!(matches!(parse_envelope(""), Err(RunnerError::EmptyOutput)));
        assert!(matches!(parse_envelope("  \n\t"), Err(RunnerError::EmptyOutput)));
        assert!(matches!(
            parse_envelope("Error: something broke"),
            Err(RunnerError::Malformed(_))
        ));
        assert!(matches!(parse_envelope("[1, 2]"), Err(RunnerError::Malformed(_))));
    }

    #[test]
    fn test_envelope_reported_error() {
        let raw = r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"No conversation found with session ID: x"}"#;
        let out = parse_envelope(raw).unwrap();
        assert!(out.is_error);
        assert_eq!(
            out.error_message.as_deref(),
            Some("No conversation found with session ID: x")
        );
    }

    #[test]
    fn test_envelope_gemini_response_field() {
        let raw = r#"{"response": "Gemini says hi", "error": null}"#;
        let out = parse_envelope(raw).unwrap();
        assert_eq!(out.text, "Gemini says hi");
        assert!(!out.is_error);

        let raw = r#"{"response": "", "error": {"type": "ApiError", "message": "429 Too Many Requests"}}"#;
        let out = parse_envelope(raw).unwrap();
        assert!(out.is_error);
        assert_eq!(out.error_message.as_deref(), Some("429 Too Many Requests"));
    }

    #[test]
    fn test_event_stream_joins_agent_messages() {
        let raw = r#"{"type":"thread.started","thread_id":"0199a213-81c0-7800-8aa1-bbab2a035a53"}
{"type":"turn.started"}
{"type":"item.completed","item":{"id":"item_0","type":"reasoning","text":"**Planning**"}}
{"type":"item.completed","item":{"id":"item_1","type":"agent_message","text":"first"}}
{"type":"item.completed","item":{"id":"item_2","type":"command_execution","command":"ls"}}
{"type":"item.completed","item":{"id":"item_3","type":"agent_message","text":"second"}}
{"type":"turn.completed","usage":{"input_tokens":24763,"cached_input_tokens":24448,"output_tokens":122}}"#;

        let out = parse_event_stream(raw).unwrap();
        assert_eq!(out.text, "first\nsecond");
        assert_eq!(
            out.session_id.as_deref(),
            Some("0199a213-81c0-7800-8aa1-bbab2a035a53")
        );
        assert_eq!(out.num_turns, 1);
        assert_eq!(out.usage.input_tokens, 24763);
        assert_eq!(out.usage.output_tokens, 122);
        assert_eq!(out.usage.cache_read_tokens, Some(24448));
        assert_eq!(out.usage.cache_write_tokens, None);
        assert!(!out.is_error);
    }

    #[test]
    fn test_event_stream_skips_diagnostic_lines() {
        let raw = "Reading prompt from stdin...\n\
                   {\"type\":\"thread.started\",\"thread_id\":\"t-1\"}\n\
                   WARN something noisy\n\
                   {\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"done\"}}\n";
        let out = parse_event_stream(raw).unwrap();
        assert_eq!(out.text, "done");
        assert_eq!(out.session_id.as_deref(), Some("t-1"));
        assert_eq!(out.usage.cache_read_tokens, None);
    }

    #[test]
    fn test_event_stream_failures() {
        assert!(matches!(parse_event_stream(" \n "), Err(RunnerError::EmptyOutput)));
        assert!(matches!(
            parse_event_stream("plain text only"),
            Err(RunnerError::Malformed(_))
        ));

        let raw = r#"{"type":"thread.started","thread_id":"t-2"}
{"type":"turn.failed","error":{"message":"stream disconnected: rate limit reached"}}"#;
        let out = parse_event_stream(raw).unwrap();
        assert!(out.is_error);
        assert_eq!(
            out.error_message.as_deref(),
            Some("stream disconnected: rate limit reached")
        );
    }

    #[test]
    fn test_parse_output_dispatch() {
        let out = parse_output(OutputFormat::Envelope, r#"{"result":"x"}"#).unwrap();
        assert_eq!(out.text, "x");
        let line = r#"{"type":"item.completed","item":{"type":"agent_message","text":"y"}}"#;
        let out = parse_output(OutputFormat::EventStream, line).unwrap();
        assert_eq!(out.text, "y");
    }
}
