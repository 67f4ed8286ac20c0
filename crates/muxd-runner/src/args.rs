//! Command-line construction for a run.

use crate::backend::{BackendDescriptor, SESSION_ID_PLACEHOLDER};
use crate::types::RunRequest;

/// Build the ordered argument list for `request` against `backend`.
///
/// Starts from the resume template when resuming and the backend has one,
/// otherwise from the base template (plus the generic resume flag when
/// resuming). Optional flags follow, and the prompt is always last, even
/// when empty.
pub fn build_args(request: &RunRequest, backend: &BackendDescriptor) -> Vec<String> {
    let flags = &backend.flags;
    let session_id = request.session_id.as_deref().unwrap_or("");

    let mut args = if request.is_resume() {
        match backend.resume_args {
            Some(ref template) => expand_resume_template(template, session_id),
            None => {
                let mut args = backend.base_args.clone();
                if let Some(ref flag) = flags.resume {
                    args.push(flag.clone());
                    args.push(session_id.to_string());
                }
                args
            }
        }
    } else {
        let mut args = backend.base_args.clone();
        if !session_id.is_empty() {
            if let Some(ref flag) = flags.session_id {
                args.push(flag.clone());
                args.push(session_id.to_string());
            }
        }
        args
    };

    if let (Some(flag), Some(model)) = (&flags.model, non_empty(&request.model)) {
        args.push(flag.clone());
        args.push(model.to_string());
    }

    if let (Some(flag), Some(system)) = (&flags.system_prompt, non_empty(&request.system_prompt)) {
        args.push(flag.clone());
        args.push(system.to_string());
    }

    if request.bypass_permissions {
        if let Some(ref flag) = flags.bypass_permissions {
            args.push(flag.clone());
        }
    }

    if !request.allowed_tools.is_empty() {
        if let Some(ref flag) = flags.allowed_tools {
            args.push(flag.clone());
            args.push(request.allowed_tools.join(" "));
        }
    }

    args.push(request.prompt.clone());
    args
}

fn expand_resume_template(template: &[String], session_id: &str) -> Vec<String> {
    let mut substituted = false;
    let mut args: Vec<String> = template
        .iter()
        .map(|arg| {
            if arg.contains(SESSION_ID_PLACEHOLDER) {
                substituted = true;
                arg.replace(SESSION_ID_PLACEHOLDER, session_id)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted {
        args.push(session_id.to_string());
    }
    args
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude() -> BackendDescriptor {
        BackendDescriptor::claude()
    }

    #[test]
    fn test_prompt_is_last_even_when_empty() {
        let req = RunRequest::new("claude", "");
        let args = build_args(&req, &claude());
        assert_eq!(args.last().map(String::as_str), Some(""));
        assert_eq!(args, vec!["-p", "--output-format", "json", ""]);
    }

    #[test]
    fn test_all_optional_flags() {
        let mut req = RunRequest::new("claude", "fix the bug");
        req.model = Some("opus".into());
        req.system_prompt = Some("be terse".into());
        req.bypass_permissions = true;
        req.allowed_tools = vec!["Bash".into(), "Edit".into()];

        let args = build_args(&req, &claude());
        assert_eq!(
            args,
            vec![
                "-p",
                "--output-format",
                "json",
                "--model",
                "opus",
                "--append-system-prompt",
                "be terse",
                "--dangerously-skip-permissions",
                "--allowedTools",
                "Bash Edit",
                "fix the bug",
            ]
        );
    }

    #[test]
    fn test_resume_without_template_appends_generic_flag() {
        let mut req = RunRequest::new("claude", "continue");
        req.session_id = Some("sess-1".into());
        req.resume = true;

        let args = build_args(&req, &claude());
        assert!(args.windows(2).any(|w| w == ["--resume", "sess-1"]));
        assert!(!args.iter().any(|a| a == "--session-id"));
        assert_eq!(args.last().unwrap(), "continue");
    }

    #[test]
    fn test_fresh_run_with_explicit_session_id() {
        let mut req = RunRequest::new("claude", "start");
        req.session_id = Some("5f1c9a7e-0000".into());

        let args = build_args(&req, &claude());
        assert!(args.windows(2).any(|w| w == ["--session-id", "5f1c9a7e-0000"]));
        assert!(!args.iter().any(|a| a == "--resume"));
    }

    #[test]
    fn test_resume_template_substitutes_session_id() {
        let mut req = RunRequest::new("codex", "next step");
        req.session_id = Some("thread-9".into());
        req.resume = true;
        req.model = Some("gpt-5".into());

        let args = build_args(&req, &BackendDescriptor::codex());
        assert_eq!(
            args,
            vec![
                "exec",
                "--json",
                "--skip-git-repo-check",
                "resume",
                "thread-9",
                "--model",
                "gpt-5",
                "next step",
            ]
        );
    }

    #[test]
    fn test_resume_template_without_placeholder_appends_id() {
        let mut backend = BackendDescriptor::codex();
        backend.resume_args = Some(vec!["exec".into(), "resume".into()]);
        let mut req = RunRequest::new("codex", "go");
        req.session_id = Some("t-1".into());
        req.resume = true;

        let args = build_args(&req, &backend);
        assert_eq!(args, vec!["exec", "resume", "t-1", "go"]);
    }

    #[test]
    fn test_unsupported_flags_are_skipped() {
        let mut req = RunRequest::new("codex", "hello");
        req.system_prompt = Some("ignored".into());
        req.allowed_tools = vec!["shell".into()];

        let args = build_args(&req, &BackendDescriptor::codex());
        assert_eq!(args, vec!["exec", "--json", "--skip-git-repo-check", "hello"]);
    }

    #[test]
    fn test_blank_model_is_ignored() {
        let mut req = RunRequest::new("claude", "x");
        req.model = Some("   ".into());
        let args = build_args(&req, &claude());
        assert!(!args.iter().any(|a| a == "--model"));
    }
}
