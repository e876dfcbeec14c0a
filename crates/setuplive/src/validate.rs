//! Payload validation for untrusted installer-supplied bodies.
//!
//! Incoming payloads originate from a user-run script, so every field is
//! checked before anything touches the store. Validation collects every
//! failing field rather than stopping at the first, and an identity
//! mismatch (payload `sessionId` vs addressed session) is reported
//! separately from shape errors.

use serde::Serialize;
use serde_json::Value;

use crate::record::{
    ClientOs, CompletionNotice, ErrorLogEntry, Phase, ProgressRecord, SessionId, ToolStatus,
};

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Dotted path to the failing field, e.g. `toolStatus.git.status`.
    pub path: String,
    pub message: String,
}

impl Issue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Issue {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Why a progress update was rejected. Shape and identity failures are
/// distinct conditions with distinct wire responses.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("invalid progress data ({} issue(s))", .0.len())]
    Shape(Vec<Issue>),
    #[error("session id mismatch: payload says `{found}`, request addressed `{expected}`")]
    IdentityMismatch { expected: SessionId, found: String },
}

/// Validates and normalizes a proposed progress record for `session_id`.
pub fn progress_record(session_id: &SessionId, body: &Value) -> Result<ProgressRecord, Rejection> {
    let Some(obj) = body.as_object() else {
        return Err(Rejection::Shape(vec![Issue::new(
            "",
            "expected a JSON object",
        )]));
    };

    let mut issues = Vec::new();

    require_string(obj, "sessionId", &mut issues);
    require_step_index(obj, "currentStep", &mut issues);
    require_string(obj, "currentAction", &mut issues);
    require_string(obj, "timestamp", &mut issues);
    require_tag(obj, "phase", &Phase::TAGS, &mut issues);
    require_bool(obj, "complete", &mut issues);

    match obj.get("completedSteps") {
        Some(Value::Array(steps)) => {
            for (i, step) in steps.iter().enumerate() {
                if step.as_u64().is_none() {
                    issues.push(Issue::new(
                        format!("completedSteps.{i}"),
                        "expected an integer step index",
                    ));
                }
            }
        }
        Some(_) => issues.push(Issue::new("completedSteps", "expected an array of integers")),
        None => issues.push(Issue::new("completedSteps", "missing required field")),
    }

    match obj.get("toolStatus") {
        Some(Value::Object(tools)) => {
            for (tool, state) in tools {
                check_tool_state(tool, state, &mut issues);
            }
        }
        Some(_) => issues.push(Issue::new("toolStatus", "expected an object")),
        None => issues.push(Issue::new("toolStatus", "missing required field")),
    }

    match obj.get("errors") {
        Some(Value::Array(errors)) => {
            for (i, err) in errors.iter().enumerate() {
                check_progress_error(i, err, &mut issues);
            }
        }
        Some(_) => issues.push(Issue::new("errors", "expected an array")),
        None => issues.push(Issue::new("errors", "missing required field")),
    }

    if !issues.is_empty() {
        return Err(Rejection::Shape(issues));
    }

    // Identity is checked only once the shape is known-good, so a mismatch
    // is reported as exactly that and not buried in shape noise.
    let found = obj
        .get("sessionId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if found != session_id.as_str() {
        return Err(Rejection::IdentityMismatch {
            expected: session_id.clone(),
            found: found.to_string(),
        });
    }

    serde_json::from_value(body.clone())
        .map_err(|e| Rejection::Shape(vec![Issue::new("", e.to_string())]))
}

/// Validates an error-log entry body.
pub fn log_entry(body: &Value) -> Result<ErrorLogEntry, Vec<Issue>> {
    let Some(obj) = body.as_object() else {
        return Err(vec![Issue::new("", "expected a JSON object")]);
    };

    let mut issues = Vec::new();
    require_string(obj, "tool", &mut issues);
    require_string(obj, "error", &mut issues);
    require_string(obj, "suggestedFix", &mut issues);
    require_string(obj, "timestamp", &mut issues);
    require_step_index(obj, "step", &mut issues);

    if !issues.is_empty() {
        return Err(issues);
    }

    serde_json::from_value(body.clone()).map_err(|e| vec![Issue::new("", e.to_string())])
}

/// Validates a completion notification body.
pub fn completion_notice(body: &Value) -> Result<CompletionNotice, Vec<Issue>> {
    let Some(obj) = body.as_object() else {
        return Err(vec![Issue::new("", "expected a JSON object")]);
    };

    let mut issues = Vec::new();
    require_string(obj, "sessionId", &mut issues);

    if let Some(value) = obj.get("clientEmail") {
        match value.as_str() {
            Some(email) if looks_like_email(email) => {}
            Some(_) => issues.push(Issue::new("clientEmail", "expected an email address")),
            None => issues.push(Issue::new("clientEmail", "expected a string")),
        }
    }

    if let Some(value) = obj.get("os") {
        match value.as_str() {
            Some(tag) if ClientOs::TAGS.contains(&tag) => {}
            _ => issues.push(Issue::new(
                "os",
                format!("expected one of: {}", ClientOs::TAGS.join(", ")),
            )),
        }
    }

    for key in ["toolsInstalled", "errors"] {
        if let Some(value) = obj.get(key) {
            if value.as_u64().is_none() {
                issues.push(Issue::new(key, "expected a non-negative integer"));
            }
        }
    }

    if let Some(value) = obj.get("durationSeconds") {
        if value.as_f64().is_none() {
            issues.push(Issue::new("durationSeconds", "expected a number"));
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    serde_json::from_value(body.clone()).map_err(|e| vec![Issue::new("", e.to_string())])
}

fn check_tool_state(tool: &str, state: &Value, issues: &mut Vec<Issue>) {
    let Some(obj) = state.as_object() else {
        issues.push(Issue::new(format!("toolStatus.{tool}"), "expected an object"));
        return;
    };

    match obj.get("status").and_then(Value::as_str) {
        Some(tag) if ToolStatus::TAGS.contains(&tag) => {}
        _ => issues.push(Issue::new(
            format!("toolStatus.{tool}.status"),
            format!("expected one of: {}", ToolStatus::TAGS.join(", ")),
        )),
    }

    for key in ["version", "error"] {
        if let Some(value) = obj.get(key) {
            if !value.is_string() {
                issues.push(Issue::new(
                    format!("toolStatus.{tool}.{key}"),
                    "expected a string",
                ));
            }
        }
    }
}

fn check_progress_error(index: usize, err: &Value, issues: &mut Vec<Issue>) {
    let Some(obj) = err.as_object() else {
        issues.push(Issue::new(format!("errors.{index}"), "expected an object"));
        return;
    };
    for key in ["tool", "error", "suggestedFix"] {
        if obj.get(key).and_then(Value::as_str).is_none() {
            issues.push(Issue::new(
                format!("errors.{index}.{key}"),
                "expected a string",
            ));
        }
    }
}

fn require_string(obj: &serde_json::Map<String, Value>, key: &str, issues: &mut Vec<Issue>) {
    match obj.get(key) {
        Some(Value::String(_)) => {}
        Some(_) => issues.push(Issue::new(key, "expected a string")),
        None => issues.push(Issue::new(key, "missing required field")),
    }
}

fn require_step_index(obj: &serde_json::Map<String, Value>, key: &str, issues: &mut Vec<Issue>) {
    match obj.get(key) {
        Some(value) if value.as_u64().is_some() => {}
        Some(_) => issues.push(Issue::new(key, "expected a non-negative integer")),
        None => issues.push(Issue::new(key, "missing required field")),
    }
}

fn require_bool(obj: &serde_json::Map<String, Value>, key: &str, issues: &mut Vec<Issue>) {
    match obj.get(key) {
        Some(Value::Bool(_)) => {}
        Some(_) => issues.push(Issue::new(key, "expected a boolean")),
        None => issues.push(Issue::new(key, "missing required field")),
    }
}

fn require_tag(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    tags: &[&str],
    issues: &mut Vec<Issue>,
) {
    match obj.get(key).and_then(Value::as_str) {
        Some(tag) if tags.contains(&tag) => {}
        _ => issues.push(Issue::new(
            key,
            format!("expected one of: {}", tags.join(", ")),
        )),
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "sessionId": "s1",
            "currentStep": 1,
            "completedSteps": [],
            "currentAction": "Installing Git",
            "toolStatus": {"git": {"status": "installing"}},
            "errors": [],
            "timestamp": "2026-01-01T00:00:00Z",
            "phase": "phase1",
            "complete": false,
        })
    }

    #[test]
    fn accepts_and_normalizes_valid_record() {
        let record = progress_record(&SessionId::from_str("s1"), &valid_body()).unwrap();
        assert_eq!(record.session_id.as_str(), "s1");
        assert_eq!(record.current_step, 1);
        assert!(!record.complete);
        assert_eq!(
            record.tool_status.get("git").unwrap().status,
            ToolStatus::Installing
        );
    }

    #[test]
    fn reports_every_failing_field() {
        let body = json!({
            "sessionId": 42,
            "currentStep": "one",
            "completedSteps": "none",
            "currentAction": "Installing Git",
            "toolStatus": {"git": {"status": "done"}},
            "errors": [],
            "phase": "phase3",
            "complete": "yes",
        });

        let err = progress_record(&SessionId::from_str("s1"), &body).unwrap_err();
        let Rejection::Shape(issues) = err else {
            panic!("expected a shape rejection");
        };

        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"sessionId"));
        assert!(paths.contains(&"currentStep"));
        assert!(paths.contains(&"completedSteps"));
        assert!(paths.contains(&"toolStatus.git.status"));
        assert!(paths.contains(&"phase"));
        assert!(paths.contains(&"complete"));
        assert!(paths.contains(&"timestamp"));
        assert!(issues.len() >= 7);
    }

    #[test]
    fn identity_mismatch_is_not_a_shape_error() {
        let err = progress_record(&SessionId::from_str("other"), &valid_body()).unwrap_err();
        assert!(matches!(
            err,
            Rejection::IdentityMismatch { ref found, .. } if found == "s1"
        ));
    }

    #[test]
    fn non_integer_completed_step_is_located_by_index() {
        let mut body = valid_body();
        body["completedSteps"] = json!([1, "two", 3]);
        let Rejection::Shape(issues) =
            progress_record(&SessionId::from_str("s1"), &body).unwrap_err()
        else {
            panic!("expected a shape rejection");
        };
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "completedSteps.1");
    }

    #[test]
    fn log_entry_requires_all_fields() {
        let issues = log_entry(&json!({"tool": "git"})).unwrap_err();
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["error", "suggestedFix", "timestamp", "step"],
        );
    }

    #[test]
    fn log_entry_accepts_valid_body() {
        let entry = log_entry(&json!({
            "tool": "git",
            "error": "not found on PATH",
            "suggestedFix": "reinstall",
            "timestamp": "2026-01-01T00:00:01Z",
            "step": 1,
        }))
        .unwrap();
        assert_eq!(entry.step, 1);
        assert_eq!(entry.suggested_fix, "reinstall");
    }

    #[test]
    fn completion_notice_checks_optional_fields() {
        let issues = completion_notice(&json!({
            "sessionId": "s1",
            "clientEmail": "not-an-email",
            "os": "linux",
            "toolsInstalled": -1,
        }))
        .unwrap_err();
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["clientEmail", "os", "toolsInstalled"]);
    }

    #[test]
    fn completion_notice_minimal_body_is_enough() {
        let notice = completion_notice(&json!({"sessionId": "s1"})).unwrap();
        assert_eq!(notice.session_id.as_str(), "s1");
        assert!(notice.client_email.is_none());
    }
}
