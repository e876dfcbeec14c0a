use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a setup session.
///
/// Possession of the identifier grants read/write access to the session's
/// state; there is no registry of valid identifiers independent of the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new session ID: unix millis plus a random suffix.
    pub fn generate() -> Self {
        SessionId(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }

    /// Creates a session ID from an externally supplied string.
    pub fn from_str(s: &str) -> Self {
        SessionId(s.to_string())
    }

    /// Returns the inner string representation of the session ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Installation state of a single tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Installing,
    Success,
    Error,
    Skipped,
}

impl ToolStatus {
    /// The recognized wire tags, in declaration order.
    pub const TAGS: [&'static str; 5] = ["pending", "installing", "success", "error", "skipped"];
}

/// Per-tool status entry inside a progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolState {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Coarse stage marker for a setup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Phase1,
    Phase2,
}

impl Phase {
    pub const TAGS: [&'static str; 2] = ["phase1", "phase2"];
}

/// A current-snapshot error inside a progress record. The whole list is
/// replaced on every update, unlike the append-only [`ErrorLogEntry`] log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressError {
    pub tool: String,
    pub error: String,
    pub suggested_fix: String,
}

/// The single current-state snapshot for a session, overwritten in place by
/// every update from the installer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Must equal the key under which the record is stored.
    pub session_id: SessionId,
    /// 1-based index into the fixed ordered list of setup steps.
    pub current_step: u64,
    pub completed_steps: Vec<u64>,
    pub current_action: String,
    pub tool_status: BTreeMap<String, ToolState>,
    pub errors: Vec<ProgressError>,
    /// ISO-8601 creation time of this record revision, stored verbatim.
    pub timestamp: String,
    pub phase: Phase,
    /// Terminal flag; once observed `true`, polling clients stop.
    pub complete: bool,
}

/// One entry in a session's append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub tool: String,
    pub error: String,
    pub suggested_fix: String,
    pub timestamp: String,
    pub step: u64,
}

/// Operating system reported by a completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientOs {
    Windows,
    Mac,
}

impl ClientOs {
    pub const TAGS: [&'static str; 2] = ["windows", "mac"];
}

/// Best-effort end-of-run summary posted to `/notify-complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<ClientOs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_installed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn progress_record_uses_camel_case_wire_names() {
        let record = ProgressRecord {
            session_id: SessionId::from_str("s1"),
            current_step: 1,
            completed_steps: vec![],
            current_action: "Installing Git".to_string(),
            tool_status: BTreeMap::from([(
                "git".to_string(),
                ToolState {
                    status: ToolStatus::Installing,
                    version: None,
                    error: None,
                },
            )]),
            errors: vec![],
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            phase: Phase::Phase1,
            complete: false,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
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
        );
    }

    #[test]
    fn log_entry_round_trips_suggested_fix_as_camel_case() {
        let entry = ErrorLogEntry {
            tool: "git".to_string(),
            error: "not found on PATH".to_string(),
            suggested_fix: "reinstall".to_string(),
            timestamp: "2026-01-01T00:00:01Z".to_string(),
            step: 1,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value.get("suggestedFix").unwrap(), "reinstall");
    }

    #[test]
    fn unknown_tool_status_tag_is_rejected() {
        let err = serde_json::from_value::<ToolState>(json!({"status": "done"}));
        assert!(err.is_err());
    }
}
