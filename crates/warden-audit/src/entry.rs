use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolved decision as recorded. A pending prompt cannot be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Terminal state of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Error,
    Timeout,
    /// Refused by the human, or no human answer was available.
    Denied,
    /// Vetoed by a block list.
    Blocked,
}

impl AuditOutcome {
    #[must_use]
    pub fn decision(self) -> Verdict {
        match self {
            Self::Success | Self::Error | Self::Timeout => Verdict::Allow,
            Self::Denied | Self::Blocked => Verdict::Deny,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Denied => "denied",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit record. Arguments are stored only as a hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub server: String,
    pub tool: String,
    pub decision: Verdict,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub args_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    /// Entry stamped with the current time; `decision` follows from `outcome`.
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        tool: impl Into<String>,
        outcome: AuditOutcome,
        args: &Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            server: server.into(),
            tool: tool.into(),
            decision: outcome.decision(),
            outcome,
            duration_ms: None,
            args_hash: hash_args(args),
            error: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// `YYYY-MM` of the entry timestamp; selects the log file.
    #[must_use]
    pub fn month_key(&self) -> String {
        self.timestamp.format("%Y-%m").to_string()
    }
}

/// Fixed-length (64 hex chars) blake3 digest of the arguments, independent of key order.
#[must_use]
pub fn hash_args(args: &Value) -> String {
    let canonical = canonicalize(args).to_string();
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), canonicalize(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn hash_is_fixed_length_hex() {
        let hash = hash_args(&json!({"path": "/etc/passwd"}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(hash_args(&a), hash_args(&b));
    }

    #[test]
    fn hash_distinguishes_arguments() {
        assert_ne!(
            hash_args(&json!({"path": "a.txt"})),
            hash_args(&json!({"path": "b.txt"}))
        );
        assert_ne!(hash_args(&json!([1, 2])), hash_args(&json!([2, 1])));
    }

    #[test]
    fn entry_never_contains_raw_arguments() {
        let entry = AuditEntry::new(
            "fs",
            "read_file",
            AuditOutcome::Success,
            &json!({"path": "/home/user/secret-plans.txt"}),
        );
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains("secret-plans"));
        assert!(line.contains(&entry.args_hash));
    }

    #[test]
    fn decision_follows_outcome() {
        assert_eq!(AuditOutcome::Success.decision(), Verdict::Allow);
        assert_eq!(AuditOutcome::Error.decision(), Verdict::Allow);
        assert_eq!(AuditOutcome::Timeout.decision(), Verdict::Allow);
        assert_eq!(AuditOutcome::Denied.decision(), Verdict::Deny);
        assert_eq!(AuditOutcome::Blocked.decision(), Verdict::Deny);
    }

    #[test]
    fn serialization_shape() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 0).unwrap();
        let entry = AuditEntry::new("fs", "delete_file", AuditOutcome::Denied, &json!({}))
            .with_timestamp(ts)
            .with_error("denied by user");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["server"], "fs");
        assert_eq!(json["tool"], "delete_file");
        assert_eq!(json["decision"], "deny");
        assert_eq!(json["outcome"], "denied");
        assert_eq!(json["error"], "denied by user");
        assert!(json.get("duration_ms").is_none());
        assert!(json["timestamp"].as_str().unwrap().starts_with("2026-10-15T08:30:00"));
    }

    #[test]
    fn duration_is_recorded_in_millis() {
        let entry = AuditEntry::new("s", "t", AuditOutcome::Success, &json!({}))
            .with_duration(Duration::from_millis(1250));
        assert_eq!(entry.duration_ms, Some(1250));
    }

    #[test]
    fn month_key_uses_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap();
        let entry =
            AuditEntry::new("s", "t", AuditOutcome::Success, &json!({})).with_timestamp(ts);
        assert_eq!(entry.month_key(), "2025-01");
    }

    #[test]
    fn entry_parses_back() {
        let entry = AuditEntry::new("git", "git_push", AuditOutcome::Timeout, &json!({"r": 1}))
            .with_duration(Duration::from_millis(50))
            .with_error("timed out");
        let line = serde_json::to_string(&entry).unwrap();
        let parsed: AuditEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, entry);
    }
}
