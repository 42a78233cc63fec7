use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Debug,
}

/// Who asked for an operation, as far as the request headers tell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Requester {
    /// Requester for operations started from the command line.
    pub fn cli() -> Self {
        Self {
            user_agent: Some(format!("scanforge-cli/{}", env!("CARGO_PKG_VERSION"))),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: String,
    pub details: serde_json::Value,
    pub level: AuditLevel,
    pub source: String,
    #[serde(flatten)]
    pub requester: Requester,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, level: AuditLevel, source: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            details: serde_json::Value::Null,
            level,
            source: source.into(),
            requester: Requester::default(),
            scan_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_requester(mut self, requester: &Requester) -> Self {
        self.requester = requester.clone();
        self
    }

    pub fn with_scan(mut self, scan_id: impl Into<String>) -> Self {
        self.scan_id = Some(scan_id.into());
        self
    }
}

/// Append-only audit trail. Every entry is also emitted through `tracing`.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: AuditEntry) {
        let scan_id = entry.scan_id.as_deref().unwrap_or("-");
        match entry.level {
            AuditLevel::Error => tracing::error!(
                action = %entry.action, source = %entry.source, scan_id, details = %entry.details, "audit"
            ),
            AuditLevel::Warning => tracing::warn!(
                action = %entry.action, source = %entry.source, scan_id, details = %entry.details, "audit"
            ),
            AuditLevel::Info => tracing::info!(
                action = %entry.action, source = %entry.source, scan_id, details = %entry.details, "audit"
            ),
            AuditLevel::Debug => tracing::debug!(
                action = %entry.action, source = %entry.source, scan_id, details = %entry.details, "audit"
            ),
        }
        self.entries.write().push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        self.entries.read().iter().rev().take(n).cloned().collect()
    }

    /// Number of entries recorded under `action`.
    pub fn count(&self, action: &str) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recent_is_newest_first() {
        let log = AuditLog::new();
        log.record(AuditEntry::new("FIRST", AuditLevel::Info, "test"));
        log.record(AuditEntry::new("SECOND", AuditLevel::Warning, "test").with_scan("scan-1"));
        assert_eq!(log.len(), 2);
        let recent = log.recent(1);
        assert_eq!(recent[0].action, "SECOND");
        assert_eq!(recent[0].scan_id.as_deref(), Some("scan-1"));
        assert_eq!(log.count("FIRST"), 1);
    }

    #[test]
    fn requester_fields_are_flattened() {
        let requester = Requester {
            ip_address: Some("10.0.0.7".into()),
            ..Requester::default()
        };
        let entry = AuditEntry::new("TARGET_REJECTED", AuditLevel::Warning, "authorizer")
            .with_requester(&requester)
            .with_details(json!({ "host": "google.com" }));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["ipAddress"], "10.0.0.7");
        assert_eq!(value["level"], "warning");
        assert!(value.get("userId").is_none());
    }
}
