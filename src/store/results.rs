use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AuditEntry, AuditLevel, AuditLog, Requester};
use crate::error::{Result, ScanError};
use crate::exploits::{ExecutionMode, ModuleOutput, ScanOptions, SeverityCounts, Vulnerability};

const SOURCE: &str = "result-store";
const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Url,
    File,
    Suite,
}

/// Provenance of a scan record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    #[serde(flatten)]
    pub requester: Requester,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
}

/// One exploit run against one subject. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScan {
    pub scan_id: String,
    pub exploit_name: String,
    pub target: String,
    pub scan_type: ScanType,
    pub vulnerabilities: Vec<Vulnerability>,
    pub files_scanned: usize,
    /// Milliseconds.
    pub duration: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub options: ScanOptions,
    pub metadata: ScanMetadata,
    pub statistics: SeverityCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SecurityScan {
    pub fn begin(
        exploit_name: impl Into<String>,
        target: impl Into<String>,
        scan_type: ScanType,
        options: ScanOptions,
        metadata: ScanMetadata,
    ) -> PendingScan {
        PendingScan {
            scan_id: uuid::Uuid::new_v4().to_string(),
            exploit_name: exploit_name.into(),
            target: target.into(),
            scan_type,
            options,
            metadata,
            suite_id: None,
            started_at: Utc::now(),
        }
    }
}

/// A scan that has started but has no outcome yet.
#[derive(Debug, Clone)]
pub struct PendingScan {
    scan_id: String,
    exploit_name: String,
    target: String,
    scan_type: ScanType,
    options: ScanOptions,
    metadata: ScanMetadata,
    suite_id: Option<String>,
    started_at: DateTime<Utc>,
}

impl PendingScan {
    pub fn in_suite(mut self, suite_id: &str) -> Self {
        self.suite_id = Some(suite_id.to_string());
        self
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn succeed(self, output: ModuleOutput) -> SecurityScan {
        let statistics = SeverityCounts::from_findings(&output.vulnerabilities);
        self.finish(output.vulnerabilities, output.files_scanned, statistics, None)
    }

    /// A failed scan carries no findings.
    pub fn fail(self, error: impl Into<String>, files_scanned: usize) -> SecurityScan {
        let mut error = error.into();
        if error.is_empty() {
            error = "scan failed".into();
        }
        self.finish(Vec::new(), files_scanned, SeverityCounts::default(), Some(error))
    }

    fn finish(
        self,
        vulnerabilities: Vec<Vulnerability>,
        files_scanned: usize,
        statistics: SeverityCounts,
        error: Option<String>,
    ) -> SecurityScan {
        let completed_at = Utc::now();
        let duration = (completed_at - self.started_at).num_milliseconds().max(0) as u64;
        SecurityScan {
            scan_id: self.scan_id,
            exploit_name: self.exploit_name,
            target: self.target,
            scan_type: self.scan_type,
            vulnerabilities,
            files_scanned,
            duration,
            success: error.is_none(),
            error,
            options: self.options,
            metadata: self.metadata,
            statistics,
            suite_id: self.suite_id,
            started_at: self.started_at,
            completed_at,
        }
    }
}

/// Query filters for the result history.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFilter {
    pub exploit_name: Option<String>,
    pub scan_type: Option<ScanType>,
    pub target: Option<String>,
    pub suite_id: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ScanFilter {
    fn matches(&self, scan: &SecurityScan) -> bool {
        self.exploit_name.as_ref().map_or(true, |n| *n == scan.exploit_name)
            && self.scan_type.map_or(true, |t| t == scan.scan_type)
            && self.target.as_ref().map_or(true, |t| scan.target.contains(t.as_str()))
            && self
                .suite_id
                .as_ref()
                .map_or(true, |s| scan.suite_id.as_deref() == Some(s.as_str()))
            && self.success.map_or(true, |s| s == scan.success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanPage {
    pub results: Vec<SecurityScan>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub exploits_available: usize,
    pub active_scans: usize,
    pub completed_scans: usize,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub vulnerability_summary: SeverityCounts,
}

/// Counts one running module; released on drop, including during unwinding.
#[derive(Debug)]
pub struct ActiveScan {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Records {
    scans: Vec<SecurityScan>,
    ids: HashSet<String>,
}

pub struct ResultStore {
    records: RwLock<Records>,
    active: Arc<AtomicUsize>,
    audit: Arc<AuditLog>,
}

impl ResultStore {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            active: Arc::new(AtomicUsize::new(0)),
            audit,
        }
    }

    pub fn begin_scan(&self) -> ActiveScan {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveScan {
            counter: self.active.clone(),
        }
    }

    pub fn active_scans(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Persists a scan record. A repeated scan id is an invariant violation.
    pub fn save(&self, scan: SecurityScan) -> Result<()> {
        {
            let mut records = self.records.write();
            if !records.ids.insert(scan.scan_id.clone()) {
                drop(records);
                self.audit.record(
                    AuditEntry::new("SCAN_DUPLICATE_ID", AuditLevel::Error, SOURCE)
                        .with_scan(scan.scan_id.clone()),
                );
                return Err(ScanError::DuplicateScanId(scan.scan_id));
            }
            records.scans.push(scan.clone());
        }

        let (action, level) = if scan.success {
            ("SCAN_COMPLETED", AuditLevel::Info)
        } else {
            ("SCAN_FAILED", AuditLevel::Warning)
        };
        self.audit.record(
            AuditEntry::new(action, level, SOURCE)
                .with_requester(&scan.metadata.requester)
                .with_scan(scan.scan_id.clone())
                .with_details(json!({
                    "exploit": scan.exploit_name,
                    "target": scan.target,
                    "vulnerabilities": scan.statistics.total_vulnerabilities,
                    "durationMs": scan.duration,
                    "error": scan.error,
                })),
        );
        Ok(())
    }

    pub fn get(&self, scan_id: &str) -> Result<SecurityScan> {
        self.records
            .read()
            .scans
            .iter()
            .find(|s| s.scan_id == scan_id)
            .cloned()
            .ok_or_else(|| ScanError::not_found("Scan", scan_id))
    }

    /// Matching records, most recent first.
    pub fn query(&self, filter: &ScanFilter) -> ScanPage {
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = filter.offset.unwrap_or(0);
        let records = self.records.read();
        let matching: Vec<&SecurityScan> = records
            .scans
            .iter()
            .rev()
            .filter(|s| filter.matches(s))
            .collect();
        ScanPage {
            total: matching.len(),
            results: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            offset,
            limit,
        }
    }

    pub fn stats(&self, exploits_available: usize) -> ScanStats {
        let records = self.records.read();
        let mut summary = SeverityCounts::default();
        for scan in &records.scans {
            summary.merge(&scan.statistics);
        }
        ScanStats {
            exploits_available,
            active_scans: self.active_scans(),
            completed_scans: records.scans.len(),
            last_scan_time: records.scans.iter().map(|s| s.completed_at).max(),
            vulnerability_summary: summary,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every record; returns how many were cleared.
    pub fn purge_all(&self, requester: &Requester) -> usize {
        let cleared = {
            let mut records = self.records.write();
            let cleared = records.scans.len();
            *records = Records::default();
            cleared
        };
        self.audit.record(
            AuditEntry::new("RESULTS_PURGED", AuditLevel::Info, SOURCE)
                .with_requester(requester)
                .with_details(json!({ "clearedCount": cleared })),
        );
        cleared
    }

    /// Removes the records of one suite or batch.
    pub fn purge_suite(&self, suite_id: &str, requester: &Requester) -> Result<usize> {
        let cleared = {
            let mut records = self.records.write();
            let before = records.scans.len();
            let Records { scans, ids } = &mut *records;
            scans.retain(|s| {
                let keep = s.suite_id.as_deref() != Some(suite_id);
                if !keep {
                    ids.remove(&s.scan_id);
                }
                keep
            });
            before - scans.len()
        };
        if cleared == 0 {
            return Err(ScanError::not_found("Suite", suite_id));
        }
        self.audit.record(
            AuditEntry::new("SUITE_PURGED", AuditLevel::Info, SOURCE)
                .with_requester(requester)
                .with_details(json!({ "suiteId": suite_id, "clearedCount": cleared })),
        );
        Ok(cleared)
    }
}
