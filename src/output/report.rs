use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::exploits::{Severity, SeverityCounts, Vulnerability};
use crate::store::{ScanType, SecurityScan};

const KEY_FINDINGS: usize = 5;

const BASELINE_RECOMMENDATIONS: &[&str] = &[
    "Implement input validation and sanitization",
    "Use parameterized queries to prevent SQL injection",
    "Enable a Content Security Policy",
    "Implement proper authentication and authorization",
    "Apply security updates and patches regularly",
    "Segment networks and restrict exposed services with firewall rules",
    "Harden the SSL/TLS configuration",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// Scan id, or suite id for a suite report.
    pub report_id: String,
    pub target: String,
    pub scan_type: ScanType,
    pub exploits: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveSummary {
    pub overview: String,
    pub risk_level: Severity,
    pub risk_score: u32,
    pub key_findings: Vec<String>,
    pub counts: SeverityCounts,
    pub failed_scans: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub scan_id: String,
    pub exploit_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vulnerabilities: usize,
    pub duration: u64,
}

/// Everything `GET /api/security/report/:id` returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedReport {
    pub metadata: ReportMetadata,
    pub executive_summary: ExecutiveSummary,
    pub findings: Vec<Vulnerability>,
    pub recommendations: Vec<String>,
    pub scans: Vec<ScanOutcome>,
}

impl DetailedReport {
    pub fn from_scan(scan: &SecurityScan) -> Self {
        Self::build(scan.scan_id.clone(), std::slice::from_ref(scan))
    }

    /// Aggregate report over the members of a suite or batch.
    pub fn from_suite(suite_id: &str, scans: &[SecurityScan]) -> Self {
        Self::build(suite_id.to_string(), scans)
    }

    fn build(report_id: String, scans: &[SecurityScan]) -> Self {
        let mut findings: Vec<Vulnerability> = scans
            .iter()
            .flat_map(|s| s.vulnerabilities.iter().cloned())
            .collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity));

        let mut targets: Vec<&str> = scans.iter().map(|s| s.target.as_str()).collect();
        targets.dedup();
        let target = targets.join(", ");

        let score = risk_score(&findings);
        let key_findings = findings
            .iter()
            .filter(|f| f.severity >= Severity::High)
            .take(KEY_FINDINGS)
            .map(|f| format!("{}: {}", f.kind, f.description))
            .collect();

        let mut recommendations: Vec<String> = Vec::new();
        for rec in findings.iter().filter_map(|f| f.recommendation.as_ref()) {
            if !recommendations.contains(rec) {
                recommendations.push(rec.clone());
            }
        }
        recommendations.extend(BASELINE_RECOMMENDATIONS.iter().map(|r| r.to_string()));

        Self {
            metadata: ReportMetadata {
                report_id,
                scan_type: scans.first().map_or(ScanType::Url, |s| s.scan_type),
                exploits: scans.iter().map(|s| s.exploit_name.clone()).collect(),
                started_at: scans.iter().map(|s| s.started_at).min(),
                completed_at: scans.iter().map(|s| s.completed_at).max(),
                generated_at: Utc::now(),
                target: target.clone(),
            },
            executive_summary: ExecutiveSummary {
                overview: format!("Security assessment completed for {target}"),
                risk_level: risk_level(score),
                risk_score: score,
                key_findings,
                counts: SeverityCounts::from_findings(&findings),
                failed_scans: scans.iter().filter(|s| !s.success).count(),
            },
            findings,
            recommendations,
            scans: scans
                .iter()
                .map(|s| ScanOutcome {
                    scan_id: s.scan_id.clone(),
                    exploit_name: s.exploit_name.clone(),
                    success: s.success,
                    error: s.error.clone(),
                    vulnerabilities: s.vulnerabilities.len(),
                    duration: s.duration,
                })
                .collect(),
        }
    }
}

/// Sum of severity weights: critical 10, high 7, medium 4, low 2, info 1.
pub fn risk_score(findings: &[Vulnerability]) -> u32 {
    findings.iter().map(|f| f.severity.weight()).sum()
}

pub fn risk_level(score: u32) -> Severity {
    match score {
        50.. => Severity::Critical,
        30..=49 => Severity::High,
        15..=29 => Severity::Medium,
        5..=14 => Severity::Low,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::{ModuleOutput, ScanOptions};
    use crate::store::ScanMetadata;

    fn scan_with(severities: &[Severity]) -> SecurityScan {
        let findings = severities
            .iter()
            .map(|s| {
                Vulnerability::new("SQL injection", *s, "http://localhost/", "quote breaks query")
                    .with_recommendation("Use parameterized queries.")
            })
            .collect();
        SecurityScan::begin(
            "sql-injection",
            "http://localhost/",
            ScanType::Url,
            ScanOptions::default(),
            ScanMetadata::default(),
        )
        .succeed(ModuleOutput::new(findings, 0))
    }

    #[test]
    fn risk_thresholds() {
        assert_eq!(risk_level(0), Severity::Info);
        assert_eq!(risk_level(5), Severity::Low);
        assert_eq!(risk_level(15), Severity::Medium);
        assert_eq!(risk_level(30), Severity::High);
        assert_eq!(risk_level(50), Severity::Critical);
    }

    #[test]
    fn summary_scores_and_limits_key_findings() {
        let scan = scan_with(&[Severity::Critical; 6]);
        let report = DetailedReport::from_scan(&scan);
        assert_eq!(report.executive_summary.risk_score, 60);
        assert_eq!(report.executive_summary.risk_level, Severity::Critical);
        assert_eq!(report.executive_summary.key_findings.len(), 5);
        assert_eq!(report.recommendations[0], "Use parameterized queries.");
        assert_eq!(
            report.recommendations.len(),
            1 + BASELINE_RECOMMENDATIONS.len()
        );
    }

    #[test]
    fn suite_report_merges_members() {
        let a = scan_with(&[Severity::Low]);
        let b = scan_with(&[Severity::High, Severity::Medium]);
        let report = DetailedReport::from_suite("suite-1", &[a, b]);
        assert_eq!(report.metadata.report_id, "suite-1");
        assert_eq!(report.metadata.target, "http://localhost/");
        assert_eq!(report.findings.len(), 3);
        assert_eq!(report.findings[0].severity, Severity::High);
        assert_eq!(report.executive_summary.risk_score, 13);
        assert_eq!(report.scans.len(), 2);
    }
}
