use crate::exploits::{Severity, Vulnerability};
use crate::store::SecurityScan;

/// Render scan records as console output, findings grouped by severity.
pub fn render(scans: &[SecurityScan], fail_on: Severity, pass: bool) -> String {
    let mut output = String::new();

    for scan in scans.iter().filter(|s| !s.success) {
        output.push_str(&format!(
            "\n  [ERROR]    {} on {}: {}\n",
            scan.exploit_name,
            scan.target,
            scan.error.as_deref().unwrap_or("failed")
        ));
    }

    let mut findings: Vec<(&str, &Vulnerability)> = scans
        .iter()
        .flat_map(|s| s.vulnerabilities.iter().map(move |v| (s.exploit_name.as_str(), v)))
        .collect();

    if findings.is_empty() {
        output.push_str("\n  No security findings detected.\n\n");
        return output;
    }

    // Critical first, then by location
    findings.sort_by(|(_, a), (_, b)| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.location.cmp(&b.location))
    });

    output.push_str(&format!("\n  {} finding(s) detected:\n\n", findings.len()));

    for (exploit, finding) in &findings {
        let severity_tag = match finding.severity {
            Severity::Critical => "[CRITICAL]",
            Severity::High => "[HIGH]    ",
            Severity::Medium => "[MEDIUM]  ",
            Severity::Low => "[LOW]     ",
            Severity::Info => "[INFO]    ",
        };

        output.push_str(&format!(
            "  {} {} {}: {}\n",
            severity_tag, exploit, finding.kind, finding.description
        ));
        output.push_str(&format!("           at {}\n", finding.location));
        if let Some(evidence) = &finding.evidence {
            output.push_str(&format!("           evidence: {}\n", evidence));
        }
        if let Some(recommendation) = &finding.recommendation {
            output.push_str(&format!("           fix: {}\n", recommendation));
        }
        output.push('\n');
    }

    let highest = findings.iter().map(|(_, f)| f.severity).max();
    let status = if pass { "PASS" } else { "FAIL" };
    output.push_str(&format!(
        "  Result: {} (threshold: {}, highest: {})\n\n",
        status,
        fail_on,
        highest
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into()),
    ));

    output
}
