use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Insecure CORS configuration";
const FIX: &str = "Allow an explicit list of trusted origins; never combine credentials with a wildcard.";
const CWE: &str = "CWE-942";
const OWASP: &str = "A05:2021-Security Misconfiguration";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r#"(?i)Access-Control-Allow-Origin(["']?\s*[,:]\s*["']\*|:\s*\*)"#)
                .unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "Access-Control-Allow-Origin set to *",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bcors\s*\(\s*\)").unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "cors() middleware with default options allows every origin",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"(?i)\borigin\s*:\s*(true|["']\*["'])"#).unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "CORS origin option reflects or allows any origin",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)Access-Control-Allow-Origin[^\n]*req\.headers\.origin").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Request Origin header echoed into Access-Control-Allow-Origin",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// Wildcard and reflected CORS origins.
pub struct CorsRule;

impl StaticRule for CorsRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::InsecureCors
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        let mut findings = scan_patterns(source, &PATTERNS);
        // A wildcard origin alongside credentials is worse than either alone.
        let credentials = source.content.contains("Access-Control-Allow-Credentials")
            || source.content.contains("credentials: true");
        if credentials {
            for f in findings.iter_mut() {
                f.severity = f.severity.max(Severity::High);
            }
        }
        findings
    }
}
