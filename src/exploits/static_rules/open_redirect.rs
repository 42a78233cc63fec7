use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Open redirect";
const FIX: &str = "Redirect only to relative paths or to hosts on an allowlist.";
const CWE: &str = "CWE-601";
const OWASP: &str = "A01:2021-Broken Access Control";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"\bres\.redirect\s*\([^)\n]*req\.(body|query|params)").unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "Redirect target taken from the request",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"(?i)\bheader\s*\(\s*["']Location:[^"']*["']\s*\.\s*\$_(GET|POST|REQUEST)"#)
                .unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "PHP Location header built from a superglobal",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(
                r"\b(window\.)?location(\.href)?\s*=\s*[^;\n]*(location\.(search|hash)|URLSearchParams|getParameter)",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "Client-side redirect driven by URL parameters",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bredirect\s*\(\s*request\.(args|form|values)").unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "Flask redirect to a request parameter",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// Redirects whose destination the caller controls.
pub struct OpenRedirectRule;

impl StaticRule for OpenRedirectRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::OpenRedirect
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        scan_patterns(source, &PATTERNS)
    }
}
