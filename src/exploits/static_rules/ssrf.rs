use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Server-Side Request Forgery (SSRF)";
const FIX: &str = "Validate URLs against an allowlist of permitted hosts and block internal and link-local ranges.";
const CWE: &str = "CWE-918";
const OWASP: &str = "A10:2021-Server-Side Request Forgery";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(
                r"\b(axios(\.(get|post|put|patch|delete|head|request))?|fetch|got|needle|request|superagent\.(get|post)|https?\.(get|request))\s*\(\s*[^)\n]*req\.(body|query|params)",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Outbound HTTP request to a URL taken from the request",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(
                r"(?i)\b(curl_init|curl_setopt|file_get_contents|fopen)\s*\([^;\n]*\$_(GET|POST|REQUEST)",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "PHP network read from a superglobal URL",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(
                r"\b(requests\.(get|post|put|head|request)|urllib\.request\.urlopen|urlopen|httpx\.(get|post))\s*\([^)\n]*request\.(args|form|json|values)",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Python HTTP client fed from request parameters",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// HTTP clients fed from request input.
pub struct SsrfRule;

impl StaticRule for SsrfRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::Ssrf
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        scan_patterns(source, &PATTERNS)
    }
}
