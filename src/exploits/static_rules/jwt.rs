use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Insecure JWT verification";
const CWE: &str = "CWE-347";
const OWASP: &str = "A02:2021-Cryptographic Failures";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r#"(?i)\balgorithms?["']?\s*[:=]\s*\[?\s*["']none["']"#).unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "JWT accepted with the `none` algorithm",
            recommendation: "Pin the expected algorithm list, e.g. { algorithms: ['HS256'] }.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"\bjwt\.(verify|sign)\s*\(\s*[^,\n]+,\s*(null|undefined|""|'')"#)
                .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "JWT signed or verified with an empty secret",
            recommendation: "Use a strong secret or key pair loaded from configuration.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bjwt\.decode\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "jwt.decode reads claims without verifying the signature",
            recommendation: "Use jwt.verify before trusting any claim.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"(?i)ignoreExpiration\s*:\s*true|["']verify_(signature|exp)["']\s*:\s*False"#)
                .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "JWT validation check disabled",
            recommendation: "Keep signature and expiration checks enabled.",
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// JWT algorithm confusion and disabled validation.
pub struct JwtRule;

impl StaticRule for JwtRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::JwtAlgorithm
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        scan_patterns(source, &PATTERNS)
    }
}
