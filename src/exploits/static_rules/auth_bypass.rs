use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Authentication bypass";
const CWE: &str = "CWE-287";
const OWASP: &str = "A07:2021-Identification and Authentication Failures";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r#"if\s*\(\s*\$_(GET|POST|REQUEST|COOKIE)\[[^\]]*\]\s*===?\s*["']admin["']"#)
                .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "Admin role granted from a request parameter",
            recommendation: "Derive roles from the server-side session, never from request input.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"if\s*\(\s*\$?password\s*===?\s*["'][^"']*["']"#).unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "Password compared against a literal",
            recommendation: "Verify passwords against a salted hash (bcrypt, argon2) stored per user.",
            cwe: "CWE-798",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)\b(is_?)?(authenticated|logged_?in|login)\s*=\s*true\b").unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "Authentication flag set unconditionally",
            recommendation: "Set the authenticated state only after credentials have been verified.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)\b(is_?)?admin\s*=\s*(1|true)\b").unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "Admin flag set unconditionally",
            recommendation: "Grant privileges from a verified role lookup.",
            cwe: "CWE-269",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\breq\.(query|body|headers|cookies)\.(is_?[aA]dmin|admin|role)\b")
                .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Authorization decided by a client-supplied flag",
            recommendation: "Read roles from the authenticated session or a verified token.",
            cwe: "CWE-639",
            owasp: OWASP,
        },
    ]
});

/// Hard-wired authentication state and client-controlled roles.
pub struct AuthBypassRule;

impl StaticRule for AuthBypassRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::AuthBypass
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        scan_patterns(source, &PATTERNS)
    }
}
