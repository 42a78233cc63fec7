use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{finding_at, line_of, scan_patterns, Pattern, StaticRule};
use crate::exploits::{truncate, ExploitKind, Severity, SourceText, Vulnerability};

const SECRET: &str = "Hardcoded secret";
const LOGGED: &str = "Sensitive data exposure in logs";
const SECRET_FIX: &str = "Load secrets from environment variables or a secret manager and rotate the exposed value.";
const OWASP_SECRET: &str = "A07:2021-Identification and Authentication Failures";

/// Minimum bits per character for an unlabelled literal to look like key material.
const ENTROPY_THRESHOLD: f64 = 4.0;
const ENTROPY_MIN_LEN: usize = 24;

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"AKIA[0-9A-Z]{16}|\bsk_live_[0-9a-zA-Z]{16,}|\bghp_[A-Za-z0-9]{36}|\bxox[baprs]-[0-9A-Za-z-]{10,}|-----BEGIN (RSA |EC |OPENSSH )?PRIVATE KEY-----")
                .unwrap(),
            kind: SECRET,
            severity: Severity::Critical,
            description: "Credential in a known provider format",
            recommendation: SECRET_FIX,
            cwe: "CWE-798",
            owasp: OWASP_SECRET,
        },
        Pattern {
            regex: Regex::new(
                r#"(?i)\b\w*(api[_-]?key|secret|passw(or)?d|pwd|token|access[_-]?key|private[_-]?key|client[_-]?secret)\w*["']?\s*[:=]\s*["'][^"'\s]{4,}["']"#,
            )
            .unwrap(),
            kind: SECRET,
            severity: Severity::High,
            description: "Credential-like identifier assigned a string literal",
            recommendation: SECRET_FIX,
            cwe: "CWE-798",
            owasp: OWASP_SECRET,
        },
        Pattern {
            regex: Regex::new(
                r"(?i)\b(console\.(log|info|debug|warn|error)|logger\.\w+|print|System\.out\.println)\s*\([^)\n]*(passw(or)?d|secret|token|api[_-]?key|ssn|credit[_-]?card)",
            )
            .unwrap(),
            kind: LOGGED,
            severity: Severity::Medium,
            description: "Sensitive value written to logs",
            recommendation: "Never log credentials; redact sensitive fields before logging.",
            cwe: "CWE-532",
            owasp: "A09:2021-Security Logging and Monitoring Failures",
        },
    ]
});

static LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([A-Za-z0-9+/=_\-]{24,})["']"#).unwrap());

/// Hardcoded credentials, high-entropy literals, and secrets written to logs.
pub struct SecretsRule;

impl StaticRule for SecretsRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::HardcodedSecrets
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        let mut findings = scan_patterns(source, &PATTERNS);
        let mut flagged: HashSet<usize> = findings
            .iter()
            .filter(|f| f.kind == SECRET)
            .filter_map(|f| f.line)
            .collect();

        for caps in LITERAL.captures_iter(&source.content) {
            let Some(literal) = caps.get(1) else { continue };
            let value = literal.as_str();
            if value.len() < ENTROPY_MIN_LEN || !looks_like_key(value) {
                continue;
            }
            let entropy = shannon_entropy(value);
            if entropy < ENTROPY_THRESHOLD {
                continue;
            }
            let line = line_of(&source.content, literal.start());
            if !flagged.insert(line) {
                continue;
            }
            findings.push(
                finding_at(
                    source,
                    line,
                    SECRET,
                    Severity::Medium,
                    &format!("High-entropy string literal ({entropy:.2} bits/char)"),
                )
                .with_payload(truncate(value, 12) + "…")
                .with_recommendation(SECRET_FIX)
                .with_cwe("CWE-798")
                .with_owasp(OWASP_SECRET),
            );
        }
        findings
    }
}

/// Mixed letters and digits; rules out paths, words and repeated runs.
fn looks_like_key(value: &str) -> bool {
    let has_digit = value.chars().any(|c| c.is_ascii_digit());
    let has_upper = value.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = value.chars().any(|c| c.is_ascii_lowercase());
    has_digit && has_upper && has_lower
}

/// Shannon entropy in bits per character.
pub(crate) fn shannon_entropy(value: &str) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in value.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }
    let len = value.chars().count() as f64;
    freq.values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::static_rules::js;

    #[test]
    fn flags_api_key_assignment() {
        let findings = SecretsRule.scan(&js(r#"const apiKey = "sk-1234567890abcdef";"#));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "Hardcoded secret");
    }

    #[test]
    fn flags_python_password() {
        let src = SourceText::new("agent.py", "password = \"supersecret\"\n", "python");
        assert_eq!(SecretsRule.scan(&src).len(), 1);
    }

    #[test]
    fn flags_logged_password() {
        let findings = SecretsRule.scan(&js("console.log(req.body.password);"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "Sensitive data exposure in logs");
    }

    #[test]
    fn flags_unlabelled_high_entropy_literal() {
        let findings = SecretsRule.scan(&js(r#"const k = "q8Z3vR7xT1mN5pL2wK9sB4hD6";"#));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!(findings[0].description.contains("entropy"));
    }

    #[test]
    fn low_entropy_literal_passes() {
        assert!(SecretsRule
            .scan(&js(r#"const s = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";"#))
            .is_empty());
    }

    #[test]
    fn entropy_bounds() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
    }
}
