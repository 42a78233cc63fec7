use once_cell::sync::Lazy;
use regex::Regex;

use super::{finding_at, line_of, scan_patterns, Pattern, StaticRule};
use crate::exploits::{truncate, ExploitKind, Severity, SourceText, Vulnerability};

const CSRF: &str = "Cross-Site Request Forgery (CSRF)";
const COOKIE: &str = "Insecure cookie configuration";
const CSRF_FIX: &str = "Include a per-session anti-CSRF token in every state-changing form and verify it server-side.";
const COOKIE_FIX: &str = "Set httpOnly, secure and sameSite on session cookies.";
const OWASP_CSRF: &str = "A01:2021-Broken Access Control";
const OWASP_COOKIE: &str = "A05:2021-Security Misconfiguration";

static POST_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<form\b[^>]*\bmethod\s*=\s*["']?post\b[^>]*>"#).unwrap());

static FORM_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</form\s*>").unwrap());

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)csrf|xsrf|_token|authenticity_token|@csrf").unwrap());

static COOKIE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bres\.cookie\s*\([^;]*").unwrap());

static POST_ROUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(app|router)\.(post|put|patch|delete)\s*\(").unwrap());

static COOKIE_FLAGS_OFF: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![Pattern {
        regex: Regex::new(r"(?i)\b(httpOnly|secure)\s*:\s*false\b|sameSite\s*:\s*['\x22]none['\x22]")
            .unwrap(),
        kind: COOKIE,
        severity: Severity::Medium,
        description: "Cookie security flag explicitly disabled",
        recommendation: COOKIE_FIX,
        cwe: "CWE-614",
        owasp: OWASP_COOKIE,
    }]
});

/// Forms without anti-forgery tokens and weak session cookies.
pub struct CsrfRule;

impl StaticRule for CsrfRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::Csrf
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        let content = &source.content;
        let mut findings = Vec::new();

        for form in POST_FORM.find_iter(content) {
            let body_end = FORM_END
                .find_at(content, form.end())
                .map(|m| m.end())
                .unwrap_or(content.len());
            if TOKEN.is_match(&content[form.start()..body_end]) {
                continue;
            }
            findings.push(
                finding_at(
                    source,
                    line_of(content, form.start()),
                    CSRF,
                    Severity::Medium,
                    "POST form without an anti-CSRF token",
                )
                .with_payload(truncate(form.as_str(), 100))
                .with_recommendation(CSRF_FIX)
                .with_cwe("CWE-352")
                .with_owasp(OWASP_CSRF),
            );
        }

        if !TOKEN.is_match(content) && !content.contains("csurf") {
            if let Some(route) = POST_ROUTE.find(content) {
                findings.push(
                    finding_at(
                        source,
                        line_of(content, route.start()),
                        CSRF,
                        Severity::Low,
                        "State-changing routes with no CSRF middleware in sight",
                    )
                    .with_recommendation(CSRF_FIX)
                    .with_cwe("CWE-352")
                    .with_owasp(OWASP_CSRF),
                );
            }
        }

        for call in COOKIE_CALL.find_iter(content) {
            let args = call.as_str().to_lowercase();
            let missing: Vec<&str> = [
                ("httponly", "httpOnly"),
                ("secure", "secure"),
                ("samesite", "sameSite"),
            ]
            .iter()
            .filter(|(needle, _)| !args.contains(*needle))
            .map(|(_, flag)| *flag)
            .collect();
            if missing.is_empty() {
                continue;
            }
            findings.push(
                finding_at(
                    source,
                    line_of(content, call.start()),
                    COOKIE,
                    Severity::Medium,
                    &format!("Cookie set without {}", missing.join(", ")),
                )
                .with_payload(truncate(call.as_str().trim(), 100))
                .with_recommendation(COOKIE_FIX)
                .with_cwe("CWE-614")
                .with_owasp(OWASP_COOKIE),
            );
        }

        for f in scan_patterns(source, &COOKIE_FLAGS_OFF) {
            if !findings.iter().any(|e| e.kind == f.kind && e.line == f.line) {
                findings.push(f);
            }
        }
        findings
    }
}
