use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Cross-Site Scripting (XSS)";
const CWE: &str = "CWE-79";
const OWASP: &str = "A03:2021-Injection";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"\.(innerHTML|outerHTML)\s*\+?=[^=]").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Unescaped assignment to innerHTML/outerHTML",
            recommendation: "Assign textContent, or sanitize with a vetted library such as DOMPurify.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bdocument\.write(ln)?\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "document.write with dynamic content",
            recommendation: "Build DOM nodes explicitly instead of writing markup strings.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\binsertAdjacentHTML\s*\(|dangerouslySetInnerHTML|\bv-html\s*=").unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "Raw HTML sink",
            recommendation: "Sanitize markup before handing it to raw HTML sinks.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bres\.(send|write)\s*\([^)\n]*req\.(query|body|params)").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Request input reflected into the response body",
            recommendation: "HTML-encode reflected values and set a restrictive Content-Security-Policy.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)\b(echo|print)\s*\(?\s*\$_(GET|POST|REQUEST|COOKIE)").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Superglobal echoed without htmlspecialchars",
            recommendation: "Wrap output in htmlspecialchars($value, ENT_QUOTES, 'UTF-8').",
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// Unescaped HTML sinks and reflected request input.
pub struct XssRule;

impl StaticRule for XssRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::Xss
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        scan_patterns(source, &PATTERNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::static_rules::js;

    #[test]
    fn flags_inner_html_assignment() {
        let findings = XssRule.scan(&js("el.innerHTML = req.body.userContent;"));
        assert_eq!(findings.len(), 1);
        assert!(findings[0].kind.contains("XSS"));
    }

    #[test]
    fn ignores_inner_html_comparison() {
        assert!(XssRule.scan(&js("if (el.innerHTML == '') {}")).is_empty());
    }

    #[test]
    fn flags_reflected_send() {
        let findings = XssRule.scan(&js("res.send('<p>' + req.query.name + '</p>');"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }
}
