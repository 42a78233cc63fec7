use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "SQL injection";
const FIX: &str = "Use parameterized queries or prepared statements; never build SQL from request data.";
const CWE: &str = "CWE-89";
const OWASP: &str = "A03:2021-Injection";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(
                r#"(?i)["'][^"'\n]*\b(select\s|insert\s+into|update\s+\w+\s+set|delete\s+from)[^"'\n]*["']\s*\+"#,
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "SQL statement built by string concatenation",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(
                r"(?i)`[^`]*\b(select\s|insert\s+into|update\s+\w+\s+set|delete\s+from)[^`]*\$\{[^`]*`",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "SQL statement built from a template literal with interpolation",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)\.(query|execute|raw)\s*\([^)\n]*\+\s*req\.(body|query|params)")
                .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "Request input concatenated into a query call",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(
                r"(?i)(mysql_query|mysqli_query|pg_query|->query)\s*\([^;\n]*\$_(GET|POST|REQUEST|COOKIE)",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "Superglobal passed into a PHP query",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(
                r#"(?i)\.(execute|executemany|raw)\s*\(\s*(f["'][^"'\n]*\b(select|insert|update|delete)\b|["'][^"'\n]*\b(select|insert|update|delete)\b[^"'\n]*["']\s*%)"#,
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "SQL built with Python string formatting",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// Queries assembled from strings rather than bound parameters.
pub struct SqlInjectionRule;

impl StaticRule for SqlInjectionRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::SqlInjection
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
    fn flags_concatenated_query() {
        let findings = SqlInjectionRule
            .scan(&js(r#"const q = "SELECT * FROM users WHERE id = " + req.params.id;"#));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "SQL injection");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].cwe.as_deref(), Some("CWE-89"));
    }

    #[test]
    fn flags_template_interpolation() {
        let findings =
            SqlInjectionRule.scan(&js("db.query(`DELETE FROM orders WHERE id = ${id}`);"));
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn flags_php_superglobal() {
        let src = SourceText::new(
            "login.php",
            "<?php\n$r = mysqli_query($conn, \"SELECT * FROM u WHERE name='\" . $_POST['user'] . \"'\");",
            "php",
        );
        let findings = SqlInjectionRule.scan(&src);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, Some(2));
        assert_eq!(findings[0].location, "login.php:2");
    }

    #[test]
    fn passes_placeholder_query() {
        let findings = SqlInjectionRule.scan(&js(
            "const query = 'SELECT * FROM users WHERE id = ?';\ndb.execute(query, [id]);",
        ));
        assert!(findings.is_empty());
    }
}
