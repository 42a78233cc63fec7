use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Path traversal";
const FIX: &str = "Resolve the path, then verify it stays under an allowed base directory; reject `..` segments.";
const CWE: &str = "CWE-22";
const OWASP: &str = "A01:2021-Broken Access Control";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(
                r"\bfs\.(readFile|readFileSync|createReadStream|writeFile|writeFileSync|appendFile|unlink|unlinkSync|readdir|readdirSync|stat)\s*\([^)\n]*req\.(body|query|params)",
            )
            .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Filesystem call on a path taken from the request",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bres\.(sendFile|download)\s*\([^)\n]*req\.(body|query|params)").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "File served from a request-controlled path",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bpath\.(join|resolve)\s*\([^)\n]*req\.(body|query|params)").unwrap(),
            kind: KIND,
            severity: Severity::Medium,
            description: "Path built from request input",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)\b(include|require)(_once)?\s*\(?\s*[^;\n]*\$_(GET|POST|REQUEST|COOKIE)")
                .unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "PHP include of a request-controlled path",
            recommendation: FIX,
            cwe: "CWE-98",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"(?i)\b(fopen|file_get_contents|readfile|file)\s*\(\s*\$_(GET|POST|REQUEST)")
                .unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "PHP file read from a superglobal",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\b(open|send_file)\s*\([^)\n]*request\.(args|form|values)").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Python file access from request parameters",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// File access through request-controlled paths.
pub struct PathTraversalRule;

impl StaticRule for PathTraversalRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::PathTraversal
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
    fn flags_read_file_from_body() {
        let findings = PathTraversalRule.scan(&js(
            "fs.readFile(req.body.filename, 'utf8', (err, data) => res.send(data));",
        ));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "Path traversal");
    }

    #[test]
    fn flags_php_include() {
        let src = SourceText::new("page.php", "<?php include($_GET['page']); ?>", "php");
        let findings = PathTraversalRule.scan(&src);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn constant_path_passes() {
        assert!(PathTraversalRule
            .scan(&js("fs.readFile('./config.json', 'utf8', cb);"))
            .is_empty());
    }
}
