use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Buffer overflow";
const CWE: &str = "CWE-120";
const OWASP: &str = "A04:2021-Insecure Design";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"\bgets\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::Critical,
            description: "gets() reads input with no length limit",
            recommendation: "Use fgets() with the destination buffer size.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\b(strcpy|strcat|wcscpy|wcscat)\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Unbounded string copy into a fixed-size buffer",
            recommendation: "Use strncpy/strncat or snprintf with the destination size, or strlcpy where available.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\b(sprintf|vsprintf)\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "Formatted write without a length bound",
            recommendation: "Use snprintf/vsnprintf with the destination size.",
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"\b(scanf|sscanf|fscanf)\s*\([^;]*"[^"]*%s"#).unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "%s conversion without a field width",
            recommendation: "Give every %s a maximum field width, e.g. %63s for a 64-byte buffer.",
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

/// Unbounded memory writes in C and C++ sources.
pub struct BufferOverflowRule;

impl BufferOverflowRule {
    fn applies_to(source: &SourceText) -> bool {
        let language = source.language.to_ascii_lowercase();
        if matches!(language.as_str(), "c" | "cpp" | "c++") {
            return true;
        }
        let name = source.file_name.to_ascii_lowercase();
        [".c", ".h", ".cpp", ".cc", ".hpp"]
            .iter()
            .any(|ext| name.ends_with(ext))
    }
}

impl StaticRule for BufferOverflowRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::BufferOverflow
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        if !Self::applies_to(source) {
            return Vec::new();
        }
        scan_patterns(source, &PATTERNS)
    }
}
