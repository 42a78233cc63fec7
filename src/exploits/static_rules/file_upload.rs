use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const KIND: &str = "Unrestricted file upload";
const FIX: &str = "Validate extension and MIME type against an allowlist, cap the size, and store outside the web root under a generated name.";
const CWE: &str = "CWE-434";
const OWASP: &str = "A04:2021-Insecure Design";

/// Handlers that restrict what gets stored.
static VALIDATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)fileFilter|mimetype|mime_content_type|finfo_file|pathinfo\s*\(|allowed_?extensions")
        .unwrap()
});

static UNVALIDATED: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"\bmulter\s*\(\s*\{?").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "multer upload configured without a fileFilter",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bmove_uploaded_file\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "move_uploaded_file without type validation",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\breq\.files\??\.\w+\??\.mv\s*\(").unwrap(),
            kind: KIND,
            severity: Severity::High,
            description: "express-fileupload file moved without type validation",
            recommendation: FIX,
            cwe: CWE,
            owasp: OWASP,
        },
    ]
});

static ALWAYS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![Pattern {
        regex: Regex::new(r#"(?i)(path\.join\s*\([^)\n]*|["'`]\s*\+\s*)\w*\.?(originalname|\$_FILES\[[^\]]+\]\[["']name["']\])"#)
            .unwrap(),
        kind: KIND,
        severity: Severity::Medium,
        description: "Client-supplied filename used in the storage path",
        recommendation: "Generate storage names server-side; never trust the uploaded filename.",
        cwe: "CWE-22",
        owasp: OWASP,
    }]
});

/// Upload handlers that accept any file type or trust the client filename.
pub struct FileUploadRule;

impl StaticRule for FileUploadRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::FileUpload
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        let mut findings = if VALIDATION.is_match(&source.content) {
            Vec::new()
        } else {
            scan_patterns(source, &UNVALIDATED)
        };
        for f in scan_patterns(source, &ALWAYS) {
            if !findings.iter().any(|existing| existing.line == f.line) {
                findings.push(f);
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::static_rules::js;

    #[test]
    fn flags_bare_multer() {
        let findings = FileUploadRule.scan(&js(
            "const multer = require('multer'); const upload = multer({ dest: 'uploads/' });",
        ));
        assert_eq!(findings.len(), 1);
        assert!(findings[0].kind.to_lowercase().contains("file upload"));
    }

    #[test]
    fn file_filter_passes() {
        let code = "const upload = multer({\n  dest: 'uploads/',\n  fileFilter: (req, file, cb) => cb(null, ok(file)),\n});";
        assert!(FileUploadRule.scan(&js(code)).is_empty());
    }

    #[test]
    fn flags_original_name_in_path() {
        let code = "const upload = multer({ fileFilter });\nconst p = path.join(dir, file.originalname);";
        let findings = FileUploadRule.scan(&js(code));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, Some(2));
        assert_eq!(findings[0].severity, Severity::Medium);
    }
}
