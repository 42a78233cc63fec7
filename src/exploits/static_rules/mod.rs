mod auth_bypass;
mod buffer_overflow;
mod command_injection;
mod cors;
mod csrf;
mod file_upload;
mod jwt;
mod open_redirect;
mod path_traversal;
mod secrets;
mod sql_injection;
mod ssrf;
mod xss;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;

use super::{
    truncate, ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity,
    SourceText, Subject, Vulnerability,
};
use crate::error::ModuleError;

pub use auth_bypass::AuthBypassRule;
pub use buffer_overflow::BufferOverflowRule;
pub use command_injection::CommandInjectionRule;
pub use cors::CorsRule;
pub use csrf::CsrfRule;
pub use file_upload::FileUploadRule;
pub use jwt::JwtRule;
pub use open_redirect::OpenRedirectRule;
pub use path_traversal::PathTraversalRule;
pub use secrets::SecretsRule;
pub use sql_injection::SqlInjectionRule;
pub use ssrf::SsrfRule;
pub use xss::XssRule;

const PAYLOAD_LIMIT: usize = 100;
const EVIDENCE_LIMIT: usize = 200;

/// A source-level check for one exploit kind.
pub trait StaticRule: Send + Sync {
    fn kind(&self) -> ExploitKind;

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability>;
}

/// Returns every built-in static rule.
pub fn all() -> Vec<Arc<dyn StaticRule>> {
    vec![
        Arc::new(SqlInjectionRule),
        Arc::new(XssRule),
        Arc::new(CsrfRule),
        Arc::new(SsrfRule),
        Arc::new(PathTraversalRule),
        Arc::new(CommandInjectionRule),
        Arc::new(SecretsRule),
        Arc::new(CorsRule),
        Arc::new(JwtRule),
        Arc::new(FileUploadRule),
        Arc::new(OpenRedirectRule),
        Arc::new(AuthBypassRule),
        Arc::new(BufferOverflowRule),
    ]
}

/// Runs every static rule over `source`, deduplicated by (type, line).
pub fn scan_all(source: &SourceText) -> Vec<Vulnerability> {
    let mut seen = HashSet::new();
    all()
        .iter()
        .flat_map(|rule| rule.scan(source))
        .filter(|v| seen.insert((v.kind.clone(), v.line)))
        .collect()
}

/// Adapts a [`StaticRule`] to the module contract.
pub struct StaticModule {
    rule: Arc<dyn StaticRule>,
}

impl StaticModule {
    pub fn new(rule: Arc<dyn StaticRule>) -> Self {
        Self { rule }
    }
}

#[async_trait]
impl ExploitModule for StaticModule {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Static
    }

    async fn run(
        &self,
        subject: &Subject,
        _options: &ScanOptions,
        _deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        match subject {
            Subject::Source(source) => Ok(ModuleOutput::new(self.rule.scan(source), 1)),
            Subject::Target(_) => Err(ModuleError::Unsupported {
                exploit: self.rule.kind().name().to_string(),
                mode: ExecutionMode::Live.to_string(),
            }),
        }
    }
}

/// A regex check producing one finding type.
pub(crate) struct Pattern {
    pub regex: Regex,
    pub kind: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    pub recommendation: &'static str,
    pub cwe: &'static str,
    pub owasp: &'static str,
}

/// Every match of every pattern, one finding per (type, line).
pub(crate) fn scan_patterns(source: &SourceText, patterns: &[Pattern]) -> Vec<Vulnerability> {
    let mut seen = HashSet::new();
    let mut findings = Vec::new();
    for pattern in patterns {
        for m in pattern.regex.find_iter(&source.content) {
            let line = line_of(&source.content, m.start());
            if !seen.insert((pattern.kind, line)) {
                continue;
            }
            findings.push(
                finding_at(source, line, pattern.kind, pattern.severity, pattern.description)
                    .with_payload(truncate(m.as_str().trim(), PAYLOAD_LIMIT))
                    .with_recommendation(pattern.recommendation)
                    .with_cwe(pattern.cwe)
                    .with_owasp(pattern.owasp),
            );
        }
    }
    findings
}

/// Finding located at `line` of `source`, with that line as evidence.
pub(crate) fn finding_at(
    source: &SourceText,
    line: usize,
    kind: &str,
    severity: Severity,
    description: &str,
) -> Vulnerability {
    let evidence = source
        .content
        .lines()
        .nth(line.saturating_sub(1))
        .map(|l| truncate(l.trim(), EVIDENCE_LIMIT))
        .unwrap_or_default();
    Vulnerability::new(
        kind,
        severity,
        format!("{}:{}", source.file_name, line),
        description,
    )
    .with_line(line)
    .with_evidence(evidence)
}

/// 1-based line number of byte offset `offset`.
pub(crate) fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

#[cfg(test)]
pub(crate) fn js(code: &str) -> SourceText {
    SourceText::new("test.js", code, "javascript")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = r#"
        const safeValue = validator.escape(req.body.input);
        const query = 'SELECT * FROM users WHERE id = ?';
        db.execute(query, [safeValue]);
        app.use(helmet());
        app.use(rateLimit({ windowMs: 15 * 60 * 1000, max: 100 }));
        "#;

    const MIXED: &str = r#"
        const apiKey = "secret-key-123";
        const userInput = req.body.input;
        const query = "SELECT * FROM users WHERE name = " + userInput;
        db.execute(query);
        document.innerHTML = req.body.html;
        eval(req.body.code);
        console.log(req.body.password);
        res.cookie('session', sessionId);
        res.redirect(req.body.url);
        "#;

    fn types(code: &str) -> Vec<String> {
        scan_all(&js(code)).into_iter().map(|v| v.kind).collect()
    }

    fn has(code: &str, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        types(code).iter().any(|t| t.to_lowercase().contains(&needle))
    }

    #[test]
    fn line_numbers_are_one_based() {
        assert_eq!(line_of("a\nb\nc", 0), 1);
        assert_eq!(line_of("a\nb\nc", 2), 2);
        assert_eq!(line_of("a\nb\nc", 4), 3);
    }

    #[test]
    fn clean_code_has_few_findings() {
        let findings = scan_all(&js(CLEAN));
        assert!(findings.len() <= 2, "unexpected findings: {findings:?}");
    }

    #[test]
    fn mixed_code_reports_each_category() {
        for expected in [
            "Hardcoded secret",
            "SQL injection",
            "XSS",
            "eval",
            "Sensitive data",
            "Cookie",
            "Open redirect",
        ] {
            assert!(has(MIXED, expected), "missing {expected}: {:?}", types(MIXED));
        }
    }

    #[test]
    fn single_snippets_hit_their_rule() {
        let cases = [
            (r#"const query = "SELECT * FROM users WHERE id = " + req.params.id; db.execute(query);"#, "SQL injection"),
            ("document.innerHTML = req.body.userContent;", "XSS"),
            (r#"const apiKey = "sk-1234567890abcdef"; axios.get('/api/data', { headers: { 'Authorization': apiKey } });"#, "Hardcoded secret"),
            ("const { exec } = require('child_process'); exec('ls ' + req.body.directory);", "OS command injection"),
            (r#"<form action="/transfer" method="POST"><input name="amount" type="text"></form>"#, "CSRF"),
            ("app.use((req, res, next) => { res.setHeader('Access-Control-Allow-Origin', '*'); next(); });", "CORS"),
            (r#"const decoded = jwt.verify(token, null, { algorithm: "none" });"#, "JWT verification"),
            ("const multer = require('multer'); const upload = multer({ dest: 'uploads/' });", "File upload"),
            ("axios.get(req.body.url).then(response => res.json(response.data));", "SSRF"),
            ("if (req.query.isAdmin) { req.session.authenticated = true; }", "Authentication bypass"),
            ("fs.readFile(req.body.filename, 'utf8', (err, data) => res.send(data));", "Path traversal"),
        ];
        for (code, expected) in cases {
            assert!(has(code, expected), "{expected} not found in {:?}", types(code));
        }
    }

    #[test]
    fn scan_all_dedupes_by_type_and_line() {
        let findings = scan_all(&js(MIXED));
        let mut keys: Vec<_> = findings.iter().map(|v| (v.kind.clone(), v.line)).collect();
        let before = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(before, keys.len());
    }

    #[test]
    fn payload_is_truncated() {
        let long = format!("eval({});", "x".repeat(300));
        let findings = scan_all(&js(&long));
        let eval = findings.iter().find(|v| v.kind.contains("eval")).unwrap();
        assert!(eval.payload.as_ref().unwrap().chars().count() <= PAYLOAD_LIMIT);
    }

    #[tokio::test]
    async fn static_module_rejects_live_targets() {
        let module = StaticModule::new(Arc::new(XssRule));
        let subject = Subject::Target(url::Url::parse("http://localhost").unwrap());
        let err = module
            .run(&subject, &ScanOptions::default(), Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn static_module_reports_one_file() {
        let module = StaticModule::new(Arc::new(XssRule));
        let subject = Subject::Source(js("document.write(location.hash);"));
        let output = module
            .run(&subject, &ScanOptions::default(), Instant::now())
            .await
            .unwrap();
        assert_eq!(output.files_scanned, 1);
        assert_eq!(output.vulnerabilities.len(), 1);
        assert_eq!(output.vulnerabilities[0].line, Some(1));
    }
}
