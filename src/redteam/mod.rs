//! Free-text code auditing: every static rule, plus an optional model review.
//!
//! The structured [`AuditReport`] is the source of truth; [`AuditReport::render`]
//! produces the markdown shown to users.

pub mod model;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::AuditModelConfig;
use crate::error::ModuleError;
use crate::exploits::{
    static_rules, ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity,
    SeverityCounts, SourceText, Subject, Vulnerability,
};
use crate::files::language_for;

pub use model::{AuditModel, ChatCompletionsModel, DisabledModel, ModelError};

const MODEL_FINDING: &str = "AI security analysis";

/// Extensions `audit_many` looks at; everything else is skipped.
const CODE_EXTENSIONS: &[&str] = &[
    "js", "ts", "jsx", "tsx", "py", "java", "php", "rb", "go", "cs", "c", "h", "cpp",
];

/// Outcome of the model half of an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ModelStatus {
    Skipped,
    Failed(String),
    Completed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub file_name: String,
    pub language: String,
    pub custom_findings: Vec<Vulnerability>,
    pub model_findings: Vec<Vulnerability>,
    pub model_status: ModelStatus,
    /// Highest finding severity, or `none`.
    pub severity: String,
}

impl AuditReport {
    pub fn findings(&self) -> impl Iterator<Item = &Vulnerability> {
        self.custom_findings.iter().chain(&self.model_findings)
    }

    pub fn finding_count(&self) -> usize {
        self.custom_findings.len() + self.model_findings.len()
    }

    /// Markdown rendering of the report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Red Team Audit Report - {}\n", self.file_name);
        let _ = writeln!(out, "## Summary");
        let _ = writeln!(out, "- **File**: {}", self.file_name);
        let _ = writeln!(out, "- **Language**: {}", self.language);
        let _ = writeln!(out, "- **Overall Severity**: {}", self.severity);
        let _ = writeln!(out, "- **Total Findings**: {}\n", self.finding_count());

        let _ = writeln!(out, "## Custom Exploit Findings");
        if self.custom_findings.is_empty() {
            let _ = writeln!(out, "No custom findings detected");
        }
        for f in &self.custom_findings {
            let _ = write!(out, "- **[{}]** {}: {}", f.severity.as_str().to_uppercase(), f.kind, f.description);
            if let Some(line) = f.line {
                let _ = write!(out, " (line {line})");
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "\n## LLM Security Audit");
        match &self.model_status {
            ModelStatus::Skipped => {
                let _ = writeln!(out, "LLM audit skipped (no model token configured).");
            }
            ModelStatus::Failed(reason) => {
                let _ = writeln!(out, "LLM analysis failed: {reason}");
            }
            ModelStatus::Completed => {
                for f in &self.model_findings {
                    let _ = writeln!(out, "{}", f.evidence.as_deref().unwrap_or_default());
                }
            }
        }

        let _ = writeln!(out, "\n## Recommendations");
        out.push_str(&recommendations(self.finding_count()));
        out
    }
}

fn recommendations(findings: usize) -> String {
    if findings == 0 {
        return "No significant security issues detected. Continue following secure coding practices.\n"
            .to_string();
    }
    [
        "**Immediate actions:**",
        "1. Review and address all critical and high severity findings",
        "2. Implement input validation and sanitization",
        "3. Add security headers and CSRF protection",
        "4. Use parameterized queries to prevent injection attacks",
        "5. Implement proper authentication and authorization",
        "",
        "**Security best practices:**",
        "- Use security linters and static analysis tools",
        "- Keep dependencies updated and scan them for vulnerabilities",
        "- Use HTTPS and secure cookie settings",
        "- Handle errors without leaking internals",
    ]
    .iter()
    .fold(String::new(), |mut acc, line| {
        acc.push_str(line);
        acc.push('\n');
        acc
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAuditSummary {
    pub total_files: usize,
    pub files_with_issues: usize,
    pub total_findings: usize,
    pub critical_findings: usize,
    pub high_findings: usize,
    pub medium_findings: usize,
    pub low_findings: usize,
    pub overall_risk: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiAuditReport {
    pub summary: MultiAuditSummary,
    pub results: BTreeMap<String, AuditReport>,
}

impl MultiAuditReport {
    /// Drops per-file findings below `threshold`. The summary keeps
    /// counting every finding.
    pub fn retain_at_least(&mut self, threshold: Severity) {
        for report in self.results.values_mut() {
            report.custom_findings.retain(|f| f.severity >= threshold);
            report.model_findings.retain(|f| f.severity >= threshold);
        }
    }

    /// Findings left in the per-file results.
    pub fn remaining_findings(&self) -> usize {
        self.results.values().map(AuditReport::finding_count).sum()
    }
}

/// Runs every static rule over a piece of code and optionally asks a model.
pub struct CodeAuditor {
    model: Arc<dyn AuditModel>,
}

impl CodeAuditor {
    pub fn new(model: Arc<dyn AuditModel>) -> Self {
        Self { model }
    }

    pub fn from_config(config: &AuditModelConfig) -> Self {
        Self::new(model::from_config(config))
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.name()
    }

    pub async fn audit(&self, code: &str, language: &str, file_name: &str) -> AuditReport {
        let source = SourceText::new(file_name, code, language);
        let custom_findings = static_rules::scan_all(&source);

        let (model_findings, model_status) = if self.model.name().is_none() {
            (Vec::new(), ModelStatus::Skipped)
        } else {
            let prompt = prompt(&source, &custom_findings);
            match self.model.review(&prompt).await {
                Ok(text) => {
                    let finding = Vulnerability::new(
                        MODEL_FINDING,
                        Severity::Medium,
                        file_name,
                        "Model-assisted security review",
                    )
                    .with_evidence(text);
                    (vec![finding], ModelStatus::Completed)
                }
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "model review failed");
                    (Vec::new(), ModelStatus::Failed(e.to_string()))
                }
            }
        };

        let mut counts = SeverityCounts::from_findings(&custom_findings);
        counts.merge(&SeverityCounts::from_findings(&model_findings));
        let severity = counts.highest().map_or("none", Severity::as_str).to_string();

        AuditReport {
            file_name: file_name.to_string(),
            language: language.to_string(),
            custom_findings,
            model_findings,
            model_status,
            severity,
        }
    }

    /// Audits every code file in `files` (name to content), skipping the rest.
    pub async fn audit_many(&self, files: &BTreeMap<String, String>) -> MultiAuditReport {
        let mut summary = MultiAuditSummary::default();
        let mut results = BTreeMap::new();

        for (name, code) in files.iter().filter(|(name, _)| is_code_file(name)) {
            summary.total_files += 1;
            let report = self.audit(code, language_for(name), name).await;
            if report.finding_count() > 0 {
                summary.files_with_issues += 1;
                summary.total_findings += report.finding_count();
                for f in report.findings() {
                    match f.severity {
                        Severity::Critical => summary.critical_findings += 1,
                        Severity::High => summary.high_findings += 1,
                        Severity::Medium => summary.medium_findings += 1,
                        Severity::Low => summary.low_findings += 1,
                        Severity::Info => {}
                    }
                }
            }
            results.insert(name.clone(), report);
        }

        summary.overall_risk = if summary.critical_findings > 0 {
            "critical"
        } else if summary.high_findings > 0 {
            "high"
        } else if summary.medium_findings > 0 {
            "medium"
        } else {
            "low"
        }
        .to_string();

        MultiAuditReport { summary, results }
    }
}

#[async_trait]
impl ExploitModule for CodeAuditor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Static
    }

    async fn run(
        &self,
        subject: &Subject,
        _options: &ScanOptions,
        _deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let Subject::Source(source) = subject else {
            return Err(ModuleError::Unsupported {
                exploit: ExploitKind::CodeAudit.name().to_string(),
                mode: ExecutionMode::Live.to_string(),
            });
        };
        let report = self
            .audit(&source.content, &source.language, &source.file_name)
            .await;
        let findings = report
            .custom_findings
            .into_iter()
            .chain(report.model_findings)
            .collect();
        Ok(ModuleOutput::new(findings, 1))
    }
}

fn is_code_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn prompt(source: &SourceText, findings: &[Vulnerability]) -> String {
    let findings = serde_json::to_string_pretty(findings).unwrap_or_else(|_| "[]".into());
    format!(
        "You are an expert security auditor. Analyze the following {language} code for vulnerabilities.\n\
         File: {file}\n\n\
         Code:\n{code}\n\n\
         Pattern scanner findings:\n{findings}\n\n\
         Provide a security audit with:\n\
         1. Vulnerabilities found\n\
         2. Severity of each (critical/high/medium/low)\n\
         3. Specific remediation\n\
         4. Best practice recommendations\n\n\
         Format the answer as markdown.",
        language = source.language,
        file = source.file_name,
        code = source.content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SQL: &str = r#"app.get('/user', (req, res) => {
  db.query("SELECT * FROM users WHERE id = " + req.params.id);
});"#;

    struct CannedModel(Result<&'static str, ()>);

    #[async_trait]
    impl AuditModel for CannedModel {
        fn name(&self) -> Option<&str> {
            Some("canned")
        }

        async fn review(&self, prompt: &str) -> Result<String, ModelError> {
            assert!(prompt.contains("Pattern scanner findings"));
            self.0.map(str::to_string).map_err(|_| ModelError::EmptyResponse)
        }
    }

    fn disabled() -> CodeAuditor {
        CodeAuditor::new(Arc::new(DisabledModel))
    }

    #[tokio::test]
    async fn audit_without_model_is_skipped() {
        let report = disabled().audit(SQL, "javascript", "user.js").await;
        assert_eq!(report.model_status, ModelStatus::Skipped);
        assert!(report.model_findings.is_empty());
        assert!(report
            .custom_findings
            .iter()
            .any(|f| f.kind.contains("SQL injection")));
        assert_ne!(report.severity, "none");
    }

    #[tokio::test]
    async fn model_answer_becomes_a_finding() {
        let auditor = CodeAuditor::new(Arc::new(CannedModel(Ok("Looks injectable."))));
        let report = auditor.audit(SQL, "javascript", "user.js").await;
        assert_eq!(report.model_status, ModelStatus::Completed);
        assert_eq!(report.model_findings.len(), 1);
        assert_eq!(report.model_findings[0].kind, MODEL_FINDING);
        let rendered = report.render();
        let custom = rendered.find("## Custom Exploit Findings").unwrap();
        let llm = rendered.find("## LLM Security Audit").unwrap();
        assert!(custom < llm);
        assert!(rendered.contains("Looks injectable."));
    }

    #[tokio::test]
    async fn model_failure_is_recorded() {
        let auditor = CodeAuditor::new(Arc::new(CannedModel(Err(()))));
        let report = auditor.audit("const x = 1;", "javascript", "x.js").await;
        assert!(matches!(report.model_status, ModelStatus::Failed(_)));
        assert_eq!(report.severity, "none");
    }

    #[tokio::test]
    async fn audit_many_skips_non_code_files() {
        let files = BTreeMap::from([
            ("user.js".to_string(), SQL.to_string()),
            ("README.md".to_string(), SQL.to_string()),
            ("util.py".to_string(), "def add(a, b):\n    return a + b\n".to_string()),
        ]);
        let report = disabled().audit_many(&files).await;
        assert_eq!(report.summary.total_files, 2);
        assert_eq!(report.summary.files_with_issues, 1);
        assert!(!report.results.contains_key("README.md"));
        assert_eq!(report.results["util.py"].language, "python");
        assert_ne!(report.summary.overall_risk, "low");
    }

    #[tokio::test]
    async fn threshold_filters_results_not_summary() {
        let files = BTreeMap::from([
            ("user.js".to_string(), SQL.to_string()),
            ("copy.c".to_string(), "void f(char *s) { char b[8]; strcpy(b, s); }\n".to_string()),
        ]);
        let mut report = disabled().audit_many(&files).await;
        let before = report.summary.total_findings;
        assert!(!report.results["copy.c"].custom_findings.is_empty());

        report.retain_at_least(Severity::Critical);
        assert_eq!(report.summary.total_findings, before);
        assert!(report
            .results
            .values()
            .flat_map(|r| r.findings())
            .all(|f| f.severity == Severity::Critical));
        assert!(report.results["copy.c"].custom_findings.is_empty());
        assert!(report.remaining_findings() > 0);
    }

    #[tokio::test]
    async fn runs_as_static_module() {
        let source = SourceText::new("user.js", SQL, "javascript");
        let output = disabled()
            .run(&Subject::Source(source), &ScanOptions::default(), Instant::now())
            .await
            .unwrap();
        assert_eq!(output.files_scanned, 1);
        assert!(!output.vulnerabilities.is_empty());
    }
}
