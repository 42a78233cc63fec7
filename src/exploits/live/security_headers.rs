use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

use super::{target_of, Probe, ProbeResponse};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const MISSING: &str = "Missing security header";
const WEAK: &str = "Weak security header";
const DISCLOSURE: &str = "Server information disclosure";
const HSTS_FIX: &str = "Set Strict-Transport-Security: max-age=31536000; includeSubDomains.";

/// Browser-facing response headers of the target's landing page.
pub struct SecurityHeadersProbe {
    client: Client,
}

impl SecurityHeadersProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for SecurityHeadersProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::SecurityHeaders)?;
        let probe = Probe::new(&self.client, options, deadline);
        let page = probe.baseline(target).await?;

        if page.status.as_u16() == 404 || page.status.is_server_error() {
            tracing::debug!(target = %target, status = page.status.as_u16(), "skipping header checks");
            return Ok(ModuleOutput::default());
        }
        let https = target.scheme() == "https";
        Ok(ModuleOutput::new(assess(target.as_str(), https, &page), 0))
    }
}

fn assess(location: &str, https: bool, page: &ProbeResponse) -> Vec<Vulnerability> {
    let issue = |kind: &str, severity: Severity, description: &str, evidence: String| {
        Vulnerability::new(kind, severity, location, description).with_evidence(evidence)
    };
    let mut findings = Vec::new();

    match page.header("strict-transport-security") {
        Some(hsts) if hsts.replace(' ', "").contains("max-age=0") => findings.push(
            issue(WEAK, Severity::Medium, "HSTS max-age of zero disables the policy", format!("Strict-Transport-Security: {hsts}"))
                .with_recommendation(HSTS_FIX)
                .with_cwe("CWE-319"),
        ),
        None if https => findings.push(
            issue(MISSING, Severity::Medium, "Strict-Transport-Security is not set on an HTTPS site", "No Strict-Transport-Security header".into())
                .with_recommendation(HSTS_FIX)
                .with_cwe("CWE-319"),
        ),
        _ => {}
    }

    for header in ["server", "x-powered-by"] {
        if let Some(value) = page.header(header) {
            if value.chars().any(|c| c.is_ascii_digit()) {
                findings.push(
                    issue(DISCLOSURE, Severity::Low, "Response advertises software versions", format!("{header}: {value}"))
                        .with_recommendation("Strip version details from Server and X-Powered-By.")
                        .with_cwe("CWE-200"),
                );
            }
        }
    }

    if !is_html(page) {
        return findings;
    }

    let csp = page.header("content-security-policy");
    match csp {
        Some(policy) if policy.contains("'unsafe-inline'") || policy.contains("'unsafe-eval'") => findings.push(
            issue(WEAK, Severity::Medium, "Content-Security-Policy allows unsafe-inline or unsafe-eval", format!("Content-Security-Policy: {policy}"))
                .with_recommendation("Remove 'unsafe-inline' and 'unsafe-eval'; use nonces or hashes for inline scripts.")
                .with_cwe("CWE-693"),
        ),
        Some(_) => {}
        None => findings.push(
            issue(MISSING, Severity::Medium, "Content-Security-Policy is not set", "No Content-Security-Policy header".into())
                .with_recommendation("Define a Content-Security-Policy restricting script sources.")
                .with_cwe("CWE-693"),
        ),
    }

    let framing_guarded = page.header("x-frame-options").is_some()
        || csp.is_some_and(|p| p.contains("frame-ancestors"));
    if !framing_guarded {
        findings.push(
            issue(MISSING, Severity::Medium, "Page may be framed by other origins (clickjacking)", "Neither X-Frame-Options nor CSP frame-ancestors is set".into())
                .with_recommendation("Send X-Frame-Options: DENY or CSP frame-ancestors 'none'.")
                .with_cwe("CWE-1021"),
        );
    }

    let nosniff = page
        .header("x-content-type-options")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("nosniff"));
    if !nosniff {
        findings.push(
            issue(MISSING, Severity::Low, "X-Content-Type-Options: nosniff is not set", "Browsers may MIME-sniff responses".into())
                .with_recommendation("Send X-Content-Type-Options: nosniff.")
                .with_cwe("CWE-693"),
        );
    }

    if let Some(policy) = page.header("referrer-policy") {
        if policy.contains("unsafe-url") {
            findings.push(
                issue(WEAK, Severity::Low, "Referrer-Policy leaks full URLs to third parties", format!("Referrer-Policy: {policy}"))
                    .with_recommendation("Use strict-origin-when-cross-origin or stricter.")
                    .with_cwe("CWE-200"),
            );
        }
    }

    findings
}

/// Browser headers only matter for pages a browser renders.
fn is_html(page: &ProbeResponse) -> bool {
    match page.header("content-type") {
        Some(ct) => ct.to_ascii_lowercase().contains("text/html"),
        None => {
            let body = page.body.trim_start().to_ascii_lowercase();
            body.starts_with("<!doctype html") || body.starts_with("<html")
        }
    }
}
