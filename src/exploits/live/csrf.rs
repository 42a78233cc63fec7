use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ORIGIN, SET_COOKIE};
use reqwest::Client;
use tokio::time::Instant;

use super::{target_of, Probe, ProbeResponse};
use crate::error::ModuleError;
use crate::exploits::{
    truncate, ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity,
    Subject, Vulnerability,
};

const CSRF: &str = "Cross-Site Request Forgery (CSRF)";
const COOKIE: &str = "Insecure cookie configuration";
const FOREIGN_ORIGIN: &str = "http://malicious-site.com";

static POST_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<form[^>]*method\s*=\s*["']?post["']?[^>]*>"#).unwrap());

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)csrf|xsrf|_token").unwrap());

/// Cross-origin POST acceptance, token-less forms and session cookie flags.
pub struct CsrfProbe {
    client: Client,
}

impl CsrfProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for CsrfProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::Csrf)?;
        let probe = Probe::new(&self.client, options, deadline);
        let page = probe.baseline(target).await?;
        let mut findings = Vec::new();

        if let Some(form) = POST_FORM.find(&page.body) {
            if !TOKEN.is_match(&page.body) {
                findings.push(
                    Vulnerability::new(
                        CSRF,
                        Severity::Medium,
                        target.as_str(),
                        "POST form served without an anti-CSRF token",
                    )
                    .with_evidence(truncate(form.as_str(), 200))
                    .with_recommendation("Embed a per-session token in every state-changing form.")
                    .with_cwe("CWE-352"),
                );
            }
        }

        let forged = probe
            .client()
            .post(target.clone())
            .header(ORIGIN, FOREIGN_ORIGIN)
            .form(&[("username", "testuser"), ("password", "testpass"), ("action", "login")]);
        if let Some(response) = probe.attempt(forged).await? {
            let lower = response.body.to_lowercase();
            if response.status.is_success() && !lower.contains("csrf") && !lower.contains("token") {
                findings.push(
                    Vulnerability::new(
                        CSRF,
                        Severity::High,
                        target.as_str(),
                        "Cross-origin POST accepted without a token",
                    )
                    .with_payload(format!("POST with Origin: {FOREIGN_ORIGIN}"))
                    .with_evidence(format!("HTTP {}", response.status.as_u16()))
                    .with_recommendation(
                        "Reject state-changing requests lacking a valid token or a trusted Origin.",
                    )
                    .with_cwe("CWE-352"),
                );
            }
        }

        findings.extend(cookie_findings(target.as_str(), &page));
        Ok(ModuleOutput::new(findings, 0))
    }
}

fn cookie_findings(location: &str, response: &ProbeResponse) -> Vec<Vulnerability> {
    response
        .headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            let lower = cookie.to_lowercase();
            let missing: Vec<&str> = [
                ("httponly", "HttpOnly"),
                ("secure", "Secure"),
                ("samesite", "SameSite"),
            ]
            .into_iter()
            .filter(|(needle, _)| !lower.contains(*needle))
            .map(|(_, flag)| flag)
            .collect();
            if missing.is_empty() {
                return None;
            }
            let name = cookie.split('=').next().unwrap_or(cookie).trim();
            Some(
                Vulnerability::new(
                    COOKIE,
                    Severity::Medium,
                    location,
                    format!("Cookie `{name}` set without {}", missing.join(", ")),
                )
                .with_evidence(truncate(cookie, 200))
                .with_recommendation("Set HttpOnly, Secure and SameSite on session cookies.")
                .with_cwe("CWE-614"),
            )
        })
        .collect()
}
