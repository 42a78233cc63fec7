use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

use super::{target_of, with_param, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Open redirect";
const PARAM: &str = "redirect";

const PAYLOADS: &[&str] = &[
    "http://evil.com",
    "https://malicious-site.com",
    "//evil.com",
    "javascript:alert('XSS')",
    "data:text/html,<script>alert('XSS')</script>",
];

const FOREIGN_HOSTS: &[&str] = &["evil.com", "malicious-site.com"];

/// Attacker-controlled destinations on the `redirect` parameter.
pub struct OpenRedirectProbe {
    client: Client,
}

impl OpenRedirectProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for OpenRedirectProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::OpenRedirect)?;
        let probe = Probe::new(&self.client, options, deadline);
        probe.baseline(target).await?;

        for payload in PAYLOADS {
            probe.ensure_time()?;
            let url = with_param(target, PARAM, payload);
            let Some(response) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };
            if !response.status.is_redirection() {
                continue;
            }
            let Some(location) = response.header("location") else {
                continue;
            };
            if location == *payload || FOREIGN_HOSTS.iter().any(|h| location.contains(h)) {
                let finding = Vulnerability::new(
                    KIND,
                    Severity::Medium,
                    url.as_str(),
                    "Redirect destination taken from request input",
                )
                .with_payload(*payload)
                .with_evidence(format!(
                    "HTTP {} Location: {location}",
                    response.status.as_u16()
                ))
                .with_recommendation("Redirect only to relative paths or an allowlist of hosts.")
                .with_cwe("CWE-601");
                return Ok(ModuleOutput::new(vec![finding], 0));
            }
        }

        Ok(ModuleOutput::new(Vec::new(), 0))
    }
}
