use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

use super::{excerpt, target_of, with_param, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Cross-Site Scripting (XSS)";
const PARAM: &str = "q";
const FIX: &str = "HTML-encode reflected input for its context and add a Content-Security-Policy.";

const PAYLOADS: &[&str] = &[
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert('XSS')>",
    "<svg onload=alert('XSS')>",
    "javascript:alert('XSS')",
    "<iframe src=javascript:alert('XSS')>",
    "'\"><script>alert('XSS')</script>",
];

/// Reflected payloads on the `q` parameter.
pub struct XssProbe {
    client: Client,
}

impl XssProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for XssProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::Xss)?;
        let probe = Probe::new(&self.client, options, deadline);
        let baseline = probe.baseline(target).await?;

        let mut findings = Vec::new();
        let (mut raw_seen, mut stripped_seen) = (false, false);

        for payload in PAYLOADS {
            if raw_seen && stripped_seen {
                break;
            }
            probe.ensure_time()?;
            let url = with_param(target, PARAM, payload);
            let Some(response) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };
            if baseline.body.contains(payload) {
                continue;
            }

            let stripped = payload.replace(['<', '>'], "");
            if !raw_seen && response.body.contains(payload) {
                raw_seen = true;
                findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::High,
                        url.as_str(),
                        "Payload reflected unencoded in the response",
                    )
                    .with_payload(*payload)
                    .with_evidence(excerpt(&response.body, payload))
                    .with_recommendation(FIX)
                    .with_cwe("CWE-79"),
                );
            } else if !stripped_seen
                && !response.body.contains(payload)
                && response.body.contains(&stripped)
            {
                stripped_seen = true;
                findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::Medium,
                        url.as_str(),
                        "Payload reflected with angle brackets stripped; attribute contexts may still execute",
                    )
                    .with_payload(*payload)
                    .with_evidence(excerpt(&response.body, &stripped))
                    .with_recommendation(FIX)
                    .with_cwe("CWE-79"),
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
    use axum::{extract::Query, response::Html, routing::get, Router};
    use std::collections::HashMap;

    async fn search(Query(q): Query<HashMap<String, String>>) -> Html<String> {
        Html(format!(
            "<p>Results for {}</p>",
            q.get("q").cloned().unwrap_or_default()
        ))
    }

    async fn escaped(Query(q): Query<HashMap<String, String>>) -> Html<String> {
        let term = q
            .get("q")
            .cloned()
            .unwrap_or_default()
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('\'', "&#39;")
            .replace('"', "&quot;");
        Html(format!("<p>Results for {term}</p>"))
    }

    #[tokio::test]
    async fn detects_reflection() {
        let url = fixture::serve(Router::new().route("/", get(search))).await;
        let output = XssProbe::new(fixture::client())
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        assert_eq!(output.vulnerabilities.len(), 1);
        assert_eq!(output.vulnerabilities[0].severity, Severity::High);
        assert!(output.vulnerabilities[0].kind.contains("XSS"));
    }

    #[tokio::test]
    async fn encoded_output_passes() {
        let url = fixture::serve(Router::new().route("/", get(escaped))).await;
        let output = XssProbe::new(fixture::client())
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        assert!(output.vulnerabilities.is_empty());
    }

    #[tokio::test]
    async fn stalled_payloads_time_out() {
        let url = fixture::stalls_on_query().await;
        let deadline = Instant::now() + std::time::Duration::from_millis(400);
        let err = XssProbe::new(fixture::client())
            .run(&Subject::Target(url), &ScanOptions::default(), deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Timeout(_)));
    }
}
