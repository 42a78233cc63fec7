use async_trait::async_trait;
use reqwest::header::{HeaderMap, STRICT_TRANSPORT_SECURITY};
use reqwest::Client;
use tokio::time::Instant;
use url::Url;

use super::{target_of, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "TLS/SSL misconfiguration";
/// 180 days.
const MIN_HSTS_MAX_AGE: u64 = 15_552_000;

/// Transport security checks: HTTPS availability, certificate validity and HSTS.
pub struct TlsAnalyzer {
    client: Client,
    validating: Client,
}

impl TlsAnalyzer {
    /// `client` tolerates bad certificates; a second, validating client is built here.
    pub fn new(client: Client, user_agent: &str) -> Self {
        let validating = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default validating client");
                Client::new()
            });
        Self { client, validating }
    }
}

#[async_trait]
impl ExploitModule for TlsAnalyzer {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::SslAnalysis)?;
        let probe = Probe::new(&self.client, options, deadline);
        let page = probe.baseline(target).await?;
        let mut findings = Vec::new();

        if target.scheme() == "https" {
            let strict = Probe::new(&self.validating, options, deadline);
            match strict.get(target).await {
                Ok(_) => {}
                Err(e @ ModuleError::Timeout(_)) => return Err(e),
                Err(e) => findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::High,
                        target.as_str(),
                        "Certificate failed validation",
                    )
                    .with_evidence(e.to_string())
                    .with_recommendation(
                        "Serve a certificate from a trusted CA that matches the host name and has not expired.",
                    )
                    .with_cwe("CWE-295"),
                ),
            }
            findings.extend(hsts_findings(target.as_str(), &page.headers));
            return Ok(ModuleOutput::new(findings, 0));
        }

        let upgrades = page.status.is_redirection()
            && page
                .header("location")
                .is_some_and(|l| l.starts_with("https://"));
        if upgrades {
            return Ok(ModuleOutput::new(findings, 0));
        }

        let https = target
            .host_str()
            .and_then(|host| Url::parse(&format!("https://{host}/")).ok());
        let reachable = match https {
            Some(url) => probe.attempt(probe.client().get(url)).await?.is_some(),
            None => false,
        };
        let (severity, description) = if reachable {
            (Severity::Medium, "Plain HTTP is served without redirecting to HTTPS")
        } else {
            (Severity::High, "Site is not available over HTTPS")
        };
        findings.push(
            Vulnerability::new(KIND, severity, target.as_str(), description)
                .with_evidence(format!("HTTP {} over {}", page.status.as_u16(), target.scheme()))
                .with_recommendation("Serve all traffic over HTTPS and redirect plain HTTP requests.")
                .with_cwe("CWE-319"),
        );
        Ok(ModuleOutput::new(findings, 0))
    }
}

fn hsts_findings(location: &str, headers: &HeaderMap) -> Vec<Vulnerability> {
    let Some(value) = headers
        .get(STRICT_TRANSPORT_SECURITY)
        .and_then(|v| v.to_str().ok())
    else {
        return vec![Vulnerability::new(
            KIND,
            Severity::Medium,
            location,
            "Strict-Transport-Security header missing",
        )
        .with_recommendation("Send Strict-Transport-Security with a max-age of at least 180 days.")
        .with_cwe("CWE-523")];
    };

    let max_age = value
        .split(';')
        .filter_map(|d| d.trim().strip_prefix("max-age="))
        .find_map(|v| v.trim_matches('"').parse::<u64>().ok())
        .unwrap_or(0);
    if max_age >= MIN_HSTS_MAX_AGE {
        return Vec::new();
    }
    vec![Vulnerability::new(
        KIND,
        Severity::Low,
        location,
        format!("HSTS max-age of {max_age} seconds is too short"),
    )
    .with_evidence(format!("Strict-Transport-Security: {value}"))
    .with_recommendation("Raise max-age to at least 15552000 seconds.")
    .with_cwe("CWE-523")]
}
