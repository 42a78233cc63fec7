use async_trait::async_trait;
use reqwest::header::ORIGIN;
use reqwest::Client;
use tokio::time::Instant;

use super::{target_of, Probe, ProbeResponse};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Insecure CORS configuration";
const FIX: &str = "Allow only an explicit list of trusted origins and never pair credentials with a wildcard.";

const ORIGINS: &[&str] = &[
    "http://evil.com",
    "https://malicious-site.com",
    "null",
    "http://localhost:3000",
];

/// Origin reflection and wildcard checks on the target's CORS headers.
pub struct CorsProbe {
    client: Client,
}

impl CorsProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for CorsProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::InsecureCors)?;
        let probe = Probe::new(&self.client, options, deadline);
        probe.baseline(target).await?;

        let mut findings: Vec<Vulnerability> = Vec::new();
        for origin in ORIGINS {
            probe.ensure_time()?;
            let request = probe.client().get(target.clone()).header(ORIGIN, *origin);
            let Some(response) = probe.attempt(request).await? else {
                continue;
            };
            if let Some(finding) = assess(target.as_str(), origin, &response) {
                if !findings.iter().any(|f| f.description == finding.description) {
                    findings.push(finding);
                }
            }
        }

        Ok(ModuleOutput::new(findings, 0))
    }
}

fn assess(location: &str, origin: &str, response: &ProbeResponse) -> Option<Vulnerability> {
    let allowed = response.header("access-control-allow-origin")?.trim();
    let credentials = response
        .header("access-control-allow-credentials")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    // Reflecting a trusted development origin is not by itself exploitable.
    let hostile = origin != "http://localhost:3000";

    let (severity, description) = match (allowed, credentials) {
        ("*", true) => (
            Severity::Critical,
            "Wildcard origin allowed together with credentials",
        ),
        ("*", false) => (Severity::Medium, "Any origin may read responses"),
        (reflected, true) if hostile && reflected == origin => (
            Severity::Critical,
            "Arbitrary origin reflected with credentials allowed",
        ),
        (reflected, false) if hostile && reflected == origin => {
            (Severity::High, "Arbitrary origin reflected in Access-Control-Allow-Origin")
        }
        _ => return None,
    };

    let mut evidence = format!("Access-Control-Allow-Origin: {allowed}");
    if credentials {
        evidence.push_str("; Access-Control-Allow-Credentials: true");
    }
    Some(
        Vulnerability::new(KIND, severity, location, description)
            .with_payload(format!("Origin: {origin}"))
            .with_evidence(evidence)
            .with_recommendation(FIX)
            .with_cwe("CWE-942"),
    )
}
