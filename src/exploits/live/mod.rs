mod auth_bypass;
mod command_injection;
mod cors;
mod csrf;
mod file_upload;
mod open_redirect;
mod path_traversal;
mod port_scan;
mod secrets;
mod security_headers;
mod sql_injection;
mod ssrf;
mod tls;
mod xss;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::time::Instant;
use url::Url;

use super::{truncate, ExecutionMode, ExploitKind, ExploitModule, ScanOptions, Subject};
use crate::config::Config;
use crate::error::ModuleError;

pub use auth_bypass::AuthBypassProbe;
pub use command_injection::CommandInjectionProbe;
pub use cors::CorsProbe;
pub use csrf::CsrfProbe;
pub use file_upload::FileUploadProbe;
pub use open_redirect::OpenRedirectProbe;
pub use path_traversal::PathTraversalProbe;
pub use port_scan::PortScanner;
pub use secrets::ResponseSecretsProbe;
pub use security_headers::SecurityHeadersProbe;
pub use sql_injection::SqlInjectionProbe;
pub use ssrf::SsrfProbe;
pub use tls::TlsAnalyzer;
pub use xss::XssProbe;

/// Returns every built-in live module, keyed by the kind it implements.
pub fn all(config: &Config) -> Vec<(ExploitKind, Arc<dyn ExploitModule>)> {
    let client = probe_client(&config.scan.user_agent);
    vec![
        entry(ExploitKind::SqlInjection, SqlInjectionProbe::new(client.clone())),
        entry(ExploitKind::Xss, XssProbe::new(client.clone())),
        entry(ExploitKind::Csrf, CsrfProbe::new(client.clone())),
        entry(ExploitKind::Ssrf, SsrfProbe::new(client.clone())),
        entry(ExploitKind::PathTraversal, PathTraversalProbe::new(client.clone())),
        entry(ExploitKind::CommandInjection, CommandInjectionProbe::new(client.clone())),
        entry(ExploitKind::HardcodedSecrets, ResponseSecretsProbe::new(client.clone())),
        entry(ExploitKind::InsecureCors, CorsProbe::new(client.clone())),
        entry(ExploitKind::FileUpload, FileUploadProbe::new(client.clone())),
        entry(ExploitKind::OpenRedirect, OpenRedirectProbe::new(client.clone())),
        entry(ExploitKind::SecurityHeaders, SecurityHeadersProbe::new(client.clone())),
        entry(ExploitKind::AuthBypass, AuthBypassProbe::new(client.clone())),
        entry(ExploitKind::NetworkScan, PortScanner::new(config.scan.port_concurrency)),
        entry(ExploitKind::SslAnalysis, TlsAnalyzer::new(client, &config.scan.user_agent)),
    ]
}

fn entry<M: ExploitModule + 'static>(kind: ExploitKind, module: M) -> (ExploitKind, Arc<dyn ExploitModule>) {
    (kind, Arc::new(module))
}

/// HTTP client for probing: no redirects followed, any certificate accepted.
pub fn probe_client(user_agent: &str) -> Client {
    Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default probe client");
            Client::new()
        })
}

/// A response read in full, with its round-trip time.
#[derive(Debug)]
pub(crate) struct ProbeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends requests bounded by the module deadline.
pub(crate) struct Probe<'a> {
    client: &'a Client,
    deadline: Instant,
    budget_ms: u64,
    user_agent: Option<&'a str>,
}

impl<'a> Probe<'a> {
    pub fn new(client: &'a Client, options: &'a ScanOptions, deadline: Instant) -> Self {
        let budget_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
        Self {
            client,
            deadline,
            budget_ms,
            user_agent: options.user_agent.as_deref(),
        }
    }

    pub fn client(&self) -> &Client {
        self.client
    }

    pub fn remaining(&self) -> Result<Duration, ModuleError> {
        let left = self.deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(ModuleError::Timeout(self.budget_ms))
        } else {
            Ok(left)
        }
    }

    pub async fn send(&self, request: RequestBuilder) -> Result<ProbeResponse, ModuleError> {
        let mut request = request.timeout(self.remaining()?);
        if let Some(ua) = self.user_agent {
            request = request.header(USER_AGENT, ua);
        }
        let started = Instant::now();
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ModuleError::MalformedResponse(e.to_string()))?;
        Ok(ProbeResponse {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }

    pub async fn get(&self, url: &Url) -> Result<ProbeResponse, ModuleError> {
        self.send(self.client.get(url.clone())).await
    }

    /// First request against the target. Failure means the target is unreachable.
    pub async fn baseline(&self, url: &Url) -> Result<ProbeResponse, ModuleError> {
        self.get(url).await.map_err(|e| match e {
            ModuleError::Timeout(_) => e,
            other => ModuleError::Unreachable(format!("{url}: {other}")),
        })
    }

    /// A request whose failure only makes that payload inconclusive.
    /// Running out of time is still an error.
    pub async fn attempt(&self, request: RequestBuilder) -> Result<Option<ProbeResponse>, ModuleError> {
        match self.send(request).await {
            Ok(response) => Ok(Some(response)),
            Err(e @ ModuleError::Timeout(_)) => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "probe request failed");
                Ok(None)
            }
        }
    }

    /// Fails with `Timeout` once the deadline has passed.
    pub fn ensure_time(&self) -> Result<(), ModuleError> {
        self.remaining().map(|_| ())
    }

    fn classify(&self, e: reqwest::Error) -> ModuleError {
        if e.is_timeout() {
            ModuleError::Timeout(self.budget_ms)
        } else if e.is_connect() {
            ModuleError::Unreachable(e.to_string())
        } else {
            ModuleError::Failed(e.to_string())
        }
    }
}

/// The URL a live module probes; source subjects are not supported.
pub(crate) fn target_of(subject: &Subject, kind: ExploitKind) -> Result<&Url, ModuleError> {
    match subject {
        Subject::Target(url) => Ok(url),
        Subject::Source(_) => Err(ModuleError::Unsupported {
            exploit: kind.name().to_string(),
            mode: ExecutionMode::Static.to_string(),
        }),
    }
}

/// `url` with `name=value` appended to its query.
pub(crate) fn with_param(url: &Url, name: &str, value: &str) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair(name, value);
    url
}

/// First match of any pattern in `body` that `baseline` does not already contain.
pub(crate) fn new_match<'b>(patterns: &[Regex], body: &'b str, baseline: &str) -> Option<&'b str> {
    patterns
        .iter()
        .filter(|re| !re.is_match(baseline))
        .find_map(|re| re.find(body))
        .map(|m| m.as_str())
}

/// Up to 200 characters of `body` around `needle`.
pub(crate) fn excerpt(body: &str, needle: &str) -> String {
    let start = body.find(needle).unwrap_or(0);
    let from = body[..start]
        .char_indices()
        .rev()
        .nth(40)
        .map(|(i, _)| i)
        .unwrap_or(0);
    truncate(body[from..].trim(), 200)
}

static SYSTEM_FILE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"root:x:0:0:").unwrap(),
        Regex::new(r"(?i)\[boot loader\]").unwrap(),
        Regex::new(r"(?i)for 16-bit app support").unwrap(),
        Regex::new(r"(?m)^\s*127\.0\.0\.1\s+localhost").unwrap(),
    ]
});

/// Signatures of OS files leaking into a response.
pub(crate) fn system_file_patterns() -> &'static [Regex] {
    &SYSTEM_FILE
}

#[cfg(test)]
pub(crate) mod fixture {
    use axum::Router;
    use url::Url;

    /// Serves `router` on an ephemeral loopback port.
    pub async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service()).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    /// Answers `/` at once but stalls for five seconds on any query string.
    pub async fn stalls_on_query() -> Url {
        use axum::extract::RawQuery;
        use axum::routing::get;

        let page = |RawQuery(query): RawQuery| async move {
            if query.is_some() {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            "<p>ok</p>"
        };
        serve(Router::new().route("/", get(page))).await
    }

    pub fn client() -> reqwest::Client {
        super::probe_client("scanforge-test")
    }

    pub fn deadline() -> tokio::time::Instant {
        tokio::time::Instant::now() + std::time::Duration::from_secs(10)
    }

    /// A loopback URL nobody listens on.
    pub async fn closed_url() -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("http://{addr}/")).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_param_appends_encoded_value() {
        let url = Url::parse("http://localhost:3000/search").unwrap();
        let probed = with_param(&url, "id", "' OR '1'='1");
        assert_eq!(probed.path(), "/search");
        let (k, v) = probed.query_pairs().next().unwrap();
        assert_eq!(k, "id");
        assert_eq!(v, "' OR '1'='1");
    }

    #[test]
    fn new_match_ignores_baseline_content() {
        let patterns = vec![Regex::new("root:x:0:0:").unwrap()];
        assert!(new_match(&patterns, "root:x:0:0:root", "root:x:0:0:root").is_none());
        assert_eq!(
            new_match(&patterns, "x root:x:0:0:root", "welcome"),
            Some("root:x:0:0:")
        );
    }

    #[tokio::test]
    async fn baseline_against_closed_port_is_unreachable() {
        let client = fixture::client();
        let options = ScanOptions::default();
        let probe = Probe::new(&client, &options, fixture::deadline());
        let err = probe.baseline(&fixture::closed_url().await).await.unwrap_err();
        assert!(matches!(err, ModuleError::Unreachable(_)));
    }

    #[tokio::test]
    async fn expired_deadline_times_out_before_sending() {
        let client = fixture::client();
        let options = ScanOptions::default();
        let probe = Probe::new(&client, &options, Instant::now());
        let err = probe
            .get(&Url::parse("http://127.0.0.1:9/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Timeout(_)));
    }
}
