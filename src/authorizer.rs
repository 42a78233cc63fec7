//! Target admission: syntax validation and the domain allowlist.

use std::net::IpAddr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use url::{Host, Url};

use crate::error::{Result, ScanError};
use crate::store::{AuditEntry, AuditLevel, AuditLog, Requester};

const SOURCE: &str = "authorizer";

/// Dotted domain name ending in an alphabetic TLD.
static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

/// A target that passed validation and the allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTarget {
    pub url: Url,
    pub host: String,
}

pub struct TargetAuthorizer {
    allowed_domains: Vec<String>,
    audit: Arc<AuditLog>,
}

impl TargetAuthorizer {
    pub fn new(allowed_domains: Vec<String>, audit: Arc<AuditLog>) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            allowed_domains,
            audit,
        }
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Validates `target` and checks its host against the allowlist. Every
    /// decision is recorded in the audit log.
    pub fn authorize(&self, target: &str, requester: &Requester) -> Result<AuthorizedTarget> {
        let url = match parse_target(target) {
            Ok(url) => url,
            Err(e) => {
                self.audit.record(
                    AuditEntry::new("TARGET_INVALID", AuditLevel::Warning, SOURCE)
                        .with_requester(requester)
                        .with_details(json!({ "target": target, "error": e.to_string() })),
                );
                return Err(e);
            }
        };
        let host = host_of(&url);

        if is_loopback(&url) || self.is_allowed(&host) {
            self.audit.record(
                AuditEntry::new("TARGET_AUTHORIZED", AuditLevel::Info, SOURCE)
                    .with_requester(requester)
                    .with_details(json!({ "target": url.as_str(), "host": host })),
            );
            return Ok(AuthorizedTarget { url, host });
        }

        self.audit.record(
            AuditEntry::new("TARGET_REJECTED", AuditLevel::Warning, SOURCE)
                .with_requester(requester)
                .with_details(json!({ "target": target, "host": host })),
        );
        Err(ScanError::Authorization {
            host,
            allowed_domains: self.allowed_domains.clone(),
        })
    }

    /// Exact match or a subdomain of an allowlisted entry.
    fn is_allowed(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Parses a URL, or a bare `host[:port][/path]` which is assumed to be http.
pub fn parse_target(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScanError::Validation("Target is required".into()));
    }
    let invalid = || ScanError::Validation(format!("Invalid target URL: {raw}"));

    let url = if raw.contains("://") {
        Url::parse(raw).map_err(|_| invalid())?
    } else {
        let authority = raw.split(['/', '?', '#']).next().unwrap_or_default();
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                port.parse::<u16>().map_err(|_| invalid())?;
                host
            }
            _ => authority,
        };
        if !is_bare_host(host) {
            return Err(invalid());
        }
        Url::parse(&format!("http://{raw}")).map_err(|_| invalid())?
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScanError::Validation(format!(
            "Unsupported scheme `{}`: only http and https targets are scanned",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(h) if !h.is_empty() => Ok(url),
        _ => Err(invalid()),
    }
}

fn is_bare_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost") || host.parse::<IpAddr>().is_ok() || DOMAIN.is_match(host)
}

fn host_of(url: &Url) -> String {
    match url.host() {
        Some(Host::Ipv6(ip)) => ip.to_string(),
        Some(host) => host.to_string().trim_end_matches('.').to_ascii_lowercase(),
        None => String::new(),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(d)) => {
            let d = d.trim_end_matches('.').to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
