use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{live, static_rules, ExecutionMode, ExploitModule, Severity};
use crate::config::Config;
use crate::error::{ModuleError, Result, ScanError};
use crate::redteam::CodeAuditor;

/// Every exploit type the service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExploitKind {
    SqlInjection,
    Xss,
    Csrf,
    Ssrf,
    PathTraversal,
    CommandInjection,
    HardcodedSecrets,
    InsecureCors,
    JwtAlgorithm,
    FileUpload,
    OpenRedirect,
    NetworkScan,
    SslAnalysis,
    SecurityHeaders,
    AuthBypass,
    BufferOverflow,
    CodeAudit,
}

impl ExploitKind {
    pub const ALL: [ExploitKind; 17] = [
        Self::SqlInjection,
        Self::Xss,
        Self::Csrf,
        Self::Ssrf,
        Self::PathTraversal,
        Self::CommandInjection,
        Self::HardcodedSecrets,
        Self::InsecureCors,
        Self::JwtAlgorithm,
        Self::FileUpload,
        Self::OpenRedirect,
        Self::NetworkScan,
        Self::SslAnalysis,
        Self::SecurityHeaders,
        Self::AuthBypass,
        Self::BufferOverflow,
        Self::CodeAudit,
    ];

    /// Exact, case-sensitive lookup by kebab-case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SqlInjection => "sql-injection",
            Self::Xss => "xss",
            Self::Csrf => "csrf",
            Self::Ssrf => "ssrf",
            Self::PathTraversal => "path-traversal",
            Self::CommandInjection => "command-injection",
            Self::HardcodedSecrets => "hardcoded-secrets",
            Self::InsecureCors => "insecure-cors",
            Self::JwtAlgorithm => "jwt-algorithm",
            Self::FileUpload => "file-upload",
            Self::OpenRedirect => "open-redirect",
            Self::NetworkScan => "network-scan",
            Self::SslAnalysis => "ssl-analysis",
            Self::SecurityHeaders => "web-vuln-scan",
            Self::AuthBypass => "auth-bypass",
            Self::BufferOverflow => "buffer-overflow",
            Self::CodeAudit => "code-audit",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::SqlInjection => "SQL Injection",
            Self::Xss => "Cross-Site Scripting",
            Self::Csrf => "Cross-Site Request Forgery",
            Self::Ssrf => "Server-Side Request Forgery",
            Self::PathTraversal => "Path Traversal",
            Self::CommandInjection => "Command Injection",
            Self::HardcodedSecrets => "Hardcoded Secrets",
            Self::InsecureCors => "Insecure CORS",
            Self::JwtAlgorithm => "JWT Algorithm Confusion",
            Self::FileUpload => "Unsafe File Upload",
            Self::OpenRedirect => "Open Redirect",
            Self::NetworkScan => "Network Port Scan",
            Self::SslAnalysis => "TLS/SSL Analysis",
            Self::SecurityHeaders => "Web Security Headers",
            Self::AuthBypass => "Authentication Bypass",
            Self::BufferOverflow => "Buffer Overflow",
            Self::CodeAudit => "Static Code Audit",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::SqlInjection => {
                "Error-, time- and union-based SQL injection probes; concatenated queries in source"
            }
            Self::Xss => "Reflected payload probes; unescaped DOM sinks in source",
            Self::Csrf => {
                "State-changing requests accepted cross-origin, forms without tokens, weak session cookies"
            }
            Self::Ssrf => "Internal and metadata URLs fetched on behalf of the caller",
            Self::PathTraversal => "Dot-dot sequences reaching files outside the web root",
            Self::CommandInjection => "Shell metacharacters reaching OS commands; eval of input",
            Self::HardcodedSecrets => "API keys, passwords and high-entropy literals in code",
            Self::InsecureCors => "Wildcard or reflected origins, credentials with wildcard",
            Self::JwtAlgorithm => "`none` algorithm, empty secrets, decode without verify",
            Self::FileUpload => "Executable uploads, traversal in filenames, unrestricted storage",
            Self::OpenRedirect => "Redirect targets taken from request input",
            Self::NetworkScan => "TCP connect scan of common service ports",
            Self::SslAnalysis => "HTTPS availability, certificate validity, HSTS, HTTP to HTTPS redirect",
            Self::SecurityHeaders => "Missing or weak browser security headers and version disclosure",
            Self::AuthBypass => {
                "Protected paths reachable through rewrites or spoofed headers; hard-wired auth flags in source"
            }
            Self::BufferOverflow => "Unbounded copies and formatted writes in C and C++ sources",
            Self::CodeAudit => "Every static rule plus an optional model-assisted review",
        }
    }

    pub fn category(self) -> &'static str {
        match self {
            Self::SqlInjection | Self::CommandInjection => "injection",
            Self::Xss => "client-side",
            Self::Csrf | Self::Ssrf | Self::OpenRedirect => "request-forgery",
            Self::PathTraversal | Self::FileUpload => "file-handling",
            Self::HardcodedSecrets => "sensitive-data",
            Self::InsecureCors | Self::SecurityHeaders => "configuration",
            Self::JwtAlgorithm | Self::AuthBypass => "authentication",
            Self::BufferOverflow => "memory-safety",
            Self::NetworkScan | Self::SslAnalysis => "network",
            Self::CodeAudit => "code-analysis",
        }
    }

    /// Typical severity of a confirmed finding of this kind.
    pub fn severity(self) -> Severity {
        match self {
            Self::SqlInjection | Self::CommandInjection | Self::AuthBypass => Severity::Critical,
            Self::Xss
            | Self::BufferOverflow
            | Self::Ssrf
            | Self::PathTraversal
            | Self::HardcodedSecrets
            | Self::JwtAlgorithm
            | Self::FileUpload
            | Self::CodeAudit => Severity::High,
            Self::Csrf
            | Self::InsecureCors
            | Self::OpenRedirect
            | Self::SslAnalysis
            | Self::SecurityHeaders => {
                Severity::Medium
            }
            Self::NetworkScan => Severity::Low,
        }
    }
}

impl std::fmt::Display for ExploitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Catalog entry served by `GET /api/security/exploits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploitDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub severity: Severity,
    pub modes: Vec<ExecutionMode>,
}

/// A kind together with its live and static implementations.
#[derive(Clone, Default)]
pub struct RegisteredExploit {
    live: Option<Arc<dyn ExploitModule>>,
    static_: Option<Arc<dyn ExploitModule>>,
}

impl RegisteredExploit {
    pub fn module_for(
        &self,
        kind: ExploitKind,
        mode: ExecutionMode,
    ) -> std::result::Result<Arc<dyn ExploitModule>, ModuleError> {
        let found = match mode {
            ExecutionMode::Live => self.live.clone(),
            ExecutionMode::Static => self.static_.clone(),
        };
        found.ok_or_else(|| ModuleError::Unsupported {
            exploit: kind.name().to_string(),
            mode: mode.to_string(),
        })
    }

    pub fn modes(&self) -> Vec<ExecutionMode> {
        let mut modes = Vec::new();
        if self.live.is_some() {
            modes.push(ExecutionMode::Live);
        }
        if self.static_.is_some() {
            modes.push(ExecutionMode::Static);
        }
        modes
    }
}

/// Catalog of exploit modules, built once at startup.
#[derive(Clone, Default)]
pub struct ExploitRegistry {
    entries: BTreeMap<ExploitKind, RegisteredExploit>,
}

impl ExploitRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in module.
    pub fn builtin(config: &Config) -> Self {
        let mut registry = Self::empty();
        for (kind, module) in live::all(config) {
            registry = registry.register(kind, module);
        }
        for rule in static_rules::all() {
            let kind = rule.kind();
            registry = registry.register(kind, Arc::new(static_rules::StaticModule::new(rule)));
        }
        registry.register(
            ExploitKind::CodeAudit,
            Arc::new(CodeAuditor::from_config(&config.audit)),
        )
    }

    /// Adds `module` under `kind`, in the slot matching its mode.
    pub fn register(mut self, kind: ExploitKind, module: Arc<dyn ExploitModule>) -> Self {
        let entry = self.entries.entry(kind).or_default();
        match module.mode() {
            ExecutionMode::Live => entry.live = Some(module),
            ExecutionMode::Static => entry.static_ = Some(module),
        }
        self
    }

    pub fn resolve(&self, name: &str) -> Result<(ExploitKind, &RegisteredExploit)> {
        ExploitKind::from_name(name)
            .and_then(|kind| self.entries.get(&kind).map(|entry| (kind, entry)))
            .ok_or_else(|| ScanError::not_found("Exploit", name))
    }

    pub fn descriptor(&self, name: &str) -> Result<ExploitDescriptor> {
        let (kind, entry) = self.resolve(name)?;
        Ok(describe(kind, entry))
    }

    pub fn list(&self) -> Vec<ExploitDescriptor> {
        self.entries
            .iter()
            .map(|(kind, entry)| describe(*kind, entry))
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .entries
            .keys()
            .map(|k| k.category().to_string())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn describe(kind: ExploitKind, entry: &RegisteredExploit) -> ExploitDescriptor {
    ExploitDescriptor {
        name: kind.name().to_string(),
        display_name: kind.display_name().to_string(),
        description: kind.description().to_string(),
        category: kind.category().to_string(),
        severity: kind.severity(),
        modes: entry.modes(),
    }
}
