use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::exploits::Severity;

/// Top-level configuration from `.scanforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub audit: AuditModelConfig,
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP service binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3003".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded artifacts.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Maximum size of a single upload, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum number of files per upload request.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Hosts (and their subdomains) that may be probed live.
    /// Loopback addresses are always allowed.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

fn default_allowed_domains() -> Vec<String> {
    [
        "localhost",
        "127.0.0.1",
        "0.0.0.0",
        "dvwa-test-app",
        "vulnerable-test-app",
        "webgoat",
        "testphp.vulnweb.com",
        "demo.testfire.net",
    ]
    .iter()
    .map(|d| d.to_string())
    .collect()
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            allowed_domains: default_allowed_domains(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Module deadline when the request carries no `timeout`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound applied to any requested `timeout`.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// User-Agent sent by live probes.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Largest `ports` list a network scan accepts.
    #[serde(default = "default_max_ports")]
    pub max_ports: usize,
    /// TCP connects a network scan keeps in flight.
    #[serde(default = "default_port_concurrency")]
    pub port_concurrency: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_timeout_ms() -> u64 {
    120_000
}

fn default_max_ports() -> usize {
    1024
}

fn default_port_concurrency() -> usize {
    64
}

fn default_user_agent() -> String {
    format!("scanforge/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            user_agent: default_user_agent(),
            max_ports: default_max_ports(),
            port_concurrency: default_port_concurrency(),
        }
    }
}

/// Chat model used by the code auditor for its free-text section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditModelConfig {
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    /// Environment variable holding the bearer token. No token, no model.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_model_endpoint() -> String {
    "https://models.inference.ai.azure.com/chat/completions".into()
}

fn default_model_name() -> String {
    "gpt-4o".into()
}

fn default_token_env() -> String {
    "GITHUB_MODELS_TOKEN".into()
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_model_timeout() -> u64 {
    60
}

impl Default for AuditModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            model: default_model_name(),
            token_env: default_token_env(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout(),
        }
    }
}

/// Pass/fail threshold for the `scan` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Minimum severity that makes `scan` exit non-zero.
    #[serde(default = "default_fail_on")]
    pub fail_on: Severity,
}

fn default_fail_on() -> Severity {
    Severity::High
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            fail_on: default_fail_on(),
        }
    }
}

impl Policy {
    /// True when no finding reaches the threshold.
    pub fn passes(&self, severities: impl IntoIterator<Item = Severity>) -> bool {
        !severities.into_iter().any(|sev| sev >= self.fail_on)
    }
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scan.max_timeout_ms == 0 {
            return Err(ScanError::Config("scan.max_timeout_ms must be positive".into()));
        }
        if self.scan.default_timeout_ms > self.scan.max_timeout_ms {
            return Err(ScanError::Config(
                "scan.default_timeout_ms exceeds scan.max_timeout_ms".into(),
            ));
        }
        if self.scan.port_concurrency == 0 {
            return Err(ScanError::Config("scan.port_concurrency must be positive".into()));
        }
        Ok(())
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# scanforge configuration

[server]
bind = "127.0.0.1:3003"

[storage]
upload_dir = "uploads"
# max_file_size = 10485760
# max_files = 10

[authorization]
# Hosts that may be probed live. Subdomains are included; loopback is always allowed.
allowed_domains = ["localhost", "127.0.0.1", "testphp.vulnweb.com", "demo.testfire.net"]

[scan]
default_timeout_ms = 30000
max_timeout_ms = 120000
max_ports = 1024
port_concurrency = 64

[audit]
# The code auditor asks this model for a free-text review when the token variable is set.
# endpoint = "https://models.inference.ai.azure.com/chat/completions"
# model = "gpt-4o"
token_env = "GITHUB_MODELS_TOKEN"

[policy]
# Minimum severity that makes `scanforge scan` fail (info, low, medium, high, critical).
fail_on = "high"
"#
    }
}
