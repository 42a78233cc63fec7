pub mod finding;
pub mod live;
pub mod registry;
pub mod static_rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use url::Url;

use crate::error::ModuleError;

pub use finding::{Severity, SeverityCounts, Vulnerability};
pub use registry::{ExploitDescriptor, ExploitKind, ExploitRegistry, RegisteredExploit};

/// How a module reaches its subject: probing a live target or reading source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Live,
    Static,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// Source text handed to static modules.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub file_name: String,
    pub content: String,
    pub language: String,
}

impl SourceText {
    pub fn new(
        file_name: impl Into<String>,
        content: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            language: language.into(),
        }
    }
}

/// What a module runs against.
#[derive(Debug, Clone)]
pub enum Subject {
    Target(Url),
    Source(SourceText),
}

impl Subject {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Target(_) => ExecutionMode::Live,
            Self::Source(_) => ExecutionMode::Static,
        }
    }

    /// Display form used as the scan record's `target`.
    pub fn describe(&self) -> String {
        match self {
            Self::Target(url) => url.to_string(),
            Self::Source(src) => src.file_name.clone(),
        }
    }
}

/// Per-request scan options. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    /// Module deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub aggressive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Ports for the network scan; a built-in list when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// Successful result of one module run.
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    pub vulnerabilities: Vec<Vulnerability>,
    pub files_scanned: usize,
}

impl ModuleOutput {
    pub fn new(vulnerabilities: Vec<Vulnerability>, files_scanned: usize) -> Self {
        Self {
            vulnerabilities,
            files_scanned,
        }
    }
}

/// The execution contract shared by every exploit implementation.
///
/// A module must give up once `deadline` passes. The orchestrator enforces
/// this externally as well, so a module that overruns is cancelled and
/// recorded as timed out.
#[async_trait]
pub trait ExploitModule: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError>;
}

/// Cuts `s` to at most `max` characters, on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_accept_partial_camel_case() {
        let opts: ScanOptions =
            serde_json::from_str(r#"{"timeout": 500, "maxDepth": 2, "ports": [80, 443]}"#)
                .unwrap();
        assert_eq!(opts.timeout, Some(500));
        assert_eq!(opts.max_depth, Some(2));
        assert_eq!(opts.ports, Some(vec![80, 443]));
        assert!(!opts.aggressive);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn subject_mode() {
        let target = Subject::Target(Url::parse("http://localhost:3000").unwrap());
        assert_eq!(target.mode(), ExecutionMode::Live);
        let source = Subject::Source(SourceText::new("a.js", "", "javascript"));
        assert_eq!(source.mode(), ExecutionMode::Static);
        assert_eq!(source.describe(), "a.js");
    }
}
