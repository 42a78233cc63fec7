//! scanforge: a security scanning service.
//!
//! Pluggable exploit modules run either live against an authorized network
//! target or statically over uploaded source files. Results, files and the
//! audit trail live in explicit stores shared by the HTTP service and the CLI.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use scanforge::{scan, LocalScan};
//!
//! # async fn run() -> scanforge::error::Result<()> {
//! let report = scan(Path::new("./src"), &LocalScan::default()).await?;
//! println!("Pass: {}, Scans: {}", report.pass, report.scans.len());
//! # Ok(())
//! # }
//! ```

pub mod authorizer;
pub mod config;
pub mod error;
pub mod exploits;
pub mod files;
pub mod orchestrator;
pub mod output;
pub mod redteam;
pub mod server;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use authorizer::TargetAuthorizer;
use config::Config;
use error::{Result, ScanError};
use exploits::{ExecutionMode, ExploitKind, ExploitRegistry, ScanOptions, Severity};
use files::FileRegistry;
use orchestrator::ScanOrchestrator;
use output::OutputFormat;
use store::{AuditLog, Requester, ResultStore, SecurityScan};

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = ".scanforge.toml";

/// Options for a local, static scan.
#[derive(Debug, Clone, Default)]
pub struct LocalScan {
    /// Path to config file (defaults to `.scanforge.toml`).
    pub config_path: Option<PathBuf>,
    /// Exploits to run; empty means every static rule exploit.
    pub exploits: Vec<String>,
    /// CLI override for the fail_on threshold.
    pub fail_on_override: Option<Severity>,
}

/// Outcome of a local scan.
#[derive(Debug)]
pub struct LocalReport {
    pub target_name: String,
    pub scans: Vec<SecurityScan>,
    pub fail_on: Severity,
    pub pass: bool,
}

/// Run the static exploits over a file or directory tree.
pub async fn scan(path: &Path, options: &LocalScan) -> Result<LocalReport> {
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let mut config = Config::load(&config_path)?;
    if let Some(fail_on) = options.fail_on_override {
        config.policy.fail_on = fail_on;
    }

    let registry = Arc::new(ExploitRegistry::builtin(&config));
    let exploits: Vec<String> = if options.exploits.is_empty() {
        registry
            .list()
            .into_iter()
            .filter(|d| d.modes.contains(&ExecutionMode::Static))
            // code-audit reruns every static rule
            .filter(|d| d.name != ExploitKind::CodeAudit.name())
            .map(|d| d.name)
            .collect()
    } else {
        for name in &options.exploits {
            registry.resolve(name)?;
        }
        options.exploits.clone()
    };

    let audit = Arc::new(AuditLog::new());
    let files = Arc::new(FileRegistry::new(&config.storage, audit.clone()));
    let mut ids = Vec::new();
    for file in local_files(path)? {
        ids.push(files.index_local(&file)?.file_id);
    }
    if ids.is_empty() {
        return Err(ScanError::Validation(format!(
            "No scannable files under {}",
            path.display()
        )));
    }

    let orchestrator = ScanOrchestrator::new(
        registry,
        Arc::new(TargetAuthorizer::new(
            config.authorization.allowed_domains.clone(),
            audit.clone(),
        )),
        files,
        Arc::new(ResultStore::new(audit.clone())),
        audit,
        config.scan.clone(),
    );
    let batch = orchestrator
        .run_file_scan(
            &exploits,
            Some(ids.as_slice()),
            ScanOptions::default(),
            &Requester::cli(),
        )
        .await?;

    let pass = config.policy.passes(
        batch
            .results
            .iter()
            .flat_map(|s| s.vulnerabilities.iter().map(|v| v.severity)),
    );

    Ok(LocalReport {
        target_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        scans: batch.results,
        fail_on: config.policy.fail_on,
        pass,
    })
}

/// Files under `path` with an admissible extension, in name order.
/// Hidden entries and anything matched by `.gitignore` are skipped.
fn local_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(ScanError::not_found("Path", path.display().to_string()));
    }

    let walker = ignore::WalkBuilder::new(path)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let files = walker
        .flatten()
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .filter(|e| e.file_name().to_str().is_some_and(files::is_allowed))
        .map(|e| e.into_path())
        .collect();
    Ok(files)
}

/// Render a local report in the specified format.
pub fn render_report(report: &LocalReport, format: OutputFormat) -> Result<String> {
    output::render(&report.scans, format, report.fail_on)
}
