//! Scan dispatch: single exploits, suites against one target and batch file scans.
//!
//! Every module runs in its own tokio task under a deadline. A timeout, an
//! error or a panic becomes a failed [`SecurityScan`] and never affects
//! sibling modules.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use url::Url;

use crate::authorizer::TargetAuthorizer;
use crate::config::ScanConfig;
use crate::error::{ModuleError, Result, ScanError};
use crate::exploits::{
    ExecutionMode, ExploitModule, ExploitRegistry, ModuleOutput, ScanOptions, SeverityCounts,
    SourceText, Subject,
};
use crate::files::{FileRegistry, ScanStatus};
use crate::store::{
    AuditEntry, AuditLevel, AuditLog, Requester, ResultStore, ScanMetadata, ScanType,
    SecurityScan,
};

const SOURCE: &str = "orchestrator";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub vulnerabilities: SeverityCounts,
}

impl SuiteSummary {
    fn of(results: &[SecurityScan]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for scan in results {
            if scan.success {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
            summary.vulnerabilities.merge(&scan.statistics);
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub suite_id: String,
    pub target: String,
    pub results: Vec<SecurityScan>,
    pub summary: SuiteSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub suite_id: String,
    pub results: Vec<SecurityScan>,
    pub total_files: usize,
    pub total_exploits: usize,
}

pub struct ScanOrchestrator {
    registry: Arc<ExploitRegistry>,
    authorizer: Arc<TargetAuthorizer>,
    files: Arc<FileRegistry>,
    results: Arc<ResultStore>,
    audit: Arc<AuditLog>,
    limits: ScanConfig,
}

impl ScanOrchestrator {
    pub fn new(
        registry: Arc<ExploitRegistry>,
        authorizer: Arc<TargetAuthorizer>,
        files: Arc<FileRegistry>,
        results: Arc<ResultStore>,
        audit: Arc<AuditLog>,
        limits: ScanConfig,
    ) -> Self {
        Self {
            registry,
            authorizer,
            files,
            results,
            audit,
            limits,
        }
    }

    pub fn registry(&self) -> &ExploitRegistry {
        &self.registry
    }

    /// One exploit against one network target.
    pub async fn run_single(
        &self,
        exploit_name: &str,
        target: &str,
        options: ScanOptions,
        requester: &Requester,
    ) -> Result<SecurityScan> {
        self.registry.resolve(exploit_name)?;
        let target = self.authorizer.authorize(target, requester)?;
        let options = self.normalize(options)?;

        let scan = self
            .scan_target(exploit_name, &target.url, &options, requester, ScanType::Url, None)
            .await;
        self.results.save(scan.clone())?;
        Ok(scan)
    }

    /// Several exploits against one target, run concurrently. Results keep
    /// the order of `exploit_names`.
    pub async fn run_suite(
        &self,
        exploit_names: &[String],
        target: &str,
        options: ScanOptions,
        requester: &Requester,
    ) -> Result<SuiteReport> {
        if exploit_names.is_empty() {
            return Err(ScanError::Validation(
                "At least one exploit must be selected".into(),
            ));
        }
        let target = self.authorizer.authorize(target, requester)?;
        let options = self.normalize(options)?;
        let suite_id = uuid::Uuid::new_v4().to_string();

        let results = join_all(exploit_names.iter().map(|name| {
            self.scan_target(
                name,
                &target.url,
                &options,
                requester,
                ScanType::Suite,
                Some(suite_id.as_str()),
            )
        }))
        .await;

        for scan in &results {
            self.results.save(scan.clone())?;
        }
        let summary = SuiteSummary::of(&results);
        self.audit.record(
            AuditEntry::new("SUITE_COMPLETED", AuditLevel::Info, SOURCE)
                .with_requester(requester)
                .with_details(json!({
                    "suiteId": suite_id,
                    "target": target.url.as_str(),
                    "successful": summary.successful,
                    "failed": summary.failed,
                })),
        );

        Ok(SuiteReport {
            suite_id,
            target: target.url.to_string(),
            results,
            summary,
        })
    }

    /// Static exploits over stored files. `file_ids` defaults to every listed file.
    pub async fn run_file_scan(
        &self,
        exploit_names: &[String],
        file_ids: Option<&[String]>,
        options: ScanOptions,
        requester: &Requester,
    ) -> Result<BatchReport> {
        if exploit_names.is_empty() {
            return Err(ScanError::Validation(
                "At least one exploit must be selected".into(),
            ));
        }
        let ids: Vec<String> = match file_ids {
            Some(ids) if !ids.is_empty() => ids.to_vec(),
            _ => self.files.list().into_iter().map(|f| f.file_id).collect(),
        };
        if ids.is_empty() {
            return Err(ScanError::Validation("No files available to scan".into()));
        }
        if ids.iter().all(|id| self.files.get(id).is_err()) {
            return Err(ScanError::not_found("File", ids.join(", ")));
        }

        let options = self.normalize(options)?;
        let suite_id = uuid::Uuid::new_v4().to_string();
        let per_file = join_all(
            ids.iter()
                .map(|id| self.scan_file(exploit_names, id, &options, requester, &suite_id)),
        )
        .await;
        let results: Vec<SecurityScan> = per_file.into_iter().flatten().collect();

        for scan in &results {
            self.results.save(scan.clone())?;
        }
        self.audit.record(
            AuditEntry::new("BATCH_SCAN_COMPLETED", AuditLevel::Info, SOURCE)
                .with_requester(requester)
                .with_details(json!({
                    "suiteId": suite_id,
                    "files": ids.len(),
                    "exploits": exploit_names.len(),
                })),
        );

        Ok(BatchReport {
            suite_id,
            results,
            total_files: ids.len(),
            total_exploits: exploit_names.len(),
        })
    }

    /// Fills in the default timeout and clamps it to `[1, max_timeout_ms]`.
    /// Port lists are deduplicated and may not exceed `max_ports`.
    fn normalize(&self, mut options: ScanOptions) -> Result<ScanOptions> {
        let timeout = options
            .timeout
            .unwrap_or(self.limits.default_timeout_ms)
            .clamp(1, self.limits.max_timeout_ms.max(1));
        options.timeout = Some(timeout);

        if let Some(ports) = options.ports.as_mut() {
            ports.sort_unstable();
            ports.dedup();
            if ports.len() > self.limits.max_ports {
                return Err(ScanError::Validation(format!(
                    "At most {} ports may be scanned per request, got {}",
                    self.limits.max_ports,
                    ports.len()
                )));
            }
        }
        Ok(options)
    }

    async fn scan_target(
        &self,
        exploit_name: &str,
        url: &Url,
        options: &ScanOptions,
        requester: &Requester,
        scan_type: ScanType,
        suite_id: Option<&str>,
    ) -> SecurityScan {
        let metadata = ScanMetadata {
            requester: requester.clone(),
            mode: Some(ExecutionMode::Live),
            ..ScanMetadata::default()
        };
        let mut pending =
            SecurityScan::begin(exploit_name, url.as_str(), scan_type, options.clone(), metadata);
        if let Some(suite_id) = suite_id {
            pending = pending.in_suite(suite_id);
        }

        let module = match self.module(exploit_name, ExecutionMode::Live) {
            Ok(module) => module,
            Err(message) => return pending.fail(message, 0),
        };
        match self
            .execute(module, Subject::Target(url.clone()), options.clone())
            .await
        {
            Ok(output) => pending.succeed(output),
            Err(e) => {
                tracing::warn!(exploit = %exploit_name, target = %url, error = %e, "module failed");
                pending.fail(e.to_string(), 0)
            }
        }
    }

    async fn scan_file(
        &self,
        exploit_names: &[String],
        file_id: &str,
        options: &ScanOptions,
        requester: &Requester,
        suite_id: &str,
    ) -> Vec<SecurityScan> {
        let metadata = ScanMetadata {
            requester: requester.clone(),
            file_id: Some(file_id.to_string()),
            mode: Some(ExecutionMode::Static),
            ..ScanMetadata::default()
        };
        let begin = |name: &str, target: &str, metadata: ScanMetadata| {
            SecurityScan::begin(name, target, ScanType::File, options.clone(), metadata)
                .in_suite(suite_id)
        };
        let fail_all = |target: &str, metadata: &ScanMetadata, message: &str, files: usize| {
            exploit_names
                .iter()
                .map(|name| begin(name, target, metadata.clone()).fail(message, files))
                .collect::<Vec<_>>()
        };

        let file = match self.files.get(file_id) {
            Ok(file) => file,
            Err(e) => return fail_all(file_id, &metadata, &e.to_string(), 0),
        };
        let metadata = ScanMetadata {
            file_name: Some(file.original_name.clone()),
            ..metadata
        };
        if let Err(e) = self.files.set_status(file_id, ScanStatus::Scanning) {
            tracing::warn!(file = %file_id, error = %e, "could not mark file as scanning");
        }

        let (file, content) = match self.files.read_content(file_id).await {
            Ok(read) => read,
            Err(e) => {
                self.finish_file(file_id, ScanStatus::Error, &[]);
                return fail_all(&file.original_name, &metadata, &e.to_string(), 1);
            }
        };
        let subject = Subject::Source(SourceText::new(
            file.original_name.clone(),
            content,
            file.language.clone(),
        ));

        let scans = join_all(exploit_names.iter().map(|name| {
            let pending = begin(name, &file.original_name, metadata.clone());
            let subject = subject.clone();
            async move {
                let module = match self.module(name, ExecutionMode::Static) {
                    Ok(module) => module,
                    Err(message) => return pending.fail(message, 1),
                };
                match self.execute(module, subject, options.clone()).await {
                    Ok(output) => pending.succeed(ModuleOutput {
                        files_scanned: 1,
                        ..output
                    }),
                    Err(e) => pending.fail(e.to_string(), 1),
                }
            }
        }))
        .await;

        let status = if scans.iter().any(|s| s.success) {
            ScanStatus::Completed
        } else {
            ScanStatus::Error
        };
        let scan_ids: Vec<String> = scans.iter().map(|s| s.scan_id.clone()).collect();
        self.finish_file(file_id, status, &scan_ids);
        scans
    }

    fn finish_file(&self, file_id: &str, status: ScanStatus, scan_ids: &[String]) {
        let outcome = self
            .files
            .set_status(file_id, status)
            .and_then(|()| self.files.attach_scans(file_id, scan_ids));
        if let Err(e) = outcome {
            tracing::warn!(file = %file_id, error = %e, "could not record file scan outcome");
        }
    }

    /// The module implementing `name` in `mode`, or the message a failed scan records.
    fn module(&self, name: &str, mode: ExecutionMode) -> std::result::Result<Arc<dyn ExploitModule>, String> {
        let (kind, entry) = self.registry.resolve(name).map_err(|e| e.to_string())?;
        entry.module_for(kind, mode).map_err(|e| e.to_string())
    }

    /// Runs `module` in its own task, bounded by `options.timeout`.
    async fn execute(
        &self,
        module: Arc<dyn ExploitModule>,
        subject: Subject,
        options: ScanOptions,
    ) -> std::result::Result<ModuleOutput, ModuleError> {
        let _active = self.results.begin_scan();
        let budget_ms = options.timeout.unwrap_or(self.limits.default_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(budget_ms);

        let handle = tokio::spawn(async move { module.run(&subject, &options, deadline).await });
        let abort = handle.abort_handle();
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) if join.is_panic() => {
                Err(ModuleError::Panicked(panic_message(join.into_panic())))
            }
            Ok(Err(join)) => Err(ModuleError::Failed(join.to_string())),
            Err(_) => {
                abort.abort();
                Err(ModuleError::Timeout(budget_ms))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "module panicked".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorizationConfig, StorageConfig};
    use crate::exploits::{ExploitKind, Severity, Vulnerability};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    enum Behavior {
        Find(Severity),
        Sleep,
        Panic,
    }

    struct Stub {
        mode: ExecutionMode,
        behavior: Behavior,
    }

    impl Stub {
        fn live(behavior: Behavior) -> Arc<dyn ExploitModule> {
            Arc::new(Self {
                mode: ExecutionMode::Live,
                behavior,
            })
        }

        fn source(behavior: Behavior) -> Arc<dyn ExploitModule> {
            Arc::new(Self {
                mode: ExecutionMode::Static,
                behavior,
            })
        }
    }

    #[async_trait]
    impl ExploitModule for Stub {
        fn mode(&self) -> ExecutionMode {
            self.mode
        }

        async fn run(
            &self,
            subject: &Subject,
            _options: &ScanOptions,
            _deadline: Instant,
        ) -> std::result::Result<ModuleOutput, ModuleError> {
            match self.behavior {
                Behavior::Find(severity) => Ok(ModuleOutput::new(
                    vec![Vulnerability::new("stub", severity, subject.describe(), "stub finding")],
                    0,
                )),
                Behavior::Sleep => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(ModuleOutput::default())
                }
                Behavior::Panic => panic!("stub exploded"),
            }
        }
    }

    struct Harness {
        orchestrator: ScanOrchestrator,
        files: Arc<FileRegistry>,
        results: Arc<ResultStore>,
        audit: Arc<AuditLog>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        harness_with(
            ExploitRegistry::empty()
                .register(ExploitKind::SqlInjection, Stub::live(Behavior::Find(Severity::High)))
                .register(ExploitKind::Xss, Stub::live(Behavior::Find(Severity::Medium)))
                .register(ExploitKind::Ssrf, Stub::live(Behavior::Sleep))
                .register(ExploitKind::Csrf, Stub::live(Behavior::Panic))
                .register(ExploitKind::SqlInjection, Stub::source(Behavior::Find(Severity::Critical)))
                .register(ExploitKind::HardcodedSecrets, Stub::source(Behavior::Find(Severity::Low))),
        )
    }

    fn harness_with(registry: ExploitRegistry) -> Harness {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(AuditLog::new());
        let storage = StorageConfig {
            upload_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let files = Arc::new(FileRegistry::new(&storage, audit.clone()));
        let results = Arc::new(ResultStore::new(audit.clone()));
        let authorizer = Arc::new(TargetAuthorizer::new(
            AuthorizationConfig::default().allowed_domains,
            audit.clone(),
        ));
        let limits = ScanConfig {
            default_timeout_ms: 300,
            ..ScanConfig::default()
        };
        Harness {
            orchestrator: ScanOrchestrator::new(
                Arc::new(registry),
                authorizer,
                files.clone(),
                results.clone(),
                audit.clone(),
                limits,
            ),
            files,
            results,
            audit,
            _dir: dir,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn single_scan_is_saved() {
        let h = harness();
        let scan = h
            .orchestrator
            .run_single("sql-injection", "http://localhost:3000", ScanOptions::default(), &Requester::default())
            .await
            .unwrap();
        assert!(scan.success);
        assert_eq!(scan.scan_type, ScanType::Url);
        assert_eq!(scan.statistics.total_vulnerabilities, scan.vulnerabilities.len());
        assert_eq!(scan.options.timeout, Some(300));
        assert_eq!(h.results.get(&scan.scan_id).unwrap().scan_id, scan.scan_id);
    }

    #[tokio::test]
    async fn unknown_exploit_is_not_found_before_authorization() {
        let h = harness();
        let err = h
            .orchestrator
            .run_single("made-up", "https://google.com", ScanOptions::default(), &Requester::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(h.audit.count("TARGET_REJECTED"), 0);
    }

    #[tokio::test]
    async fn rejected_target_saves_nothing() {
        let h = harness();
        let err = h
            .orchestrator
            .run_suite(&names(&["xss"]), "https://google.com", ScanOptions::default(), &Requester::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(h.results.is_empty());
        assert_eq!(h.audit.count("TARGET_REJECTED"), 1);
    }

    #[tokio::test]
    async fn suite_isolates_timeouts() {
        let h = harness();
        let report = h
            .orchestrator
            .run_suite(
                &names(&["sql-injection", "ssrf", "xss"]),
                "http://localhost:3000",
                ScanOptions {
                    timeout: Some(200),
                    ..ScanOptions::default()
                },
                &Requester::default(),
            )
            .await
            .unwrap();
        let order: Vec<_> = report.results.iter().map(|s| s.exploit_name.as_str()).collect();
        assert_eq!(order, vec!["sql-injection", "ssrf", "xss"]);
        assert_eq!(report.summary.failed, 1);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.as_deref().unwrap().contains("timed out"));
        assert!(report.results[0].success && !report.results[0].vulnerabilities.is_empty());
        assert!(report.results[2].success && !report.results[2].vulnerabilities.is_empty());
        assert!(report.results.iter().all(|s| s.suite_id.as_deref() == Some(report.suite_id.as_str())));
        assert_eq!(h.results.len(), 3);
        assert_eq!(h.results.active_scans(), 0);
    }

    #[tokio::test]
    async fn suite_survives_panics_and_unknown_names() {
        let h = harness();
        let report = h
            .orchestrator
            .run_suite(
                &names(&["csrf", "nope", "xss"]),
                "http://localhost:3000",
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.summary.successful, 1);
        assert!(report.results[0].error.as_deref().unwrap().contains("stub exploded"));
        assert!(report.results[1].error.as_deref().unwrap().contains("not found"));
        assert_eq!(h.results.active_scans(), 0);
    }

    #[tokio::test]
    async fn empty_selection_is_invalid() {
        let h = harness();
        let err = h
            .orchestrator
            .run_suite(&[], "http://localhost:3000", ScanOptions::default(), &Requester::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        let err = h
            .orchestrator
            .run_file_scan(&[], None, ScanOptions::default(), &Requester::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn timeout_is_clamped() {
        let h = harness();
        let options = h
            .orchestrator
            .normalize(ScanOptions {
                timeout: Some(10_000_000),
                ..ScanOptions::default()
            })
            .unwrap();
        assert_eq!(options.timeout, Some(ScanConfig::default().max_timeout_ms));
        let options = h
            .orchestrator
            .normalize(ScanOptions {
                timeout: Some(0),
                ..ScanOptions::default()
            })
            .unwrap();
        assert_eq!(options.timeout, Some(1));
    }

    #[tokio::test]
    async fn port_lists_are_deduplicated_and_bounded() {
        let h = harness();
        let options = h
            .orchestrator
            .normalize(ScanOptions {
                ports: Some(vec![443, 80, 443, 80]),
                ..ScanOptions::default()
            })
            .unwrap();
        assert_eq!(options.ports, Some(vec![80, 443]));

        let err = h
            .orchestrator
            .run_single(
                "sql-injection",
                "http://localhost:3000",
                ScanOptions {
                    ports: Some((1..=u16::MAX).collect()),
                    ..ScanOptions::default()
                },
                &Requester::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(h.results.is_empty());
    }

    #[tokio::test]
    async fn batch_scans_every_file_with_static_modules() {
        let h = harness();
        let a = h.files.store_upload("a.js", b"let a = 1;").await.unwrap();
        let b = h.files.store_upload("b.php", b"<?php echo 1;").await.unwrap();

        let report = h
            .orchestrator
            .run_file_scan(
                &names(&["sql-injection", "hardcoded-secrets", "network-scan"]),
                None,
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.total_files, 2);
        assert_eq!(report.total_exploits, 3);
        assert_eq!(report.results.len(), 6);
        assert!(report.results.iter().all(|s| s.files_scanned == 1 && s.scan_type == ScanType::File));
        // network-scan is not registered in this harness
        assert_eq!(report.results.iter().filter(|s| !s.success).count(), 2);
        assert_eq!(report.results[0].metadata.file_id.as_deref(), Some(a.file_id.as_str()));

        let stored = h.files.get(&b.file_id).unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Completed);
        assert_eq!(stored.scan_results.len(), 3);
    }

    #[tokio::test]
    async fn batch_with_unknown_ids() {
        let h = harness();
        let a = h.files.store_upload("a.js", b"let a = 1;").await.unwrap();
        let mixed = vec![a.file_id.clone(), "file_nonexistent123".to_string()];

        let err = h
            .orchestrator
            .run_file_scan(
                &names(&["sql-injection"]),
                Some(names(&["file_nonexistent123"]).as_slice()),
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        let report = h
            .orchestrator
            .run_file_scan(
                &names(&["sql-injection"]),
                Some(mixed.as_slice()),
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].success);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn batch_without_files_is_invalid() {
        let h = harness();
        let err = h
            .orchestrator
            .run_file_scan(&names(&["xss"]), None, ScanOptions::default(), &Requester::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn deleted_file_is_skipped_but_its_scans_remain() {
        let h = harness();
        let gone = h.files.store_upload("gone.js", b"let a = 1;").await.unwrap();
        let kept = h.files.store_upload("kept.js", b"let b = 2;").await.unwrap();
        let first = h
            .orchestrator
            .run_file_scan(
                &names(&["sql-injection"]),
                Some(names(&[gone.file_id.as_str()]).as_slice()),
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap();
        let old_scan = first.results[0].scan_id.clone();

        h.files.delete(&gone.file_id, &Requester::default()).await.unwrap();

        let everything = h
            .orchestrator
            .run_file_scan(&names(&["sql-injection"]), None, ScanOptions::default(), &Requester::default())
            .await
            .unwrap();
        assert_eq!(everything.total_files, 1);
        assert_eq!(everything.results[0].metadata.file_id.as_deref(), Some(kept.file_id.as_str()));

        let explicit = h
            .orchestrator
            .run_file_scan(
                &names(&["sql-injection"]),
                Some(names(&[gone.file_id.as_str(), kept.file_id.as_str()]).as_slice()),
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap();
        assert!(!explicit.results[0].success);
        assert!(explicit.results[0].error.as_deref().unwrap().contains("not found"));
        assert!(explicit.results[1].success);

        let err = h
            .orchestrator
            .run_file_scan(
                &names(&["sql-injection"]),
                Some(names(&[gone.file_id.as_str()]).as_slice()),
                ScanOptions::default(),
                &Requester::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);

        assert_eq!(h.results.get(&old_scan).unwrap().metadata.file_id.as_deref(), Some(gone.file_id.as_str()));
    }

    #[tokio::test]
    async fn concurrent_suites_keep_counters_consistent() {
        let h = harness();
        let selection = names(&["sql-injection", "xss", "ssrf"]);
        let options = ScanOptions {
            timeout: Some(100),
            ..ScanOptions::default()
        };
        let requester = Requester::default();
        let reports = join_all((0..6).map(|_| {
            h.orchestrator
                .run_suite(&selection, "http://localhost:3000", options.clone(), &requester)
        }))
        .await;

        let saved: usize = reports.into_iter().map(|r| r.unwrap().results.len()).sum();
        assert_eq!(saved, 18);
        let stats = h.results.stats(h.orchestrator.registry().len());
        assert_eq!(stats.active_scans, 0);
        assert_eq!(stats.completed_scans, saved);
        assert_eq!(stats.completed_scans, h.results.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_live_target_is_never_a_clean_pass() {
        let registry = ExploitRegistry::empty().register(
            ExploitKind::Xss,
            Arc::new(crate::exploits::live::XssProbe::new(crate::exploits::live::probe_client("scanforge-test"))),
        );
        let h = harness_with(registry);
        let target = crate::exploits::live::fixture::stalls_on_query().await;

        for _ in 0..5 {
            let scan = h
                .orchestrator
                .run_single(
                    "xss",
                    target.as_str(),
                    ScanOptions {
                        timeout: Some(400),
                        ..ScanOptions::default()
                    },
                    &Requester::default(),
                )
                .await
                .unwrap();
            assert!(!scan.success);
            assert!(scan.error.as_deref().unwrap().contains("timed out"));
        }
        assert_eq!(h.results.active_scans(), 0);
    }
}
