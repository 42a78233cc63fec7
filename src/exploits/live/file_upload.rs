use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tokio::time::Instant;

use super::{target_of, Probe};
use crate::error::ModuleError;
use crate::exploits::{
    truncate, ExecutionMode, ExploitKind, ExploitModule, ModuleOutput, ScanOptions, Severity,
    Subject, Vulnerability,
};

const KIND: &str = "Unrestricted file upload";
const FIELD: &str = "file";
const FIX: &str = "Validate extension and content type against an allowlist, rename stored files and keep them outside the web root.";

/// (file name, body) pairs that a safe endpoint must refuse.
const UPLOADS: &[(&str, &str)] = &[
    ("test.php", "<?php echo 'scanforge'; ?>"),
    ("test.jsp", "<% out.println(\"scanforge\"); %>"),
    ("test.asp", "<% Response.Write(\"scanforge\") %>"),
    ("../../../evil.php", "<?php echo 'scanforge'; ?>"),
];

/// Multipart uploads of executable content to the target.
pub struct FileUploadProbe {
    client: Client,
}

impl FileUploadProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExploitModule for FileUploadProbe {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn run(
        &self,
        subject: &Subject,
        options: &ScanOptions,
        deadline: Instant,
    ) -> Result<ModuleOutput, ModuleError> {
        let target = target_of(subject, ExploitKind::FileUpload)?;
        let probe = Probe::new(&self.client, options, deadline);
        probe.baseline(target).await?;
        let mut findings = Vec::new();

        for (name, body) in UPLOADS {
            probe.ensure_time()?;
            let form = Form::new().part(FIELD, Part::text(*body).file_name(*name));
            let request = probe.client().post(target.clone()).multipart(form);
            let Some(response) = probe.attempt(request).await? else {
                continue;
            };
            let lower = response.body.to_lowercase();
            if !response.status.is_success()
                || !(lower.contains("uploaded") || lower.contains("success"))
            {
                continue;
            }

            let traversal = name.contains("..");
            let (severity, description) = if traversal {
                (
                    Severity::Critical,
                    "Upload accepted with a directory traversal file name",
                )
            } else {
                (Severity::High, "Server-side script accepted as an upload")
            };
            findings.push(
                Vulnerability::new(KIND, severity, target.as_str(), description)
                    .with_payload(*name)
                    .with_evidence(truncate(&response.body, 200))
                    .with_recommendation(FIX)
                    .with_cwe(if traversal { "CWE-22" } else { "CWE-434" }),
            );
        }

        Ok(ModuleOutput::new(findings, 0))
    }
}
