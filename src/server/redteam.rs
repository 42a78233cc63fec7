//! `/api/redteam/*` handlers. Responses keep the auditor's historical
//! snake_case shape rather than the success envelope.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::security::body;
use super::AppState;
use crate::error::ScanError;
use crate::exploits::{Severity, Vulnerability};
use crate::redteam::{ModelStatus, MultiAuditReport};

const DEFAULT_LANGUAGE: &str = "javascript";
const DEFAULT_FILE_NAME: &str = "snippet.js";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub code: Option<String>,
    pub language: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MultiAuditRequest {
    pub files: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub status: &'static str,
    pub audit_report: String,
    pub custom_findings: Vec<Vulnerability>,
    pub model_findings: Vec<Vulnerability>,
    pub model_status: ModelStatus,
    pub severity: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchAuditRequest {
    pub project_files: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub options: BatchAuditOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchAuditOptions {
    pub severity_threshold: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchAuditResponse {
    pub success: bool,
    pub batch_audit: bool,
    pub threshold_applied: Severity,
    /// No finding at or above the threshold.
    pub passed: bool,
    pub scan_timestamp: chrono::DateTime<Utc>,
    #[serde(flatten)]
    pub report: MultiAuditReport,
}

#[derive(Debug, Serialize)]
pub struct MultiAuditResponse {
    pub success: bool,
    pub status: &'static str,
    #[serde(flatten)]
    pub report: MultiAuditReport,
}

pub async fn audit(
    State(state): State<AppState>,
    payload: Result<Json<AuditRequest>, JsonRejection>,
) -> Result<Json<AuditResponse>, ApiError> {
    let request = body(payload)?;
    let code = request
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError(ScanError::Validation("Code is required".into())))?;
    let language = request.language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
    let file_name = request.file_name.as_deref().unwrap_or(DEFAULT_FILE_NAME);

    let report = state.auditor.audit(&code, language, file_name).await;
    Ok(Json(AuditResponse {
        status: "red_team_analysis_complete",
        audit_report: report.render(),
        custom_findings: report.custom_findings,
        model_findings: report.model_findings,
        model_status: report.model_status,
        severity: report.severity,
    }))
}

pub async fn audit_multiple(
    State(state): State<AppState>,
    payload: Result<Json<MultiAuditRequest>, JsonRejection>,
) -> Result<Json<MultiAuditResponse>, ApiError> {
    let request = body(payload)?;
    let files = request
        .files
        .ok_or_else(|| ApiError(ScanError::Validation("Files object is required".into())))?;

    let report = state.auditor.audit_many(&files).await;
    Ok(Json(MultiAuditResponse {
        success: true,
        status: "multi_file_red_team_analysis_complete",
        report,
    }))
}

/// CI entry point: audits a project and keeps findings at or above
/// `options.severity_threshold` (default `low`).
pub async fn batch_audit(
    State(state): State<AppState>,
    payload: Result<Json<BatchAuditRequest>, JsonRejection>,
) -> Result<Json<BatchAuditResponse>, ApiError> {
    let request = body(payload)?;
    let files = request.project_files.ok_or_else(|| {
        ApiError(ScanError::Validation("project_files object is required".into()))
    })?;
    let threshold = match request.options.severity_threshold.as_deref() {
        None => Severity::Low,
        Some(name) => Severity::from_str_lenient(name).ok_or_else(|| {
            ApiError(ScanError::Validation(format!("Unknown severity threshold: {name}")))
        })?,
    };

    let mut report = state.auditor.audit_many(&files).await;
    report.retain_at_least(threshold);
    tracing::info!(
        files = report.summary.total_files,
        threshold = %threshold,
        remaining = report.remaining_findings(),
        "batch audit complete"
    );
    Ok(Json(BatchAuditResponse {
        success: true,
        batch_audit: true,
        threshold_applied: threshold,
        passed: report.remaining_findings() == 0,
        scan_timestamp: Utc::now(),
        report,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let model = state.auditor.model_name();
    Json(json!({
        "status": "healthy",
        "service": "scanforge code auditor",
        "timestamp": Utc::now(),
        "features": {
            "custom_exploits": "enabled",
            "llm_audit": if model.is_some() { "enabled" } else { "disabled" },
            "model": model,
        },
    }))
}
