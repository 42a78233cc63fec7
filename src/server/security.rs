//! `/api/security/*` handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::error::ApiError;
use super::{ok, AppState};
use crate::error::ScanError;
use crate::exploits::ScanOptions;
use crate::files::admission;
use crate::output::{DetailedReport, OutputFormat};
use crate::store::{AuditEntry, AuditLevel, Requester, ScanFilter};

type ApiResult<T = Response> = std::result::Result<T, ApiError>;

/// Turns a body rejection into the validation envelope.
pub(super) fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError(ScanError::Validation(e.body_text())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub target: Option<String>,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteRequest {
    pub target: Option<String>,
    #[serde(default)]
    pub selected_exploits: Vec<String>,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileScanRequest {
    #[serde(default)]
    pub selected_exploits: Vec<String>,
    pub file_ids: Option<Vec<String>>,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

fn require_target(target: Option<String>) -> ApiResult<String> {
    target
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError(ScanError::Validation("Target URL is required".into())))
}

pub async fn health(State(state): State<AppState>) -> Response {
    ok(json!({
        "status": "healthy",
        "exploits": state.registry.len(),
        "timestamp": Utc::now(),
    }))
}

pub async fn exploits(State(state): State<AppState>) -> Response {
    let exploits = state.registry.list();
    ok(json!({
        "total": exploits.len(),
        "categories": state.registry.categories(),
        "exploits": exploits,
    }))
}

pub async fn exploit(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    Ok(ok(state.registry.descriptor(&name)?))
}

pub async fn stats(State(state): State<AppState>) -> Response {
    ok(state.results.stats(state.registry.len()))
}

pub async fn results(State(state): State<AppState>, Query(filter): Query<ScanFilter>) -> Response {
    ok(state.results.query(&filter))
}

pub async fn result(State(state): State<AppState>, Path(scan_id): Path<String>) -> ApiResult {
    Ok(ok(state.results.get(&scan_id)?))
}

/// Scans finish inside their request, so any stored scan is settled.
pub async fn scan_status(State(state): State<AppState>, Path(scan_id): Path<String>) -> ApiResult {
    let scan = state.results.get(&scan_id)?;
    let status = if scan.success { "completed" } else { "failed" };
    Ok(Json(json!({"success": true, "status": status, "data": scan})).into_response())
}

pub async fn purge_results(State(state): State<AppState>, requester: Requester) -> Response {
    let cleared = state.results.purge_all(&requester);
    ok(json!({
        "message": "Scan results cleared",
        "clearedCount": cleared,
    }))
}

pub async fn purge_suite(
    State(state): State<AppState>,
    Path(suite_id): Path<String>,
    requester: Requester,
) -> ApiResult {
    let cleared = state.results.purge_suite(&suite_id, &requester)?;
    Ok(ok(json!({
        "message": "Suite results cleared",
        "suiteId": suite_id,
        "clearedCount": cleared,
    })))
}

/// A single scan id, or a suite id aggregating every member.
pub async fn report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> ApiResult {
    let format = match query.format.as_deref() {
        None => OutputFormat::Json,
        Some(name) => match OutputFormat::from_str_lenient(name) {
            Some(f @ (OutputFormat::Json | OutputFormat::Html)) => f,
            _ => {
                return Err(ApiError(ScanError::Validation(format!(
                    "Unsupported report format: {name}"
                ))))
            }
        },
    };

    let report = match state.results.get(&id) {
        Ok(scan) => DetailedReport::from_scan(&scan),
        Err(not_found @ ScanError::NotFound { .. }) => {
            let mut members = state
                .results
                .query(&ScanFilter {
                    suite_id: Some(id.clone()),
                    limit: Some(usize::MAX),
                    ..ScanFilter::default()
                })
                .results;
            if members.is_empty() {
                return Err(ApiError(not_found));
            }
            members.reverse();
            DetailedReport::from_suite(&id, &members)
        }
        Err(e) => return Err(ApiError(e)),
    };

    Ok(match format {
        OutputFormat::Html => Html(crate::output::html::render(&report)).into_response(),
        _ => ok(report),
    })
}

pub async fn files(State(state): State<AppState>) -> Response {
    let files = state.files.list();
    ok(json!({
        "totalFiles": files.len(),
        "files": files,
    }))
}

pub async fn upload(
    State(state): State<AppState>,
    requester: Requester,
    mut multipart: Multipart,
) -> ApiResult {
    let mut received: Vec<(String, Vec<u8>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(ScanError::Validation(e.body_text())))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError(ScanError::Validation(e.body_text())))?;
        received.push((name, bytes.to_vec()));
    }

    admission::admit(
        received.iter().map(|(name, bytes)| (name.as_str(), bytes.len())),
        &state.config.storage,
    )?;

    let mut stored = Vec::with_capacity(received.len());
    for (name, bytes) in &received {
        stored.push(state.files.store_upload(name, bytes).await?);
    }

    state.audit.record(
        AuditEntry::new("FILES_UPLOADED", AuditLevel::Info, "server")
            .with_requester(&requester)
            .with_details(json!({
                "fileIds": stored.iter().map(|f| f.file_id.as_str()).collect::<Vec<_>>(),
            })),
    );

    Ok(ok(json!({
        "message": format!("{} file(s) uploaded successfully", stored.len()),
        "totalFiles": stored.len(),
        "files": stored,
    })))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    requester: Requester,
) -> ApiResult {
    let file = state.files.delete(&file_id, &requester).await?;
    Ok(ok(json!({
        "message": "File deleted successfully",
        "fileId": file.file_id,
        "fileName": file.original_name,
    })))
}

pub async fn scan(
    State(state): State<AppState>,
    Path(exploit): Path<String>,
    requester: Requester,
    payload: std::result::Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let target = require_target(request.target)?;
    let scan = state
        .orchestrator
        .run_single(&exploit, &target, request.options, &requester)
        .await?;
    Ok(ok(scan))
}

pub async fn suite(
    State(state): State<AppState>,
    requester: Requester,
    payload: std::result::Result<Json<SuiteRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let target = require_target(request.target)?;
    let report = state
        .orchestrator
        .run_suite(&request.selected_exploits, &target, request.options, &requester)
        .await?;
    Ok(ok(report))
}

pub async fn scan_files(
    State(state): State<AppState>,
    requester: Requester,
    payload: std::result::Result<Json<FileScanRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let report = state
        .orchestrator
        .run_file_scan(
            &request.selected_exploits,
            request.file_ids.as_deref(),
            request.options,
            &requester,
        )
        .await?;
    Ok(ok(report))
}
