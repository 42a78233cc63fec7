//! HTTP surface: the `/api/security` scan endpoints and the `/api/redteam`
//! code auditor, sharing one [`AppState`].

mod error;
mod redteam;
mod requester;
mod security;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::authorizer::TargetAuthorizer;
use crate::config::Config;
use crate::error::Result;
use crate::exploits::ExploitRegistry;
use crate::files::FileRegistry;
use crate::orchestrator::ScanOrchestrator;
use crate::redteam::CodeAuditor;
use crate::store::{AuditLog, ResultStore};

pub use error::ApiError;

/// Headroom for multipart framing on top of the file payload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handles for every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ExploitRegistry>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub files: Arc<FileRegistry>,
    pub results: Arc<ResultStore>,
    pub audit: Arc<AuditLog>,
    pub auditor: Arc<CodeAuditor>,
}

impl AppState {
    /// Wires the stores and the built-in registry, then indexes existing uploads.
    pub fn from_config(config: Config) -> Result<Self> {
        let registry = Arc::new(ExploitRegistry::builtin(&config));
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: Config, registry: Arc<ExploitRegistry>) -> Result<Self> {
        let audit = Arc::new(AuditLog::new());
        let files = Arc::new(FileRegistry::new(&config.storage, audit.clone()));
        files.load_from_dir()?;
        let results = Arc::new(ResultStore::new(audit.clone()));
        let authorizer = Arc::new(TargetAuthorizer::new(
            config.authorization.allowed_domains.clone(),
            audit.clone(),
        ));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            registry.clone(),
            authorizer,
            files.clone(),
            results.clone(),
            audit.clone(),
            config.scan.clone(),
        ));
        let auditor = Arc::new(CodeAuditor::from_config(&config.audit));

        Ok(Self {
            config: Arc::new(config),
            registry,
            orchestrator,
            files,
            results,
            audit,
            auditor,
        })
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

/// Wraps `data` in the `{success: true, data}` envelope.
fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        data,
    })
    .into_response()
}

pub fn router(state: AppState) -> Router {
    let storage = &state.config.storage;
    let upload_limit = usize::try_from(storage.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_mul(storage.max_files)
        .saturating_add(MULTIPART_OVERHEAD);

    let security = Router::new()
        .route("/health", get(security::health))
        .route("/exploits", get(security::exploits))
        .route("/exploits/:name", get(security::exploit))
        .route("/stats", get(security::stats))
        .route(
            "/results",
            get(security::results).delete(security::purge_results),
        )
        .route(
            "/results/:id",
            get(security::result).delete(security::purge_suite),
        )
        .route("/scan/:id/status", get(security::scan_status))
        .route("/report/:id", get(security::report))
        .route("/files", get(security::files))
        .route("/files/:id", delete(security::delete_file))
        .route(
            "/upload",
            post(security::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/suite", post(security::suite))
        .route("/scan-files", post(security::scan_files))
        .route("/:exploit", post(security::scan));

    let redteam = Router::new()
        .route("/audit", post(redteam::audit))
        .route("/audit-multiple", post(redteam::audit_multiple))
        .route("/batch-audit", post(redteam::batch_audit))
        .route("/health", get(redteam::health));

    Router::new()
        .nest("/api/security", security)
        .nest("/api/redteam", redteam)
        .layer(middleware::from_fn_with_state(
            state.audit.clone(),
            error::audit_failures,
        ))
        .with_state(state)
}

/// Serves until ctrl-c on an already bound listener.
pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

pub async fn serve(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(
        addr = %bind,
        exploits = state.registry.len(),
        files = state.files.len(),
        "scanforge listening"
    );
    serve_on(listener, state).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
