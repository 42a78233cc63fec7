use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ScanError;
use crate::store::{AuditEntry, AuditLevel, AuditLog};

/// Request-level failure, rendered as the `{success: false, error}` envelope.
#[derive(Debug)]
pub struct ApiError(pub ScanError);

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        Self(err)
    }
}

/// Marker left on 5xx responses so the audit middleware can record the cause.
#[derive(Debug, Clone)]
struct InternalFailure(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = match &self.0 {
            ScanError::Authorization {
                allowed_domains, ..
            } => json!({
                "success": false,
                "error": self.0.to_string(),
                "allowedDomains": allowed_domains,
            }),
            err if err.is_client_error() => json!({
                "success": false,
                "error": err.to_string(),
            }),
            _ => json!({
                "success": false,
                "error": "Internal server error",
            }),
        };

        let mut response = (status, Json(body)).into_response();
        if !self.0.is_client_error() {
            response
                .extensions_mut()
                .insert(InternalFailure(self.0.to_string()));
        }
        response
    }
}

/// Records internal failures in the audit log; the client only sees a
/// generic message.
pub async fn audit_failures(
    State(audit): State<Arc<AuditLog>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if let Some(InternalFailure(message)) = response.extensions().get::<InternalFailure>() {
        audit.record(
            AuditEntry::new("REQUEST_FAILED", AuditLevel::Error, "server").with_details(json!({
                "method": method.as_str(),
                "path": path,
                "status": response.status().as_u16(),
                "error": message,
            })),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forbidden_body_lists_allowed_domains() {
        let response = ApiError(ScanError::Authorization {
            host: "google.com".into(),
            allowed_domains: vec!["localhost".into()],
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["allowedDomains"][0], "localhost");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = ApiError(ScanError::Internal("lock poisoned at 0xdead".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<InternalFailure>().is_some());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("0xdead"));
    }
}
