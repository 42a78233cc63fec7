use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Target domain not allowed for security testing: {host}")]
    Authorization {
        host: String,
        allowed_domains: Vec<String>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("File registration failed for {filename}: {message}")]
    Registration { filename: String, message: String },

    #[error("Duplicate scan id: {0}")]
    DuplicateScanId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// HTTP status the request boundary reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Registration { .. } => 400,
            Self::Authorization { .. } => 403,
            Self::NotFound { .. } => 404,
            _ => 500,
        }
    }

    pub fn exit_code(&self) -> i32 {
        2
    }

    /// Whether the message may be shown to a client as-is.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

/// Failure of a single exploit module run. Recorded on the scan record,
/// never raised to the request boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{exploit} does not support {mode} scans")]
    Unsupported { exploit: String, mode: String },

    #[error("module panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ScanError::Validation("bad".into()).status_code(), 400);
        let denied = ScanError::Authorization {
            host: "google.com".into(),
            allowed_domains: vec!["localhost".into()],
        };
        assert_eq!(denied.status_code(), 403);
        assert_eq!(ScanError::not_found("File", "file_x").status_code(), 404);
        assert_eq!(ScanError::DuplicateScanId("scan_1".into()).status_code(), 500);
        assert!(!ScanError::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn not_found_message_names_kind_and_id() {
        let err = ScanError::not_found("Exploit", "nope");
        assert_eq!(err.to_string(), "Exploit not found: nope");
    }
}
