//! Upload admission: allowed extensions, size limits, MIME and language hints.

use std::path::Path;

use rand::Rng;

use crate::config::StorageConfig;
use crate::error::{Result, ScanError};

const ALLOWED_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "php", "html", "htm", "css", "json", "xml", "sql", "py", "java",
    "cpp", "c", "h", "cs", "go", "rb", "vue", "asp", "aspx", "txt",
];

/// Lower-cased extension of `name`, without the dot.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn mime_for(extension: &str) -> &'static str {
    match extension {
        "js" | "jsx" => "application/javascript",
        "ts" | "tsx" => "application/typescript",
        "php" => "application/x-php",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "json" => "application/json",
        "xml" => "application/xml",
        "sql" => "application/sql",
        "py" => "text/x-python",
        "java" => "text/x-java-source",
        "c" | "h" => "text/x-c",
        "cpp" => "text/x-c++",
        "cs" => "text/x-csharp",
        "go" => "text/x-go",
        "rb" => "text/x-ruby",
        "vue" => "text/x-vue",
        "asp" | "aspx" => "text/x-asp",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Language hint for static modules, from a file name.
pub fn language_for(name: &str) -> &'static str {
    match extension_of(name).as_str() {
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "java" => "java",
        "php" => "php",
        "rb" => "ruby",
        "go" => "go",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cpp" => "cpp",
        "html" | "htm" | "vue" => "html",
        "sql" => "sql",
        _ => "javascript",
    }
}

pub fn is_allowed(name: &str) -> bool {
    ALLOWED_EXTENSIONS.contains(&extension_of(name).as_str())
}

/// Checks a whole upload request against the storage limits.
pub fn admit<'a>(
    files: impl IntoIterator<Item = (&'a str, usize)>,
    limits: &StorageConfig,
) -> Result<()> {
    let mut count = 0;
    for (name, size) in files {
        count += 1;
        if count > limits.max_files {
            return Err(ScanError::Validation(format!(
                "Too many files: at most {} per upload",
                limits.max_files
            )));
        }
        if !is_allowed(name) {
            return Err(ScanError::Validation(format!(
                "File type not allowed: {name}"
            )));
        }
        if size as u64 > limits.max_file_size {
            return Err(ScanError::Validation(format!(
                "File too large: {name} exceeds {} bytes",
                limits.max_file_size
            )));
        }
    }
    if count == 0 {
        return Err(ScanError::Validation("No files uploaded".into()));
    }
    Ok(())
}

/// `<millis>-<random>-<original>`, with path components stripped from the original.
pub fn stored_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("upload");
    let millis = chrono::Utc::now().timestamp_millis();
    let nonce: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{millis}-{nonce}-{base}")
}

/// Recovers the original name from a stored name, if it has the stored shape.
pub fn original_name(stored: &str) -> &str {
    let mut parts = stored.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ts), Some(nonce), Some(rest))
            if ts.chars().all(|c| c.is_ascii_digit()) && nonce.chars().all(|c| c.is_ascii_digit()) =>
        {
            rest
        }
        _ => stored,
    }
}
