pub mod console;
pub mod html;
pub mod json;
pub mod report;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exploits::Severity;
use crate::store::SecurityScan;

pub use report::DetailedReport;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
    Html,
}

impl OutputFormat {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" | "text" | "table" => Some(Self::Console),
            "json" => Some(Self::Json),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// True when no finding reaches `fail_on`.
pub fn passes(scans: &[SecurityScan], fail_on: Severity) -> bool {
    scans
        .iter()
        .flat_map(|s| s.vulnerabilities.iter())
        .all(|f| f.severity < fail_on)
}

/// Render scan records into the specified format.
pub fn render(scans: &[SecurityScan], format: OutputFormat, fail_on: Severity) -> Result<String> {
    let pass = passes(scans, fail_on);
    match format {
        OutputFormat::Console => Ok(console::render(scans, fail_on, pass)),
        OutputFormat::Json => json::render(scans, fail_on, pass),
        OutputFormat::Html => {
            let report = match scans {
                [single] => DetailedReport::from_scan(single),
                _ => DetailedReport::from_suite(
                    scans
                        .first()
                        .and_then(|s| s.suite_id.as_deref())
                        .unwrap_or("report"),
                    scans,
                ),
            };
            Ok(html::render(&report))
        }
    }
}
