use serde::Serialize;

use crate::error::Result;
use crate::exploits::Severity;
use crate::store::SecurityScan;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    scans: &'a [SecurityScan],
    fail_on: Severity,
    pass: bool,
}

/// Render scan records as a JSON report.
pub fn render(scans: &[SecurityScan], fail_on: Severity, pass: bool) -> Result<String> {
    let report = JsonReport {
        scans,
        fail_on,
        pass,
    };
    let json = serde_json::to_string_pretty(&report)?;
    Ok(json)
}
