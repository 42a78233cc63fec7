//! Scan records, running statistics and the audit trail.

mod audit_log;
mod results;

pub use audit_log::{AuditEntry, AuditLevel, AuditLog, Requester};
pub use results::{
    ActiveScan, PendingScan, ResultStore, ScanFilter, ScanMetadata, ScanPage, ScanStats,
    ScanType, SecurityScan,
};
