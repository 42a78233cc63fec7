//! Uploaded artifacts: deterministic identity, scan status and soft deletion.

pub mod admission;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::error::{Result, ScanError};
use crate::store::{AuditEntry, AuditLevel, AuditLog, Requester};

pub use admission::{admit, extension_of, is_allowed, language_for, mime_for};

const SOURCE: &str = "file-registry";

/// `file_` followed by the first 16 hex chars of SHA-256 over the stored name.
pub fn file_id(filename: &str) -> String {
    let digest = Sha256::digest(filename.as_bytes());
    format!("file_{}", &hex::encode(digest)[..16])
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Completed,
    Error,
}

impl ScanStatus {
    /// Whether a scan may move a file from `self` to `next`.
    pub fn can_become(self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Pending, Scanning)
                | (Scanning, Scanning)
                | (Scanning, Completed)
                | (Scanning, Error)
                | (Completed, Scanning)
                | (Error, Scanning)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_id: String,
    pub original_name: String,
    /// Name of the artifact inside the storage directory.
    pub filename: String,
    pub file_path: PathBuf,
    pub size: u64,
    pub mimetype: String,
    pub extension: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub scan_status: ScanStatus,
    pub scan_results: Vec<String>,
    pub is_deleted: bool,
    pub upload_time: DateTime<Utc>,
}

/// An artifact already on disk, waiting to be indexed.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub filename: String,
    pub original_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub checksum: Option<String>,
}

#[derive(Debug, Default)]
struct Index {
    order: Vec<String>,
    files: HashMap<String, UploadedFile>,
}

impl Index {
    fn live(&self, file_id: &str) -> Option<&UploadedFile> {
        self.files.get(file_id).filter(|f| !f.is_deleted)
    }

    fn live_mut(&mut self, file_id: &str) -> Option<&mut UploadedFile> {
        self.files.get_mut(file_id).filter(|f| !f.is_deleted)
    }
}

pub struct FileRegistry {
    dir: PathBuf,
    audit: Arc<AuditLog>,
    index: RwLock<Index>,
}

impl FileRegistry {
    pub fn new(config: &StorageConfig, audit: Arc<AuditLog>) -> Self {
        Self {
            dir: config.upload_dir.clone(),
            audit,
            index: RwLock::new(Index::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Indexes an artifact. Re-registering a stored name is idempotent and
    /// revives a soft-deleted entry with its scan references.
    pub fn register(&self, upload: NewUpload) -> Result<UploadedFile> {
        let id = file_id(&upload.filename);
        let mut index = self.index.write();

        if let Some(existing) = index.files.get_mut(&id) {
            if existing.filename != upload.filename {
                return Err(ScanError::Registration {
                    filename: upload.filename,
                    message: format!("file id {id} already belongs to {}", existing.filename),
                });
            }
            if existing.is_deleted {
                existing.is_deleted = false;
                existing.file_path = upload.path;
                existing.size = upload.size;
                existing.checksum = upload.checksum;
            }
            return Ok(existing.clone());
        }

        let extension = extension_of(&upload.original_name);
        let file = UploadedFile {
            file_id: id.clone(),
            mimetype: mime_for(&extension).to_string(),
            language: language_for(&upload.original_name).to_string(),
            extension,
            original_name: upload.original_name,
            filename: upload.filename,
            file_path: upload.path,
            size: upload.size,
            checksum: upload.checksum,
            scan_status: ScanStatus::Pending,
            scan_results: Vec::new(),
            is_deleted: false,
            upload_time: Utc::now(),
        };
        index.order.push(id.clone());
        index.files.insert(id, file.clone());
        Ok(file)
    }

    pub fn get(&self, file_id: &str) -> Result<UploadedFile> {
        self.index
            .read()
            .live(file_id)
            .cloned()
            .ok_or_else(|| ScanError::not_found("File", file_id))
    }

    /// Live files in registration order.
    pub fn list(&self) -> Vec<UploadedFile> {
        let index = self.index.read();
        index
            .order
            .iter()
            .filter_map(|id| index.live(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Soft-deletes under the index lock, then unlinks the artifact.
    /// A failed unlink is audited but still counts as a deletion.
    pub async fn delete(&self, file_id: &str, requester: &Requester) -> Result<UploadedFile> {
        let marked = {
            let mut index = self.index.write();
            index.live_mut(file_id).map(|file| {
                file.is_deleted = true;
                file.clone()
            })
        };

        let Some(file) = marked else {
            self.audit.record(
                AuditEntry::new("FILE_DELETE_NOT_FOUND", AuditLevel::Warning, SOURCE)
                    .with_requester(requester)
                    .with_details(json!({ "fileId": file_id })),
            );
            return Err(ScanError::not_found("File", file_id));
        };

        match tokio::fs::remove_file(&file.file_path).await {
            Ok(()) => self.audit.record(
                AuditEntry::new("FILE_DELETED", AuditLevel::Info, SOURCE)
                    .with_requester(requester)
                    .with_details(json!({ "fileId": file.file_id, "fileName": file.original_name })),
            ),
            Err(e) => self.audit.record(
                AuditEntry::new("FILE_DELETE_WARNING", AuditLevel::Warning, SOURCE)
                    .with_requester(requester)
                    .with_details(json!({
                        "fileId": file.file_id,
                        "path": file.file_path.display().to_string(),
                        "error": e.to_string(),
                    })),
            ),
        }
        Ok(file)
    }

    /// Rebuilds the index from the storage directory, in file name order.
    pub fn load_from_dir(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        let entries = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in entries {
            let Some(stored) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable upload");
                    continue;
                }
            };
            let upload = NewUpload {
                original_name: admission::original_name(&stored).to_string(),
                filename: stored,
                path: entry.path().to_path_buf(),
                size: bytes.len() as u64,
                checksum: Some(checksum(&bytes)),
            };
            match self.register(upload) {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(error = %e, "skipping upload during index rebuild"),
            }
        }
        tracing::info!(dir = %self.dir.display(), files = loaded, "file index loaded");
        Ok(loaded)
    }

    /// Writes a new artifact under a unique stored name and registers it.
    pub async fn store_upload(&self, original_name: &str, bytes: &[u8]) -> Result<UploadedFile> {
        self.store_as(admission::stored_name(original_name), bytes).await
    }

    /// Never overwrites an existing artifact; the file is unlinked again
    /// when it cannot be indexed.
    async fn store_as(&self, stored: String, bytes: &[u8]) -> Result<UploadedFile> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&stored);
        let mut out = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ScanError::Registration {
                    filename: stored,
                    message: "stored name already in use".into(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = out.write_all(bytes).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        drop(out);

        let registered = self.register(NewUpload {
            original_name: admission::original_name(&stored).to_string(),
            filename: stored,
            path: path.clone(),
            size: bytes.len() as u64,
            checksum: Some(checksum(bytes)),
        });
        if registered.is_err() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "could not remove unindexed upload");
            }
        }
        registered
    }

    /// Indexes a file in place, keyed by its full path. Used by the CLI,
    /// which scans local files without copying them into storage.
    pub fn index_local(&self, path: &Path) -> Result<UploadedFile> {
        let bytes = std::fs::read(path)?;
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.register(NewUpload {
            filename: path.display().to_string(),
            original_name,
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            checksum: Some(checksum(&bytes)),
        })
    }

    /// The file record and its content, decoded lossily as UTF-8.
    pub async fn read_content(&self, file_id: &str) -> Result<(UploadedFile, String)> {
        let file = self.get(file_id)?;
        let bytes = tokio::fs::read(&file.file_path).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        Ok((file, content))
    }

    pub fn set_status(&self, file_id: &str, next: ScanStatus) -> Result<()> {
        let mut index = self.index.write();
        let file = index
            .live_mut(file_id)
            .ok_or_else(|| ScanError::not_found("File", file_id))?;
        if !file.scan_status.can_become(next) {
            return Err(ScanError::Internal(format!(
                "illegal scan status transition for {file_id}: {:?} -> {next:?}",
                file.scan_status
            )));
        }
        file.scan_status = next;
        Ok(())
    }

    pub fn attach_scans(&self, file_id: &str, scan_ids: &[String]) -> Result<()> {
        let mut index = self.index.write();
        let file = index
            .live_mut(file_id)
            .ok_or_else(|| ScanError::not_found("File", file_id))?;
        file.scan_results.extend(scan_ids.iter().cloned());
        Ok(())
    }
}
