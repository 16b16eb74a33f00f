//! Pre-remediation backups of configuration and schema files.
//!
//! Each backup is a timestamped directory holding the copied files and a
//! `backup-info.json` manifest. Missing source files are skipped.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::diagnostics::DiagnosticError;
use crate::error::{ErrorCode, GuardError, Result};

use super::session::{RecoveryState, RecoveryStats};

pub const MANIFEST_FILE: &str = "backup-info.json";
const DIR_PREFIX: &str = "backup-";

/// A file captured in a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    /// Where the file lives and is restored to.
    pub source: PathBuf,
    /// Path inside the backup directory.
    pub stored: PathBuf,
}

/// Session snapshot recorded alongside the files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecoveryInfo {
    pub state: RecoveryState,
    pub diagnostic_results: Vec<DiagnosticError>,
    pub stats: RecoveryStats,
}

/// Contents of `backup-info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub timestamp: DateTime<Utc>,
    pub files: Vec<BackupFile>,
    pub recovery: BackupRecoveryInfo,
}

/// Listing entry for `/api/backups`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub files: usize,
    pub state: RecoveryState,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    files: Vec<PathBuf>,
    max_backups: usize,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, files: Vec<PathBuf>, max_backups: usize) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            files,
            max_backups: max_backups.max(1),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy the configured files into a new timestamped directory.
    ///
    /// Returns the backup directory and its manifest.
    pub async fn create(&self, recovery: BackupRecoveryInfo) -> Result<(PathBuf, BackupManifest)> {
        let timestamp = Utc::now();
        let dir = self.unique_dir(&timestamp).await?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| backup_error("create backup directory", &dir, e))?;

        let mut files = Vec::new();
        for source in &self.files {
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                debug!(file = %source.display(), "backup source missing; skipped");
                continue;
            }
            let stored = stored_path(source);
            let target = dir.join(&stored);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| backup_error("create backup subdirectory", parent, e))?;
            }
            tokio::fs::copy(source, &target)
                .await
                .map_err(|e| backup_error("copy", source, e))?;
            files.push(BackupFile {
                source: source.clone(),
                stored,
            });
        }

        let manifest = BackupManifest {
            timestamp,
            files,
            recovery,
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), json)
            .await
            .map_err(|e| backup_error("write manifest", &dir, e))?;

        info!(
            backup = %dir.display(),
            files = manifest.files.len(),
            "backup created"
        );

        if let Err(e) = self.prune().await {
            warn!(error = %e, "failed to prune old backups");
        }
        Ok((dir, manifest))
    }

    /// Copy every file of a backup back to its source path.
    pub async fn restore(&self, backup: &Path) -> Result<Vec<PathBuf>> {
        let manifest = read_manifest(backup).await?;
        let mut restored = Vec::new();
        for file in &manifest.files {
            if let Some(parent) = file.source.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    GuardError::with_internal(
                        ErrorCode::RestoreFailed,
                        "Restore failed",
                        format!("create {}: {}", parent.display(), e),
                    )
                })?;
            }
            tokio::fs::copy(backup.join(&file.stored), &file.source)
                .await
                .map_err(|e| {
                    GuardError::with_internal(
                        ErrorCode::RestoreFailed,
                        "Restore failed",
                        format!("restore {}: {}", file.source.display(), e),
                    )
                })?;
            restored.push(file.source.clone());
        }
        info!(backup = %backup.display(), files = restored.len(), "backup restored");
        Ok(restored)
    }

    /// Backups that have a readable manifest, newest first.
    pub async fn list(&self) -> Result<Vec<BackupSummary>> {
        let mut summaries = Vec::new();
        for dir in self.backup_dirs().await? {
            match read_manifest(&dir).await {
                Ok(manifest) => summaries.push(BackupSummary {
                    path: dir,
                    timestamp: manifest.timestamp,
                    files: manifest.files.len(),
                    state: manifest.recovery.state,
                }),
                Err(e) => debug!(backup = %dir.display(), error = %e, "skipping unreadable backup"),
            }
        }
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// Remove the oldest backup directories beyond `max_backups`.
    pub async fn prune(&self) -> Result<usize> {
        let dirs = self.backup_dirs().await?;
        if dirs.len() <= self.max_backups {
            return Ok(0);
        }

        let excess = dirs.len() - self.max_backups;
        let mut removed = 0;
        for dir in dirs.iter().take(excess) {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {
                    info!(backup = %dir.display(), "removed old backup");
                    removed += 1;
                }
                Err(e) => error!(backup = %dir.display(), error = %e, "failed to remove old backup"),
            }
        }
        Ok(removed)
    }

    /// Backup directories sorted oldest first (names sort chronologically).
    async fn backup_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(backup_error("read backup directory", &self.backup_dir, e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let is_backup = entry
                .file_name()
                .to_str()
                .map(|n| n.starts_with(DIR_PREFIX))
                .unwrap_or(false);
            if is_backup && entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    async fn unique_dir(&self, timestamp: &DateTime<Utc>) -> Result<PathBuf> {
        let base = format!("{}{}", DIR_PREFIX, timestamp.format("%Y%m%dT%H%M%S%.3fZ"));
        let mut candidate = self.backup_dir.join(&base);
        let mut n = 1;
        while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = self.backup_dir.join(format!("{}-{}", base, n));
            n += 1;
        }
        Ok(candidate)
    }
}

/// Relative paths keep their structure; absolute paths keep only their file name.
fn stored_path(source: &Path) -> PathBuf {
    if source.is_absolute() || source.components().any(|c| matches!(c, Component::ParentDir)) {
        source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("unnamed"))
    } else {
        source
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect()
    }
}

async fn read_manifest(backup: &Path) -> Result<BackupManifest> {
    let bytes = tokio::fs::read(backup.join(MANIFEST_FILE)).await.map_err(|e| {
        GuardError::with_internal(
            ErrorCode::RecordNotFound,
            "Backup manifest not found",
            format!("{}: {}", backup.display(), e),
        )
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn backup_error(action: &str, path: &Path, e: std::io::Error) -> GuardError {
    GuardError::with_internal(
        ErrorCode::BackupFailed,
        "Backup failed",
        format!("{} {}: {}", action, path.display(), e),
    )
    .with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticContext;
    use crate::registry::ServiceDescriptor;

    fn info() -> BackupRecoveryInfo {
        BackupRecoveryInfo {
            state: RecoveryState::Recovering,
            diagnostic_results: vec![DiagnosticError::port_conflict(3001, true)],
            stats: RecoveryStats::default(),
        }
    }

    #[tokio::test]
    async fn test_create_skips_missing_and_writes_manifest() {
        let work = tempfile::tempdir().unwrap();
        let present = work.path().join("portguard.toml");
        std::fs::write(&present, "[server]\nport = 7070\n").unwrap();
        let missing = work.path().join("absent.env");

        let manager = BackupManager::new(work.path().join("backups"), vec![present.clone(), missing], 5);
        let (dir, manifest) = manager.create(info()).await.unwrap();

        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].source, present);
        assert!(dir.join("portguard.toml").exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert!(raw["timestamp"].is_string());
        assert_eq!(raw["recovery"]["state"], "recovering");
        assert_eq!(raw["recovery"]["diagnosticResults"][0]["id"], "port-conflict-3001");
        assert!(raw["recovery"]["stats"].is_object());
    }

    #[tokio::test]
    async fn test_restore_overwrites_source() {
        let work = tempfile::tempdir().unwrap();
        let file = work.path().join("schema.sql");
        std::fs::write(&file, "original").unwrap();

        let manager = BackupManager::new(work.path().join("backups"), vec![file.clone()], 5);
        let (dir, _) = manager.create(info()).await.unwrap();

        std::fs::write(&file, "clobbered").unwrap();
        let restored = manager.restore(&dir).await.unwrap();
        assert_eq!(restored, vec![file.clone()]);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
    }

    #[tokio::test]
    async fn test_manifest_with_service_down_restores_and_lists() {
        let work = tempfile::tempdir().unwrap();
        let file = work.path().join("portguard.toml");
        std::fs::write(&file, "original").unwrap();

        let api = ServiceDescriptor::new("api", 3000, vec!["node".into(), "server.js".into()])
            .with_working_dir("/srv/api");
        let recovery = BackupRecoveryInfo {
            state: RecoveryState::Recovering,
            diagnostic_results: vec![DiagnosticError::service_down(&api)],
            stats: RecoveryStats::default(),
        };

        let manager = BackupManager::new(work.path().join("backups"), vec![file.clone()], 5);
        let (dir, _) = manager.create(recovery).await.unwrap();

        let manifest = read_manifest(&dir).await.unwrap();
        assert_eq!(
            manifest.recovery.diagnostic_results[0].context,
            DiagnosticContext::Service { service: api }
        );

        std::fs::write(&file, "clobbered").unwrap();
        assert_eq!(manager.restore(&dir).await.unwrap(), vec![file.clone()]);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
        assert_eq!(manager.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let work = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(work.path().join("backups"), vec![], 2);

        for _ in 0..4 {
            manager.create(info()).await.unwrap();
        }

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].timestamp >= listed[1].timestamp);
    }

    #[tokio::test]
    async fn test_list_empty_when_directory_missing() {
        let work = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(work.path().join("nope"), vec![], 2);
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_stored_path() {
        assert_eq!(
            stored_path(Path::new("migrations/0001.sql")),
            PathBuf::from("migrations/0001.sql")
        );
        assert_eq!(stored_path(Path::new("/etc/portguard.toml")), PathBuf::from("portguard.toml"));
        assert_eq!(stored_path(Path::new("../.env")), PathBuf::from(".env"));
    }
}
