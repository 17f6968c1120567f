// dumptool/src/backup/retention.rs
use chrono::{DateTime, Duration, Utc};
use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::errors::Result;
use crate::store::Repository;

/// Removes an artifact file; one that is already gone counts as removed.
fn remove_artifact(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Deletes one backup: its artifact file first, then the record. If the
/// file cannot be removed the record stays.
pub async fn delete_backup(repo: &dyn Repository, backup_id: i64) -> Result<()> {
    let backup = repo.get_backup(backup_id).await?;
    if !backup.file_path.is_empty() {
        remove_artifact(Path::new(&backup.file_path))?;
    }
    repo.delete_backup(backup_id).await?;
    info!(backup_id, path = %backup.file_path, "🗑️ Backup deleted");
    Ok(())
}

/// Deletes every backup of `target_id` that started before
/// `now - retention_days` and still has an artifact path, along with its
/// file. Status is not consulted. Returns how many records were removed.
///
/// A missing file does not block removing the record; any other file error
/// is logged and the record is kept so the next run retries it.
pub async fn cleanup_expired(
    repo: &dyn Repository,
    target_id: i64,
    retention_days: i64,
    now: DateTime<Utc>,
) -> Result<usize> {
    if retention_days <= 0 {
        return Ok(0);
    }
    let cutoff = now - Duration::days(retention_days);
    let expired = repo.list_backups_older_than(target_id, cutoff).await?;

    let mut removed = 0;
    for backup in expired.iter().filter(|b| !b.file_path.is_empty()) {
        let path = Path::new(&backup.file_path);
        if let Err(e) = remove_artifact(path) {
            warn!(backup_id = backup.id, path = %path.display(), "⚠️ Failed to delete expired artifact: {}", e);
            continue;
        }
        repo.delete_backup(backup.id).await?;
        removed += 1;
    }

    if removed > 0 {
        info!(target_id, removed, retention_days, "🧹 Removed expired backups");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::store::memory::MemoryRepository;
    use crate::store::models::{Backup, Target};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_artifacts() -> anyhow::Result<()> {
        let repo = MemoryRepository::new();
        let dir = tempdir()?;
        let now = Utc::now();

        let mut target = Target::new("prod", "localhost", 3306, "root", "");
        repo.create_target(&mut target).await?;

        let old_path = dir.path().join("old.sql.gz");
        std::fs::write(&old_path, b"old")?;
        let mut old = Backup::running(target.id, "shop", now - Duration::days(8));
        old.mark_success(&old_path.to_string_lossy(), 3);
        repo.create_backup(&mut old).await?;

        let recent_path = dir.path().join("recent.sql.gz");
        std::fs::write(&recent_path, b"recent")?;
        let mut recent = Backup::running(target.id, "shop", now - Duration::days(6));
        recent.mark_success(&recent_path.to_string_lossy(), 6);
        repo.create_backup(&mut recent).await?;

        // Old but without an artifact: nothing to clean up.
        let mut old_failed = Backup::running(target.id, "shop", now - Duration::days(9));
        old_failed.mark_failed("connection refused");
        repo.create_backup(&mut old_failed).await?;

        let removed = cleanup_expired(&repo, target.id, 7, now).await?;
        assert_eq!(removed, 1);
        assert!(!old_path.exists());
        assert!(recent_path.exists());
        assert!(repo.get_backup(old.id).await.is_err());
        assert!(repo.get_backup(recent.id).await.is_ok());
        assert!(repo.get_backup(old_failed.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_drops_record_when_file_already_gone() -> anyhow::Result<()> {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let mut backup = Backup::running(1, "shop", now - Duration::days(40));
        backup.mark_success("/nonexistent/dumptool/gone.sql", 10);
        repo.create_backup(&mut backup).await?;

        assert_eq!(cleanup_expired(&repo, 1, 30, now).await?, 1);
        assert!(repo.list_backups_by_target(1).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() -> anyhow::Result<()> {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let mut backup = Backup::running(1, "shop", now - Duration::days(400));
        backup.mark_success("/nonexistent/a.sql", 1);
        repo.create_backup(&mut backup).await?;

        assert_eq!(cleanup_expired(&repo, 1, 0, now).await?, 0);
        assert_eq!(repo.list_backups_by_target(1).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_backup_removes_file_and_record() -> anyhow::Result<()> {
        let repo = MemoryRepository::new();
        let dir = tempdir()?;
        let path = dir.path().join("shop.sql.gz");
        std::fs::write(&path, b"dump")?;

        let mut backup = Backup::running(1, "shop", Utc::now());
        backup.mark_success(&path.to_string_lossy(), 4);
        repo.create_backup(&mut backup).await?;

        delete_backup(&repo, backup.id).await?;
        assert!(!path.exists());
        assert!(matches!(repo.get_backup(backup.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(delete_backup(&repo, backup.id).await, Err(AppError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_backup_without_artifact() -> anyhow::Result<()> {
        let repo = MemoryRepository::new();
        let mut failed = Backup::running(1, "shop", Utc::now());
        failed.mark_failed("connection refused");
        repo.create_backup(&mut failed).await?;

        let mut gone = Backup::running(1, "shop", Utc::now());
        gone.mark_success("/nonexistent/dumptool/gone.sql", 1);
        repo.create_backup(&mut gone).await?;

        delete_backup(&repo, failed.id).await?;
        delete_backup(&repo, gone.id).await?;
        assert!(repo.list_backups_by_target(1).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_backup_keeps_record_when_file_cannot_be_removed() -> anyhow::Result<()> {
        let repo = MemoryRepository::new();
        let dir = tempdir()?;
        // A directory in place of the artifact makes remove_file fail.
        let blocker = dir.path().join("not_a_file.sql");
        std::fs::create_dir(&blocker)?;

        let mut backup = Backup::running(1, "shop", Utc::now());
        backup.mark_success(&blocker.to_string_lossy(), 1);
        repo.create_backup(&mut backup).await?;

        assert!(matches!(delete_backup(&repo, backup.id).await, Err(AppError::Io(_))));
        assert!(repo.get_backup(backup.id).await.is_ok());
        Ok(())
    }
}
