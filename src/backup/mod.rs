// dumptool/src/backup/mod.rs
pub mod codec;
pub(crate) mod retention;
pub(crate) mod sink;
pub(crate) mod source;
pub mod writer;

use chrono::Utc;
use sqlx::mysql::MySqlConnectOptions;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::DumpConfig;
use crate::crypto::CredentialCipher;
use crate::errors::{AppError, Result};
use crate::store::Repository;
use crate::store::models::{Backup, BackupOptions, DatabaseSelection, Target};
use crate::utils::{artifact_path, connect_options, target_label};
use sink::ArtifactSink;
use source::{MySqlSource, TableKind};
use writer::{DumpWriter, InsertBatcher, quote_identifier};

/// Lists the non-system databases of a server, for picking a target's
/// selection before or after it is registered.
pub async fn discover_databases(options: &MySqlConnectOptions, label: &str) -> Result<Vec<String>> {
    let mut source = MySqlSource::connect(options, label).await?;
    let databases = source.list_databases().await?;
    if let Err(e) = source.close().await {
        warn!("Failed to close listing connection to {}: {}", label, e);
    }
    Ok(databases)
}

/// Produces SQL dump artifacts for targets and records them as backups.
#[derive(Clone)]
pub struct Dumper {
    repo: Arc<dyn Repository>,
    cipher: Arc<dyn CredentialCipher>,
    config: DumpConfig,
}

/// Everything resolved before the first byte is written.
struct PreparedBackup {
    target: Target,
    password: String,
    options: BackupOptions,
    backups: Vec<Backup>,
}

impl Dumper {
    pub fn new(repo: Arc<dyn Repository>, cipher: Arc<dyn CredentialCipher>, config: DumpConfig) -> Self {
        Dumper { repo, cipher, config }
    }

    /// Records one `running` backup per selected database and dumps them in
    /// the background. The returned records are the initial `running` rows;
    /// their terminal state lands in the repository.
    pub async fn create_backup(&self, target_id: i64) -> Result<Vec<Backup>> {
        let prepared = self.prepare(target_id, None).await?;
        let records = prepared.backups.clone();

        let dumper = self.clone();
        tokio::spawn(async move {
            let PreparedBackup { target, password, options, backups } = prepared;
            dumper.execute(&target, &password, &options, backups, None).await;
        });
        Ok(records)
    }

    /// Same as `create_backup` but waits for every database to finish and
    /// returns the terminal records. Work still pending at `deadline` is
    /// abandoned and recorded as failed.
    pub async fn run_backup(
        &self,
        target_id: i64,
        options: &BackupOptions,
        deadline: Option<Instant>,
    ) -> Result<Vec<Backup>> {
        let prepared = self.prepare(target_id, Some(options.clone())).await?;
        let PreparedBackup { target, password, options, backups } = prepared;
        Ok(self.execute(&target, &password, &options, backups, deadline).await)
    }

    async fn prepare(&self, target_id: i64, options: Option<BackupOptions>) -> Result<PreparedBackup> {
        let target = self.repo.get_target(target_id).await?;
        let options = options.unwrap_or_else(|| BackupOptions::for_target(&target));
        let password = self.cipher.decrypt(&target.password_enc)?;

        let databases = self.resolve_databases(&target, &password, &options).await?;
        if databases.is_empty() {
            return Err(AppError::Backup(format!(
                "no databases selected for target '{}'",
                target.name
            )));
        }
        info!(target = %target.name, ?databases, "📦 Starting backup");

        let started_at = Utc::now();
        let mut backups = Vec::with_capacity(databases.len());
        for database in &databases {
            let mut backup = Backup::running(target.id, database, started_at);
            self.repo.create_backup(&mut backup).await?;
            backups.push(backup);
        }
        Ok(PreparedBackup { target, password, options, backups })
    }

    async fn resolve_databases(&self, target: &Target, password: &str, options: &BackupOptions) -> Result<Vec<String>> {
        if !options.databases.is_empty() {
            return Ok(options.databases.clone());
        }
        match &target.database_selection {
            DatabaseSelection::Selected(databases) => Ok(databases.clone()),
            DatabaseSelection::All => {
                discover_databases(&connect_options(target, password, None), &target_label(target)).await
            }
        }
    }

    /// Non-system databases currently on a stored target's server.
    pub async fn discover_target_databases(&self, target_id: i64) -> Result<Vec<String>> {
        let target = self.repo.get_target(target_id).await?;
        let password = self.cipher.decrypt(&target.password_enc)?;
        discover_databases(&connect_options(&target, &password, None), &target_label(&target)).await
    }

    /// Dumps each backup's database in order, persisting every terminal
    /// state, then applies retention.
    async fn execute(
        &self,
        target: &Target,
        password: &str,
        options: &BackupOptions,
        backups: Vec<Backup>,
        deadline: Option<Instant>,
    ) -> Vec<Backup> {
        let mut finished = Vec::with_capacity(backups.len());
        for mut backup in backups {
            let path = artifact_path(
                &self.config.backup_dir,
                &target.name,
                &backup.database_name,
                backup.started_at,
                options.compress,
            );

            let outcome = match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    Err(AppError::Cancelled("deadline exceeded before dump started".to_string()))
                }
                Some(deadline) => {
                    let dump = self.dump_database(target, password, &backup.database_name, &path, options);
                    match tokio::time::timeout_at(deadline, dump).await {
                        Ok(result) => result,
                        Err(_) => Err(AppError::Cancelled("deadline exceeded during dump".to_string())),
                    }
                }
                None => {
                    self.dump_database(target, password, &backup.database_name, &path, options)
                        .await
                }
            };

            match outcome {
                Ok(size) => {
                    info!(
                        database = %backup.database_name,
                        path = %path.display(),
                        size,
                        "✅ Backup completed"
                    );
                    backup.mark_success(&path.to_string_lossy(), i64::try_from(size).unwrap_or(i64::MAX));
                }
                Err(e) => {
                    error!(database = %backup.database_name, "❌ Backup failed: {}", e);
                    backup.mark_failed(e.to_string());
                }
            }
            if let Err(e) = self.repo.update_backup(&backup).await {
                error!(backup_id = backup.id, "Failed to persist backup state: {}", e);
            }
            finished.push(backup);
        }

        if target.retention_days > 0 {
            if let Err(e) = retention::cleanup_expired(self.repo.as_ref(), target.id, target.retention_days, Utc::now()).await {
                warn!(target = %target.name, "⚠️ Retention cleanup failed: {}", e);
            }
        }
        finished
    }

    /// Writes one database to `path` under a consistent snapshot and returns
    /// the artifact size.
    async fn dump_database(
        &self,
        target: &Target,
        password: &str,
        database: &str,
        path: &Path,
        options: &BackupOptions,
    ) -> Result<u64> {
        let label = format!("{}/{}", target_label(target), database);
        let mut source = MySqlSource::connect(&connect_options(target, password, Some(database)), &label).await?;
        source.begin_snapshot().await?;

        let mut writer = DumpWriter::new(ArtifactSink::create(path, options.compress)?);
        writer.write_header(&target.host, database)?;

        let tables = source.list_tables().await?;
        for table in tables.iter().filter(|t| t.kind == TableKind::Table) {
            if options.include_structure {
                let ddl = source.create_statement(table).await?;
                writer.write_table_structure(&table.name, &ddl)?;
            }
            if !options.include_data {
                continue;
            }

            let columns = source.insertable_columns(database, &table.name).await?;
            if columns.is_empty() {
                continue;
            }
            let quoted: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
            let mut batcher = InsertBatcher::new(&table.name, &quoted, self.config.batch_size);
            source
                .for_each_row(&table.name, &columns, |values| {
                    batcher.push(&mut writer, codec::format_row(&values))?;
                    Ok(())
                })
                .await?;
            let rows = batcher.finish(&mut writer)?;
            info!(database, table = %table.name, rows, "Dumped table");
        }

        if options.include_structure {
            for view in tables.iter().filter(|t| t.kind == TableKind::View) {
                let ddl = source.create_statement(view).await?;
                writer.write_view(&view.name, &ddl)?;
            }
        }

        writer.write_footer()?;
        writer.flush()?;
        source.end_snapshot().await?;
        if let Err(e) = source.close().await {
            warn!("Failed to close connection to {}: {}", label, e);
        }

        let size = writer.into_inner().finish()?;
        Ok(size)
    }
}
