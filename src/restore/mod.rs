// dumptool/src/restore/mod.rs
pub(crate) mod executor;
pub(crate) mod splitter;

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crypto::CredentialCipher;
use crate::errors::{AppError, Result};
use crate::store::Repository;
use crate::store::models::BackupStatus;
use crate::utils::{connect_options, target_label};
use executor::{MySqlExecutor, StatementExecutor};
use splitter::{Action, StatementSplitter, classify};

const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub executed: usize,
    pub skipped: usize,
}

/// Replays an artifact stream against `executor`, stopping at the first
/// failing statement.
pub async fn replay<R, E>(reader: R, executor: &mut E) -> Result<ReplayStats>
where
    R: BufRead + Send,
    E: StatementExecutor + ?Sized,
{
    let mut stats = ReplayStats::default();
    let mut statements = StatementSplitter::new(reader);

    while let Some(statement) = statements.next_statement()? {
        match classify(&statement.sql) {
            Action::Skip => stats.skipped += 1,
            Action::Execute(sql) => {
                if let Err(e) = executor.execute(&sql).await {
                    return Err(AppError::Statement {
                        line: statement.line,
                        message: explain_server_error(&e.to_string()),
                        excerpt: statement.sql.chars().take(EXCERPT_CHARS).collect(),
                    });
                }
                stats.executed += 1;
            }
        }
    }
    Ok(stats)
}

/// Prefixes the two server errors users most often hit with what to do
/// about them.
fn explain_server_error(message: &str) -> String {
    if message.contains("Unknown database") {
        format!("database does not exist - please create it first: {}", message)
    } else if message.contains("Access denied") {
        format!("access denied - check user permissions: {}", message)
    } else {
        message.to_string()
    }
}

/// Replays successful backup artifacts into their source database.
pub struct Restorer {
    repo: Arc<dyn Repository>,
    cipher: Arc<dyn CredentialCipher>,
}

impl Restorer {
    pub fn new(repo: Arc<dyn Repository>, cipher: Arc<dyn CredentialCipher>) -> Self {
        Restorer { repo, cipher }
    }

    pub async fn restore(&self, backup_id: i64, create_database_if_missing: bool) -> Result<ReplayStats> {
        let backup = self.repo.get_backup(backup_id).await?;
        if backup.status != BackupStatus::Success {
            return Err(AppError::Restore(format!(
                "backup {} cannot be restored: status is {}",
                backup_id,
                backup.status.as_str()
            )));
        }
        if backup.database_name.is_empty() {
            return Err(AppError::Restore(
                "backup does not specify a database name - this may be an old backup format".to_string(),
            ));
        }
        let path = Path::new(&backup.file_path);
        if backup.file_path.is_empty() || !path.exists() {
            return Err(AppError::NotFound(format!("backup file not found: {}", backup.file_path)));
        }

        let target = self.repo.get_target(backup.target_id).await?;
        let password = self.cipher.decrypt(&target.password_enc)?;
        let reader = open_artifact(path)?;
        let database = backup.database_name.as_str();
        let label = target_label(&target);

        info!(backup_id, database, path = %path.display(), "🔄 Starting restore");

        let mut admin = MySqlExecutor::connect(&connect_options(&target, &password, None), &label).await?;
        if !admin.database_exists(database).await? {
            if !create_database_if_missing {
                return Err(AppError::Restore(format!(
                    "target database '{}' does not exist - please create it first or enable the create-database option",
                    database
                )));
            }
            info!(database, "Creating missing database");
            admin.create_database(database).await?;
        }
        if let Err(e) = admin.close().await {
            warn!("Failed to close admin connection to {}: {}", label, e);
        }

        let mut executor =
            MySqlExecutor::connect(&connect_options(&target, &password, Some(database)), &label).await?;
        let stats = replay(reader, &mut executor).await?;
        if let Err(e) = executor.close().await {
            warn!("Failed to close restore connection to {}: {}", label, e);
        }

        info!(
            backup_id,
            database,
            executed = stats.executed,
            skipped = stats.skipped,
            "✅ Restore completed"
        );
        Ok(stats)
    }
}

/// Opens an artifact, decompressing when the name ends in `.gz`.
fn open_artifact(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let gzipped = path.extension().is_some_and(|ext| ext == "gz");
    debug!(path = %path.display(), gzipped, "opening artifact");
    Ok(if gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}
