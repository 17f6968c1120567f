// dumptool/src/restore/executor.rs
use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Connection, Executor, MySqlConnection};

use crate::backup::writer::quote_identifier;
use crate::errors::{AppError, Result};

/// Runs restore statements, one at a time, in arrival order.
#[async_trait]
pub trait StatementExecutor: Send {
    async fn execute(&mut self, sql: &str) -> Result<()>;
}

/// A single pinned connection; session state set by earlier statements
/// (`SET FOREIGN_KEY_CHECKS=0`, `SET NAMES`) stays in effect for later ones.
pub struct MySqlExecutor {
    conn: MySqlConnection,
}

impl MySqlExecutor {
    pub async fn connect(options: &MySqlConnectOptions, label: &str) -> Result<Self> {
        let mut conn = MySqlConnection::connect_with(options)
            .await
            .map_err(|e| AppError::connection(format!("failed to connect to {}", label), e))?;
        conn.ping()
            .await
            .map_err(|e| AppError::connection(format!("failed to ping {}", label), e))?;
        Ok(MySqlExecutor { conn })
    }

    pub async fn database_exists(&mut self, name: &str) -> Result<bool> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?)")
                .bind(name)
                .fetch_one(&mut self.conn)
                .await?;
        Ok(exists != 0)
    }

    pub async fn create_database(&mut self, name: &str) -> Result<()> {
        let sql = format!(
            "CREATE DATABASE {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            quote_identifier(name)
        );
        self.conn
            .execute(sql.as_str())
            .await
            .map_err(|e| AppError::Restore(format!("failed to create database '{}': {}", name, e)))?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl StatementExecutor for MySqlExecutor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        // Plain &str goes over the text protocol, which accepts every
        // statement kind the dump contains (LOCK, SET, DDL).
        self.conn.execute(sql).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records what it is asked to run; fails any statement containing
    /// `fail_on` with `fail_message`.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub executed: Vec<String>,
        pub fail_on: Option<String>,
        pub fail_message: String,
    }

    #[async_trait]
    impl StatementExecutor for RecordingExecutor {
        async fn execute(&mut self, sql: &str) -> Result<()> {
            if let Some(marker) = &self.fail_on {
                if sql.contains(marker.as_str()) {
                    return Err(AppError::Restore(self.fail_message.clone()));
                }
            }
            self.executed.push(sql.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recording_executor_fails_on_marker() {
        let mut exec = RecordingExecutor {
            fail_on: Some("boom".into()),
            fail_message: "nope".into(),
            ..Default::default()
        };
        assert!(exec.execute("SELECT 1").await.is_ok());
        assert!(exec.execute("SELECT boom").await.is_err());
        assert_eq!(exec.executed, vec!["SELECT 1".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_a_connection_error() {
        let options = MySqlConnectOptions::new().host("127.0.0.1").port(1).username("root");
        let result = MySqlExecutor::connect(&options, "127.0.0.1:1").await;
        assert!(matches!(result, Err(AppError::Connection(_))));
    }
}
