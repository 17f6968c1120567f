use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backup operation failed: {0}")]
    Backup(String),

    #[error("Restore operation failed: {0}")]
    Restore(String),

    #[error("error at line {line}: {message}\nStatement: {excerpt}")]
    Statement {
        line: usize,
        message: String,
        excerpt: String,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl AppError {
    /// Wraps a connect/ping failure so it reads as a connectivity problem
    /// rather than a generic driver error.
    pub fn connection(context: impl std::fmt::Display, err: sqlx::Error) -> Self {
        AppError::Connection(format!("{}: {}", context, err))
    }
}
