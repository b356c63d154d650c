use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocuDbError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Validation error at '{path}': {message}")]
    Validation { path: String, message: String },

    #[error("Document not found: {table}/{key}")]
    NotFound { table: String, key: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("{0}")]
    Handler(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl DocuDbError {
    /// Build a validation error from a field path and message.
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        DocuDbError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a handler error carrying an application-level message.
    pub fn handler(message: impl Into<String>) -> Self {
        DocuDbError::Handler(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DocuDbError>;
