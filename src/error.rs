//! Error types for risk triage.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl Error {
    /// Whether this error means the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Database(DatabaseError::NotFound { .. }))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Database-related errors.
///
/// `Pool` and `Query` are infrastructure failures and are left to the
/// caller's retry policy. `NotFound` is a caller error and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    pub fn thread_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "Thread".to_string(),
            id: id.to_string(),
        }
    }

    pub fn deal_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "Deal".to_string(),
            id: id.to_string(),
        }
    }
}

/// Result type alias for risk triage.
pub type Result<T> = std::result::Result<T, Error>;
