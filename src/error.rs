use thiserror::Error;

/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Database / replication
    // =========
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Postgres replication connection error: {0}")]
    Replication(#[from] tokio_postgres::Error),

    #[error("Malformed pgoutput message: {0}")]
    Protocol(String),

    // =========
    // Serialization / codec
    // =========
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    // =========
    // Metrics / HTTP
    // =========
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("HTTP transport error: {0}")]
    Http(String),

    // =========
    // Application-domain errors
    // =========
    #[error("message batch is empty")]
    EmptyBatch,

    #[error("bus message payload is empty")]
    EmptyMessage,

    #[error("no transaction in scope for this write")]
    MissingTransaction,

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("write affected zero rows for batch {0}")]
    NoRowsAffected(String),

    #[error("internal job bus has been shut down")]
    BusShutdown,

    #[error("forward job timed out")]
    JobTimeout,

    /// Wraps an error that the retry middleware must never retry: a poison
    /// message, a decode failure, or anything else that will not succeed on
    /// a second attempt.
    #[error("unrecoverable error: {0}")]
    Unrecoverable(Box<AppError>),

    #[error("failed to spawn task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("shutdown requested")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for errors the forwarder's retry policy must never retry.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            AppError::Unrecoverable(_) | AppError::EmptyBatch | AppError::EmptyMessage
        )
    }

    pub fn unrecoverable(self) -> AppError {
        AppError::Unrecoverable(Box::new(self))
    }
}
