use axum::http::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network blip or temporarily unavailable dependency.
    Transient,
    /// Validation, not-found, conflict and everything else.
    Permanent,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported field type for '{field}': {kind}")]
    UnsupportedFieldType { field: String, kind: &'static str },

    #[error("Operation '{label}' timed out after {limit_ms}ms")]
    Timeout { label: String, limit_ms: u64 },

    #[error("Operation '{label}' failed after {attempts} attempts: {source}")]
    RetryExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    #[error("Upstream {service} error: {message}")]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
        transient: bool,
    },

    #[error("Shared store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// Postgres SQLSTATEs worth retrying: serialization failure, deadlock,
// admin/crash shutdown, cannot connect now, too many connections.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "57P01", "57P02", "57P03", "53300"];

impl AppError {
    /// Classifies the error for the retry policy.
    pub fn class(&self) -> ErrorClass {
        let transient = match self {
            AppError::Database(e) => is_transient_sqlx(e),
            AppError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            AppError::Timeout { .. } => true,
            AppError::StoreUnavailable(_) => true,
            AppError::Upstream { transient, .. } => *transient,
            _ => false,
        };

        if transient {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True for a timeout, including one that exhausted the retry budget.
    pub fn is_timeout(&self) -> bool {
        match self {
            AppError::Timeout { .. } => true,
            AppError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status a handler should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::UnsupportedFieldType { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Timeout { .. } | AppError::RetryExhausted { .. } | AppError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Upstream { transient: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::UnsupportedFieldType { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            AppError::Upstream { .. } => "UPSTREAM_ERROR",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&&*code))
            .unwrap_or(false),
        _ => false,
    }
}
