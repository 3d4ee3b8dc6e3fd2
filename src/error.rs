use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn job_not_found(id: Uuid) -> Self {
        AppError::NotFound(format!("Job {id} not found"))
    }
}

/// Faults raised by a [`Transport`](crate::source::Transport) before any
/// response status is available.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Session acquisition failures. Any of these during job bootstrap is fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("landing page request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("landing page returned status {0}")]
    Status(u16),

    #[error("no anti-forgery token found in meta tag, form field or cookies")]
    TokenNotFound,

    #[error("no verification code configured and none could be extracted")]
    VerificationCodeMissing,
}
