//! Error types for the onboarding agent.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Ticket error: {0}")]
    Ticket(#[from] TicketError),
}

impl Error {
    /// Whether this error means the session id is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Session(SessionError::NotFound { .. }))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid stage catalog: {0}")]
    InvalidCatalog(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// An update tried to break a session invariant. The update was rejected
    /// and the prior state kept.
    #[error("Store corruption on session {id}: {reason}")]
    StoreCorruption { id: String, reason: String },
}

/// Ticket collaborator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    /// Timeouts, 5xx-class responses, rate limiting.
    #[error("Transient ticket service failure: {reason}")]
    Retryable { reason: String },

    /// Bad credentials, malformed payloads.
    #[error("Permanent ticket service failure: {reason}")]
    Fatal { reason: String },

    #[error("Ticket sync disabled for session {session_id} after a fatal failure")]
    SyncDisabled { session_id: String },

    /// A create was sent for the session but its outcome is unknown.
    #[error("Ticket create for session {session_id} was never confirmed; link the ticket to resume sync")]
    CreateUnconfirmed { session_id: String },
}

impl TicketError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Errors from the HTTP API client used by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Malformed API response: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the onboarding agent.
pub type Result<T> = std::result::Result<T, Error>;
