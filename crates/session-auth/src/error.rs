//! Error types for handshake and token minting

/// Failure class of an upstream outcome, used by the pool to pick a cooldown.
///
/// - `Auth`: the credential is rejected or unusable (401/403, malformed handshake)
/// - `RateLimit`: 429, the credential is fine but throttled
/// - `Request`: network failure, timeout, or any other upstream status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    RateLimit,
    Request,
}

/// Errors from minting a bearer token for one account.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing session fields: {0}")]
    MissingField(String),

    #[error("handshake request failed: {0}")]
    Request(String),

    #[error("credential rejected: {message}")]
    Auth { status: Option<u16>, message: String },

    #[error("rate limited (429): {message}")]
    RateLimited { message: String },

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Classify this error into the pool's failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::MissingField(_) | Error::Auth { .. } | Error::InvalidKey(_) => {
                FailureKind::Auth
            }
            Error::RateLimited { .. } => FailureKind::RateLimit,
            Error::Request(_) | Error::Upstream { .. } => FailureKind::Request,
        }
    }

    /// HTTP status of the upstream response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. } => *status,
            Error::RateLimited { .. } => Some(429),
            Error::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build the error for a non-200 upstream status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Error::Auth {
                status: Some(status),
                message,
            },
            429 => Error::RateLimited { message },
            _ => Error::Upstream { status, message },
        }
    }
}

/// Result alias for minting operations.
pub type Result<T> = std::result::Result<T, Error>;
