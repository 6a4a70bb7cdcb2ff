//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No account satisfies the selectability predicate for the capability.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("no account at index {0}")]
    NotFound(usize),

    #[error("account id already in pool: {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Mint(#[from] session_auth::Error),

    #[error("persistence error: {0}")]
    Persist(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
