use thiserror::Error;

/// Errors that can occur within the registry and its store backends.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The key is absent from the store or its TTL has elapsed.
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// A create-if-absent write found a live value already in place.
    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    /// A compare-and-swap write found a different value than expected.
    #[error("Compare failed: {key}")]
    CompareFailed { key: String },

    /// A job or payload name that cannot be mapped onto a single path segment.
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record failed to encode or decode.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }

    /// Short error code string for log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "NOT_FOUND",
            RegistryError::AlreadyExists { .. } => "ALREADY_EXISTS",
            RegistryError::CompareFailed { .. } => "COMPARE_FAILED",
            RegistryError::InvalidName(_) => "INVALID_NAME",
            RegistryError::Database(_) => "DATABASE_ERROR",
            RegistryError::Codec(_) => "CODEC_ERROR",
            RegistryError::LockPoisoned => "LOCK_POISONED",
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
