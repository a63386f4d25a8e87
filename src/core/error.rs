use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entity '{0}' not found in '{1}'")]
    NotFound(String, String),

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Cache namespace '{0}' is corrupted: {1}")]
    CacheCorruption(String, String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("No parent scope is active")]
    NoActiveScope,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable(message.into())
    }

    /// Errors that surface to the caller of a mutation instead of being absorbed.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NoActiveScope)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
