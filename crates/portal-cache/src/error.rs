//! Cache-related error types

use std::sync::Arc;

use thiserror::Error;

/// Cache operation errors
///
/// Cloneable so a single failed attempt can be handed to every caller that
/// joined the same in-flight `get_or_add`.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Factory failed: {message}")]
    Factory { message: String },

    #[error("Lock for key '{key}' still contended after {attempts} attempts")]
    LockContention { key: String, attempts: u32 },

    #[error("Watch error: {message}")]
    Watch { message: String },

    #[error("Invalid cache configuration: {message}")]
    InvalidConfig { message: String },
}

impl CacheError {
    /// Wrap an arbitrary error raised by a value factory
    pub fn factory(err: impl std::fmt::Display) -> Self {
        CacheError::Factory {
            message: err.to_string(),
        }
    }

    /// Wrap an error raised by a backing-store adapter
    pub fn storage(err: impl std::fmt::Display) -> Self {
        CacheError::Storage {
            message: err.to_string(),
        }
    }

    /// The underlying IO error kind, if this is an IO error
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            CacheError::Io(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}

impl From<notify::Error> for CacheError {
    fn from(err: notify::Error) -> Self {
        CacheError::Watch {
            message: err.to_string(),
        }
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let err: CacheError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::NotFound));

        let cloned = err.clone();
        assert_eq!(cloned.io_kind(), Some(std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_factory_error_message() {
        let err = CacheError::factory("token endpoint returned 503");
        assert_eq!(
            err.to_string(),
            "Factory failed: token endpoint returned 503"
        );
        assert_eq!(err.io_kind(), None);
    }
}
