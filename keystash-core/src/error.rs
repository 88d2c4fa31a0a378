//! Error types for the store engine and its backends.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Failure raised by a [`DurableBackend`](crate::backend::DurableBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    /// I/O error from a file-based backend.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stored bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The backend refused or could not serve the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias for backend results.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors produced by the store engine.
///
/// The `Load`, `Persist`, `Reconcile` and `Remove` variants each wrap the
/// backend failure that caused them. None of them ever reach the caller of
/// a synchronous `set`/`update`; those are routed to the store's
/// [`ErrorHandler`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Initial hydration failed; the store fell back to its default.
    #[error("failed to load `{key}`: {source}")]
    Load {
        key: String,
        #[source]
        source: BackendError,
    },

    /// A write to the backend failed; memory stays authoritative.
    #[error("failed to persist `{key}`: {source}")]
    Persist {
        key: String,
        #[source]
        source: BackendError,
    },

    /// A poll read failed; the tick is skipped.
    #[error("failed to reconcile `{key}`: {source}")]
    Reconcile {
        key: String,
        #[source]
        source: BackendError,
    },

    /// A delete failed; memory was still reset to the default.
    #[error("failed to remove `{key}`: {source}")]
    Remove {
        key: String,
        #[source]
        source: BackendError,
    },

    /// The backend holds a value that does not deserialize into the store's type.
    #[error("value stored under `{key}` does not match the store type: {message}")]
    Decode { key: String, message: String },

    /// The in-memory value could not be serialized for persistence.
    #[error("value for `{key}` could not be serialized: {message}")]
    Encode { key: String, message: String },

    /// The key is already live in the registry with another value type.
    #[error("key `{key}` is already attached with a different value type")]
    TypeMismatch { key: String },

    /// A store was constructed outside of a tokio runtime.
    #[error("no tokio runtime available to drive store `{key}`")]
    NoRuntime { key: String },
}

impl StoreError {
    /// The key the error relates to.
    pub fn key(&self) -> &str {
        match self {
            Self::Load { key, .. }
            | Self::Persist { key, .. }
            | Self::Reconcile { key, .. }
            | Self::Remove { key, .. }
            | Self::Decode { key, .. }
            | Self::Encode { key, .. }
            | Self::TypeMismatch { key }
            | Self::NoRuntime { key } => key,
        }
    }

    /// Whether the failure originated in the backend.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::Load { .. } | Self::Persist { .. } | Self::Reconcile { .. } | Self::Remove { .. }
        )
    }
}

/// Convenience alias used throughout the store engine.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Callback that receives errors from fire-and-forget store paths.
pub type ErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// The handler installed when the caller does not provide one.
///
/// Logs the error at `warn` level.
pub fn log_errors() -> ErrorHandler {
    Arc::new(|err: &StoreError| {
        tracing::warn!(key = err.key(), error = %err, "store error");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_reports_key() {
        let err = StoreError::Persist {
            key: "theme".to_string(),
            source: BackendError::Unavailable("quota".to_string()),
        };
        assert_eq!(err.key(), "theme");
        assert!(err.is_backend());
        assert_eq!(
            err.to_string(),
            "failed to persist `theme`: backend unavailable: quota"
        );
    }

    #[test]
    fn type_mismatch_is_not_a_backend_error() {
        let err = StoreError::TypeMismatch {
            key: "count".to_string(),
        };
        assert!(!err.is_backend());
    }
}
