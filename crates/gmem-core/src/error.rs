//! Error types for gmem-core.
//!
//! `MemoryError` is what every Manager operation returns. Backends and audit
//! sinks report `StorageError`, which the Manager maps into `MemoryError`
//! with the operation context attached.

use thiserror::Error;

use crate::types::{Operation, Tier};

/// Result type alias for Manager operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Result type alias for backend and audit sink operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Where an error happened, for audit correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: Operation,
    pub tier: Option<Tier>,
    pub entity_id: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: Operation, tier: Option<Tier>, entity_id: Option<&str>) -> Self {
        Self {
            operation,
            tier,
            entity_id: entity_id.map(String::from),
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(tier) = self.tier {
            write!(f, " on {}", tier)?;
        }
        if let Some(id) = &self.entity_id {
            write!(f, " [{}]", id)?;
        }
        Ok(())
    }
}

/// Fieldless error kind callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    AccessDenied,
    NotFound,
    Conflict,
    Integrity,
    BackendUnavailable,
}

/// Memory core errors
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed or missing entity fields (caller bug)
    #[error("validation failed ({context}): {message}")]
    Validation { context: ErrorContext, message: String },

    /// Policy refusal
    #[error("access denied ({context}): {reason}")]
    AccessDenied { context: ErrorContext, reason: String },

    /// No such id/tier/version
    #[error("not found ({context})")]
    NotFound { context: ErrorContext },

    /// Concurrent version race, safe to retry after re-reading
    #[error("version conflict ({context}): expected version {expected}, found {actual}")]
    Conflict {
        context: ErrorContext,
        expected: u64,
        actual: u64,
    },

    /// Checksum mismatch or undecodable stored payload
    #[error("integrity failure ({context}): {message}")]
    Integrity { context: ErrorContext, message: String },

    /// Storage engine or audit sink unreachable
    #[error("backend unavailable ({context}): {message}")]
    BackendUnavailable { context: ErrorContext, message: String },
}

impl MemoryError {
    pub fn validation(context: ErrorContext, message: impl Into<String>) -> Self {
        Self::Validation {
            context,
            message: message.into(),
        }
    }

    pub fn access_denied(context: ErrorContext, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            context,
            reason: reason.into(),
        }
    }

    pub fn not_found(context: ErrorContext) -> Self {
        Self::NotFound { context }
    }

    pub fn integrity(context: ErrorContext, message: impl Into<String>) -> Self {
        Self::Integrity {
            context,
            message: message.into(),
        }
    }

    pub fn unavailable(context: ErrorContext, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            context,
            message: message.into(),
        }
    }

    /// Map a storage error into the Manager taxonomy
    pub fn from_storage(context: ErrorContext, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::NotFound { context },
            StorageError::Conflict { expected, actual } => Self::Conflict {
                context,
                expected,
                actual,
            },
            StorageError::Serialization(message) => Self::Integrity { context, message },
            other => Self::BackendUnavailable {
                context,
                message: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Validation { context, .. }
            | Self::AccessDenied { context, .. }
            | Self::NotFound { context }
            | Self::Conflict { context, .. }
            | Self::Integrity { context, .. }
            | Self::BackendUnavailable { context, .. } => context,
        }
    }

    /// Conflicts and unavailable backends may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::BackendUnavailable
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Storage-layer errors (tier backends and audit sinks)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new(Operation::Retrieve, Some(Tier::Episodic), Some("abc"));
        let err = MemoryError::not_found(ctx);
        assert!(err.is_not_found());
        assert!(err.to_string().contains("retrieve on episodic [abc]"));
    }

    #[test]
    fn test_storage_mapping() {
        let ctx = ErrorContext::new(Operation::AppendVersion, Some(Tier::Semantic), Some("x"));
        let err = MemoryError::from_storage(
            ctx.clone(),
            StorageError::Conflict {
                expected: 2,
                actual: 3,
            },
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());
        assert_eq!(err.context(), &ctx);

        let err = MemoryError::from_storage(ctx.clone(), StorageError::Unavailable("down".into()));
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

        let err = MemoryError::from_storage(ctx, StorageError::Serialization("bad".into()));
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!err.is_retryable());
    }
}
