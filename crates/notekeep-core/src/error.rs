//! Error types for notekeep.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{AttachmentState, TypeCategory};

/// Result type alias using notekeep's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for notekeep operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Entity absent or not owned by the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attachment absent, not owned by the caller, or not in the required state
    #[error("Attachment not found or access denied: {0}")]
    NotFoundOrForbidden(Uuid),

    /// File extension is on neither allow-list
    #[error("Unsupported file type: {extension:?}")]
    UnsupportedType { extension: Option<String> },

    /// File exceeds the per-category size limit
    #[error("File too large: {size_bytes} bytes exceeds {category} limit of {max_bytes} bytes")]
    TooLarge {
        category: TypeCategory,
        size_bytes: i64,
        max_bytes: i64,
    },

    /// Upload would push the user past their storage quota
    #[error("Storage quota exceeded: {used_bytes} used + {requested_bytes} requested > {limit_bytes}")]
    QuotaExceeded {
        used_bytes: i64,
        requested_bytes: i64,
        limit_bytes: i64,
    },

    /// Blob store write failed
    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    /// Transaction or commit failed
    #[error("Persist failed: {0}")]
    PersistFailed(String),

    /// Operation attempted on an attachment in the wrong lifecycle state
    #[error("Invalid state for attachment {id}: expected {expected}, found {}", found.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()))]
    InvalidState {
        id: Uuid,
        expected: AttachmentState,
        found: Option<AttachmentState>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, machine-readable error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    UnsupportedType,
    TooLarge,
    QuotaExceeded,
    StorageWriteFailed,
    PersistFailed,
    InvalidState,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// Stable code for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::UnsupportedType => "unsupported_type",
            Self::TooLarge => "too_large",
            Self::QuotaExceeded => "quota_exceeded",
            Self::StorageWriteFailed => "storage_write_failed",
            Self::PersistFailed => "persist_failed",
            Self::InvalidState => "invalid_state",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        }
    }

    /// Infrastructure failures. The engine never retries these itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageWriteFailed | Self::PersistFailed)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::NotFoundOrForbidden(_) => ErrorKind::NotFound,
            Error::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Error::TooLarge { .. } => ErrorKind::TooLarge,
            Error::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Error::StorageWriteFailed(_) => ErrorKind::StorageWriteFailed,
            Error::PersistFailed(_) | Error::Database(_) => ErrorKind::PersistFailed,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Config(_) | Error::Internal(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Human-readable message safe to show to end users.
    ///
    /// Never includes storage paths, SQL, or driver messages.
    pub fn public_message(&self) -> String {
        match self {
            Error::NotFound(_) | Error::NotFoundOrForbidden(_) => {
                "The requested item does not exist or you do not have access to it".to_string()
            }
            Error::UnsupportedType { extension } => match extension {
                Some(ext) => format!("Files of type .{} are not supported", ext),
                None => "Files without an extension are not supported".to_string(),
            },
            Error::TooLarge {
                category,
                max_bytes,
                ..
            } => format!(
                "The {} exceeds the maximum size of {} bytes",
                category, max_bytes
            ),
            Error::QuotaExceeded {
                used_bytes,
                limit_bytes,
                ..
            } => format!(
                "Not enough storage space: {} of {} bytes already used",
                used_bytes, limit_bytes
            ),
            Error::StorageWriteFailed(_) => "The file could not be stored, please try again".to_string(),
            Error::PersistFailed(_) | Error::Database(_) => {
                "The change could not be saved, please try again".to_string()
            }
            Error::InvalidState { expected, .. } => {
                format!("The attachment must be {} for this operation", expected)
            }
            Error::InvalidInput(msg) => format!("Invalid input: {}", msg),
            Error::Config(_) | Error::Internal(_) | Error::Io(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("note".to_string());
        assert_eq!(err.to_string(), "Not found: note");
    }

    #[test]
    fn test_error_display_quota_exceeded() {
        let err = Error::QuotaExceeded {
            used_bytes: 300,
            requested_bytes: 250,
            limit_bytes: 500,
        };
        assert_eq!(
            err.to_string(),
            "Storage quota exceeded: 300 used + 250 requested > 500"
        );
    }

    #[test]
    fn test_error_display_invalid_state_without_record() {
        let id = Uuid::nil();
        let err = Error::InvalidState {
            id,
            expected: AttachmentState::SoftDeleted,
            found: None,
        };
        assert_eq!(
            err.to_string(),
            format!(
                "Invalid state for attachment {}: expected soft_deleted, found none",
                id
            )
        );
    }

    #[test]
    fn test_not_found_variants_share_kind() {
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::NotFoundOrForbidden(Uuid::new_v4()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::UnsupportedType.as_str(), "unsupported_type");
        assert_eq!(ErrorKind::TooLarge.as_str(), "too_large");
        assert_eq!(ErrorKind::QuotaExceeded.as_str(), "quota_exceeded");
        assert_eq!(ErrorKind::StorageWriteFailed.as_str(), "storage_write_failed");
        assert_eq!(ErrorKind::PersistFailed.as_str(), "persist_failed");
        assert_eq!(ErrorKind::InvalidState.as_str(), "invalid_state");
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::StorageWriteFailed.is_transient());
        assert!(ErrorKind::PersistFailed.is_transient());
        assert!(!ErrorKind::QuotaExceeded.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
    }

    #[test]
    fn test_database_error_maps_to_persist_failed() {
        let err = Error::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::PersistFailed);
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = Error::StorageWriteFailed("/var/lib/notekeep/blobs/ab/cd/x.bin: EACCES".into());
        assert!(!err.public_message().contains("/var/lib"));

        let err = Error::PersistFailed("insert into attachment violates fk".into());
        assert!(!err.public_message().contains("insert"));

        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/secret/path",
        ));
        assert!(!err.public_message().contains("/secret"));
    }

    #[test]
    fn test_public_message_unsupported_type() {
        let err = Error::UnsupportedType {
            extension: Some("exe".into()),
        };
        assert_eq!(err.public_message(), "Files of type .exe are not supported");

        let err = Error::UnsupportedType { extension: None };
        assert!(err.public_message().contains("without an extension"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
