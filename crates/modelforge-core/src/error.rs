//! Core error types.

use std::path::PathBuf;

use modelforge_lang::{EditError, NameError};
use thiserror::Error;

/// Broad error category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A model, artifact or field does not exist.
    NotFound,
    /// The request collides with existing state.
    Conflict,
    /// The request is malformed.
    Validation,
    /// Storage, I/O or serialization failure.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Something the command refers to does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// What kind of thing was looked up.
        what: &'static str,
        /// Its name or path.
        name: String,
    },

    /// Duplicate name or concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed request.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Rejected identifier.
    #[error(transparent)]
    InvalidName(#[from] NameError),

    /// Ledger storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// File system error.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be parsed or edited.
    #[error("artifact error: {0}")]
    Artifact(EditError),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Migration failed for a reason other than unapplied model changes.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Validation(_) | Error::InvalidName(_) => ErrorKind::Validation,
            Error::Storage(_)
            | Error::Io { .. }
            | Error::Artifact(_)
            | Error::Json(_)
            | Error::Serialization(_)
            | Error::Deserialization(_)
            | Error::Migration(_) => ErrorKind::Internal,
        }
    }

    /// Missing model, artifact or field.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<EditError> for Error {
    fn from(err: EditError) -> Self {
        match err {
            EditError::NotFound(path) => Error::not_found("artifact", path.display().to_string()),
            EditError::TypeNotFound(name) => Error::not_found("model", name),
            EditError::MemberNotFound { owner, member } => {
                Error::not_found("field", format!("{}.{}", owner, member))
            }
            EditError::Io { path, source } => Error::Io { path, source },
            other => Error::Artifact(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelforge_lang::validate_identifier;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::not_found("model", "Order").kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("dup".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::Serialization("x".into()).kind(), ErrorKind::Internal);

        let name_err: Error = validate_identifier("9lives").unwrap_err().into();
        assert_eq!(name_err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_edit_error_mapping() {
        let err: Error = EditError::TypeNotFound("Order".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "model not found: Order");

        let err: Error = EditError::InvalidSpan(modelforge_lang::Span::new(4, 2)).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
