use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RecordId;
use crate::session::job::SessionState;

#[derive(Error, Debug)]
pub enum PressaError {
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("truncated input: needed {expected} bytes, {available} available")]
    TruncatedInput { expected: u64, available: u64 },

    #[error("duplicate ingest: {0}")]
    Duplicate(String),

    #[error("record {0} is busy")]
    RecordBusy(RecordId),

    #[error("unknown record: {0}")]
    UnknownRecord(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid job transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Stable, caller-facing error codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IoError,
    CorruptStream,
    TruncatedInput,
    Duplicate,
    RecordBusy,
    UnknownRecord,
    Cancelled,
    InvalidRequest,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::CorruptStream => "CORRUPT_STREAM",
            ErrorCode::TruncatedInput => "TRUNCATED_INPUT",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::RecordBusy => "RECORD_BUSY",
            ErrorCode::UnknownRecord => "UNKNOWN_RECORD",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PressaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PressaError::Io(_) => ErrorCode::IoError,
            PressaError::CorruptStream(_) => ErrorCode::CorruptStream,
            PressaError::TruncatedInput { .. } => ErrorCode::TruncatedInput,
            PressaError::Duplicate(_) => ErrorCode::Duplicate,
            PressaError::RecordBusy(_) => ErrorCode::RecordBusy,
            PressaError::UnknownRecord(_) => ErrorCode::UnknownRecord,
            PressaError::Cancelled => ErrorCode::Cancelled,
            PressaError::Config(_) => ErrorCode::InvalidRequest,
            PressaError::Catalog(_) | PressaError::InvalidTransition { .. } => ErrorCode::Internal,
        }
    }

    /// Message safe to show across the engine boundary: no storage paths,
    /// no OS detail beyond the error kind.
    pub fn public_message(&self) -> String {
        match self {
            PressaError::Io(e) => format!("storage I/O failure ({})", e.kind()),
            PressaError::Catalog(_) | PressaError::InvalidTransition { .. } => {
                "internal engine error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        PressaError::CorruptStream(msg.into())
    }
}

// `Read`/`Write` adapters smuggle a PressaError through std::io::Error;
// unwrap it again so callers see the original variant.
impl From<std::io::Error> for PressaError {
    fn from(e: std::io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<PressaError>()) {
            return e
                .into_inner()
                .and_then(|inner| inner.downcast::<PressaError>().ok())
                .map(|boxed| *boxed)
                .unwrap_or_else(|| PressaError::Catalog("lost wrapped error".into()));
        }
        PressaError::Io(e)
    }
}

impl From<PressaError> for std::io::Error {
    fn from(e: PressaError) -> Self {
        let e = match e {
            PressaError::Io(inner) => return inner,
            other => other,
        };
        let kind = match &e {
            PressaError::TruncatedInput { .. } => std::io::ErrorKind::UnexpectedEof,
            PressaError::CorruptStream(_) => std::io::ErrorKind::InvalidData,
            PressaError::Cancelled => std::io::ErrorKind::Interrupted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, PressaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_survive_io_round_trip() {
        let io: std::io::Error = PressaError::TruncatedInput {
            expected: 8,
            available: 3,
        }
        .into();
        assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
        match PressaError::from(io) {
            PressaError::TruncatedInput { expected, available } => {
                assert_eq!((expected, available), (8, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn public_messages_hide_os_detail() {
        let e = PressaError::Io(std::io::Error::other("/secret/store/objects/abc"));
        assert!(!e.public_message().contains("/secret"));
        assert!(PressaError::Catalog("objects/x".into()).public_message().starts_with("internal"));
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let e = PressaError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(e.code(), ErrorCode::IoError);
    }
}
