//! Error types for draft storage operations
//!
//! Every host call reports one of the kinds in [`StorageError`]. The pipeline wraps
//! them in [`PipelineError`] together with the stage that failed.

use std::fmt;

use thiserror::Error;

/// Failure reported by the storage host
#[derive(Error, Debug)]
pub enum StorageError {
    /// The host refused to map a storage area for this origin
    #[error("Security error: {0}")]
    Security(String),

    /// Permission for the requested mode is not granted
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Entry exists but is of the other kind (file vs directory)
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Another writer holds the exclusive lock on the entry
    #[error("No modification allowed: {0}")]
    NoModificationAllowed(String),

    #[error("Quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    /// The entry changed after the reference to it was acquired
    #[error("Not readable: {0}")]
    NotReadable(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    /// The stream is already closed or locked
    #[error("Close failed: {0}")]
    CloseFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a [`StorageError`] without its payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Security,
    NotAllowed,
    NotFound,
    TypeMismatch,
    InvalidName,
    InvalidArgument,
    NoModificationAllowed,
    QuotaExceeded,
    NotReadable,
    Aborted,
    CloseFailed,
    Io,
}

impl ErrorKind {
    /// Exception name the host uses for this kind
    pub fn name(self) -> &'static str {
        match self {
            Self::Security => "SecurityError",
            Self::NotAllowed => "NotAllowedError",
            Self::NotFound => "NotFoundError",
            Self::TypeMismatch => "TypeMismatchError",
            Self::InvalidName | Self::InvalidArgument | Self::CloseFailed => "TypeError",
            Self::NoModificationAllowed => "NoModificationAllowedError",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::NotReadable => "NotReadableError",
            Self::Aborted => "AbortError",
            Self::Io => "UnknownError",
        }
    }
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Security(_) => ErrorKind::Security,
            Self::NotAllowed(_) => ErrorKind::NotAllowed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TypeMismatch(_) => ErrorKind::TypeMismatch,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NoModificationAllowed(_) => ErrorKind::NoModificationAllowed,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::NotReadable(_) => ErrorKind::NotReadable,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::CloseFailed(_) => ErrorKind::CloseFailed,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Classify an io error raised while operating on `what`
    pub fn from_io(err: std::io::Error, what: impl fmt::Display) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::NotAllowed(what.to_string()),
            std::io::ErrorKind::NotFound => Self::NotFound(what.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Pipeline step at which a fatal error surfaced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    AcquireRoot,
    ResolveFile,
    OpenWritable,
    Write,
    ResolveSnapshot,
    ReadText,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AcquireRoot => "acquire storage root",
            Self::ResolveFile => "resolve file handle",
            Self::OpenWritable => "open writable stream",
            Self::Write => "write",
            Self::ResolveSnapshot => "resolve file snapshot",
            Self::ReadText => "read text",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StorageError,
    },
}

impl PipelineError {
    pub fn at(stage: Stage) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::Stage { stage, source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Stage { stage, .. } => *stage,
        }
    }

    /// The host error exactly as it was reported
    pub fn storage_error(&self) -> &StorageError {
        match self {
            Self::Stage { source, .. } => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            StorageError::from_io(denied, "draft.txt").kind(),
            ErrorKind::NotAllowed
        );

        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            StorageError::from_io(missing, "draft.txt").kind(),
            ErrorKind::NotFound
        );

        let other = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        assert_eq!(StorageError::from_io(other, "draft.txt").kind(), ErrorKind::Io);
    }

    #[test]
    fn test_pipeline_error_keeps_source() {
        let err = PipelineError::at(Stage::Write)(StorageError::QuotaExceeded {
            requested: 3,
            available: 0,
        });
        assert_eq!(err.stage(), Stage::Write);
        assert_eq!(err.storage_error().kind().name(), "QuotaExceededError");
        assert_eq!(
            err.to_string(),
            "write failed: Quota exceeded: requested 3 bytes, 0 available"
        );
    }
}
