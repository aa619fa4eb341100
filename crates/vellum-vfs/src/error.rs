//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// The backend does not implement this operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The caller's context was cancelled before the backend finished.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A failure annotated with the operation and path that produced it.
    #[error("{op} {path}: {source}")]
    Op {
        op: &'static str,
        path: String,
        #[source]
        source: Box<VfsError>,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach operation and path context.
    ///
    /// An error that already carries context is re-labelled instead of
    /// nested, so the chain never grows deeper than one level.
    pub fn with_op(self, op: &'static str, path: impl Into<String>) -> Self {
        let source = match self {
            VfsError::Op { source, .. } => source,
            other => Box::new(other),
        };
        VfsError::Op {
            op,
            path: path.into(),
            source,
        }
    }

    /// The innermost error, looking through any operation context.
    pub fn root_cause(&self) -> &VfsError {
        match self {
            VfsError::Op { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Classify this error as a `std::io::ErrorKind`.
    pub fn kind(&self) -> io::ErrorKind {
        match self.root_cause() {
            VfsError::NotFound(_) => io::ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            VfsError::PermissionDenied(_)
            | VfsError::ReadOnly
            | VfsError::PathEscapesRoot(_) => io::ErrorKind::PermissionDenied,
            VfsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
            VfsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            VfsError::DirectoryNotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            VfsError::InvalidPath(_) | VfsError::NotASymlink(_) => io::ErrorKind::InvalidInput,
            VfsError::Unsupported(_) => io::ErrorKind::Unsupported,
            VfsError::Cancelled => io::ErrorKind::Interrupted,
            VfsError::Io(e) => e.kind(),
            VfsError::Op { .. } | VfsError::Other(_) => io::ErrorKind::Other,
        }
    }

    /// Returns true for the "does not exist" class, whichever backend
    /// produced it.
    pub fn is_not_found(&self) -> bool {
        self.kind() == io::ErrorKind::NotFound
    }

    /// Returns true when the backend lacks the requested capability.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.root_cause(), VfsError::Unsupported(_))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(e) => e,
            other => {
                let kind = other.kind();
                io::Error::new(kind, other)
            }
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_op_does_not_nest() {
        let err = VfsError::not_found("a")
            .with_op("stat", "a")
            .with_op("open", "b");

        match &err {
            VfsError::Op { op, path, source } => {
                assert_eq!(*op, "open");
                assert_eq!(path, "b");
                assert!(matches!(**source, VfsError::NotFound(_)));
            }
            other => panic!("expected Op, got {other:?}"),
        }
        assert!(err.is_not_found());
    }

    #[test]
    fn test_kind_looks_through_io() {
        let err = VfsError::from(io::Error::from(io::ErrorKind::NotFound)).with_op("remove", "x");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "remove x: I/O error: entity not found");
    }

    #[test]
    fn test_unsupported() {
        let err = VfsError::Unsupported("symlink").with_op("symlink", "l");
        assert!(err.is_unsupported());
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(!VfsError::other("nope").is_unsupported());
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let io_err: io::Error = VfsError::directory_not_empty("d").into();
        assert_eq!(io_err.kind(), io::ErrorKind::DirectoryNotEmpty);
    }
}
