//! Error types shared across the Proteus crates

use thiserror::Error;

/// Result type alias using Proteus's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification, used where callers dispatch on the
/// category rather than the message (e.g. mapping to wire status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-visible bad input (shape, dtype, unknown tensor name, ...)
    InvalidArgument,
    /// Invariant violation inside the server
    Internal,
    /// Duplicate registration (input already declared, ...)
    AlreadyExists,
    /// Model not ready or shutting down
    Unavailable,
    /// Configuration case the core does not handle
    Unsupported,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidArgument => "INVALID_ARG",
            Self::Internal => "INTERNAL",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Unavailable => "UNAVAILABLE",
            Self::Unsupported => "UNSUPPORTED",
        };
        f.write_str(s)
    }
}

/// Main error type for Proteus operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// The coarse classification for this error.
    ///
    /// IO and JSON failures surface as [`ErrorKind::Internal`]; they are
    /// never caused by a client-provided request.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// The bare message, without the kind prefix added by `Display`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::InvalidArgument(m)
            | Self::Internal(m)
            | Self::AlreadyExists(m)
            | Self::Unavailable(m)
            | Self::Unsupported(m) => m.clone(),
            Self::Io(e) => e.to_string(),
            Self::Json(e) => e.to_string(),
        }
    }

    /// Rebuild an error with the same kind and message.
    ///
    /// `Error` is deliberately not `Clone` (IO errors are not), but a
    /// batch failure fans the same status out to every request in the
    /// batch, each response carrying its own copy.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self::with_kind(self.kind(), self.message())
    }

    /// Construct an error from a kind and message.
    #[must_use]
    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match kind {
            ErrorKind::InvalidArgument => Self::InvalidArgument(msg),
            ErrorKind::Internal => Self::Internal(msg),
            ErrorKind::AlreadyExists => Self::AlreadyExists(msg),
            ErrorKind::Unavailable => Self::Unavailable(msg),
            ErrorKind::Unsupported => Self::Unsupported(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(
            Error::invalid_arg("bad shape").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(Error::internal("oops").kind(), ErrorKind::Internal);
        let io: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io.kind(), ErrorKind::Internal);
    }

    #[test]
    fn duplicate_preserves_kind_and_message() {
        let e = Error::unavailable("model 'm' is shutting down");
        let d = e.duplicate();
        assert_eq!(d.kind(), ErrorKind::Unavailable);
        assert_eq!(d.message(), e.message());
    }

    #[test]
    fn display_includes_message() {
        let e = Error::invalid_arg("batch too big");
        assert!(e.to_string().contains("batch too big"));
    }
}
