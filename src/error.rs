// src/error.rs

//! Crate-wide error types
//!
//! One `Error` enum covers the whole client. "Package not found on any
//! server" is deliberately NOT an error: resolution paths return an empty
//! result instead, because falling through a server chain is expected.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the package client
#[derive(Error, Debug)]
pub enum Error {
    /// Client or component construction failed
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient network or transfer failure
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Payload could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The server responded with an application-level error payload
    #[error("Server '{server}' reported: {message}")]
    ProtocolError { server: String, message: String },

    /// Bad caller input, raised immediately and never batched
    #[error("Invalid request: {0}")]
    ValidationError(String),

    /// Authentication against a package server failed
    #[error("Login to '{server}' failed: {message}")]
    LoginError { server: String, message: String },

    /// Downloaded data does not match the expected checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Raised once after a batch operation in which individual items failed
    #[error("{failed} of {total} {context} failed")]
    AggregateError {
        failed: usize,
        total: usize,
        context: String,
    },

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

/// Discriminant for retry filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Init,
    Io,
    Download,
    Parse,
    Protocol,
    Validation,
    Login,
    Checksum,
    Aggregate,
    Cancelled,
}

impl Error {
    /// Kind of this error, independent of its payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InitError(_) => ErrorKind::Init,
            Self::IoError(_) => ErrorKind::Io,
            Self::DownloadError(_) => ErrorKind::Download,
            Self::ParseError(_) => ErrorKind::Parse,
            Self::ProtocolError { .. } => ErrorKind::Protocol,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::LoginError { .. } => ErrorKind::Login,
            Self::ChecksumMismatch { .. } => ErrorKind::Checksum,
            Self::AggregateError { .. } => ErrorKind::Aggregate,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error is a cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(
            Error::DownloadError("timeout".to_string()).kind(),
            ErrorKind::Download
        );
        assert_eq!(
            Error::ProtocolError {
                server: "main".to_string(),
                message: "bad request".to_string(),
            }
            .kind(),
            ErrorKind::Protocol
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_aggregate_display() {
        let err = Error::AggregateError {
            failed: 1,
            total: 5,
            context: "packages".to_string(),
        };
        assert_eq!(err.to_string(), "1 of 5 packages failed");
    }

    #[test]
    fn test_cancelled_detection() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::IoError("disk full".to_string()).is_cancelled());
    }
}
