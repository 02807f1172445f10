//! Error types for the UMP transport.

use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Direction;

/// Transport errors.
///
/// Codec failures pass through unchanged as [`Error::Codec`]. Backend
/// failures carry the operation and endpoint so callers can decide on retry;
/// nothing here is retried internally.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] umpio_codec::Error),

    #[error("No {direction} endpoint at index {index}")]
    DeviceNotFound { direction: Direction, index: usize },

    #[error("{direction} endpoint '{name}' already has an open session")]
    AlreadyOpen { direction: Direction, name: String },

    #[error("Session for '{name}' is not open")]
    SessionNotOpen { name: String },

    #[error("{backend} backend cannot {operation}: {reason}")]
    UnsupportedOnBackend {
        backend: &'static str,
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} on '{endpoint}' timed out after {timeout:?}")]
    BackendTimeout {
        operation: &'static str,
        endpoint: String,
        timeout: Duration,
    },

    #[error("{operation} on '{endpoint}' failed: {message}{}", native_code_suffix(.code))]
    BackendIo {
        operation: &'static str,
        endpoint: String,
        code: Option<i32>,
        message: String,
    },

    #[error("SysEx stream {stream_id} interrupted at fragment {fragment} of {total}: {source}")]
    SysExInterrupted {
        stream_id: u8,
        /// Index of the fragment that failed; earlier fragments were sent.
        fragment: usize,
        total: usize,
        source: Box<Error>,
    },
}

fn native_code_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (native code {c})")).unwrap_or_default()
}

impl Error {
    pub(crate) fn io(
        operation: &'static str,
        endpoint: impl Into<String>,
        code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Error::BackendIo {
            operation,
            endpoint: endpoint.into(),
            code,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(
        backend: &'static str,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Error::UnsupportedOnBackend {
            backend,
            operation,
            reason: reason.into(),
        }
    }

    /// The error that caused a SysEx interruption, or `self`.
    pub fn root(&self) -> &Error {
        match self {
            Error::SysExInterrupted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Failures reported by the OS or device rather than caused by the caller.
    pub fn is_backend(&self) -> bool {
        matches!(
            self.root(),
            Error::UnsupportedOnBackend { .. } | Error::BackendTimeout { .. } | Error::BackendIo { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
