//! Error types for trapline.

use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraplineError>;

#[derive(Error, Debug)]
pub enum TraplineError {
    /// I/O errors from listener sockets
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration entry is missing, malformed or out of range
    #[error("invalid value for '{key}': {message}")]
    Config { key: String, message: String },

    /// The listener could not acquire its address
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Inbound payload could not be understood
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// Lifecycle operation called in the wrong state
    #[error("task is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Backoff wait was cut short by a shutdown signal
    #[error("interrupted by shutdown")]
    Interrupted,

    /// A record source failed while draining
    #[error("record source error: {message}")]
    Source { message: String },

    /// Logic errors that should not happen in a correctly functioning system
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

impl TraplineError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage { reason: reason.into() }
    }

    pub fn source_error(message: impl Into<String>) -> Self {
        Self::Source { message: message.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    /// Errors a poll loop can log and move past
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::InvalidMessage { .. } | Self::Io(_))
    }

    /// Errors that must stop a task from starting
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Bind { .. } | Self::InvalidState { .. })
    }

    /// Configuration key that caused the error, if any
    pub fn config_key(&self) -> Option<&str> {
        match self {
            Self::Config { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($key:expr, $($arg:tt)*) => {
        $crate::error::TraplineError::config($key, format!($($arg)*))
    };
}
