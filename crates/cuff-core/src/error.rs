//! Unified error types for the cuff core library.
//!
//! This module provides a unified error type [`CuffError`] that covers every
//! failure mode the core can report. Module-specific errors (such as
//! [`ConfigError`](crate::config::ConfigError)) convert into it.
//!
//! Nothing in the core is fatal. Callers log the error and carry on: a
//! rejected frame changes no state, a failed settings write keeps the
//! in-memory value.
//!
//! # Example
//!
//! ```rust
//! use cuff_core::error::{CuffError, Result};
//!
//! fn check_frame(buf: &[u8]) -> Result<()> {
//!     if buf.len() < 2 {
//!         return Err(CuffError::FrameTooShort { len: buf.len() });
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all cuff operations.
#[derive(Debug, Error)]
pub enum CuffError {
    // =========================================================================
    // PROTOCOL ERRORS
    // =========================================================================
    /// The inbound buffer cannot even hold the 2-byte length prefix.
    #[error("Frame too short: {len} byte(s), need at least 2 for the length prefix")]
    FrameTooShort {
        /// Number of bytes received.
        len: usize,
    },

    /// The length prefix disagrees with the number of payload bytes received.
    #[error("Frame length mismatch: prefix declares {declared} bytes, {actual} present")]
    FrameLengthMismatch {
        /// Length declared by the prefix.
        declared: usize,
        /// Payload bytes actually present after the prefix.
        actual: usize,
    },

    /// The payload decoded but carries no command this firmware knows about.
    #[error("Unknown command")]
    UnknownCommand,

    /// The payload could not be decoded into a message.
    #[error("Failed to decode payload: {0}")]
    DecodeFailed(String),

    /// The encoded message does not fit in a single frame.
    #[error("Encoded message exceeds the {limit}-byte frame limit")]
    EncodeOverflow {
        /// Maximum payload size in bytes.
        limit: usize,
    },

    /// The message could not be encoded for another reason.
    #[error("Failed to encode message: {0}")]
    EncodeFailed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading settings.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for cuff operations.
pub type Result<T> = std::result::Result<T, CuffError>;

impl CuffError {
    /// Returns `true` if this error came from framing or decoding wire data.
    #[inline]
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::FrameLengthMismatch { .. }
                | Self::UnknownCommand
                | Self::DecodeFailed(_)
                | Self::EncodeOverflow { .. }
                | Self::EncodeFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if the caller can retry, e.g. by sending smaller pieces.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::EncodeOverflow { .. } | Self::PersistenceError(_))
    }

    /// Returns a machine-readable error code for logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::FrameTooShort { .. } => "FRAME_TOO_SHORT",
            Self::FrameLengthMismatch { .. } => "FRAME_LENGTH_MISMATCH",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::DecodeFailed(_) => "DECODE_FAILED",
            Self::EncodeOverflow { .. } => "ENCODE_OVERFLOW",
            Self::EncodeFailed(_) => "ENCODE_FAILED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for CuffError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<prost::DecodeError> for CuffError {
    fn from(err: prost::DecodeError) -> Self {
        Self::DecodeFailed(err.to_string())
    }
}

impl From<prost::EncodeError> for CuffError {
    fn from(err: prost::EncodeError) -> Self {
        Self::EncodeOverflow {
            limit: err.remaining(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
