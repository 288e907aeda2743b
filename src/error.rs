//! Error taxonomy for the ISO 8583 client engine.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the engine's framing, codec, connection, and worker layers.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network communication or persistence.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A CLI flag, timeout value, or required file was invalid at startup.
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// The message spec JSON failed to parse or referenced an unknown field type.
    #[error("failed to load message spec: {message}")]
    SpecLoadError { message: String },

    /// The transaction-template JSON failed to parse or contained no templates.
    #[error("failed to load transaction templates: {message}")]
    TemplateLoadError { message: String },

    /// `Compose` was asked for a transaction name that isn't in the template cache.
    #[error("unknown transaction template: {name}")]
    NotFound { name: String },

    /// A send was attempted with no live socket.
    #[error("connection is closed")]
    ConnectionClosed,

    /// `SendAsync` was called with a STAN that already has a pending entry.
    #[error("duplicate in-flight STAN: {stan}")]
    DuplicateSTAN { stan: String },

    /// The inbound length prefix or NAPS tag did not match the expected framing.
    #[error("framing error: {message} (raw bytes: {raw_hex})")]
    FramingError { message: String, raw_hex: String },

    /// The inbound payload could not be unpacked against the loaded spec.
    #[error("unpack error: {message} (raw bytes: {raw_hex})")]
    UnpackError { message: String, raw_hex: String },

    /// A response was not received within `responseTimeout`.
    #[error("response timed out after {0:?}")]
    ResponseTimeout(Duration),

    /// Every reconnect attempt in the budget failed.
    #[error("connect failed after {attempts} attempt(s): {message}")]
    ConnectFailed { attempts: u32, message: String },

    /// A worker's consecutive-failure threshold was breached.
    #[error("circuit breaker open after {consecutive_failures} consecutive failures")]
    CircuitOpen { consecutive_failures: u32 },

    /// Writing a counter or audit record failed; execution continues.
    #[error("persistence warning: {message}")]
    PersistenceWarning { message: String },

    /// JSON (de)serialization error, surfaced from `serde_json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::ConfigInvalid`].
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Build a [`Error::FramingError`], hex-dumping the offending bytes.
    pub fn framing(message: impl Into<String>, raw: &[u8]) -> Self {
        Self::FramingError {
            message: message.into(),
            raw_hex: hex_dump(raw),
        }
    }

    /// Build a [`Error::UnpackError`], hex-dumping the offending bytes.
    pub fn unpack(message: impl Into<String>, raw: &[u8]) -> Self {
        Self::UnpackError {
            message: message.into(),
            raw_hex: hex_dump(raw),
        }
    }

    /// Whether this error represents a condition worth retrying, as opposed to
    /// a permanent protocol or configuration mistake. Drives the connection
    /// manager's networking-stats classifier.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::ResponseTimeout(_)
                | Error::ConnectFailed { .. }
        )
    }
}

/// Render bytes as a space-separated uppercase hex string, for diagnostics.
pub fn hex_dump(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
