// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for opcpub.
//!
//! Every component recovers locally; errors surface to users only through
//! the state reporters and logs. The hierarchy still distinguishes retryable
//! from permanent failures so loops can decide whether to back off and retry.
//!
//! # Error Hierarchy
//!
//! ```text
//! PublisherError (root)
//! ├── ConfigError     - Configuration parsing and validation
//! ├── RegistryError   - Writer registry downloads
//! ├── SourceError     - Data source subscriptions
//! ├── EncodingError   - Network message encoding/decoding
//! ├── SinkError       - Publishing network messages
//! └── EngineError     - Writer group engine control
//! ```
//!
//! # Examples
//!
//! ```
//! use opcpub_core::error::{PublisherError, RegistryError};
//!
//! let error = RegistryError::request("connection reset");
//! assert!(error.is_retryable());
//!
//! let root: PublisherError = error.into();
//! assert!(root.is_retryable());
//! assert_eq!(root.error_type(), "registry");
//! ```

use thiserror::Error;

/// Result alias using [`PublisherError`].
pub type Result<T> = std::result::Result<T, PublisherError>;

// =============================================================================
// PublisherError - Root Error Type
// =============================================================================

/// The root error type for opcpub.
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Data source error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Encoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Sink error.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl PublisherError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublisherError::Registry(e) => e.is_retryable(),
            PublisherError::Source(e) => e.is_retryable(),
            PublisherError::Sink(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            PublisherError::Config(_) => "config",
            PublisherError::Registry(_) => "registry",
            PublisherError::Source(_) => "source",
            PublisherError::Encoding(_) => "encoding",
            PublisherError::Sink(_) => "sink",
            PublisherError::Engine(_) => "engine",
        }
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// The missing field.
        field: String,
    },

    /// A field has an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// The invalid field.
        field: String,
        /// Why the value is invalid.
        message: String,
    },
}

impl ConfigError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// RegistryError
// =============================================================================

/// Errors raised while downloading writer definitions from the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry does not know the writer.
    #[error("Writer '{writer_id}' not found in registry")]
    NotFound {
        /// The requested writer id.
        writer_id: String,
    },

    /// The request could not be completed.
    #[error("Registry request failed: {message}")]
    Request {
        /// Error message.
        message: String,
    },

    /// The registry answered with an error status.
    #[error("Registry returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The response could not be parsed.
    #[error("Invalid registry response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },
}

impl RegistryError {
    /// Creates a not found error.
    pub fn not_found(writer_id: impl Into<String>) -> Self {
        Self::NotFound {
            writer_id: writer_id.into(),
        }
    }

    /// Creates a request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Request { .. } => true,
            RegistryError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "not_found",
            RegistryError::Request { .. } => "request",
            RegistryError::Status { .. } => "status",
            RegistryError::InvalidResponse { .. } => "invalid_response",
        }
    }
}

// =============================================================================
// SourceError
// =============================================================================

/// Data source subscription errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not connect to the source endpoint.
    #[error("Failed to connect to '{endpoint}': {message}")]
    ConnectFailed {
        /// Endpoint URL.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The notification stream failed.
    #[error("Subscription stream failed: {message}")]
    StreamFailed {
        /// Error message.
        message: String,
    },

    /// The subscription was closed by the source.
    #[error("Subscription closed")]
    Closed,

    /// The writer asks for something the source cannot provide.
    #[error("Unsupported by source: {message}")]
    Unsupported {
        /// Error message.
        message: String,
    },
}

impl SourceError {
    /// Creates a connect failed error.
    pub fn connect_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a stream failed error.
    pub fn stream_failed(message: impl Into<String>) -> Self {
        Self::StreamFailed {
            message: message.into(),
        }
    }

    /// Creates an unsupported error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Unsupported { .. })
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            SourceError::ConnectFailed { .. } => "connect_failed",
            SourceError::StreamFailed { .. } => "stream_failed",
            SourceError::Closed => "closed",
            SourceError::Unsupported { .. } => "unsupported",
        }
    }
}

// =============================================================================
// EncodingError
// =============================================================================

/// Encoding and decoding errors.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// A value could not be serialized.
    #[error("Serialization failed: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// A payload could not be decoded.
    #[error("Decoding failed at offset {offset}: {message}")]
    Decode {
        /// Byte offset (or 0 for text formats).
        offset: usize,
        /// Error message.
        message: String,
    },
}

impl EncodingError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(offset: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            message: message.into(),
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            EncodingError::Serialization { .. } => "serialization",
            EncodingError::Decode { .. } => "decode",
        }
    }
}

impl From<serde_json::Error> for EncodingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// SinkError
// =============================================================================

/// Errors raised while publishing network messages.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Sending failed.
    #[error("Send failed: {message}")]
    SendFailed {
        /// Error message.
        message: String,
    },

    /// The receiver rejected the message.
    #[error("Message rejected with status {status}: {message}")]
    Rejected {
        /// Status code reported by the receiver.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The sink is closed.
    #[error("Sink closed")]
    Closed,
}

impl SinkError {
    /// Creates a send failed error.
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Creates a rejected error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::SendFailed { .. } => true,
            SinkError::Rejected { status, .. } => *status >= 500 || *status == 429,
            SinkError::Closed => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            SinkError::SendFailed { .. } => "send_failed",
            SinkError::Rejected { .. } => "rejected",
            SinkError::Closed => "closed",
        }
    }
}

// =============================================================================
// EngineError
// =============================================================================

/// Writer group engine control errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine is already running.
    #[error("Engine for group '{group_id}' is already running")]
    AlreadyRunning {
        /// The group id.
        group_id: String,
    },

    /// The engine is shutting down and no longer accepts commands.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// A writer belongs to another group.
    #[error("Writer '{writer_id}' belongs to group '{actual}', expected '{expected}'")]
    GroupMismatch {
        /// The writer id.
        writer_id: String,
        /// The engine's group id.
        expected: String,
        /// The writer's group id.
        actual: String,
    },
}

impl EngineError {
    /// Creates an already running error.
    pub fn already_running(group_id: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            group_id: group_id.into(),
        }
    }

    /// Creates a group mismatch error.
    pub fn group_mismatch(
        writer_id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::GroupMismatch {
            writer_id: writer_id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::AlreadyRunning { .. } => "already_running",
            EngineError::ShuttingDown => "shutting_down",
            EngineError::GroupMismatch { .. } => "group_mismatch",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_retryable() {
        assert!(RegistryError::request("reset").is_retryable());
        assert!(RegistryError::status(503, "unavailable").is_retryable());
        assert!(RegistryError::status(429, "slow down").is_retryable());
        assert!(!RegistryError::status(404, "missing").is_retryable());
        assert!(!RegistryError::not_found("w1").is_retryable());
    }

    #[test]
    fn test_source_retryable() {
        assert!(SourceError::stream_failed("eof").is_retryable());
        assert!(SourceError::Closed.is_retryable());
        assert!(!SourceError::unsupported("events").is_retryable());
    }

    #[test]
    fn test_root_conversion() {
        let err: PublisherError = SinkError::Closed.into();
        assert_eq!(err.error_type(), "sink");
        assert!(!err.is_retryable());

        let err: PublisherError = EngineError::ShuttingDown.into();
        assert_eq!(err.error_type(), "engine");
    }

    #[test]
    fn test_display() {
        let err = EngineError::group_mismatch("w1", "g1", "g2");
        assert_eq!(
            err.to_string(),
            "Writer 'w1' belongs to group 'g2', expected 'g1'"
        );

        let err = ConfigError::invalid_value("batch_size", "must be > 0");
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("x").unwrap_err();
        let err: EncodingError = json_err.into();
        assert_eq!(err.error_type(), "serialization");
    }
}
