// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// ConfigError
// =============================================================================

/// Errors raised while loading or validating the publisher configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// Parser message.
        message: String,
        /// Line number if known.
        line: Option<usize>,
    },

    /// A value failed validation.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A required field is missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Dotted path of the missing field.
        field: String,
    },

    /// Two writers share an id.
    #[error("Duplicate writer id: {writer_id}")]
    DuplicateWriterId {
        /// The duplicated id.
        writer_id: String,
    },

    /// A writer is declared for another group.
    #[error("Writer '{writer_id}' belongs to group '{actual}', expected '{expected}'")]
    ForeignWriter {
        /// Writer id.
        writer_id: String,
        /// Group configured for the publisher.
        expected: String,
        /// Group named by the writer.
        actual: String,
    },

    /// Reading the file failed.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file does not exist.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path of the file.
        path: PathBuf,
    },

    /// An override environment variable holds an unusable value.
    #[error("Invalid environment variable '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A numeric value is outside its allowed range.
    #[error("Value out of range for '{field}': {value} (allowed {min}..={max})")]
    OutOfRange {
        /// Dotted path of the field.
        field: String,
        /// Offending value.
        value: String,
        /// Lower bound.
        min: String,
        /// Upper bound.
        max: String,
    },

    /// The file extension is not a known format.
    #[error("Unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// The extension seen.
        format: String,
    },

    /// Deserialization failed.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Deserializer message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
            line: None,
        }
    }

    /// Creates a parse error with a line number.
    pub fn parse_at_line(path: impl Into<PathBuf>, message: impl Into<String>, line: usize) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
            line: Some(line),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    /// Creates a duplicate writer error.
    pub fn duplicate_writer_id(writer_id: impl Into<String>) -> Self {
        Self::DuplicateWriterId {
            writer_id: writer_id.into(),
        }
    }

    /// Creates a foreign writer error.
    pub fn foreign_writer(
        writer_id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ForeignWriter {
            writer_id: writer_id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid environment variable error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an out of range error.
    pub fn out_of_range<T: std::fmt::Display>(field: impl Into<String>, value: T, min: T, max: T) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat { format: format.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by the file system.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::FileNotFound { .. })
    }

    /// Returns `true` if reloading may succeed without editing the file.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns the error type name for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Validation { .. } => "validation",
            Self::MissingField { .. } => "missing_field",
            Self::DuplicateWriterId { .. } => "duplicate_writer_id",
            Self::ForeignWriter { .. } => "foreign_writer",
            Self::Io { .. } => "io",
            Self::FileNotFound { .. } => "file_not_found",
            Self::InvalidEnvVar { .. } => "invalid_env_var",
            Self::OutOfRange { .. } => "out_of_range",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// A Result type with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_creation() {
        let error = ConfigError::validation("writer_group.batch_size", "must be at least 1");
        assert!(matches!(error, ConfigError::Validation { .. }));
        assert_eq!(error.error_type(), "validation");
        assert!(error.to_string().contains("writer_group.batch_size"));

        let error = ConfigError::foreign_writer("w1", "g1", "g2");
        assert_eq!(error.error_type(), "foreign_writer");
        assert!(error.to_string().contains("'g2'"));
    }

    #[test]
    fn test_config_error_is_io_error() {
        let error = ConfigError::io(
            "publisher.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.is_io_error());
        assert!(error.is_retryable());
        assert!(ConfigError::file_not_found("publisher.yaml").is_io_error());
        assert!(!ConfigError::file_not_found("publisher.yaml").is_retryable());
        assert!(!ConfigError::missing_field("registry.endpoint").is_io_error());
    }

    #[test]
    fn test_parse_at_line() {
        match ConfigError::parse_at_line("publisher.toml", "expected '='", 7) {
            ConfigError::Parse { line, .. } => assert_eq!(line, Some(7)),
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range() {
        let error = ConfigError::out_of_range("registry.download_concurrency", 0, 1, 256);
        assert!(error.to_string().contains("1..=256"));
    }
}
