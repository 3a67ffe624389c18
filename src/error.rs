// src/error.rs

//! Unified error handling for the job relay.

use std::fmt;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error (fatal, aborts the run before fetching)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source answered with a non-success status
    #[error("HTTP status {0}")]
    Status(u16),

    /// A destination's fetch was abandoned after repeated failures
    #[error(
        "Fetch for destination {destination} abandoned at offset {offset} after {attempts} attempts: {cause}"
    )]
    DestinationFetch {
        destination: String,
        offset: usize,
        attempts: u32,
        cause: String,
    },

    /// A single listing item could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A message could not be delivered
    #[error("Delivery to {destination} failed: {message}")]
    Delivery {
        destination: String,
        message: String,
    },

    /// Duplicate store could not be read or written
    #[error("Duplicate store error: {0}")]
    Store(String),

    /// The run was cancelled by its invoker
    #[error("Run cancelled")]
    Cancelled,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a per-item parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a duplicate store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a delivery error for a destination.
    pub fn delivery(destination: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            destination: destination.into(),
            message: message.to_string(),
        }
    }

    /// Whether a failed page request may be retried at the same offset.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status(_))
    }

    /// Whether the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Selector { .. } | Self::Toml(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_are_transient() {
        assert!(AppError::Status(503).is_transient());
        assert!(!AppError::parse("bad item").is_transient());
        assert!(!AppError::config("missing token").is_transient());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        assert!(AppError::config("no channels").is_fatal());
        assert!(!AppError::store("disk full").is_fatal());
        assert!(!AppError::delivery("123", "timeout").is_fatal());
    }
}
