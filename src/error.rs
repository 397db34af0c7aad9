use thiserror::Error;

use crate::response::ExchangeResult;

#[derive(Debug, Error)]
pub enum CourierError {
    // Transport-level failures: no response was received
    #[error("Connection failed to: {url} - {message}")]
    Connectivity { url: String, message: String },

    #[error("Request timed out after {timeout_ms} ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    // The authentication collaborator failed while preparing headers
    #[error("Authentication preparation failed: {0}")]
    Security(String),

    // Body-to-bytes conversion failed
    #[error("Request body transformation failed: {0}")]
    Transformation(String),

    // A response was received but its status was rejected by the validator.
    // Carries the materialized result so error handlers can still inspect
    // headers, cookies and body.
    #[error("Response status {status} rejected (expected {allowed})")]
    Validation {
        status: u16,
        allowed: String,
        result: Box<ExchangeResult>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed media type: {0}")]
    MediaType(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid HTTP construct: {0}")]
    Http(#[from] http::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Log setup error: {0}")]
    LogSetup(String),
}

impl CourierError {
    /// Create a connectivity error with context
    pub fn connectivity(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error with context
    pub fn timeout(url: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            url: url.into(),
            timeout_ms,
        }
    }

    /// Create a security error (authentication preparation failure)
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Create a transformation error (body-to-bytes conversion failure)
    pub fn transformation(msg: impl Into<String>) -> Self {
        Self::Transformation(msg.into())
    }

    /// Create a validation error carrying the materialized result
    pub fn validation(status: u16, allowed: impl Into<String>, result: ExchangeResult) -> Self {
        Self::Validation {
            status,
            allowed: allowed.into(),
            result: Box::new(result),
        }
    }

    /// Create a configuration error with context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a media type error with context
    pub fn media_type(msg: impl Into<String>) -> Self {
        Self::MediaType(msg.into())
    }

    /// Create a log setup error with context
    pub fn log_setup(msg: impl Into<String>) -> Self {
        Self::LogSetup(msg.into())
    }

    /// Check if the error is transient (no response was received; a fresh
    /// attempt could succeed)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CourierError::Connectivity { .. } | CourierError::Timeout { .. }
        )
    }

    /// Check if the error carries a rejected-but-materialized response
    pub fn is_validation(&self) -> bool {
        matches!(self, CourierError::Validation { .. })
    }

    /// Access the materialized result carried by a validation error
    pub fn validation_result(&self) -> Option<&ExchangeResult> {
        match self {
            CourierError::Validation { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Mutable access to the carried result, so error handlers can consume
    /// the response body
    pub fn validation_result_mut(&mut self) -> Option<&mut ExchangeResult> {
        match self {
            CourierError::Validation { result, .. } => Some(result),
            _ => None,
        }
    }
}
