//! Error types for the load testing engine.
//!
//! Defines [`LoadTestError`] for configuration errors, [`RequestError`] for
//! transport failures recorded on a [`RequestRecord`](crate::loadtest::client::RequestRecord),
//! and [`CheckError`] for checks that could not be evaluated.

/// Errors that occur during load test configuration parsing, validation, or file I/O.
///
/// These are the only errors that stop a test: they are raised before the
/// engine leaves its idle phase.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure -- the config parsed successfully but
    /// contains invalid values (e.g., empty stage list, inverted sleep range).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },
}

impl LoadTestError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }
}

/// Transport errors encountered while issuing a request.
///
/// A request that fails with one of these still produces a record (status 0),
/// so the failure flows into checks instead of aborting the virtual user.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request exceeded the configured per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The response head arrived but the body could not be read.
    #[error("Failed to read response body: {message}")]
    Body { message: String },

    /// The request could not be built (malformed URL, bad header).
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl RequestError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"timeout"`, `"connection"`, `"body"`, `"request"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Body { .. } => "body",
            Self::InvalidRequest { .. } => "request",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`RequestError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if err.is_builder() {
            Self::InvalidRequest {
                message: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            Self::Body {
                message: err.to_string(),
            }
        } else {
            Self::Connection {
                message: err.to_string(),
            }
        }
    }
}

/// Reasons a check evaluated to failure without returning `false` itself.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// The response had no body (transport error) or the body is not valid JSON.
    #[error("response body is not valid JSON: {message}")]
    Json { message: String },

    /// A JSON path used by the check does not exist in the body.
    #[error("field '{field}' not found in response body")]
    MissingField { field: String },

    /// The predicate panicked or reported its own failure.
    #[error("check predicate failed: {message}")]
    Predicate { message: String },
}
