//! Error Handling Module
//!
//! Provides structured error types for the forecasting pipeline.
//! Uses `thiserror` for ergonomic error definitions and maps every
//! variant onto the coarse taxonomy reported in stage results.
//!
//! # Design Principles
//! 1. All errors are typed and descriptive
//! 2. Errors map to a reportable `ErrorKind`
//! 3. No panics in pipeline code - use `Result<T, ForecastError>`

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Main error type for the forecasting pipeline.
#[derive(Error, Debug, Clone)]
pub enum ForecastError {
    // Input / artifact errors
    #[error("Required file not found: {path}")]
    MissingFile { path: String },

    // Schema errors
    #[error("Missing required column '{column}' in {table}")]
    MissingColumn { column: String, table: String },

    #[error("Missing required features: {}", .features.join(", "))]
    MissingFeatures { features: Vec<String> },

    #[error("Feature order mismatch: model expects [{}], feature file lists [{}]", .expected.join(", "), .found.join(", "))]
    FeatureOrderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    // Shape errors
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Failed to parse value '{value}' in column '{column}'")]
    ParseError { column: String, value: String },

    // Parameter errors
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    // Wrapped library errors
    #[error("Polars error: {0}")]
    Polars(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification carried in stage results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    MissingFile,
    SchemaError,
    InvalidShape,
    Other,
}

// ============================================================================
// Error Classification
// ============================================================================

impl ForecastError {
    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForecastError::MissingFile { .. } => ErrorKind::MissingFile,

            ForecastError::MissingColumn { .. }
            | ForecastError::MissingFeatures { .. }
            | ForecastError::FeatureOrderMismatch { .. } => ErrorKind::SchemaError,

            ForecastError::InvalidShape(_) | ForecastError::ParseError { .. } => {
                ErrorKind::InvalidShape
            }

            ForecastError::InvalidParameter { .. }
            | ForecastError::Polars(_)
            | ForecastError::Io(_)
            | ForecastError::Serialization(_)
            | ForecastError::Internal(_) => ErrorKind::Other,
        }
    }
}

// ============================================================================
// Error Conversion Implementations
// ============================================================================

impl From<std::io::Error> for ForecastError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ForecastError::MissingFile {
                path: "unknown".to_string(),
            }
        } else {
            ForecastError::Io(err.to_string())
        }
    }
}

impl From<polars::error::PolarsError> for ForecastError {
    fn from(err: polars::error::PolarsError) -> Self {
        ForecastError::Polars(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(err: bincode::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ForecastError {
    fn from(err: toml::de::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

/// Result type alias used across the crate.
pub type ForecastResult<T> = Result<T, ForecastError>;

// ============================================================================
// Error Construction Helpers
// ============================================================================

impl ForecastError {
    /// Create a missing file error.
    pub fn missing_file(path: impl Into<String>) -> Self {
        ForecastError::MissingFile { path: path.into() }
    }

    /// Create a missing column error.
    pub fn missing_column(column: impl Into<String>, table: impl Into<String>) -> Self {
        ForecastError::MissingColumn {
            column: column.into(),
            table: table.into(),
        }
    }

    /// Create a missing features error.
    pub fn missing_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ForecastError::MissingFeatures {
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an invalid shape error.
    pub fn invalid_shape(message: impl Into<String>) -> Self {
        ForecastError::InvalidShape(message.into())
    }

    /// Create a parse error.
    pub fn parse_error(column: impl Into<String>, value: impl Into<String>) -> Self {
        ForecastError::ParseError {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Create an invalid parameter error.
    pub fn invalid_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ForecastError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ForecastError::Internal(message.into())
    }
}

// ============================================================================
// Tests
// ============================================================================
