use std::path::PathBuf;
use thiserror::Error;

/// Main error type for databind
#[derive(Error, Debug)]
pub enum DatabindError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// A gatherer or discoverer failed to fetch its data
    #[error("Fetch failed for {source_name}: {source:#}")]
    FetchFailed {
        source_name: String,
        source: anyhow::Error,
    },

    /// A template references a path that is not in the namespace
    #[error("Unresolved placeholder: ${{{path}}}")]
    PlaceholderUnresolved { path: String },

    /// The template could not be converted to or from its generic form
    #[error("Template error: {context}: {source}")]
    Template {
        source: serde_json::Error,
        context: String,
    },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for databind operations
pub type Result<T> = std::result::Result<T, DatabindError>;
