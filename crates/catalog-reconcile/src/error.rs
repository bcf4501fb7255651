//! Error types for the reconciliation library.

use thiserror::Error;

/// Main error type for reconciliation operations.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Configuration error (invalid YAML, missing fields, bad thresholds).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot loading error (duplicate keys, malformed input).
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Planning failed for a specific object.
    #[error("Planning failed for {object}: {message}")]
    Plan { object: String, message: String },

    /// State file error.
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume.
    #[error("Config has changed since last run - cannot resume. Start a fresh run instead.")]
    ConfigChanged,

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled before completion.
    #[error("Reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Create a Plan error for a specific object.
    pub fn plan(object: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::Plan {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
