//! Error types for the anomaly analysis service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {

    // =============================
    // Request Pipeline Errors
    // =============================

    /// Missing files, oversized upload, malformed form fields
    #[error("{0}")]
    InputValidation(String),

    #[error("{0}")]
    NotFound(String),

    /// Every candidate model stayed overloaded for all rounds
    #[error("{0}")]
    RemoteTransient(String),

    #[error("Remote analysis failed: {0}")]
    RemoteFatal(String),

    #[error("File upload failed: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for AnalysisError {
    fn from(e: sqlx::Error) -> Self {
        AnalysisError::Database(e.to_string())
    }
}

impl AnalysisError {
    /// HTTP status code surfaced to the inbound caller
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisError::InputValidation(_) => 400,
            AnalysisError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Message safe to hand back to the caller.
    ///
    /// Validation, lookup and remote errors are surfaced as-is; anything
    /// internal collapses to a generic apology and is only logged.
    pub fn public_message(&self) -> String {
        match self {
            AnalysisError::InputValidation(_)
            | AnalysisError::NotFound(_)
            | AnalysisError::RemoteTransient(_)
            | AnalysisError::RemoteFatal(_)
            | AnalysisError::Upload(_) => self.to_string(),
            _ => "Sorry, an internal error occurred while processing the request.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AnalysisError::InputValidation("x".into()).status_code(), 400);
        assert_eq!(AnalysisError::NotFound("x".into()).status_code(), 404);
        assert_eq!(AnalysisError::RemoteTransient("x".into()).status_code(), 500);
        assert_eq!(AnalysisError::Database("x".into()).status_code(), 500);
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = AnalysisError::Database("disk I/O error at /var/db".into());
        assert!(!err.public_message().contains("/var/db"));

        let err = AnalysisError::InputValidation("Please provide files to analyze.".into());
        assert_eq!(err.public_message(), "Please provide files to analyze.");
    }
}
