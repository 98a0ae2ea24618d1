//! Error types for the knowledge builder

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Oracle response failed schema validation.
    #[error("Extraction format error: {0}")]
    ExtractionFormat(String),

    /// Dedup group names an entity absent from the working set.
    #[error("Merge reference error: {0}")]
    MergeReference(String),

    /// Document store or graph store unreachable.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Oracle call timed out after {0:?}")]
    OracleTimeout(Duration),

    /// Transport or API failure talking to the LLM provider.
    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a failed oracle call is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::OracleTimeout(_) | Error::Oracle(_) | Error::ExtractionFormat(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<neo4rs::Error> for Error {
    fn from(err: neo4rs::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_extraction_format() {
        let err = Error::ExtractionFormat("missing `entities`".to_string());
        assert!(err.to_string().contains("Extraction format error"));
        assert!(err.to_string().contains("missing `entities`"));
    }

    #[test]
    fn test_error_display_merge_reference() {
        let err = Error::MergeReference("canonical `Acme` not found".to_string());
        assert!(err.to_string().contains("Merge reference error"));
        assert!(err.to_string().contains("Acme"));
    }

    #[test]
    fn test_error_display_store_unavailable() {
        let err = Error::StoreUnavailable("connection refused".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Store unavailable"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_error_display_oracle_timeout() {
        let err = Error::OracleTimeout(Duration::from_secs(3));
        assert!(err.to_string().contains("timed out after 3s"));
    }

    #[test]
    fn test_error_display_invalid_state() {
        let err = Error::InvalidState {
            expected: "Accumulating",
            actual: "Empty",
        };
        let msg = err.to_string();
        assert!(msg.contains("expected Accumulating"));
        assert!(msg.contains("found Empty"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::OracleTimeout(Duration::from_millis(5)).is_retryable());
        assert!(Error::Oracle("502".to_string()).is_retryable());
        assert!(Error::ExtractionFormat("not json".to_string()).is_retryable());
        assert!(!Error::StoreUnavailable("down".to_string()).is_retryable());
        assert!(!Error::MergeReference("gone".to_string()).is_retryable());
        assert!(!Error::Config("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_result_unwrap_or_else() {
        let result: Result<i32> = Err(Error::Config("error".to_string()));
        let value = result.unwrap_or_else(|_| 42);
        assert_eq!(value, 42);
    }
}
