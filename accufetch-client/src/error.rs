//! Error types for the accufetch client.

use accufetch_core::FetchError;

/// Client error types
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The batching engine did not deliver a response
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The endpoint answered this request with an error response
    #[error("API error: {0}")]
    Api(String),

    /// A response payload did not have the expected shape
    #[error("Invalid response payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the engine was shut down underneath this call
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Fetch(FetchError::Cancelled | FetchError::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ClientError::Api("user exists".into()).to_string(), "API error: user exists");
        assert_eq!(
            ClientError::from(FetchError::Aborted).to_string(),
            "fetch task aborted by caller"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(ClientError::from(FetchError::Cancelled).is_cancelled());
        assert!(!ClientError::Api("x".into()).is_cancelled());
        assert!(!ClientError::from(FetchError::ProtocolViolation { expected: 1, actual: 2 })
            .is_cancelled());
    }
}
