use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Schema incompatible: {0}")]
    SchemaCompatibility(String),

    #[error("{operation} on '{target}' failed: {message}")]
    Provider {
        operation: String,
        target: String,
        message: String,
    },

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub fn provider(
        operation: impl Into<String>,
        target: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Provider {
            operation: operation.into(),
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Validation and configuration errors are caller mistakes; nothing is
    /// gained by trying the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
