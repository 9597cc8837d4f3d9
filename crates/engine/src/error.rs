use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors that can occur while turning a log blob into tool runs.
///
/// None of these escape [`crate::parse_log`]; they are surfaced only by the
/// fallible [`crate::try_parse_log`] and converted to an empty result at the
/// top level.
#[derive(Error, Debug)]
pub enum LogError {
    /// Content does not look like text (NUL bytes, invalid UTF-8, control noise)
    #[error("Input looks like binary content: {0}")]
    BinaryContent(String),

    /// Input exceeds the configured line bound
    #[error("Input too large: {lines} lines exceeds limit of {limit}")]
    InputTooLarge { lines: usize, limit: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Result could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LogError {
    /// Create a binary-content error
    pub fn binary(msg: impl Into<String>) -> Self {
        Self::BinaryContent(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
