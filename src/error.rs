//! Error types for the offline cache engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error types that can occur in the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Control message error: {0}")]
    Control(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(err.to_string())
        } else {
            EngineError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        EngineError::Parse(format!("invalid URL: {}", err))
    }
}

impl EngineError {
    /// Whether this error came from the network layer
    ///
    /// Only network errors (including timeouts) trigger the cache-fallback
    /// branch of a strategy. Everything else is a local failure.
    pub fn is_network_error(&self) -> bool {
        matches!(self, EngineError::Network(_) | EngineError::Timeout(_))
    }

    /// Convert error to an HTTP status code for the proxy adapter
    ///
    /// - Network failures become 502 Bad Gateway
    /// - Timeouts become 504 Gateway Timeout
    /// - Malformed input becomes 400 Bad Request
    /// - Everything else is a 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            EngineError::Network(_) => 502,
            EngineError::Timeout(_) => 504,
            EngineError::Parse(_) => 400,
            EngineError::Control(_) => 400,
            EngineError::Cache(_) => 500,
            EngineError::Config(_) => 500,
            EngineError::Lifecycle(_) => 500,
            EngineError::Io(_) => 500,
            EngineError::Serialization(_) => 500,
        }
    }
}
