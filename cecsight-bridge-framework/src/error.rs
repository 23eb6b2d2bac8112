//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Zenoh connection error.
    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    /// Zenoh session error.
    #[error("Zenoh session error: {0}")]
    ZenohSession(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    /// Subscription error.
    #[error("Failed to subscribe to {key}: {message}")]
    Subscribe { key: String, message: String },

    /// Liveliness token error.
    #[error("Liveliness error: {0}")]
    Liveliness(String),

    /// Worker error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Create a liveliness error.
    pub fn liveliness(msg: impl Into<String>) -> Self {
        Self::Liveliness(msg.into())
    }
}

impl From<zenoh::Error> for BridgeError {
    fn from(err: zenoh::Error) -> Self {
        Self::ZenohSession(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<cecsight_common::Error> for BridgeError {
    fn from(err: cecsight_common::Error) -> Self {
        match err {
            cecsight_common::Error::Config(msg) => Self::Config(msg),
            cecsight_common::Error::Zenoh(e) => Self::ZenohSession(e.to_string()),
            cecsight_common::Error::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_convert() {
        let config: BridgeError = cecsight_common::Error::Config("bad mode".to_string()).into();
        assert!(matches!(config, BridgeError::Config(msg) if msg == "bad mode"));

        let io: BridgeError =
            cecsight_common::Error::Io(std::io::Error::other("disk gone")).into();
        assert!(matches!(io, BridgeError::Io(_)));

        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let json: BridgeError = cecsight_common::Error::Json(json_error).into();
        assert!(matches!(json, BridgeError::Config(_)));
    }
}
