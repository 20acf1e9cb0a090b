//! Core error types for the device agent

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A recognized key was given a value its validator rejects
    #[error("Invalid value for key {key}: {value}")]
    InvalidValue { key: String, value: String },

    /// Configuration document is not a JSON object
    #[error("Configuration must be a JSON object")]
    NotAnObject,

    /// JSON parse error
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failed to persist configuration
    #[error("Failed to write config: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the platform REST surface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    /// The request never produced an HTTP response
    #[error("No response from platform: {0}")]
    NoResponse(String),

    /// The platform answered with a non-success status
    #[error("Platform returned status {status}{}", .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    Status { status: u16, message: Option<String> },

    /// The response body did not have the expected shape
    #[error("Unexpected response from platform: {0}")]
    UnexpectedResponse(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Management session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Publishing a message failed
    #[error("Failed to publish on {topic}: {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribing failed
    #[error("Failed to subscribe: {0}")]
    Subscribe(String),

    /// Session is closed
    #[error("Session closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_error_display() {
        let err = RestError::Status {
            status: 401,
            message: Some("User account is locked".to_string()),
        };
        assert_eq!(err.to_string(), "Platform returned status 401: User account is locked");

        let err = RestError::Status { status: 503, message: None };
        assert_eq!(err.to_string(), "Platform returned status 503");

        assert_eq!(
            RestError::NoResponse("connection refused".into()).to_string(),
            "No response from platform: connection refused"
        );
    }
}
