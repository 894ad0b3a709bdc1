//! Controller error types.
//!
//! Every controller call returns [`ClientResult`]; the plugin treats any
//! error raised while creating objects as a creation failure and compensates.

use std::fmt::Display;
use thiserror::Error;

/// Error type for controller operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The addressed object does not exist on the controller.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An object with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// The request was malformed (bad position, mismatched address family).
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The controller refused the operation.
    #[error("Controller rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    /// The controller could not be reached.
    #[error("Controller unavailable: {message}")]
    Unavailable { message: String },
}

impl ClientError {
    pub fn not_found(kind: &'static str, id: impl Display) -> Self {
        ClientError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl Display) -> Self {
        ClientError::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ClientError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ClientError::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if the error says the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// Returns true if repeating the call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Unavailable { .. })
    }
}

/// Result type for controller operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let err = ClientError::not_found("chain", "OS_SG_abc_INGRESS");
        assert_eq!(err.to_string(), "chain not found: OS_SG_abc_INGRESS");
        assert!(err.is_not_found());

        let err = ClientError::rejected("add_rule", "position 9 out of range");
        assert_eq!(
            err.to_string(),
            "Controller rejected add_rule: position 9 out of range"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(ClientError::unavailable("connection refused").is_retryable());
        assert!(!ClientError::already_exists("bridge", "b1").is_retryable());
        assert!(!ClientError::invalid_request("bad").is_not_found());
    }
}
