//! Error types for the event bus

use thiserror::Error;

/// Result type alias for event bus operations
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised by the event bus.
///
/// Every validation error is raised before the registry is touched, so a
/// failed call never leaves partial registrations behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Missing targets, events or handler, or an event name that cannot be used here.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An item in the target list cannot host listeners.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A selector was not preceded by a usable ancestor target.
    #[error("Invalid delegation: {0}")]
    InvalidDelegation(String),

    /// A registry path that should exist was not found.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EventError {
    /// Create a new invalid argument error
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new invalid target error
    pub fn target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    /// Create a new invalid delegation error
    pub fn delegation(msg: impl Into<String>) -> Self {
        Self::InvalidDelegation(msg.into())
    }

    /// Create a new invalid scope error
    pub fn scope(msg: impl Into<String>) -> Self {
        Self::InvalidScope(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            EventError::InvalidArgument(_) => "invalid_argument",
            EventError::InvalidTarget(_) => "invalid_target",
            EventError::InvalidDelegation(_) => "invalid_delegation",
            EventError::InvalidScope(_) => "invalid_scope",
            EventError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(EventError::argument("x").category(), "invalid_argument");
        assert_eq!(EventError::target("x").category(), "invalid_target");
        assert_eq!(EventError::delegation("x").category(), "invalid_delegation");
        assert_eq!(EventError::scope("x").category(), "invalid_scope");
        assert_eq!(EventError::config("x").category(), "config");
    }

    #[test]
    fn test_error_display() {
        let err = EventError::delegation("selector '.btn' at index 0");
        assert_eq!(
            err.to_string(),
            "Invalid delegation: selector '.btn' at index 0"
        );
    }
}
