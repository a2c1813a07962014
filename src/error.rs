/// Unified error handling for the stickyroute router
///
/// This module provides the error types surfaced by the router facade,
/// the errors a backend driver reports, and configuration errors.
use crate::core::Role;
use std::fmt;
use thiserror::Error;

/// Main error type for router operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A backend for the given role could not be reached
    #[error("Database unavailable ({role}): {message}")]
    DatabaseUnavailable { role: Role, message: String },

    /// The backend rejected the query
    #[error("Query error ({role}): {message} [query: {query}]")]
    Query {
        role: Role,
        query: String,
        message: String,
    },

    /// Establishing a backend connection exceeded the connect timeout
    #[error("Connection to {role} timed out")]
    Timeout { role: Role },

    /// An inner level was rolled back; the transaction can only be rolled back
    #[error("Transaction marked rollback-only at depth {depth}; commit refused")]
    RollbackOnly { depth: u32 },

    /// The router was closed and cannot serve further calls
    #[error("Router has been closed")]
    Closed,
}

/// Errors reported by a backend driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// Transport-level failure reaching the backend
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected the query
    #[error("Query error: {0}")]
    Query(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No replica endpoints configured")]
    NoReplicas,
}

/// Result type alias for router operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

impl RouterError {
    /// Tag a backend error with the role it came from
    pub fn from_backend(role: Role, query: &str, error: BackendError) -> Self {
        match error {
            BackendError::Connection(message) => RouterError::DatabaseUnavailable { role, message },
            BackendError::Query(message) => RouterError::Query {
                role,
                query: query.to_string(),
                message,
            },
        }
    }

    /// Role of the backend that failed, if the error is tied to one
    pub fn role(&self) -> Option<Role> {
        match self {
            RouterError::DatabaseUnavailable { role, .. }
            | RouterError::Query { role, .. }
            | RouterError::Timeout { role } => Some(*role),
            _ => None,
        }
    }

    /// Whether the failure is a "backend is down" condition
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RouterError::DatabaseUnavailable { .. } | RouterError::Timeout { .. }
        )
    }

    /// Check if this error is recoverable (the caller may retry)
    pub fn is_recoverable(&self) -> bool {
        self.is_unavailable()
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RouterError::Config(_) => ErrorSeverity::Critical,
            RouterError::DatabaseUnavailable { role: Role::Primary, .. } => ErrorSeverity::Critical,
            RouterError::DatabaseUnavailable { .. } => ErrorSeverity::Warning,
            RouterError::Timeout { .. } => ErrorSeverity::Warning,
            RouterError::Query { .. } => ErrorSeverity::Error,
            RouterError::RollbackOnly { .. } => ErrorSeverity::Error,
            RouterError::Closed => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

impl BackendError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        BackendError::Connection(message.into())
    }

    pub fn query<S: Into<String>>(message: S) -> Self {
        BackendError::Query(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_is_tagged_with_role() {
        let error = RouterError::from_backend(
            Role::Replica,
            "SELECT 1",
            BackendError::connection("refused"),
        );
        assert!(matches!(
            error,
            RouterError::DatabaseUnavailable { role: Role::Replica, .. }
        ));
        assert_eq!(error.role(), Some(Role::Replica));
        assert_eq!(error.to_string(), "Database unavailable (replica): refused");
    }

    #[test]
    fn test_query_error_keeps_driver_message() {
        let error = RouterError::from_backend(
            Role::Primary,
            "SELEC x",
            BackendError::query("syntax error near SELEC"),
        );
        match &error {
            RouterError::Query { role, query, message } => {
                assert_eq!(*role, Role::Primary);
                assert_eq!(query, "SELEC x");
                assert_eq!(message, "syntax error near SELEC");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_error_severity() {
        let primary_down = RouterError::DatabaseUnavailable {
            role: Role::Primary,
            message: "down".to_string(),
        };
        assert_eq!(primary_down.severity(), ErrorSeverity::Critical);

        let replica_down = RouterError::DatabaseUnavailable {
            role: Role::Replica,
            message: "down".to_string(),
        };
        assert_eq!(replica_down.severity(), ErrorSeverity::Warning);

        let config_error = RouterError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);
        assert_eq!(config_error.role(), None);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(RouterError::Timeout { role: Role::Replica }.is_recoverable());
        assert!(!RouterError::Closed.is_recoverable());
        assert!(!RouterError::RollbackOnly { depth: 1 }.is_recoverable());
    }
}
