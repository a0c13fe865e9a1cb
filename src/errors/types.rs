//! # Error Types
//!
//! Crate-wide error type for the dirfleet orchestration engine using `thiserror`.

/// Custom result type for dirfleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Main error type for the fleet orchestration engine
#[derive(thiserror::Error, Debug)]
pub enum FleetError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Directory protocol errors
    #[error("Directory error: {0}")]
    Directory(#[from] crate::directory::DirectoryError),

    /// Remote execution errors
    #[error("Remote execution error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// Signing service errors
    #[error("Signing service error: {0}")]
    Signing(#[from] crate::services::signing_service::SigningError),

    /// Secret cipher errors
    #[error("Secret cipher error: {0}")]
    Cipher(#[from] crate::services::secret_cipher::CipherError),

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Resource conflict errors (e.g., already exists, still referenced)
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Transport failures not owned by a component client
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Job was cancelled between steps
    #[error("Task {task_id} was cancelled")]
    Cancelled { task_id: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FleetError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: ToString>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.to_string() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(task_id: S) -> Self {
        Self::Cancelled { task_id: task_id.into() }
    }

    /// Wrap a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Check if this error is a storage constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            FleetError::Database { source, .. } => source
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| code.as_ref() == "2067" || code.as_ref() == "1555" || code.as_ref() == "787")
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<sqlx::migrate::MigrateError> for FleetError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Database {
            source: sqlx::Error::Migrate(Box::new(error)),
            context: "Database migration failed".to_string(),
        }
    }
}

impl From<std::io::Error> for FleetError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for FleetError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryError;

    #[test]
    fn test_error_creation() {
        let error = FleetError::config("Test configuration error");
        assert!(matches!(error, FleetError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_validation_error() {
        let error = FleetError::validation_field("Port out of range", "port");
        if let FleetError::Validation { field, .. } = error {
            assert_eq!(field, Some("port".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_not_found_message() {
        let error = FleetError::not_found("ServerNode", 42);
        assert_eq!(error.to_string(), "Resource not found: ServerNode with ID '42'");
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let fleet_error: FleetError = io_error.into();
        assert!(matches!(fleet_error, FleetError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let fleet_error: FleetError = json_error.into();
        assert!(matches!(fleet_error, FleetError::Serialization { .. }));

        let dir_error: FleetError = DirectoryError::NoSuchObject { dn: "cn=x".into() }.into();
        assert!(matches!(dir_error, FleetError::Directory(_)));
    }

    #[test]
    fn test_cancelled_is_not_constraint_violation() {
        assert!(!FleetError::cancelled("abc").is_constraint_violation());
    }
}
