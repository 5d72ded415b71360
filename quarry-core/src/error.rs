//! Error types for Quarry

use thiserror::Error;

/// The main error type for Quarry operations
#[derive(Error, Debug)]
pub enum Error {
    /// A required driver is not compiled in or not available
    #[error("Missing dependency: {name}")]
    MissingDependency { name: String },

    /// No live connection is registered under the requested name
    #[error("Invalid connection: {message}")]
    InvalidConnection { message: String },

    /// Caller supplied empty or malformed input
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Statement failed to prepare or execute
    #[error("Invalid query: {message} (SQL: {sql})")]
    InvalidQuery { sql: String, message: String },

    /// A structural expectation about a table was not met
    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    /// A multi-step duplication failed partway
    #[error("Duplication failed: {source}")]
    UnknownDuplication {
        #[source]
        source: Box<Error>,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// File system error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for Quarry operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new missing dependency error
    pub fn missing_dependency(name: impl Into<String>) -> Self {
        Self::MissingDependency { name: name.into() }
    }

    /// Create a new invalid connection error
    pub fn invalid_connection(message: impl Into<String>) -> Self {
        Self::InvalidConnection {
            message: message.into(),
        }
    }

    /// Create a new invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a new invalid query error carrying the failing SQL
    pub fn invalid_query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid schema error
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Wrap a failure that interrupted a duplication
    pub fn duplication(source: Error) -> Self {
        Self::UnknownDuplication {
            source: Box::new(source),
        }
    }

    /// Whether the failure stems from how the caller used the API rather than
    /// from the server or the network.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::MissingDependency { .. }
                | Error::InvalidArgument { .. }
                | Error::InvalidSchema { .. }
        )
    }
}
