// Error types for the executor core
//
// RuntimeError covers failures of the injected capabilities (database,
// notifications, AI, connectors, HTTP). ConfigError covers typed step
// configuration that cannot be parsed or violates a constraint. Neither ever
// crosses the executor contract: executors turn them into results.

use thiserror::Error;

/// Result type alias for capability operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by runtime capabilities
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Data access failed
    #[error("Database error: {0}")]
    Database(String),

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// AI completion failed
    #[error("AI error: {0}")]
    Ai(String),

    /// External connector call failed
    #[error("Connector error: {0}")]
    Connector(String),

    /// Outbound HTTP request failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Runtime could not be assembled
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        RuntimeError::Database(msg.into())
    }

    /// Create a notification error
    pub fn notification(msg: impl Into<String>) -> Self {
        RuntimeError::Notification(msg.into())
    }

    /// Create an AI error
    pub fn ai(msg: impl Into<String>) -> Self {
        RuntimeError::Ai(msg.into())
    }

    /// Create a connector error
    pub fn connector(msg: impl Into<String>) -> Self {
        RuntimeError::Connector(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        RuntimeError::Http(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        RuntimeError::Configuration(msg.into())
    }
}

/// Errors from parsing or validating a step's typed configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config map does not deserialize into the executor's config type
    #[error("invalid config for step '{step_id}': {source}")]
    Parse {
        step_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The config deserialized but violates a constraint
    #[error("invalid config for step '{step_id}': {reason}")]
    Invalid { step_id: String, reason: String },

    /// Required fields are absent from the config map
    #[error("executor '{executor}' is missing required config fields: {}", fields.join(", "))]
    MissingFields {
        executor: String,
        fields: Vec<String>,
    },

    /// A tenant override touched a field that is not overridable
    #[error("field '{field}' of executor '{executor}' cannot be overridden by a tenant")]
    NotOverridable { executor: String, field: String },
}

impl ConfigError {
    /// Create a constraint violation error
    pub fn invalid(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            step_id: step_id.into(),
            reason: reason.into(),
        }
    }
}
