//! Error types for the message intake service.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage errors (connection or query failure).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Downstream agent dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Agent configuration not found for: {0}")]
    UnknownAgent(String),

    #[error("Agent returned status {0}")]
    Status(u16),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Database save failed: {0}")]
    MessageSave(#[source] DatabaseError),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}
