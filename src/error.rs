//! Error types for Mail Assist.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail provider errors.
///
/// Everything except `UnsupportedService` is treated as recoverable by the
/// workflow: it is logged and a default is substituted.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Unsupported email service: {0}")]
    UnsupportedService(String),

    #[error("Access token for {service} expired or was rejected")]
    AuthExpired { service: String },

    #[error("{service} API error (status {status}): {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed message {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Failed to build reply: {0}")]
    Build(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Collaborator (categorizer, writer, proofreader, ...) errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{agent} call failed: {source}")]
    Llm {
        agent: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("{agent} returned an unusable response: {reason}")]
    InvalidResponse { agent: &'static str, reason: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
