//! Error types for request-bot.

use uuid::Uuid;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to read configuration at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to edit message {message_id} on channel {name}: {reason}")]
    EditFailed {
        name: String,
        message_id: String,
        reason: String,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Errors from rendering or performing an externally defined request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid request template: {reason}")]
    InvalidTemplate { reason: String },

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Unparsable response payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Invalid query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },
}

/// Errors raised while driving a command instance.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: /{0}")]
    Unknown(String),

    #[error("/{command} requires {required} positional argument(s), got {given}")]
    Usage {
        command: String,
        required: usize,
        given: usize,
    },

    #[error("Failed to request the \"{parameter}\" options: {reason}")]
    OptionsUnavailable { parameter: String, reason: String },

    #[error("Command instance {id} is not active")]
    NotActive { id: Uuid },

    #[error("Step {step} of command instance {id} is not awaiting input")]
    StaleStep { id: Uuid, step: usize },

    #[error("Option {option} is out of range for step {step}")]
    InvalidOption { step: usize, option: i64 },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
