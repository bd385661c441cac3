//! Error types for the bridge.
//!
//! Each failure kind maps to one recovery policy:
//! - `MessagingFailure`: returned to the caller of `Producer::send`, no retry
//! - `DecodeFailure`: logged by the consumer loop, message dropped
//! - `ValidationFailure`: reported per CSV row, batch continues
//! - `DeliveryFailure`: reported as an error status envelope
//! - `StorageFailure`: reported as a single batch-level error envelope
//! - `BrokerError` / `ConfigError`: fatal when hit during startup

use thiserror::Error;

/// Transport-level broker errors.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("failed to declare topology for {topic}: {reason}")]
    Topology { topic: String, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("broker rejected the message")]
    Rejected,

    #[error("failed to subscribe to {topic} as {group}: {reason}")]
    Subscribe {
        topic: String,
        group: String,
        reason: String,
    },

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("failed to acknowledge delivery {tag}: {reason}")]
    Ack { tag: u64, reason: String },

    #[error("failed to close {0}")]
    Close(String),
}

/// A message could not be handed to the broker.
///
/// Callers must treat this as "not guaranteed delivered".
#[derive(Error, Debug)]
#[error("failed to send message to {topic}: {reason}")]
pub struct MessagingFailure {
    pub topic: String,
    pub reason: String,
}

impl MessagingFailure {
    pub fn new(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}

/// An envelope could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeFailure {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// A CSV batch or one of its rows failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("field `{0}` is required")]
    MissingField(&'static str),

    #[error("field `{field}` is not a valid email address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("field `{field}` must be between {min} and {max} characters")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
    },

    #[error("unreadable row: {0}")]
    Row(String),
}

/// The mail could not be rendered or sent.
#[derive(Error, Debug)]
pub enum DeliveryFailure {
    #[error("error preparing email template: {0}")]
    Render(String),

    #[error("invalid {field} address: {reason}")]
    Address { field: &'static str, reason: String },

    #[error("failed to build email message: {0}")]
    Build(String),

    #[error("failed to send email: {0}")]
    Transport(String),
}

/// A referenced file could not be opened or read.
#[derive(Error, Debug)]
pub enum StorageFailure {
    #[error("file \"{0}\" not found")]
    NotFound(String),

    #[error("failed to read file \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read csv: {0}")]
    Csv(String),

    #[error("invalid file path \"{0}\"")]
    InvalidPath(String),
}

/// Record store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record is incomplete: {0}")]
    Incomplete(&'static str),
}

/// Malformed configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown smtp type: {0}")]
    UnknownSmtpType(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to load template {path}: {reason}")]
    Template { path: String, reason: String },
}

/// A supervised consumer task failed.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("consumer {id} failed: {source}")]
    Consumer {
        id: String,
        #[source]
        source: BrokerError,
    },

    #[error("consumer {id} stopped before it was running")]
    NotStarted { id: String },

    #[error("consumer {id} panicked: {reason}")]
    Panicked { id: String, reason: String },
}

/// Errors a handler reports back to the consumer loop.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeFailure),

    #[error(transparent)]
    Messaging(#[from] MessagingFailure),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Decode(DecodeFailure::Json(err))
    }
}
