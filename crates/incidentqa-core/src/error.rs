use std::time::Duration;

use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Error)]
pub enum Error {
    #[error("index store is not loaded")]
    IndexUnavailable,

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("{channel:?} channel failed: {reason}")]
    ChannelFailed { channel: Channel, reason: String },

    #[error("routing decision timed out")]
    RoutingTimeout,

    #[error("synthesis rate limited")]
    SynthesisRateLimited { retry_after: Option<Duration> },

    #[error("synthesis context too large")]
    ContextTooLarge,

    #[error("synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Only a missing index and an exhausted retrieval fail a whole request;
    /// every other condition is absorbed into a degraded answer.
    pub fn is_request_fatal(&self) -> bool {
        matches!(self, Self::IndexUnavailable | Self::RetrievalUnavailable(_))
    }

    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IndexUnavailable => "index_unavailable",
            Self::RetrievalUnavailable(_) => "retrieval_unavailable",
            Self::ChannelFailed { .. } => "channel_failed",
            Self::RoutingTimeout => "routing_timeout",
            Self::SynthesisRateLimited { .. } => "synthesis_rate_limited",
            Self::ContextTooLarge => "context_too_large",
            Self::SynthesisUnavailable(_) => "synthesis_unavailable",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Operation(_) | Self::Io(_) | Self::Json(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
