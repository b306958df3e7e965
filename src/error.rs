//! Failure taxonomy shared by ingestion, derivation and the event consumer.

use thiserror::Error;
use uuid::Uuid;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input rejected before any durable write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No descriptor exists for the id.
    #[error("image {0} not found")]
    NotFound(Uuid),

    /// Store, database or broker unavailable. Safe to retry.
    #[error("transient io failure: {0:#}")]
    TransientIo(anyhow::Error),

    /// Corrupt or unsupported image payload.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn transient<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::TransientIo(err.into())
    }

    /// Only io failures are worth another delivery; everything else fails
    /// the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::TransientIo(_) => "transient_io",
            Self::Decode(_) => "decode",
        }
    }
}
