//! Error types for offline region management.

use thiserror::Error;

use crate::cache::CacheError;
use crate::transport::TransportError;

/// Result type for tilevault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing offline regions.
#[derive(Debug, Error)]
pub enum Error {
    /// A region definition was rejected before any I/O was performed.
    #[error("invalid region definition: {0}")]
    Validation(String),

    /// A style reference could not be resolved into descriptors.
    #[error("cannot resolve style {uri}: {reason}")]
    StyleResolution { uri: String, reason: String },

    /// A transport failure during a style-pack or tile fetch.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A cache read, write, or delete failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The cache reaper was invoked while a download was still active.
    #[error("cache is busy: {active} active download job(s)")]
    CacheBusy { active: usize },

    /// An operation referenced an unknown region or job id.
    #[error("region not found: {0}")]
    NotFound(String),

    /// I/O error while persisting or loading region records.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a persisted region record.
    #[error("region record error: {0}")]
    Record(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for a style resolution failure.
    pub fn style(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StyleResolution {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}
