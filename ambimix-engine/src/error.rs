//! Error types for ambimix-engine
//!
//! Superseded fades and transitions are not errors; they are reported
//! through `FadeOutcome` and `TransitionOutcome`.

use ambimix_common::{AtmosphereId, ChannelId};
use thiserror::Error;

/// Main error type for ambimix-engine
#[derive(Error, Debug)]
pub enum Error {
    /// A channel's audio source could not be obtained or opened
    #[error("Failed to load source for channel {channel_id}: {reason}")]
    SourceLoad { channel_id: ChannelId, reason: String },

    /// Library lookup has no source for this channel
    #[error("No source available for channel {0}")]
    MissingSource(ChannelId),

    /// Audio backend rejected an operation on an open voice
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// Channel id not present in the registry
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Atmosphere id not present in the store
    #[error("Atmosphere not found: {0}")]
    AtmosphereNotFound(AtmosphereId),

    /// Atmosphere definition violates its invariants
    #[error("Invalid atmosphere definition: {0}")]
    InvalidDefinition(String),

    /// Errors from the shared library (config, parsing, I/O)
    #[error(transparent)]
    Common(#[from] ambimix_common::Error),
}

impl Error {
    /// Channel the error refers to, if any
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Error::SourceLoad { channel_id, .. } => Some(*channel_id),
            Error::MissingSource(id) | Error::ChannelNotFound(id) => Some(*id),
            _ => None,
        }
    }
}

/// Convenience Result type using ambimix-engine Error
pub type Result<T> = std::result::Result<T, Error>;
