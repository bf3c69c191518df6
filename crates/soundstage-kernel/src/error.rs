//! Sound engine error types.
//!
//! Errors never escape the playback path: `start_sound` reports "no channel"
//! and configuration or resource problems degrade to the empty sound. These
//! types surface from load-time construction (manifests, random groups),
//! chain resolution and persistence.

use soundstage_common::SoundId;
use thiserror::Error;

/// Sound engine error types.
#[derive(Debug, Error)]
pub enum SoundError {
    /// An alias/random chain revisits a sound or exceeds the registry size.
    #[error("Sound link chain starting at {id} does not terminate")]
    LinkCycle {
        /// Head of the offending chain.
        id: SoundId,
    },

    /// A sound name could not be resolved.
    #[error("Unknown sound '{0}'")]
    UnknownSound(String),

    /// A random group was declared without candidates.
    #[error("Random sound '{0}' has no candidates")]
    EmptyRandomGroup(String),

    /// A sound id outside the registry.
    #[error("Invalid sound id {0}")]
    InvalidSoundId(SoundId),

    /// Failed to decode sound data.
    #[error("Failed to decode sound: {0}")]
    Decode(String),

    /// Malformed sound manifest.
    #[error("Invalid sound manifest: {0}")]
    Manifest(String),

    /// Channel snapshot could not be applied.
    #[error("Invalid channel snapshot: {0}")]
    Snapshot(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sound engine operations.
pub type SoundResult<T> = Result<T, SoundError>;
