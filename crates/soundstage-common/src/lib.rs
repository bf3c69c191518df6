//! # Soundstage Common
//!
//! Common types shared by the Soundstage crates.
//!
//! This crate provides foundational types used across the sound engine:
//! - ID types (SoundId, LumpId and the emitter handles)
//! - Version information for persisted data
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod ids;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::version::*;
}

pub use prelude::*;
