//! # Soundstage Kernel
//!
//! Software sound-channel engine.
//!
//! This crate provides the playback core that sits between game logic and
//! an audio device:
//! - Sound registry with aliases, random groups and name hashing
//! - Distance rolloff model
//! - Channel pool with eviction and restoration
//! - Playback orchestrator (`start_sound` and friends)
//! - Lazy loading with data sharing between definitions
//! - Sound manifests and channel snapshots
//! - A simulated device backend for tests and tools
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────── SoundEngine ───────────────────────┐
//!  game ───▶ │ SoundRegistry   ChannelPool   SoundCurve   Listener        │
//!            └──────┬─────────────────┬──────────────────────┬────────────┘
//!                   │                 │                      │
//!             SoundAssets       SoundBackend ──events──▶ BackendEvents
//!             (raw bytes)       (device/mixer)          (drained per call)
//!                                     │
//!                              SourcePositioner
//!                              (world positions)
//! ```
//!
//! The engine is single-threaded. Backend notifications travel through a
//! channel and are applied on the engine's thread after each backend call
//! that can end voices.
//!
//! ## Eviction
//!
//! When the device loses voices, channels keep their state and are flagged
//! evicted. The restore pass, run from `update_sounds`, restarts them oldest
//! first at the offset they had reached.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod assets;
pub mod backend;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
mod eviction;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod rolloff;
pub mod snapshot;
pub mod virtual_backend;
pub mod world;

#[cfg(test)]
mod engine_tests;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::assets::*;
    pub use crate::backend::*;
    pub use crate::channel::*;
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::error::*;
    pub use crate::loader::*;
    pub use crate::manifest::*;
    pub use crate::registry::*;
    pub use crate::rolloff::*;
    pub use crate::snapshot::*;
    pub use crate::virtual_backend::*;
    pub use crate::world::*;
    pub use soundstage_common::{ActorId, LumpId, PolyobjId, SectorId, SoundId};
}

pub use prelude::*;
