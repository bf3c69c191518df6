//! ID types for sounds, asset lumps and sound emitters.

use serde::{Deserialize, Serialize};

/// Index into the sound registry.
///
/// Id 0 is reserved as "no sound"; ids handed out by the registry are
/// permanent for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SoundId(i32);

impl SoundId {
    /// The reserved "no sound" id.
    pub const NONE: Self = Self(0);

    /// Creates a sound ID from a raw value.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Creates a sound ID from a registry index.
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self(index as i32)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns the registry index, or `None` for non-positive ids.
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        if self.0 > 0 {
            Some(self.0 as usize)
        } else {
            None
        }
    }

    /// Checks if this id can name a playable sound (strictly positive).
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a raw sound resource supplied by the asset collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LumpId(u32);

impl LumpId {
    /// Creates a lump ID from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle of an actor-like emitter owned by the world layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(u64);

impl ActorId {
    /// Creates an actor ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle of a sector-like emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorId(u32);

impl SectorId {
    /// Creates a sector ID from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle of a polyobject emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolyobjId(u32);

impl PolyobjId {
    /// Creates a polyobject ID from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}
