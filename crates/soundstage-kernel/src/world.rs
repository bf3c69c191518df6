//! World Collaborator
//!
//! The listener snapshot, source descriptors and the strategy that turns a
//! source into a position and velocity.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use soundstage_common::{ActorId, PolyobjId, SectorId};

use crate::channel::ChannelFlags;

/// The single listener, updated once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Listener {
    /// Listener position.
    pub position: Vec3,
    /// Listener velocity.
    pub velocity: Vec3,
    /// Facing direction.
    pub orientation: Vec3,
    /// Entity the listener is attached to.
    pub listener_object: Option<ActorId>,
    /// Whether the snapshot describes a real listener.
    pub valid: bool,
}

impl Listener {
    /// Listener at a point facing +Y.
    #[must_use]
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            orientation: Vec3::Y,
            listener_object: None,
            valid: true,
        }
    }

    /// Attach the listener to an entity.
    #[must_use]
    pub const fn with_object(mut self, object: ActorId) -> Self {
        self.listener_object = Some(object);
        self
    }
}

/// What a channel is emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum SoundSource {
    /// Not positioned (plays at the listener).
    #[default]
    None,
    /// An actor-like entity.
    Actor(ActorId),
    /// A sector-like area.
    Sector(SectorId),
    /// A polyobject.
    Polyobj(PolyobjId),
    /// A free point in space.
    Unattached(Vec3),
}

impl SoundSource {
    /// Whether the source is an entity that owns slots.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        matches!(self, Self::Actor(_) | Self::Sector(_) | Self::Polyobj(_))
    }

    /// Actor handle, if any.
    #[must_use]
    pub const fn actor(&self) -> Option<ActorId> {
        match self {
            Self::Actor(actor) => Some(*actor),
            _ => None,
        }
    }

    /// Whether two descriptors name the same emitter.
    ///
    /// Unattached sources match only at the exact same point.
    #[must_use]
    pub fn same_emitter(&self, other: &Self) -> bool {
        self == other
    }

    /// Short tag for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Actor(_) => "actor",
            Self::Sector(_) => "sector",
            Self::Polyobj(_) => "polyobj",
            Self::Unattached(_) => "point",
        }
    }
}

/// Computes positions of sound sources.
pub trait SourcePositioner {
    /// Position and velocity of `source` for the current tick.
    fn position_velocity(
        &self,
        listener: &Listener,
        source: &SoundSource,
        slot: u8,
        flags: ChannelFlags,
    ) -> (Vec3, Vec3);

    /// Sanity check applied before a sound starts.
    fn validate(&self, _source: &SoundSource, _position: Vec3, _velocity: Vec3) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Emitters {
    actors: AHashMap<ActorId, (Vec3, Vec3)>,
    sectors: AHashMap<SectorId, Vec3>,
    polyobjs: AHashMap<PolyobjId, Vec3>,
    rejected: AHashSet<ActorId>,
}

/// Map-backed positioner. Clones share the same emitter table.
#[derive(Debug, Clone, Default)]
pub struct FixedPositions {
    inner: Arc<RwLock<Emitters>>,
}

impl FixedPositions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an actor.
    pub fn set_actor(&self, actor: ActorId, position: Vec3, velocity: Vec3) {
        self.inner.write().actors.insert(actor, (position, velocity));
    }

    /// Remove an actor.
    pub fn remove_actor(&self, actor: ActorId) {
        self.inner.write().actors.remove(&actor);
    }

    /// Place a sector's sound origin.
    pub fn set_sector(&self, sector: SectorId, position: Vec3) {
        self.inner.write().sectors.insert(sector, position);
    }

    /// Place a polyobject's sound origin.
    pub fn set_polyobj(&self, polyobj: PolyobjId, position: Vec3) {
        self.inner.write().polyobjs.insert(polyobj, position);
    }

    /// Make validation fail for an actor.
    pub fn reject_actor(&self, actor: ActorId) {
        self.inner.write().rejected.insert(actor);
    }
}

impl SourcePositioner for FixedPositions {
    fn position_velocity(
        &self,
        listener: &Listener,
        source: &SoundSource,
        _slot: u8,
        flags: ChannelFlags,
    ) -> (Vec3, Vec3) {
        let emitters = self.inner.read();
        let (mut position, velocity) = match source {
            SoundSource::None => (listener.position, Vec3::ZERO),
            SoundSource::Actor(actor) if listener.listener_object == Some(*actor) => {
                (listener.position, listener.velocity)
            },
            SoundSource::Actor(actor) => emitters
                .actors
                .get(actor)
                .copied()
                .unwrap_or((listener.position, Vec3::ZERO)),
            SoundSource::Sector(sector) => (
                emitters.sectors.get(sector).copied().unwrap_or(listener.position),
                Vec3::ZERO,
            ),
            SoundSource::Polyobj(polyobj) => (
                emitters.polyobjs.get(polyobj).copied().unwrap_or(listener.position),
                Vec3::ZERO,
            ),
            SoundSource::Unattached(point) => (*point, Vec3::ZERO),
        };
        if flags.contains(ChannelFlags::LISTENER_Z) {
            position.z = listener.position.z;
        }
        (position, velocity)
    }

    fn validate(&self, source: &SoundSource, position: Vec3, velocity: Vec3) -> bool {
        if !position.is_finite() || !velocity.is_finite() {
            return false;
        }
        !source
            .actor()
            .is_some_and(|actor| self.inner.read().rejected.contains(&actor))
    }
}
