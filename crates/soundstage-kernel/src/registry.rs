//! Sound Registry
//!
//! Append-only table of sound definitions indexed by [`SoundId`].
//!
//! Definitions are inserted while sound data is being declared and are
//! never removed individually; the whole table is cleared on reset. Each
//! definition resolves in exactly one way, described by its [`SoundLink`]:
//! a plain sound, an alias of another sound, or the header of a random
//! group.
//!
//! Name lookup goes through a bucket-chained hash table that is rebuilt by
//! [`SoundRegistry::rehash`] once insertion is complete. Until then
//! [`SoundRegistry::find_by_name`] falls back to a linear scan.

use std::hash::Hasher;

use ahash::{AHashMap, AHashSet, AHasher};
use bitflags::bitflags;
use soundstage_common::{LumpId, SoundId};
use tracing::{debug, warn};

use crate::backend::SampleHandle;
use crate::error::{SoundError, SoundResult};
use crate::rolloff::RolloffInfo;

/// Default number of nearby instances allowed for a new sound.
pub const DEFAULT_NEAR_LIMIT: i16 = 2;

/// Default near-limit range (squared distance, 256 units).
pub const DEFAULT_LIMIT_RANGE: f32 = 256.0 * 256.0;

/// Near-limit value meaning "take the limit from the resolved sound".
pub const INHERIT_NEAR_LIMIT: i16 = -1;

bitflags! {
    /// Per-definition flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SoundFlags: u16 {
        /// Sound data is headerless PCM.
        const LOAD_RAW = 1 << 0;
        /// Raw data is 16 bit.
        const SIXTEEN_BIT = 1 << 1;
        /// Marked as used by the current level.
        const USED = 1 << 2;
        /// Only one instance may play at a time.
        const SINGULAR = 1 << 3;
        /// Referenced before its definition was known.
        const TENTATIVE = 1 << 4;
        /// Reserved for player-specific sound resolution.
        const PLAYER_RESERVE = 1 << 5;
        /// Player sound kept for compatibility lookups.
        const PLAYER_COMPAT = 1 << 6;
        /// Player sound that is intentionally silent.
        const PLAYER_SILENT = 1 << 7;
    }
}

/// How a sound definition resolves to playable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoundLink {
    /// Plays its own data.
    #[default]
    Terminal,
    /// Stands in for another sound.
    Alias(SoundId),
    /// Header of the random group at this index.
    Random(usize),
}

/// A registered sound definition.
#[derive(Debug, Clone)]
pub struct SoundDef {
    /// Logical name (case-insensitive).
    pub name: String,
    /// Backing resource; `None` when the sound has no data of its own.
    pub lump: Option<LumpId>,
    /// Loaded data handle.
    pub data: Option<SampleHandle>,
    /// Loaded mono data handle for positional playback.
    pub data_3d: Option<SampleHandle>,
    /// External resource number.
    pub resource_id: Option<i32>,
    /// Volume multiplier applied to every start request.
    pub volume: f32,
    /// Attenuation multiplier.
    pub attenuation: f32,
    /// Random pitch variation mask.
    pub pitch_mask: u8,
    /// Maximum nearby instances; 0 is unlimited, negative inherits.
    pub near_limit: i16,
    /// Squared range used by the near limit.
    pub limit_range: f32,
    /// Sample rate for raw data.
    pub raw_rate: u32,
    /// Loop start in samples.
    pub loop_start: Option<u32>,
    /// Resolution behavior.
    pub link: SoundLink,
    /// Sound specific rolloff.
    pub rolloff: RolloffInfo,
    /// Flag bits.
    pub flags: SoundFlags,
}

impl SoundDef {
    fn new(name: &str, lump: Option<LumpId>, pitch_mask: u8, resource_id: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            lump,
            data: None,
            data_3d: None,
            resource_id,
            volume: 1.0,
            attenuation: 1.0,
            pitch_mask,
            near_limit: DEFAULT_NEAR_LIMIT,
            limit_range: DEFAULT_LIMIT_RANGE,
            raw_rate: 0,
            loop_start: None,
            link: SoundLink::Terminal,
            rolloff: RolloffInfo::UNSET,
            flags: SoundFlags::empty(),
        }
    }

    /// Whether this definition plays its own data.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.link, SoundLink::Terminal)
    }

    /// Whether this definition heads a random group.
    #[must_use]
    pub const fn is_random_header(&self) -> bool {
        matches!(self.link, SoundLink::Random(_))
    }

    /// Whether the primary data is loaded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.data.is_some()
    }
}

/// Candidates of a random sound.
#[derive(Debug, Clone)]
pub struct RandomSoundGroup {
    /// Sound heading the group.
    pub owner: SoundId,
    /// Sounds picked from with uniform probability.
    pub choices: Vec<SoundId>,
}

/// Result of walking a link chain for playback.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSound {
    /// Concrete sound to play.
    pub id: SoundId,
    /// Near limit of the first chain member that defines one.
    pub near_limit: i16,
    /// Range belonging to `near_limit`.
    pub limit_range: f32,
    /// Rolloff of the first chain member that sets one (may be unset).
    pub rolloff: RolloffInfo,
    /// Caller attenuation times every chain member's multiplier.
    pub attenuation: f32,
    /// Pitch mask of the requested sound.
    pub pitch_mask: u8,
}

/// The registry of all sound definitions.
#[derive(Debug)]
pub struct SoundRegistry {
    sounds: Vec<SoundDef>,
    groups: Vec<RandomSoundGroup>,
    resource_ids: AHashMap<i32, SoundId>,
    buckets: Vec<u32>,
    chain: Vec<u32>,
    hashed_len: usize,
    global_rolloff: RolloffInfo,
    empty_lump: Option<LumpId>,
}

impl Default for SoundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive name hash.
fn make_key(name: &str) -> u64 {
    let mut hasher = AHasher::default();
    for b in name.bytes() {
        hasher.write_u8(b.to_ascii_lowercase());
    }
    hasher.finish()
}

impl SoundRegistry {
    /// Create a registry holding only the reserved "no sound" entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sounds: vec![SoundDef::new("", None, 0, None)],
            groups: Vec::new(),
            resource_ids: AHashMap::new(),
            buckets: Vec::new(),
            chain: Vec::new(),
            hashed_len: 0,
            global_rolloff: RolloffInfo::engine_default(),
            empty_lump: None,
        }
    }

    /// Remove every definition and random group.
    pub fn clear(&mut self) {
        self.sounds.truncate(1);
        self.groups.clear();
        self.resource_ids.clear();
        self.buckets.clear();
        self.chain.clear();
        self.hashed_len = 0;
        debug!("Cleared sound registry");
    }

    /// Number of entries including the reserved one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    /// Whether only the reserved entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sounds.len() <= 1
    }

    /// Get a definition.
    #[must_use]
    pub fn get(&self, id: SoundId) -> Option<&SoundDef> {
        self.sounds.get(id.index()?)
    }

    /// Get a definition mutably.
    pub fn get_mut(&mut self, id: SoundId) -> Option<&mut SoundDef> {
        self.sounds.get_mut(id.index()?)
    }

    /// Iterate over all real definitions with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (SoundId, &SoundDef)> {
        self.sounds
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, def)| (SoundId::from_index(i), def))
    }

    /// Name of a sound; empty for the reserved id or unknown ids.
    #[must_use]
    pub fn sound_name(&self, id: SoundId) -> &str {
        self.get(id).map_or("", |def| def.name.as_str())
    }

    /// Rolloff used when neither the caller nor the sound set one.
    #[must_use]
    pub const fn global_rolloff(&self) -> &RolloffInfo {
        &self.global_rolloff
    }

    /// Replace the global rolloff.
    pub fn set_global_rolloff(&mut self, rolloff: RolloffInfo) {
        self.global_rolloff = rolloff;
    }

    /// Lump holding the empty sound.
    #[must_use]
    pub const fn empty_lump(&self) -> Option<LumpId> {
        self.empty_lump
    }

    /// Set the lump holding the empty sound.
    pub fn set_empty_lump(&mut self, lump: Option<LumpId>) {
        self.empty_lump = lump;
    }

    /// Whether a definition is backed by the empty sound (and never plays).
    #[must_use]
    pub fn is_empty_sound(&self, def: &SoundDef) -> bool {
        def.lump.is_none() || def.lump == self.empty_lump
    }

    // ============================================
    // Lookup
    // ============================================

    /// Find a sound by name through the hash table.
    ///
    /// Returns [`SoundId::NONE`] when absent.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> SoundId {
        if self.hashed_len != self.sounds.len() {
            return self.find_by_linear_scan(name);
        }
        let bucket = (make_key(name) % self.hashed_len as u64) as usize;
        let mut i = self.buckets[bucket];
        while i != 0 && !self.sounds[i as usize].name.eq_ignore_ascii_case(name) {
            i = self.chain[i as usize];
        }
        SoundId::new(i as i32)
    }

    /// Find a sound by name without the hash table.
    #[must_use]
    pub fn find_by_linear_scan(&self, name: &str) -> SoundId {
        self.iter()
            .find(|(_, def)| def.name.eq_ignore_ascii_case(name))
            .map_or(SoundId::NONE, |(id, _)| id)
    }

    /// Find a sound by external resource number.
    #[must_use]
    pub fn find_by_resource_id(&self, resource_id: i32) -> SoundId {
        self.resource_ids
            .get(&resource_id)
            .copied()
            .unwrap_or(SoundId::NONE)
    }

    /// Find the first sound backed by a lump.
    #[must_use]
    pub fn find_by_lump(&self, lump: LumpId) -> SoundId {
        self.iter()
            .find(|(_, def)| def.lump == Some(lump))
            .map_or(SoundId::NONE, |(id, _)| id)
    }

    /// Rebuild the name hash table. Call after all insertions.
    pub fn rehash(&mut self) {
        let size = self.sounds.len();
        self.sounds.shrink_to_fit();
        self.groups.shrink_to_fit();
        self.buckets = vec![0; size];
        self.chain = vec![0; size];
        for i in 1..size {
            let j = (make_key(&self.sounds[i].name) % size as u64) as usize;
            self.chain[i] = self.buckets[j];
            self.buckets[j] = i as u32;
        }
        self.hashed_len = size;
        debug!("Hashed {} sounds", size - 1);
    }

    // ============================================
    // Insertion
    // ============================================

    /// Append a plain sound definition and return its permanent id.
    pub fn insert(
        &mut self,
        name: &str,
        lump: Option<LumpId>,
        pitch_mask: u8,
        resource_id: Option<i32>,
    ) -> SoundId {
        let id = SoundId::from_index(self.sounds.len());
        self.sounds.push(SoundDef::new(name, lump, pitch_mask, resource_id));
        if let Some(rid) = resource_id.filter(|rid| *rid >= 0) {
            self.resource_ids.insert(rid, id);
        }
        id
    }

    /// Assign an external resource number; the latest assignment wins.
    pub fn set_resource_id(&mut self, id: SoundId, resource_id: i32) {
        if let Some(def) = self.get_mut(id) {
            def.resource_id = Some(resource_id);
            self.resource_ids.insert(resource_id, id);
        }
    }

    /// Find a sound by name or create a placeholder without data.
    pub fn find_or_create_tentative(&mut self, name: &str) -> SoundId {
        let id = self.find_by_linear_scan(name);
        if id.is_valid() {
            return id;
        }
        let id = self.insert(name, None, 0, None);
        if let Some(def) = self.get_mut(id) {
            def.flags |= SoundFlags::TENTATIVE;
        }
        id
    }

    /// Make `from` an alias of `to`.
    ///
    /// The alias inherits the target's near limit unless it sets its own.
    pub fn set_alias(&mut self, from: SoundId, to: SoundId) -> SoundResult<()> {
        if self.get(to).is_none() {
            return Err(SoundError::InvalidSoundId(to));
        }
        let def = self.get_mut(from).ok_or(SoundError::InvalidSoundId(from))?;
        def.link = SoundLink::Alias(to);
        def.near_limit = INHERIT_NEAR_LIMIT;
        def.flags.remove(SoundFlags::TENTATIVE);
        Ok(())
    }

    /// Install a random group headed by `owner`.
    pub fn add_random_group(&mut self, owner: SoundId, choices: Vec<SoundId>) -> SoundResult<()> {
        let Some(def) = self.get(owner) else {
            return Err(SoundError::InvalidSoundId(owner));
        };
        if choices.is_empty() {
            return Err(SoundError::EmptyRandomGroup(def.name.clone()));
        }
        if let Some(bad) = choices.iter().find(|c| self.get(**c).is_none()) {
            return Err(SoundError::InvalidSoundId(*bad));
        }

        let index = self.groups.len();
        self.groups.push(RandomSoundGroup { owner, choices });
        let def = self.get_mut(owner).ok_or(SoundError::InvalidSoundId(owner))?;
        def.link = SoundLink::Random(index);
        def.near_limit = INHERIT_NEAR_LIMIT;
        def.flags.remove(SoundFlags::TENTATIVE);
        Ok(())
    }

    /// Group headed by a random sound.
    #[must_use]
    pub fn random_group(&self, id: SoundId) -> Option<&RandomSoundGroup> {
        match self.get(id)?.link {
            SoundLink::Random(index) => self.groups.get(index),
            _ => None,
        }
    }

    // ============================================
    // Usage marks
    // ============================================

    /// Mark a sound as used.
    pub fn mark_used(&mut self, id: SoundId) {
        if let Some(def) = self.get_mut(id) {
            def.flags |= SoundFlags::USED;
        }
    }

    /// Clear every usage mark.
    pub fn mark_all_unused(&mut self) {
        for def in &mut self.sounds {
            def.flags.remove(SoundFlags::USED);
        }
    }

    // ============================================
    // Resolution
    // ============================================

    fn step(&self, id: SoundId, rng: &mut fastrand::Rng) -> Option<SoundId> {
        match self.get(id)?.link {
            SoundLink::Terminal => None,
            SoundLink::Alias(target) => Some(target),
            SoundLink::Random(index) => {
                let group = self.groups.get(index)?;
                Some(group.choices[rng.usize(..group.choices.len())])
            },
        }
    }

    /// Pick a concrete candidate for a random header.
    ///
    /// Sounds that do not head a random group are returned unchanged.
    pub fn pick_replacement(&self, id: SoundId, rng: &mut fastrand::Rng) -> SoundResult<SoundId> {
        let mut visited = AHashSet::new();
        let mut current = id;
        while self.get(current).is_some_and(SoundDef::is_random_header) {
            if !visited.insert(current) {
                return Err(SoundError::LinkCycle { id });
            }
            current = self.step(current, rng).unwrap_or(current);
        }
        Ok(current)
    }

    /// Follow aliases and random groups down to a terminal sound.
    ///
    /// A chain that reaches a sound it already passed through is rejected.
    pub fn resolve_chain(&self, id: SoundId, rng: &mut fastrand::Rng) -> SoundResult<SoundId> {
        if self.get(id).is_none() {
            return Err(SoundError::InvalidSoundId(id));
        }
        let mut visited = AHashSet::new();
        visited.insert(id);
        let mut current = id;
        while let Some(next) = self.step(current, rng) {
            if self.get(next).is_none() {
                warn!("Sound {} links to invalid sound {}", self.sound_name(current), next);
                return Err(SoundError::LinkCycle { id });
            }
            if !visited.insert(next) {
                warn!("Sound {} loops back to {}", self.sound_name(id), self.sound_name(next));
                return Err(SoundError::LinkCycle { id });
            }
            current = next;
        }
        Ok(current)
    }

    /// Resolve a requested sound for playback.
    ///
    /// Near limit and rolloff come from the first chain member that defines
    /// them; attenuation is multiplied by every member's multiplier.
    pub fn resolve_for_playback(
        &self,
        id: SoundId,
        attenuation: f32,
        rng: &mut fastrand::Rng,
    ) -> SoundResult<ResolvedSound> {
        let head = self.get(id).ok_or(SoundError::InvalidSoundId(id))?;
        let mut resolved = ResolvedSound {
            id,
            near_limit: head.near_limit,
            limit_range: head.limit_range,
            rolloff: head.rolloff,
            attenuation: attenuation * head.attenuation,
            pitch_mask: head.pitch_mask,
        };

        let mut visited = AHashSet::new();
        visited.insert(id);
        while let Some(next) = self.step(resolved.id, rng) {
            let Some(def) = self.get(next) else {
                return Err(SoundError::LinkCycle { id });
            };
            if !visited.insert(next) {
                return Err(SoundError::LinkCycle { id });
            }
            if resolved.near_limit < 0 {
                resolved.near_limit = def.near_limit;
                resolved.limit_range = def.limit_range;
            }
            if !resolved.rolloff.is_set() {
                resolved.rolloff = def.rolloff;
            }
            resolved.attenuation *= def.attenuation;
            resolved.id = next;
        }
        Ok(resolved)
    }
}
