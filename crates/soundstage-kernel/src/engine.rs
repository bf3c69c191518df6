//! Sound Engine
//!
//! The playback orchestrator. Owns the registry, the channel pool and the
//! collaborators, and runs the start pipeline:
//!
//! ```text
//! request ─▶ position/validate ─▶ volume ─▶ resolve chain ─▶ rolloff
//!         ─▶ singular/near limit ─▶ load ─▶ slot ─▶ pause ─▶ pitch ─▶ backend
//! ```
//!
//! Every rejection returns `None` without leaving a channel behind, except
//! looping sounds that are blocked or refused by the device: those get an
//! evicted placeholder channel that the restore pass retries.
//!
//! # Example
//!
//! ```
//! use soundstage_kernel::prelude::*;
//!
//! let mut assets = MemoryAssets::new();
//! let lump = assets.add("dspistol", vec![0x80; 2048]);
//! let backend = VirtualBackend::new();
//! let mut engine = SoundEngine::new(
//!     SoundConfig::default().with_seed(1),
//!     Box::new(backend),
//!     Box::new(assets),
//!     Box::new(FixedPositions::new()),
//! );
//! let pistol = engine.registry_mut().insert("weapons/pistol", Some(lump), 0, None);
//! engine.registry_mut().rehash();
//!
//! let channel = engine.start_sound(&SoundRequest::new(pistol));
//! assert!(channel.is_some());
//! ```

use std::fmt::Write as _;

use glam::Vec3;
use soundstage_common::SoundId;
use tracing::{debug, info, warn};

use crate::assets::SoundAssets;
use crate::backend::{
    BackendEvent, BackendEvents, BackendHandle, SoundBackend, Spatial, StartFlags, StartParams,
};
use crate::channel::{Channel, ChannelFlags, ChannelId, ChannelPool, DEFAULT_PITCH, NUM_SLOTS};
use crate::config::SoundConfig;
use crate::registry::{SoundFlags, SoundRegistry};
use crate::rolloff::{RolloffInfo, SoundCurve};
use crate::world::{Listener, SoundSource, SourcePositioner};

/// No distance attenuation.
pub const ATTN_NONE: f32 = 0.0;
/// Normal distance attenuation.
pub const ATTN_NORM: f32 = 1.0;
/// Attenuation of idle sounds.
pub const ATTN_IDLE: f32 = 1.001;
/// Attenuation of static ambience.
pub const ATTN_STATIC: f32 = 3.0;

/// Priority of sounds that play at the listener.
const LISTENER_PRIORITY: i32 = 80;

/// Logical slot selection for a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotRequest {
    /// First slot the source is not using: 0, then 7 down to 1.
    #[default]
    Auto,
    /// A specific slot; replaces what the source plays there.
    Slot(u8),
}

impl SlotRequest {
    /// Slot number used before selection.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Slot(slot) => slot.min(NUM_SLOTS - 1),
        }
    }
}

/// A request to start a sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundRequest {
    /// Requested sound.
    pub sound: SoundId,
    /// Emitter.
    pub source: SoundSource,
    /// Logical slot.
    pub slot: SlotRequest,
    /// Modifier flags (masked to [`ChannelFlags::REQUEST_MASK`]).
    pub flags: ChannelFlags,
    /// Volume in `[0, 1]`.
    pub volume: f32,
    /// Distance attenuation.
    pub attenuation: f32,
    /// Rolloff that overrides the sound's own.
    pub rolloff: Option<RolloffInfo>,
    /// Pitch ratio that overrides random variation.
    pub pitch: Option<f32>,
}

impl SoundRequest {
    /// Unpositioned request at full volume.
    #[must_use]
    pub const fn new(sound: SoundId) -> Self {
        Self {
            sound,
            source: SoundSource::None,
            slot: SlotRequest::Auto,
            flags: ChannelFlags::empty(),
            volume: 1.0,
            attenuation: ATTN_NORM,
            rolloff: None,
            pitch: None,
        }
    }

    /// Set the emitter.
    #[must_use]
    pub const fn from_source(mut self, source: SoundSource) -> Self {
        self.source = source;
        self
    }

    /// Use a specific slot.
    #[must_use]
    pub const fn on_slot(mut self, slot: u8) -> Self {
        self.slot = SlotRequest::Slot(slot);
        self
    }

    /// Set modifier flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: ChannelFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set the attenuation.
    #[must_use]
    pub const fn with_attenuation(mut self, attenuation: f32) -> Self {
        self.attenuation = attenuation;
        self
    }

    /// Force a rolloff.
    #[must_use]
    pub const fn with_rolloff(mut self, rolloff: RolloffInfo) -> Self {
        self.rolloff = Some(rolloff);
        self
    }

    /// Force a pitch ratio.
    #[must_use]
    pub const fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = Some(pitch);
        self
    }
}

/// Backend start flags for a channel's flags.
pub(crate) fn start_flags(flags: ChannelFlags) -> StartFlags {
    let mut out = StartFlags::empty();
    if flags.contains(ChannelFlags::LOOP) {
        out |= StartFlags::LOOP;
    }
    if flags.contains(ChannelFlags::AREA) {
        out |= StartFlags::AREA;
    }
    if flags.intersects(ChannelFlags::UI | ChannelFlags::NO_PAUSE) {
        out |= StartFlags::NO_PAUSE;
    }
    if flags.contains(ChannelFlags::UI) {
        out |= StartFlags::NO_REVERB;
    }
    out
}

/// The sound engine.
pub struct SoundEngine {
    pub(crate) config: SoundConfig,
    pub(crate) registry: SoundRegistry,
    pub(crate) pool: ChannelPool,
    pub(crate) backend: Box<dyn SoundBackend>,
    pub(crate) events: BackendEvents,
    pub(crate) assets: Box<dyn SoundAssets>,
    pub(crate) positioner: Box<dyn SourcePositioner>,
    pub(crate) listener: Listener,
    pub(crate) curve: SoundCurve,
    pub(crate) rng: fastrand::Rng,
    pub(crate) scratch: Vec<ChannelId>,
    pub(crate) muted: bool,
    pub(crate) paused: bool,
    pub(crate) restart_at: u64,
}

impl std::fmt::Debug for SoundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundEngine")
            .field("sounds", &self.registry.len())
            .field("channels", &self.pool.active_len())
            .field("muted", &self.muted)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl SoundEngine {
    /// Create an engine around its collaborators.
    pub fn new(
        mut config: SoundConfig,
        mut backend: Box<dyn SoundBackend>,
        assets: Box<dyn SoundAssets>,
        positioner: Box<dyn SourcePositioner>,
    ) -> Self {
        config.validate();
        let events = BackendEvents::new();
        backend.attach_notifier(events.notifier());

        let mut registry = SoundRegistry::new();
        registry.set_global_rolloff(config.default_rolloff);

        info!(
            "Sound engine initialized with {} channels{}",
            config.initial_channels,
            if backend.is_null() { " (no device)" } else { "" }
        );

        Self {
            pool: ChannelPool::with_capacity(config.initial_channels),
            curve: config.curve(),
            rng: config.make_rng(),
            muted: config.muted,
            config,
            registry,
            backend,
            events,
            assets,
            positioner,
            listener: Listener::default(),
            scratch: Vec::new(),
            paused: false,
            restart_at: 0,
        }
    }

    // ============================================
    // Accessors
    // ============================================

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SoundConfig {
        &self.config
    }

    /// The sound registry.
    #[must_use]
    pub const fn registry(&self) -> &SoundRegistry {
        &self.registry
    }

    /// The sound registry, mutably (load phase).
    pub fn registry_mut(&mut self) -> &mut SoundRegistry {
        &mut self.registry
    }

    /// The asset collaborator.
    #[must_use]
    pub fn assets(&self) -> &dyn SoundAssets {
        self.assets.as_ref()
    }

    /// The device backend.
    #[must_use]
    pub fn backend(&self) -> &dyn SoundBackend {
        self.backend.as_ref()
    }

    /// Custom rolloff table.
    #[must_use]
    pub const fn sound_curve(&self) -> &SoundCurve {
        &self.curve
    }

    /// Current listener snapshot.
    #[must_use]
    pub const fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Replace the listener snapshot for this tick.
    pub fn set_listener(&mut self, listener: Listener) {
        self.listener = listener;
    }

    /// Read a channel.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.pool.get(id)
    }

    /// Active channels, newest first.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &Channel)> + '_ {
        self.pool.iter()
    }

    /// The channel pool.
    #[must_use]
    pub const fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    /// Number of channels on the active list (including evicted ones).
    #[must_use]
    pub const fn active_channel_count(&self) -> usize {
        self.pool.active_len()
    }

    /// Whether new sounds are blocked.
    #[must_use]
    pub const fn is_muted(&self) -> bool {
        self.muted
    }

    /// Block or allow new sounds.
    pub fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            debug!("Sound {}", if muted { "muted" } else { "unmuted" });
        }
        self.muted = muted;
    }

    /// Whether sound effects are paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause or resume sound effects.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.backend.set_sfx_paused(paused);
    }

    // ============================================
    // Start pipeline
    // ============================================

    /// Start a sound. Returns the channel, or `None` if nothing plays.
    pub fn start_sound(&mut self, request: &SoundRequest) -> Option<ChannelId> {
        let sound = request.sound;
        if !sound.is_valid() || request.volume <= 0.0 || self.muted {
            return None;
        }
        let Some(def) = self.registry.get(sound) else {
            debug!("Ignoring start of unknown sound {}", sound);
            return None;
        };
        let def_volume = def.volume;

        let mut flags = request.flags & ChannelFlags::REQUEST_MASK;
        let source = request.source;
        let requested_slot = request.slot.number();

        let (position, velocity) =
            self.positioner
                .position_velocity(&self.listener, &source, requested_slot, flags);
        if !self.positioner.validate(&source, position, velocity) {
            debug!("Rejected position for {} from {}", sound, source.kind());
            return None;
        }

        let volume = (request.volume * def_volume).min(1.0);
        if volume <= 0.0 {
            return None;
        }

        let resolved =
            match self
                .registry
                .resolve_for_playback(sound, request.attenuation, &mut self.rng)
            {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Cannot play '{}': {}", self.registry.sound_name(sound), e);
                    return None;
                },
            };
        let attenuation = resolved.attenuation;
        let rolloff = request
            .rolloff
            .filter(RolloffInfo::is_set)
            .or_else(|| Some(resolved.rolloff).filter(RolloffInfo::is_set))
            .unwrap_or(*self.registry.global_rolloff());

        let at_listener = self.is_at_listener(&source);

        let singular = self
            .registry
            .get(resolved.id)
            .is_some_and(|d| d.flags.contains(SoundFlags::SINGULAR));
        if singular && self.check_singular(resolved.id, None) {
            debug!("Singular sound {} already playing", resolved.id);
            flags |= ChannelFlags::EVICTED;
        }

        let near_limit = if at_listener { 0 } else { resolved.near_limit };
        let restarting = source.is_attached().then_some((&source, requested_slot));
        if near_limit > 0
            && self.check_sound_limit(
                resolved.id,
                position,
                near_limit,
                resolved.limit_range,
                restarting,
            )
        {
            debug!("Sound {} hit its near limit of {}", resolved.id, near_limit);
            flags |= ChannelFlags::EVICTED;
        }

        if flags & (ChannelFlags::EVICTED | ChannelFlags::LOOP) == ChannelFlags::EVICTED {
            return None;
        }

        let sound_id = self.ensure_loaded(resolved.id);
        if self.is_empty_sound(sound_id) {
            return None;
        }

        let priority = if at_listener { LISTENER_PRIORITY } else { 0 };

        let mut seen = 0u8;
        let slot = match request.slot {
            SlotRequest::Auto if source.is_attached() => {
                if self.is_channel_used(&source, 0, &mut seen) {
                    let Some(slot) =
                        (1..NUM_SLOTS).rev().find(|&s| !self.is_channel_used(&source, s, &mut seen))
                    else {
                        debug!("No free slot on {} for {}", source.kind(), sound);
                        return None;
                    };
                    slot
                } else {
                    0
                }
            },
            other => other.number(),
        };

        if flags.contains(ChannelFlags::NO_STOP)
            && self.is_source_playing_something(&source, Some(slot), sound)
        {
            return None;
        }

        let replaces = match (request.slot, source) {
            (_, SoundSource::None) | (SlotRequest::Auto, SoundSource::Unattached(_)) => false,
            (SlotRequest::Slot(_), SoundSource::Unattached(_)) => true,
            _ => self.is_channel_used(&source, slot, &mut seen),
        };
        if replaces {
            let previous = self
                .pool
                .iter()
                .find(|(_, c)| c.slot == slot && c.source.same_emitter(&source))
                .map(|(id, _)| id);
            if let Some(previous) = previous {
                self.stop_channel(previous);
            }
        }

        if self.paused
            && !flags.intersects(ChannelFlags::LOOP | ChannelFlags::UI | ChannelFlags::NO_PAUSE)
        {
            return None;
        }

        let pitch = if resolved.pitch_mask == 0 {
            DEFAULT_PITCH
        } else {
            let mask = u32::from(resolved.pitch_mask);
            DEFAULT_PITCH - (self.rng.u32(..) & mask) as i32 + (self.rng.u32(..) & mask) as i32
        };

        let positional = attenuation > 0.0;
        let mut handle = None;
        if !flags.contains(ChannelFlags::EVICTED) {
            let params = StartParams {
                volume,
                pitch,
                flags: start_flags(flags),
                start_time: None,
            };
            handle = if positional {
                let spatial = Spatial {
                    listener: self.listener,
                    rolloff,
                    distance_scale: attenuation,
                    priority,
                    position,
                    velocity,
                    slot,
                };
                self.ensure_loaded_3d(sound_id)
                    .and_then(|data| self.backend.start_sound_3d(data, &params, &spatial))
            } else {
                self.registry
                    .get(sound_id)
                    .and_then(|d| d.data)
                    .and_then(|data| self.backend.start_sound(data, &params))
            };
        }
        if handle.is_none() {
            if !flags.contains(ChannelFlags::LOOP) {
                return None;
            }
            flags |= ChannelFlags::EVICTED;
        }
        flags |= if positional {
            ChannelFlags::IS_3D | ChannelFlags::JUST_STARTED
        } else {
            ChannelFlags::LISTENER_Z | ChannelFlags::JUST_STARTED
        };

        let start_time = self.backend.current_time();
        let id = self.pool.acquire();
        if let Some(chan) = self.pool.get_mut(id) {
            *chan = Channel {
                sound_id,
                org_id: sound,
                volume,
                pitch,
                priority,
                slot,
                flags,
                source,
                near_limit,
                limit_range: resolved.limit_range,
                distance_scale: attenuation,
                rolloff,
                start_time,
                backend: handle,
            };
        }
        if let Some(pitch) = request.pitch.filter(|p| *p > 0.0) {
            self.set_pitch(id, pitch);
        }
        Some(id)
    }

    /// Whether `source` plays at the listener's own location.
    fn is_at_listener(&self, source: &SoundSource) -> bool {
        match source {
            SoundSource::None => true,
            SoundSource::Actor(actor) => self.listener.listener_object == Some(*actor),
            _ => false,
        }
    }

    /// Whether a channel requested as `sound` exists, ignoring `except`.
    pub(crate) fn check_singular(&self, sound: SoundId, except: Option<ChannelId>) -> bool {
        self.pool
            .iter()
            .any(|(id, c)| Some(id) != except && c.org_id == sound)
    }

    /// Whether `near_limit` live copies of `sound` already play near `position`.
    ///
    /// A live copy on the same source and slot counts as a restart and
    /// always allows the sound.
    pub(crate) fn check_sound_limit(
        &self,
        sound: SoundId,
        position: Vec3,
        near_limit: i16,
        limit_range: f32,
        restarting: Option<(&SoundSource, u8)>,
    ) -> bool {
        let mut count = 0;
        for (_, chan) in self.pool.iter() {
            if count >= near_limit {
                break;
            }
            if chan.is_evicted() || chan.sound_id != sound {
                continue;
            }
            if let Some((source, slot)) = restarting {
                if chan.slot == slot && chan.source.same_emitter(source) {
                    return false;
                }
            }
            let (origin, _) = self.channel_position(chan);
            if origin.distance_squared(position) <= limit_range {
                count += 1;
            }
        }
        count >= near_limit
    }

    /// Whether `source` has a channel on `slot`. Slots seen along the way
    /// are recorded in `seen` to speed up repeated queries.
    pub(crate) fn is_channel_used(&self, source: &SoundSource, slot: u8, seen: &mut u8) -> bool {
        if *seen & (1 << slot) != 0 {
            return true;
        }
        for (_, chan) in self.pool.iter() {
            if chan.source.same_emitter(source) {
                *seen |= 1 << chan.slot;
                if chan.slot == slot {
                    return true;
                }
            }
        }
        false
    }

    pub(crate) fn channel_position(&self, chan: &Channel) -> (Vec3, Vec3) {
        self.positioner
            .position_velocity(&self.listener, &chan.source, chan.slot, chan.flags)
    }

    pub(crate) fn spatial_for(&self, chan: &Channel, position: Vec3, velocity: Vec3) -> Spatial {
        Spatial {
            listener: self.listener,
            rolloff: chan.rolloff,
            distance_scale: chan.distance_scale,
            priority: chan.priority,
            position,
            velocity,
            slot: chan.slot,
        }
    }

    // ============================================
    // Stopping
    // ============================================

    /// Stop a channel.
    ///
    /// A live channel is stopped through the backend and released when the
    /// backend reports it ended; a channel without a voice is released
    /// immediately.
    pub fn stop_channel(&mut self, id: ChannelId) {
        let Some(chan) = self.pool.get_mut(id) else {
            return;
        };
        match chan.backend {
            Some(handle) => {
                if !chan.is_evicted() {
                    chan.flags |= ChannelFlags::FORGETTABLE;
                    if matches!(chan.source, SoundSource::Actor(_)) {
                        chan.source = SoundSource::None;
                    }
                }
                self.backend.stop_channel(handle);
                self.pump_events();
            },
            None => {
                self.pool.release(id);
            },
        }
    }

    fn stop_matching(&mut self, mut matches: impl FnMut(&Channel) -> bool) {
        let mut ids = std::mem::take(&mut self.scratch);
        self.pool.collect_ids(&mut ids);
        for &id in &ids {
            if self.pool.get(id).is_some_and(&mut matches) {
                self.stop_channel(id);
            }
        }
        self.scratch = ids;
    }

    /// Stop unpositioned sounds on a slot.
    pub fn stop_sound(&mut self, slot: u8) {
        self.stop_matching(|c| c.source == SoundSource::None && c.slot == slot);
    }

    /// Stop sounds from `source`, on one slot or on all of them.
    pub fn stop_sound_from(&mut self, source: &SoundSource, slot: Option<u8>) {
        let source = *source;
        self.stop_matching(|c| {
            c.source.same_emitter(&source) && slot.map_or(true, |s| c.slot == s)
        });
    }

    /// Stop every channel.
    pub fn stop_all_channels(&mut self) {
        self.stop_matching(|_| true);
        self.backend.update_sounds();
        self.pump_events();
        debug!("Stopped all channels, {} remain", self.pool.active_len());
    }

    // ============================================
    // Source queries and edits
    // ============================================

    /// Move sounds from one emitter to another.
    ///
    /// Without a destination, non-looping sounds stay at `point` (if given)
    /// and everything else is stopped.
    pub fn relink_sound(&mut self, from: &SoundSource, to: Option<SoundSource>, point: Option<Vec3>) {
        if *from == SoundSource::None {
            return;
        }
        let mut ids = std::mem::take(&mut self.scratch);
        self.pool.collect_ids(&mut ids);
        for &id in &ids {
            let Some(chan) = self.pool.get_mut(id) else {
                continue;
            };
            if !chan.source.same_emitter(from) {
                continue;
            }
            match (to, point) {
                (Some(to), _) => chan.source = to,
                (None, Some(point)) if !chan.is_looping() => {
                    chan.source = SoundSource::Unattached(point);
                },
                _ => self.stop_channel(id),
            }
        }
        self.scratch = ids;
    }

    /// Change the volume of the first sound from `source` on `slot`
    /// (any slot when `None`).
    pub fn change_sound_volume(&mut self, source: &SoundSource, slot: Option<u8>, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let found = self
            .pool
            .iter()
            .find(|(_, c)| c.source.same_emitter(source) && slot.map_or(true, |s| c.slot == s))
            .map(|(id, _)| id);
        if let Some(chan) = found.and_then(|id| self.pool.get_mut(id)) {
            if let Some(handle) = chan.backend {
                self.backend.channel_volume(handle, volume);
            }
            chan.volume = volume;
        }
    }

    /// Change the pitch ratio of the first sound from `source` on `slot`.
    pub fn change_sound_pitch(&mut self, source: &SoundSource, slot: u8, pitch: f32) {
        let found = self
            .pool
            .iter()
            .find(|(_, c)| c.source.same_emitter(source) && c.slot == slot)
            .map(|(id, _)| id);
        if let Some(id) = found {
            self.set_pitch(id, pitch);
        }
    }

    /// Set a channel's pitch ratio.
    pub fn set_pitch(&mut self, id: ChannelId, pitch: f32) {
        if let Some(chan) = self.pool.get_mut(id) {
            if let Some(handle) = chan.backend {
                self.backend.channel_pitch(handle, pitch.max(0.0001));
            }
            chan.pitch = ((DEFAULT_PITCH as f32 * pitch) as i32).max(1);
        }
    }

    /// Whether `source` plays something on `slot` (any slot when `None`),
    /// optionally restricted to a requested sound.
    #[must_use]
    pub fn is_source_playing_something(
        &self,
        source: &SoundSource,
        slot: Option<u8>,
        sound: SoundId,
    ) -> bool {
        self.pool.iter().any(|(_, c)| {
            c.source.same_emitter(source)
                && slot.map_or(true, |s| c.slot == s)
                && (!sound.is_valid() || c.org_id == sound)
        })
    }

    /// Whether `source` plays the requested sound.
    #[must_use]
    pub fn is_sound_playing_from(&self, source: &SoundSource, sound: SoundId) -> bool {
        sound.is_valid()
            && self
                .pool
                .iter()
                .any(|(_, c)| c.org_id == sound && c.source.same_emitter(source))
    }

    /// Channels worth persisting: not forgettable and not interface sounds,
    /// oldest first.
    #[must_use]
    pub fn list_active_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self
            .pool
            .iter()
            .filter(|(_, c)| !c.flags.intersects(ChannelFlags::FORGETTABLE | ChannelFlags::UI))
            .map(|(id, _)| id)
            .collect();
        ids.reverse();
        ids
    }

    /// Human-readable dump of every active channel.
    #[must_use]
    pub fn list_sound_channels(&self) -> String {
        let mut out = String::new();
        let mut playing = 0;
        for (_, chan) in self.pool.iter() {
            if !chan.is_evicted() {
                playing += 1;
            }
            let (position, _) = self.channel_position(chan);
            let _ = writeln!(
                out,
                "{} {:>2} {:<8} ({:.0} {:.0} {:.0}) vol {:.2}{}{}",
                self.registry.sound_name(chan.sound_id),
                chan.slot,
                chan.source.kind(),
                position.x,
                position.y,
                position.z,
                chan.volume,
                if chan.is_evicted() { " evicted" } else { "" },
                if chan.is_looping() { " loop" } else { "" },
            );
        }
        let _ = writeln!(out, "{playing} sounds playing");
        out
    }

    // ============================================
    // Tick
    // ============================================

    /// Per-tick update: move positional voices, advance the device and run
    /// the restore pass once `time` reaches the restart time.
    pub fn update_sounds(&mut self, time: u64) {
        let mut ids = std::mem::take(&mut self.scratch);
        self.pool.collect_ids(&mut ids);
        for &id in &ids {
            let Some(chan) = self.pool.get(id) else {
                continue;
            };
            if chan.flags & (ChannelFlags::EVICTED | ChannelFlags::IS_3D) == ChannelFlags::IS_3D {
                if let Some(handle) = chan.backend {
                    let (position, velocity) = self.channel_position(chan);
                    if self.positioner.validate(&chan.source, position, velocity) {
                        let spatial = self.spatial_for(chan, position, velocity);
                        self.backend.update_sound_params_3d(handle, &spatial);
                    }
                }
            }
            if let Some(chan) = self.pool.get_mut(id) {
                chan.flags.remove(ChannelFlags::JUST_STARTED);
            }
        }
        self.scratch = ids;

        self.backend.update_listener(&self.listener);
        self.backend.update_sounds();
        self.pump_events();

        if time >= self.restart_at {
            self.restart_at = 0;
            self.restore_evicted_channels();
        }
    }

    /// Apply pending backend notifications.
    pub(crate) fn pump_events(&mut self) {
        while let Some(event) = self.events.next() {
            match event {
                BackendEvent::Ended { handle, position } => self.channel_ended(handle, position),
                BackendEvent::VirtualChanged { handle, is_virtual } => {
                    self.channel_virtual_changed(handle, is_virtual);
                },
            }
        }
    }

    /// Channel playing a backend voice.
    pub(crate) fn find_by_backend(&self, handle: BackendHandle) -> Option<ChannelId> {
        self.pool
            .iter()
            .find(|(_, c)| c.backend == Some(handle))
            .map(|(id, _)| id)
    }
}
