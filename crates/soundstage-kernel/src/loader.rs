//! Lazy sound loading and the asset retention policy.
//!
//! Data is decoded on first use. Before decoding, a definition that shares
//! its lump with an already loaded plain sound is turned into an alias of
//! that sound, so identical data is decoded only once. Data that fails to
//! decode is replaced by the empty sound.

use ahash::AHashSet;
use soundstage_common::{LumpId, SoundId};
use tracing::{debug, warn};

use crate::backend::{LoadedSample, SampleHandle, SoundBackend};
use crate::engine::SoundEngine;
use crate::error::{SoundError, SoundResult};
use crate::registry::{SoundFlags, SoundLink};

/// Signature of voice-capture containers.
const VOC_SIGNATURE: &[u8] = b"Creative Voice File";

/// Rate of legacy sounds that leave it unset.
pub const DEFAULT_RAW_RATE: u32 = 11025;

/// Size of the legacy digital sound header.
const DMX_HEADER: usize = 8;

/// Detected data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundFormat {
    /// Voice-capture container.
    Voc,
    /// Headerless PCM (declared by the definition).
    Raw,
    /// Legacy digital sound: a rate and length prefix before 8 bit PCM.
    Dmx {
        /// Sample rate.
        frequency: u32,
        /// Length of the PCM payload.
        len: usize,
    },
    /// Anything else; left to the backend's own detection.
    Other,
}

impl SoundFormat {
    /// Sniff the format of `data`. Returns `None` for data too short to be
    /// a sound.
    #[must_use]
    pub fn detect(data: &[u8], raw: bool) -> Option<Self> {
        if data.len() <= DMX_HEADER {
            return None;
        }
        if data.starts_with(VOC_SIGNATURE) {
            return Some(Self::Voc);
        }
        if raw {
            return Some(Self::Raw);
        }
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        if data[0] == 3 && data[1] == 0 && len <= data.len() - DMX_HEADER {
            let frequency = match u16::from_le_bytes([data[2], data[3]]) {
                0 => DEFAULT_RAW_RATE,
                f => u32::from(f),
            };
            return Some(Self::Dmx { frequency, len });
        }
        Some(Self::Other)
    }
}

/// Definition fields the decoder needs.
#[derive(Debug, Clone, Copy)]
struct DecodeParams {
    raw: bool,
    sixteen_bit: bool,
    raw_rate: u32,
    loop_start: Option<u32>,
}

fn decode(
    backend: &mut dyn SoundBackend,
    data: &[u8],
    params: DecodeParams,
    monoize: bool,
) -> SoundResult<LoadedSample> {
    let format = SoundFormat::detect(data, params.raw)
        .ok_or_else(|| SoundError::Decode(format!("{} bytes is too short", data.len())))?;
    let rate = if params.raw_rate == 0 {
        DEFAULT_RAW_RATE
    } else {
        params.raw_rate
    };
    match format {
        SoundFormat::Voc => backend.load_sound_voc(data),
        SoundFormat::Raw => {
            let bits = if params.sixteen_bit { 16 } else { 8 };
            backend.load_sound_raw(data, rate, 1, bits, params.loop_start, monoize)
        },
        SoundFormat::Dmx { frequency, len } => backend.load_sound_raw(
            &data[DMX_HEADER..DMX_HEADER + len],
            frequency,
            1,
            8,
            params.loop_start,
            monoize,
        ),
        SoundFormat::Other => backend.load_sound(data, monoize),
    }
}

impl SoundEngine {
    /// Whether a sound resolves to the empty sound and never plays.
    pub(crate) fn is_empty_sound(&self, id: SoundId) -> bool {
        self.registry
            .get(id)
            .map_or(true, |def| self.registry.is_empty_sound(def))
    }

    fn decode_params(&self, id: SoundId) -> Option<(LumpId, DecodeParams)> {
        let def = self.registry.get(id)?;
        let lump = def.lump.or(self.registry.empty_lump())?;
        Some((
            lump,
            DecodeParams {
                raw: def.flags.contains(SoundFlags::LOAD_RAW),
                sixteen_bit: def.flags.contains(SoundFlags::SIXTEEN_BIT),
                raw_rate: def.raw_rate,
                loop_start: def.loop_start,
            },
        ))
    }

    /// Load the data of a plain sound.
    ///
    /// Returns the sound that now holds the data: `id` itself, or the
    /// already loaded sound it was linked to.
    pub(crate) fn ensure_loaded(&mut self, id: SoundId) -> SoundId {
        if self.backend.is_null() {
            return id;
        }
        let empty = self.registry.empty_lump();
        let Some(def) = self.registry.get_mut(id) else {
            return id;
        };
        if def.data.is_some() {
            return id;
        }
        if def.lump.is_none() {
            def.lump = empty;
        }
        let Some(lump) = def.lump else {
            return id;
        };

        let shared = self
            .registry
            .iter()
            .find(|(other, d)| *other != id && d.is_terminal() && d.data.is_some() && d.lump == Some(lump))
            .map(|(other, d)| (other, d.rolloff));
        if let Some((target, target_rolloff)) = shared {
            let global = *self.registry.global_rolloff();
            if let Some(def) = self.registry.get_mut(id) {
                def.link = SoundLink::Alias(target);
                if !def.rolloff.is_set() {
                    def.rolloff = if target_rolloff.is_set() {
                        target_rolloff
                    } else {
                        global
                    };
                }
            }
            debug!("Sound {} shares data with {}", id, target);
            return target;
        }

        for attempt in 0..2 {
            let Some((lump, params)) = self.decode_params(id) else {
                break;
            };
            let bytes = self.assets.read_sound(lump);
            match decode(self.backend.as_mut(), &bytes, params, false) {
                Ok(sample) => {
                    if let Some(def) = self.registry.get_mut(id) {
                        def.data = Some(sample.handle);
                        if sample.is_mono {
                            def.data_3d = Some(sample.handle);
                        }
                    }
                    break;
                },
                Err(e) => {
                    warn!(
                        "Failed to decode sound '{}': {}",
                        self.registry.sound_name(id),
                        e
                    );
                    if attempt > 0 || empty.is_none() || Some(lump) == empty {
                        break;
                    }
                    if let Some(def) = self.registry.get_mut(id) {
                        def.lump = empty;
                    }
                },
            }
        }
        id
    }

    /// Load mono data for positional playback.
    pub(crate) fn ensure_loaded_3d(&mut self, id: SoundId) -> Option<SampleHandle> {
        let def = self.registry.get(id)?;
        if def.data_3d.is_some() {
            return def.data_3d;
        }
        let (lump, params) = self.decode_params(id)?;
        let bytes = self.assets.read_sound(lump);
        match decode(self.backend.as_mut(), &bytes, params, true) {
            Ok(sample) => {
                if let Some(def) = self.registry.get_mut(id) {
                    def.data_3d = Some(sample.handle);
                }
                Some(sample.handle)
            },
            Err(e) => {
                warn!(
                    "Failed to decode positional data for '{}': {}",
                    self.registry.sound_name(id),
                    e
                );
                None
            },
        }
    }

    // ============================================
    // Retention policy
    // ============================================

    /// Mark a sound as used by the current level.
    pub fn mark_used(&mut self, id: SoundId) {
        self.registry.mark_used(id);
    }

    /// Clear every usage mark.
    pub fn mark_all_unused(&mut self) {
        self.registry.mark_all_unused();
    }

    /// Load a sound and everything it may resolve to.
    pub fn cache_sound(&mut self, id: SoundId) {
        let mut pending = vec![id];
        let mut visited = AHashSet::new();
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(def) = self.registry.get(id) else {
                continue;
            };
            if def.flags.contains(SoundFlags::PLAYER_RESERVE) {
                continue;
            }
            match def.link {
                SoundLink::Alias(target) => pending.push(target),
                SoundLink::Random(_) => {
                    let choices = self
                        .registry
                        .random_group(id)
                        .map(|g| g.choices.clone())
                        .unwrap_or_default();
                    for choice in choices {
                        self.registry.mark_used(choice);
                        pending.push(choice);
                    }
                },
                SoundLink::Terminal => {
                    let loaded = self.ensure_loaded(id);
                    if !self.backend.is_null() {
                        self.ensure_loaded_3d(loaded);
                    }
                    self.registry.mark_used(loaded);
                },
            }
        }
    }

    /// Load every used sound and unload every unused plain sound.
    ///
    /// Sounds of active channels count as used.
    pub fn cache_marked_sounds(&mut self) {
        let playing: Vec<SoundId> = self.pool.iter().map(|(_, c)| c.sound_id).collect();
        for id in playing {
            self.registry.mark_used(id);
        }

        let used: Vec<SoundId> = self
            .registry
            .iter()
            .filter(|(_, d)| d.flags.contains(SoundFlags::USED))
            .map(|(id, _)| id)
            .collect();
        for id in used {
            self.cache_sound(id);
        }

        let stale: Vec<SoundId> = self
            .registry
            .iter()
            .filter(|(_, d)| !d.flags.contains(SoundFlags::USED) && d.is_terminal())
            .filter(|(_, d)| d.data.is_some() || d.data_3d.is_some())
            .map(|(id, _)| id)
            .collect();
        debug!("Unloading {} unused sounds", stale.len());
        for id in stale {
            self.unload_sound(id);
        }
    }

    /// Release a sound's decoded data.
    pub fn unload_sound(&mut self, id: SoundId) {
        let Some(def) = self.registry.get_mut(id) else {
            return;
        };
        let data = def.data.take();
        let data_3d = def.data_3d.take();
        if let Some(handle) = data_3d.filter(|h| Some(*h) != data) {
            self.backend.unload_sound(handle);
        }
        if let Some(handle) = data {
            self.backend.unload_sound(handle);
        }
    }

    /// Release the decoded data of every sound.
    pub fn unload_all_sounds(&mut self) {
        let loaded: Vec<SoundId> = self
            .registry
            .iter()
            .filter(|(_, d)| d.data.is_some() || d.data_3d.is_some())
            .map(|(id, _)| id)
            .collect();
        for id in loaded {
            self.unload_sound(id);
        }
    }

    /// Length of a sound in milliseconds; the longest candidate for random
    /// sounds.
    pub fn ms_length(&mut self, id: SoundId) -> u32 {
        self.ms_length_bounded(id, self.registry.len())
    }

    fn ms_length_bounded(&mut self, id: SoundId, depth: usize) -> u32 {
        let Some(def) = self.registry.get(id) else {
            return 0;
        };
        if depth == 0 {
            return 0;
        }
        let id = match def.link {
            SoundLink::Random(_) => {
                let choices = self
                    .registry
                    .random_group(id)
                    .map(|g| g.choices.clone())
                    .unwrap_or_default();
                return choices
                    .into_iter()
                    .map(|c| self.ms_length_bounded(c, depth - 1))
                    .max()
                    .unwrap_or(0);
            },
            SoundLink::Alias(target) => target,
            SoundLink::Terminal => id,
        };
        let loaded = self.ensure_loaded(id);
        self.registry
            .get(loaded)
            .and_then(|d| d.data)
            .map_or(0, |data| self.backend.ms_length(data))
    }
}
