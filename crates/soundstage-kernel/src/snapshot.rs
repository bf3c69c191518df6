//! Channel snapshots for save games.
//!
//! A snapshot captures every persistent channel (not forgettable, not an
//! interface sound) by sound name, so it stays valid across sessions that
//! register sounds in a different order. Restoring recreates the channels
//! as evicted placeholders that resume at their saved offset on the next
//! restore pass.

use serde::{Deserialize, Serialize};
use soundstage_common::SchemaVersion;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelFlags, NUM_SLOTS};
use crate::engine::SoundEngine;
use crate::error::{SoundError, SoundResult};
use crate::rolloff::RolloffInfo;
use crate::world::SoundSource;

/// Saved state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Name of the sound being played.
    pub sound: String,
    /// Name of the sound originally requested.
    pub requested: String,
    /// Volume.
    pub volume: f32,
    /// Pitch (128 = natural rate).
    pub pitch: i32,
    /// Priority.
    pub priority: i32,
    /// Logical slot.
    pub slot: u8,
    /// Channel flags.
    pub flags: ChannelFlags,
    /// Emitter.
    pub source: SoundSource,
    /// Near limit.
    pub near_limit: i16,
    /// Near limit range (squared).
    pub limit_range: f32,
    /// Distance scale.
    pub distance_scale: f32,
    /// Rolloff.
    pub rolloff: RolloffInfo,
    /// Playback offset in samples.
    pub offset: u64,
}

/// A versioned set of channel snapshots, oldest channel first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshotSet {
    /// Format version.
    pub version: SchemaVersion,
    /// Saved channels.
    pub channels: Vec<ChannelSnapshot>,
}

impl Default for ChannelSnapshotSet {
    fn default() -> Self {
        Self {
            version: SchemaVersion::CHANNEL_SNAPSHOT,
            channels: Vec::new(),
        }
    }
}

impl ChannelSnapshotSet {
    /// Number of saved channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels were saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl SoundEngine {
    fn playback_offset(&self, chan: &Channel) -> u64 {
        match chan.backend {
            Some(handle) => self.backend.position(handle),
            None if chan.flags.contains(ChannelFlags::ABS_TIME) => chan.start_time,
            None => self.backend.current_time().saturating_sub(chan.start_time),
        }
    }

    /// Capture every persistent channel.
    #[must_use]
    pub fn snapshot_channels(&self) -> ChannelSnapshotSet {
        let channels = self
            .list_active_channels()
            .into_iter()
            .filter_map(|id| self.pool.get(id))
            .map(|chan| ChannelSnapshot {
                sound: self.registry.sound_name(chan.sound_id).to_string(),
                requested: self.registry.sound_name(chan.org_id).to_string(),
                volume: chan.volume,
                pitch: chan.pitch,
                priority: chan.priority,
                slot: chan.slot,
                flags: chan.flags,
                source: chan.source,
                near_limit: chan.near_limit,
                limit_range: chan.limit_range,
                distance_scale: chan.distance_scale,
                rolloff: chan.rolloff,
                offset: self.playback_offset(chan),
            })
            .collect();
        ChannelSnapshotSet {
            version: SchemaVersion::CHANNEL_SNAPSHOT,
            channels,
        }
    }

    /// Recreate saved channels as evicted placeholders.
    ///
    /// Channels naming unknown sounds are skipped. Returns the number of
    /// channels recreated.
    pub fn restore_snapshot(&mut self, set: &ChannelSnapshotSet) -> SoundResult<usize> {
        if !SchemaVersion::CHANNEL_SNAPSHOT.can_read(&set.version) {
            return Err(SoundError::Snapshot(format!(
                "unsupported version {} (expected {})",
                set.version,
                SchemaVersion::CHANNEL_SNAPSHOT
            )));
        }

        let mut restored = 0;
        for saved in &set.channels {
            let sound_id = self.registry.find_by_name(&saved.sound);
            if !sound_id.is_valid() {
                warn!("Skipping saved channel for unknown sound '{}'", saved.sound);
                continue;
            }
            let org_id = match self.registry.find_by_name(&saved.requested) {
                id if id.is_valid() => id,
                _ => sound_id,
            };
            let flags = (saved.flags
                - (ChannelFlags::JUST_STARTED | ChannelFlags::VIRTUAL | ChannelFlags::FORGETTABLE))
                | ChannelFlags::EVICTED
                | ChannelFlags::ABS_TIME;

            let id = self.pool.acquire();
            if let Some(chan) = self.pool.get_mut(id) {
                *chan = Channel {
                    sound_id,
                    org_id,
                    volume: saved.volume,
                    pitch: saved.pitch,
                    priority: saved.priority,
                    slot: saved.slot.min(NUM_SLOTS - 1),
                    flags,
                    source: saved.source,
                    near_limit: saved.near_limit,
                    limit_range: saved.limit_range,
                    distance_scale: saved.distance_scale,
                    rolloff: saved.rolloff,
                    start_time: saved.offset,
                    backend: None,
                };
            }
            restored += 1;
        }
        debug!("Restored {} of {} saved channels", restored, set.len());
        Ok(restored)
    }
}
