//! Eviction and restoration of channels.
//!
//! A channel is evicted when its backend voice goes away while the sound
//! should still be heard: the device was lost, a voice was stolen, or the
//! sound was blocked on arrival but loops. The channel keeps its logical
//! state and is restarted by the restore pass, oldest first, at the offset
//! it had reached.

use tracing::{debug, info};

use crate::backend::{BackendHandle, SoundBackend, StartFlags, StartParams, StartTime};
use crate::channel::{ChannelFlags, ChannelId};
use crate::engine::{start_flags, SoundEngine};
use crate::registry::SoundFlags;

impl SoundEngine {
    /// Stop every live voice, keeping the channels for a later restore.
    ///
    /// The playback offset of each voice is saved as an absolute position.
    pub fn evict_all_channels(&mut self) {
        let mut ids = std::mem::take(&mut self.scratch);
        self.pool.collect_ids(&mut ids);
        let mut evicted = 0;
        for &id in &ids {
            let Some(chan) = self.pool.get_mut(id) else {
                continue;
            };
            if chan.is_evicted() {
                continue;
            }
            chan.flags |= ChannelFlags::EVICTED;
            if let Some(handle) = chan.backend {
                if !chan.flags.contains(ChannelFlags::ABS_TIME) {
                    chan.start_time = self.backend.position(handle);
                    chan.flags |= ChannelFlags::ABS_TIME;
                }
                self.stop_channel(id);
                evicted += 1;
            }
        }
        self.scratch = ids;
        info!("Evicted {} channels", evicted);
    }

    /// Try to restart every evicted channel, oldest first.
    ///
    /// Non-looping channels that cannot be restarted are released.
    pub fn restore_evicted_channels(&mut self) {
        let mut ids = std::mem::take(&mut self.scratch);
        self.pool.collect_ids(&mut ids);
        for &id in ids.iter().rev() {
            let Some(chan) = self.pool.get(id) else {
                continue;
            };
            if chan.is_evicted() {
                self.restart_channel(id);
                let Some(chan) = self.pool.get_mut(id) else {
                    continue;
                };
                if !chan.is_looping() {
                    if chan.is_evicted() {
                        self.stop_channel(id);
                    } else if !chan.flags.contains(ChannelFlags::JUST_STARTED) {
                        chan.flags |= ChannelFlags::FORGETTABLE;
                    }
                }
            } else if chan.backend.is_none()
                && chan.flags & (ChannelFlags::FORGETTABLE | ChannelFlags::LOOP)
                    == ChannelFlags::FORGETTABLE
            {
                self.pool.release(id);
            }
        }
        self.scratch = ids;
    }

    /// Restart an evicted channel. The channel stays evicted on failure.
    pub(crate) fn restart_channel(&mut self, id: ChannelId) {
        let Some(mut chan) = self.pool.get(id).cloned() else {
            return;
        };
        debug_assert!(chan.is_evicted(), "restarting a channel that is not evicted");
        if !chan.is_evicted() {
            return;
        }

        let singular = self
            .registry
            .get(chan.sound_id)
            .is_some_and(|d| d.flags.contains(SoundFlags::SINGULAR));
        if singular && self.check_singular(chan.sound_id, Some(id)) {
            return;
        }

        let sound_id = self.ensure_loaded(chan.sound_id);
        if self.is_empty_sound(sound_id) {
            return;
        }

        let mut flags = start_flags(chan.flags);
        let start_time = if chan.flags.contains(ChannelFlags::ABS_TIME) {
            flags |= StartFlags::ABS_TIME;
            StartTime::Absolute(chan.start_time)
        } else {
            StartTime::Since(chan.start_time)
        };
        let params = StartParams {
            volume: chan.volume,
            pitch: chan.pitch,
            flags,
            start_time: Some(start_time),
        };

        let handle = if chan.flags.contains(ChannelFlags::IS_3D) {
            let (position, velocity) = self.channel_position(&chan);
            if !self.positioner.validate(&chan.source, position, velocity) {
                return;
            }
            if chan.near_limit > 0
                && self.check_sound_limit(
                    chan.sound_id,
                    position,
                    chan.near_limit,
                    chan.limit_range,
                    None,
                )
            {
                return;
            }
            let spatial = self.spatial_for(&chan, position, velocity);
            self.ensure_loaded_3d(sound_id)
                .and_then(|data| self.backend.start_sound_3d(data, &params, &spatial))
        } else {
            self.registry
                .get(sound_id)
                .and_then(|d| d.data)
                .and_then(|data| self.backend.start_sound(data, &params))
        };
        let Some(handle) = handle else {
            return;
        };

        if let StartTime::Absolute(offset) = start_time {
            chan.start_time = self.backend.current_time().saturating_sub(offset);
        }
        chan.flags.remove(ChannelFlags::EVICTED | ChannelFlags::ABS_TIME);
        chan.sound_id = sound_id;
        chan.backend = Some(handle);
        if let Some(slot) = self.pool.get_mut(id) {
            *slot = chan;
        }
        debug!("Restarted channel {:?}", id);
    }

    /// A backend voice stopped.
    ///
    /// Decides whether the sound finished or was cut short. Finished
    /// channels are released; cut short ones are kept as evicted.
    pub fn channel_ended(&mut self, handle: BackendHandle, position: u64) {
        let Some(id) = self.find_by_backend(handle) else {
            debug!("End of unknown voice {:?}", handle);
            return;
        };
        let Some(chan) = self.pool.get(id) else {
            return;
        };
        let flags = chan.flags;
        let evicted = if flags.contains(ChannelFlags::FORGETTABLE) {
            false
        } else if flags.intersects(ChannelFlags::LOOP | ChannelFlags::EVICTED) {
            true
        } else if position == 0 {
            flags.contains(ChannelFlags::JUST_STARTED)
        } else {
            let length = self
                .registry
                .get(chan.sound_id)
                .and_then(|d| d.data.or(d.data_3d))
                .map_or(0, |sample| self.backend.sample_length(sample));
            position < length
        };

        if evicted {
            if let Some(chan) = self.pool.get_mut(id) {
                chan.flags |= ChannelFlags::EVICTED;
                chan.backend = None;
            }
        } else {
            self.pool.release(id);
        }
    }

    /// A backend voice became audible or inaudible.
    pub fn channel_virtual_changed(&mut self, handle: BackendHandle, is_virtual: bool) {
        let Some(chan) = self
            .find_by_backend(handle)
            .and_then(|id| self.pool.get_mut(id))
        else {
            return;
        };
        chan.flags.set(ChannelFlags::VIRTUAL, is_virtual);
    }

    /// Defer the restore pass until `tick` plus the configured delay.
    pub fn set_restart_time(&mut self, tick: u64) {
        self.restart_at = tick.saturating_add(self.config.restart_delay_ticks);
    }

    /// Tick at which the next restore pass runs.
    #[must_use]
    pub const fn restart_time(&self) -> u64 {
        self.restart_at
    }

    /// Replace the device backend.
    ///
    /// Every channel is evicted and all data unloaded from the old device,
    /// then the channels are restored on the new one. Returns the old
    /// backend.
    pub fn reset_backend(&mut self, backend: Box<dyn SoundBackend>) -> Box<dyn SoundBackend> {
        info!("Resetting sound backend");
        self.evict_all_channels();
        self.unload_all_sounds();
        self.pump_events();

        let old = std::mem::replace(&mut self.backend, backend);
        self.backend.attach_notifier(self.events.notifier());
        self.backend.set_sfx_paused(self.paused);
        self.restore_evicted_channels();
        old
    }
}
