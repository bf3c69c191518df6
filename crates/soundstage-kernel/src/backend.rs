//! Sound Backend Interface
//!
//! The device/mixer collaborator that decodes, buffers and outputs samples.
//!
//! # Notifications
//!
//! A backend reports channels that stopped playing (naturally or because
//! they were stopped) and channels that became virtual through a
//! [`BackendNotifier`]. The engine drains these events on its own thread
//! after every backend call that can end channels, so backends running a
//! mixer thread never touch channel state directly.
//!
//! ```text
//! ┌──────────────┐ start/stop/update ┌───────────────┐
//! │ SoundEngine  │──────────────────▶│ SoundBackend  │
//! │              │◀──────────────────│               │
//! └──────────────┘  BackendEvent     └───────────────┘
//! ```

use bitflags::bitflags;
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::Vec3;

use crate::error::{SoundError, SoundResult};
use crate::rolloff::RolloffInfo;
use crate::world::Listener;

/// Handle of decoded sample data owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleHandle(u64);

impl SampleHandle {
    /// Create a sample handle from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Handle of a playing voice owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(u64);

impl BackendHandle {
    /// Create a voice handle from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Decoded sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedSample {
    /// Backend handle of the data.
    pub handle: SampleHandle,
    /// Whether the data is already mono (usable for positional playback).
    pub is_mono: bool,
}

bitflags! {
    /// Flags passed along with a start request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StartFlags: u8 {
        /// Loop the sample.
        const LOOP = 1 << 0;
        /// Area sound (spread around the listener when close).
        const AREA = 1 << 1;
        /// Keeps playing while the game is paused.
        const NO_PAUSE = 1 << 2;
        /// Bypass environmental reverb.
        const NO_REVERB = 1 << 3;
        /// Start offset is an absolute sample position.
        const ABS_TIME = 1 << 4;
    }
}

/// Where a restarted sound resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTime {
    /// Absolute position in samples.
    Absolute(u64),
    /// Backend time at which the sound originally started.
    Since(u64),
}

/// Parameters shared by positional and non-positional starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartParams {
    /// Volume in `[0, 1]`.
    pub volume: f32,
    /// Pitch where 128 is the unmodified rate.
    pub pitch: i32,
    /// Start flags.
    pub flags: StartFlags,
    /// Resume point when restarting an evicted channel.
    pub start_time: Option<StartTime>,
}

/// Positional parameters of a 3D start or update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spatial {
    /// Listener snapshot of the current tick.
    pub listener: Listener,
    /// Resolved rolloff.
    pub rolloff: RolloffInfo,
    /// Distance scale (attenuation).
    pub distance_scale: f32,
    /// Voice priority.
    pub priority: i32,
    /// Source position.
    pub position: Vec3,
    /// Source velocity.
    pub velocity: Vec3,
    /// Logical slot.
    pub slot: u8,
}

/// Backend to engine notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// A voice stopped; `position` is the playback offset it reached.
    Ended {
        /// Voice that stopped.
        handle: BackendHandle,
        /// Samples played.
        position: u64,
    },
    /// A voice entered or left the virtual (inaudible but tracked) state.
    VirtualChanged {
        /// Voice that changed.
        handle: BackendHandle,
        /// Whether it is now virtual.
        is_virtual: bool,
    },
}

/// Sending half handed to the backend.
#[derive(Debug, Clone)]
pub struct BackendNotifier {
    sender: Sender<BackendEvent>,
}

impl BackendNotifier {
    /// Report a stopped voice.
    pub fn ended(&self, handle: BackendHandle, position: u64) {
        // Receiver lives as long as the engine; a send after teardown is dropped.
        let _ = self.sender.send(BackendEvent::Ended { handle, position });
    }

    /// Report a virtual status change.
    pub fn virtual_changed(&self, handle: BackendHandle, is_virtual: bool) {
        let _ = self
            .sender
            .send(BackendEvent::VirtualChanged { handle, is_virtual });
    }
}

/// Receiving half kept by the engine.
#[derive(Debug)]
pub struct BackendEvents {
    sender: Sender<BackendEvent>,
    receiver: Receiver<BackendEvent>,
}

impl Default for BackendEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendEvents {
    /// Create a new event queue.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Create a notifier for a backend.
    #[must_use]
    pub fn notifier(&self) -> BackendNotifier {
        BackendNotifier {
            sender: self.sender.clone(),
        }
    }

    /// Take the next pending event.
    #[must_use]
    pub fn next(&self) -> Option<BackendEvent> {
        self.receiver.try_recv().ok()
    }

    /// Number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}

/// Audio device/mixer collaborator.
pub trait SoundBackend {
    /// Whether no device is present.
    fn is_null(&self) -> bool {
        false
    }

    /// Install the notification channel.
    fn attach_notifier(&mut self, notifier: BackendNotifier);

    /// Decode data in a format the backend detects itself.
    fn load_sound(&mut self, data: &[u8], monoize: bool) -> SoundResult<LoadedSample>;

    /// Decode a voice-capture container.
    fn load_sound_voc(&mut self, data: &[u8]) -> SoundResult<LoadedSample>;

    /// Wrap headerless PCM.
    fn load_sound_raw(
        &mut self,
        data: &[u8],
        frequency: u32,
        channels: u16,
        bits: u16,
        loop_start: Option<u32>,
        monoize: bool,
    ) -> SoundResult<LoadedSample>;

    /// Release decoded data.
    fn unload_sound(&mut self, sample: SampleHandle);

    /// Start non-positional playback.
    fn start_sound(&mut self, sample: SampleHandle, params: &StartParams) -> Option<BackendHandle>;

    /// Start positional playback.
    fn start_sound_3d(
        &mut self,
        sample: SampleHandle,
        params: &StartParams,
        spatial: &Spatial,
    ) -> Option<BackendHandle>;

    /// Stop a voice. The backend reports it through [`BackendNotifier::ended`].
    fn stop_channel(&mut self, handle: BackendHandle);

    /// Move a positional voice.
    fn update_sound_params_3d(&mut self, handle: BackendHandle, spatial: &Spatial);

    /// Move the listener.
    fn update_listener(&mut self, listener: &Listener);

    /// Per-tick mixer update.
    fn update_sounds(&mut self);

    /// Change a voice's volume.
    fn channel_volume(&mut self, handle: BackendHandle, volume: f32);

    /// Change a voice's pitch ratio.
    fn channel_pitch(&mut self, handle: BackendHandle, pitch: f32);

    /// Samples played by a voice.
    fn position(&self, handle: BackendHandle) -> u64;

    /// Length of decoded data in samples.
    fn sample_length(&self, sample: SampleHandle) -> u64;

    /// Length of decoded data in milliseconds.
    fn ms_length(&self, sample: SampleHandle) -> u32;

    /// Backend clock.
    fn current_time(&self) -> u64;

    /// Pause or resume voices that are not flagged [`StartFlags::NO_PAUSE`].
    fn set_sfx_paused(&mut self, _paused: bool) {}
}

/// Backend used when no device is present.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_sample: u64,
}

impl NullBackend {
    /// Create a null backend.
    #[must_use]
    pub const fn new() -> Self {
        Self { next_sample: 0 }
    }

    fn sample(&mut self) -> LoadedSample {
        self.next_sample += 1;
        LoadedSample {
            handle: SampleHandle::new(self.next_sample),
            is_mono: true,
        }
    }
}

impl SoundBackend for NullBackend {
    fn is_null(&self) -> bool {
        true
    }

    fn attach_notifier(&mut self, _notifier: BackendNotifier) {}

    fn load_sound(&mut self, data: &[u8], _monoize: bool) -> SoundResult<LoadedSample> {
        if data.is_empty() {
            return Err(SoundError::Decode("empty sound data".to_string()));
        }
        Ok(self.sample())
    }

    fn load_sound_voc(&mut self, _data: &[u8]) -> SoundResult<LoadedSample> {
        Ok(self.sample())
    }

    fn load_sound_raw(
        &mut self,
        _data: &[u8],
        _frequency: u32,
        _channels: u16,
        _bits: u16,
        _loop_start: Option<u32>,
        _monoize: bool,
    ) -> SoundResult<LoadedSample> {
        Ok(self.sample())
    }

    fn unload_sound(&mut self, _sample: SampleHandle) {}

    fn start_sound(&mut self, _sample: SampleHandle, _params: &StartParams) -> Option<BackendHandle> {
        None
    }

    fn start_sound_3d(
        &mut self,
        _sample: SampleHandle,
        _params: &StartParams,
        _spatial: &Spatial,
    ) -> Option<BackendHandle> {
        None
    }

    fn stop_channel(&mut self, _handle: BackendHandle) {}

    fn update_sound_params_3d(&mut self, _handle: BackendHandle, _spatial: &Spatial) {}

    fn update_listener(&mut self, _listener: &Listener) {}

    fn update_sounds(&mut self) {}

    fn channel_volume(&mut self, _handle: BackendHandle, _volume: f32) {}

    fn channel_pitch(&mut self, _handle: BackendHandle, _pitch: f32) {}

    fn position(&self, _handle: BackendHandle) -> u64 {
        0
    }

    fn sample_length(&self, _sample: SampleHandle) -> u64 {
        0
    }

    fn ms_length(&self, _sample: SampleHandle) -> u32 {
        0
    }

    fn current_time(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_delivers_in_order() {
        let events = BackendEvents::new();
        let notifier = events.notifier();
        notifier.ended(BackendHandle::new(1), 40);
        notifier.virtual_changed(BackendHandle::new(2), true);
        assert_eq!(events.pending_count(), 2);
        assert_eq!(
            events.next(),
            Some(BackendEvent::Ended {
                handle: BackendHandle::new(1),
                position: 40
            })
        );
        assert!(matches!(
            events.next(),
            Some(BackendEvent::VirtualChanged { is_virtual: true, .. })
        ));
        assert_eq!(events.next(), None);
    }

    #[test]
    fn test_null_backend_never_starts() {
        let mut backend = NullBackend::new();
        assert!(backend.is_null());
        let sample = backend.load_sound(&[1, 2, 3], false).unwrap();
        let params = StartParams {
            volume: 1.0,
            pitch: 128,
            flags: StartFlags::LOOP,
            start_time: None,
        };
        assert!(backend.start_sound(sample.handle, &params).is_none());
        assert!(backend.load_sound(&[], false).is_err());
    }
}
