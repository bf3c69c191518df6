//! Virtual Backend
//!
//! A simulated mixer used by tests and the demo binary. It keeps voices in
//! memory, advances their playback position on every `update_sounds` call
//! and reports every ended voice through the notifier, the same way a real
//! device reports them.
//!
//! [`VirtualDevice`] is a cloneable view of the same state, so the device
//! can be inspected and steered (lost, restored, forced to virtualize
//! voices) while the engine owns the backend.
//!
//! # Example
//!
//! ```
//! use soundstage_kernel::virtual_backend::VirtualBackend;
//!
//! let backend = VirtualBackend::new();
//! let device = backend.device();
//! device.lose();
//! assert!(!device.accepts_starts());
//! ```

use std::sync::Arc;

use ahash::AHashMap;
use glam::Vec3;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{
    BackendHandle, BackendNotifier, LoadedSample, SampleHandle, SoundBackend, Spatial, StartFlags,
    StartParams, StartTime,
};
use crate::error::{SoundError, SoundResult};
use crate::rolloff::{compute_gain, SoundCurve};
use crate::world::Listener;

/// Samples mixed per `update_sounds` call by default.
pub const DEFAULT_SAMPLES_PER_UPDATE: u64 = 315;

/// Sample rate assumed for data the backend decodes itself.
pub const DEFAULT_SAMPLE_RATE: u32 = 11025;

/// Size of a voice-capture container header.
const VOC_HEADER_LEN: usize = 26;

#[derive(Debug, Clone, Copy)]
struct SampleInfo {
    length: u64,
    rate: u32,
}

/// State of a simulated voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualVoice {
    /// Data being played.
    pub sample: SampleHandle,
    /// Samples played.
    pub position: u64,
    /// Total samples.
    pub length: u64,
    /// Volume.
    pub volume: f32,
    /// Pitch ratio.
    pub pitch: f32,
    /// Start flags.
    pub flags: StartFlags,
    /// Positional voice origin, if started in 3D.
    pub origin: Option<Vec3>,
    /// Distance gain from the rolloff model (1 for non-positional voices).
    pub gain: f32,
    /// Whether the voice is virtual.
    pub is_virtual: bool,
}

#[derive(Debug)]
struct DeviceState {
    samples: AHashMap<SampleHandle, SampleInfo>,
    voices: Vec<(BackendHandle, VirtualVoice)>,
    next_sample: u64,
    next_voice: u64,
    time: u64,
    samples_per_update: u64,
    accept_starts: bool,
    paused: bool,
    listener: Listener,
    notifier: Option<BackendNotifier>,
    starts: usize,
    curve: SoundCurve,
}

impl DeviceState {
    fn notify_ended(&self, handle: BackendHandle, position: u64) {
        if let Some(notifier) = &self.notifier {
            notifier.ended(handle, position);
        }
    }

    fn add_sample(&mut self, length: u64, rate: u32, is_mono: bool) -> LoadedSample {
        self.next_sample += 1;
        let handle = SampleHandle::new(self.next_sample);
        self.samples.insert(handle, SampleInfo { length, rate });
        LoadedSample { handle, is_mono }
    }

    fn start(
        &mut self,
        sample: SampleHandle,
        params: &StartParams,
        spatial: Option<&Spatial>,
    ) -> Option<BackendHandle> {
        if !self.accept_starts {
            return None;
        }
        let info = self.samples.get(&sample).copied()?;
        let mut position = match params.start_time {
            Some(StartTime::Absolute(pos)) => pos,
            Some(StartTime::Since(t)) => self.time.saturating_sub(t),
            None => 0,
        };
        if params.flags.contains(StartFlags::LOOP) && info.length > 0 {
            position %= info.length;
        } else if position >= info.length {
            return None;
        }

        let gain = spatial.map_or(1.0, |s| self.gain(s));
        self.next_voice += 1;
        self.starts += 1;
        let handle = BackendHandle::new(self.next_voice);
        self.voices.push((
            handle,
            VirtualVoice {
                sample,
                position,
                length: info.length,
                volume: params.volume,
                pitch: pitch_ratio(params.pitch),
                flags: params.flags,
                origin: spatial.map(|s| s.position),
                gain,
                is_virtual: false,
            },
        ));
        Some(handle)
    }

    fn gain(&self, spatial: &Spatial) -> f32 {
        let distance = spatial.position.distance(spatial.listener.position) * spatial.distance_scale;
        compute_gain(Some(&spatial.rolloff), &self.curve, distance)
    }

    fn voice_mut(&mut self, handle: BackendHandle) -> Option<&mut VirtualVoice> {
        self.voices
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, v)| v)
    }

    fn stop(&mut self, handle: BackendHandle) {
        if let Some(i) = self.voices.iter().position(|(h, _)| *h == handle) {
            let (_, voice) = self.voices.remove(i);
            self.notify_ended(handle, voice.position);
        }
    }
}

/// Pitch ratio for an engine pitch value (128 = 1.0).
fn pitch_ratio(pitch: i32) -> f32 {
    (pitch as f32 / 128.0).max(0.0001)
}

/// Cloneable view of the simulated device.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    /// Whether the device currently starts voices.
    #[must_use]
    pub fn accepts_starts(&self) -> bool {
        self.state.lock().accept_starts
    }

    /// Stop every voice and refuse new ones until [`VirtualDevice::restore`].
    pub fn lose(&self) {
        let mut state = self.state.lock();
        state.accept_starts = false;
        let voices = std::mem::take(&mut state.voices);
        for (handle, voice) in voices {
            state.notify_ended(handle, voice.position);
        }
        info!("Virtual device lost");
    }

    /// Accept starts again.
    pub fn restore(&self) {
        self.state.lock().accept_starts = true;
        info!("Virtual device restored");
    }

    /// Refuse or accept starts without touching playing voices.
    pub fn set_accept_starts(&self, accept: bool) {
        self.state.lock().accept_starts = accept;
    }

    /// Change how far voices advance per update.
    pub fn set_samples_per_update(&self, samples: u64) {
        self.state.lock().samples_per_update = samples;
    }

    /// Number of playing voices.
    #[must_use]
    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Number of voices started since creation.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    /// Snapshot of a voice.
    #[must_use]
    pub fn voice(&self, handle: BackendHandle) -> Option<VirtualVoice> {
        self.state
            .lock()
            .voices
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, v)| *v)
    }

    /// Whether a voice is playing.
    #[must_use]
    pub fn is_playing(&self, handle: BackendHandle) -> bool {
        self.voice(handle).is_some()
    }

    /// Device clock.
    #[must_use]
    pub fn time(&self) -> u64 {
        self.state.lock().time
    }

    /// Last listener passed to the device.
    #[must_use]
    pub fn listener(&self) -> Listener {
        self.state.lock().listener
    }

    /// Whether sound effects are paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Number of loaded samples.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Force a voice in or out of the virtual state.
    pub fn set_virtual(&self, handle: BackendHandle, is_virtual: bool) {
        let mut state = self.state.lock();
        let found = state
            .voice_mut(handle)
            .map(|voice| voice.is_virtual = is_virtual)
            .is_some();
        if let Some(notifier) = state.notifier.as_ref().filter(|_| found) {
            notifier.virtual_changed(handle, is_virtual);
        }
    }
}

/// Simulated mixer backend.
#[derive(Debug)]
pub struct VirtualBackend {
    device: VirtualDevice,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBackend {
    /// Create a backend that accepts starts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: VirtualDevice {
                state: Arc::new(Mutex::new(DeviceState {
                    samples: AHashMap::new(),
                    voices: Vec::new(),
                    next_sample: 0,
                    next_voice: 0,
                    time: 0,
                    samples_per_update: DEFAULT_SAMPLES_PER_UPDATE,
                    accept_starts: true,
                    paused: false,
                    listener: Listener::default(),
                    notifier: None,
                    starts: 0,
                    curve: SoundCurve::default(),
                })),
            },
        }
    }

    /// Use a custom rolloff table for gain computation.
    #[must_use]
    pub fn with_curve(self, curve: SoundCurve) -> Self {
        self.device.state.lock().curve = curve;
        self
    }

    /// Get a view of the device.
    #[must_use]
    pub fn device(&self) -> VirtualDevice {
        self.device.clone()
    }
}

impl SoundBackend for VirtualBackend {
    fn attach_notifier(&mut self, notifier: BackendNotifier) {
        self.device.state.lock().notifier = Some(notifier);
    }

    fn load_sound(&mut self, data: &[u8], monoize: bool) -> SoundResult<LoadedSample> {
        if data.is_empty() {
            return Err(SoundError::Decode("no data".to_string()));
        }
        let mut state = self.device.state.lock();
        Ok(state.add_sample(data.len() as u64, DEFAULT_SAMPLE_RATE, monoize))
    }

    fn load_sound_voc(&mut self, data: &[u8]) -> SoundResult<LoadedSample> {
        if data.len() <= VOC_HEADER_LEN {
            return Err(SoundError::Decode("truncated voice file".to_string()));
        }
        let mut state = self.device.state.lock();
        Ok(state.add_sample((data.len() - VOC_HEADER_LEN) as u64, DEFAULT_SAMPLE_RATE, true))
    }

    fn load_sound_raw(
        &mut self,
        data: &[u8],
        frequency: u32,
        channels: u16,
        bits: u16,
        _loop_start: Option<u32>,
        monoize: bool,
    ) -> SoundResult<LoadedSample> {
        let frame = usize::from(channels.max(1)) * usize::from((bits / 8).max(1));
        if data.len() < frame || frequency == 0 {
            return Err(SoundError::Decode("empty raw sound".to_string()));
        }
        let mut state = self.device.state.lock();
        Ok(state.add_sample(
            (data.len() / frame) as u64,
            frequency,
            channels == 1 || monoize,
        ))
    }

    fn unload_sound(&mut self, sample: SampleHandle) {
        self.device.state.lock().samples.remove(&sample);
    }

    fn start_sound(&mut self, sample: SampleHandle, params: &StartParams) -> Option<BackendHandle> {
        self.device.state.lock().start(sample, params, None)
    }

    fn start_sound_3d(
        &mut self,
        sample: SampleHandle,
        params: &StartParams,
        spatial: &Spatial,
    ) -> Option<BackendHandle> {
        self.device
            .state
            .lock()
            .start(sample, params, Some(spatial))
    }

    fn stop_channel(&mut self, handle: BackendHandle) {
        self.device.state.lock().stop(handle);
    }

    fn update_sound_params_3d(&mut self, handle: BackendHandle, spatial: &Spatial) {
        let mut state = self.device.state.lock();
        let gain = state.gain(spatial);
        if let Some(voice) = state.voice_mut(handle) {
            voice.origin = Some(spatial.position);
            voice.gain = gain;
        }
    }

    fn update_listener(&mut self, listener: &Listener) {
        self.device.state.lock().listener = *listener;
    }

    fn update_sounds(&mut self) {
        let mut state = self.device.state.lock();
        let step = state.samples_per_update;
        state.time += step;
        let paused = state.paused;

        let mut ended = Vec::new();
        state.voices.retain_mut(|(handle, voice)| {
            if paused && !voice.flags.contains(StartFlags::NO_PAUSE) {
                return true;
            }
            voice.position += step;
            if voice.flags.contains(StartFlags::LOOP) {
                if voice.length > 0 {
                    voice.position %= voice.length;
                }
                true
            } else if voice.position >= voice.length {
                ended.push((*handle, voice.length));
                false
            } else {
                true
            }
        });
        for (handle, position) in ended {
            debug!("Virtual voice {} finished", handle.raw());
            state.notify_ended(handle, position);
        }
    }

    fn channel_volume(&mut self, handle: BackendHandle, volume: f32) {
        if let Some(voice) = self.device.state.lock().voice_mut(handle) {
            voice.volume = volume;
        }
    }

    fn channel_pitch(&mut self, handle: BackendHandle, pitch: f32) {
        if let Some(voice) = self.device.state.lock().voice_mut(handle) {
            voice.pitch = pitch;
        }
    }

    fn position(&self, handle: BackendHandle) -> u64 {
        self.device.voice(handle).map_or(0, |v| v.position)
    }

    fn sample_length(&self, sample: SampleHandle) -> u64 {
        self.device
            .state
            .lock()
            .samples
            .get(&sample)
            .map_or(0, |info| info.length)
    }

    fn ms_length(&self, sample: SampleHandle) -> u32 {
        self.device
            .state
            .lock()
            .samples
            .get(&sample)
            .map_or(0, |info| (info.length * 1000 / u64::from(info.rate)) as u32)
    }

    fn current_time(&self) -> u64 {
        self.device.time()
    }

    fn set_sfx_paused(&mut self, paused: bool) {
        self.device.state.lock().paused = paused;
    }
}
