//! Sound engine configuration.

use serde::{Deserialize, Serialize};

use crate::rolloff::{RolloffInfo, SoundCurve, CURVE_MAX};

/// Upper bound for pre-allocated channels.
const MAX_INITIAL_CHANNELS: usize = 256;

/// Upper bound for the restore delay (ten seconds at 35 ticks per second).
const MAX_RESTART_DELAY: u64 = 350;

/// Sound engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Channel records allocated up front.
    pub initial_channels: usize,
    /// Ticks between `set_restart_time` and the restore pass.
    pub restart_delay_ticks: u64,
    /// Seed for random sounds and pitch variation (None = entropy).
    pub rng_seed: Option<u64>,
    /// Start with sound muted.
    pub muted: bool,
    /// Custom rolloff table (0-127).
    pub sound_curve: Vec<u8>,
    /// Rolloff used when neither caller nor sound set one.
    pub default_rolloff: RolloffInfo,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            initial_channels: 32,
            restart_delay_ticks: 0,
            rng_seed: None,
            muted: false,
            sound_curve: Vec::new(),
            default_rolloff: RolloffInfo::engine_default(),
        }
    }
}

impl SoundConfig {
    /// Set the number of pre-allocated channels.
    #[must_use]
    pub const fn with_initial_channels(mut self, count: usize) -> Self {
        self.initial_channels = count;
        self
    }

    /// Set the restore delay.
    #[must_use]
    pub const fn with_restart_delay(mut self, ticks: u64) -> Self {
        self.restart_delay_ticks = ticks;
        self
    }

    /// Use a fixed random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Start muted or unmuted.
    #[must_use]
    pub const fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Set the custom rolloff table.
    #[must_use]
    pub fn with_sound_curve(mut self, curve: Vec<u8>) -> Self {
        self.sound_curve = curve;
        self
    }

    /// Set the default rolloff.
    #[must_use]
    pub const fn with_default_rolloff(mut self, rolloff: RolloffInfo) -> Self {
        self.default_rolloff = rolloff;
        self
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.initial_channels = self.initial_channels.min(MAX_INITIAL_CHANNELS);
        self.restart_delay_ticks = self.restart_delay_ticks.min(MAX_RESTART_DELAY);
        for v in &mut self.sound_curve {
            *v = (*v).min(CURVE_MAX);
        }
        if !self.default_rolloff.is_set() {
            self.default_rolloff = RolloffInfo::engine_default();
        }
    }

    /// The custom rolloff table.
    #[must_use]
    pub fn curve(&self) -> SoundCurve {
        SoundCurve::new(self.sound_curve.clone())
    }

    /// Random generator for this configuration.
    #[must_use]
    pub fn make_rng(&self) -> fastrand::Rng {
        self.rng_seed
            .map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed)
    }
}
