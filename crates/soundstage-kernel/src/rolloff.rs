//! Distance Rolloff Model
//!
//! Pure functions mapping listener distance to a gain in `[0, 1]`.
//!
//! # Curves
//!
//! - **Doom**: linear distance fraction on a logarithmic volume scale,
//!   `(10^frac - 1) / 9`
//! - **Linear**: linear interpolation between min and max distance
//! - **Log**: `min / (min + factor * (d - min))`, never fully silent
//! - **Custom**: lookup in a 0-127 table indexed by inverse distance fraction
//!
//! # Example
//!
//! ```
//! use soundstage_kernel::rolloff::{compute_gain, RolloffInfo, RolloffType, SoundCurve};
//!
//! let rolloff = RolloffInfo::new(RolloffType::Linear, 100.0, 1100.0);
//! let gain = compute_gain(Some(&rolloff), &SoundCurve::default(), 600.0);
//! assert!((gain - 0.5).abs() < 1e-6);
//! ```

use serde::{Deserialize, Serialize};

/// Default distance under which sounds play at full volume.
pub const DEFAULT_MIN_DISTANCE: f32 = 200.0;

/// Default distance at which non-logarithmic rolloff reaches silence.
pub const DEFAULT_MAX_DISTANCE: f32 = 1200.0;

/// Largest value stored in a custom rolloff table.
pub const CURVE_MAX: u8 = 127;

/// Rolloff curve families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloffType {
    /// Linear rolloff with a logarithmic volume scale.
    #[default]
    Doom,
    /// Linear rolloff with a linear volume scale.
    Linear,
    /// Logarithmic rolloff (standard hardware type).
    Log,
    /// Volume looked up from the sound curve table.
    Custom,
}

impl RolloffType {
    /// Get a human-readable name for this curve.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Doom => "Doom",
            Self::Linear => "Linear",
            Self::Log => "Log",
            Self::Custom => "Custom",
        }
    }
}

/// Rolloff parameters attached to a sound definition or a start request.
///
/// A `min_distance` of zero means "not set": resolution falls through to the
/// next source of rolloff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloffInfo {
    /// Curve family.
    #[serde(rename = "type")]
    pub rolloff_type: RolloffType,
    /// Distance under which the gain is 1.
    pub min_distance: f32,
    /// Distance at or beyond which the gain is 0 (non-log curves).
    pub max_distance: f32,
    /// Steepness of the logarithmic curve.
    pub rolloff_factor: f32,
}

impl Default for RolloffInfo {
    fn default() -> Self {
        Self::UNSET
    }
}

impl RolloffInfo {
    /// Rolloff with no parameters.
    pub const UNSET: Self = Self {
        rolloff_type: RolloffType::Doom,
        min_distance: 0.0,
        max_distance: 0.0,
        rolloff_factor: 1.0,
    };

    /// Create rolloff parameters.
    #[must_use]
    pub const fn new(rolloff_type: RolloffType, min_distance: f32, max_distance: f32) -> Self {
        Self {
            rolloff_type,
            min_distance,
            max_distance,
            rolloff_factor: 1.0,
        }
    }

    /// Engine-wide fallback used when neither caller nor sound set one.
    #[must_use]
    pub const fn engine_default() -> Self {
        Self::new(RolloffType::Doom, DEFAULT_MIN_DISTANCE, DEFAULT_MAX_DISTANCE)
    }

    /// Logarithmic rolloff with the given factor.
    #[must_use]
    pub const fn logarithmic(min_distance: f32, rolloff_factor: f32) -> Self {
        Self {
            rolloff_type: RolloffType::Log,
            min_distance,
            max_distance: 0.0,
            rolloff_factor,
        }
    }

    /// Set the rolloff factor.
    #[must_use]
    pub const fn with_factor(mut self, factor: f32) -> Self {
        self.rolloff_factor = factor;
        self
    }

    /// Whether these parameters were explicitly set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.min_distance != 0.0
    }
}

/// Custom rolloff lookup table with entries in `0..=127`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoundCurve(Vec<u8>);

impl SoundCurve {
    /// Create a curve table; entries above 127 are clamped.
    #[must_use]
    pub fn new(values: Vec<u8>) -> Self {
        Self(values.into_iter().map(|v| v.min(CURVE_MAX)).collect())
    }

    /// Whether the table has any entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of table entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sample the table at a fraction in `[0, 1)` of its length.
    fn sample(&self, fraction: f32) -> f32 {
        let last = self.0.len() - 1;
        let idx = ((self.0.len() as f32 * fraction) as usize).min(last);
        f32::from(self.0[idx]) / f32::from(CURVE_MAX)
    }
}

/// Compute the gain for a sound heard at `distance`.
///
/// A missing rolloff means the sound cannot be heard.
#[must_use]
pub fn compute_gain(rolloff: Option<&RolloffInfo>, curve: &SoundCurve, distance: f32) -> f32 {
    let Some(rolloff) = rolloff else {
        return 0.0;
    };

    if distance <= rolloff.min_distance {
        return 1.0;
    }

    // Logarithmic rolloff has no distance where it goes silent.
    if rolloff.rolloff_type == RolloffType::Log {
        let denom = rolloff.min_distance + rolloff.rolloff_factor * (distance - rolloff.min_distance);
        if !denom.is_finite() {
            return 0.0;
        }
        return (rolloff.min_distance / denom).clamp(0.0, 1.0);
    }

    if distance >= rolloff.max_distance {
        return 0.0;
    }

    let volume = (rolloff.max_distance - distance) / (rolloff.max_distance - rolloff.min_distance);
    match rolloff.rolloff_type {
        RolloffType::Linear => volume,
        RolloffType::Custom if !curve.is_empty() => curve.sample(1.0 - volume),
        _ => (10f32.powf(volume) - 1.0) / 9.0,
    }
}
