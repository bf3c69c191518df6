//! Sound Manifest
//!
//! TOML description of the sounds of a game, applied to a registry during
//! the load phase.
//!
//! # Format
//!
//! ```toml
//! empty_sound = "dsempty"
//!
//! [rolloff]
//! type = "linear"
//! min_distance = 100.0
//! max_distance = 1500.0
//!
//! [[sound]]
//! name = "weapons/pistol"
//! lump = "dspistol"
//! pitch_mask = 7
//!
//! [[alias]]
//! name = "weapons/chaingun"
//! target = "weapons/pistol"
//!
//! [[random]]
//! name = "grunt/sight"
//! choices = ["grunt/sight1", "grunt/sight2"]
//! ```
//!
//! Names may be referenced before they are defined; such references create
//! tentative sounds that a later `[[sound]]` entry fills in. Problems with
//! individual entries are logged and counted, never fatal.

use std::path::Path;

use serde::{Deserialize, Serialize};
use soundstage_common::{SchemaVersion, SoundId};
use tracing::{info, warn};

use crate::assets::SoundAssets;
use crate::engine::SoundEngine;
use crate::error::{SoundError, SoundResult};
use crate::registry::{
    SoundFlags, SoundLink, SoundRegistry, DEFAULT_LIMIT_RANGE, DEFAULT_NEAR_LIMIT,
};
use crate::rolloff::RolloffInfo;

/// A `[[sound]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundEntry {
    /// Logical name.
    pub name: String,
    /// Lump holding the data.
    pub lump: String,
    /// Volume multiplier.
    pub volume: f32,
    /// Attenuation multiplier.
    pub attenuation: f32,
    /// Random pitch variation mask.
    pub pitch_mask: u8,
    /// Near limit (0 = unlimited).
    pub limit: Option<i16>,
    /// Near limit range in world units.
    pub limit_range: Option<f32>,
    /// Only one instance may play.
    pub singular: bool,
    /// Resolved per player class.
    pub player_reserve: bool,
    /// Data is headerless PCM.
    pub raw: bool,
    /// Sample rate of raw data.
    pub raw_rate: u32,
    /// Raw data is 16 bit.
    pub sixteen_bit: bool,
    /// Loop start in samples.
    pub loop_start: Option<u32>,
    /// External resource number.
    pub resource_id: Option<i32>,
    /// Sound specific rolloff.
    pub rolloff: Option<RolloffInfo>,
}

impl Default for SoundEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            lump: String::new(),
            volume: 1.0,
            attenuation: 1.0,
            pitch_mask: 0,
            limit: None,
            limit_range: None,
            singular: false,
            player_reserve: false,
            raw: false,
            raw_rate: 0,
            sixteen_bit: false,
            loop_start: None,
            resource_id: None,
            rolloff: None,
        }
    }
}

/// An `[[alias]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasEntry {
    /// Alias name.
    pub name: String,
    /// Sound it stands for.
    pub target: String,
    /// Own near limit, overriding the target's.
    #[serde(default)]
    pub limit: Option<i16>,
}

/// A `[[random]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomEntry {
    /// Group name.
    pub name: String,
    /// Candidate sounds.
    pub choices: Vec<String>,
}

/// A sound manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundManifest {
    /// Lump used for sounds without data.
    pub empty_sound: Option<String>,
    /// Format version.
    pub version: SchemaVersion,
    /// Global rolloff.
    pub rolloff: Option<RolloffInfo>,
    /// Sound definitions.
    #[serde(rename = "sound")]
    pub sounds: Vec<SoundEntry>,
    /// Aliases.
    #[serde(rename = "alias")]
    pub aliases: Vec<AliasEntry>,
    /// Random groups.
    #[serde(rename = "random")]
    pub randoms: Vec<RandomEntry>,
}

impl Default for SoundManifest {
    fn default() -> Self {
        Self {
            empty_sound: None,
            version: SchemaVersion::SOUND_MANIFEST,
            rolloff: None,
            sounds: Vec::new(),
            aliases: Vec::new(),
            randoms: Vec::new(),
        }
    }
}

impl SoundManifest {
    /// Parse a manifest.
    pub fn from_toml_str(text: &str) -> SoundResult<Self> {
        toml::from_str(text).map_err(|e| SoundError::Manifest(e.to_string()))
    }

    /// Read and parse a manifest file.
    pub fn load(path: impl AsRef<Path>) -> SoundResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serialize the manifest.
    pub fn to_toml_string(&self) -> SoundResult<String> {
        toml::to_string_pretty(self).map_err(|e| SoundError::Manifest(e.to_string()))
    }
}

/// Counts from applying a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestSummary {
    /// Sounds defined.
    pub sounds: usize,
    /// Aliases installed.
    pub aliases: usize,
    /// Random groups installed.
    pub randoms: usize,
    /// Entries rejected or missing data.
    pub problems: usize,
    /// Names referenced but never defined.
    pub undefined: usize,
}

fn define_sound(registry: &mut SoundRegistry, assets: &dyn SoundAssets, entry: &SoundEntry) -> bool {
    let lump = assets.lump_by_name(&entry.lump);
    if lump.is_none() {
        warn!("Sound '{}' refers to missing lump '{}'", entry.name, entry.lump);
    }

    let id = registry.find_or_create_tentative(&entry.name);
    if let Some(rid) = entry.resource_id {
        registry.set_resource_id(id, rid);
    }
    let Some(def) = registry.get_mut(id) else {
        return false;
    };
    def.lump = lump;
    def.volume = entry.volume.clamp(0.0, 1.0);
    def.attenuation = entry.attenuation.max(0.0);
    def.pitch_mask = entry.pitch_mask;
    def.near_limit = entry.limit.unwrap_or(DEFAULT_NEAR_LIMIT);
    def.limit_range = entry.limit_range.map_or(DEFAULT_LIMIT_RANGE, |r| r * r);
    def.raw_rate = entry.raw_rate;
    def.loop_start = entry.loop_start;
    def.rolloff = entry.rolloff.unwrap_or(RolloffInfo::UNSET);
    def.link = SoundLink::Terminal;
    def.flags.remove(SoundFlags::TENTATIVE);
    def.flags.set(SoundFlags::SINGULAR, entry.singular);
    def.flags.set(SoundFlags::PLAYER_RESERVE, entry.player_reserve);
    def.flags.set(SoundFlags::LOAD_RAW, entry.raw);
    def.flags.set(SoundFlags::SIXTEEN_BIT, entry.sixteen_bit);
    lump.is_some()
}

/// Build registry entries from a manifest.
pub fn apply_manifest(
    registry: &mut SoundRegistry,
    assets: &dyn SoundAssets,
    manifest: &SoundManifest,
) -> SoundResult<ManifestSummary> {
    if !SchemaVersion::SOUND_MANIFEST.can_read(&manifest.version) {
        return Err(SoundError::Manifest(format!(
            "unsupported version {}",
            manifest.version
        )));
    }

    let mut summary = ManifestSummary::default();

    if let Some(name) = &manifest.empty_sound {
        let lump = assets.lump_by_name(name);
        if lump.is_none() {
            warn!("Empty sound lump '{}' not found", name);
            summary.problems += 1;
        }
        registry.set_empty_lump(lump);
    }
    if let Some(rolloff) = manifest.rolloff.filter(RolloffInfo::is_set) {
        registry.set_global_rolloff(rolloff);
    }

    for entry in &manifest.sounds {
        if entry.name.is_empty() {
            warn!("Skipping unnamed sound entry");
            summary.problems += 1;
            continue;
        }
        if !define_sound(registry, assets, entry) {
            summary.problems += 1;
        }
        summary.sounds += 1;
    }

    for alias in &manifest.aliases {
        let from = registry.find_or_create_tentative(&alias.name);
        let to = registry.find_or_create_tentative(&alias.target);
        if from == to {
            warn!("Sound '{}' is an alias of itself", alias.name);
            summary.problems += 1;
            continue;
        }
        match registry.set_alias(from, to) {
            Ok(()) => {
                if let (Some(limit), Some(def)) = (alias.limit, registry.get_mut(from)) {
                    def.near_limit = limit;
                }
                summary.aliases += 1;
            },
            Err(e) => {
                warn!("Alias '{}' rejected: {}", alias.name, e);
                summary.problems += 1;
            },
        }
    }

    for group in &manifest.randoms {
        let owner = registry.find_or_create_tentative(&group.name);
        let choices: Vec<SoundId> = group
            .choices
            .iter()
            .map(|name| registry.find_or_create_tentative(name))
            .filter(|id| *id != owner)
            .collect();
        match registry.add_random_group(owner, choices) {
            Ok(()) => summary.randoms += 1,
            Err(e) => {
                warn!("Random sound '{}' rejected: {}", group.name, e);
                summary.problems += 1;
            },
        }
    }

    for (_, def) in registry.iter() {
        if def.flags.contains(SoundFlags::TENTATIVE) {
            warn!("Sound '{}' is referenced but never defined", def.name);
            summary.undefined += 1;
        }
    }

    registry.rehash();
    info!(
        "Applied sound manifest: {} sounds, {} aliases, {} random groups ({} problems)",
        summary.sounds, summary.aliases, summary.randoms, summary.problems
    );
    Ok(summary)
}

impl SoundEngine {
    /// Build registry entries from a manifest using the engine's assets.
    pub fn apply_manifest(&mut self, manifest: &SoundManifest) -> SoundResult<ManifestSummary> {
        apply_manifest(&mut self.registry, self.assets.as_ref(), manifest)
    }
}
