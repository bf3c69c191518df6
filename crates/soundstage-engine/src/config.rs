//! Driver configuration.
//!
//! Holds the log filter, the sound engine settings and the demo script
//! parameters. Configuration can be loaded from and saved to a TOML file.

use serde::{Deserialize, Serialize};
use soundstage_kernel::SoundConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration file name.
const CONFIG_FILE: &str = "soundstage.toml";

/// Longest scripted run.
const MAX_TICKS: u64 = 35 * 60 * 10;

/// Scripted demo parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Ticks to simulate (35 per second)
    pub ticks: u64,
    /// Sound manifest to load (None = built-in sounds)
    pub manifest: Option<PathBuf>,
    /// Directory with one file per lump (None = built-in sounds)
    pub asset_dir: Option<PathBuf>,
    /// Tick at which the device is pulled (0 = never)
    pub device_loss_tick: u64,
    /// Ticks the device stays unavailable
    pub device_loss_ticks: u64,
    /// Looping sound played by the ambient emitter
    pub ambient_sound: String,
    /// One-shot sound fired by the listener
    pub weapon_sound: String,
    /// Sound shouted by the wandering emitter
    pub voice_sound: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            ticks: 350,
            manifest: None,
            asset_dir: None,
            device_loss_tick: 120,
            device_loss_ticks: 40,
            ambient_sound: "world/hum".to_string(),
            weapon_sound: "weapons/pistol".to_string(),
            voice_sound: "grunt/sight".to_string(),
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default `tracing` filter directive (`RUST_LOG` is applied on top)
    pub log_filter: String,
    /// Sound engine settings
    pub sound: SoundConfig,
    /// Demo script
    pub demo: DemoConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: "soundstage=info".to_string(),
            sound: SoundConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("Failed to parse config file: {e}");
                    Self::default()
                },
            },
            Err(e) => {
                warn!("Failed to read config file: {e}");
                Self::default()
            },
        }
    }

    /// Load configuration from the default file location, writing the
    /// defaults there when no file exists yet.
    pub fn load_or_create() -> Self {
        Self::load_or_create_at(Self::config_path())
    }

    /// Load configuration from `path`, writing the defaults there when no
    /// file exists yet.
    pub fn load_or_create_at<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        if let Err(e) = config.save_to(path) {
            warn!("Failed to write default config: {e}");
        }
        config
    }

    /// Tick at which the device is pulled, if the demo pulls it at all.
    #[must_use]
    pub fn device_loss_tick(&self) -> Option<u64> {
        (self.demo.device_loss_tick > 0).then_some(self.demo.device_loss_tick)
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path.
    fn config_path() -> PathBuf {
        // Fall back to the current directory without a platform config dir
        dirs::config_dir().map_or_else(
            || PathBuf::from(CONFIG_FILE),
            |dir| dir.join("soundstage").join(CONFIG_FILE),
        )
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.sound.validate();
        self.demo.ticks = self.demo.ticks.clamp(1, MAX_TICKS);
        if self.log_filter.trim().is_empty() {
            self.log_filter = Self::default().log_filter;
        }
    }
}
