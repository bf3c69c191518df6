//! Scripted demo run.
//!
//! Drives the sound engine for a fixed number of ticks against the virtual
//! device. The script:
//!
//! - an ambient emitter loops its sound from the first tick
//! - the listener fires a one-shot every 25 ticks
//! - a wandering emitter shouts every 45 ticks while walking past
//! - the device is pulled at `device_loss_tick` (unless it is 0) and restored
//!   `device_loss_ticks` later, after which a restart is scheduled

use anyhow::{Context, Result};
use glam::Vec3;
use soundstage_common::ActorId;
use soundstage_kernel::prelude::*;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Listener's own object.
const PLAYER: ActorId = ActorId::new(1);

/// Stationary looping emitter.
const AMBIENT: ActorId = ActorId::new(2);

/// Emitter walking along the x axis.
const WANDERER: ActorId = ActorId::new(3);

/// Sound definitions used when no manifest is configured.
const BUILTIN_MANIFEST: &str = r#"
empty_sound = "dsempty"

[[sound]]
name = "weapons/pistol"
lump = "dspistol"

[[sound]]
name = "world/hum"
lump = "dshum"
limit = 0
attenuation = 0.5

[[sound]]
name = "grunt/sight1"
lump = "dsposit1"

[[sound]]
name = "grunt/sight2"
lump = "dsposit2"

[[sound]]
name = "grunt/sight3"
lump = "dsposit3"
pitch_mask = 7

[[random]]
name = "grunt/sight"
choices = ["grunt/sight1", "grunt/sight2", "grunt/sight3"]
"#;

/// Outcome of a demo run.
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// Ticks simulated.
    pub ticks: u64,
    /// Voices started on the device, restarts included.
    pub voices_started: usize,
    /// Channels on the active list at the end.
    pub active_channels: usize,
    /// Most channels evicted at once.
    pub peak_evicted: usize,
    /// Whether the ambient loop was live at the end.
    pub ambient_live: bool,
    /// `list_sound_channels` output at the end.
    pub channel_dump: String,
}

/// Legacy digital sound holding a square wave.
fn dmx_tone(rate: u16, samples: usize, period: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples + 8);
    data.extend_from_slice(&[3, 0]);
    data.extend_from_slice(&rate.to_le_bytes());
    data.extend_from_slice(&(samples as u32).to_le_bytes());
    data.extend((0..samples).map(|i| if (i / period.max(1)) % 2 == 0 { 0xc0 } else { 0x40 }));
    data
}

fn builtin_assets() -> MemoryAssets {
    MemoryAssets::new()
        .with_lump("dsempty", dmx_tone(11025, 16, 1))
        .with_lump("dspistol", dmx_tone(11025, 4000, 20))
        .with_lump("dshum", dmx_tone(11025, 11025, 90))
        .with_lump("dsposit1", dmx_tone(11025, 6000, 30))
        .with_lump("dsposit2", dmx_tone(11025, 7000, 35))
        .with_lump("dsposit3", dmx_tone(22050, 9000, 25))
}

fn load_assets(config: &EngineConfig) -> Result<Box<dyn SoundAssets>> {
    match &config.demo.asset_dir {
        Some(dir) => {
            let assets = DirectoryAssets::open(dir)
                .with_context(|| format!("cannot index sound directory {}", dir.display()))?;
            info!("Using {} sound files from {}", assets.len(), dir.display());
            Ok(Box::new(assets))
        },
        None => Ok(Box::new(builtin_assets())),
    }
}

fn load_manifest(config: &EngineConfig) -> Result<SoundManifest> {
    match &config.demo.manifest {
        Some(path) => SoundManifest::load(path)
            .with_context(|| format!("cannot load sound manifest {}", path.display())),
        None => SoundManifest::from_toml_str(BUILTIN_MANIFEST).context("built-in manifest"),
    }
}

fn lookup(engine: &SoundEngine, name: &str) -> SoundId {
    let id = engine.registry().find_by_name(name);
    if !id.is_valid() {
        warn!("Demo sound '{}' is not defined", name);
    }
    id
}

/// Position of the wandering emitter at `tick`.
fn wanderer_position(tick: u64) -> Vec3 {
    let x = (tick % 200) as f32 * 8.0 - 800.0;
    Vec3::new(x, 256.0, 0.0)
}

/// Run the demo script.
pub fn run(config: &EngineConfig) -> Result<DemoReport> {
    let assets = load_assets(config)?;
    let manifest = load_manifest(config)?;

    let backend = VirtualBackend::new();
    let device = backend.device();
    let positions = FixedPositions::new();
    positions.set_actor(AMBIENT, Vec3::new(-384.0, 128.0, 0.0), Vec3::ZERO);
    positions.set_actor(WANDERER, wanderer_position(0), Vec3::new(8.0, 0.0, 0.0));

    let mut engine = SoundEngine::new(
        config.sound.clone(),
        Box::new(backend),
        assets,
        Box::new(positions.clone()),
    );
    let summary = engine.apply_manifest(&manifest)?;
    if summary.problems > 0 || summary.undefined > 0 {
        warn!(
            "Manifest has {} problems and {} undefined sounds",
            summary.problems, summary.undefined
        );
    }

    let ambient = lookup(&engine, &config.demo.ambient_sound);
    let weapon = lookup(&engine, &config.demo.weapon_sound);
    let voice = lookup(&engine, &config.demo.voice_sound);

    // Precache everything the script plays
    engine.mark_all_unused();
    for id in [ambient, weapon, voice] {
        engine.mark_used(id);
    }
    engine.cache_marked_sounds();

    let loss = config.device_loss_tick();
    let recovery = loss.map(|tick| tick.saturating_add(config.demo.device_loss_ticks.max(1)));
    let mut peak_evicted = 0;

    for tick in 0..config.demo.ticks {
        engine.set_listener(Listener::at(Vec3::ZERO).with_object(PLAYER));
        positions.set_actor(WANDERER, wanderer_position(tick), Vec3::new(8.0, 0.0, 0.0));

        if Some(tick) == loss {
            info!("Tick {}: pulling the sound device", tick);
            device.lose();
        }
        if Some(tick) == recovery {
            info!("Tick {}: sound device is back", tick);
            device.restore();
            engine.set_restart_time(tick);
        }

        if tick == 0 {
            engine.start_sound(
                &SoundRequest::new(ambient)
                    .from_source(SoundSource::Actor(AMBIENT))
                    .with_flags(ChannelFlags::LOOP)
                    .with_volume(0.6),
            );
        }
        if tick % 25 == 0 {
            engine.start_sound(
                &SoundRequest::new(weapon)
                    .from_source(SoundSource::Actor(PLAYER))
                    .on_slot(1),
            );
        }
        if tick % 45 == 10 {
            engine.start_sound(
                &SoundRequest::new(voice)
                    .from_source(SoundSource::Actor(WANDERER))
                    .on_slot(2),
            );
        }

        engine.update_sounds(tick);

        let evicted = engine.channels().filter(|(_, c)| c.is_evicted()).count();
        peak_evicted = peak_evicted.max(evicted);
        if tick % 35 == 0 {
            debug!(
                "Tick {}: {} channels, {} evicted, {} voices",
                tick,
                engine.active_channel_count(),
                evicted,
                device.voice_count()
            );
        }
    }

    let ambient_live = engine.channels().any(|(_, c)| {
        c.org_id == ambient && !c.is_evicted() && c.backend.is_some_and(|h| device.is_playing(h))
    });
    Ok(DemoReport {
        ticks: config.demo.ticks,
        voices_started: device.start_count(),
        active_channels: engine.active_channel_count(),
        peak_evicted,
        ambient_live,
        channel_dump: engine.list_sound_channels(),
    })
}
