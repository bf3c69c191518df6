//! Scenario tests for the sound engine.
//!
//! These drive a full engine against the virtual backend and in-memory
//! assets, checking what a game would observe: which requests play, which
//! channels survive device loss, and what ends up on the device.

#![cfg(test)]

use glam::Vec3;
use soundstage_common::{ActorId, SoundId};

use crate::assets::MemoryAssets;
use crate::channel::{ChannelFlags, ChannelId};
use crate::config::SoundConfig;
use crate::engine::{SoundEngine, SoundRequest};
use crate::manifest::SoundManifest;
use crate::registry::SoundLink;
use crate::virtual_backend::{VirtualBackend, VirtualDevice};
use crate::world::{FixedPositions, Listener, SoundSource};

const MANIFEST: &str = r#"
empty_sound = "dsempty"

[[sound]]
name = "weapons/pistol"
lump = "dspistol"

[[sound]]
name = "weapons/pistol2"
lump = "dspistol"

[[sound]]
name = "world/hum"
lump = "dshum"
limit = 0

[[sound]]
name = "world/quake"
lump = "dsquake"
singular = true

[[sound]]
name = "misc/tick"
lump = "dstick"
limit = 0

[[sound]]
name = "misc/vary"
lump = "dsvary"
limit = 0
pitch_mask = 7

[[sound]]
name = "doors/open"
lump = "dsdoropn"

[[sound]]
name = "misc/gone"
lump = "dsgone"

[[sound]]
name = "misc/short"
lump = "dsshort"

[[sound]]
name = "grunt/sight1"
lump = "dsposit1"

[[sound]]
name = "grunt/sight2"
lump = "dsposit2"

[[alias]]
name = "weapons/chaingun"
target = "weapons/pistol"

[[random]]
name = "grunt/sight"
choices = ["grunt/sight1", "grunt/sight2"]
"#;

/// Legacy digital sound: 8 bit mono PCM behind an 8 byte header.
fn dmx(len: usize) -> Vec<u8> {
    let mut data = vec![3, 0];
    data.extend_from_slice(&11025u16.to_le_bytes());
    data.extend_from_slice(&(len as u32).to_le_bytes());
    data.extend(std::iter::repeat(0x80).take(len));
    data
}

fn actor(id: u64) -> SoundSource {
    SoundSource::Actor(ActorId::new(id))
}

const LISTENER_OBJECT: u64 = 100;

struct Fixture {
    engine: SoundEngine,
    device: VirtualDevice,
    positions: FixedPositions,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(SoundConfig::default().with_seed(42))
    }

    fn with_config(config: SoundConfig) -> Self {
        let assets = MemoryAssets::new()
            .with_lump("dsempty", dmx(16))
            .with_lump("dspistol", dmx(1000))
            .with_lump("dshum", dmx(4000))
            .with_lump("dsquake", dmx(3000))
            .with_lump("dstick", dmx(2000))
            .with_lump("dsvary", dmx(2000))
            .with_lump("dsdoropn", vec![0x41; 2048])
            .with_lump("dsshort", vec![3, 0, 0, 0, 0, 0, 0, 0])
            .with_lump("dsposit1", dmx(500))
            .with_lump("dsposit2", dmx(600));

        let backend = VirtualBackend::new();
        let device = backend.device();
        let positions = FixedPositions::new();
        positions.set_actor(ActorId::new(1), Vec3::new(300.0, 0.0, 0.0), Vec3::ZERO);
        positions.set_actor(ActorId::new(2), Vec3::new(-300.0, 0.0, 0.0), Vec3::ZERO);

        let mut engine = SoundEngine::new(
            config,
            Box::new(backend),
            Box::new(assets),
            Box::new(positions.clone()),
        );
        engine.set_listener(Listener::at(Vec3::ZERO).with_object(ActorId::new(LISTENER_OBJECT)));
        let manifest = SoundManifest::from_toml_str(MANIFEST).unwrap();
        engine.apply_manifest(&manifest).unwrap();

        Self {
            engine,
            device,
            positions,
        }
    }

    fn id(&self, name: &str) -> SoundId {
        let id = self.engine.registry().find_by_name(name);
        assert!(id.is_valid(), "sound '{name}' should be registered");
        id
    }

    fn start(&mut self, request: SoundRequest) -> Option<ChannelId> {
        self.engine.start_sound(&request)
    }

    fn request(&self, name: &str) -> SoundRequest {
        SoundRequest::new(self.id(name))
    }

    fn looping(&self, name: &str, source: SoundSource) -> SoundRequest {
        self.request(name)
            .from_source(source)
            .with_flags(ChannelFlags::LOOP)
    }

    fn voice_position(&self, id: ChannelId) -> Option<u64> {
        let handle = self.engine.channel(id)?.backend?;
        self.device.voice(handle).map(|v| v.position)
    }
}

mod start_tests {
    use super::*;

    #[test]
    fn test_invalid_requests_start_nothing() {
        let mut f = Fixture::new();
        let pistol = f.id("weapons/pistol");

        assert!(f.start(SoundRequest::new(SoundId::NONE)).is_none());
        assert!(f.start(SoundRequest::new(SoundId::new(-3))).is_none());
        assert!(f.start(SoundRequest::new(SoundId::new(9999))).is_none());
        assert!(f.start(SoundRequest::new(pistol).with_volume(0.0)).is_none());
        assert!(f.start(SoundRequest::new(pistol).with_volume(-1.0)).is_none());
        assert_eq!(f.engine.active_channel_count(), 0);
        assert_eq!(f.device.start_count(), 0);
    }

    #[test]
    fn test_muted_engine_starts_nothing() {
        let mut f = Fixture::new();
        f.engine.set_muted(true);
        assert!(f.start(f.request("weapons/pistol")).is_none());
        f.engine.set_muted(false);
        assert!(f.start(f.request("weapons/pistol")).is_some());
    }

    #[test]
    fn test_start_plays_on_device() {
        let mut f = Fixture::new();
        let pistol = f.id("weapons/pistol");
        let id = f.start(SoundRequest::new(pistol)).unwrap();

        let chan = f.engine.channel(id).unwrap();
        assert_eq!(chan.sound_id, pistol);
        assert_eq!(chan.org_id, pistol);
        assert_eq!(chan.priority, 80, "unpositioned sounds get listener priority");
        assert_eq!(chan.pitch, 128);
        assert!(chan.flags.contains(ChannelFlags::IS_3D | ChannelFlags::JUST_STARTED));
        assert!(chan.backend.is_some());
        assert_eq!(f.device.voice_count(), 1);
    }

    #[test]
    fn test_positioned_sound_has_no_priority() {
        let mut f = Fixture::new();
        let id = f.start(f.request("weapons/pistol").from_source(actor(1))).unwrap();
        assert_eq!(f.engine.channel(id).unwrap().priority, 0);

        let own = f
            .start(f.request("weapons/pistol").from_source(actor(LISTENER_OBJECT)))
            .unwrap();
        assert_eq!(f.engine.channel(own).unwrap().priority, 80);
    }

    #[test]
    fn test_unattenuated_sound_plays_flat() {
        let mut f = Fixture::new();
        let id = f
            .start(f.request("misc/tick").with_attenuation(crate::engine::ATTN_NONE))
            .unwrap();
        let chan = f.engine.channel(id).unwrap();
        assert!(!chan.flags.contains(ChannelFlags::IS_3D));
        assert!(chan.flags.contains(ChannelFlags::LISTENER_Z));
        let voice = f.device.voice(chan.backend.unwrap()).unwrap();
        assert!(voice.origin.is_none());
    }

    #[test]
    fn test_singular_sound_blocks_second_start() {
        let mut f = Fixture::new();
        let first = f.start(f.request("world/quake")).unwrap();

        assert!(
            f.start(f.request("world/quake")).is_none(),
            "second non-looping instance of a singular sound must not play"
        );
        assert_eq!(f.engine.active_channel_count(), 1);

        let queued = f
            .start(f.request("world/quake").with_flags(ChannelFlags::LOOP))
            .unwrap();
        let chan = f.engine.channel(queued).unwrap();
        assert!(chan.is_evicted(), "looping singular sound is queued as evicted");
        assert!(chan.backend.is_none());
        assert_eq!(f.device.voice_count(), 1);

        f.engine.update_sounds(1);
        assert!(f.engine.channel(queued).unwrap().is_evicted());

        f.engine.stop_channel(first);
        f.engine.update_sounds(2);
        let chan = f.engine.channel(queued).unwrap();
        assert!(!chan.is_evicted(), "queued sound starts once the first one stops");
        assert!(chan.backend.is_some());
    }

    #[test]
    fn test_near_limit_evicts_third_copy() {
        let mut f = Fixture::new();
        let point = SoundSource::Unattached(Vec3::new(500.0, 0.0, 0.0));
        let request = f.request("weapons/pistol").from_source(point);

        assert!(f.start(request).is_some());
        assert!(f.start(request).is_some());
        assert!(f.start(request).is_none(), "third copy within range is dropped");
        assert_eq!(f.engine.active_channel_count(), 2);

        let queued = f.start(request.with_flags(ChannelFlags::LOOP)).unwrap();
        assert!(f.engine.channel(queued).unwrap().is_evicted());
        assert_eq!(f.engine.active_channel_count(), 3);
        assert_eq!(f.device.voice_count(), 2);
    }

    #[test]
    fn test_near_limit_ignores_distant_copies() {
        let mut f = Fixture::new();
        let near = SoundSource::Unattached(Vec3::new(500.0, 0.0, 0.0));
        let far = SoundSource::Unattached(Vec3::new(5000.0, 0.0, 0.0));

        assert!(f.start(f.request("weapons/pistol").from_source(near)).is_some());
        assert!(f.start(f.request("weapons/pistol").from_source(near)).is_some());
        assert!(f.start(f.request("weapons/pistol").from_source(far)).is_some());
    }

    #[test]
    fn test_near_limit_allows_restart_on_same_slot() {
        let mut f = Fixture::new();
        f.positions
            .set_actor(ActorId::new(3), Vec3::new(300.0, 0.0, 0.0), Vec3::ZERO);
        assert!(f.start(f.request("weapons/pistol").from_source(actor(1)).on_slot(1)).is_some());
        assert!(f.start(f.request("weapons/pistol").from_source(actor(3)).on_slot(1)).is_some());

        let restarted = f.start(f.request("weapons/pistol").from_source(actor(1)).on_slot(1));
        assert!(restarted.is_some(), "replacing its own sound is not a new instance");
        assert_eq!(f.engine.active_channel_count(), 2);
    }

    #[test]
    fn test_auto_slot_selection() {
        let mut f = Fixture::new();
        let source = actor(1);
        let tick = f.request("misc/tick").from_source(source);

        f.start(tick.on_slot(1)).unwrap();
        f.start(tick.on_slot(2)).unwrap();

        let slot_of = |f: &Fixture, id: ChannelId| f.engine.channel(id).unwrap().slot;
        let a = f.start(tick).unwrap();
        assert_eq!(slot_of(&f, a), 0, "slot 0 is tried first");
        let b = f.start(tick).unwrap();
        assert_eq!(slot_of(&f, b), 7, "then slots descend from 7");
        let c = f.start(tick).unwrap();
        assert_eq!(slot_of(&f, c), 6);

        for _ in 0..3 {
            f.start(tick).unwrap();
        }
        assert_eq!(f.engine.active_channel_count(), 8);
        assert!(f.start(tick).is_none(), "no free slot left");
    }

    #[test]
    fn test_explicit_slot_replaces_previous_sound() {
        let mut f = Fixture::new();
        let first = f.start(f.request("misc/tick").from_source(actor(1)).on_slot(3)).unwrap();
        let second = f
            .start(f.request("weapons/pistol").from_source(actor(1)).on_slot(3))
            .unwrap();

        assert!(f.engine.channel(first).is_none(), "old channel was stopped and released");
        assert_eq!(f.engine.channel(second).unwrap().slot, 3);
        assert_eq!(f.engine.active_channel_count(), 1);
        assert_eq!(f.device.voice_count(), 1);
    }

    #[test]
    fn test_no_stop_keeps_running_sound() {
        let mut f = Fixture::new();
        let first = f.start(f.looping("world/hum", actor(1)).on_slot(1)).unwrap();
        let again = f.start(
            f.looping("world/hum", actor(1))
                .on_slot(1)
                .with_flags(ChannelFlags::LOOP | ChannelFlags::NO_STOP),
        );
        assert!(again.is_none());
        assert!(f.engine.channel(first).is_some());
    }

    #[test]
    fn test_pitch_mask_zero_is_center() {
        let mut f = Fixture::new();
        for _ in 0..20 {
            let id = f.start(f.request("misc/tick")).unwrap();
            assert_eq!(f.engine.channel(id).unwrap().pitch, 128);
        }
    }

    #[test]
    fn test_pitch_mask_varies_within_range() {
        let mut f = Fixture::new();
        let pitches: Vec<i32> = (0..50)
            .map(|_| {
                let id = f.start(f.request("misc/vary")).unwrap();
                f.engine.channel(id).unwrap().pitch
            })
            .collect();
        assert!(pitches.iter().all(|p| (121..=135).contains(p)));
        assert!(pitches.iter().any(|p| *p != 128));
    }

    #[test]
    fn test_pitch_override() {
        let mut f = Fixture::new();
        let id = f.start(f.request("misc/tick").with_pitch(2.0)).unwrap();
        let chan = f.engine.channel(id).unwrap();
        assert_eq!(chan.pitch, 256);
        let voice = f.device.voice(chan.backend.unwrap()).unwrap();
        assert!((voice.pitch - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_paused_engine_only_starts_exempt_sounds() {
        let mut f = Fixture::new();
        f.engine.set_paused(true);
        assert!(f.device.is_paused());

        assert!(f.start(f.request("weapons/pistol")).is_none());
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        let ui = f
            .start(f.request("misc/tick").with_flags(ChannelFlags::UI))
            .unwrap();

        f.engine.update_sounds(1);
        assert_eq!(f.voice_position(hum), Some(0), "paused voices hold their position");
        assert_eq!(f.voice_position(ui), Some(315));
    }

    #[test]
    fn test_alias_plays_target() {
        let mut f = Fixture::new();
        let pistol = f.id("weapons/pistol");
        let chaingun = f.id("weapons/chaingun");
        let id = f.start(SoundRequest::new(chaingun)).unwrap();
        let chan = f.engine.channel(id).unwrap();
        assert_eq!(chan.sound_id, pistol);
        assert_eq!(chan.org_id, chaingun);
    }

    #[test]
    fn test_random_sound_plays_a_candidate() {
        let mut f = Fixture::new();
        let sight = f.id("grunt/sight");
        let choices = [f.id("grunt/sight1"), f.id("grunt/sight2")];
        for _ in 0..10 {
            let id = f.start(SoundRequest::new(sight)).unwrap();
            let chan = f.engine.channel(id).unwrap();
            assert!(choices.contains(&chan.sound_id));
            assert_eq!(chan.org_id, sight);
        }
    }

    #[test]
    fn test_shared_lump_is_decoded_once() {
        let mut f = Fixture::new();
        let pistol = f.id("weapons/pistol");
        let pistol2 = f.id("weapons/pistol2");

        f.start(SoundRequest::new(pistol)).unwrap();
        let id = f.start(SoundRequest::new(pistol2)).unwrap();

        assert_eq!(f.engine.channel(id).unwrap().sound_id, pistol);
        assert_eq!(
            f.engine.registry().get(pistol2).unwrap().link,
            SoundLink::Alias(pistol)
        );
        assert_eq!(f.device.sample_count(), 1);
    }

    #[test]
    fn test_positional_start_loads_mono_data() {
        let mut f = Fixture::new();
        let door = f.id("doors/open");
        f.start(SoundRequest::new(door).from_source(actor(1))).unwrap();
        let def = f.engine.registry().get(door).unwrap();
        assert!(def.data.is_some());
        assert!(def.data_3d.is_some());
        assert_ne!(def.data, def.data_3d, "stereo data is decoded again as mono");
        assert_eq!(f.device.sample_count(), 2);
    }

    #[test]
    fn test_empty_sound_never_plays() {
        let mut f = Fixture::new();
        assert!(f.start(f.request("misc/gone")).is_none());
        assert!(f.start(f.request("misc/short")).is_none());
        assert_eq!(f.engine.active_channel_count(), 0);

        let short = f.engine.registry().get(f.id("misc/short")).unwrap();
        assert_eq!(short.lump, f.engine.registry().empty_lump());
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_finished_sound_releases_channel() {
        let mut f = Fixture::new();
        f.start(f.request("weapons/pistol")).unwrap();

        for tick in 1..=3 {
            f.engine.update_sounds(tick);
        }
        assert_eq!(f.engine.active_channel_count(), 1);

        f.engine.update_sounds(4);
        assert_eq!(f.engine.active_channel_count(), 0, "channel released after natural end");
        assert_eq!(f.device.voice_count(), 0);
        assert!(f.engine.pool().validate());
    }

    #[test]
    fn test_just_started_flag_clears_on_update() {
        let mut f = Fixture::new();
        let id = f.start(f.looping("world/hum", actor(1))).unwrap();
        assert!(f.engine.channel(id).unwrap().flags.contains(ChannelFlags::JUST_STARTED));
        f.engine.update_sounds(1);
        assert!(!f.engine.channel(id).unwrap().flags.contains(ChannelFlags::JUST_STARTED));
    }

    #[test]
    fn test_evict_restore_round_trip() {
        let mut f = Fixture::new();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        let tick = f.start(f.looping("misc/tick", actor(2))).unwrap();
        f.engine.update_sounds(1);
        f.engine.update_sounds(2);

        f.engine.evict_all_channels();
        assert_eq!(f.engine.active_channel_count(), 2);
        assert_eq!(f.device.voice_count(), 0);
        for id in [hum, tick] {
            let chan = f.engine.channel(id).unwrap();
            assert!(chan.is_evicted());
            assert!(chan.backend.is_none());
            assert!(chan.flags.contains(ChannelFlags::ABS_TIME));
            assert_eq!(chan.start_time, 630);
        }

        f.engine.restore_evicted_channels();
        assert_eq!(f.engine.active_channel_count(), 2, "count unchanged across the round trip");
        for id in [hum, tick] {
            let chan = f.engine.channel(id).unwrap();
            assert!(!chan.is_evicted());
            assert!(!chan.flags.contains(ChannelFlags::ABS_TIME));
            assert_eq!(f.voice_position(id), Some(630), "resumed at the saved offset");
        }
        assert_eq!(f.device.voice_count(), 2);
    }

    #[test]
    fn test_evicted_one_shot_resumes_then_becomes_forgettable() {
        let mut f = Fixture::new();
        let id = f.start(f.request("misc/tick").from_source(actor(1))).unwrap();
        f.engine.update_sounds(1);

        f.engine.evict_all_channels();
        assert!(f.engine.channel(id).unwrap().is_evicted(), "one-shots are kept too");

        f.engine.restore_evicted_channels();
        let chan = f.engine.channel(id).unwrap();
        assert!(!chan.is_evicted());
        assert!(chan.flags.contains(ChannelFlags::FORGETTABLE));
        assert_eq!(f.voice_position(id), Some(315));
    }

    #[test]
    fn test_device_loss_and_recovery() {
        let mut f = Fixture::new();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        let pistol = f.start(f.request("weapons/pistol").from_source(actor(2))).unwrap();
        f.engine.update_sounds(1);

        f.device.lose();
        f.engine.update_sounds(2);
        assert!(f.engine.channel(hum).unwrap().is_evicted(), "looping sound waits for the device");
        assert!(f.engine.channel(pistol).is_none(), "one-shot that cannot restart is dropped");
        assert_eq!(f.engine.active_channel_count(), 1);

        f.engine.update_sounds(3);
        assert!(f.engine.channel(hum).unwrap().is_evicted());

        f.device.restore();
        f.engine.update_sounds(4);
        let chan = f.engine.channel(hum).unwrap();
        assert!(!chan.is_evicted());
        assert!(chan.backend.is_some());
        assert_eq!(f.device.voice_count(), 1);
        assert!(f.engine.pool().validate());
    }

    #[test]
    fn test_restart_delay() {
        let mut f = Fixture::with_config(SoundConfig::default().with_seed(1).with_restart_delay(10));
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();

        f.engine.evict_all_channels();
        f.engine.set_restart_time(0);
        assert_eq!(f.engine.restart_time(), 10);

        f.engine.update_sounds(5);
        assert!(f.engine.channel(hum).unwrap().is_evicted());

        f.engine.update_sounds(10);
        assert!(!f.engine.channel(hum).unwrap().is_evicted());
        assert_eq!(f.engine.restart_time(), 0);
    }

    #[test]
    fn test_restart_time_saturates() {
        let mut f = Fixture::with_config(SoundConfig::default().with_seed(1).with_restart_delay(10));
        f.engine.set_restart_time(u64::MAX);
        assert_eq!(f.engine.restart_time(), u64::MAX);
        f.engine.set_restart_time(u64::MAX - 4);
        assert_eq!(f.engine.restart_time(), u64::MAX);
    }

    #[test]
    fn test_reset_backend_moves_channels() {
        let mut f = Fixture::new();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        f.engine.update_sounds(1);
        f.engine.update_sounds(2);

        let replacement = VirtualBackend::new();
        let new_device = replacement.device();
        let old = f.engine.reset_backend(Box::new(replacement));

        assert!(!old.is_null());
        assert_eq!(f.device.voice_count(), 0);
        assert_eq!(f.device.sample_count(), 0, "data unloaded from the old device");
        assert_eq!(new_device.voice_count(), 1);
        let handle = f.engine.channel(hum).unwrap().backend.unwrap();
        assert_eq!(new_device.voice(handle).unwrap().position, 630);
    }

    #[test]
    fn test_virtual_state_is_tracked() {
        let mut f = Fixture::new();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        let handle = f.engine.channel(hum).unwrap().backend.unwrap();

        f.device.set_virtual(handle, true);
        f.engine.update_sounds(1);
        assert!(f.engine.channel(hum).unwrap().flags.contains(ChannelFlags::VIRTUAL));

        f.device.set_virtual(handle, false);
        f.engine.update_sounds(2);
        assert!(!f.engine.channel(hum).unwrap().flags.contains(ChannelFlags::VIRTUAL));
    }

    #[test]
    fn test_positional_voices_follow_sources() {
        let mut f = Fixture::new();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        let handle = f.engine.channel(hum).unwrap().backend.unwrap();
        let near_gain = f.device.voice(handle).unwrap().gain;

        f.positions
            .set_actor(ActorId::new(1), Vec3::new(1000.0, 0.0, 0.0), Vec3::ZERO);
        f.engine.update_sounds(1);
        let voice = f.device.voice(handle).unwrap();
        assert_eq!(voice.origin, Some(Vec3::new(1000.0, 0.0, 0.0)));
        assert!(voice.gain < near_gain);
    }
}

mod control_tests {
    use super::*;

    #[test]
    fn test_stop_variants() {
        let mut f = Fixture::new();
        let slot0 = f.start(f.request("misc/tick")).unwrap();
        let slot2 = f.start(f.request("weapons/pistol").on_slot(2)).unwrap();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();

        f.engine.stop_sound(2);
        assert!(f.engine.channel(slot2).is_none());
        assert!(f.engine.channel(slot0).is_some());

        f.engine.stop_sound_from(&actor(1), Some(5));
        assert!(f.engine.channel(hum).is_some());
        f.engine.stop_sound_from(&actor(1), None);
        assert!(f.engine.channel(hum).is_none());

        f.engine.stop_all_channels();
        assert_eq!(f.engine.active_channel_count(), 0);
        assert_eq!(f.device.voice_count(), 0);
    }

    #[test]
    fn test_stop_releases_placeholder_immediately() {
        let mut f = Fixture::new();
        f.start(f.request("world/quake")).unwrap();
        let queued = f
            .start(f.request("world/quake").with_flags(ChannelFlags::LOOP))
            .unwrap();
        f.engine.stop_channel(queued);
        assert!(f.engine.channel(queued).is_none());
        assert_eq!(f.engine.active_channel_count(), 1);
    }

    #[test]
    fn test_relink_sound() {
        let mut f = Fixture::new();
        let point = Vec3::new(64.0, 32.0, 0.0);
        let pistol = f.start(f.request("weapons/pistol").from_source(actor(1))).unwrap();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();

        f.engine.relink_sound(&actor(1), None, Some(point));
        assert_eq!(
            f.engine.channel(pistol).unwrap().source,
            SoundSource::Unattached(point),
            "one-shots stay where the source was"
        );
        assert!(f.engine.channel(hum).is_none(), "looping sounds stop with their source");

        f.engine
            .relink_sound(&SoundSource::Unattached(point), Some(actor(2)), None);
        assert_eq!(f.engine.channel(pistol).unwrap().source, actor(2));
    }

    #[test]
    fn test_change_volume_and_pitch() {
        let mut f = Fixture::new();
        let id = f
            .start(f.looping("world/hum", actor(1)).on_slot(4).with_volume(0.5))
            .unwrap();
        let handle = f.engine.channel(id).unwrap().backend.unwrap();

        f.engine.change_sound_volume(&actor(1), None, 1.5);
        assert!((f.engine.channel(id).unwrap().volume - 1.0).abs() < f32::EPSILON);

        f.engine.change_sound_volume(&actor(1), Some(4), 0.25);
        assert!((f.engine.channel(id).unwrap().volume - 0.25).abs() < f32::EPSILON);
        assert!((f.device.voice(handle).unwrap().volume - 0.25).abs() < f32::EPSILON);

        f.engine.change_sound_pitch(&actor(1), 4, 0.5);
        assert_eq!(f.engine.channel(id).unwrap().pitch, 64);
        assert!((f.device.voice(handle).unwrap().pitch - 0.5).abs() < f32::EPSILON);

        f.engine.change_sound_pitch(&actor(1), 3, 2.0);
        assert_eq!(f.engine.channel(id).unwrap().pitch, 64, "other slots are untouched");
    }

    #[test]
    fn test_source_queries() {
        let mut f = Fixture::new();
        let hum = f.id("world/hum");
        let pistol = f.id("weapons/pistol");
        f.start(f.looping("world/hum", actor(1)).on_slot(3)).unwrap();

        assert!(f.engine.is_source_playing_something(&actor(1), None, SoundId::NONE));
        assert!(f.engine.is_source_playing_something(&actor(1), Some(3), hum));
        assert!(!f.engine.is_source_playing_something(&actor(1), Some(2), SoundId::NONE));
        assert!(!f.engine.is_source_playing_something(&actor(1), None, pistol));
        assert!(!f.engine.is_source_playing_something(&actor(2), None, SoundId::NONE));

        assert!(f.engine.is_sound_playing_from(&actor(1), hum));
        assert!(!f.engine.is_sound_playing_from(&actor(1), pistol));
    }

    #[test]
    fn test_channel_listings() {
        let mut f = Fixture::new();
        let hum = f.start(f.looping("world/hum", actor(1))).unwrap();
        f.start(f.request("misc/tick").with_flags(ChannelFlags::UI)).unwrap();

        assert_eq!(f.engine.list_active_channels(), vec![hum], "interface sounds are not listed");
        let dump = f.engine.list_sound_channels();
        assert!(dump.contains("world/hum"));
        assert!(dump.contains("2 sounds playing"));
    }

    #[test]
    fn test_channel_listing_counts_only_live_channels() {
        let mut f = Fixture::new();
        f.start(f.looping("world/hum", actor(1))).unwrap();
        f.start(f.request("misc/tick").with_flags(ChannelFlags::UI)).unwrap();
        f.engine.evict_all_channels();

        let dump = f.engine.list_sound_channels();
        assert!(dump.contains("world/hum"));
        assert!(dump.contains(" evicted"));
        assert!(dump.contains("0 sounds playing"));
    }
}

mod cache_tests {
    use super::*;

    #[test]
    fn test_cache_marked_sounds() {
        let mut f = Fixture::new();
        let pistol = f.id("weapons/pistol");
        let hum = f.id("world/hum");

        f.engine.mark_used(pistol);
        f.engine.cache_marked_sounds();
        assert!(f.engine.registry().get(pistol).unwrap().is_loaded());
        assert!(!f.engine.registry().get(hum).unwrap().is_loaded());

        f.start(f.looping("world/hum", actor(1))).unwrap();
        f.engine.mark_all_unused();
        f.engine.cache_marked_sounds();
        assert!(f.engine.registry().get(hum).unwrap().is_loaded(), "playing sounds stay");
        assert!(!f.engine.registry().get(pistol).unwrap().is_loaded());
    }

    #[test]
    fn test_cache_random_sound_loads_every_candidate() {
        let mut f = Fixture::new();
        f.engine.cache_sound(f.id("grunt/sight"));
        for name in ["grunt/sight1", "grunt/sight2"] {
            let def = f.engine.registry().get(f.id(name)).unwrap();
            assert!(def.is_loaded(), "{name} should be cached");
            assert!(def.flags.contains(crate::registry::SoundFlags::USED));
        }
    }

    #[test]
    fn test_ms_length() {
        let mut f = Fixture::new();
        assert_eq!(f.engine.ms_length(f.id("weapons/pistol")), 90);
        assert_eq!(f.engine.ms_length(f.id("weapons/chaingun")), 90);
        assert_eq!(f.engine.ms_length(f.id("grunt/sight")), 54, "longest candidate");
        assert_eq!(f.engine.ms_length(SoundId::NONE), 0);
    }

    #[test]
    fn test_unload_all_sounds() {
        let mut f = Fixture::new();
        f.start(f.request("doors/open").from_source(actor(1))).unwrap();
        f.start(f.request("weapons/pistol")).unwrap();
        assert_eq!(f.device.sample_count(), 3);

        f.engine.unload_all_sounds();
        assert_eq!(f.device.sample_count(), 0);
        assert!(!f.engine.registry().get(f.id("doors/open")).unwrap().is_loaded());
    }
}

mod persistence_tests {
    use super::*;
    use crate::error::SoundError;
    use crate::snapshot::ChannelSnapshotSet;
    use soundstage_common::SchemaVersion;

    #[test]
    fn test_snapshot_round_trip() {
        let mut f = Fixture::new();
        f.start(f.looping("world/hum", actor(1)).on_slot(2)).unwrap();
        f.start(f.request("misc/tick").with_flags(ChannelFlags::UI)).unwrap();
        f.engine.update_sounds(1);
        f.engine.update_sounds(2);

        let set = f.engine.snapshot_channels();
        assert_eq!(set.len(), 1);
        assert_eq!(set.channels[0].sound, "world/hum");
        assert_eq!(set.channels[0].offset, 630);

        let json = serde_json::to_string(&set).unwrap();
        let loaded: ChannelSnapshotSet = serde_json::from_str(&json).unwrap();

        let mut g = Fixture::new();
        assert_eq!(g.engine.restore_snapshot(&loaded).unwrap(), 1);
        let (id, chan) = g.engine.channels().next().unwrap();
        assert!(chan.is_evicted());
        assert_eq!(chan.slot, 2);
        assert_eq!(chan.source, actor(1));

        g.engine.update_sounds(1);
        assert!(!g.engine.channel(id).unwrap().is_evicted());
        assert_eq!(g.voice_position(id), Some(630));
    }

    #[test]
    fn test_snapshot_skips_unknown_sounds() {
        let mut f = Fixture::new();
        f.start(f.looping("world/hum", actor(1))).unwrap();
        let mut set = f.engine.snapshot_channels();
        let mut bogus = set.channels[0].clone();
        bogus.sound = "no/such/sound".to_string();
        set.channels.push(bogus);

        let mut g = Fixture::new();
        assert_eq!(g.engine.restore_snapshot(&set).unwrap(), 1);
    }

    #[test]
    fn test_snapshot_rejects_other_major_version() {
        let mut f = Fixture::new();
        let set = ChannelSnapshotSet {
            version: SchemaVersion::new(2, 0, 0),
            channels: Vec::new(),
        };
        let err = f.engine.restore_snapshot(&set).unwrap_err();
        assert!(matches!(err, SoundError::Snapshot(_)));
    }
}

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Start {
            sound: usize,
            actor: u64,
            slot: Option<u8>,
            looping: bool,
        },
        Stop(usize),
        Update,
        EvictAll,
        Restore,
        Lose,
        Recover,
    }

    const SOUNDS: [&str; 4] = ["weapons/pistol", "world/hum", "world/quake", "misc/tick"];

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..SOUNDS.len(), 0..3u64, proptest::option::of(0..8u8), any::<bool>())
                .prop_map(|(sound, actor, slot, looping)| Op::Start { sound, actor, slot, looping }),
            2 => (0..16usize).prop_map(Op::Stop),
            3 => Just(Op::Update),
            1 => Just(Op::EvictAll),
            1 => Just(Op::Restore),
            1 => Just(Op::Lose),
            1 => Just(Op::Recover),
        ]
    }

    proptest! {
        #[test]
        fn prop_channels_stay_consistent(ops in proptest::collection::vec(op(), 1..48)) {
            let mut f = Fixture::new();
            let mut tick = 0;
            for op in ops {
                match op {
                    Op::Start { sound, actor: a, slot, looping } => {
                        let mut request = f.request(SOUNDS[sound]).from_source(actor(a));
                        if let Some(slot) = slot {
                            request = request.on_slot(slot);
                        }
                        if looping {
                            request = request.with_flags(ChannelFlags::LOOP);
                        }
                        f.start(request);
                    },
                    Op::Stop(n) => {
                        let id = f.engine.channels().nth(n).map(|(id, _)| id);
                        if let Some(id) = id {
                            f.engine.stop_channel(id);
                        }
                    },
                    Op::Update => {
                        tick += 1;
                        f.engine.update_sounds(tick);
                        for (_, chan) in f.engine.channels() {
                            if let Some(handle) = chan.backend {
                                prop_assert!(f.device.is_playing(handle));
                            }
                        }
                    },
                    Op::EvictAll => f.engine.evict_all_channels(),
                    Op::Restore => f.engine.restore_evicted_channels(),
                    Op::Lose => f.device.lose(),
                    Op::Recover => f.device.restore(),
                }
                prop_assert!(f.engine.pool().validate());
                prop_assert_eq!(f.engine.active_channel_count(), f.engine.channels().count());
            }
        }
    }
}
