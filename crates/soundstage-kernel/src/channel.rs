//! Channel Pool
//!
//! Arena of channel records linked into two lists: the active list (newest
//! first) and the free list. Every record is a member of exactly one list.
//!
//! # Lifecycle
//!
//! ```text
//!  Free ──acquire──▶ Active ──evict──▶ Evicted ──restart──▶ Active
//!   ▲                  │                  │
//!   └────release───────┴────forget────────┘
//! ```
//!
//! Records are addressed by [`ChannelId`], an index plus a generation that
//! is bumped on release so stale ids never reach a reused record.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use soundstage_common::SoundId;

use crate::backend::BackendHandle;
use crate::rolloff::RolloffInfo;
use crate::world::SoundSource;

/// Pitch at which a sample plays at its natural rate.
pub const DEFAULT_PITCH: i32 = 128;

/// Number of logical slots per source.
pub const NUM_SLOTS: u8 = 8;

bitflags! {
    /// Channel state and modifier flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChannelFlags: u16 {
        /// Loops until stopped.
        const LOOP = 1 << 0;
        /// Area sound.
        const AREA = 1 << 1;
        /// Interface sound (no reverb, not persisted).
        const UI = 1 << 2;
        /// Keeps playing while paused.
        const NO_PAUSE = 1 << 3;
        /// Uses the listener's height.
        const LISTENER_Z = 1 << 4;
        /// May be played locally for the listener's own object.
        const MAYBE_LOCAL = 1 << 5;
        /// Started through the positional path.
        const IS_3D = 1 << 6;
        /// Backend voice is gone; state kept for restart.
        const EVICTED = 1 << 7;
        /// Release instead of evict when the voice ends.
        const FORGETTABLE = 1 << 8;
        /// Started during the current tick.
        const JUST_STARTED = 1 << 9;
        /// `start_time` is an absolute sample position.
        const ABS_TIME = 1 << 10;
        /// Backend voice is virtual.
        const VIRTUAL = 1 << 11;
        /// Skip the start if the source already plays the sound on the slot.
        const NO_STOP = 1 << 12;
    }
}

impl ChannelFlags {
    /// Flags a caller may pass with a start request.
    pub const REQUEST_MASK: Self = Self::LOOP
        .union(Self::AREA)
        .union(Self::UI)
        .union(Self::NO_PAUSE)
        .union(Self::LISTENER_Z)
        .union(Self::MAYBE_LOCAL)
        .union(Self::NO_STOP);
}

/// Stable reference to a pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: u32,
    generation: u32,
}

impl ChannelId {
    /// Arena index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation (for detecting stale ids).
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

/// One in-flight or evicted playback instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Resolved sound.
    pub sound_id: SoundId,
    /// Sound as requested, before alias resolution.
    pub org_id: SoundId,
    /// Volume in `[0, 1]`.
    pub volume: f32,
    /// Pitch, 128 is the natural rate.
    pub pitch: i32,
    /// Voice priority.
    pub priority: i32,
    /// Logical slot `0..8`.
    pub slot: u8,
    /// State and modifier flags.
    pub flags: ChannelFlags,
    /// Emitter.
    pub source: SoundSource,
    /// Near limit snapshot.
    pub near_limit: i16,
    /// Near limit range snapshot.
    pub limit_range: f32,
    /// Distance scale (attenuation).
    pub distance_scale: f32,
    /// Rolloff used by the voice.
    pub rolloff: RolloffInfo,
    /// Backend time the voice started, or an absolute sample position.
    pub start_time: u64,
    /// Live voice, `None` when evicted.
    pub backend: Option<BackendHandle>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            sound_id: SoundId::NONE,
            org_id: SoundId::NONE,
            volume: 0.0,
            pitch: 0,
            priority: 0,
            slot: 0,
            flags: ChannelFlags::empty(),
            source: SoundSource::None,
            near_limit: 0,
            limit_range: 0.0,
            distance_scale: 0.0,
            rolloff: RolloffInfo::UNSET,
            start_time: 0,
            backend: None,
        }
    }
}

impl Channel {
    /// Whether the channel is waiting to be restarted.
    #[must_use]
    pub const fn is_evicted(&self) -> bool {
        self.flags.contains(ChannelFlags::EVICTED)
    }

    /// Whether the channel loops.
    #[must_use]
    pub const fn is_looping(&self) -> bool {
        self.flags.contains(ChannelFlags::LOOP)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Active,
    Free,
}

#[derive(Debug)]
struct Entry {
    channel: Channel,
    generation: u32,
    membership: Membership,
    next: Option<u32>,
    prev: Option<u32>,
}

/// Arena of channel records.
#[derive(Debug, Default)]
pub struct ChannelPool {
    entries: Vec<Entry>,
    active_head: Option<u32>,
    free_head: Option<u32>,
    active_len: usize,
}

impl ChannelPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with `count` records pre-allocated on the free list.
    #[must_use]
    pub fn with_capacity(count: usize) -> Self {
        let mut pool = Self {
            entries: Vec::with_capacity(count),
            ..Self::default()
        };
        for _ in 0..count {
            let index = pool.entries.len() as u32;
            pool.entries.push(Entry {
                channel: Channel::default(),
                generation: 0,
                membership: Membership::Free,
                next: pool.free_head,
                prev: None,
            });
            pool.free_head = Some(index);
        }
        pool
    }

    /// Total records in the arena.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Records on the active list.
    #[must_use]
    pub const fn active_len(&self) -> usize {
        self.active_len
    }

    /// Records on the free list.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.entries.len() - self.active_len
    }

    fn entry(&self, id: ChannelId) -> Option<&Entry> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation && e.membership == Membership::Active)
    }

    /// Whether `id` refers to an active record.
    #[must_use]
    pub fn contains(&self, id: ChannelId) -> bool {
        self.entry(id).is_some()
    }

    /// Get an active channel.
    #[must_use]
    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.entry(id).map(|e| &e.channel)
    }

    /// Get an active channel mutably.
    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation && e.membership == Membership::Active)
            .map(|e| &mut e.channel)
    }

    /// Take a zeroed record and link it at the head of the active list.
    pub fn acquire(&mut self) -> ChannelId {
        let index = if let Some(index) = self.free_head {
            self.free_head = self.entries[index as usize].next;
            index
        } else {
            self.entries.push(Entry {
                channel: Channel::default(),
                generation: 0,
                membership: Membership::Free,
                next: None,
                prev: None,
            });
            (self.entries.len() - 1) as u32
        };

        let old_head = self.active_head;
        if let Some(head) = old_head {
            self.entries[head as usize].prev = Some(index);
        }
        let entry = &mut self.entries[index as usize];
        entry.membership = Membership::Active;
        entry.next = old_head;
        entry.prev = None;
        self.active_head = Some(index);
        self.active_len += 1;

        ChannelId {
            index,
            generation: entry.generation,
        }
    }

    /// Unlink an active record, zero it and push it onto the free list.
    ///
    /// Returns `false` for stale ids.
    pub fn release(&mut self, id: ChannelId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (prev, next) = {
            let entry = &self.entries[id.index as usize];
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.entries[p as usize].next = next,
            None => self.active_head = next,
        }
        if let Some(n) = next {
            self.entries[n as usize].prev = prev;
        }

        let entry = &mut self.entries[id.index as usize];
        entry.channel = Channel::default();
        entry.generation = entry.generation.wrapping_add(1);
        entry.membership = Membership::Free;
        entry.prev = None;
        entry.next = self.free_head;
        self.free_head = Some(id.index);
        self.active_len -= 1;
        true
    }

    /// Ids of active records from newest to oldest.
    pub fn iter_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        std::iter::successors(self.active_head, |&i| self.entries[i as usize].next).map(|i| {
            ChannelId {
                index: i,
                generation: self.entries[i as usize].generation,
            }
        })
    }

    /// Active channels from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Channel)> + '_ {
        self.iter_ids()
            .map(|id| (id, &self.entries[id.index as usize].channel))
    }

    /// Overwrite `out` with the active ids, newest first.
    pub fn collect_ids(&self, out: &mut Vec<ChannelId>) {
        out.clear();
        out.extend(self.iter_ids());
    }

    /// Check that every record is on exactly one well-formed list.
    #[must_use]
    pub fn validate(&self) -> bool {
        let mut seen = vec![false; self.entries.len()];
        let mut prev = None;
        let mut active = 0;
        let mut cursor = self.active_head;
        while let Some(i) = cursor {
            let Some(entry) = self.entries.get(i as usize) else {
                return false;
            };
            if seen[i as usize] || entry.membership != Membership::Active || entry.prev != prev {
                return false;
            }
            seen[i as usize] = true;
            active += 1;
            prev = Some(i);
            cursor = entry.next;
        }

        let mut cursor = self.free_head;
        while let Some(i) = cursor {
            let Some(entry) = self.entries.get(i as usize) else {
                return false;
            };
            if seen[i as usize] || entry.membership != Membership::Free {
                return false;
            }
            seen[i as usize] = true;
            cursor = entry.next;
        }

        active == self.active_len && seen.iter().all(|s| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_acquire_links_newest_first() {
        let mut pool = ChannelPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        let order: Vec<_> = pool.iter_ids().collect();
        assert_eq!(order, vec![c, b, a]);
        assert_eq!(pool.active_len(), 3);
        assert!(pool.validate());
    }

    #[test]
    fn test_release_middle_and_reuse() {
        let mut pool = ChannelPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.get_mut(b).unwrap().volume = 0.5;

        assert!(pool.release(b));
        assert!(!pool.release(b));
        assert_eq!(pool.iter_ids().collect::<Vec<_>>(), vec![c, a]);
        assert!(pool.get(b).is_none());

        let d = pool.acquire();
        assert_eq!(d.index(), b.index());
        assert_ne!(d.generation(), b.generation());
        assert_eq!(pool.get(d).unwrap().volume, 0.0);
        assert_eq!(pool.capacity(), 3);
        assert!(pool.validate());
    }

    #[test]
    fn test_with_capacity_preallocates() {
        let mut pool = ChannelPool::with_capacity(4);
        assert_eq!(pool.free_len(), 4);
        assert!(pool.validate());
        pool.acquire();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.free_len(), 3);
    }

    #[test]
    fn test_request_mask_excludes_state_flags() {
        assert!(!ChannelFlags::REQUEST_MASK.contains(ChannelFlags::EVICTED));
        assert!(ChannelFlags::REQUEST_MASK.contains(ChannelFlags::LOOP));
    }

    proptest! {
        #[test]
        fn prop_single_membership(ops in proptest::collection::vec((any::<bool>(), 0usize..16), 1..200)) {
            let mut pool = ChannelPool::with_capacity(3);
            let mut live: Vec<ChannelId> = Vec::new();
            for (acquire, pick) in ops {
                if acquire || live.is_empty() {
                    live.push(pool.acquire());
                } else {
                    let id = live.swap_remove(pick % live.len());
                    prop_assert!(pool.release(id));
                }
                prop_assert!(pool.validate());
                prop_assert_eq!(pool.active_len(), live.len());
                prop_assert_eq!(pool.active_len() + pool.free_len(), pool.capacity());
            }
        }
    }
}
