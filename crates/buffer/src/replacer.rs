//! Victim-selection policies for the buffer pool.

use common::FrameId;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Tracks which frames may be evicted and picks victims.
///
/// Frames enter the eligible set via `unpin` (pin count reached zero) and
/// leave it via `pin` or by being chosen as a victim.
pub trait Replacer: Send {
    /// Pick an eligible frame and remove it from the eligible set.
    fn victim(&mut self) -> Option<FrameId>;

    /// Mark a frame ineligible for eviction.
    fn pin(&mut self, frame_id: FrameId);

    /// Mark a frame eligible for eviction.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of eligible frames.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Evicts the frame unpinned longest ago.
///
/// Backed by `lru::LruCache` (hash map over a doubly-linked list), so
/// victim, pin and unpin are all O(1).
pub struct LruReplacer {
    frames: LruCache<FrameId, ()>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> LruReplacer {
        let cap = NonZeroUsize::new(pool_size.max(1)).unwrap();
        LruReplacer {
            frames: LruCache::new(cap),
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_lru().map(|(frame_id, ())| frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.frames.pop(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        // Re-unpinning an already eligible frame refreshes its position.
        self.frames.put(frame_id, ());
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Clone, Copy, Default)]
struct ClockSlot {
    eligible: bool,
    referenced: bool,
}

/// Second-chance eviction: a circular sweep that clears reference bits and
/// takes the first eligible frame whose bit is already clear.
pub struct ClockReplacer {
    slots: Vec<ClockSlot>,
    hand: usize,
    eligible: usize,
}

impl ClockReplacer {
    pub fn new(pool_size: usize) -> ClockReplacer {
        ClockReplacer {
            slots: vec![ClockSlot::default(); pool_size.max(1)],
            hand: 0,
            eligible: 0,
        }
    }
}

impl Replacer for ClockReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        if self.eligible == 0 {
            return None;
        }
        // At least one frame is eligible, so the sweep visits each at most
        // twice: once to clear its bit, once to take it.
        loop {
            let idx = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();
            let slot = &mut self.slots[idx];
            if !slot.eligible {
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }
            slot.eligible = false;
            self.eligible -= 1;
            return Some(idx);
        }
    }

    fn pin(&mut self, frame_id: FrameId) {
        let slot = &mut self.slots[frame_id];
        if slot.eligible {
            slot.eligible = false;
            slot.referenced = false;
            self.eligible -= 1;
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        let slot = &mut self.slots[frame_id];
        if !slot.eligible {
            slot.eligible = true;
            self.eligible += 1;
        }
        slot.referenced = true;
    }

    fn len(&self) -> usize {
        self.eligible
    }
}
