//! Per-unit frame queues behind one shared lock.
//!
//! ```text
//!  completion context                       polling task
//!  ──────────────────                       ────────────
//!  push(key, frame) ──┐                ┌── pop(key)
//!                     ▼                ▼
//!             ┌──────────────────────────────┐
//!             │ FrameStore (one Mutex)       │
//!             │  slot 0: gen 3 [f f f . . ]  │
//!             │  slot 1: ----                │
//!             │  slot 2: gen 7 [f . . . . ]  │
//!             └──────────────────────────────┘
//! ```
//!
//! Each unit's ring is tagged with a generation. Pushes carrying a stale
//! [`UnitKey`] fail with [`FrameStoreError::UnitGone`], which is how late
//! completions for freed units become no-ops.

use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Upper bound on bytes kept per frame
pub const MAX_FRAME_LEN: usize = 32;

/// One raw report captured from a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Wrapping per-unit counter; gaps mean dropped frames
    pub sequence: u8,
    /// Byte count the transfer reported, truncated to 8 bits
    pub length: u8,
    pub data: Vec<u8>,
}

impl Frame {
    /// Copy a completed transfer's bytes, clamped to `payload` and
    /// [`MAX_FRAME_LEN`].
    pub fn capture(sequence: u8, received: &[u8], payload: usize) -> Self {
        let keep = received.len().min(payload).min(MAX_FRAME_LEN);
        Self {
            sequence,
            length: (received.len() & 0xFF) as u8,
            data: received[..keep].to_vec(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Ring full, frame discarded
    Dropped,
}

/// Bounded FIFO that drops new frames when full.
#[derive(Debug)]
pub struct RingBuffer {
    frames: Vec<Option<Frame>>,
    read: usize,
    write: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: vec![None; capacity],
            read: 0,
            write: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, frame: Frame) -> PushOutcome {
        if self.len == self.capacity() {
            return PushOutcome::Dropped;
        }
        self.frames[self.write] = Some(frame);
        self.write = (self.write + 1) % self.capacity();
        self.len += 1;
        PushOutcome::Queued
    }

    pub fn pop(&mut self) -> Option<Frame> {
        if self.len == 0 {
            return None;
        }
        let frame = self.frames[self.read].take();
        self.read = (self.read + 1) % self.capacity();
        self.len -= 1;
        frame
    }
}

/// Identifies one unit's ring: the registry slot plus the generation it was
/// installed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub slot: usize,
    pub generation: u64,
}

// Frame store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameStoreError {
    #[error("Frame store lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Unit in slot {} (generation {}) is gone", .0.slot, .0.generation)]
    UnitGone(UnitKey),

    #[error("Slot {0} out of range")]
    SlotOutOfRange(usize),
}

struct UnitRing {
    generation: u64,
    ring: RingBuffer,
}

struct StoreState {
    rings: Vec<Option<UnitRing>>,
    next_generation: u64,
}

/// All units' rings behind a single lock.
pub struct FrameStore {
    state: Mutex<StoreState>,
    capacity: usize,
}

impl FrameStore {
    pub fn new(slots: usize, capacity: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                rings: (0..slots).map(|_| None).collect(),
                next_generation: 1,
            }),
            capacity,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, FrameStoreError> {
        self.state
            .lock()
            .map_err(|e| FrameStoreError::LockPoisoned(e.to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Give `slot` a fresh empty ring, replacing whatever was there.
    pub fn install(&self, slot: usize) -> Result<UnitKey, FrameStoreError> {
        let mut state = self.lock()?;
        let generation = state.next_generation;
        let entry = state
            .rings
            .get_mut(slot)
            .ok_or(FrameStoreError::SlotOutOfRange(slot))?;
        *entry = Some(UnitRing {
            generation,
            ring: RingBuffer::new(self.capacity),
        });
        state.next_generation += 1;
        debug!("Ring installed for slot {} (generation {})", slot, generation);
        Ok(UnitKey { slot, generation })
    }

    /// Drop the ring for `key`. Returns false if it was already gone.
    pub fn remove(&self, key: UnitKey) -> Result<bool, FrameStoreError> {
        let mut state = self.lock()?;
        let entry = state
            .rings
            .get_mut(key.slot)
            .ok_or(FrameStoreError::SlotOutOfRange(key.slot))?;
        let live = matches!(entry, Some(unit) if unit.generation == key.generation);
        if live {
            *entry = None;
        }
        Ok(live)
    }

    fn ring_mut(state: &mut StoreState, key: UnitKey) -> Result<&mut RingBuffer, FrameStoreError> {
        match state.rings.get_mut(key.slot) {
            Some(Some(unit)) if unit.generation == key.generation => Ok(&mut unit.ring),
            Some(_) => Err(FrameStoreError::UnitGone(key)),
            None => Err(FrameStoreError::SlotOutOfRange(key.slot)),
        }
    }

    pub fn push(&self, key: UnitKey, frame: Frame) -> Result<PushOutcome, FrameStoreError> {
        let mut state = self.lock()?;
        let ring = Self::ring_mut(&mut state, key)?;
        let sequence = frame.sequence;
        let outcome = ring.push(frame);
        if outcome == PushOutcome::Dropped {
            trace!("Ring for slot {} full, frame {} dropped", key.slot, sequence);
        }
        Ok(outcome)
    }

    pub fn pop(&self, key: UnitKey) -> Result<Option<Frame>, FrameStoreError> {
        let mut state = self.lock()?;
        Ok(Self::ring_mut(&mut state, key)?.pop())
    }

    pub fn queued(&self, key: UnitKey) -> Result<usize, FrameStoreError> {
        let mut state = self.lock()?;
        Ok(Self::ring_mut(&mut state, key)?.len())
    }
}
