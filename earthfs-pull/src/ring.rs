//! Bounded reservation ring between reader and writer threads.
//!
//! Readers reserve two consecutive slots while holding the connection lock,
//! then fill them after fetching; the writer consumes strictly in `cur`
//! order. A reserved slot filled with `None` is a bubble: a URI that could
//! not be ingested but whose place in the stream order is kept. With
//! preemptive threads the `cur`/`count`/`filled` fields need their own
//! mutex; the two condvars stand in for the blocked-reader and
//! blocked-writer wake handles.

use earthfs_core::Submission;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

pub const QUEUE_SIZE: usize = 32;

struct RingState {
    slots: Vec<Option<Submission>>,
    filled: Vec<bool>,
    cur: usize,
    count: usize,
}

pub struct Ring {
    state: Mutex<RingState>,
    /// Readers park here when fewer than two slots are free.
    space: Condvar,
    /// The writer parks here when the head slot is reserved but not filled.
    ready: Condvar,
}

/// One writer pass over the ring.
pub struct Drained {
    pub batch: Vec<Submission>,
    /// Slots consumed, bubbles included.
    pub advanced: usize,
    pub bubbles: usize,
}

impl Ring {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RingState {
                slots: (0..QUEUE_SIZE).map(|_| None).collect(),
                filled: vec![false; QUEUE_SIZE],
                cur: 0,
                count: 0,
            }),
            space: Condvar::new(),
            ready: Condvar::new(),
        }
    }

    /// Reserve two consecutive slots at the tail, blocking while the ring is
    /// too full. Returns the first slot index, or `None` on shutdown.
    pub fn reserve_pair(&self, stop: &AtomicBool) -> Option<usize> {
        let mut state = self.state.lock().unwrap();
        while state.count + 2 > QUEUE_SIZE {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            state = self.space.wait(state).unwrap();
        }
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        let pos = (state.cur + state.count) % QUEUE_SIZE;
        state.count += 2;
        Some(pos)
    }

    /// Fill a reserved pair. `None` entries are bubbles.
    pub fn fill(&self, pos: usize, first: Option<Submission>, second: Option<Submission>) {
        let mut state = self.state.lock().unwrap();
        let a = pos % QUEUE_SIZE;
        let b = (pos + 1) % QUEUE_SIZE;
        state.slots[a] = first;
        state.slots[b] = second;
        state.filled[a] = true;
        state.filled[b] = true;
        self.ready.notify_one();
    }

    /// Consume filled slots in order: block for the head slot, then keep
    /// going while reserved slots remain and the batch holds fewer than
    /// `max` submissions. Returns `None` on shutdown.
    pub fn drain(&self, stop: &AtomicBool, max: usize) -> Option<Drained> {
        let mut state = self.state.lock().unwrap();
        let mut batch = Vec::new();
        let mut advanced = 0;
        let mut bubbles = 0;
        while batch.is_empty() || (batch.len() < max && state.count > 0) {
            while !state.filled[state.cur] {
                if stop.load(Ordering::Relaxed) {
                    return None;
                }
                state = self.ready.wait(state).unwrap();
                if stop.load(Ordering::Relaxed) {
                    return None;
                }
            }
            let pos = state.cur;
            match state.slots[pos].take() {
                Some(sub) => batch.push(sub),
                None => bubbles += 1,
            }
            state.filled[pos] = false;
            state.cur = (pos + 1) % QUEUE_SIZE;
            state.count -= 1;
            advanced += 1;
            self.space.notify_all();
        }
        Some(Drained { batch, advanced, bubbles })
    }

    /// Wake every parked thread so a shutdown request is observed.
    pub fn wake_all(&self) {
        self.space.notify_all();
        self.ready.notify_all();
    }

    /// Filled-or-reserved slot count.
    pub fn depth(&self) -> usize {
        self.state.lock().unwrap().count
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}
