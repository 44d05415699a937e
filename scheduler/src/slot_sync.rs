//! Slot Synchronization Barrier
//!
//! Rendezvous point for the cell workers of a cell group. All workers block
//! until the last one reaches the slot boundary; that worker runs the
//! completion callback before everybody is released.

use common::SlotPoint;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug, Default)]
struct BarrierState {
    /// Slot of the phase in progress
    slot: Option<SlotPoint>,
    /// Workers still expected in the current phase
    remaining: usize,
    /// Incremented every time a phase completes
    generation: u64,
}

/// Reusable multi-worker slot barrier
#[derive(Debug, Default)]
pub struct SlotSyncPoint {
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl SlotSyncPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `nof_workers` workers have called `wait` for `slot`.
    ///
    /// The last worker to arrive runs `completion` and then wakes the others.
    /// Returns `true` for the worker that ran the callback.
    ///
    /// Exactly `nof_workers` distinct workers must call this for every slot,
    /// and none of them may enter the next slot before the phase completes.
    pub fn wait<F: FnOnce()>(&self, slot: SlotPoint, nof_workers: usize, completion: F) -> bool {
        debug_assert!(nof_workers > 0, "barrier needs at least one worker");
        let mut state = self.state.lock();

        // 1. First arrival opens a new phase
        if state.remaining == 0 {
            state.slot = Some(slot);
            state.remaining = nof_workers.max(1);
        } else {
            debug_assert_eq!(state.slot, Some(slot), "worker joined barrier with a different slot");
        }

        // 2. Count this worker in
        state.remaining -= 1;
        if state.remaining == 0 {
            trace!("Slot sync complete for slot {}", slot);
            completion();
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return true;
        }

        // 3. Wait for the phase to complete
        let generation = state.generation;
        while state.generation == generation {
            self.cvar.wait(&mut state);
        }
        false
    }

    /// Number of phases completed so far
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}
