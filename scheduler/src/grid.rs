//! Cell Resource Grid
//!
//! Ring of per-slot allocation entries of one cell. Each entry holds the
//! scheduling result being built for its slot, the PRB occupancy of both
//! link directions and the PUCCH bookkeeping.

use common::{CellIndex, PrbInterval, SlotPoint};
use interfaces::SlotResult;
use thiserror::Error;
use tracing::trace;

use crate::pucch::PucchSlotState;

/// Number of slots the grid can hold ahead of the current slot
pub const RING_SIZE: usize = 32;

/// Grid access errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("No slot indication received yet")]
    NotStarted,

    #[error("Slot {slot} outside of the scheduling window starting at {current}")]
    SlotOutOfWindow { slot: SlotPoint, current: SlotPoint },

    #[error("Slot indication {current} is not after {last}")]
    SlotOutOfOrder { last: SlotPoint, current: SlotPoint },
}

/// PRB occupancy of one link direction
#[derive(Debug, Clone)]
struct PrbBitmap {
    used: Vec<bool>,
}

impl PrbBitmap {
    fn new(nof_prbs: u16) -> Self {
        Self {
            used: vec![false; nof_prbs as usize],
        }
    }

    fn clear(&mut self, reserved: &[PrbInterval]) {
        self.used.iter_mut().for_each(|b| *b = false);
        for interval in reserved {
            self.mark(*interval);
        }
    }

    fn set(&mut self, interval: PrbInterval, used: bool) {
        let stop = (interval.stop as usize).min(self.used.len());
        let start = (interval.start as usize).min(stop);
        self.used[start..stop].iter_mut().for_each(|b| *b = used);
    }

    fn mark(&mut self, interval: PrbInterval) {
        self.set(interval, true);
    }

    /// First fit of `nof_prbs` contiguous free PRBs
    fn find(&self, nof_prbs: u16) -> Option<PrbInterval> {
        let nof = nof_prbs as usize;
        if nof == 0 || nof > self.used.len() {
            return None;
        }
        let start = (0..=self.used.len() - nof)
            .find(|&s| self.used[s..s + nof].iter().all(|b| !*b))?;
        Some(PrbInterval::new(start as u16, (start + nof) as u16))
    }

    fn alloc(&mut self, nof_prbs: u16) -> Option<PrbInterval> {
        let interval = self.find(nof_prbs)?;
        self.mark(interval);
        Some(interval)
    }
}

/// Allocation state of one slot
#[derive(Debug, Clone)]
pub struct SlotAllocation {
    /// Scheduling result under construction
    pub result: SlotResult,
    /// PUCCH demand and PDUs of the slot
    pub pucch: PucchSlotState,
    dl_prbs: PrbBitmap,
    ul_prbs: PrbBitmap,
}

impl SlotAllocation {
    fn new(slot: SlotPoint, cell_index: CellIndex, nof_dl_prbs: u16, nof_ul_prbs: u16) -> Self {
        let mut pucch = PucchSlotState::new();
        pucch.reset(slot);
        Self {
            result: SlotResult::new(slot, cell_index),
            pucch,
            dl_prbs: PrbBitmap::new(nof_dl_prbs),
            ul_prbs: PrbBitmap::new(nof_ul_prbs),
        }
    }

    fn reset(&mut self, slot: SlotPoint, reserved_ul: &[PrbInterval]) {
        self.result = SlotResult::new(slot, self.result.cell_index);
        self.pucch.reset(slot);
        self.dl_prbs.clear(&[]);
        self.ul_prbs.clear(reserved_ul);
    }

    pub fn slot(&self) -> SlotPoint {
        self.result.slot
    }

    /// Reserve contiguous PDSCH PRBs
    pub fn alloc_dl_prbs(&mut self, nof_prbs: u16) -> Option<PrbInterval> {
        self.dl_prbs.alloc(nof_prbs)
    }

    /// Reserve contiguous PUSCH PRBs
    pub fn alloc_ul_prbs(&mut self, nof_prbs: u16) -> Option<PrbInterval> {
        self.ul_prbs.alloc(nof_prbs)
    }

    /// Return PDSCH PRBs obtained from [`Self::alloc_dl_prbs`]
    pub fn free_dl_prbs(&mut self, prbs: PrbInterval) {
        self.dl_prbs.set(prbs, false);
    }

    /// Return PUSCH PRBs obtained from [`Self::alloc_ul_prbs`]
    pub fn free_ul_prbs(&mut self, prbs: PrbInterval) {
        self.ul_prbs.set(prbs, false);
    }

    /// Copy the PUCCH PDUs into the result
    pub fn finalize(&mut self) -> &SlotResult {
        self.result.pucchs = self.pucch.pdus().cloned().collect();
        &self.result
    }
}

/// Slot-indexed allocation ring of one cell
#[derive(Debug)]
pub struct CellResourceAllocator {
    cell_index: CellIndex,
    ring: Vec<SlotAllocation>,
    current: Option<SlotPoint>,
    /// UL PRBs kept out of PUSCH allocation in every slot
    reserved_ul: Vec<PrbInterval>,
}

impl CellResourceAllocator {
    pub fn new(cell_index: CellIndex, nof_dl_prbs: u16, nof_ul_prbs: u16) -> Self {
        let origin = SlotPoint::new(0, 0);
        Self {
            cell_index,
            ring: (0..RING_SIZE)
                .map(|i| {
                    SlotAllocation::new(origin + i as u32, cell_index, nof_dl_prbs, nof_ul_prbs)
                })
                .collect(),
            current: None,
            reserved_ul: Vec::new(),
        }
    }

    /// Exclude `prbs` from PUSCH allocation, effective for the slots reset from now on
    pub fn reserve_ul_prbs(&mut self, prbs: PrbInterval) {
        self.reserved_ul.push(prbs);
    }

    pub fn cell_index(&self) -> CellIndex {
        self.cell_index
    }

    /// Current slot
    pub fn slot(&self) -> Option<SlotPoint> {
        self.current
    }

    fn index(slot: SlotPoint) -> usize {
        slot.to_uint() as usize % RING_SIZE
    }

    /// Advance the grid to `slot`, recycling the entries of the slots left behind
    pub fn slot_indication(&mut self, slot: SlotPoint) -> Result<(), GridError> {
        match self.current {
            None => {
                for i in 0..RING_SIZE as u32 {
                    let s = slot + i;
                    self.ring[Self::index(s)].reset(s, &self.reserved_ul);
                }
            }
            Some(last) => {
                if slot <= last {
                    return Err(GridError::SlotOutOfOrder { last, current: slot });
                }
                let gap = (slot - last) as u32;
                if gap as usize >= RING_SIZE {
                    for i in 0..RING_SIZE as u32 {
                        let s = slot + i;
                        self.ring[Self::index(s)].reset(s, &self.reserved_ul);
                    }
                } else {
                    // Entries of the skipped slots become the furthest future slots
                    for i in 0..gap {
                        let old = last + i;
                        let fresh = old + RING_SIZE as u32;
                        self.ring[Self::index(old)].reset(fresh, &self.reserved_ul);
                    }
                }
            }
        }
        trace!("cell={} grid slot indication {}", self.cell_index, slot);
        self.current = Some(slot);
        Ok(())
    }

    fn check_window(&self, slot: SlotPoint) -> Result<usize, GridError> {
        let current = self.current.ok_or(GridError::NotStarted)?;
        let offset = slot - current;
        if offset < 0 || offset as usize >= RING_SIZE {
            return Err(GridError::SlotOutOfWindow { slot, current });
        }
        Ok(Self::index(slot))
    }

    pub fn get(&self, slot: SlotPoint) -> Result<&SlotAllocation, GridError> {
        let idx = self.check_window(slot)?;
        Ok(&self.ring[idx])
    }

    pub fn get_mut(&mut self, slot: SlotPoint) -> Result<&mut SlotAllocation, GridError> {
        let idx = self.check_window(slot)?;
        Ok(&mut self.ring[idx])
    }
}
