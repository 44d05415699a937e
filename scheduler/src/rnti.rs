//! C-RNTI Allocation
//!
//! Hands out unique C-RNTIs for the UEs of a DU.

use std::collections::BTreeSet;

use common::Rnti;
use tracing::{debug, warn};

/// C-RNTI allocator with an explicit starting value
#[derive(Debug)]
pub struct RntiManager {
    next: u16,
    in_use: BTreeSet<Rnti>,
    max_ues: usize,
}

impl RntiManager {
    /// Default first C-RNTI handed out
    pub const DEFAULT_START: Rnti = Rnti(0x4601);

    pub fn new(start: Rnti, max_ues: usize) -> Self {
        let start = if start.is_crnti() { start } else { Rnti::MIN_CRNTI };
        Self {
            next: start.value(),
            in_use: BTreeSet::new(),
            max_ues,
        }
    }

    /// Next free C-RNTI, skipping values still in use
    pub fn allocate(&mut self) -> Option<Rnti> {
        if self.in_use.len() >= self.max_ues {
            warn!("RNTI allocation failed: {} UEs already active", self.in_use.len());
            return None;
        }
        let range = (Rnti::MAX_CRNTI.value() - Rnti::MIN_CRNTI.value() + 1) as usize;
        for _ in 0..range {
            let candidate = Rnti(self.next);
            self.next = if self.next >= Rnti::MAX_CRNTI.value() {
                Rnti::MIN_CRNTI.value()
            } else {
                self.next + 1
            };
            if self.in_use.insert(candidate) {
                debug!("Allocated rnti={}", candidate);
                return Some(candidate);
            }
        }
        None
    }

    pub fn release(&mut self, rnti: Rnti) -> bool {
        self.in_use.remove(&rnti)
    }

    pub fn contains(&self, rnti: Rnti) -> bool {
        self.in_use.contains(&rnti)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }
}

impl Default for RntiManager {
    fn default() -> Self {
        Self::new(Self::DEFAULT_START, 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut mgr = RntiManager::default();
        assert_eq!(mgr.allocate(), Some(Rnti(0x4601)));
        assert_eq!(mgr.allocate(), Some(Rnti(0x4602)));
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn test_wrap_skips_rntis_in_use() {
        let mut mgr = RntiManager::new(Rnti::MAX_CRNTI, 16);
        assert_eq!(mgr.allocate(), Some(Rnti::MAX_CRNTI));
        assert_eq!(mgr.allocate(), Some(Rnti(0x0001)));
        // Values already in use are skipped
        let mut mgr2 = RntiManager::new(Rnti(0x0001), 16);
        mgr2.in_use.insert(Rnti(0x0002));
        assert_eq!(mgr2.allocate(), Some(Rnti(0x0001)));
        assert_eq!(mgr2.allocate(), Some(Rnti(0x0003)));
    }

    #[test]
    fn test_max_ues() {
        let mut mgr = RntiManager::new(Rnti(0x100), 2);
        let a = mgr.allocate().unwrap();
        mgr.allocate().unwrap();
        assert_eq!(mgr.allocate(), None);
        assert!(mgr.release(a));
        assert!(!mgr.contains(a));
        assert!(mgr.allocate().is_some());
    }

    #[test]
    fn test_invalid_start_clamped() {
        let mut mgr = RntiManager::new(Rnti(0), 4);
        assert_eq!(mgr.allocate(), Some(Rnti::MIN_CRNTI));
    }
}
