//! HARQ Entity
//!
//! Fixed-size pools of DL and UL HARQ processes owned by one UE. Feedback is
//! routed to the right process here; stale feedback is detected and dropped.

use common::{Rnti, SlotPoint};
use interfaces::{HarqDirection, MAX_NOF_HARQS};
use tracing::{debug, warn};

use super::process::{
    DlHarqProcess, HarqDci, HarqGrant, HarqProcess, HarqTransition, UlHarqProcess,
};
use super::HarqError;

/// HARQ process that hit the feedback timeout in `new_slot`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredHarq {
    pub harq_id: u8,
    pub direction: HarqDirection,
    /// Outcome of treating the missing feedback as a NACK
    pub transition: HarqTransition,
}

/// HARQ processes of one UE
#[derive(Debug)]
pub struct HarqEntity {
    rnti: Rnti,
    dl_harqs: Vec<DlHarqProcess>,
    ul_harqs: Vec<UlHarqProcess>,
    /// Slots past the expected feedback slot before a process is NACKed
    ack_timeout_slots: u32,
    last_slot: Option<SlotPoint>,
}

impl HarqEntity {
    /// Create an entity with `nof_dl_harqs` and `nof_ul_harqs` processes (1 to 16 each)
    pub fn new(
        rnti: Rnti,
        nof_dl_harqs: usize,
        nof_ul_harqs: usize,
        ack_timeout_slots: u32,
    ) -> Result<Self, HarqError> {
        for nof in [nof_dl_harqs, nof_ul_harqs] {
            if nof == 0 || nof > MAX_NOF_HARQS as usize {
                return Err(HarqError::InvalidPoolSize(nof));
            }
        }
        Ok(Self {
            rnti,
            dl_harqs: (0..nof_dl_harqs as u8).map(DlHarqProcess::new).collect(),
            ul_harqs: (0..nof_ul_harqs as u8).map(UlHarqProcess::new).collect(),
            ack_timeout_slots,
            last_slot: None,
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn nof_dl_harqs(&self) -> usize {
        self.dl_harqs.len()
    }

    pub fn nof_ul_harqs(&self) -> usize {
        self.ul_harqs.len()
    }

    /// Last slot passed to `new_slot`
    pub fn last_slot(&self) -> Option<SlotPoint> {
        self.last_slot
    }

    pub fn dl_harq(&self, harq_id: u8) -> Option<&DlHarqProcess> {
        self.dl_harqs.get(harq_id as usize)
    }

    pub fn ul_harq(&self, harq_id: u8) -> Option<&UlHarqProcess> {
        self.ul_harqs.get(harq_id as usize)
    }

    pub fn dl_harqs(&self) -> impl Iterator<Item = &DlHarqProcess> {
        self.dl_harqs.iter()
    }

    pub fn ul_harqs(&self) -> impl Iterator<Item = &UlHarqProcess> {
        self.ul_harqs.iter()
    }

    /// First DL process free for a new transmission
    pub fn find_empty_dl(&self) -> Option<&DlHarqProcess> {
        self.dl_harqs.iter().find(|h| h.is_empty())
    }

    /// First UL process free for a new transmission
    pub fn find_empty_ul(&self) -> Option<&UlHarqProcess> {
        self.ul_harqs.iter().find(|h| h.is_empty())
    }

    /// First DL process with a pending retransmission
    pub fn find_pending_dl_retx(&self) -> Option<&DlHarqProcess> {
        self.dl_harqs.iter().find(|h| h.has_pending_retx())
    }

    /// First UL process with a pending retransmission
    pub fn find_pending_ul_retx(&self) -> Option<&UlHarqProcess> {
        self.ul_harqs.iter().find(|h| h.has_pending_retx())
    }

    /// Start a new DL transmission on process `harq_id`
    pub fn dl_new_tx(
        &mut self,
        harq_id: u8,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
        grant: HarqGrant,
        max_nof_retxs: u8,
    ) -> Result<HarqDci, HarqError> {
        self.dl_process_mut(harq_id)?.new_tx(slot_tx, slot_ack, grant, max_nof_retxs)
    }

    /// Retransmit the TB pending on DL process `harq_id`
    pub fn dl_new_retx(
        &mut self,
        harq_id: u8,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
        grant: HarqGrant,
    ) -> Result<HarqDci, HarqError> {
        self.dl_process_mut(harq_id)?.new_retx(slot_tx, slot_ack, grant)
    }

    /// Start a new UL transmission on process `harq_id`
    pub fn ul_new_tx(
        &mut self,
        harq_id: u8,
        slot_pusch: SlotPoint,
        grant: HarqGrant,
        max_nof_retxs: u8,
    ) -> Result<HarqDci, HarqError> {
        self.ul_process_mut(harq_id)?.new_tx(slot_pusch, grant, max_nof_retxs)
    }

    pub fn ul_new_retx(
        &mut self,
        harq_id: u8,
        slot_pusch: SlotPoint,
        grant: HarqGrant,
    ) -> Result<HarqDci, HarqError> {
        self.ul_process_mut(harq_id)?.new_retx(slot_pusch, grant)
    }

    fn dl_process_mut(&mut self, harq_id: u8) -> Result<&mut DlHarqProcess, HarqError> {
        self.dl_harqs.get_mut(harq_id as usize).ok_or(HarqError::InvalidHarqId(harq_id))
    }

    fn ul_process_mut(&mut self, harq_id: u8) -> Result<&mut UlHarqProcess, HarqError> {
        self.ul_harqs.get_mut(harq_id as usize).ok_or(HarqError::InvalidHarqId(harq_id))
    }

    /// Apply a HARQ-ACK bit to a DL process
    pub fn dl_ack_info(&mut self, harq_id: u8, ack: bool) -> Result<HarqTransition, HarqError> {
        let rnti = self.rnti;
        let h = self.dl_harqs.get_mut(harq_id as usize).ok_or_else(|| {
            debug!("rnti={} Discarding HARQ-ACK for invalid DL HARQ id {}", rnti, harq_id);
            HarqError::InvalidHarqId(harq_id)
        })?;
        if !h.is_waiting_feedback() {
            debug!("rnti={} Discarding stale HARQ-ACK for DL HARQ {}", rnti, harq_id);
            return Err(HarqError::StaleFeedback { harq_id });
        }
        h.ack_info(ack)
    }

    /// Apply a HARQ-ACK bit received in `slot`.
    ///
    /// The bit is dropped when the process expects feedback in a different slot.
    pub fn dl_ack_info_at(
        &mut self,
        slot: SlotPoint,
        harq_id: u8,
        ack: bool,
    ) -> Result<HarqTransition, HarqError> {
        let expected = self.dl_harq(harq_id).and_then(|h| h.slot_ack());
        if expected.is_some() && expected != Some(slot) {
            debug!(
                "rnti={} Discarding HARQ-ACK for DL HARQ {} in slot {}, expected in {:?}",
                self.rnti, harq_id, slot, expected
            );
            return Err(HarqError::StaleFeedback { harq_id });
        }
        self.dl_ack_info(harq_id, ack)
    }

    /// Apply a PUSCH CRC result to a UL process
    pub fn ul_crc_info(&mut self, harq_id: u8, crc_ok: bool) -> Result<HarqTransition, HarqError> {
        let rnti = self.rnti;
        let h = self.ul_harqs.get_mut(harq_id as usize).ok_or_else(|| {
            debug!("rnti={} Discarding CRC for invalid UL HARQ id {}", rnti, harq_id);
            HarqError::InvalidHarqId(harq_id)
        })?;
        if !h.is_waiting_feedback() {
            debug!("rnti={} Discarding stale CRC for UL HARQ {}", rnti, harq_id);
            return Err(HarqError::StaleFeedback { harq_id });
        }
        h.crc_info(crc_ok)
    }

    /// Apply a CRC result for a PUSCH received in `slot`
    pub fn ul_crc_info_at(
        &mut self,
        slot: SlotPoint,
        harq_id: u8,
        crc_ok: bool,
    ) -> Result<HarqTransition, HarqError> {
        let expected = self.ul_harq(harq_id).and_then(|h| h.slot_ack());
        if expected.is_some() && expected != Some(slot) {
            debug!(
                "rnti={} Discarding CRC for UL HARQ {} in slot {}, expected in {:?}",
                self.rnti, harq_id, slot, expected
            );
            return Err(HarqError::StaleFeedback { harq_id });
        }
        self.ul_crc_info(harq_id, crc_ok)
    }

    /// Advance to `slot`, NACKing every process whose feedback is overdue.
    ///
    /// Must be called once per slot with increasing slots.
    pub fn new_slot(&mut self, slot: SlotPoint) -> Result<Vec<ExpiredHarq>, HarqError> {
        if let Some(last) = self.last_slot {
            if slot <= last {
                warn!("rnti={} HARQ slot indication {} not after {}", self.rnti, slot, last);
                return Err(HarqError::SlotOutOfOrder { last, current: slot });
            }
        }
        self.last_slot = Some(slot);

        let timeout = self.ack_timeout_slots as i32;
        let mut expired = Vec::new();

        for h in self.dl_harqs.iter_mut() {
            let overdue =
                h.is_waiting_feedback() && h.slot_ack().map_or(false, |ack| slot - ack > timeout);
            if overdue {
                let transition = h.ack_info(false)?;
                debug!(
                    "rnti={} DL HARQ {} feedback timeout at slot {}: {:?}",
                    self.rnti,
                    h.id(),
                    slot,
                    transition
                );
                expired.push(ExpiredHarq {
                    harq_id: h.id(),
                    direction: HarqDirection::Downlink,
                    transition,
                });
            }
        }

        for h in self.ul_harqs.iter_mut() {
            let overdue =
                h.is_waiting_feedback() && h.slot_ack().map_or(false, |ack| slot - ack > timeout);
            if overdue {
                let transition = h.crc_info(false)?;
                debug!(
                    "rnti={} UL HARQ {} CRC timeout at slot {}: {:?}",
                    self.rnti,
                    h.id(),
                    slot,
                    transition
                );
                expired.push(ExpiredHarq {
                    harq_id: h.id(),
                    direction: HarqDirection::Uplink,
                    transition,
                });
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OfdmSymbolRange, PrbInterval};

    fn grant() -> HarqGrant {
        HarqGrant {
            mcs: 17,
            tbs_bytes: 3152,
            prbs: PrbInterval::new(0, 20),
            symbols: OfdmSymbolRange::new(2, 14),
        }
    }

    fn entity(nof: usize) -> HarqEntity {
        HarqEntity::new(Rnti(0x4601), nof, nof, 4).unwrap()
    }

    #[test]
    fn test_pool_size_bounds() {
        assert!(matches!(HarqEntity::new(Rnti(1), 0, 8, 4), Err(HarqError::InvalidPoolSize(0))));
        assert!(matches!(HarqEntity::new(Rnti(1), 8, 17, 4), Err(HarqError::InvalidPoolSize(17))));
        assert_eq!(HarqEntity::new(Rnti(1), 16, 1, 4).unwrap().nof_dl_harqs(), 16);
    }

    #[test]
    fn test_find_empty_exhausts_pool() {
        let mut ent = entity(2);
        let sl = SlotPoint::new(0, 0);
        for expected_id in 0..2 {
            let id = ent.find_empty_dl().unwrap().id();
            assert_eq!(id, expected_id);
            ent.dl_new_tx(id, sl, sl + 4, grant(), 4).unwrap();
        }
        assert!(ent.find_empty_dl().is_none());
        assert!(ent.find_empty_ul().is_some());
    }

    #[test]
    fn test_nack_makes_retx_findable() {
        let mut ent = entity(4);
        let sl = SlotPoint::new(0, 0);
        ent.dl_new_tx(2, sl, sl + 4, grant(), 4).unwrap();
        assert!(ent.find_pending_dl_retx().is_none());
        assert_eq!(ent.dl_ack_info(2, false), Ok(HarqTransition::RetxPending));
        assert_eq!(ent.find_pending_dl_retx().map(|h| h.id()), Some(2));
    }

    #[test]
    fn test_stale_and_invalid_feedback() {
        let mut ent = entity(4);
        assert_eq!(ent.dl_ack_info(9, true), Err(HarqError::InvalidHarqId(9)));
        assert_eq!(ent.dl_ack_info(0, true), Err(HarqError::StaleFeedback { harq_id: 0 }));
        assert_eq!(ent.ul_crc_info(1, true), Err(HarqError::StaleFeedback { harq_id: 1 }));
    }

    #[test]
    fn test_slot_checked_feedback() {
        let mut ent = entity(4);
        let sl = SlotPoint::new(0, 10);
        ent.dl_new_tx(0, sl, sl + 4, grant(), 4).unwrap();
        assert_eq!(
            ent.dl_ack_info_at(sl + 3, 0, true),
            Err(HarqError::StaleFeedback { harq_id: 0 })
        );
        assert!(ent.dl_harq(0).unwrap().is_waiting_feedback());
        assert_eq!(ent.dl_ack_info_at(sl + 4, 0, true), Ok(HarqTransition::Acked));
        // Second ACK for the same attempt is stale
        assert_eq!(
            ent.dl_ack_info_at(sl + 4, 0, true),
            Err(HarqError::StaleFeedback { harq_id: 0 })
        );
    }

    #[test]
    fn test_new_slot_order() {
        let mut ent = entity(1);
        let sl = SlotPoint::new(1, 5);
        assert!(ent.new_slot(sl).is_ok());
        assert!(matches!(ent.new_slot(sl), Err(HarqError::SlotOutOfOrder { .. })));
        assert!(matches!(ent.new_slot(sl - 1), Err(HarqError::SlotOutOfOrder { .. })));
        assert!(ent.new_slot(sl + 3).is_ok());
        assert_eq!(ent.last_slot(), Some(sl + 3));
    }

    #[test]
    fn test_ack_timeout_triggers_retx_then_discard() {
        let mut ent = HarqEntity::new(Rnti(0x4601), 2, 2, 2).unwrap();
        let sl = SlotPoint::new(0, 0);
        ent.dl_new_tx(0, sl, sl + 4, grant(), 1).unwrap();

        // Not yet overdue at ack slot + timeout
        for i in 1..=6 {
            assert!(ent.new_slot(sl + i).unwrap().is_empty());
        }
        let expired = ent.new_slot(sl + 7).unwrap();
        assert_eq!(
            expired,
            vec![ExpiredHarq {
                harq_id: 0,
                direction: HarqDirection::Downlink,
                transition: HarqTransition::RetxPending,
            }]
        );

        let id = ent.find_pending_dl_retx().unwrap().id();
        ent.dl_new_retx(id, sl + 8, sl + 12, grant()).unwrap();
        let expired = ent.new_slot(sl + 15).unwrap();
        assert_eq!(expired[0].transition, HarqTransition::Discarded);
        assert!(ent.dl_harq(0).unwrap().is_empty());
    }

    #[test]
    fn test_ul_crc_timeout() {
        let mut ent = HarqEntity::new(Rnti(0x4601), 1, 1, 0).unwrap();
        let sl = SlotPoint::new(0, 0);
        ent.ul_new_tx(0, sl + 4, grant(), 0).unwrap();
        assert!(ent.new_slot(sl + 4).unwrap().is_empty());
        let expired = ent.new_slot(sl + 5).unwrap();
        assert_eq!(expired[0].direction, HarqDirection::Uplink);
        assert_eq!(expired[0].transition, HarqTransition::Discarded);
        assert_eq!(ent.ul_harq(0).unwrap().softbuffer_len(), 0);
    }

    #[test]
    fn test_transmissions_on_invalid_process() {
        let mut ent = entity(2);
        let sl = SlotPoint::new(0, 0);
        assert_eq!(ent.dl_new_tx(2, sl, sl + 4, grant(), 4), Err(HarqError::InvalidHarqId(2)));
        assert_eq!(ent.ul_new_retx(7, sl + 4, grant()), Err(HarqError::InvalidHarqId(7)));
        assert_eq!(ent.dl_new_retx(0, sl, sl + 4, grant()), Err(HarqError::NoPendingRetx(0)));
        assert!(ent.dl_harqs().all(|h| h.is_empty()));
        assert!(ent.ul_harqs().all(|h| h.is_empty()));
    }
}
