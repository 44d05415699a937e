//! Simulated PHY
//!
//! Stands in for the PHY and the upper layers of one cell. Scheduling results
//! are turned into HARQ-ACK, SR, CSI and CRC indications with seeded random
//! draws, and DL traffic arrives at random.

use std::collections::BTreeMap;

use bytes::Bytes;
use common::{Rnti, SlotPoint};
use interfaces::{
    CrcIndication, CsiReport, HarqAckReport, SchedFeedbackHandler, SlotResult, SlotResultSink,
    UciIndication,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::{CellScheduler, SchedulerError};
use tracing::{debug, trace};

use crate::config::SimulationConfig;

/// PUSCH scheduled in a future slot
#[derive(Debug, Clone, Copy)]
struct PendingPusch {
    rnti: Rnti,
    harq_id: u8,
    tbs_bytes: u32,
}

/// Random feedback generator for one cell
pub struct SimulatedPhy {
    cfg: SimulationConfig,
    rng: StdRng,
    /// DL HARQ ids awaiting a HARQ-ACK, per (rnti, ack slot)
    pending_acks: BTreeMap<(Rnti, SlotPoint), Vec<u8>>,
    /// PUSCHs per slot
    pending_pusch: BTreeMap<SlotPoint, Vec<PendingPusch>>,
    /// Indications to hand to the scheduler before the next slot
    uci_out: Vec<UciIndication>,
    crc_out: Vec<CrcIndication>,
    bsr_out: Vec<(Rnti, u32)>,
    slots_seen: u64,
}

impl SimulatedPhy {
    pub fn new(cfg: SimulationConfig, cell_seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(cfg.seed ^ cell_seed.rotate_left(32)),
            cfg,
            pending_acks: BTreeMap::new(),
            pending_pusch: BTreeMap::new(),
            uci_out: Vec::new(),
            crc_out: Vec::new(),
            bsr_out: Vec::new(),
            slots_seen: 0,
        }
    }

    pub fn slots_seen(&self) -> u64 {
        self.slots_seen
    }

    /// Hand the indications produced so far to the scheduler, along with new DL traffic
    pub fn deliver(
        &mut self,
        sched: &mut CellScheduler,
        rntis: &[Rnti],
    ) -> Result<(), SchedulerError> {
        for uci in self.uci_out.drain(..) {
            sched.handle_uci_indication(&uci)?;
        }
        for crc in self.crc_out.drain(..) {
            sched.handle_crc_indication(&crc)?;
        }
        for (rnti, bytes) in self.bsr_out.drain(..) {
            sched.handle_ul_bsr(rnti, bytes)?;
        }
        for rnti in rntis {
            if self.rng.gen_bool(self.cfg.dl_arrival_probability) {
                sched.handle_dl_buffer_state(*rnti, self.cfg.dl_arrival_bytes)?;
            }
        }
        Ok(())
    }

    fn on_dl_and_ul_grants(&mut self, result: &SlotResult) {
        for grant in &result.dl_grants {
            self.pending_acks
                .entry((grant.rnti, grant.ack_slot))
                .or_default()
                .push(grant.harq_id);
        }
        for grant in &result.ul_grants {
            self.pending_pusch.entry(grant.pusch_slot).or_default().push(PendingPusch {
                rnti: grant.rnti,
                harq_id: grant.harq_id,
                tbs_bytes: grant.tbs_bytes,
            });
        }
    }

    fn on_pucchs(&mut self, result: &SlotResult) {
        // UCI of each UE, merged over its PUCCH PDUs
        let mut per_ue: BTreeMap<Rnti, (bool, bool)> = BTreeMap::new();
        for pdu in &result.pucchs {
            let entry = per_ue.entry(pdu.rnti).or_default();
            entry.0 |= pdu.uci.sr > 0;
            entry.1 |= pdu.uci.csi_part1 > 0;
        }

        for (rnti, (sr_opportunity, csi)) in per_ue {
            let harq_ids = self.pending_acks.remove(&(rnti, result.slot)).unwrap_or_default();
            if !harq_ids.is_empty() && self.rng.gen_bool(self.cfg.uci_loss_probability) {
                debug!("rnti={} slot={} HARQ-ACK lost", rnti, result.slot);
                continue;
            }
            let harq_acks = harq_ids
                .into_iter()
                .map(|harq_id| HarqAckReport {
                    harq_id,
                    ack: !self.rng.gen_bool(self.cfg.dl_bler),
                })
                .collect();
            let sr_detected = sr_opportunity && self.rng.gen_bool(self.cfg.sr_probability);
            if sr_detected {
                self.bsr_out.push((rnti, self.cfg.ul_bsr_bytes));
            }
            let csi = csi.then(|| CsiReport {
                cqi: self.rng.gen_range(7..=15),
                ri: 1,
            });
            self.uci_out.push(UciIndication {
                slot: result.slot,
                rnti,
                harq_acks,
                sr_detected,
                csi,
            });
        }

        // HARQ-ACKs without a PUCCH PDU in this slot never reach the scheduler
        let slot = result.slot;
        self.pending_acks.retain(|(_, s), _| *s > slot);
    }

    fn on_pusch(&mut self, slot: SlotPoint) {
        let due: Vec<SlotPoint> = self.pending_pusch.range(..=slot).map(|(s, _)| *s).collect();
        for pusch_slot in due {
            for pusch in self.pending_pusch.remove(&pusch_slot).unwrap_or_default() {
                let crc_ok = !self.rng.gen_bool(self.cfg.ul_bler);
                self.crc_out.push(CrcIndication {
                    slot: pusch_slot,
                    rnti: pusch.rnti,
                    harq_id: pusch.harq_id,
                    crc_ok,
                    payload: crc_ok.then(|| Bytes::from(vec![0u8; pusch.tbs_bytes as usize])),
                });
            }
        }
    }
}

impl SlotResultSink for SimulatedPhy {
    fn on_slot_result(&mut self, result: &SlotResult) {
        trace!(
            "cell={} slot={} PHY received {} DL, {} UL, {} PUCCH",
            result.cell_index,
            result.slot,
            result.dl_grants.len(),
            result.ul_grants.len(),
            result.pucchs.len()
        );
        self.slots_seen += 1;
        self.on_dl_and_ul_grants(result);
        self.on_pucchs(result);
        self.on_pusch(result.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CellIndex, Pci, SubcarrierSpacing, UeIndex};
    use interfaces::{SchedCellConfigurationRequest, SchedUeCreationRequest, ServingCellConfig};
    use scheduler::SchedulerExpertConfig;

    fn setup(nof_ues: u16) -> (CellScheduler, Vec<Rnti>) {
        let cell =
            SchedCellConfigurationRequest::new(CellIndex(0), Pci(1), SubcarrierSpacing::Scs30, 51);
        let mut sched = CellScheduler::new(cell.clone(), SchedulerExpertConfig::default()).unwrap();
        let rntis: Vec<Rnti> = (0..nof_ues).map(|i| Rnti(0x4601 + i)).collect();
        for (i, rnti) in rntis.iter().enumerate() {
            sched
                .add_ue(&SchedUeCreationRequest {
                    ue_index: UeIndex(i as u16),
                    crnti: *rnti,
                    serving_cell: ServingCellConfig::default_for_ue(&cell, i as u16),
                })
                .unwrap();
        }
        (sched, rntis)
    }

    #[test]
    fn test_error_free_channel() {
        let cfg = SimulationConfig {
            dl_bler: 0.0,
            ul_bler: 0.0,
            sr_probability: 1.0,
            dl_arrival_probability: 1.0,
            ..Default::default()
        };
        let (mut sched, rntis) = setup(4);
        let mut phy = SimulatedPhy::new(cfg, 0);
        let start = SlotPoint::new(1, 0);
        for i in 0..300 {
            phy.deliver(&mut sched, &rntis).unwrap();
            sched.run_slot(start + i, &mut phy).unwrap();
        }
        let m = sched.metrics();
        assert_eq!(phy.slots_seen(), 300);
        assert!(m.dl_acks > 0);
        assert_eq!(m.dl_nacks, 0);
        assert_eq!(m.dl_retx, 0);
        assert_eq!(m.ul_crc_ko, 0);
        assert!(m.ul_crc_ok > 0);
        assert!(m.sr_detected > 0);
        assert_eq!(m.stale_feedback, 0);
        assert_eq!(m.harq_timeouts, 0);
    }

    #[test]
    fn test_lossy_channel_is_reproducible() {
        let cfg = SimulationConfig {
            dl_bler: 0.3,
            ul_bler: 0.3,
            uci_loss_probability: 0.1,
            ..Default::default()
        };
        let run = |cfg: SimulationConfig| {
            let (mut sched, rntis) = setup(3);
            let mut phy = SimulatedPhy::new(cfg, 7);
            let start = SlotPoint::new(1, 100);
            for i in 0..500 {
                phy.deliver(&mut sched, &rntis).unwrap();
                sched.run_slot(start + i, &mut phy).unwrap();
            }
            sched.take_metrics()
        };
        let a = run(cfg.clone());
        let b = run(cfg);
        assert_eq!(a, b);
        assert!(a.dl_retx > 0);
        assert!(a.harq_timeouts > 0);
    }
}
