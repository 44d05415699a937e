//! Cell Scheduler
//!
//! Per-cell scheduling loop. Once per slot it advances the UE procedures and
//! HARQ entities, applies the feedback received since the previous slot,
//! places SR and CSI opportunities, and then grants DL and UL
//! retransmissions ahead of new transmissions.

use std::collections::BTreeMap;

use common::{CellIndex, OfdmSymbolRange, PrbInterval, Rnti, SlotPoint, UeIndex};
use interfaces::{
    CrcIndication, DlGrant, HarqDirection, HarqDiscard, SchedCellConfigurationRequest,
    SchedFeedbackHandler, SchedUeCreationRequest, SchedUeReconfigurationRequest, SlotResultSink,
    UciIndication, UlGrant,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{DuCellConfigPool, UeConfigHandles};
use crate::grid::{CellResourceAllocator, RING_SIZE};
use crate::harq::{HarqEntity, HarqError, HarqGrant, HarqProcess, HarqTransition};
use crate::mcs;
use crate::procedure::{ProcedureEvent, ProcedureStep, UeReconfigProcedure};
use crate::pucch::{PucchAllocator, MAX_PUCCH_PDUS_PER_SLOT};
use crate::SchedulerError;

/// Scheduler tuning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerExpertConfig {
    /// PDSCH to HARQ-ACK delay in slots
    pub k1: u32,
    /// PDCCH to PUSCH delay in slots
    pub k2: u32,
    /// Maximum number of HARQ retransmissions
    pub max_nof_retxs: u8,
    /// Slots past the expected feedback slot before a HARQ process is NACKed
    pub ack_timeout_slots: u32,
    /// DL MCS for new transmissions
    pub dl_mcs: u8,
    /// UL MCS for new transmissions
    pub ul_mcs: u8,
    /// PRBs per new DL grant
    pub dl_prbs_per_grant: u16,
    /// PRBs per new UL grant
    pub ul_prbs_per_grant: u16,
    /// DL grants per slot
    pub max_dl_grants_per_slot: usize,
    /// UL grants per slot
    pub max_ul_grants_per_slot: usize,
    /// PUCCH PDUs per slot
    pub max_pucch_pdus_per_slot: usize,
    /// Slots a UE has to confirm a reconfiguration
    pub reconfig_timeout_slots: u32,
}

impl Default for SchedulerExpertConfig {
    fn default() -> Self {
        Self {
            k1: 4,
            k2: 4,
            max_nof_retxs: 4,
            ack_timeout_slots: 8,
            dl_mcs: 10,
            ul_mcs: 10,
            dl_prbs_per_grant: 10,
            ul_prbs_per_grant: 10,
            max_dl_grants_per_slot: 4,
            max_ul_grants_per_slot: 4,
            max_pucch_pdus_per_slot: MAX_PUCCH_PDUS_PER_SLOT,
            reconfig_timeout_slots: 40,
        }
    }
}

impl SchedulerExpertConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for (name, k) in [("k1", self.k1), ("k2", self.k2)] {
            if k == 0 || k as usize >= RING_SIZE {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{} must be in [1, {}), got {}",
                    name, RING_SIZE, k
                )));
            }
        }
        if self.ack_timeout_slots == 0 {
            return Err(SchedulerError::InvalidConfig("ack_timeout_slots must be positive".into()));
        }
        if self.dl_mcs > mcs::MAX_MCS || self.ul_mcs > mcs::MAX_MCS {
            return Err(SchedulerError::InvalidConfig(format!("MCS above {}", mcs::MAX_MCS)));
        }
        Ok(())
    }
}

/// Scheduler counters of one cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub nof_slots: u64,
    pub dl_new_tx: u64,
    pub dl_retx: u64,
    pub ul_new_tx: u64,
    pub ul_retx: u64,
    pub dl_acks: u64,
    pub dl_nacks: u64,
    pub ul_crc_ok: u64,
    pub ul_crc_ko: u64,
    pub harq_discards: u64,
    pub harq_timeouts: u64,
    pub stale_feedback: u64,
    pub pucch_failures: u64,
    pub deferred_ues: u64,
    pub sr_detected: u64,
    pub dl_bytes: u64,
    pub ul_bytes: u64,
    pub reconfigs_completed: u64,
    pub reconfigs_failed: u64,
}

impl CellMetrics {
    /// Accumulate the counters of another cell
    pub fn merge(&mut self, other: &CellMetrics) {
        self.nof_slots += other.nof_slots;
        self.dl_new_tx += other.dl_new_tx;
        self.dl_retx += other.dl_retx;
        self.ul_new_tx += other.ul_new_tx;
        self.ul_retx += other.ul_retx;
        self.dl_acks += other.dl_acks;
        self.dl_nacks += other.dl_nacks;
        self.ul_crc_ok += other.ul_crc_ok;
        self.ul_crc_ko += other.ul_crc_ko;
        self.harq_discards += other.harq_discards;
        self.harq_timeouts += other.harq_timeouts;
        self.stale_feedback += other.stale_feedback;
        self.pucch_failures += other.pucch_failures;
        self.deferred_ues += other.deferred_ues;
        self.sr_detected += other.sr_detected;
        self.dl_bytes += other.dl_bytes;
        self.ul_bytes += other.ul_bytes;
        self.reconfigs_completed += other.reconfigs_completed;
        self.reconfigs_failed += other.reconfigs_failed;
    }

    /// Fraction of DL HARQ-ACKs that were NACKs
    pub fn dl_bler(&self) -> f64 {
        let total = self.dl_acks + self.dl_nacks;
        if total == 0 {
            0.0
        } else {
            self.dl_nacks as f64 / total as f64
        }
    }

    /// Fraction of PUSCH CRCs that failed
    pub fn ul_bler(&self) -> f64 {
        let total = self.ul_crc_ok + self.ul_crc_ko;
        if total == 0 {
            0.0
        } else {
            self.ul_crc_ko as f64 / total as f64
        }
    }
}

/// Scheduler context of one UE
#[derive(Debug)]
struct SchedUe {
    ue_index: UeIndex,
    rnti: Rnti,
    harq: HarqEntity,
    cfg: UeConfigHandles,
    dl_pending_bytes: u32,
    ul_pending_bytes: u32,
    sr_pending: bool,
    last_cqi: Option<u8>,
}

fn is_periodic_opportunity(slot: SlotPoint, period: u32, offset: u32) -> bool {
    period > 0 && slot.to_uint() % period == offset % period
}

/// Scheduler of one cell
#[derive(Debug)]
pub struct CellScheduler {
    cell_index: CellIndex,
    expert: SchedulerExpertConfig,
    cfg_pool: DuCellConfigPool,
    grid: CellResourceAllocator,
    pucch: PucchAllocator,
    ues: BTreeMap<Rnti, SchedUe>,
    pending_reconfigs: Vec<SchedUeReconfigurationRequest>,
    procedures: Vec<UeReconfigProcedure>,
    pending_uci: Vec<UciIndication>,
    pending_crc: Vec<CrcIndication>,
    pdsch_symbols: OfdmSymbolRange,
    pusch_symbols: OfdmSymbolRange,
    metrics: CellMetrics,
    last_slot: Option<SlotPoint>,
    rr_offset: usize,
}

impl CellScheduler {
    pub fn new(
        cell_cfg: SchedCellConfigurationRequest,
        expert: SchedulerExpertConfig,
    ) -> Result<Self, SchedulerError> {
        expert.validate()?;

        let nof_dl_prbs = cell_cfg.dl_bwp.crbs.length();
        let nof_ul_prbs = cell_cfg.ul_bwp.crbs.length();
        let mut grid = CellResourceAllocator::new(cell_cfg.cell_index, nof_dl_prbs, nof_ul_prbs);

        // PUCCH occupies the lower band edge (HARQ-ACK sets) and the upper one (SR/CSI)
        let edge = nof_ul_prbs.min(12);
        grid.reserve_ul_prbs(PrbInterval::new(0, edge));
        grid.reserve_ul_prbs(PrbInterval::new(nof_ul_prbs.saturating_sub(8), nof_ul_prbs));

        let pdsch_start =
            cell_cfg.coreset0.nof_symbols.min(OfdmSymbolRange::NOF_SYMBOLS_PER_SLOT - 1);
        info!(
            "cell={} Scheduler created: {} DL PRBs, {} UL PRBs, k1={} k2={}",
            cell_cfg.cell_index, nof_dl_prbs, nof_ul_prbs, expert.k1, expert.k2
        );

        Ok(Self {
            cell_index: cell_cfg.cell_index,
            pucch: PucchAllocator::new(expert.max_pucch_pdus_per_slot),
            expert,
            cfg_pool: DuCellConfigPool::new(cell_cfg),
            grid,
            ues: BTreeMap::new(),
            pending_reconfigs: Vec::new(),
            procedures: Vec::new(),
            pending_uci: Vec::new(),
            pending_crc: Vec::new(),
            pdsch_symbols: OfdmSymbolRange::new(pdsch_start, OfdmSymbolRange::NOF_SYMBOLS_PER_SLOT),
            pusch_symbols: OfdmSymbolRange::full_slot(),
            metrics: CellMetrics::default(),
            last_slot: None,
            rr_offset: 0,
        })
    }

    pub fn cell_index(&self) -> CellIndex {
        self.cell_index
    }

    pub fn expert_config(&self) -> &SchedulerExpertConfig {
        &self.expert
    }

    pub fn config_pool(&self) -> &DuCellConfigPool {
        &self.cfg_pool
    }

    pub fn metrics(&self) -> &CellMetrics {
        &self.metrics
    }

    /// Return the counters accumulated since the last call and reset them
    pub fn take_metrics(&mut self) -> CellMetrics {
        std::mem::take(&mut self.metrics)
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }

    /// HARQ entity of a UE
    pub fn ue_harq(&self, rnti: Rnti) -> Option<&HarqEntity> {
        self.ues.get(&rnti).map(|ue| &ue.harq)
    }

    /// UE index of a UE
    pub fn ue_index(&self, rnti: Rnti) -> Option<UeIndex> {
        self.ues.get(&rnti).map(|ue| ue.ue_index)
    }

    /// Last CQI reported by a UE
    pub fn ue_cqi(&self, rnti: Rnti) -> Option<u8> {
        self.ues.get(&rnti).and_then(|ue| ue.last_cqi)
    }

    /// Number of reconfiguration procedures in progress
    pub fn nof_procedures(&self) -> usize {
        self.procedures.len() + self.pending_reconfigs.len()
    }

    pub fn add_ue(&mut self, req: &SchedUeCreationRequest) -> Result<(), SchedulerError> {
        if self.ues.contains_key(&req.crnti) {
            return Err(SchedulerError::DuplicateUe(req.crnti));
        }
        let cfg = self.cfg_pool.create_ue(&req.serving_cell)?;
        let harq = match HarqEntity::new(
            req.crnti,
            req.serving_cell.nof_dl_harq_procs as usize,
            req.serving_cell.nof_ul_harq_procs as usize,
            self.expert.ack_timeout_slots,
        ) {
            Ok(harq) => harq,
            Err(err) => {
                self.cfg_pool.release_ue(cfg)?;
                return Err(err.into());
            }
        };
        info!(
            "cell={} rnti={} UE created with {} DL / {} UL HARQs",
            self.cell_index,
            req.crnti,
            harq.nof_dl_harqs(),
            harq.nof_ul_harqs()
        );
        self.ues.insert(
            req.crnti,
            SchedUe {
                ue_index: req.ue_index,
                rnti: req.crnti,
                harq,
                cfg,
                dl_pending_bytes: 0,
                ul_pending_bytes: 0,
                sr_pending: false,
                last_cqi: None,
            },
        );
        Ok(())
    }

    pub fn remove_ue(&mut self, rnti: Rnti) -> Result<(), SchedulerError> {
        let ue = self.ues.remove(&rnti).ok_or(SchedulerError::UnknownUe(rnti))?;
        let released = self.cfg_pool.release_ue(ue.cfg);

        // PUCCH allocations already placed in future slots
        if let Some(current) = self.grid.slot() {
            for i in 0..RING_SIZE as u32 {
                if let Ok(alloc) = self.grid.get_mut(current + i) {
                    self.pucch.remove_ue(&mut alloc.pucch, rnti);
                }
            }
        }
        self.procedures.retain(|p| p.rnti() != rnti);
        self.pending_reconfigs.retain(|r| r.crnti != rnti);
        self.pending_uci.retain(|u| u.rnti != rnti);
        self.pending_crc.retain(|c| c.rnti != rnti);
        info!("cell={} rnti={} UE removed", self.cell_index, rnti);
        released?;
        Ok(())
    }

    /// Queue a reconfiguration; the procedure starts at the next slot
    pub fn handle_ue_reconfiguration(
        &mut self,
        req: SchedUeReconfigurationRequest,
    ) -> Result<(), SchedulerError> {
        if !self.ues.contains_key(&req.crnti) {
            return Err(SchedulerError::UnknownUe(req.crnti));
        }
        let busy = self.procedures.iter().any(|p| p.rnti() == req.crnti)
            || self.pending_reconfigs.iter().any(|r| r.crnti == req.crnti);
        if busy {
            return Err(SchedulerError::ProcedureInProgress(req.crnti));
        }
        if req.serving_cell.cell_index != self.cell_index {
            return Err(SchedulerError::InvalidConfig(format!(
                "reconfiguration for cell {} sent to cell {}",
                req.serving_cell.cell_index, self.cell_index
            )));
        }
        req.serving_cell.validate()?;
        self.pending_reconfigs.push(req);
        Ok(())
    }

    /// UE confirmed its reconfiguration
    pub fn handle_ue_reconfig_complete(&mut self, rnti: Rnti) -> Result<(), SchedulerError> {
        let proc_ = self
            .procedures
            .iter_mut()
            .find(|p| p.rnti() == rnti)
            .ok_or(SchedulerError::NoProcedure(rnti))?;
        if proc_.resume(ProcedureEvent::UeConfirmed)? == ProcedureStep::Completed {
            self.metrics.reconfigs_completed += 1;
        }
        self.procedures.retain(|p| !p.is_finished());
        Ok(())
    }

    /// Schedule `slot` and hand the result to `sink`
    pub fn run_slot(
        &mut self,
        slot: SlotPoint,
        sink: &mut dyn SlotResultSink,
    ) -> Result<(), SchedulerError> {
        // 1. Slots must increase
        if let Some(last) = self.last_slot {
            if slot <= last {
                return Err(SchedulerError::SlotOutOfOrder { last, current: slot });
            }
        }
        self.last_slot = Some(slot);

        // 2. Recycle the grid
        self.grid.slot_indication(slot)?;

        // 3. Procedures
        self.run_procedures(slot)?;

        // 4. HARQ timeouts, then the feedback received since the previous slot
        let mut discards = Vec::new();
        self.advance_harqs(slot, &mut discards)?;
        self.process_feedback(&mut discards);

        // 5. SR and CSI on the furthest PUCCH slot, before HARQ-ACKs land there
        self.schedule_uci_opportunities(slot + self.expert.k1)?;

        // 6. Grants
        let order = self.round_robin_order();
        self.schedule_dl(slot, &order)?;
        self.schedule_ul(slot, &order)?;

        // 7. Output
        let alloc = self.grid.get_mut(slot)?;
        alloc.result.harq_discards.extend(discards);
        let result = alloc.finalize();
        debug!(
            "cell={} slot={} {} DL, {} UL, {} PUCCH",
            self.cell_index,
            slot,
            result.dl_grants.len(),
            result.ul_grants.len(),
            result.pucchs.len()
        );
        sink.on_slot_result(result);
        self.metrics.nof_slots += 1;
        Ok(())
    }

    fn round_robin_order(&mut self) -> Vec<Rnti> {
        let mut order: Vec<Rnti> = self.ues.keys().copied().collect();
        if !order.is_empty() {
            let shift = self.rr_offset % order.len();
            order.rotate_left(shift);
        }
        self.rr_offset = self.rr_offset.wrapping_add(1);
        order
    }

    fn run_procedures(&mut self, slot: SlotPoint) -> Result<(), SchedulerError> {
        for req in self.pending_reconfigs.drain(..) {
            self.procedures
                .push(UeReconfigProcedure::new(req, slot, self.expert.reconfig_timeout_slots));
        }

        for proc_ in self.procedures.iter_mut() {
            match proc_.resume(ProcedureEvent::SlotIndication(slot))? {
                ProcedureStep::ApplyConfig => {
                    let rnti = proc_.rnti();
                    let ue = self.ues.get_mut(&rnti).ok_or(SchedulerError::UnknownUe(rnti))?;
                    self.cfg_pool.update_ue(&mut ue.cfg, &proc_.request().serving_cell)?;
                    proc_.resume(ProcedureEvent::ConfigApplied)?;
                }
                ProcedureStep::TimedOut => self.metrics.reconfigs_failed += 1,
                ProcedureStep::Completed => self.metrics.reconfigs_completed += 1,
                ProcedureStep::Pending => {}
            }
        }
        self.procedures.retain(|p| !p.is_finished());
        Ok(())
    }

    fn advance_harqs(
        &mut self,
        slot: SlotPoint,
        discards: &mut Vec<HarqDiscard>,
    ) -> Result<(), SchedulerError> {
        for ue in self.ues.values_mut() {
            for expired in ue.harq.new_slot(slot)? {
                self.metrics.harq_timeouts += 1;
                if expired.transition == HarqTransition::Discarded {
                    self.metrics.harq_discards += 1;
                    discards.push(HarqDiscard {
                        rnti: ue.rnti,
                        harq_id: expired.harq_id,
                        direction: expired.direction,
                    });
                }
            }
        }
        Ok(())
    }

    fn process_feedback(&mut self, discards: &mut Vec<HarqDiscard>) {
        for uci in std::mem::take(&mut self.pending_uci) {
            let Some(ue) = self.ues.get_mut(&uci.rnti) else {
                debug!("cell={} UCI for unknown rnti={}", self.cell_index, uci.rnti);
                self.metrics.stale_feedback += 1;
                continue;
            };
            for report in &uci.harq_acks {
                match ue.harq.dl_ack_info_at(uci.slot, report.harq_id, report.ack) {
                    Ok(transition) => {
                        if report.ack {
                            self.metrics.dl_acks += 1;
                        } else {
                            self.metrics.dl_nacks += 1;
                        }
                        if transition == HarqTransition::Discarded {
                            self.metrics.harq_discards += 1;
                            discards.push(HarqDiscard {
                                rnti: ue.rnti,
                                harq_id: report.harq_id,
                                direction: HarqDirection::Downlink,
                            });
                        }
                    }
                    Err(HarqError::StaleFeedback { .. }) | Err(HarqError::InvalidHarqId(_)) => {
                        self.metrics.stale_feedback += 1;
                    }
                    Err(err) => {
                        let cell = self.cell_index;
                        warn!("cell={} rnti={} HARQ-ACK rejected: {}", cell, ue.rnti, err);
                        self.metrics.stale_feedback += 1;
                    }
                }
            }
            if uci.sr_detected {
                ue.sr_pending = true;
                self.metrics.sr_detected += 1;
            }
            if let Some(csi) = uci.csi {
                ue.last_cqi = Some(csi.cqi);
            }
        }

        for crc in std::mem::take(&mut self.pending_crc) {
            let Some(ue) = self.ues.get_mut(&crc.rnti) else {
                debug!("cell={} CRC for unknown rnti={}", self.cell_index, crc.rnti);
                self.metrics.stale_feedback += 1;
                continue;
            };
            let tbs = ue
                .harq
                .ul_harq(crc.harq_id)
                .and_then(|h| h.tbs_bytes())
                .unwrap_or(0);
            match ue.harq.ul_crc_info_at(crc.slot, crc.harq_id, crc.crc_ok) {
                Ok(transition) => {
                    if crc.crc_ok {
                        self.metrics.ul_crc_ok += 1;
                        let nof_bytes = crc.payload.as_ref().map(|p| p.len() as u32).unwrap_or(tbs);
                        self.metrics.ul_bytes += nof_bytes as u64;
                    } else {
                        self.metrics.ul_crc_ko += 1;
                    }
                    if transition == HarqTransition::Discarded {
                        self.metrics.harq_discards += 1;
                        discards.push(HarqDiscard {
                            rnti: ue.rnti,
                            harq_id: crc.harq_id,
                            direction: HarqDirection::Uplink,
                        });
                    }
                }
                Err(HarqError::StaleFeedback { .. }) | Err(HarqError::InvalidHarqId(_)) => {
                    self.metrics.stale_feedback += 1;
                }
                Err(err) => {
                    warn!("cell={} rnti={} CRC rejected: {}", self.cell_index, ue.rnti, err);
                    self.metrics.stale_feedback += 1;
                }
            }
        }
    }

    fn schedule_uci_opportunities(&mut self, uci_slot: SlotPoint) -> Result<(), SchedulerError> {
        let cell = self.cell_index;
        let alloc = self.grid.get_mut(uci_slot)?;
        for ue in self.ues.values() {
            let view = self.cfg_pool.resolve(&ue.cfg)?;
            let sr_due = view.uplink.sr.as_ref().is_some_and(|sr| {
                is_periodic_opportunity(uci_slot, sr.period_slots, sr.offset_slots)
            });
            if sr_due {
                let res = self.pucch.alloc_sr_opportunity(&mut alloc.pucch, ue.rnti, view.pucch());
                if let Err(err) = res {
                    debug!("cell={} rnti={} SR opportunity not allocated: {}", cell, ue.rnti, err);
                    self.metrics.pucch_failures += 1;
                }
            }
            let csi_due = view.csi_meas.is_some_and(|csi| {
                is_periodic_opportunity(uci_slot, csi.report_period_slots, csi.offset_slots)
            });
            if csi_due {
                let res = self.pucch.alloc_csi_opportunity(&mut alloc.pucch, ue.rnti, view.pucch());
                if let Err(err) = res {
                    debug!("cell={} rnti={} CSI opportunity not allocated: {}", cell, ue.rnti, err);
                    self.metrics.pucch_failures += 1;
                }
            }
        }
        Ok(())
    }

    fn schedule_dl(&mut self, slot: SlotPoint, order: &[Rnti]) -> Result<(), SchedulerError> {
        let ack_slot = slot + self.expert.k1;
        let symbols = self.pdsch_symbols;
        let mut scheduled: Vec<Rnti> = Vec::new();

        // Retransmissions first
        for is_retx in [true, false] {
            for rnti in order {
                if scheduled.len() >= self.expert.max_dl_grants_per_slot {
                    return Ok(());
                }
                if scheduled.contains(rnti) {
                    continue;
                }
                let Some(ue) = self.ues.get_mut(rnti) else {
                    continue;
                };

                // 1. HARQ process
                let (harq_id, previous) = if is_retx {
                    match ue.harq.find_pending_dl_retx() {
                        Some(h) => (h.id(), h.last_grant().copied()),
                        None => continue,
                    }
                } else {
                    if ue.dl_pending_bytes == 0 {
                        continue;
                    }
                    match ue.harq.find_empty_dl() {
                        Some(h) => (h.id(), None),
                        None => {
                            self.metrics.deferred_ues += 1;
                            continue;
                        }
                    }
                };
                let nof_prbs = previous.map_or(self.expert.dl_prbs_per_grant, |g| g.prbs.length());

                // 2. PDSCH
                let Some(prbs) = self.grid.get_mut(slot)?.alloc_dl_prbs(nof_prbs) else {
                    self.metrics.deferred_ues += 1;
                    continue;
                };

                // 3. HARQ-ACK on PUCCH
                let view = self.cfg_pool.resolve(&ue.cfg)?;
                let pucch_state = &mut self.grid.get_mut(ack_slot)?.pucch;
                let pucch_before = pucch_state.clone();
                let pri = match self.pucch.alloc_harq_ack(pucch_state, *rnti, view.pucch()) {
                    Ok(pri) => pri,
                    Err(err) => {
                        debug!(
                            "cell={} rnti={} slot={} HARQ-ACK not allocated: {}",
                            self.cell_index, rnti, ack_slot, err
                        );
                        self.metrics.pucch_failures += 1;
                        self.metrics.deferred_ues += 1;
                        self.grid.get_mut(slot)?.free_dl_prbs(prbs);
                        continue;
                    }
                };

                // 4. HARQ transition
                let tx = match previous {
                    Some(grant) => {
                        let grant = HarqGrant { prbs, symbols, ..grant };
                        ue.harq.dl_new_retx(harq_id, slot, ack_slot, grant)
                    }
                    None => {
                        let mcs = self.expert.dl_mcs;
                        let tbs_bytes = mcs::tbs_bytes(mcs, nof_prbs, symbols.length());
                        ue.harq.dl_new_tx(
                            harq_id,
                            slot,
                            ack_slot,
                            HarqGrant { mcs, tbs_bytes, prbs, symbols },
                            self.expert.max_nof_retxs,
                        )
                    }
                };
                let dci = match tx {
                    Ok(dci) => dci,
                    Err(err) => {
                        // Neither the PDSCH nor the HARQ-ACK bit may outlive a rejected grant
                        self.grid.get_mut(slot)?.free_dl_prbs(prbs);
                        self.grid.get_mut(ack_slot)?.pucch = pucch_before;
                        return Err(err.into());
                    }
                };

                if dci.is_retx {
                    self.metrics.dl_retx += 1;
                } else {
                    self.metrics.dl_new_tx += 1;
                    self.metrics.dl_bytes += dci.tbs_bytes as u64;
                    ue.dl_pending_bytes = ue.dl_pending_bytes.saturating_sub(dci.tbs_bytes);
                }
                self.grid.get_mut(slot)?.result.dl_grants.push(DlGrant {
                    rnti: *rnti,
                    harq_id: dci.harq_id,
                    ndi: dci.ndi,
                    rv: dci.rv,
                    is_retx: dci.is_retx,
                    mcs: dci.mcs,
                    tbs_bytes: dci.tbs_bytes,
                    prbs,
                    symbols,
                    pucch_res_indicator: pri,
                    ack_slot,
                });
                scheduled.push(*rnti);
            }
        }
        Ok(())
    }

    fn schedule_ul(&mut self, slot: SlotPoint, order: &[Rnti]) -> Result<(), SchedulerError> {
        let pusch_slot = slot + self.expert.k2;
        let symbols = self.pusch_symbols;
        let mut scheduled: Vec<Rnti> = Vec::new();

        for is_retx in [true, false] {
            for rnti in order {
                if scheduled.len() >= self.expert.max_ul_grants_per_slot {
                    return Ok(());
                }
                if scheduled.contains(rnti) {
                    continue;
                }
                let Some(ue) = self.ues.get_mut(rnti) else {
                    continue;
                };

                // 1. HARQ process
                let (harq_id, previous) = if is_retx {
                    match ue.harq.find_pending_ul_retx() {
                        Some(h) => (h.id(), h.last_grant().copied()),
                        None => continue,
                    }
                } else {
                    if ue.ul_pending_bytes == 0 && !ue.sr_pending {
                        continue;
                    }
                    match ue.harq.find_empty_ul() {
                        Some(h) => (h.id(), None),
                        None => {
                            self.metrics.deferred_ues += 1;
                            continue;
                        }
                    }
                };
                let nof_prbs = previous.map_or(self.expert.ul_prbs_per_grant, |g| g.prbs.length());

                // 2. PUSCH
                let Some(prbs) = self.grid.get_mut(pusch_slot)?.alloc_ul_prbs(nof_prbs) else {
                    self.metrics.deferred_ues += 1;
                    continue;
                };

                // 3. HARQ transition
                let tx = match previous {
                    Some(grant) => {
                        let grant = HarqGrant { prbs, symbols, ..grant };
                        ue.harq.ul_new_retx(harq_id, pusch_slot, grant)
                    }
                    None => {
                        let mcs = self.expert.ul_mcs;
                        let tbs_bytes = mcs::tbs_bytes(mcs, nof_prbs, symbols.length());
                        ue.harq.ul_new_tx(
                            harq_id,
                            pusch_slot,
                            HarqGrant { mcs, tbs_bytes, prbs, symbols },
                            self.expert.max_nof_retxs,
                        )
                    }
                };
                let dci = match tx {
                    Ok(dci) => dci,
                    Err(err) => {
                        self.grid.get_mut(pusch_slot)?.free_ul_prbs(prbs);
                        return Err(err.into());
                    }
                };

                if dci.is_retx {
                    self.metrics.ul_retx += 1;
                } else {
                    self.metrics.ul_new_tx += 1;
                    ue.sr_pending = false;
                    ue.ul_pending_bytes = ue.ul_pending_bytes.saturating_sub(dci.tbs_bytes);
                }
                self.grid.get_mut(slot)?.result.ul_grants.push(UlGrant {
                    rnti: *rnti,
                    harq_id: dci.harq_id,
                    ndi: dci.ndi,
                    rv: dci.rv,
                    is_retx: dci.is_retx,
                    mcs: dci.mcs,
                    tbs_bytes: dci.tbs_bytes,
                    prbs,
                    symbols,
                    pusch_slot,
                });
                scheduled.push(*rnti);
            }
        }
        Ok(())
    }
}

impl SchedFeedbackHandler for CellScheduler {
    type Error = SchedulerError;

    fn handle_uci_indication(&mut self, uci: &UciIndication) -> Result<(), SchedulerError> {
        if !self.ues.contains_key(&uci.rnti) {
            return Err(SchedulerError::UnknownUe(uci.rnti));
        }
        self.pending_uci.push(uci.clone());
        Ok(())
    }

    fn handle_crc_indication(&mut self, crc: &CrcIndication) -> Result<(), SchedulerError> {
        if !self.ues.contains_key(&crc.rnti) {
            return Err(SchedulerError::UnknownUe(crc.rnti));
        }
        self.pending_crc.push(crc.clone());
        Ok(())
    }

    fn handle_dl_buffer_state(
        &mut self,
        rnti: Rnti,
        pending_bytes: u32,
    ) -> Result<(), SchedulerError> {
        let ue = self.ues.get_mut(&rnti).ok_or(SchedulerError::UnknownUe(rnti))?;
        ue.dl_pending_bytes = pending_bytes;
        Ok(())
    }

    fn handle_ul_bsr(&mut self, rnti: Rnti, pending_bytes: u32) -> Result<(), SchedulerError> {
        let ue = self.ues.get_mut(&rnti).ok_or(SchedulerError::UnknownUe(rnti))?;
        ue.ul_pending_bytes = pending_bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Pci, SubcarrierSpacing};
    use interfaces::{HarqAckReport, PucchFormat, ServingCellConfig, SlotResult};

    fn cell_cfg() -> SchedCellConfigurationRequest {
        SchedCellConfigurationRequest::new(CellIndex(0), Pci(1), SubcarrierSpacing::Scs30, 51)
    }

    fn scheduler_with_ues(nof_ues: u16) -> CellScheduler {
        let cell = cell_cfg();
        let mut sched = CellScheduler::new(cell.clone(), SchedulerExpertConfig::default()).unwrap();
        for i in 0..nof_ues {
            sched
                .add_ue(&SchedUeCreationRequest {
                    ue_index: UeIndex(i),
                    crnti: Rnti(0x4601 + i),
                    serving_cell: ServingCellConfig::default_for_ue(&cell, i),
                })
                .unwrap();
        }
        sched
    }

    #[test]
    fn test_invalid_expert_config() {
        let expert = SchedulerExpertConfig { k1: 0, ..Default::default() };
        assert!(matches!(
            CellScheduler::new(cell_cfg(), expert),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_ue() {
        let cell = cell_cfg();
        let mut sched = scheduler_with_ues(1);
        let req = SchedUeCreationRequest {
            ue_index: UeIndex(5),
            crnti: Rnti(0x4601),
            serving_cell: ServingCellConfig::default_for_ue(&cell, 5),
        };
        assert!(matches!(sched.add_ue(&req), Err(SchedulerError::DuplicateUe(_))));
        assert!(matches!(sched.remove_ue(Rnti(0x9999)), Err(SchedulerError::UnknownUe(_))));
        assert!(sched.handle_dl_buffer_state(Rnti(0x9999), 10).is_err());
    }

    #[test]
    fn test_slot_order_enforced() {
        let mut sched = scheduler_with_ues(0);
        let mut out: Vec<SlotResult> = Vec::new();
        let sl = SlotPoint::new(1, 0);
        sched.run_slot(sl, &mut out).unwrap();
        assert!(matches!(sched.run_slot(sl, &mut out), Err(SchedulerError::SlotOutOfOrder { .. })));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_dl_grant_with_harq_ack_on_pucch() {
        let mut sched = scheduler_with_ues(1);
        let rnti = Rnti(0x4601);
        sched.handle_dl_buffer_state(rnti, 10_000).unwrap();
        let mut out: Vec<SlotResult> = Vec::new();
        let sl = SlotPoint::new(1, 100);
        for i in 0..=4 {
            sched.run_slot(sl + i, &mut out).unwrap();
        }

        let grant = &out[0].dl_grants[0];
        assert_eq!(grant.rnti, rnti);
        assert!(!grant.is_retx);
        assert_eq!(grant.ack_slot, sl + 4);

        // HARQ-ACK of the first grant lands in slot sl + 4 with the signalled PRI
        let pucchs: Vec<_> = out[4].pucchs.iter().filter(|p| p.rnti == rnti).collect();
        assert_eq!(pucchs.len(), 1);
        assert_eq!(pucchs[0].uci.harq_ack, 1);
        assert_eq!(pucchs[0].format, PucchFormat::Format1);
    }

    #[test]
    fn test_harq_ack_failure_releases_pdsch() {
        let cell = cell_cfg();
        let expert = SchedulerExpertConfig { max_pucch_pdus_per_slot: 1, ..Default::default() };
        let mut sched = CellScheduler::new(cell.clone(), expert).unwrap();
        let rntis = [Rnti(0x4601), Rnti(0x4602)];
        for (i, rnti) in rntis.iter().enumerate() {
            sched
                .add_ue(&SchedUeCreationRequest {
                    ue_index: UeIndex(i as u16),
                    crnti: *rnti,
                    serving_cell: ServingCellConfig::default_for_ue(&cell, i as u16),
                })
                .unwrap();
            sched.handle_dl_buffer_state(*rnti, 10_000).unwrap();
        }
        let mut out: Vec<SlotResult> = Vec::new();
        // No SR or CSI opportunity falls on the HARQ-ACK slot
        let sl = SlotPoint::new(1, 100);
        sched.run_slot(sl, &mut out).unwrap();

        assert_eq!(out[0].dl_grants.len(), 1);
        let served = out[0].dl_grants[0].rnti;
        let deferred = *rntis.iter().find(|r| **r != served).unwrap();
        assert_eq!(out[0].dl_grants[0].prbs, PrbInterval::new(0, 10));
        assert_eq!(sched.metrics().pucch_failures, 1);

        // The deferred UE holds neither PDSCH PRBs nor a HARQ-ACK bit
        let ack_slot = sl + sched.expert_config().k1;
        let pucch = &sched.grid.get(ack_slot).unwrap().pucch;
        assert_eq!(pucch.ue_demand(deferred).harq_ack_bits, 0);
        assert_eq!(pucch.ue_demand(served).harq_ack_bits, 1);
        assert_eq!(
            sched.grid.get_mut(sl).unwrap().alloc_dl_prbs(41),
            Some(PrbInterval::new(10, 51))
        );
        assert!(sched.ue_harq(deferred).unwrap().find_empty_dl().is_some());
        assert!(sched.ue_harq(deferred).unwrap().dl_harqs().all(|h| h.is_empty()));
    }

    #[test]
    fn test_nack_leads_to_retx_with_same_ndi() {
        let mut sched = scheduler_with_ues(1);
        let rnti = Rnti(0x4601);
        sched.handle_dl_buffer_state(rnti, 100).unwrap();
        let mut out: Vec<SlotResult> = Vec::new();
        let sl = SlotPoint::new(1, 0);
        for i in 0..=4 {
            sched.run_slot(sl + i, &mut out).unwrap();
        }
        let first = out[0].dl_grants[0].clone();
        sched
            .handle_uci_indication(&UciIndication {
                slot: first.ack_slot,
                rnti,
                harq_acks: vec![HarqAckReport { harq_id: first.harq_id, ack: false }],
                sr_detected: false,
                csi: None,
            })
            .unwrap();
        sched.run_slot(sl + 5, &mut out).unwrap();

        let retx = &out[5].dl_grants[0];
        assert!(retx.is_retx);
        assert_eq!(retx.harq_id, first.harq_id);
        assert_eq!(retx.ndi, first.ndi);
        assert_eq!(retx.rv, 2);
        assert_eq!(retx.tbs_bytes, first.tbs_bytes);
        assert_eq!(sched.metrics().dl_nacks, 1);
        assert_eq!(sched.metrics().dl_retx, 1);
    }

    #[test]
    fn test_stale_uci_counted() {
        let mut sched = scheduler_with_ues(1);
        let rnti = Rnti(0x4601);
        let mut out: Vec<SlotResult> = Vec::new();
        let sl = SlotPoint::new(1, 0);
        sched
            .handle_uci_indication(&UciIndication {
                slot: sl,
                rnti,
                harq_acks: vec![HarqAckReport { harq_id: 3, ack: true }],
                sr_detected: true,
                csi: None,
            })
            .unwrap();
        sched.run_slot(sl, &mut out).unwrap();
        assert_eq!(sched.metrics().stale_feedback, 1);
        assert_eq!(sched.metrics().sr_detected, 1);
        // SR turns into an UL grant in the same slot
        assert_eq!(out[0].ul_grants.len(), 1);
        assert_eq!(out[0].ul_grants[0].pusch_slot, sl + 4);
    }

    #[test]
    fn test_remove_ue_clears_future_pucch() {
        let mut sched = scheduler_with_ues(2);
        let rnti = Rnti(0x4601);
        sched.handle_dl_buffer_state(rnti, 10_000).unwrap();
        let mut out: Vec<SlotResult> = Vec::new();
        let sl = SlotPoint::new(1, 0);
        sched.run_slot(sl, &mut out).unwrap();
        sched.remove_ue(rnti).unwrap();
        for i in 1..=4 {
            sched.run_slot(sl + i, &mut out).unwrap();
        }
        assert!(out[4].pucchs.iter().all(|p| p.rnti != rnti));
        assert_eq!(sched.nof_ues(), 1);
    }

    #[test]
    fn test_reconfiguration_procedure() {
        let cell = cell_cfg();
        let mut sched = scheduler_with_ues(1);
        let rnti = Rnti(0x4601);
        let mut new_cfg = ServingCellConfig::default_for_ue(&cell, 0);
        new_cfg.ul_config.sr.as_mut().unwrap().period_slots = 40;
        sched
            .handle_ue_reconfiguration(SchedUeReconfigurationRequest {
                ue_index: UeIndex(0),
                crnti: rnti,
                serving_cell: new_cfg,
                apply_delay_slots: 2,
            })
            .unwrap();
        assert_eq!(sched.nof_procedures(), 1);

        let mut out: Vec<SlotResult> = Vec::new();
        let sl = SlotPoint::new(1, 0);
        for i in 0..3 {
            sched.run_slot(sl + i, &mut out).unwrap();
        }
        // Only the new uplink config remains pooled
        assert_eq!(sched.config_pool().nof_uplink_configs(), 1);
        sched.handle_ue_reconfig_complete(rnti).unwrap();
        assert_eq!(sched.metrics().reconfigs_completed, 1);
        assert_eq!(sched.nof_procedures(), 0);
        assert!(matches!(
            sched.handle_ue_reconfig_complete(rnti),
            Err(SchedulerError::NoProcedure(_))
        ));
    }

    #[test]
    fn test_metrics_merge() {
        let mut a = CellMetrics { dl_acks: 3, dl_nacks: 1, ..Default::default() };
        let b = CellMetrics { dl_acks: 1, ul_crc_ko: 2, ..Default::default() };
        a.merge(&b);
        assert_eq!(a.dl_acks, 4);
        assert_eq!(a.ul_crc_ko, 2);
        assert!((a.dl_bler() - 0.2).abs() < 1e-9);
        assert_eq!(a.ul_bler(), 1.0);
    }
}
