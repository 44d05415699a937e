//! PUCCH Resource Allocator
//!
//! Keeps, per slot, the UCI demand of every UE (HARQ-ACK bits, SR, CSI bits)
//! and derives the PUCCH PDUs that carry it. Every allocation updates the
//! demand and recomputes the UE's PDUs from scratch:
//!
//! - SR only: the SR resource
//! - up to 2 HARQ-ACK bits: merged onto the SR resource when SR is pending,
//!   otherwise resource set 0 at the UE's PRI
//! - more HARQ-ACK bits, or HARQ-ACK with CSI: resource set 1 at the same PRI
//! - CSI only: the CSI resource, with the SR bit when it fits
//!
//! A failed recomputation leaves the previous demand and PDUs in place.

use common::{Rnti, SlotPoint};
use interfaces::{CsiMeasConfig, PucchInfo, PucchResource, PucchResources, UciBits, UplinkConfig};
use tracing::{debug, trace};

use super::format;
use super::PucchAllocError;

/// Maximum number of PUCCH PDUs in one slot of one cell
pub const MAX_PUCCH_PDUS_PER_SLOT: usize = 32;

/// UCI a UE must report in one slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UciDemand {
    pub harq_ack_bits: u16,
    pub sr: bool,
    pub csi_part1_bits: u16,
}

/// Configuration fragments the allocator reads for one UE
#[derive(Debug, Clone, Copy)]
pub struct PucchUeConfig<'a> {
    pub uplink: &'a UplinkConfig,
    pub csi: Option<&'a CsiMeasConfig>,
}

#[derive(Debug, Clone)]
struct UePucchEntry {
    rnti: Rnti,
    demand: UciDemand,
    /// PUCCH resource indicator handed out with the first HARQ-ACK of the slot
    pri: Option<u8>,
    pdus: Vec<PucchInfo>,
    /// Resource ids held by this UE, including both sets at its PRI
    reserved: Vec<u16>,
}

/// PUCCH bookkeeping of one slot of one cell
#[derive(Debug, Clone, Default)]
pub struct PucchSlotState {
    slot: Option<SlotPoint>,
    ues: Vec<UePucchEntry>,
}

impl PucchSlotState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every allocation and retag the state for `slot`
    pub fn reset(&mut self, slot: SlotPoint) {
        self.slot = Some(slot);
        self.ues.clear();
    }

    pub fn slot(&self) -> Option<SlotPoint> {
        self.slot
    }

    /// PUCCH PDUs of `rnti`
    pub fn ue_pdus(&self, rnti: Rnti) -> &[PucchInfo] {
        self.entry(rnti).map(|e| e.pdus.as_slice()).unwrap_or(&[])
    }

    /// PRI assigned to `rnti`, if it has HARQ-ACK in this slot
    pub fn ue_pri(&self, rnti: Rnti) -> Option<u8> {
        self.entry(rnti).and_then(|e| e.pri)
    }

    pub fn ue_demand(&self, rnti: Rnti) -> UciDemand {
        self.entry(rnti).map(|e| e.demand).unwrap_or_default()
    }

    /// All PDUs of the slot
    pub fn pdus(&self) -> impl Iterator<Item = &PucchInfo> {
        self.ues.iter().flat_map(|e| e.pdus.iter())
    }

    pub fn nof_pdus(&self) -> usize {
        self.ues.iter().map(|e| e.pdus.len()).sum()
    }

    fn entry(&self, rnti: Rnti) -> Option<&UePucchEntry> {
        self.ues.iter().find(|e| e.rnti == rnti)
    }

    fn is_busy(&self, res_id: u16, requester: Rnti) -> bool {
        self.ues
            .iter()
            .any(|e| e.rnti != requester && e.reserved.contains(&res_id))
    }

    fn nof_pdus_except(&self, rnti: Rnti) -> usize {
        self.ues
            .iter()
            .filter(|e| e.rnti != rnti)
            .map(|e| e.pdus.len())
            .sum()
    }
}

/// PUCCH allocator of one cell
#[derive(Debug, Clone)]
pub struct PucchAllocator {
    max_pdus_per_slot: usize,
}

impl Default for PucchAllocator {
    fn default() -> Self {
        Self::new(MAX_PUCCH_PDUS_PER_SLOT)
    }
}

impl PucchAllocator {
    pub fn new(max_pdus_per_slot: usize) -> Self {
        Self { max_pdus_per_slot }
    }

    /// Add the SR opportunity of `rnti` to the slot
    pub fn alloc_sr_opportunity(
        &self,
        state: &mut PucchSlotState,
        rnti: Rnti,
        cfg: PucchUeConfig<'_>,
    ) -> Result<(), PucchAllocError> {
        if cfg.uplink.sr.is_none() {
            return Err(PucchAllocError::NotConfigured("SR"));
        }
        self.update(state, rnti, cfg, |d| d.sr = true).map(|_| ())
    }

    /// Add the periodic CSI report of `rnti` to the slot
    pub fn alloc_csi_opportunity(
        &self,
        state: &mut PucchSlotState,
        rnti: Rnti,
        cfg: PucchUeConfig<'_>,
    ) -> Result<(), PucchAllocError> {
        let csi_bits = cfg
            .csi
            .map(|c| c.csi_part1_bits)
            .ok_or(PucchAllocError::NotConfigured("CSI report"))?;
        self.update(state, rnti, cfg, |d| d.csi_part1_bits = csi_bits).map(|_| ())
    }

    /// Add one HARQ-ACK bit for `rnti` and return the PUCCH resource indicator to
    /// signal in the DCI.
    ///
    /// The indicator stays the same for every HARQ-ACK bit of the UE in this slot.
    pub fn alloc_harq_ack(
        &self,
        state: &mut PucchSlotState,
        rnti: Rnti,
        cfg: PucchUeConfig<'_>,
    ) -> Result<u8, PucchAllocError> {
        let pri = self.update(state, rnti, cfg, |d| d.harq_ack_bits += 1)?;
        pri.ok_or(PucchAllocError::NoFreeResource(rnti))
    }

    /// HARQ-ACK bits currently allocated to `rnti`
    pub fn harq_ack_bits(&self, state: &PucchSlotState, rnti: Rnti) -> u16 {
        state.ue_demand(rnti).harq_ack_bits
    }

    /// Remove every allocation of `rnti` from the slot
    pub fn remove_ue(&self, state: &mut PucchSlotState, rnti: Rnti) -> bool {
        let before = state.ues.len();
        state.ues.retain(|e| e.rnti != rnti);
        state.ues.len() != before
    }

    fn update<F>(
        &self,
        state: &mut PucchSlotState,
        rnti: Rnti,
        cfg: PucchUeConfig<'_>,
        change: F,
    ) -> Result<Option<u8>, PucchAllocError>
    where
        F: FnOnce(&mut UciDemand),
    {
        // 1. New demand
        let (mut demand, mut pri) = state
            .entry(rnti)
            .map(|e| (e.demand, e.pri))
            .unwrap_or_default();
        let previous = demand;
        change(&mut demand);
        if demand == previous && state.entry(rnti).is_some() {
            return Ok(pri);
        }

        // 2. A PRI is picked once per slot and kept
        if demand.harq_ack_bits > 0 && pri.is_none() {
            pri = Some(self.select_pri(state, rnti, cfg)?);
        }

        // 3. Recompute the UE's PDUs
        let pdus = self.plan(rnti, demand, pri, cfg).map_err(|err| {
            debug!(
                "rnti={} slot={:?} PUCCH allocation failed for {:?}: {}",
                rnti, state.slot, demand, err
            );
            err
        })?;

        let mut reserved: Vec<u16> = pdus.iter().map(|p| p.res_id).collect();
        if let Some(k) = pri {
            reserved.extend(harq_set_resources(cfg, k));
        }
        if let Some(res_id) = reserved.iter().copied().find(|&id| state.is_busy(id, rnti)) {
            debug!(
                "rnti={} slot={:?} PUCCH resource {} already in use",
                rnti, state.slot, res_id
            );
            return Err(PucchAllocError::ResourceBusy(res_id));
        }

        let nof_pdus = state.nof_pdus_except(rnti) + pdus.len();
        if nof_pdus > self.max_pdus_per_slot {
            return Err(PucchAllocError::GridFull(self.max_pdus_per_slot));
        }

        // 4. Commit
        trace!(
            "rnti={} slot={:?} PUCCH demand {:?} -> {} PDU(s), pri={:?}",
            rnti,
            state.slot,
            demand,
            pdus.len(),
            pri
        );
        let entry = UePucchEntry { rnti, demand, pri, pdus, reserved };
        match state.ues.iter_mut().find(|e| e.rnti == rnti) {
            Some(existing) => *existing = entry,
            None => state.ues.push(entry),
        }
        Ok(pri)
    }

    fn select_pri(
        &self,
        state: &PucchSlotState,
        rnti: Rnti,
        cfg: PucchUeConfig<'_>,
    ) -> Result<u8, PucchAllocError> {
        (0..cfg.uplink.pucch.nof_pri() as u8)
            .find(|&k| harq_set_resources(cfg, k).all(|id| !state.is_busy(id, rnti)))
            .ok_or_else(|| {
                debug!("rnti={} slot={:?} no free PUCCH resource indicator", rnti, state.slot);
                PucchAllocError::NoFreeResource(rnti)
            })
    }

    fn plan(
        &self,
        rnti: Rnti,
        demand: UciDemand,
        pri: Option<u8>,
        cfg: PucchUeConfig<'_>,
    ) -> Result<Vec<PucchInfo>, PucchAllocError> {
        let sr_bit = demand.sr as u16;
        let harq = demand.harq_ack_bits;
        let csi = demand.csi_part1_bits;

        // SR only
        if harq == 0 && csi == 0 {
            if !demand.sr {
                return Ok(Vec::new());
            }
            let res = sr_resource(cfg)?;
            return Ok(vec![make_pdu(rnti, res, UciBits { harq_ack: 0, sr: 1, csi_part1: 0 })]);
        }

        // HARQ-ACK, possibly with SR
        if csi == 0 {
            return Ok(vec![self.plan_harq(rnti, demand, pri, cfg)?]);
        }

        let csi_res = csi_resource(cfg)?;

        // CSI, possibly with SR
        if harq == 0 {
            let all = UciBits { harq_ack: 0, sr: sr_bit, csi_part1: csi };
            if format::fits(csi_res, &all) {
                return Ok(vec![make_pdu(rnti, csi_res, all)]);
            }
            let csi_only = UciBits { sr: 0, ..all };
            if !format::fits(csi_res, &csi_only) {
                return Err(PucchAllocError::CapacityExceeded { bits: csi });
            }
            let sr_res = sr_resource(cfg)?;
            return Ok(vec![
                make_pdu(rnti, csi_res, csi_only),
                make_pdu(rnti, sr_res, UciBits { harq_ack: 0, sr: 1, csi_part1: 0 }),
            ]);
        }

        // HARQ-ACK and CSI: multiplexed on set 1 when capacity allows
        let k = pri.ok_or(PucchAllocError::NoFreeResource(rnti))?;
        let all = UciBits { harq_ack: harq, sr: sr_bit, csi_part1: csi };
        if let Some(res) = set_resource(cfg, &cfg.uplink.pucch.resource_set_1, k)? {
            if format::fits(res, &all) {
                return Ok(vec![make_pdu(rnti, res, all)]);
            }
        }
        let harq_pdu = self.plan_harq(rnti, UciDemand { csi_part1_bits: 0, ..demand }, pri, cfg)?;
        let csi_only = UciBits { harq_ack: 0, sr: 0, csi_part1: csi };
        if !format::fits(csi_res, &csi_only) {
            return Err(PucchAllocError::CapacityExceeded { bits: all.total() });
        }
        Ok(vec![harq_pdu, make_pdu(rnti, csi_res, csi_only)])
    }

    fn plan_harq(
        &self,
        rnti: Rnti,
        demand: UciDemand,
        pri: Option<u8>,
        cfg: PucchUeConfig<'_>,
    ) -> Result<PucchInfo, PucchAllocError> {
        let uci = UciBits {
            harq_ack: demand.harq_ack_bits,
            sr: demand.sr as u16,
            csi_part1: 0,
        };
        if demand.sr && uci.harq_ack <= format::MAX_HARQ_BITS_FORMAT_0_1 {
            let res = sr_resource(cfg)?;
            if format::fits(res, &uci) {
                return Ok(make_pdu(rnti, res, uci));
            }
        }

        let k = pri.ok_or(PucchAllocError::NoFreeResource(rnti))?;
        let set = if uci.harq_ack <= format::MAX_HARQ_BITS_FORMAT_0_1 {
            &cfg.uplink.pucch.resource_set_0
        } else {
            &cfg.uplink.pucch.resource_set_1
        };
        let res = set_resource(cfg, set, k)?
            .ok_or(PucchAllocError::CapacityExceeded { bits: uci.total() })?;
        if !format::fits(res, &uci) {
            return Err(PucchAllocError::CapacityExceeded { bits: uci.total() });
        }
        Ok(make_pdu(rnti, res, uci))
    }
}

fn harq_set_resources(cfg: PucchUeConfig<'_>, pri: u8) -> impl Iterator<Item = u16> + '_ {
    let pucch = &cfg.uplink.pucch;
    [&pucch.resource_set_0, &pucch.resource_set_1]
        .into_iter()
        .filter_map(move |set| set.get(pri as usize).copied())
}

fn set_resource<'a>(
    cfg: PucchUeConfig<'a>,
    set: &[u16],
    pri: u8,
) -> Result<Option<&'a PucchResource>, PucchAllocError> {
    match set.get(pri as usize) {
        Some(&res_id) => cfg
            .uplink
            .pucch
            .resource(res_id)
            .map(Some)
            .ok_or(PucchAllocError::UnknownResource(res_id)),
        None => Ok(None),
    }
}

fn sr_resource(cfg: PucchUeConfig<'_>) -> Result<&PucchResource, PucchAllocError> {
    let sr = cfg.uplink.sr.as_ref().ok_or(PucchAllocError::NotConfigured("SR"))?;
    cfg.uplink
        .pucch
        .resource(sr.pucch_res_id)
        .ok_or(PucchAllocError::UnknownResource(sr.pucch_res_id))
}

fn csi_resource(cfg: PucchUeConfig<'_>) -> Result<&PucchResource, PucchAllocError> {
    let csi = cfg.csi.ok_or(PucchAllocError::NotConfigured("CSI report"))?;
    cfg.uplink
        .pucch
        .resource(csi.pucch_res_id)
        .ok_or(PucchAllocError::UnknownResource(csi.pucch_res_id))
}

fn make_pdu(rnti: Rnti, res: &PucchResource, uci: UciBits) -> PucchInfo {
    PucchInfo {
        rnti,
        res_id: res.res_id,
        format: res.format(),
        resources: PucchResources {
            prbs: res.prbs,
            second_hop_prbs: res.second_hop_prbs(),
            symbols: res.symbols,
        },
        uci,
        params: res.params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CellIndex, Pci, SubcarrierSpacing};
    use interfaces::{PucchFormat, SchedCellConfigurationRequest, ServingCellConfig};

    fn ue_cfg(position: u16) -> ServingCellConfig {
        let cell =
            SchedCellConfigurationRequest::new(CellIndex(0), Pci(1), SubcarrierSpacing::Scs30, 51);
        ServingCellConfig::default_for_ue(&cell, position)
    }

    fn view(cfg: &ServingCellConfig) -> PucchUeConfig<'_> {
        PucchUeConfig {
            uplink: &cfg.ul_config,
            csi: cfg.csi_meas.as_ref(),
        }
    }

    fn state() -> PucchSlotState {
        let mut state = PucchSlotState::new();
        state.reset(SlotPoint::new(1, 10));
        state
    }

    const RNTI: Rnti = Rnti(0x4601);

    #[test]
    fn test_sr_only() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_sr_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].format, PucchFormat::Format1);
        assert_eq!(pdus[0].uci, UciBits { harq_ack: 0, sr: 1, csi_part1: 0 });
        assert_eq!(pdus[0].res_id, cfg.ul_config.sr.as_ref().unwrap().pucch_res_id);
    }

    #[test]
    fn test_harq_merged_onto_sr_resource() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_sr_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].res_id, cfg.ul_config.sr.as_ref().unwrap().pucch_res_id);
        assert_eq!(pdus[0].uci.harq_ack, 1);
        assert_eq!(pdus[0].uci.sr, 1);
    }

    #[test]
    fn test_harq_upgrade_keeps_pri() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();

        let pri1 = alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        assert_eq!(st.ue_pdus(RNTI)[0].format, PucchFormat::Format1);
        let pri2 = alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        assert_eq!(st.ue_pdus(RNTI)[0].format, PucchFormat::Format1);
        let pri3 = alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();

        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].format, PucchFormat::Format3);
        assert_eq!(pdus[0].res_id, cfg.ul_config.pucch.resource_set_1[pri1 as usize]);
        assert_eq!(pri1, pri2);
        assert_eq!(pri1, pri3);
        assert_eq!(alloc.harq_ack_bits(&st, RNTI), 3);
    }

    #[test]
    fn test_pri_taken_by_other_ue() {
        let cfg_a = ue_cfg(0);
        let cfg_b = ue_cfg(1);
        let alloc = PucchAllocator::default();
        let mut st = state();
        assert_eq!(alloc.alloc_harq_ack(&mut st, Rnti(0x4601), view(&cfg_a)), Ok(0));
        assert_eq!(alloc.alloc_harq_ack(&mut st, Rnti(0x4602), view(&cfg_b)), Ok(1));
        // Upgrade of the first UE stays on its own PRI
        alloc.alloc_harq_ack(&mut st, Rnti(0x4601), view(&cfg_a)).unwrap();
        assert_eq!(alloc.alloc_harq_ack(&mut st, Rnti(0x4601), view(&cfg_a)), Ok(0));
    }

    #[test]
    fn test_pri_exhaustion() {
        let alloc = PucchAllocator::default();
        let mut st = state();
        for i in 0..8u16 {
            let cfg = ue_cfg(i);
            assert_eq!(alloc.alloc_harq_ack(&mut st, Rnti(0x4601 + i), view(&cfg)), Ok(i as u8));
        }
        let cfg = ue_cfg(8);
        assert_eq!(
            alloc.alloc_harq_ack(&mut st, Rnti(0x4700), view(&cfg)),
            Err(PucchAllocError::NoFreeResource(Rnti(0x4700)))
        );
        assert!(st.ue_pdus(Rnti(0x4700)).is_empty());
    }

    #[test]
    fn test_csi_with_harq_multiplexed_on_set1() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        let pri = alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        alloc.alloc_csi_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].res_id, cfg.ul_config.pucch.resource_set_1[pri as usize]);
        assert_eq!(pdus[0].uci, UciBits { harq_ack: 1, sr: 0, csi_part1: 4 });
    }

    #[test]
    fn test_csi_then_harq_multiplexed() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_csi_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        assert_eq!(st.ue_pdus(RNTI)[0].res_id, cfg.csi_meas.as_ref().unwrap().pucch_res_id);
        let pri = alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].res_id, cfg.ul_config.pucch.resource_set_1[pri as usize]);
        assert_eq!(pdus[0].uci.csi_part1, 4);
    }

    #[test]
    fn test_csi_and_sr() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_sr_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        alloc.alloc_csi_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].format, PucchFormat::Format3);
        assert_eq!(pdus[0].uci, UciBits { harq_ack: 0, sr: 1, csi_part1: 4 });
    }

    #[test]
    fn test_capacity_exceeded_rolls_back() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_csi_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        // Set 1 carries 12 bits: 4 CSI + 8 HARQ-ACK fit, the 9th bit forces separate resources
        for _ in 0..8 {
            alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        }
        assert_eq!(st.ue_pdus(RNTI).len(), 1);
        alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        assert_eq!(st.ue_pdus(RNTI).len(), 2);

        // Beyond what set 1 carries on its own
        for _ in 9..12 {
            alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        }
        let before = st.ue_pdus(RNTI).to_vec();
        assert!(matches!(
            alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)),
            Err(PucchAllocError::CapacityExceeded { .. })
        ));
        assert_eq!(alloc.harq_ack_bits(&st, RNTI), 12);
        assert_eq!(st.ue_pdus(RNTI), before.as_slice());
    }

    #[test]
    fn test_oversized_csi_leaves_harq_and_sr_untouched() {
        let mut cfg = ue_cfg(0);
        cfg.csi_meas.as_mut().unwrap().csi_part1_bits = 16;
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_sr_opportunity(&mut st, RNTI, view(&cfg)).unwrap();
        let pri = alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)).unwrap();
        let before = st.ue_pdus(RNTI).to_vec();
        assert_eq!(before.len(), 1);

        // 16 CSI bits fit neither set 1 with HARQ-ACK and SR nor the CSI resource alone
        assert_eq!(
            alloc.alloc_csi_opportunity(&mut st, RNTI, view(&cfg)),
            Err(PucchAllocError::CapacityExceeded { bits: 18 })
        );
        assert_eq!(st.ue_pdus(RNTI), before.as_slice());
        assert_eq!(st.ue_demand(RNTI).csi_part1_bits, 0);
        assert_eq!(st.ue_pri(RNTI), Some(pri));

        assert_eq!(alloc.alloc_harq_ack(&mut st, RNTI, view(&cfg)), Ok(pri));
        let pdus = st.ue_pdus(RNTI);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].uci, UciBits { harq_ack: 2, sr: 1, csi_part1: 0 });
    }

    #[test]
    fn test_csi_resource_busy() {
        let cfg_a = ue_cfg(0);
        let mut cfg_b = ue_cfg(1);
        let csi_res_id = cfg_a.csi_meas.as_ref().unwrap().pucch_res_id;
        cfg_b.csi_meas.as_mut().unwrap().pucch_res_id = csi_res_id;
        cfg_b.ul_config.pucch = cfg_a.ul_config.pucch.clone();
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_csi_opportunity(&mut st, Rnti(0x4601), view(&cfg_a)).unwrap();
        let res_id = cfg_a.csi_meas.as_ref().unwrap().pucch_res_id;
        assert_eq!(
            alloc.alloc_csi_opportunity(&mut st, Rnti(0x4602), view(&cfg_b)),
            Err(PucchAllocError::ResourceBusy(res_id))
        );
        assert!(st.ue_pdus(Rnti(0x4602)).is_empty());
    }

    #[test]
    fn test_not_configured() {
        let mut cfg = ue_cfg(0);
        cfg.ul_config.sr = None;
        cfg.csi_meas = None;
        let alloc = PucchAllocator::default();
        let mut st = state();
        assert_eq!(
            alloc.alloc_sr_opportunity(&mut st, RNTI, view(&cfg)),
            Err(PucchAllocError::NotConfigured("SR"))
        );
        assert!(alloc.alloc_csi_opportunity(&mut st, RNTI, view(&cfg)).is_err());
    }

    #[test]
    fn test_slot_pdu_limit() {
        let alloc = PucchAllocator::new(2);
        let mut st = state();
        for i in 0..2u16 {
            let cfg = ue_cfg(i);
            alloc.alloc_sr_opportunity(&mut st, Rnti(0x4601 + i), view(&cfg)).unwrap();
        }
        let cfg = ue_cfg(2);
        assert_eq!(
            alloc.alloc_sr_opportunity(&mut st, Rnti(0x4603), view(&cfg)),
            Err(PucchAllocError::GridFull(2))
        );
        assert_eq!(st.nof_pdus(), 2);
    }

    #[test]
    fn test_remove_ue_frees_pri() {
        let cfg = ue_cfg(0);
        let alloc = PucchAllocator::default();
        let mut st = state();
        alloc.alloc_harq_ack(&mut st, Rnti(0x4601), view(&cfg)).unwrap();
        assert!(alloc.remove_ue(&mut st, Rnti(0x4601)));
        assert!(!alloc.remove_ue(&mut st, Rnti(0x4601)));
        let cfg_b = ue_cfg(1);
        assert_eq!(alloc.alloc_harq_ack(&mut st, Rnti(0x4602), view(&cfg_b)), Ok(0));
    }
}
