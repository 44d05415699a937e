//! Scheduling Results
//!
//! Per-slot grants and uplink control allocations produced by the scheduler.

use bitflags::bitflags;
use common::{CellIndex, OfdmSymbolRange, PrbInterval, Rnti, SlotPoint};
use serde::{Deserialize, Serialize};

use crate::sched_config::{PucchFormat, PucchFormatParams};

/// Direction of a HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarqDirection {
    Downlink,
    Uplink,
}

bitflags! {
    /// UCI content carried by a PUCCH PDU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct UciFields: u8 {
        const HARQ_ACK = 0x01;
        const SR = 0x02;
        const CSI = 0x04;
    }
}

/// UCI payload size of a PUCCH PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UciBits {
    /// HARQ-ACK bits
    pub harq_ack: u16,
    /// SR bits (0 or 1)
    pub sr: u16,
    /// CSI part 1 bits
    pub csi_part1: u16,
}

impl UciBits {
    pub fn fields(&self) -> UciFields {
        let mut fields = UciFields::empty();
        fields.set(UciFields::HARQ_ACK, self.harq_ack > 0);
        fields.set(UciFields::SR, self.sr > 0);
        fields.set(UciFields::CSI, self.csi_part1 > 0);
        fields
    }

    /// Total UCI payload before CRC attachment
    pub fn total(&self) -> u16 {
        self.harq_ack + self.sr + self.csi_part1
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Time-frequency resources of a PUCCH PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchResources {
    pub prbs: PrbInterval,
    pub second_hop_prbs: Option<PrbInterval>,
    pub symbols: OfdmSymbolRange,
}

/// PUCCH PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchInfo {
    /// Owning UE
    pub rnti: Rnti,
    /// Dedicated resource identity
    pub res_id: u16,
    /// PUCCH format
    pub format: PucchFormat,
    /// Time-frequency resources
    pub resources: PucchResources,
    /// UCI payload carried
    pub uci: UciBits,
    /// Format-specific parameters
    pub params: PucchFormatParams,
}

/// Downlink grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlGrant {
    pub rnti: Rnti,
    pub harq_id: u8,
    /// New data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
    pub is_retx: bool,
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs_bytes: u32,
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    /// PUCCH resource indicator for the HARQ-ACK
    pub pucch_res_indicator: u8,
    /// Slot of the HARQ-ACK
    pub ack_slot: SlotPoint,
}

/// Uplink grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UlGrant {
    pub rnti: Rnti,
    pub harq_id: u8,
    /// New data indicator
    pub ndi: bool,
    /// Redundancy version
    pub rv: u8,
    pub is_retx: bool,
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs_bytes: u32,
    pub prbs: PrbInterval,
    pub symbols: OfdmSymbolRange,
    /// Slot of the PUSCH transmission
    pub pusch_slot: SlotPoint,
}

/// HARQ process dropped after exhausting its retransmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarqDiscard {
    pub rnti: Rnti,
    pub harq_id: u8,
    pub direction: HarqDirection,
}

/// Scheduling decision for one cell and one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotResult {
    pub slot: SlotPoint,
    pub cell_index: CellIndex,
    pub dl_grants: Vec<DlGrant>,
    pub ul_grants: Vec<UlGrant>,
    pub pucchs: Vec<PucchInfo>,
    pub harq_discards: Vec<HarqDiscard>,
}

impl SlotResult {
    pub fn new(slot: SlotPoint, cell_index: CellIndex) -> Self {
        Self {
            slot,
            cell_index,
            dl_grants: Vec::new(),
            ul_grants: Vec::new(),
            pucchs: Vec::new(),
            harq_discards: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dl_grants.is_empty() && self.ul_grants.is_empty() && self.pucchs.is_empty()
    }
}

/// Consumer of scheduling results (PHY adapter, logger, test harness)
pub trait SlotResultSink {
    fn on_slot_result(&mut self, result: &SlotResult);
}

/// Collects every result, used by simulations and tests
impl SlotResultSink for Vec<SlotResult> {
    fn on_slot_result(&mut self, result: &SlotResult) {
        self.push(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uci_fields() {
        let uci = UciBits { harq_ack: 2, sr: 1, csi_part1: 0 };
        assert_eq!(uci.fields(), UciFields::HARQ_ACK | UciFields::SR);
        assert_eq!(uci.total(), 3);
        assert!(UciBits::default().is_empty());
    }

    #[test]
    fn test_slot_result_json() {
        let result = SlotResult::new(SlotPoint::new(1, 42), CellIndex(0));
        assert!(result.is_empty());
        let json = serde_json::to_string(&result).unwrap();
        let back: SlotResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
