//! PHY Feedback Indications
//!
//! Uplink control and data decoding results reported back to the scheduler.

use bytes::Bytes;
use common::{Rnti, SlotPoint};
use serde::{Deserialize, Serialize};

/// HARQ-ACK bit for one downlink HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarqAckReport {
    /// Downlink HARQ process identifier
    pub harq_id: u8,
    /// ACK (true) or NACK (false)
    pub ack: bool,
}

/// Decoded CSI part 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiReport {
    /// Wideband channel quality indicator
    pub cqi: u8,
    /// Rank indicator
    pub ri: u8,
}

/// UCI decoded on PUCCH in a given slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UciIndication {
    /// Slot in which the UCI was received
    pub slot: SlotPoint,
    /// Reporting UE
    pub rnti: Rnti,
    /// HARQ-ACK bits
    #[serde(default)]
    pub harq_acks: Vec<HarqAckReport>,
    /// Positive scheduling request
    #[serde(default)]
    pub sr_detected: bool,
    /// CSI report, if one was decoded
    #[serde(default)]
    pub csi: Option<CsiReport>,
}

/// PUSCH decoding result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrcIndication {
    /// Slot in which the PUSCH was received
    pub slot: SlotPoint,
    /// Transmitting UE
    pub rnti: Rnti,
    /// Uplink HARQ process identifier
    pub harq_id: u8,
    /// CRC check result
    pub crc_ok: bool,
    /// Decoded transport block, if CRC passed
    #[serde(skip)]
    pub payload: Option<Bytes>,
}

/// Entry point for PHY and MAC feedback into the scheduler
pub trait SchedFeedbackHandler {
    type Error;

    /// Process decoded UCI
    fn handle_uci_indication(&mut self, uci: &UciIndication) -> Result<(), Self::Error>;

    /// Process a PUSCH CRC result
    fn handle_crc_indication(&mut self, crc: &CrcIndication) -> Result<(), Self::Error>;

    /// Update the pending downlink data for a UE
    fn handle_dl_buffer_state(&mut self, rnti: Rnti, pending_bytes: u32) -> Result<(), Self::Error>;

    /// Update the uplink buffer status reported by a UE
    fn handle_ul_bsr(&mut self, rnti: Rnti, pending_bytes: u32) -> Result<(), Self::Error>;
}
