//! HARQ Process
//!
//! State machine of a single HARQ process. A process alternates between
//! waiting for feedback and holding a pending retransmission until the
//! transport block is acknowledged or dropped at the retransmission limit.

use bytes::BytesMut;
use common::{OfdmSymbolRange, PrbInterval, SlotPoint};
use tracing::debug;

use super::HarqError;

/// Redundancy version sequence indexed by retransmission count
pub const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

/// HARQ process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqState {
    /// Free for a new transmission
    Empty,
    /// Transmitted, waiting for ACK/CRC
    WaitingFeedback,
    /// NACKed, waiting for a retransmission grant
    PendingRetx,
}

/// Resources and transport format of one (re)transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarqGrant {
    /// Modulation and coding scheme index
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs_bytes: u32,
    /// Allocated PRBs
    pub prbs: PrbInterval,
    /// Allocated symbols
    pub symbols: OfdmSymbolRange,
}

/// DCI fields resulting from a (re)transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarqDci {
    pub harq_id: u8,
    pub ndi: bool,
    pub rv: u8,
    pub mcs: u8,
    pub tbs_bytes: u32,
    pub is_retx: bool,
}

/// Outcome of a HARQ feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqTransition {
    /// Positive feedback, process emptied
    Acked,
    /// Negative feedback, retransmission pending
    RetxPending,
    /// Negative feedback at the retransmission limit, transport block dropped
    Discarded,
}

/// State shared by the DL and UL process variants
#[derive(Debug, Clone)]
pub struct HarqCore {
    id: u8,
    state: HarqState,
    ndi: bool,
    nof_retxs: u8,
    max_nof_retxs: u8,
    slot_tx: Option<SlotPoint>,
    slot_ack: Option<SlotPoint>,
    grant: Option<HarqGrant>,
}

impl HarqCore {
    fn new(id: u8) -> Self {
        Self {
            id,
            state: HarqState::Empty,
            ndi: false,
            nof_retxs: 0,
            max_nof_retxs: 0,
            slot_tx: None,
            slot_ack: None,
            grant: None,
        }
    }

    fn new_tx(
        &mut self,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
        grant: HarqGrant,
        max_nof_retxs: u8,
    ) -> Result<HarqDci, HarqError> {
        if self.state != HarqState::Empty {
            return Err(HarqError::NotEmpty(self.id));
        }
        self.ndi = !self.ndi;
        self.nof_retxs = 0;
        self.max_nof_retxs = max_nof_retxs;
        self.slot_tx = Some(slot_tx);
        self.slot_ack = Some(slot_ack);
        self.grant = Some(grant);
        self.state = HarqState::WaitingFeedback;
        Ok(self.dci(false))
    }

    fn new_retx(
        &mut self,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
        grant: HarqGrant,
    ) -> Result<HarqDci, HarqError> {
        if self.state != HarqState::PendingRetx {
            return Err(HarqError::NoPendingRetx(self.id));
        }
        let stored = self.grant.ok_or(HarqError::NoPendingRetx(self.id))?;

        // Same payload, same transport format
        if grant.tbs_bytes != stored.tbs_bytes {
            return Err(HarqError::TbsMismatch {
                harq_id: self.id,
                expected: stored.tbs_bytes,
                actual: grant.tbs_bytes,
            });
        }
        if grant.mcs != stored.mcs {
            return Err(HarqError::McsMismatch {
                harq_id: self.id,
                expected: stored.mcs,
                actual: grant.mcs,
            });
        }
        if grant.prbs.length() != stored.prbs.length() {
            return Err(HarqError::PrbMismatch {
                harq_id: self.id,
                expected: stored.prbs.length(),
                actual: grant.prbs.length(),
            });
        }

        self.slot_tx = Some(slot_tx);
        self.slot_ack = Some(slot_ack);
        self.grant = Some(grant);
        self.state = HarqState::WaitingFeedback;
        Ok(self.dci(true))
    }

    fn feedback(&mut self, ok: bool) -> Result<HarqTransition, HarqError> {
        if self.state != HarqState::WaitingFeedback {
            return Err(HarqError::NotWaitingFeedback(self.id));
        }
        if ok {
            self.reset();
            return Ok(HarqTransition::Acked);
        }
        if self.nof_retxs < self.max_nof_retxs {
            self.nof_retxs += 1;
            self.state = HarqState::PendingRetx;
            Ok(HarqTransition::RetxPending)
        } else {
            debug!(
                "HARQ {} discarded after {} retransmissions",
                self.id, self.nof_retxs
            );
            self.reset();
            Ok(HarqTransition::Discarded)
        }
    }

    fn reset(&mut self) {
        self.state = HarqState::Empty;
        self.nof_retxs = 0;
        self.slot_tx = None;
        self.slot_ack = None;
    }

    fn dci(&self, is_retx: bool) -> HarqDci {
        let grant = self.grant.unwrap_or(HarqGrant {
            mcs: 0,
            tbs_bytes: 0,
            prbs: PrbInterval::default(),
            symbols: OfdmSymbolRange::default(),
        });
        HarqDci {
            harq_id: self.id,
            ndi: self.ndi,
            rv: self.rv(),
            mcs: grant.mcs,
            tbs_bytes: grant.tbs_bytes,
            is_retx,
        }
    }

    fn rv(&self) -> u8 {
        RV_SEQUENCE[self.nof_retxs as usize % RV_SEQUENCE.len()]
    }
}

/// Read-only view common to both HARQ directions
pub trait HarqProcess {
    fn core(&self) -> &HarqCore;

    /// Process identifier within the pool
    fn id(&self) -> u8 {
        self.core().id
    }

    fn state(&self) -> HarqState {
        self.core().state
    }

    fn is_empty(&self) -> bool {
        self.state() == HarqState::Empty
    }

    fn is_waiting_feedback(&self) -> bool {
        self.state() == HarqState::WaitingFeedback
    }

    fn has_pending_retx(&self) -> bool {
        self.state() == HarqState::PendingRetx
    }

    /// New data indicator of the last new transmission
    fn ndi(&self) -> bool {
        self.core().ndi
    }

    /// Redundancy version of the current attempt
    fn rv(&self) -> u8 {
        self.core().rv()
    }

    fn nof_retxs(&self) -> u8 {
        self.core().nof_retxs
    }

    fn max_nof_retxs(&self) -> u8 {
        self.core().max_nof_retxs
    }

    /// Slot of the last (re)transmission
    fn slot_tx(&self) -> Option<SlotPoint> {
        self.core().slot_tx
    }

    /// Slot at which feedback is expected
    fn slot_ack(&self) -> Option<SlotPoint> {
        self.core().slot_ack
    }

    /// Grant of the last (re)transmission
    fn last_grant(&self) -> Option<&HarqGrant> {
        self.core().grant.as_ref()
    }

    fn mcs(&self) -> Option<u8> {
        self.core().grant.map(|g| g.mcs)
    }

    fn tbs_bytes(&self) -> Option<u32> {
        self.core().grant.map(|g| g.tbs_bytes)
    }
}

/// Downlink HARQ process
#[derive(Debug, Clone)]
pub struct DlHarqProcess {
    core: HarqCore,
}

impl HarqProcess for DlHarqProcess {
    fn core(&self) -> &HarqCore {
        &self.core
    }
}

impl DlHarqProcess {
    pub fn new(id: u8) -> Self {
        Self { core: HarqCore::new(id) }
    }

    /// Start a new transmission with HARQ-ACK expected in `slot_ack`
    pub fn new_tx(
        &mut self,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
        grant: HarqGrant,
        max_nof_retxs: u8,
    ) -> Result<HarqDci, HarqError> {
        self.core.new_tx(slot_tx, slot_ack, grant, max_nof_retxs)
    }

    /// Retransmit the pending transport block
    pub fn new_retx(
        &mut self,
        slot_tx: SlotPoint,
        slot_ack: SlotPoint,
        grant: HarqGrant,
    ) -> Result<HarqDci, HarqError> {
        self.core.new_retx(slot_tx, slot_ack, grant)
    }

    /// Apply a HARQ-ACK bit
    pub fn ack_info(&mut self, ack: bool) -> Result<HarqTransition, HarqError> {
        self.core.feedback(ack)
    }
}

/// Uplink HARQ process
#[derive(Debug, Clone)]
pub struct UlHarqProcess {
    core: HarqCore,
    /// Soft-combining buffer, sized to the transport block while a transmission is in flight
    softbuffer: BytesMut,
}

impl HarqProcess for UlHarqProcess {
    fn core(&self) -> &HarqCore {
        &self.core
    }
}

impl UlHarqProcess {
    pub fn new(id: u8) -> Self {
        Self {
            core: HarqCore::new(id),
            softbuffer: BytesMut::new(),
        }
    }

    /// Start a new transmission on PUSCH in `slot_pusch`; the CRC is expected in the same slot
    pub fn new_tx(
        &mut self,
        slot_pusch: SlotPoint,
        grant: HarqGrant,
        max_nof_retxs: u8,
    ) -> Result<HarqDci, HarqError> {
        let dci = self.core.new_tx(slot_pusch, slot_pusch, grant, max_nof_retxs)?;
        self.softbuffer.clear();
        self.softbuffer.resize(grant.tbs_bytes as usize, 0);
        Ok(dci)
    }

    /// Retransmit the pending transport block, keeping the soft-combining buffer
    pub fn new_retx(
        &mut self,
        slot_pusch: SlotPoint,
        grant: HarqGrant,
    ) -> Result<HarqDci, HarqError> {
        self.core.new_retx(slot_pusch, slot_pusch, grant)
    }

    /// Apply a PUSCH CRC result
    pub fn crc_info(&mut self, crc_ok: bool) -> Result<HarqTransition, HarqError> {
        let transition = self.core.feedback(crc_ok)?;
        if transition != HarqTransition::RetxPending {
            self.softbuffer.clear();
        }
        Ok(transition)
    }

    /// Current soft-combining buffer capacity in bytes
    pub fn softbuffer_len(&self) -> usize {
        self.softbuffer.len()
    }
}
