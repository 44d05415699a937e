//! Hybrid ARQ
//!
//! Per-UE HARQ process pools for both link directions.

pub mod entity;
pub mod process;

use common::SlotPoint;
use thiserror::Error;

pub use entity::{ExpiredHarq, HarqEntity};
pub use process::{
    DlHarqProcess, HarqDci, HarqGrant, HarqProcess, HarqState, HarqTransition, UlHarqProcess,
    RV_SEQUENCE,
};

/// HARQ errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarqError {
    #[error("HARQ {0} is not empty")]
    NotEmpty(u8),

    #[error("HARQ {0} has no pending retransmission")]
    NoPendingRetx(u8),

    #[error("HARQ {harq_id} TBS mismatch on retransmission: expected {expected}, got {actual}")]
    TbsMismatch { harq_id: u8, expected: u32, actual: u32 },

    #[error("HARQ {harq_id} MCS mismatch on retransmission: expected {expected}, got {actual}")]
    McsMismatch { harq_id: u8, expected: u8, actual: u8 },

    #[error("HARQ {harq_id} PRB count mismatch on retx: expected {expected}, got {actual}")]
    PrbMismatch { harq_id: u8, expected: u16, actual: u16 },

    #[error("HARQ {0} is not waiting for feedback")]
    NotWaitingFeedback(u8),

    #[error("Stale feedback for HARQ {harq_id}")]
    StaleFeedback { harq_id: u8 },

    #[error("Invalid HARQ id {0}")]
    InvalidHarqId(u8),

    #[error("Slot {current} is not after last processed slot {last}")]
    SlotOutOfOrder { last: SlotPoint, current: SlotPoint },

    #[error("Invalid number of HARQ processes: {0}")]
    InvalidPoolSize(usize),
}
