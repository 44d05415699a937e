//! PUCCH Allocation
//!
//! Placement of SR, HARQ-ACK and CSI on the dedicated PUCCH resources of each UE

pub mod allocator;
pub mod format;

use common::Rnti;
use thiserror::Error;

pub use allocator::{
    PucchAllocator, PucchSlotState, PucchUeConfig, UciDemand, MAX_PUCCH_PDUS_PER_SLOT,
};

/// PUCCH allocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PucchAllocError {
    #[error("No free PUCCH resource indicator for rnti {0}")]
    NoFreeResource(Rnti),

    #[error("UCI payload of {bits} bits exceeds the PUCCH capacity")]
    CapacityExceeded { bits: u16 },

    #[error("PUCCH resource {0} is used by another UE")]
    ResourceBusy(u16),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Unknown PUCCH resource {0}")]
    UnknownResource(u16),

    #[error("Slot already holds {0} PUCCH PDUs")]
    GridFull(usize),
}
