//! MAC Scheduler
//!
//! Slot-based downlink and uplink scheduler of a gNB cell: HARQ process
//! management, PUCCH allocation for uplink control, pooled UE configuration
//! and the barrier that keeps cell workers on the same slot.

pub mod cell_scheduler;
pub mod config;
pub mod grid;
pub mod harq;
pub mod mcs;
pub mod procedure;
pub mod pucch;
pub mod rnti;
pub mod slot_sync;

use common::{Rnti, SlotPoint};
use interfaces::InterfaceError;
use thiserror::Error;

pub use cell_scheduler::{CellMetrics, CellScheduler, SchedulerExpertConfig};
pub use config::{ConfigPoolError, DuCellConfigPool};
pub use grid::{CellResourceAllocator, GridError, RING_SIZE};
pub use harq::{HarqEntity, HarqError};
pub use procedure::{ProcedureError, UeReconfigProcedure};
pub use pucch::{PucchAllocError, PucchAllocator};
pub use rnti::RntiManager;
pub use slot_sync::SlotSyncPoint;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("HARQ error: {0}")]
    Harq(#[from] HarqError),

    #[error("PUCCH allocation error: {0}")]
    Pucch(#[from] PucchAllocError),

    #[error("Configuration pool error: {0}")]
    ConfigPool(#[from] ConfigPoolError),

    #[error("Procedure error: {0}")]
    Procedure(#[from] ProcedureError),

    #[error("Resource grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),

    #[error("Unknown UE rnti={0}")]
    UnknownUe(Rnti),

    #[error("UE rnti={0} already exists")]
    DuplicateUe(Rnti),

    #[error("No procedure running for rnti={0}")]
    NoProcedure(Rnti),

    #[error("A procedure is already running for rnti={0}")]
    ProcedureInProgress(Rnti),

    #[error("Slot {current} is not after {last}")]
    SlotOutOfOrder { last: SlotPoint, current: SlotPoint },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
