//! Scheduler Configuration Storage
//!
//! Pooled storage of the cell and UE configuration fragments.

pub mod cell;
pub mod pool;

use common::CellIndex;
use interfaces::InterfaceError;
use thiserror::Error;

pub use cell::{DuCellConfigPool, UeConfigHandles, UeConfigView};
pub use pool::{ConfigHandle, ConfigObjectPool};

/// Configuration pool errors
#[derive(Error, Debug)]
pub enum ConfigPoolError {
    #[error("Stale configuration handle {0}")]
    StaleHandle(u32),

    #[error("Configuration for cell {actual} handed to cell {expected}")]
    WrongCell { expected: CellIndex, actual: CellIndex },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] InterfaceError),
}
