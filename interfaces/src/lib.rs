//! Scheduler Collaborator Interfaces Library
//!
//! This crate defines the narrow contracts between the scheduler core and its
//! collaborators: configuration requests coming in, PHY feedback coming in, and
//! per-slot scheduling results going out.

pub mod feedback;
pub mod sched_config;
pub mod sched_result;

use thiserror::Error;

pub use feedback::{CrcIndication, CsiReport, HarqAckReport, SchedFeedbackHandler, UciIndication};
pub use sched_config::*;
pub use sched_result::*;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown PUCCH resource id {0}")]
    UnknownPucchResource(u16),
}
