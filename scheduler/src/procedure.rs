//! UE Reconfiguration Procedure
//!
//! Multi-slot procedure that applies a new serving cell configuration to a UE
//! and waits for the UE to confirm it. The procedure is a plain state machine
//! driven by the cell scheduler through [`UeReconfigProcedure::resume`].

use common::{Rnti, SlotPoint};
use interfaces::SchedUeReconfigurationRequest;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Procedure errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcedureError {
    #[error("Event {event:?} not expected in state {state:?}")]
    UnexpectedEvent { state: ReconfigState, event: ProcedureEvent },

    #[error("Procedure for rnti {0} already finished")]
    AlreadyFinished(Rnti),
}

/// Suspension points of the procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigState {
    /// Waiting for the slot at which the new configuration takes effect
    AwaitingApplySlot { apply_at: SlotPoint },
    /// Waiting for the owner to apply the configuration
    ApplyingConfig { slot: SlotPoint },
    /// Waiting for the UE to confirm the new configuration
    AwaitingUeConfirmation { deadline: SlotPoint },
    /// Finished, successfully or not
    Finished { success: bool },
}

/// Events that resume the procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureEvent {
    SlotIndication(SlotPoint),
    ConfigApplied,
    UeConfirmed,
}

/// What the owner must do after a resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureStep {
    /// Nothing to do, still suspended
    Pending,
    /// Apply the requested configuration, then resume with `ConfigApplied`
    ApplyConfig,
    /// UE confirmed the configuration
    Completed,
    /// UE did not confirm in time
    TimedOut,
}

/// Reconfiguration of one UE
#[derive(Debug, Clone)]
pub struct UeReconfigProcedure {
    request: SchedUeReconfigurationRequest,
    state: ReconfigState,
    timeout_slots: u32,
}

impl UeReconfigProcedure {
    /// Start the procedure in slot `now`
    pub fn new(request: SchedUeReconfigurationRequest, now: SlotPoint, timeout_slots: u32) -> Self {
        let apply_at = now + request.apply_delay_slots;
        info!(
            "rnti={} Reconfiguration started, applying at slot {}",
            request.crnti, apply_at
        );
        Self {
            request,
            state: ReconfigState::AwaitingApplySlot { apply_at },
            timeout_slots,
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.request.crnti
    }

    pub fn request(&self) -> &SchedUeReconfigurationRequest {
        &self.request
    }

    pub fn state(&self) -> ReconfigState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ReconfigState::Finished { .. })
    }

    /// Advance the procedure with `event`
    pub fn resume(&mut self, event: ProcedureEvent) -> Result<ProcedureStep, ProcedureError> {
        let rnti = self.rnti();
        let (next, step) = match (self.state, event) {
            (ReconfigState::Finished { .. }, _) => {
                return Err(ProcedureError::AlreadyFinished(rnti));
            }

            (
                ReconfigState::AwaitingApplySlot { apply_at },
                ProcedureEvent::SlotIndication(slot),
            ) => {
                if slot >= apply_at {
                    (ReconfigState::ApplyingConfig { slot }, ProcedureStep::ApplyConfig)
                } else {
                    (self.state, ProcedureStep::Pending)
                }
            }

            (ReconfigState::ApplyingConfig { slot }, ProcedureEvent::ConfigApplied) => {
                debug!("rnti={} Reconfiguration applied at slot {}", rnti, slot);
                let deadline = slot + self.timeout_slots;
                (ReconfigState::AwaitingUeConfirmation { deadline }, ProcedureStep::Pending)
            }

            (ReconfigState::AwaitingUeConfirmation { .. }, ProcedureEvent::UeConfirmed) => {
                info!("rnti={} Reconfiguration complete", rnti);
                (ReconfigState::Finished { success: true }, ProcedureStep::Completed)
            }

            (
                ReconfigState::AwaitingUeConfirmation { deadline },
                ProcedureEvent::SlotIndication(slot),
            ) => {
                if slot > deadline {
                    warn!("rnti={} Reconfiguration not confirmed by slot {}", rnti, deadline);
                    (ReconfigState::Finished { success: false }, ProcedureStep::TimedOut)
                } else {
                    (self.state, ProcedureStep::Pending)
                }
            }

            // Slots keep ticking while the owner applies the configuration
            (ReconfigState::ApplyingConfig { .. }, ProcedureEvent::SlotIndication(_)) => {
                (self.state, ProcedureStep::Pending)
            }

            (state, event) => return Err(ProcedureError::UnexpectedEvent { state, event }),
        };
        self.state = next;
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CellIndex, Pci, SubcarrierSpacing, UeIndex};
    use interfaces::{SchedCellConfigurationRequest, ServingCellConfig};

    fn request(delay: u32) -> SchedUeReconfigurationRequest {
        let cell =
            SchedCellConfigurationRequest::new(CellIndex(0), Pci(1), SubcarrierSpacing::Scs30, 51);
        SchedUeReconfigurationRequest {
            ue_index: UeIndex(0),
            crnti: Rnti(0x4601),
            serving_cell: ServingCellConfig::default_for_ue(&cell, 0),
            apply_delay_slots: delay,
        }
    }

    #[test]
    fn test_happy_path() {
        let sl = SlotPoint::new(1, 0);
        let mut proc = UeReconfigProcedure::new(request(2), sl, 10);
        assert_eq!(proc.resume(ProcedureEvent::SlotIndication(sl + 1)), Ok(ProcedureStep::Pending));
        assert_eq!(
            proc.resume(ProcedureEvent::SlotIndication(sl + 2)),
            Ok(ProcedureStep::ApplyConfig)
        );
        assert_eq!(proc.state(), ReconfigState::ApplyingConfig { slot: sl + 2 });
        assert_eq!(proc.resume(ProcedureEvent::ConfigApplied), Ok(ProcedureStep::Pending));
        assert_eq!(
            proc.state(),
            ReconfigState::AwaitingUeConfirmation { deadline: sl + 12 }
        );
        assert_eq!(proc.resume(ProcedureEvent::UeConfirmed), Ok(ProcedureStep::Completed));
        assert!(proc.is_finished());
        assert_eq!(
            proc.resume(ProcedureEvent::UeConfirmed),
            Err(ProcedureError::AlreadyFinished(Rnti(0x4601)))
        );
    }

    #[test]
    fn test_confirmation_timeout() {
        let sl = SlotPoint::new(0, 50);
        let mut proc = UeReconfigProcedure::new(request(0), sl, 4);
        assert_eq!(proc.resume(ProcedureEvent::SlotIndication(sl)), Ok(ProcedureStep::ApplyConfig));
        proc.resume(ProcedureEvent::ConfigApplied).unwrap();
        for i in 1..=4 {
            assert_eq!(
                proc.resume(ProcedureEvent::SlotIndication(sl + i)),
                Ok(ProcedureStep::Pending)
            );
        }
        assert_eq!(
            proc.resume(ProcedureEvent::SlotIndication(sl + 5)),
            Ok(ProcedureStep::TimedOut)
        );
        assert_eq!(proc.state(), ReconfigState::Finished { success: false });
    }

    #[test]
    fn test_unexpected_event() {
        let sl = SlotPoint::new(0, 0);
        let mut proc = UeReconfigProcedure::new(request(3), sl, 4);
        assert!(matches!(
            proc.resume(ProcedureEvent::UeConfirmed),
            Err(ProcedureError::UnexpectedEvent { .. })
        ));
        // State unchanged
        assert_eq!(proc.state(), ReconfigState::AwaitingApplySlot { apply_at: sl + 3 });
    }
}
