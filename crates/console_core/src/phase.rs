//! Workflow phase state machine.
//!
//! The local phase only advances when a confirming `STATUS_OK` arrives for a
//! command that was already acknowledged. A status that beats its own
//! acknowledgment is deferred and does not mutate state. EMERGENCY and STOP
//! are treated optimistically at send time; an explicit peer rejection lifts
//! the local lockout again.

use shared::domain::{CommandKind, Phase, StatusCode};
use shared::protocol::StatusContext;
use tracing::warn;

use crate::correlator::Correlator;

/// Side effect the session runs after a phase is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEffect {
    /// START_UP confirmed: the workflow command set unlocks.
    EnableWorkflow,
    /// CALIBRATION confirmed: prompt the operator for a region of interest.
    BeginRegionCapture,
    /// PLANNING confirmed: expose target planning affordances.
    ExposePlanning,
    /// TARGETING confirmed: transmit the planned target transform.
    SendPlannedTarget,
    /// MOVE_TO_TARGET confirmed: start the tracked-tip stream if armed.
    StartTrackedTip,
}

/// How a processed status message resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// A confirmed phase transition; effects run in order.
    Achieved {
        phase: Phase,
        effects: Vec<PhaseEffect>,
    },
    /// Status arrived before the acknowledgment. No state changed.
    Deferred { command: CommandKind },
    /// The peer rejected the command with a non-success code.
    Rejected {
        command: CommandKind,
        code: StatusCode,
    },
    /// A STOP exchange completed. The phase is unchanged.
    InterruptConfirmed { command: CommandKind },
    /// The peer rejected EMERGENCY or STOP; the optimistic local lockout
    /// is lifted and the operator is warned.
    InterruptRejected {
        command: CommandKind,
        code: StatusCode,
    },
    /// An unsolicited CURRENT_STATUS report, surfaced but not acted on.
    Informational { code: StatusCode },
}

#[derive(Debug, Default)]
pub struct PhaseMachine {
    phase: Phase,
    /// Set once START_UP has been confirmed at least once this session.
    started: bool,
    /// Optimistic EMERGENCY lockout: set at send time, cleared by a peer
    /// rejection or by a subsequent confirmed START_UP.
    emergency_lockout: bool,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_emergency_locked(&self) -> bool {
        self.emergency_lockout
    }

    /// Capability gate consulted before any command leaves the session.
    pub fn is_permitted(&self, kind: CommandKind) -> bool {
        match kind {
            // Recovery and observation stay available in every state.
            CommandKind::StartUp
            | CommandKind::GetStatus
            | CommandKind::StartSequence
            | CommandKind::StopSequence => true,
            _ if self.emergency_lockout || self.phase == Phase::Emergency => false,
            // Needle retraction only makes sense while moving to a target.
            CommandKind::RetractNeedle => self.phase == Phase::MoveToTarget,
            // While moving, planning and calibration affordances are locked.
            CommandKind::Calibration | CommandKind::Planning
                if self.phase == Phase::MoveToTarget =>
            {
                false
            }
            _ => self.started,
        }
    }

    /// Records that an interrupt command was sent. EMERGENCY locks the
    /// workflow out immediately instead of waiting for the ack/status pair.
    pub fn note_interrupt_sent(&mut self, kind: CommandKind) {
        if kind == CommandKind::Emergency {
            self.emergency_lockout = true;
        }
    }

    /// Applies one status message against the pending-command set.
    pub fn apply_status(
        &mut self,
        context: StatusContext,
        code: StatusCode,
        correlator: &mut Correlator,
    ) -> TransitionOutcome {
        let command = match context {
            StatusContext::CurrentStatus => {
                return TransitionOutcome::Informational { code };
            }
            StatusContext::Command(command) => command,
        };

        if !code.is_ok() {
            correlator.discard(command);
            if matches!(command, CommandKind::Emergency | CommandKind::Stop)
                && self.emergency_lockout
            {
                self.emergency_lockout = false;
                warn!(command = command.wire_name(), code = code.name(),
                    "interrupt rejected by peer, lifting local lockout");
                return TransitionOutcome::InterruptRejected { command, code };
            }
            return TransitionOutcome::Rejected { command, code };
        }

        if !correlator.is_acknowledged(command) {
            warn!(command = command.wire_name(),
                "status arrived before acknowledgment, deferring transition");
            return TransitionOutcome::Deferred { command };
        }
        correlator.consume(command);

        match command.target_phase() {
            Some(phase) => {
                self.phase = phase;
                if phase == Phase::StartUp {
                    self.started = true;
                    self.emergency_lockout = false;
                }
                TransitionOutcome::Achieved {
                    phase,
                    effects: Self::effects_for(phase),
                }
            }
            None => TransitionOutcome::InterruptConfirmed { command },
        }
    }

    fn effects_for(phase: Phase) -> Vec<PhaseEffect> {
        match phase {
            Phase::StartUp => vec![PhaseEffect::EnableWorkflow],
            Phase::Calibration => vec![PhaseEffect::BeginRegionCapture],
            Phase::Planning => vec![PhaseEffect::ExposePlanning],
            Phase::Targeting => vec![PhaseEffect::SendPlannedTarget],
            Phase::MoveToTarget => vec![PhaseEffect::StartTrackedTip],
            Phase::Idle | Phase::Emergency => Vec::new(),
        }
    }
}
