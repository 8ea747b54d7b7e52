//! Console session core.
//!
//! A [`Session`] owns the two peer connectors, the pending-command
//! correlator, the phase state machine, the telemetry steppers and the
//! command log, and drives all of them from a single caller-owned event
//! loop. No state lives outside the session; hosts construct one per
//! connected console and feed it inbound events in arrival order.

pub mod correlator;
pub mod log;
pub mod phase;
pub mod telemetry;

use geometry::{GeometryError, OrientationPreset, RigidTransform};
use link::{LinkConnector, LinkError};
use shared::domain::{CommandId, CommandKind, CommandPrefix, Peer, Phase};
use shared::protocol::{InboundEvent, Message, TransformChannel};
use thiserror::Error;
use tracing::{info, warn};
use zframe::CalibrationResult;

use crate::correlator::Correlator;
use crate::log::CommandLog;
use crate::phase::{PhaseEffect, PhaseMachine, TransitionOutcome};
use crate::telemetry::{Hz, PositionPoller, ScanPlaneStreamer, TipTick, TrackedTipStreamer};

/// Tolerance for verifying a robot-echoed transform against what was sent.
/// Echoes travel rounded to two decimals.
const ECHO_EPSILON: f64 = 1.0e-2;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{command:?} is not permitted in phase {phase:?}")]
    NotPermitted { command: CommandKind, phase: Phase },
    #[error("no planned target has been set")]
    NoPlannedTarget,
    #[error("no calibration result is available")]
    NoCalibration,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// What the session wants the operator layer to know after an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Acknowledged { command: CommandKind },
    /// An acknowledgment that matched no pending command; ignored.
    StaleAcknowledgment { id: CommandId },
    Transition(TransitionOutcome),
    PositionUpdated,
    ReachableTargetUpdated,
    /// Outcome of comparing an echoed transform against the one last sent.
    EchoVerified { matched: bool },
    TargetReached { reached: bool },
}

pub struct Session {
    robot: Box<dyn LinkConnector>,
    scanner: Box<dyn LinkConnector>,
    log: Box<dyn CommandLog>,
    correlator: Correlator,
    phase: PhaseMachine,
    position: PositionPoller,
    position_registered: bool,
    scan_plane: ScanPlaneStreamer,
    tracked_tip: TrackedTipStreamer,
    /// Operator opt-in: the tip stream only starts on MOVE_TO_TARGET if set.
    tracked_tip_armed: bool,
    tracked_tip_rate: Hz,
    tracked_tip_pose: Option<RigidTransform>,
    planned_target: Option<RigidTransform>,
    calibration: Option<CalibrationResult>,
    current_position: Option<RigidTransform>,
    current_position_base: Option<RigidTransform>,
    reachable_target: Option<RigidTransform>,
    last_sent_transform: Option<RigidTransform>,
}

impl Session {
    pub fn new(
        robot: Box<dyn LinkConnector>,
        scanner: Box<dyn LinkConnector>,
        log: Box<dyn CommandLog>,
    ) -> Self {
        Self {
            robot,
            scanner,
            log,
            correlator: Correlator::new(),
            phase: PhaseMachine::new(),
            position: PositionPoller::default(),
            position_registered: false,
            scan_plane: ScanPlaneStreamer::default(),
            tracked_tip: TrackedTipStreamer::default(),
            tracked_tip_armed: false,
            tracked_tip_rate: Hz::default(),
            tracked_tip_pose: None,
            planned_target: None,
            calibration: None,
            current_position: None,
            current_position_base: None,
            reachable_target: None,
            last_sent_transform: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    pub fn is_permitted(&self, command: CommandKind) -> bool {
        self.phase.is_permitted(command)
    }

    pub fn log(&self) -> &dyn CommandLog {
        self.log.as_ref()
    }

    fn connector(&self, peer: Peer) -> &dyn LinkConnector {
        match peer {
            Peer::Robot => self.robot.as_ref(),
            Peer::Scanner => self.scanner.as_ref(),
        }
    }

    /// Sends one command through the capability gate.
    ///
    /// EMERGENCY and STOP halt all periodic telemetry before they leave, and
    /// EMERGENCY additionally locks the workflow out until the peer answers.
    pub async fn send_command(&mut self, command: CommandKind) -> Result<CommandId, SessionError> {
        if !self.phase.is_permitted(command) {
            warn!(
                command = command.wire_name(),
                phase = self.phase.phase().wire_name(),
                "command blocked by capability gate"
            );
            return Err(SessionError::NotPermitted {
                command,
                phase: self.phase.phase(),
            });
        }

        match command {
            CommandKind::Emergency | CommandKind::Stop => {
                self.halt_telemetry();
                self.phase.note_interrupt_sent(command);
            }
            CommandKind::StartUp => self.stop_position_polling().await?,
            _ => {}
        }

        let id = self.correlator.allocate(CommandPrefix::Cmd);
        let peer = command.peer();
        let (message, event) = match command {
            CommandKind::GetStatus => (
                Message::status_query(),
                format!("Sending QUERY( {id}, GET_STATUS )"),
            ),
            _ => (
                Message::command(&id, command),
                format!("Sending STRING( {id}, {} )", command.wire_name()),
            ),
        };

        if expects_acknowledgment(command) {
            self.correlator.register(id.clone(), command);
        }

        let connector = self.connector(peer);
        connector.register_outbound(&message.name).await?;
        connector.push(message.clone()).await?;
        connector.unregister(&message.name).await?;

        if command != CommandKind::CurrentPosition {
            self.log.sent(&id, &event, peer);
        }
        Ok(id)
    }

    /// Transmits the calibration transform to the robot, re-orthonormalized
    /// in case the operator adjusted it after registration.
    pub async fn send_calibration(&mut self) -> Result<CommandId, SessionError> {
        let calibration = self.calibration.as_ref().ok_or(SessionError::NoCalibration)?;
        let transform = calibration.transform.orthonormalized()?;
        let id = self.correlator.allocate(CommandPrefix::Clb);
        self.send_transform(Peer::Robot, &id, transform, "CALIBRATION TRANSFORM")
            .await?;
        self.last_sent_transform = Some(transform);
        Ok(id)
    }

    /// Transmits the planned target transform to the robot.
    pub async fn send_planned_target(&mut self) -> Result<CommandId, SessionError> {
        let target = self.planned_target.ok_or(SessionError::NoPlannedTarget)?;
        let transform = target.orthonormalized()?;
        let id = self.correlator.allocate(CommandPrefix::Tgt);
        self.send_transform(Peer::Robot, &id, transform, "TARGET TRANSFORM")
            .await?;
        self.last_sent_transform = Some(transform);
        Ok(id)
    }

    async fn send_transform(
        &mut self,
        peer: Peer,
        id: &CommandId,
        transform: RigidTransform,
        label: &str,
    ) -> Result<(), SessionError> {
        let name = id.to_string();
        let connector = self.connector(peer);
        connector.register_outbound(&name).await?;
        connector.push(Message::transform(id, transform)).await?;
        connector.unregister(&name).await?;
        self.log
            .sent(id, &format!("Sending {label}( {id} )"), peer);
        self.log.matrix(&transform);
        Ok(())
    }

    /// Processes one inbound event. Events must be fed in arrival order.
    pub async fn handle_inbound(&mut self, event: InboundEvent) -> Result<Notice, SessionError> {
        match event {
            InboundEvent::AcknowledgmentReceived { peer, id, command } => {
                self.log.note(&format!(
                    "Received ACK from {}: ( {id}, {} )",
                    peer.as_str(),
                    command.wire_name()
                ));
                match self.correlator.acknowledge(&id) {
                    Some(command) => Ok(Notice::Acknowledged { command }),
                    None => {
                        warn!(%id, "acknowledgment matches no pending command");
                        Ok(Notice::StaleAcknowledgment { id })
                    }
                }
            }
            InboundEvent::StatusReceived {
                peer,
                context,
                code,
            } => {
                self.log.note(&format!(
                    "Received STATUS from {}: {}",
                    peer.as_str(),
                    code.name()
                ));
                let outcome = self.phase.apply_status(context, code, &mut self.correlator);
                if let TransitionOutcome::Achieved { phase, effects } = &outcome {
                    info!(phase = phase.wire_name(), "phase transition confirmed");
                    for effect in effects.clone() {
                        self.run_effect(effect).await;
                    }
                }
                Ok(Notice::Transition(outcome))
            }
            InboundEvent::TransformReceived {
                peer,
                channel,
                matrix,
            } => self.handle_transform(peer, channel, matrix),
            InboundEvent::TargetReached { peer, reached } => {
                self.log.note(&format!(
                    "Received HAS_REACHED_TARGET from {}: {}",
                    peer.as_str(),
                    if reached { "1" } else { "0" }
                ));
                self.tracked_tip.note_target_reached(reached);
                Ok(Notice::TargetReached { reached })
            }
        }
    }

    async fn run_effect(&mut self, effect: PhaseEffect) {
        match effect {
            PhaseEffect::SendPlannedTarget => {
                if let Err(error) = self.send_planned_target().await {
                    warn!(%error, "could not transmit planned target on TARGETING");
                }
            }
            PhaseEffect::StartTrackedTip => {
                if self.tracked_tip_armed {
                    self.tracked_tip.start(self.tracked_tip_rate);
                }
            }
            // Operator-facing affordances; surfaced through the notice.
            PhaseEffect::EnableWorkflow
            | PhaseEffect::BeginRegionCapture
            | PhaseEffect::ExposePlanning => {}
        }
    }

    fn handle_transform(
        &mut self,
        peer: Peer,
        channel: TransformChannel,
        matrix: RigidTransform,
    ) -> Result<Notice, SessionError> {
        match channel {
            TransformChannel::CurrentPosition => {
                let leveled = matrix.remove_roll();
                let mut base = leveled;
                if let Some(calibration) = &self.calibration {
                    base.set_element(2, 3, calibration.transform.element(2, 3));
                }
                self.current_position = Some(leveled);
                self.current_position_base = Some(base);
                self.log.matrix(&leveled);
                Ok(Notice::PositionUpdated)
            }
            TransformChannel::ReachableTarget => {
                self.log.note(&format!(
                    "Received REACHABLE_TARGET from {}",
                    peer.as_str()
                ));
                self.log.matrix(&matrix);
                self.reachable_target = Some(matrix);
                Ok(Notice::ReachableTargetUpdated)
            }
            TransformChannel::AckEcho => {
                let matched = match &self.last_sent_transform {
                    Some(sent) => sent.approx_eq(&matrix, ECHO_EPSILON),
                    None => false,
                };
                self.log.note(&format!(
                    "Received TRANSFORM echo from {}: {}",
                    peer.as_str(),
                    if matched { "MATCHED" } else { "MISMATCHED" }
                ));
                if !matched {
                    warn!("echoed transform does not match the last transform sent");
                }
                Ok(Notice::EchoVerified { matched })
            }
        }
    }

    // -- periodic telemetry -------------------------------------------------

    pub fn start_position_polling(&mut self, rate: Hz) {
        self.position.start(rate);
    }

    pub async fn stop_position_polling(&mut self) -> Result<(), SessionError> {
        if self.position_registered {
            self.robot
                .unregister(CommandKind::CurrentPosition.wire_name())
                .await?;
            self.position_registered = false;
        }
        self.position.stop();
        Ok(())
    }

    pub fn position_rate(&self) -> Hz {
        self.position.rate()
    }

    pub fn is_position_polling(&self) -> bool {
        self.position.is_enabled()
    }

    /// One position-poll timer tick. Exempt from command logging.
    pub async fn position_tick(&mut self) -> Result<bool, SessionError> {
        if !self.position.is_enabled() {
            return Ok(false);
        }
        let message = Message::persistent_command(CommandKind::CurrentPosition);
        if !self.position_registered {
            self.robot.register_outbound(&message.name).await?;
            self.position_registered = true;
        }
        self.robot.push(message).await?;
        Ok(true)
    }

    pub fn start_scan_plane_stream(&mut self, rate: Hz) {
        self.scan_plane.start(rate);
    }

    pub fn stop_scan_plane_stream(&mut self) {
        self.scan_plane.stop();
    }

    pub fn scan_plane_rate(&self) -> Hz {
        self.scan_plane.rate()
    }

    pub fn set_scan_plane(&mut self, plane: RigidTransform) {
        self.scan_plane.set_desired(plane);
    }

    /// Overwrites only the rotation block of the desired scan plane.
    pub fn apply_scan_plane_preset(&mut self, preset: OrientationPreset) {
        let oriented = (*self.scan_plane.desired()).with_orientation(preset);
        self.scan_plane.set_desired(oriented);
    }

    pub fn set_scan_plane_follows_robot(&mut self, follow: bool) {
        self.scan_plane.set_follow_robot(follow);
    }

    /// One scan-plane timer tick; transmits to the scanner only when the
    /// plane changed since the last send.
    pub async fn scan_plane_tick(&mut self) -> Result<Option<CommandId>, SessionError> {
        let Some(plane) = self.scan_plane.tick(self.current_position.as_ref())? else {
            return Ok(None);
        };
        let id = self.correlator.allocate(CommandPrefix::Plane);
        self.send_transform(Peer::Scanner, &id, plane, "SCAN PLANE TRANSFORM")
            .await?;
        Ok(Some(id))
    }

    pub fn arm_tracked_tip(&mut self, armed: bool, rate: Hz) {
        self.tracked_tip_armed = armed;
        self.tracked_tip_rate = rate;
        if !armed {
            self.tracked_tip.stop();
        }
    }

    pub fn is_tracked_tip_streaming(&self) -> bool {
        self.tracked_tip.is_enabled()
    }

    pub fn tracked_tip_rate(&self) -> Hz {
        self.tracked_tip_rate
    }

    pub fn set_tracked_tip_pose(&mut self, pose: RigidTransform) {
        self.tracked_tip_pose = Some(pose);
    }

    /// One tracked-tip timer tick; transmits only when the tip moved and the
    /// robot has not yet reported the target reached.
    pub async fn tracked_tip_tick(&mut self) -> Result<Option<CommandId>, SessionError> {
        match self.tracked_tip.tick(self.tracked_tip_pose.as_ref()) {
            TipTick::Idle => Ok(None),
            TipTick::Finished => {
                self.log.note("Target reached, tracked tip stream stopped");
                Ok(None)
            }
            TipTick::Send(pose) => {
                let id = self.correlator.allocate(CommandPrefix::Npos);
                self.send_transform(Peer::Robot, &id, pose, "TRACKED TIP TRANSFORM")
                    .await?;
                Ok(Some(id))
            }
        }
    }

    fn halt_telemetry(&mut self) {
        self.position.stop();
        self.scan_plane.stop();
        self.tracked_tip.stop();
    }

    // -- shared data model --------------------------------------------------

    pub fn set_planned_target(&mut self, target: RigidTransform) {
        self.planned_target = Some(target);
    }

    /// Plans a target at a bare point with identity orientation.
    pub fn set_planned_target_point(&mut self, point: [f64; 3]) {
        self.planned_target = Some(RigidTransform::at_position(point));
    }

    pub fn planned_target(&self) -> Option<&RigidTransform> {
        self.planned_target.as_ref()
    }

    pub fn set_calibration(&mut self, result: CalibrationResult) {
        self.calibration = Some(result);
    }

    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.calibration.as_ref()
    }

    pub fn current_position(&self) -> Option<&RigidTransform> {
        self.current_position.as_ref()
    }

    /// Current position with its height taken from the calibration
    /// transform, the robot-base frame shown alongside the raw position.
    pub fn current_position_base(&self) -> Option<&RigidTransform> {
        self.current_position_base.as_ref()
    }

    pub fn reachable_target(&self) -> Option<&RigidTransform> {
        self.reachable_target.as_ref()
    }
}

fn expects_acknowledgment(command: CommandKind) -> bool {
    command.peer() == Peer::Robot
        && !matches!(
            command,
            CommandKind::CurrentPosition | CommandKind::GetStatus
        )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
