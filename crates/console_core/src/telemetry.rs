//! Periodic telemetry channels.
//!
//! The steppers here are pure: the session drives them from timer ticks and
//! performs the actual sends. Each stepper decides whether this tick produces
//! traffic, applying the per-channel suppression rules.

use std::time::Duration;

use geometry::{GeometryError, RigidTransform, DEFAULT_EPSILON};

/// Telemetry rate in Hertz, clamped to the supported 1-144 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hz(u16);

impl Hz {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 144;

    pub fn new(raw: u16) -> Self {
        Self(raw.clamp(Self::MIN, Self::MAX))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn interval(self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.0))
    }
}

impl Default for Hz {
    fn default() -> Self {
        Self(5)
    }
}

/// CURRENT_POSITION polling. Stateless apart from the enable flag; the query
/// message itself is persistent and owned by the session.
#[derive(Debug, Default)]
pub struct PositionPoller {
    enabled: bool,
    rate: Hz,
}

impl PositionPoller {
    pub fn start(&mut self, rate: Hz) {
        self.rate = rate;
        self.enabled = true;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rate(&self) -> Hz {
        self.rate
    }
}

/// Desired scan-plane streaming toward the scanner.
///
/// The last transmitted matrix starts as the sentinel (zeroed diagonal), so
/// the first tick after `start` always transmits. Identical consecutive
/// orthonormalized matrices are suppressed.
#[derive(Debug)]
pub struct ScanPlaneStreamer {
    enabled: bool,
    rate: Hz,
    follow_robot: bool,
    desired: RigidTransform,
    last_sent: RigidTransform,
}

impl Default for ScanPlaneStreamer {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: Hz::new(2),
            follow_robot: false,
            desired: RigidTransform::identity(),
            last_sent: RigidTransform::sentinel(),
        }
    }
}

impl ScanPlaneStreamer {
    pub fn start(&mut self, rate: Hz) {
        self.rate = rate;
        self.enabled = true;
        self.last_sent = RigidTransform::sentinel();
    }

    pub fn stop(&mut self) {
        self.enabled = false;
        self.last_sent = RigidTransform::sentinel();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rate(&self) -> Hz {
        self.rate
    }

    pub fn set_follow_robot(&mut self, follow: bool) {
        self.follow_robot = follow;
    }

    pub fn set_desired(&mut self, plane: RigidTransform) {
        self.desired = plane;
    }

    pub fn desired(&self) -> &RigidTransform {
        &self.desired
    }

    /// One timer tick. Returns the plane to transmit, or `None` when the
    /// channel is idle or the plane has not changed since the last send.
    pub fn tick(
        &mut self,
        robot_position: Option<&RigidTransform>,
    ) -> Result<Option<RigidTransform>, GeometryError> {
        if !self.enabled {
            return Ok(None);
        }
        if self.follow_robot {
            if let Some(position) = robot_position {
                self.desired.set_translation(position.translation());
            }
        }
        let plane = self.desired.orthonormalized()?;
        if plane.approx_eq(&self.last_sent, DEFAULT_EPSILON) {
            return Ok(None);
        }
        self.last_sent = plane.clone();
        Ok(Some(plane))
    }
}

/// Outcome of a tracked-tip tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TipTick {
    /// Transmit this translation-only pose to the robot.
    Send(RigidTransform),
    /// Nothing to do this tick.
    Idle,
    /// The robot reported the target reached; the channel shut itself down.
    Finished,
}

/// Tracked needle-tip streaming toward the robot during MOVE_TO_TARGET.
///
/// Rotation is stripped before transmission, the previous pose starts as the
/// all-zero matrix, and a HAS_REACHED_TARGET report terminates the stream.
#[derive(Debug)]
pub struct TrackedTipStreamer {
    enabled: bool,
    rate: Hz,
    previous: RigidTransform,
    target_reached: bool,
}

impl Default for TrackedTipStreamer {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: Hz::default(),
            previous: RigidTransform::zeroed(),
            target_reached: false,
        }
    }
}

impl TrackedTipStreamer {
    pub fn start(&mut self, rate: Hz) {
        self.rate = rate;
        self.enabled = true;
        self.target_reached = false;
        self.previous = RigidTransform::zeroed();
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rate(&self) -> Hz {
        self.rate
    }

    pub fn note_target_reached(&mut self, reached: bool) {
        self.target_reached = reached;
    }

    /// One timer tick against the latest tracked pose, if any.
    pub fn tick(&mut self, tracked: Option<&RigidTransform>) -> TipTick {
        if !self.enabled {
            return TipTick::Idle;
        }
        if self.target_reached {
            self.enabled = false;
            return TipTick::Finished;
        }
        let Some(tracked) = tracked else {
            return TipTick::Idle;
        };
        if tracked.same_translation(&self.previous, 0.0) {
            return TipTick::Idle;
        }
        let pose = tracked.clone().stripped_rotation();
        self.previous = pose.clone();
        TipTick::Send(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_clamps_to_supported_range() {
        assert_eq!(Hz::new(0).get(), 1);
        assert_eq!(Hz::new(144).get(), 144);
        assert_eq!(Hz::new(500).get(), 144);
        assert_eq!(Hz::new(5).interval(), Duration::from_millis(200));
    }

    #[test]
    fn scan_plane_first_tick_transmits_then_suppresses() {
        let mut streamer = ScanPlaneStreamer::default();
        streamer.set_desired(RigidTransform::at_position([10.0, -4.0, 55.0]));
        streamer.start(Hz::new(2));

        let first = streamer.tick(None).unwrap();
        assert!(first.is_some());
        // Unchanged plane: suppressed on every following tick.
        assert!(streamer.tick(None).unwrap().is_none());
        assert!(streamer.tick(None).unwrap().is_none());

        streamer.set_desired(RigidTransform::at_position([10.0, -4.0, 56.0]));
        assert!(streamer.tick(None).unwrap().is_some());
    }

    #[test]
    fn restarting_scan_plane_retransmits_unchanged_plane() {
        let mut streamer = ScanPlaneStreamer::default();
        streamer.set_desired(RigidTransform::identity());
        streamer.start(Hz::new(2));
        assert!(streamer.tick(None).unwrap().is_some());

        streamer.stop();
        streamer.start(Hz::new(2));
        assert!(streamer.tick(None).unwrap().is_some());
    }

    #[test]
    fn follow_robot_overwrites_translation_only() {
        let mut streamer = ScanPlaneStreamer::default();
        streamer.set_desired(RigidTransform::identity());
        streamer.set_follow_robot(true);
        streamer.start(Hz::new(2));

        let robot = RigidTransform::at_position([1.0, 2.0, 3.0]);
        let plane = streamer.tick(Some(&robot)).unwrap().unwrap();
        assert_eq!(plane.translation(), [1.0, 2.0, 3.0]);
        assert_eq!(plane.rotation(), RigidTransform::identity().rotation());
    }

    #[test]
    fn tracked_tip_strips_rotation_and_suppresses_stationary_pose() {
        let mut streamer = TrackedTipStreamer::default();
        streamer.start(Hz::new(5));

        let mut pose = RigidTransform::at_position([5.0, 6.0, 7.0]);
        pose.set_rotation([[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let TipTick::Send(sent) = streamer.tick(Some(&pose)) else {
            panic!("expected a send");
        };
        assert_eq!(sent.translation(), [5.0, 6.0, 7.0]);
        assert_eq!(sent.rotation(), RigidTransform::identity().rotation());

        assert_eq!(streamer.tick(Some(&pose)), TipTick::Idle);
    }

    #[test]
    fn tracked_tip_terminates_once_target_reached() {
        let mut streamer = TrackedTipStreamer::default();
        streamer.start(Hz::new(5));
        streamer.note_target_reached(true);
        assert_eq!(streamer.tick(None), TipTick::Finished);
        assert!(!streamer.is_enabled());
        assert_eq!(streamer.tick(None), TipTick::Idle);
    }
}
