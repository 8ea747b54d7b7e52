//! In-process peer simulators for running the console without hardware.
//!
//! The robot simulator acknowledges every command, confirms it with
//! STATUS_OK and answers position polls with a slowly advancing pose. The
//! scanner simulator just drains what it is sent. Both feed the session's
//! inbound queue through the loopback remotes.

use std::time::Duration;

use async_trait::async_trait;
use geometry::RigidTransform;
use link::LoopbackRemote;
use shared::domain::StatusCode;
use shared::protocol::{Message, MessageBody};
use tokio::task::JoinHandle;
use tracing::debug;
use zframe::{
    RegistrationFailure, RegistrationRequest, RegistrationService, RegionOfInterest, VolumeError,
    VolumeHandle, VolumeWorkbench,
};

pub fn spawn_robot(mut remote: LoopbackRemote) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut step = 0u64;
        while let Some(message) = remote.next_outbound().await {
            match &message.body {
                MessageBody::Text { text } => {
                    if let Some(stamp) = message.name.strip_prefix("CMD_") {
                        remote.deliver(Message {
                            name: format!("ACK_{stamp}"),
                            body: MessageBody::Text { text: text.clone() },
                        });
                        remote.deliver(Message {
                            name: text.clone(),
                            body: MessageBody::Status {
                                code: StatusCode::Ok.index(),
                                sub_code: 0,
                            },
                        });
                    } else if message.name == "CURRENT_POSITION" {
                        step += 1;
                        let pose = RigidTransform::at_position([
                            10.0 + step as f64 * 0.5,
                            -5.0,
                            40.0,
                        ]);
                        remote.deliver(Message {
                            name: "CURRENT_POSITION".into(),
                            body: MessageBody::Transform { matrix: pose },
                        });
                    }
                }
                MessageBody::Transform { matrix } => {
                    // Echo transforms back for verification, as the robot
                    // controller does.
                    remote.deliver(Message {
                        name: format!("ACK_{}", message.name),
                        body: MessageBody::Transform { matrix: *matrix },
                    });
                }
                MessageBody::Status { .. } => {}
                MessageBody::Query { device } if device == "STATUS" => {
                    remote.deliver(Message {
                        name: "CURRENT_STATUS".into(),
                        body: MessageBody::Status {
                            code: StatusCode::Ok.index(),
                            sub_code: 0,
                        },
                    });
                }
                MessageBody::Query { .. } => {}
            }
        }
    })
}

pub fn spawn_scanner(mut remote: LoopbackRemote) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = remote.next_outbound().await {
            debug!(name = %message.name, "scanner received payload");
        }
    })
}

/// A synthetic calibration volume: identity RAS-to-index mapping, with a
/// dense fiducial band in the middle slices.
pub struct DemoWorkbench {
    depth: usize,
    dense: std::ops::RangeInclusive<usize>,
    next_handle: u32,
}

impl Default for DemoWorkbench {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoWorkbench {
    pub fn new() -> Self {
        Self {
            depth: 60,
            dense: 24..=32,
            next_handle: 0,
        }
    }

    fn allocate(&mut self) -> VolumeHandle {
        let handle = VolumeHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

impl VolumeWorkbench for DemoWorkbench {
    fn dimensions(&self) -> [usize; 3] {
        [128, 128, self.depth]
    }

    fn ras_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        point
    }

    fn crop(&mut self, _roi: &RegionOfInterest) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn threshold_label(
        &mut self,
        _volume: VolumeHandle,
        _lower: f64,
        _upper: f64,
    ) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn mask_source(
        &mut self,
        _volume: VolumeHandle,
        _label: VolumeHandle,
    ) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn otsu(&mut self, _volume: VolumeHandle) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn dilate(&mut self, _volume: VolumeHandle) -> Result<(), VolumeError> {
        Ok(())
    }

    fn component_count(&self, _volume: VolumeHandle, slice: usize) -> Result<usize, VolumeError> {
        if slice >= self.depth {
            return Err(VolumeError::SliceOutOfRange {
                slice,
                depth: self.depth,
            });
        }
        Ok(if self.dense.contains(&slice) { 9 } else { 2 })
    }

    fn discard(&mut self, _volume: VolumeHandle) {}
}

/// Registration stand-in: solves instantly with a fixed frame pose.
pub struct DemoRegistration;

#[async_trait]
impl RegistrationService for DemoRegistration {
    fn name(&self) -> &str {
        "demo"
    }

    async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RigidTransform, RegistrationFailure> {
        debug!(
            start = request.range.start,
            end = request.range.end,
            kind = request.kind.as_str(),
            "demo registration solve"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(RigidTransform::at_position([2.0, -1.5, 42.5]))
    }
}
