//! Z-frame fiducial calibration: topology configuration, imaging-volume
//! preparation, fiducial slice selection and registration hand-off.

pub mod config;
pub mod pipeline;
pub mod volume;

pub use config::{TopologyError, ZFrameKind, ZFrameTopology};
pub use pipeline::{
    calibrate, CalibrationError, CalibrationRequest, CalibrationResult, RegistrationFailure,
    RegistrationRequest, RegistrationService, SliceRange, COMPONENT_THRESHOLD,
};
pub use volume::{RegionOfInterest, VolumeError, VolumeHandle, VolumeWorkbench};
