//! Z-frame calibration pipeline.
//!
//! From an imaging volume and a region of interest to a frame-to-scanner
//! registration transform: prepare a masked working volume, resolve the slice
//! range holding the fiducial cross-section, then hand off to a registration
//! backend under a deadline. Fiducial-count validation happens before any
//! registration work starts.

use std::time::Duration;

use async_trait::async_trait;
use geometry::{GeometryError, RigidTransform};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{TopologyError, ZFrameKind, ZFrameTopology};
use crate::volume::{RegionOfInterest, VolumeError, VolumeHandle, VolumeWorkbench};

/// Threshold band applied before masking, in source intensity units.
pub const THRESHOLD_LOWER: f64 = 0.0;
pub const THRESHOLD_UPPER: f64 = 2000.0;

/// Minimum bright-island count for a slice to be considered part of the
/// fiducial cross-section.
pub const COMPONENT_THRESHOLD: usize = 6;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("no region of interest defined over the calibration volume")]
    MissingRegionOfInterest,
    #[error("{kind:?} expects {expected} fiducial points, got {actual}")]
    FiducialCount {
        kind: ZFrameKind,
        expected: usize,
        actual: usize,
    },
    #[error("region of interest selects no slices inside the volume")]
    EmptySliceRange,
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("registration timed out after {0:?}")]
    Timeout(Duration),
}

/// Inclusive slice range in source index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub start: usize,
    pub end: usize,
}

/// Operator inputs for one calibration attempt. Manual fiducials take
/// precedence over a manual slice range; with neither, the slice range is
/// derived from the region of interest and refined by island density.
#[derive(Debug, Clone)]
pub struct CalibrationRequest {
    pub kind: ZFrameKind,
    pub topology: ZFrameTopology,
    pub roi: Option<RegionOfInterest>,
    pub manual_range: Option<SliceRange>,
    pub manual_fiducials: Option<Vec<[f64; 3]>>,
}

/// Everything a registration backend needs for one solve.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub volume: VolumeHandle,
    pub range: SliceRange,
    pub kind: ZFrameKind,
    pub topology: ZFrameTopology,
    /// Manually picked fiducial centers as in-slice pixel coordinates,
    /// empty when detection is automatic.
    pub fiducials: Vec<[i32; 2]>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct RegistrationFailure(pub String);

/// A registration backend sharing the workbench's volume store.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    fn name(&self) -> &str;

    async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<RigidTransform, RegistrationFailure>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub transform: RigidTransform,
    pub range: SliceRange,
    pub kind: ZFrameKind,
}

/// Runs one calibration attempt end to end.
pub async fn calibrate(
    workbench: &mut dyn VolumeWorkbench,
    service: &dyn RegistrationService,
    request: &CalibrationRequest,
    deadline: Duration,
) -> Result<CalibrationResult, CalibrationError> {
    if let Some(fiducials) = &request.manual_fiducials {
        let expected = request.kind.required_fiducials();
        if fiducials.len() != expected {
            return Err(CalibrationError::FiducialCount {
                kind: request.kind,
                expected,
                actual: fiducials.len(),
            });
        }
    }
    let roi = request
        .roi
        .as_ref()
        .ok_or(CalibrationError::MissingRegionOfInterest)?;

    let depth = workbench.dimensions()[2];
    if depth == 0 {
        return Err(CalibrationError::EmptySliceRange);
    }

    let cropped = workbench.crop(roi)?;
    let label = workbench.threshold_label(cropped, THRESHOLD_LOWER, THRESHOLD_UPPER)?;
    let masked = workbench.mask_source(cropped, label)?;

    let mut fiducials = Vec::new();
    let range = if let Some(points) = &request.manual_fiducials {
        for point in points {
            let index = workbench.ras_to_index(*point);
            fiducials.push([index[0].round() as i32, index[1].round() as i32]);
        }
        let slice = clamp_slice(workbench.ras_to_index(points[0])[2], depth);
        SliceRange {
            start: slice,
            end: (slice + 1).min(depth - 1),
        }
    } else if let Some(manual) = request.manual_range {
        let a = manual.start.min(depth - 1);
        let b = manual.end.min(depth - 1);
        SliceRange {
            start: a.min(b),
            end: a.max(b),
        }
    } else {
        let coarse = roi_slice_range(workbench, roi, depth);
        let refined = refine_slice_range(workbench, masked, coarse)?;
        debug!(
            start = refined.start,
            end = refined.end,
            "refined calibration slice range"
        );
        refined
    };

    let registration = RegistrationRequest {
        volume: masked,
        range,
        kind: request.kind,
        topology: request.topology.clone(),
        fiducials,
    };
    let solve = tokio::time::timeout(deadline, service.register(registration));
    let outcome = solve.await;
    workbench.discard(label);
    workbench.discard(cropped);
    workbench.discard(masked);

    let transform = match outcome {
        Err(_) => return Err(CalibrationError::Timeout(deadline)),
        Ok(Err(failure)) => return Err(CalibrationError::Registration(failure.0)),
        Ok(Ok(transform)) => transform,
    };
    info!(
        kind = request.kind.as_str(),
        backend = service.name(),
        start = range.start,
        end = range.end,
        "calibration registration complete"
    );
    Ok(CalibrationResult {
        transform,
        range,
        kind: request.kind,
    })
}

fn clamp_slice(continuous: f64, depth: usize) -> usize {
    let rounded = continuous.round();
    if rounded <= 0.0 {
        0
    } else {
        (rounded as usize).min(depth - 1)
    }
}

/// Slice bounds of the region of interest in index space.
fn roi_slice_range(
    workbench: &dyn VolumeWorkbench,
    roi: &RegionOfInterest,
    depth: usize,
) -> SliceRange {
    let a = clamp_slice(workbench.ras_to_index(roi.min_ras)[2], depth);
    let b = clamp_slice(workbench.ras_to_index(roi.max_ras)[2], depth);
    SliceRange {
        start: a.min(b),
        end: a.max(b),
    }
}

/// Narrows a coarse slice range by island density: starting from the center
/// slice, extend in each direction while the slice shows more than
/// [`COMPONENT_THRESHOLD`] bright islands, stopping at the first failure.
fn refine_slice_range(
    workbench: &mut dyn VolumeWorkbench,
    masked: VolumeHandle,
    coarse: SliceRange,
) -> Result<SliceRange, CalibrationError> {
    let binary = workbench.otsu(masked)?;
    workbench.dilate(binary)?;

    let center = (coarse.start + coarse.end) / 2;
    let mut start = center;
    let mut slice = center;
    loop {
        if workbench.component_count(binary, slice)? > COMPONENT_THRESHOLD {
            start = slice;
            if slice == coarse.start {
                break;
            }
            slice -= 1;
        } else {
            break;
        }
    }
    let mut end = center;
    slice = center;
    loop {
        if workbench.component_count(binary, slice)? > COMPONENT_THRESHOLD {
            end = slice;
            if slice == coarse.end {
                break;
            }
            slice += 1;
        } else {
            break;
        }
    }
    workbench.discard(binary);
    Ok(SliceRange { start, end })
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;
