//! Imaging-volume operations behind a workbench trait.
//!
//! The calibration pipeline needs a handful of image-processing steps (crop,
//! threshold, mask, Otsu, dilation, island counting) but never touches voxel
//! data itself. A workbench owns the scratch volumes it produces and hands
//! out opaque handles; hosts back it with whatever imaging stack they have.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("unknown volume handle {0:?}")]
    UnknownHandle(VolumeHandle),
    #[error("slice index {slice} out of range for depth {depth}")]
    SliceOutOfRange { slice: usize, depth: usize },
    #[error("volume processing failed: {0}")]
    Processing(String),
}

/// Opaque reference to a workbench-owned scratch volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeHandle(pub u32);

/// Axis-aligned region of interest in patient (RAS) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOfInterest {
    pub min_ras: [f64; 3],
    pub max_ras: [f64; 3],
}

impl RegionOfInterest {
    pub fn center(&self) -> [f64; 3] {
        [
            (self.min_ras[0] + self.max_ras[0]) / 2.0,
            (self.min_ras[1] + self.max_ras[1]) / 2.0,
            (self.min_ras[2] + self.max_ras[2]) / 2.0,
        ]
    }
}

/// Imaging operations the calibration pipeline is built from.
pub trait VolumeWorkbench: Send {
    /// Source volume dimensions as `[columns, rows, slices]`.
    fn dimensions(&self) -> [usize; 3];

    /// Maps a patient-space point into continuous index space of the source
    /// volume.
    fn ras_to_index(&self, point: [f64; 3]) -> [f64; 3];

    /// Crops the source volume to the region of interest.
    fn crop(&mut self, roi: &RegionOfInterest) -> Result<VolumeHandle, VolumeError>;

    /// Fixed-band threshold producing a label volume.
    fn threshold_label(
        &mut self,
        volume: VolumeHandle,
        lower: f64,
        upper: f64,
    ) -> Result<VolumeHandle, VolumeError>;

    /// Masks the cropped source with a label volume.
    fn mask_source(
        &mut self,
        volume: VolumeHandle,
        label: VolumeHandle,
    ) -> Result<VolumeHandle, VolumeError>;

    /// Otsu auto-threshold into a binary volume.
    fn otsu(&mut self, volume: VolumeHandle) -> Result<VolumeHandle, VolumeError>;

    /// In-place binary dilation.
    fn dilate(&mut self, volume: VolumeHandle) -> Result<(), VolumeError>;

    /// Number of connected bright islands in one slice of a binary volume.
    fn component_count(&self, volume: VolumeHandle, slice: usize) -> Result<usize, VolumeError>;

    /// Releases a scratch volume.
    fn discard(&mut self, volume: VolumeHandle);
}
