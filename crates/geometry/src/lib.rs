//! Rigid 4x4 transform math shared by the protocol core and the calibration
//! pipeline: roll removal, modified Gram-Schmidt orthonormalization,
//! tolerance comparison and the fixed scan-plane orientation presets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default tolerance for element-wise transform comparison.
pub const DEFAULT_EPSILON: f64 = 1.0e-6;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("rotation column {column} is degenerate (norm {norm:e}), cannot orthonormalize")]
    DegenerateColumn { column: usize, norm: f64 },
}

/// Scan-plane orientation presets. Each overwrites only the rotation block
/// of the current scan-plane transform, leaving its translation alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationPreset {
    Axial,
    Coronal,
    Sagittal,
}

impl OrientationPreset {
    pub fn rotation(self) -> [[f64; 3]; 3] {
        match self {
            OrientationPreset::Axial => [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            OrientationPreset::Coronal => [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]],
            OrientationPreset::Sagittal => [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]],
        }
    }
}

/// A row-major homogeneous 4x4 transform. The 3x3 rotation block is expected
/// to be orthonormal at every send/apply boundary; `orthonormalized` enforces
/// that before transmission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    rows: [[f64; 4]; 4],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { rows }
    }

    /// A transform with a zeroed 3x3 diagonal. Never equal (within any
    /// reasonable tolerance) to a valid rigid transform, so a freshly started
    /// streaming channel always transmits on its first tick.
    pub fn sentinel() -> Self {
        let mut t = Self::identity();
        t.rows[0][0] = 0.0;
        t.rows[1][1] = 0.0;
        t.rows[2][2] = 0.0;
        t
    }

    /// An all-zero matrix, used as the initial "previous pose" of the
    /// tracked-tip channel so any real pose away from the origin transmits.
    pub fn zeroed() -> Self {
        Self {
            rows: [[0.0; 4]; 4],
        }
    }

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.rows
    }

    pub fn element(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    pub fn set_element(&mut self, row: usize, col: usize, value: f64) {
        self.rows[row][col] = value;
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.rows[0][3], self.rows[1][3], self.rows[2][3]]
    }

    pub fn set_translation(&mut self, t: [f64; 3]) {
        self.rows[0][3] = t[0];
        self.rows[1][3] = t[1];
        self.rows[2][3] = t[2];
    }

    /// Identity transform positioned at `point`.
    pub fn at_position(point: [f64; 3]) -> Self {
        let mut t = Self::identity();
        t.set_translation(point);
        t
    }

    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let mut r = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                r[i][j] = self.rows[i][j];
            }
        }
        r
    }

    pub fn set_rotation(&mut self, r: [[f64; 3]; 3]) {
        for i in 0..3 {
            for j in 0..3 {
                self.rows[i][j] = r[i][j];
            }
        }
    }

    /// Overwrite the rotation block with an orientation preset, preserving
    /// translation: a change of viewing basis without moving the origin.
    pub fn with_orientation(mut self, preset: OrientationPreset) -> Self {
        self.set_rotation(preset.rotation());
        self
    }

    /// Replace the rotation block with identity, keeping the translation.
    /// Used by tracked-tip streaming, which reports position only.
    pub fn stripped_rotation(mut self) -> Self {
        self.set_rotation(OrientationPreset::Axial.rotation());
        self
    }

    /// Remove the in-plane (Z-axis) rotation component. The angle is
    /// recovered as `atan2(m[1][0], m[0][0])` and the rotation block is
    /// right-multiplied by Rz(-angle). The name follows the device
    /// convention, not the literal roll axis.
    pub fn remove_roll(&self) -> Self {
        let roll = self.rows[1][0].atan2(self.rows[0][0]);
        let (s, c) = (-roll).sin_cos();
        let rz = [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]];
        let r = self.rotation();
        let mut out = *self;
        for i in 0..3 {
            for j in 0..3 {
                let mut acc = 0.0;
                for (k, rz_row) in rz.iter().enumerate() {
                    acc += r[i][k] * rz_row[j];
                }
                out.rows[i][j] = acc;
            }
        }
        out
    }

    /// Orthonormalize the rotation block with modified Gram-Schmidt,
    /// column by column. A near-zero column norm signals a degenerate input
    /// and is reported rather than silently divided through.
    pub fn orthonormalized(&self) -> Result<Self, GeometryError> {
        let r = self.rotation();
        let mut q = [[0.0; 3]; 3];
        for j in 0..3 {
            let mut v = [r[0][j], r[1][j], r[2][j]];
            for i in 0..j {
                let qi = [q[0][i], q[1][i], q[2][i]];
                let proj = qi[0] * v[0] + qi[1] * v[1] + qi[2] * v[2];
                for k in 0..3 {
                    v[k] -= proj * qi[k];
                }
            }
            let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            if norm < 1.0e-12 {
                return Err(GeometryError::DegenerateColumn { column: j, norm });
            }
            for k in 0..3 {
                q[k][j] = v[k] / norm;
            }
        }
        let mut out = *self;
        out.set_rotation(q);
        Ok(out)
    }

    /// Element-wise comparison within `epsilon`. Used to suppress redundant
    /// re-transmission of an unchanged pose during continuous streaming.
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        for i in 0..4 {
            for j in 0..4 {
                if (self.rows[i][j] - other.rows[i][j]).abs() > epsilon {
                    return false;
                }
            }
        }
        true
    }

    /// True when only the translation differs between the two transforms.
    pub fn same_translation(&self, other: &Self, epsilon: f64) -> bool {
        let (a, b) = (self.translation(), other.translation());
        (0..3).all(|i| (a[i] - b[i]).abs() <= epsilon)
    }

    /// Coordinate-frame composition, `self * rhs`.
    pub fn compose(&self, rhs: &Self) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (i, out_row) in rows.iter_mut().enumerate() {
            for (j, cell) in out_row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.rows[i][k] * rhs.rows[k][j]).sum();
            }
        }
        Self { rows }
    }

    /// Rigid inverse: transposed rotation, negated rotated translation.
    pub fn inverse(&self) -> Self {
        let r = self.rotation();
        let t = self.translation();
        let mut out = Self::identity();
        for i in 0..3 {
            for j in 0..3 {
                out.rows[i][j] = r[j][i];
            }
        }
        for i in 0..3 {
            out.rows[i][3] = -(r[0][i] * t[0] + r[1][i] * t[1] + r[2][i] * t[2]);
        }
        out
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (i, value) in out.iter_mut().enumerate() {
            *value = self.rows[i][0] * p[0]
                + self.rows[i][1] * p[1]
                + self.rows[i][2] * p[2]
                + self.rows[i][3];
        }
        out
    }
}

/// Pure Z-axis rotation of `angle` radians, for tests and preset handling.
pub fn yaw_rotation(angle: f64) -> RigidTransform {
    let (s, c) = angle.sin_cos();
    let mut t = RigidTransform::identity();
    t.set_rotation([[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]);
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot_columns(r: &[[f64; 3]; 3], a: usize, b: usize) -> f64 {
        (0..3).map(|i| r[i][a] * r[i][b]).sum()
    }

    #[test]
    fn orthonormalize_yields_unit_orthogonal_columns() {
        let mut t = RigidTransform::identity();
        t.set_rotation([[1.0, 0.9, 0.1], [0.2, 1.1, 0.0], [0.0, 0.3, 0.8]]);
        let q = t.orthonormalized().expect("non-degenerate").rotation();
        for j in 0..3 {
            assert!((dot_columns(&q, j, j) - 1.0).abs() < 1.0e-9);
        }
        for (a, b) in [(0, 1), (0, 2), (1, 2)] {
            assert!(dot_columns(&q, a, b).abs() < 1.0e-9);
        }
    }

    #[test]
    fn orthonormalize_reports_degenerate_column() {
        let mut t = RigidTransform::identity();
        t.set_rotation([[1.0, 2.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        assert!(matches!(
            t.orthonormalized(),
            Err(GeometryError::DegenerateColumn { .. })
        ));
    }

    #[test]
    fn remove_roll_cancels_pure_yaw() {
        for angle in [-2.9, -0.7, 0.0, 0.3, 1.4, 3.0] {
            let rolled = yaw_rotation(angle);
            let fixed = rolled.remove_roll();
            assert!(
                fixed.approx_eq(&RigidTransform::identity(), 1.0e-9),
                "yaw {angle} not removed: {:?}",
                fixed
            );
        }
    }

    #[test]
    fn remove_roll_preserves_translation() {
        let mut t = yaw_rotation(0.8);
        t.set_translation([4.0, -2.0, 11.5]);
        assert_eq!(t.remove_roll().translation(), [4.0, -2.0, 11.5]);
    }

    #[test]
    fn sentinel_never_matches_identity() {
        assert!(!RigidTransform::sentinel().approx_eq(&RigidTransform::identity(), 0.5));
    }

    #[test]
    fn presets_preserve_translation() {
        let t = RigidTransform::at_position([1.0, 2.0, 3.0]);
        for preset in [
            OrientationPreset::Axial,
            OrientationPreset::Coronal,
            OrientationPreset::Sagittal,
        ] {
            let oriented = t.with_orientation(preset);
            assert_eq!(oriented.translation(), [1.0, 2.0, 3.0]);
            assert_eq!(oriented.rotation(), preset.rotation());
        }
    }

    #[test]
    fn inverse_composes_to_identity() {
        let mut t = yaw_rotation(0.6);
        t.set_translation([5.0, -1.0, 2.0]);
        let composed = t.compose(&t.inverse());
        assert!(composed.approx_eq(&RigidTransform::identity(), 1.0e-9));
    }

    #[test]
    fn transform_point_applies_rotation_then_translation() {
        let mut t = yaw_rotation(std::f64::consts::FRAC_PI_2);
        t.set_translation([1.0, 0.0, 0.0]);
        let p = t.transform_point([1.0, 0.0, 0.0]);
        assert!((p[0] - 1.0).abs() < 1.0e-9);
        assert!((p[1] - 1.0).abs() < 1.0e-9);
        assert!(p[2].abs() < 1.0e-9);
    }
}
