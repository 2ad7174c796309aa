//! A rotation design variable backed by a unit quaternion.

use nalgebra::{DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::design_variable::{DesignVariable, VariableCore};

#[derive(Clone)]
pub(crate) struct QuaternionState {
    q: UnitQuaternion<f64>,
    c: Matrix3<f64>,
}

impl QuaternionState {
    fn new(q: UnitQuaternion<f64>) -> Self {
        QuaternionState {
            c: q.to_rotation_matrix().into_inner(),
            q,
        }
    }
}

/// A rotation parameterized by a unit quaternion (4 parameters, minimal
/// dimension 3).
///
/// The minimal update is a left (world-frame) perturbation,
/// `q ← exp(δ) · q`. The rotation matrix is cached alongside the quaternion
/// and recomputed on every mutation, so Jacobian passes always see a value
/// consistent with the last forward evaluation.
pub struct RotationQuaternion {
    core: VariableCore<QuaternionState>,
}

impl RotationQuaternion {
    pub fn new(q: UnitQuaternion<f64>) -> Self {
        RotationQuaternion {
            core: VariableCore::new(QuaternionState::new(q)),
        }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity())
    }

    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// The current quaternion.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.core.value().q
    }

    /// The cached rotation matrix of the current quaternion.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.core.value().c
    }
}

impl DesignVariable for RotationQuaternion {
    fn minimal_dimension(&self) -> usize {
        3
    }

    fn update(&self, dx: &[f64]) {
        assert_eq!(dx.len(), 3, "rotation update expects 3 elements, got {}", dx.len());
        let delta = UnitQuaternion::from_scaled_axis(Vector3::new(dx[0], dx[1], dx[2]));
        self.core.mutate(|s| QuaternionState::new(delta * s.q));
    }

    fn revert(&self) {
        self.core.revert();
    }

    fn parameters(&self) -> DVector<f64> {
        // [x, y, z, w]
        DVector::from_column_slice(self.core.value().q.coords.as_slice())
    }

    fn set_parameters(&self, p: &[f64]) {
        assert_eq!(p.len(), 4, "rotation expects 4 parameters, got {}", p.len());
        let q = UnitQuaternion::from_quaternion(Quaternion::new(p[3], p[0], p[1], p[2]));
        self.core.mutate(|_| QuaternionState::new(q));
    }

    fn block_index(&self) -> Option<usize> {
        self.core.block_index()
    }

    fn set_block_index(&self, index: Option<usize>) {
        self.core.set_block_index(index);
    }

    fn column_base(&self) -> Option<usize> {
        self.core.column_base()
    }

    fn set_column_base(&self, base: Option<usize>) {
        self.core.set_column_base(base);
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn set_active(&self, active: bool) {
        self.core.set_active(active);
    }
}
