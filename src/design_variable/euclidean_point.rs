//! A 3-vector design variable.

use nalgebra::{DVector, Vector3};

use crate::design_variable::{DesignVariable, VariableCore};

/// A Euclidean point in R³ with an additive update and minimal dimension 3.
pub struct EuclideanPoint {
    core: VariableCore<Vector3<f64>>,
}

impl EuclideanPoint {
    pub fn new(value: Vector3<f64>) -> Self {
        EuclideanPoint {
            core: VariableCore::new(value),
        }
    }

    /// The current point.
    pub fn value(&self) -> Vector3<f64> {
        self.core.value()
    }
}

impl DesignVariable for EuclideanPoint {
    fn minimal_dimension(&self) -> usize {
        3
    }

    fn update(&self, dx: &[f64]) {
        assert_eq!(dx.len(), 3, "point update expects 3 elements, got {}", dx.len());
        let delta = Vector3::new(dx[0], dx[1], dx[2]);
        self.core.mutate(|v| v + delta);
    }

    fn revert(&self) {
        self.core.revert();
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_column_slice(self.core.value().as_slice())
    }

    fn set_parameters(&self, p: &[f64]) {
        assert_eq!(p.len(), 3, "point expects 3 parameters, got {}", p.len());
        let value = Vector3::new(p[0], p[1], p[2]);
        self.core.mutate(|_| value);
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
