//! A single scalar design variable.

use nalgebra::DVector;

use crate::design_variable::{DesignVariable, VariableCore};

/// A one-dimensional parameter block with an additive update.
pub struct Scalar {
    core: VariableCore<f64>,
}

impl Scalar {
    pub fn new(value: f64) -> Self {
        Scalar {
            core: VariableCore::new(value),
        }
    }

    /// The current value.
    pub fn value(&self) -> f64 {
        self.core.value()
    }
}

impl DesignVariable for Scalar {
    fn minimal_dimension(&self) -> usize {
        1
    }

    fn update(&self, dx: &[f64]) {
        assert_eq!(dx.len(), 1, "scalar update expects 1 element, got {}", dx.len());
        self.core.mutate(|v| v + dx[0]);
    }

    fn revert(&self) {
        self.core.revert();
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_element(1, self.core.value())
    }

    fn set_parameters(&self, p: &[f64]) {
        assert_eq!(p.len(), 1, "scalar expects 1 parameter, got {}", p.len());
        self.core.mutate(|_| p[0]);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_then_revert_restores_value() {
        let x = Scalar::new(2.5);
        x.update(&[0.75]);
        assert_eq!(x.value(), 3.25);
        x.revert();
        assert_eq!(x.value(), 2.5);
    }

    #[test]
    fn test_double_revert_is_a_noop() {
        let x = Scalar::new(1.0);
        x.update(&[1.0]);
        x.revert();
        x.revert();
        assert_eq!(x.value(), 1.0);
    }

    #[test]
    fn test_set_parameters_snapshots_previous() {
        let x = Scalar::new(1.0);
        x.set_parameters(&[7.0]);
        assert_eq!(x.value(), 7.0);
        x.revert();
        assert_eq!(x.value(), 1.0);
    }

    #[test]
    #[should_panic(expected = "scalar update expects 1 element")]
    fn test_update_dimension_mismatch_panics() {
        let x = Scalar::new(0.0);
        x.update(&[1.0, 2.0]);
    }
}
