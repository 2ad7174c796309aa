//! A 3x3 matrix design variable with a configurable update pattern.

use nalgebra::{DMatrix, DVector, Matrix3};

use crate::design_variable::{DesignVariable, VariableCore};

/// A general 3x3 matrix whose entries are optionally design variables.
///
/// The update pattern marks which of the nine entries (column-major order)
/// participate in optimization; the remaining entries stay constant. The
/// minimal dimension equals the number of marked entries, and minimal updates
/// add the packed increment to the marked entries in column-major order.
pub struct MatrixTransformation {
    core: VariableCore<Matrix3<f64>>,
    pattern: [bool; 9],
    active_entries: Vec<usize>,
}

impl MatrixTransformation {
    /// A matrix variable where every entry is free.
    pub fn new(a: Matrix3<f64>) -> Self {
        Self::with_pattern(a, [true; 9])
    }

    /// A matrix variable with an explicit update pattern, column-major order.
    pub fn with_pattern(a: Matrix3<f64>, pattern: [bool; 9]) -> Self {
        let active_entries: Vec<usize> =
            (0..9).filter(|&i| pattern[i]).collect();
        MatrixTransformation {
            core: VariableCore::new(a),
            pattern,
            active_entries,
        }
    }

    /// The current matrix.
    pub fn matrix(&self) -> Matrix3<f64> {
        self.core.value()
    }

    pub fn pattern(&self) -> &[bool; 9] {
        &self.pattern
    }

    /// The 9 x minimal-dimension selection matrix picking the marked entries
    /// out of the full column-major entry derivative.
    pub(crate) fn selection_jacobian(&self) -> DMatrix<f64> {
        let mut selection = DMatrix::zeros(9, self.active_entries.len());
        for (j, &entry) in self.active_entries.iter().enumerate() {
            selection[(entry, j)] = 1.0;
        }
        selection
    }
}

impl DesignVariable for MatrixTransformation {
    fn minimal_dimension(&self) -> usize {
        self.active_entries.len()
    }

    fn update(&self, dx: &[f64]) {
        assert_eq!(
            dx.len(),
            self.active_entries.len(),
            "matrix update expects {} elements, got {}",
            self.active_entries.len(),
            dx.len()
        );
        let entries = self.active_entries.clone();
        self.core.mutate(|a| {
            let mut updated = *a;
            for (j, &entry) in entries.iter().enumerate() {
                updated[entry] += dx[j];
            }
            updated
        });
    }

    fn revert(&self) {
        self.core.revert();
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_column_slice(self.core.value().as_slice())
    }

    fn set_parameters(&self, p: &[f64]) {
        assert_eq!(p.len(), 9, "matrix expects 9 parameters, got {}", p.len());
        let value = Matrix3::from_column_slice(p);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pattern_updates_every_entry() {
        let a = MatrixTransformation::new(Matrix3::identity());
        assert_eq!(a.minimal_dimension(), 9);
        let dx: Vec<f64> = (0..9).map(|i| i as f64 * 0.1).collect();
        a.update(&dx);
        let m = a.matrix();
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(1, 0)], 0.1);
        assert_eq!(m[(0, 1)], 0.3);
        assert_eq!(m[(2, 2)], 1.8);
    }

    #[test]
    fn test_pattern_restricts_update() {
        // only the diagonal is free
        let mut pattern = [false; 9];
        pattern[0] = true;
        pattern[4] = true;
        pattern[8] = true;
        let a = MatrixTransformation::with_pattern(Matrix3::identity(), pattern);
        assert_eq!(a.minimal_dimension(), 3);

        a.update(&[0.5, -0.25, 1.0]);
        let m = a.matrix();
        assert_eq!(m[(0, 0)], 1.5);
        assert_eq!(m[(1, 1)], 0.75);
        assert_eq!(m[(2, 2)], 2.0);
        assert_eq!(m[(1, 0)], 0.0);

        a.revert();
        assert_eq!(a.matrix(), Matrix3::identity());
    }

    #[test]
    fn test_selection_jacobian_picks_marked_columns() {
        let mut pattern = [false; 9];
        pattern[1] = true;
        pattern[6] = true;
        let a = MatrixTransformation::with_pattern(Matrix3::zeros(), pattern);
        let s = a.selection_jacobian();
        assert_eq!(s.shape(), (9, 2));
        assert_eq!(s[(1, 0)], 1.0);
        assert_eq!(s[(6, 1)], 1.0);
        assert_eq!(s.sum(), 2.0);
    }
}
