//! The Jacobian container: per-design-variable accumulation of dense partial
//! derivative blocks, plus the chain-rule matrix stack that composite
//! expression nodes use to narrow the effective derivative of everything
//! evaluated beneath them.
//!
//! A container is created with a fixed row dimension (the output dimension of
//! the quantity being differentiated). Composite nodes push their local
//! derivative with [`JacobianContainer::apply`]; the returned scope guard pops
//! the pending matrix again on every exit path. Leaf nodes terminate a chain
//! with [`JacobianContainer::add`] or [`JacobianContainer::add_identity`],
//! which composes the pending chain-rule matrix with the leaf Jacobian and
//! sums the result into the per-variable block.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::design_variable::{DesignVariable, VariableKey};

/// One accumulated Jacobian block and the design variable it belongs to.
pub struct JacobianBlock {
    pub variable: Arc<dyn DesignVariable>,
    pub jacobian: DMatrix<f64>,
}

/// Accumulator mapping design variables to dense Jacobian blocks for one
/// evaluation pass.
pub struct JacobianContainer {
    rows: usize,
    blocks: HashMap<VariableKey, JacobianBlock>,
    chain: Vec<DMatrix<f64>>,
}

impl JacobianContainer {
    /// A container for a quantity with `rows` output dimensions.
    pub fn new(rows: usize) -> Self {
        assert!(rows > 0, "Jacobian container needs at least one row");
        JacobianContainer {
            rows,
            blocks: HashMap::new(),
            chain: Vec::new(),
        }
    }

    /// The output dimension this container accumulates derivatives of.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The column dimension expected from the next `add`: the domain of the
    /// pending chain-rule matrix, or `rows()` when no chain rule is pending.
    pub fn current_domain(&self) -> usize {
        self.chain.last().map_or(self.rows, |top| top.ncols())
    }

    pub(crate) fn chain_top(&self) -> Option<&DMatrix<f64>> {
        self.chain.last()
    }

    /// Push a pre-composed chain-rule matrix. Callers go through
    /// [`apply`](Self::apply) / [`apply_scalar`](Self::apply_scalar) or
    /// [`crate::differential::apply_differential`].
    pub(crate) fn push_chain(&mut self, matrix: DMatrix<f64>) -> ChainRuleScope<'_> {
        assert_eq!(
            matrix.nrows(),
            self.rows,
            "chain-rule matrix must keep the container row dimension"
        );
        self.chain.push(matrix);
        ChainRuleScope { container: self }
    }

    /// Install `rule` as the pending chain-rule matrix, composed with any
    /// already-pending matrix. The returned guard restores the previous state
    /// when it goes out of scope.
    pub fn apply(&mut self, rule: &DMatrix<f64>) -> ChainRuleScope<'_> {
        assert_eq!(
            rule.nrows(),
            self.current_domain(),
            "chain-rule matrix with {} rows does not match the current domain {}",
            rule.nrows(),
            self.current_domain()
        );
        let composed = match self.chain.last() {
            Some(top) => top * rule,
            None => rule.clone(),
        };
        self.push_chain(composed)
    }

    /// Install a scalar chain-rule factor (a scaling of the current domain).
    pub fn apply_scalar(&mut self, factor: f64) -> ChainRuleScope<'_> {
        let composed = match self.chain.last() {
            Some(top) => top * factor,
            None => DMatrix::identity(self.rows, self.rows) * factor,
        };
        self.push_chain(composed)
    }

    /// Sum `jacobian`, pre-multiplied by the pending chain-rule matrix, into
    /// the block of `variable`. Allocates a zero block on first touch.
    pub fn add(&mut self, variable: &Arc<dyn DesignVariable>, jacobian: &DMatrix<f64>) {
        assert_eq!(
            jacobian.nrows(),
            self.current_domain(),
            "leaf Jacobian with {} rows does not match the current domain {}",
            jacobian.nrows(),
            self.current_domain()
        );
        assert_eq!(
            jacobian.ncols(),
            variable.minimal_dimension(),
            "leaf Jacobian with {} columns does not match the minimal dimension {}",
            jacobian.ncols(),
            variable.minimal_dimension()
        );
        let effective = match self.chain.last() {
            Some(top) => top * jacobian,
            None => jacobian.clone(),
        };
        self.accumulate(variable, effective);
    }

    /// Leaf shortcut for an identity local Jacobian: sum the pending
    /// chain-rule matrix itself into the block of `variable`.
    pub fn add_identity(&mut self, variable: &Arc<dyn DesignVariable>) {
        let effective = match self.chain.last() {
            Some(top) => top.clone(),
            None => DMatrix::identity(self.rows, self.rows),
        };
        assert_eq!(
            effective.ncols(),
            variable.minimal_dimension(),
            "chain-rule domain {} does not match the minimal dimension {}",
            effective.ncols(),
            variable.minimal_dimension()
        );
        self.accumulate(variable, effective);
    }

    fn accumulate(&mut self, variable: &Arc<dyn DesignVariable>, increment: DMatrix<f64>) {
        let rows = self.rows;
        let block = self
            .blocks
            .entry(VariableKey::of(variable))
            .or_insert_with(|| JacobianBlock {
                variable: variable.clone(),
                jacobian: DMatrix::zeros(rows, variable.minimal_dimension()),
            });
        block.jacobian += increment;
    }

    /// The accumulated block of `variable`, if any path reached it.
    pub fn jacobian(&self, variable: &Arc<dyn DesignVariable>) -> Option<&DMatrix<f64>> {
        self.blocks
            .get(&VariableKey::of(variable))
            .map(|block| &block.jacobian)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &JacobianBlock> {
        self.blocks.values()
    }

    pub fn design_variables(&self) -> impl Iterator<Item = &Arc<dyn DesignVariable>> {
        self.blocks.values().map(|block| &block.variable)
    }

    pub fn num_variables(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop all accumulated blocks, keeping the row dimension.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Stack all blocks horizontally into one `rows x total_cols` matrix,
    /// each block placed at its design variable's column base.
    ///
    /// Panics if a reached variable has no column base assigned (the owning
    /// problem assigns bases in `initialize`).
    pub fn as_dense_matrix(&self, total_cols: usize) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.rows, total_cols);
        for block in self.blocks.values() {
            let base = block
                .variable
                .column_base()
                .expect("design variable has no column base assigned");
            let dim = block.variable.minimal_dimension();
            let mut view = dense.view_mut((0, base), (self.rows, dim));
            view += &block.jacobian;
        }
        dense
    }

    /// Numerical health check: true when every accumulated entry is finite.
    pub fn is_finite(&self) -> bool {
        self.blocks
            .values()
            .all(|block| block.jacobian.iter().all(|v| v.is_finite()))
    }
}

/// Guard for a pending chain-rule matrix; pops it again on drop, whichever
/// way the nested evaluation exits.
pub struct ChainRuleScope<'a> {
    container: &'a mut JacobianContainer,
}

impl Deref for ChainRuleScope<'_> {
    type Target = JacobianContainer;

    fn deref(&self) -> &JacobianContainer {
        self.container
    }
}

impl DerefMut for ChainRuleScope<'_> {
    fn deref_mut(&mut self) -> &mut JacobianContainer {
        self.container
    }
}

impl Drop for ChainRuleScope<'_> {
    fn drop(&mut self) {
        self.container.chain.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design_variable::{EuclideanPoint, Scalar};
    use nalgebra::Vector3;

    fn point() -> Arc<dyn DesignVariable> {
        Arc::new(EuclideanPoint::new(Vector3::zeros()))
    }

    #[test]
    fn test_add_accumulates_over_paths() {
        let dv = point();
        let mut jc = JacobianContainer::new(3);
        let a = DMatrix::identity(3, 3) * 2.0;
        let b = DMatrix::identity(3, 3) * 3.0;
        jc.add(&dv, &a);
        jc.add(&dv, &b);
        assert_eq!(jc.num_variables(), 1);
        assert_eq!(jc.jacobian(&dv).unwrap()[(0, 0)], 5.0);
    }

    #[test]
    fn test_accumulation_is_order_independent() {
        let dv = point();
        let a = DMatrix::from_fn(3, 3, |i, j| (i + 2 * j) as f64);
        let b = DMatrix::from_fn(3, 3, |i, j| (3 * i) as f64 - j as f64);

        let mut forward = JacobianContainer::new(3);
        forward.add(&dv, &a);
        forward.add(&dv, &b);

        let mut reversed = JacobianContainer::new(3);
        reversed.add(&dv, &b);
        reversed.add(&dv, &a);

        assert_eq!(forward.jacobian(&dv).unwrap(), reversed.jacobian(&dv).unwrap());
    }

    #[test]
    fn test_chain_rule_scope_composes_and_restores() {
        let dv = point();
        let mut jc = JacobianContainer::new(3);
        {
            let rule = DMatrix::identity(3, 3) * 2.0;
            let mut outer = jc.apply(&rule);
            assert_eq!(outer.current_domain(), 3);
            {
                let mut inner = outer.apply_scalar(-1.0);
                inner.add_identity(&dv);
            }
            // inner scope popped, outer still pending
            outer.add_identity(&dv);
        }
        assert_eq!(jc.current_domain(), 3);
        // -2 I + 2 I = 0
        assert_eq!(jc.jacobian(&dv).unwrap(), &DMatrix::zeros(3, 3));
    }

    #[test]
    fn test_chain_rule_narrows_domain() {
        let x: Arc<dyn DesignVariable> = Arc::new(Scalar::new(0.0));
        let mut jc = JacobianContainer::new(3);
        let rule = DMatrix::from_column_slice(3, 1, &[1.0, 2.0, 3.0]);
        {
            let mut scope = jc.apply(&rule);
            assert_eq!(scope.current_domain(), 1);
            scope.add_identity(&x);
        }
        let block = jc.jacobian(&x).unwrap();
        assert_eq!(block.shape(), (3, 1));
        assert_eq!(block[(2, 0)], 3.0);
    }

    #[test]
    fn test_as_dense_matrix_orders_by_column_base() {
        let x: Arc<dyn DesignVariable> = Arc::new(Scalar::new(0.0));
        let p = point();
        x.set_column_base(Some(3));
        p.set_column_base(Some(0));

        let mut jc = JacobianContainer::new(3);
        jc.add(&p, &(DMatrix::identity(3, 3) * 2.0));
        jc.add(&x, &DMatrix::from_column_slice(3, 1, &[7.0, 8.0, 9.0]));

        let dense = jc.as_dense_matrix(4);
        assert_eq!(dense.shape(), (3, 4));
        assert_eq!(dense[(1, 1)], 2.0);
        assert_eq!(dense[(0, 3)], 7.0);
        assert_eq!(dense[(2, 3)], 9.0);
    }

    #[test]
    fn test_is_finite_detects_bad_entries() {
        let dv = point();
        let mut jc = JacobianContainer::new(3);
        jc.add(&dv, &DMatrix::identity(3, 3));
        assert!(jc.is_finite());
        jc.add(&dv, &(DMatrix::identity(3, 3) * f64::NAN));
        assert!(!jc.is_finite());
    }

    #[test]
    #[should_panic(expected = "does not match the current domain")]
    fn test_dimension_mismatch_panics() {
        let dv = point();
        let mut jc = JacobianContainer::new(3);
        let wrong = DMatrix::<f64>::zeros(2, 3);
        jc.add(&dv, &wrong);
    }
}
