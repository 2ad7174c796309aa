//! Design variables: the mutable parameter blocks of an optimization problem.
//!
//! A design variable owns its current value in the native representation, a
//! single-level undo buffer, and the bookkeeping assigned by the owning
//! problem (block index, column base, active flag). Updates happen in minimal
//! (tangent-space) coordinates; `update` always snapshots the prior value so
//! exactly one `revert` undoes the last update.
//!
//! Variables are shared as `Arc<dyn DesignVariable>` between expression
//! leaves, error terms and the problem. All state sits behind an `RwLock` so
//! parallel error-term evaluation can read values concurrently while the
//! optimizer remains the single writer between iterations.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use nalgebra::DVector;

pub mod euclidean_point;
pub mod matrix_transformation;
pub mod rotation_quaternion;
pub mod scalar;

pub use euclidean_point::EuclideanPoint;
pub use matrix_transformation::MatrixTransformation;
pub use rotation_quaternion::RotationQuaternion;
pub use scalar::Scalar;

/// A mutable parameter block participating in the optimization.
///
/// All mutators take `&self`; interior mutability lets the same variable be
/// referenced by several expression graphs and error terms. Calling `revert`
/// twice without an intervening `update` is a no-op: the undo buffer keeps the
/// value it restored.
pub trait DesignVariable: Send + Sync {
    /// Size of a minimal (tangent-space) update step.
    fn minimal_dimension(&self) -> usize;

    /// Snapshot the current value, then apply the minimal-coordinates
    /// increment `dx`.
    ///
    /// Panics if `dx.len() != minimal_dimension()`.
    fn update(&self, dx: &[f64]);

    /// Restore the value snapshotted by the last `update`/`set_parameters`.
    fn revert(&self);

    /// The raw parameters in the native (non-minimal) representation.
    fn parameters(&self) -> DVector<f64>;

    /// Overwrite the raw parameters, snapshotting the prior value first.
    ///
    /// Panics if `p` has the wrong length for the native representation.
    fn set_parameters(&self, p: &[f64]);

    /// Block ordinal assigned by the owning problem, if initialized.
    fn block_index(&self) -> Option<usize>;

    /// Assign the block ordinal.
    fn set_block_index(&self, index: Option<usize>);

    /// Column offset of this variable inside stacked Jacobians and gradients.
    fn column_base(&self) -> Option<usize>;

    /// Assign the column offset.
    fn set_column_base(&self, base: Option<usize>);

    /// Whether this variable participates in optimization.
    fn is_active(&self) -> bool;

    /// Activate or deactivate this variable.
    fn set_active(&self, active: bool);
}

/// Identity of a design variable: the address of its shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableKey(usize);

impl VariableKey {
    /// The key of a shared design variable.
    pub fn of(variable: &Arc<dyn DesignVariable>) -> Self {
        VariableKey(Arc::as_ptr(variable) as *const () as usize)
    }
}

/// Insertion-ordered, pointer-deduplicated collection of design variables.
#[derive(Default)]
pub struct DesignVariableSet {
    variables: Vec<Arc<dyn DesignVariable>>,
    seen: HashSet<VariableKey>,
}

impl DesignVariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable, returning whether it was newly added.
    pub fn insert(&mut self, variable: &Arc<dyn DesignVariable>) -> bool {
        if self.seen.insert(VariableKey::of(variable)) {
            self.variables.push(variable.clone());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, variable: &Arc<dyn DesignVariable>) -> bool {
        self.seen.contains(&VariableKey::of(variable))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DesignVariable>> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn into_vec(self) -> Vec<Arc<dyn DesignVariable>> {
        self.variables
    }
}

struct VariableState<T> {
    value: T,
    previous: T,
    block_index: Option<usize>,
    column_base: Option<usize>,
    active: bool,
}

/// Shared storage backing every concrete design variable: the current value,
/// the one-level undo buffer and the problem-assigned bookkeeping.
pub(crate) struct VariableCore<T: Clone> {
    state: RwLock<VariableState<T>>,
}

impl<T: Clone> VariableCore<T> {
    pub(crate) fn new(value: T) -> Self {
        VariableCore {
            state: RwLock::new(VariableState {
                previous: value.clone(),
                value,
                block_index: None,
                column_base: None,
                active: true,
            }),
        }
    }

    pub(crate) fn value(&self) -> T {
        self.state.read().unwrap().value.clone()
    }

    /// Snapshot the current value into the undo buffer, then replace it.
    pub(crate) fn mutate(&self, f: impl FnOnce(&T) -> T) {
        let mut state = self.state.write().unwrap();
        state.previous = state.value.clone();
        state.value = f(&state.value);
    }

    pub(crate) fn revert(&self) {
        let mut state = self.state.write().unwrap();
        state.value = state.previous.clone();
    }

    pub(crate) fn block_index(&self) -> Option<usize> {
        self.state.read().unwrap().block_index
    }

    pub(crate) fn set_block_index(&self, index: Option<usize>) {
        self.state.write().unwrap().block_index = index;
    }

    pub(crate) fn column_base(&self) -> Option<usize> {
        self.state.read().unwrap().column_base
    }

    pub(crate) fn set_column_base(&self, base: Option<usize>) {
        self.state.write().unwrap().column_base = base;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.read().unwrap().active
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state.write().unwrap().active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_deduplicates_by_identity() {
        let a: Arc<dyn DesignVariable> = Arc::new(Scalar::new(1.0));
        let b: Arc<dyn DesignVariable> = Arc::new(Scalar::new(1.0));

        let mut set = DesignVariableSet::new();
        assert!(set.insert(&a));
        assert!(!set.insert(&a));
        assert!(set.insert(&b));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_set_preserves_insertion_order() {
        let a: Arc<dyn DesignVariable> = Arc::new(Scalar::new(1.0));
        let b: Arc<dyn DesignVariable> = Arc::new(Scalar::new(2.0));
        let c: Arc<dyn DesignVariable> = Arc::new(Scalar::new(3.0));

        let mut set = DesignVariableSet::new();
        set.insert(&b);
        set.insert(&a);
        set.insert(&c);
        set.insert(&b);

        let order: Vec<f64> = set.iter().map(|dv| dv.parameters()[0]).collect();
        assert_eq!(order, vec![2.0, 1.0, 3.0]);
    }
}
