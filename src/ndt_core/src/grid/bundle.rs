//! Read-only bundle views.

use std::fmt;

use super::cell::{CellData, InverseModel, OccupancyData};
use super::index::{bundle_size, BundleIndex, MAX_BUNDLE_SIZE};
use crate::distribution::Distribution;

/// The `2^D` overlapping cells covering one bundle index.
///
/// Slot `i` holds the cell of sub-grid `i`, or `None` if that cell was never
/// allocated. Views borrow the grid and own nothing.
pub struct Bundle<'a, C, const D: usize> {
    index: BundleIndex<D>,
    cells: [Option<&'a C>; MAX_BUNDLE_SIZE],
}

impl<C, const D: usize> Clone for Bundle<'_, C, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, const D: usize> Copy for Bundle<'_, C, D> {}

impl<C, const D: usize> fmt::Debug for Bundle<'_, C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<bool> = self.slots().map(|c| c.is_some()).collect();
        f.debug_struct("Bundle")
            .field("index", &self.index)
            .field("present", &present)
            .finish()
    }
}

impl<'a, C, const D: usize> Bundle<'a, C, D> {
    pub(crate) fn new(index: BundleIndex<D>, cells: [Option<&'a C>; MAX_BUNDLE_SIZE]) -> Self {
        Self { index, cells }
    }

    /// Lattice index of this bundle.
    pub fn index(&self) -> &BundleIndex<D> {
        &self.index
    }

    /// Number of slots, `2^D`.
    pub fn len(&self) -> usize {
        bundle_size(D)
    }

    /// Cell in slot `i`, or `None` if it is missing or `i >= 2^D`.
    pub fn at(&self, i: usize) -> Option<&'a C> {
        if i < bundle_size(D) {
            self.cells[i]
        } else {
            None
        }
    }

    /// All `2^D` slots in order.
    pub fn slots(&self) -> impl Iterator<Item = Option<&'a C>> + '_ {
        self.cells[..bundle_size(D)].iter().copied()
    }

    /// True if every slot holds a cell.
    pub fn is_complete(&self) -> bool {
        self.slots().all(|c| c.is_some())
    }
}

impl<'a, C: CellData<D>, const D: usize> Bundle<'a, C, D> {
    /// Present cells' distributions merged with equal weight.
    pub fn combined_distribution(&self) -> Distribution<D> {
        let mut combined = Distribution::new();
        for cell in self.slots().flatten() {
            combined.merge(cell.distribution());
        }
        combined
    }

    /// True if no present cell holds a sample.
    pub fn is_empty(&self) -> bool {
        self.slots().flatten().all(|c| c.distribution().is_empty())
    }
}

impl<'a, C: OccupancyData<D>, const D: usize> Bundle<'a, C, D> {
    /// Mean occupancy over all `2^D` slots; a missing cell counts as 0.
    pub fn combined_occupancy<M: InverseModel + ?Sized>(&self, model: &M) -> f64 {
        let total: f64 = self.slots().flatten().map(|c| c.occupancy(model)).sum();
        total / bundle_size(D) as f64
    }
}
