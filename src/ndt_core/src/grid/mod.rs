//! Sparse bundle grid.
//!
//! Cells are allocated lazily in an arena and indexed per sub-grid. Each of
//! the `2^D` sub-grids is offset by half a cell along a subset of the axes,
//! so every point lands in exactly one cell of every sub-grid. The cells that
//! cover a bundle index form that bundle; inserting a point updates all of
//! them.
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector2;
//! use ndt_core::grid::{GridConfig, Gridmap2d};
//!
//! let mut grid = Gridmap2d::new(GridConfig::uniform(1.0)).unwrap();
//! grid.insert(&Vector2::new(0.3, 0.7));
//!
//! let bundle = grid.bundle_at(&Vector2::new(0.4, 0.6)).unwrap();
//! assert_eq!(bundle.combined_distribution().n(), 4);
//! ```

mod bundle;
mod cell;
pub mod index;
mod search;

use std::collections::{BTreeSet, HashMap};

use nalgebra::SVector;

use crate::distribution::Distribution;
use crate::error::ConfigError;

pub use bundle::Bundle;
pub use cell::{CellData, InverseModel, LogOddsInverseModel, OccupancyCell, OccupancyData};
pub use index::{BundleIndex, CellIndex, LatticeRay, MAX_BUNDLE_SIZE};
pub use search::BundleMeanIndex;

use index::{bundle_index, bundle_size, bundles_of_cell, cell_index};

/// Grid geometry fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridConfig<const D: usize> {
    /// Cell edge length per axis.
    pub resolution: [f64; D],
    /// World position of the lattice origin.
    pub origin: [f64; D],
}

impl<const D: usize> GridConfig<D> {
    pub fn new(resolution: [f64; D]) -> Self {
        Self {
            resolution,
            origin: [0.0; D],
        }
    }

    /// Same resolution on every axis.
    pub fn uniform(resolution: f64) -> Self {
        Self::new([resolution; D])
    }

    pub fn with_origin(mut self, origin: [f64; D]) -> Self {
        self.origin = origin;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, &value) in self.resolution.iter().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidResolution { axis, value });
            }
        }
        for (axis, &value) in self.origin.iter().enumerate() {
            if !value.is_finite() {
                return Err(ConfigError::InvalidOrigin { axis, value });
            }
        }
        Ok(())
    }
}

/// Position of a cell in the grid's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(usize);

impl CellId {
    pub fn index(&self) -> usize {
        self.0
    }
}

type BundleSlots = [Option<CellId>; MAX_BUNDLE_SIZE];

/// Sparse grid of overlapping cells generic over the cell payload.
#[derive(Debug, Clone)]
pub struct NdtGrid<C, const D: usize> {
    config: GridConfig<D>,
    origin: SVector<f64, D>,
    bundle_resolution: SVector<f64, D>,
    cells: Vec<C>,
    sub_grids: Vec<HashMap<CellIndex<D>, CellId>>,
    /// Bundles whose `2^D` cells are all allocated.
    bundles: HashMap<BundleIndex<D>, BundleSlots>,
}

/// Plain NDT map.
pub type Gridmap<const D: usize> = NdtGrid<Distribution<D>, D>;
pub type Gridmap2d = Gridmap<2>;
pub type Gridmap3d = Gridmap<3>;

/// NDT map with per-cell hit/miss evidence.
pub type OccupancyGridmap<const D: usize> = NdtGrid<OccupancyCell<D>, D>;
pub type OccupancyGridmap2d = OccupancyGridmap<2>;
pub type OccupancyGridmap3d = OccupancyGridmap<3>;

fn is_finite<const D: usize>(point: &SVector<f64, D>) -> bool {
    point.iter().all(|v| v.is_finite())
}

impl<C: CellData<D>, const D: usize> NdtGrid<C, D> {
    const SUPPORTED_DIMENSION: () = assert!(
        D >= 1 && bundle_size(D) <= MAX_BUNDLE_SIZE,
        "bundle grids support 1 to 3 dimensions"
    );

    pub fn new(config: GridConfig<D>) -> Result<Self, ConfigError> {
        #[allow(clippy::let_unit_value)]
        let () = Self::SUPPORTED_DIMENSION;
        config.validate()?;

        Ok(Self {
            origin: SVector::from(config.origin),
            bundle_resolution: SVector::from(config.resolution) * 0.5,
            config,
            cells: Vec::new(),
            sub_grids: vec![HashMap::new(); bundle_size(D)],
            bundles: HashMap::new(),
        })
    }

    pub fn config(&self) -> &GridConfig<D> {
        &self.config
    }

    pub fn resolution(&self) -> &[f64; D] {
        &self.config.resolution
    }

    pub fn origin(&self) -> &[f64; D] {
        &self.config.origin
    }

    /// Spacing of the bundle lattice, half the cell resolution.
    pub fn bundle_resolution(&self) -> &SVector<f64, D> {
        &self.bundle_resolution
    }

    /// Number of allocated cells across all sub-grids.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of materialized bundles.
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, id: CellId) -> Option<&C> {
        self.cells.get(id.0)
    }

    /// Bundle lattice index of a world point.
    pub fn bundle_index_of(&self, point: &SVector<f64, D>) -> BundleIndex<D> {
        bundle_index(&(point - self.origin), &self.bundle_resolution)
    }

    /// Bundle containing `point`, built from the cells that exist.
    ///
    /// Returns `None` for non-finite points and when none of the cells has
    /// been allocated. Never allocates.
    pub fn bundle_at(&self, point: &SVector<f64, D>) -> Option<Bundle<'_, C, D>> {
        if !is_finite(point) {
            return None;
        }
        self.bundle(&self.bundle_index_of(point))
    }

    /// Bundle at an explicit lattice index.
    pub fn bundle(&self, index: &BundleIndex<D>) -> Option<Bundle<'_, C, D>> {
        let mut slots = [None; MAX_BUNDLE_SIZE];
        match self.bundles.get(index) {
            Some(ids) => {
                for (slot, id) in slots.iter_mut().zip(ids) {
                    *slot = id.map(|id| &self.cells[id.0]);
                }
            }
            None => {
                let mut any = false;
                for (i, slot) in slots.iter_mut().take(bundle_size(D)).enumerate() {
                    *slot = self.sub_grids[i]
                        .get(&cell_index(index, i))
                        .map(|id| &self.cells[id.0]);
                    any |= slot.is_some();
                }
                if !any {
                    return None;
                }
            }
        }
        Some(Bundle::new(*index, slots))
    }

    /// True if every cell of the bundle at `index` is allocated.
    pub fn is_materialized(&self, index: &BundleIndex<D>) -> bool {
        self.bundles.contains_key(index)
    }

    /// Indices of all materialized bundles in ascending order.
    pub fn bundle_indices(&self) -> Vec<BundleIndex<D>> {
        let mut indices: Vec<_> = self.bundles.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Visit every materialized bundle in ascending index order.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(&BundleIndex<D>, Bundle<'_, C, D>),
    {
        for index in self.bundle_indices() {
            if let Some(bundle) = self.bundle(&index) {
                visitor(&index, bundle);
            }
        }
    }

    /// Materialize every bundle that touches a non-empty cell but is missing
    /// some of its cells. New cells are empty.
    ///
    /// Returns the number of bundles materialized. Calling it again without
    /// inserting anything returns 0.
    pub fn allocate_partially_allocated_bundles(&mut self) -> usize {
        let mut pending = BTreeSet::new();
        for (slot, sub_grid) in self.sub_grids.iter().enumerate() {
            for (cell, id) in sub_grid {
                if self.cells[id.0].is_empty() {
                    continue;
                }
                for index in bundles_of_cell(cell, slot) {
                    if !self.bundles.contains_key(&index) {
                        pending.insert(index);
                    }
                }
            }
        }

        let count = pending.len();
        for index in pending {
            self.materialize(index);
        }
        tracing::debug!(
            materialized = count,
            bundles = self.bundles.len(),
            cells = self.cells.len(),
            "allocated partial bundles"
        );
        count
    }

    /// Drop every cell and bundle, keeping the configuration.
    pub fn clear(&mut self) {
        self.cells.clear();
        for sub_grid in &mut self.sub_grids {
            sub_grid.clear();
        }
        self.bundles.clear();
    }

    fn materialize(&mut self, index: BundleIndex<D>) -> BundleSlots {
        if let Some(ids) = self.bundles.get(&index) {
            return *ids;
        }
        let mut ids = [None; MAX_BUNDLE_SIZE];
        for (slot, id) in ids.iter_mut().take(bundle_size(D)).enumerate() {
            let key = cell_index(&index, slot);
            let cells = &mut self.cells;
            let cell_id = *self.sub_grids[slot].entry(key).or_insert_with(|| {
                cells.push(C::default());
                CellId(cells.len() - 1)
            });
            *id = Some(cell_id);
        }
        self.bundles.insert(index, ids);
        ids
    }

    /// Apply `update` to every cell of the bundle at `index`, allocating it
    /// first.
    fn update_bundle<F>(&mut self, index: BundleIndex<D>, mut update: F)
    where
        F: FnMut(&mut C),
    {
        for id in self.materialize(index).into_iter().flatten() {
            update(&mut self.cells[id.0]);
        }
    }
}

impl<const D: usize> NdtGrid<Distribution<D>, D> {
    /// Add a point with unit weight. Non-finite points are ignored.
    pub fn insert(&mut self, point: &SVector<f64, D>) {
        self.insert_weighted(point, 1.0);
    }

    pub fn insert_weighted(&mut self, point: &SVector<f64, D>, weight: f64) {
        if !is_finite(point) {
            return;
        }
        let index = self.bundle_index_of(point);
        self.update_bundle(index, |cell| cell.insert_weighted(point, weight));
    }

    pub fn insert_points<'a, I>(&mut self, points: I)
    where
        I: IntoIterator<Item = &'a SVector<f64, D>>,
    {
        for point in points {
            self.insert(point);
        }
    }
}

impl<const D: usize> NdtGrid<OccupancyCell<D>, D> {
    /// Record an endpoint at `point`. Non-finite points are ignored.
    pub fn insert_hit(&mut self, point: &SVector<f64, D>) {
        self.insert_hit_weighted(point, 1.0);
    }

    pub fn insert_hit_weighted(&mut self, point: &SVector<f64, D>, weight: f64) {
        if !is_finite(point) {
            return;
        }
        let index = self.bundle_index_of(point);
        self.update_bundle(index, |cell| cell.insert_hit_weighted(point, weight));
    }

    /// Record that a beam passed through `point`.
    pub fn insert_free(&mut self, point: &SVector<f64, D>) {
        if !is_finite(point) {
            return;
        }
        let index = self.bundle_index_of(point);
        self.update_bundle(index, OccupancyCell::insert_free);
    }

    /// Trace a beam from `origin` to `endpoint`.
    ///
    /// Every bundle crossed before the endpoint's bundle records a miss, then
    /// the endpoint records a hit.
    pub fn insert_ray(&mut self, origin: &SVector<f64, D>, endpoint: &SVector<f64, D>) {
        if !(is_finite(origin) && is_finite(endpoint)) {
            return;
        }
        let start = (origin - self.origin).component_div(&self.bundle_resolution);
        let end = (endpoint - self.origin).component_div(&self.bundle_resolution);
        let hit_index = self.bundle_index_of(endpoint);

        for index in LatticeRay::new(&start, &end) {
            if index == hit_index {
                break;
            }
            self.update_bundle(index, OccupancyCell::insert_free);
        }
        self.update_bundle(hit_index, |cell| cell.insert_hit(endpoint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn grid2(resolution: f64) -> Gridmap2d {
        Gridmap2d::new(GridConfig::uniform(resolution)).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(Gridmap2d::new(GridConfig::new([1.0, 0.0])).is_err());
        assert!(Gridmap3d::new(GridConfig::uniform(f64::NAN)).is_err());
        assert_eq!(
            Gridmap2d::new(GridConfig::uniform(1.0).with_origin([0.0, f64::INFINITY])).unwrap_err(),
            ConfigError::InvalidOrigin {
                axis: 1,
                value: f64::INFINITY
            }
        );
    }

    #[test]
    fn test_insert_allocates_one_cell_per_sub_grid() {
        let mut grid = grid2(1.0);
        grid.insert(&Vector2::new(0.2, 0.3));

        assert_eq!(grid.cell_count(), 4);
        assert_eq!(grid.bundle_count(), 1);
        assert_eq!(grid.bundle_index_of(&Vector2::new(0.2, 0.3)), [0, 0]);

        // A second point in the same bundle reuses the cells.
        grid.insert(&Vector2::new(0.4, 0.1));
        assert_eq!(grid.cell_count(), 4);
    }

    #[test]
    fn test_neighbouring_bundles_share_cells() {
        let mut grid = grid2(1.0);
        grid.insert(&Vector2::new(0.2, 0.2));
        // Bundle [1, 0] shares the unshifted cells with bundle [0, 0].
        grid.insert(&Vector2::new(0.7, 0.2));

        assert_eq!(grid.bundle_count(), 2);
        assert_eq!(grid.cell_count(), 6);

        let shared = grid.bundle(&[0, 0]).unwrap().at(0).unwrap();
        assert_eq!(shared.n(), 2);
    }

    #[test]
    fn test_bundle_at_does_not_allocate() {
        let mut grid = grid2(1.0);
        grid.insert(&Vector2::new(0.2, 0.2));

        // Bundle [-1, 0] shares two cells with [0, 0] but is not materialized.
        let partial = grid.bundle_at(&Vector2::new(-0.2, 0.2)).unwrap();
        assert!(!partial.is_complete());
        assert_eq!(partial.slots().filter(|c| c.is_some()).count(), 2);
        assert!(!grid.is_materialized(&[-1, 0]));

        assert!(grid.bundle_at(&Vector2::new(10.0, 10.0)).is_none());
        assert!(grid.bundle_at(&Vector2::new(f64::NAN, 0.0)).is_none());
        assert_eq!(grid.cell_count(), 4);
    }

    #[test]
    fn test_origin_shifts_lattice() {
        let mut grid = Gridmap2d::new(GridConfig::uniform(1.0).with_origin([-0.25, -0.25])).unwrap();
        assert_eq!(grid.bundle_index_of(&Vector2::new(0.2, 0.2)), [0, 0]);
        assert_eq!(grid.bundle_index_of(&Vector2::new(0.3, 0.2)), [1, 0]);
        grid.insert(&Vector2::new(0.3, 0.2));
        assert!(grid.is_materialized(&[1, 0]));
    }

    #[test]
    fn test_traverse_is_sorted() {
        let mut grid = grid2(1.0);
        for p in [
            Vector2::new(3.1, 0.1),
            Vector2::new(-2.2, 0.4),
            Vector2::new(0.1, -1.3),
            Vector2::new(0.1, 5.0),
        ] {
            grid.insert(&p);
        }

        let mut visited = Vec::new();
        grid.traverse(|index, bundle| {
            assert!(bundle.is_complete());
            visited.push(*index);
        });
        let mut sorted = visited.clone();
        sorted.sort();
        assert_eq!(visited, sorted);
        assert_eq!(visited, grid.bundle_indices());
        assert_eq!(visited.len(), 4);
    }

    #[test]
    fn test_allocate_partial_bundles_is_idempotent() {
        let mut grid = grid2(1.0);
        grid.insert(&Vector2::new(0.2, 0.2));
        grid.insert(&Vector2::new(2.6, -1.1));

        let first = grid.allocate_partially_allocated_bundles();
        assert!(first > 0);
        let cells = grid.cell_count();
        let bundles = grid.bundle_indices();

        assert_eq!(grid.allocate_partially_allocated_bundles(), 0);
        assert_eq!(grid.cell_count(), cells);
        assert_eq!(grid.bundle_indices(), bundles);

        // Every bundle touching the inserted point's cells is now complete.
        for index in bundles_of_cell(&cell_index(&[0, 0], 0), 0) {
            assert!(grid.is_materialized(&index));
        }
    }

    #[test]
    fn test_single_point_partial_allocation_count() {
        // One point fills four cells, each touching four bundles: a 3x3
        // neighbourhood of bundle indices around [0, 0].
        let mut grid = grid2(1.0);
        grid.insert(&Vector2::new(0.2, 0.2));
        assert_eq!(grid.allocate_partially_allocated_bundles(), 8);
        assert_eq!(grid.bundle_count(), 9);
    }

    #[test]
    fn test_occupancy_hit_and_free() {
        let mut grid = OccupancyGridmap3d::new(GridConfig::uniform(0.5)).unwrap();
        let p = Vector3::new(0.1, 0.1, 0.1);
        grid.insert_hit(&p);
        grid.insert_free(&p);

        let bundle = grid.bundle_at(&p).unwrap();
        assert_eq!(bundle.len(), 8);
        for cell in bundle.slots().flatten() {
            assert_eq!(cell.hits(), 1);
            assert_eq!(cell.misses(), 1);
        }
        let model = |hits: usize, misses: usize| hits as f64 / (hits + misses) as f64;
        assert_relative_eq!(bundle.combined_occupancy(&model), 0.5);
    }

    #[test]
    fn test_insert_ray_marks_free_space() {
        let mut grid = OccupancyGridmap2d::new(GridConfig::uniform(1.0)).unwrap();
        grid.insert_ray(&Vector2::new(0.25, 0.25), &Vector2::new(2.25, 0.25));

        // Bundle lattice spacing is 0.5, so the beam crosses bundles 0..=3
        // and ends in bundle 4.
        for x in 0..4 {
            let bundle = grid.bundle(&[x, 0]).unwrap();
            assert!(bundle.is_complete());
        }
        let hit = grid.bundle(&[4, 0]).unwrap();
        assert!(hit.slots().flatten().all(|c| c.hits() == 1));
        assert_eq!(hit.combined_distribution().n(), 4);

        let start = grid.bundle(&[0, 0]).unwrap();
        assert!(start.slots().flatten().all(|c| c.misses() >= 1 && c.hits() == 0));
    }
}
