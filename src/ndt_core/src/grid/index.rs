//! Integer index arithmetic for the bundle lattice.
//!
//! Bundles live on a lattice with half the cell resolution. Each bundle is
//! covered by one cell from each of the `2^D` sub-grids; sub-grid `i` is
//! shifted by `-resolution / 2` along every axis `k` whose bit is set in `i`.

use nalgebra::SVector;

/// Integer coordinates on the bundle lattice.
pub type BundleIndex<const D: usize> = [i32; D];

/// Integer coordinates of a cell inside one sub-grid.
pub type CellIndex<const D: usize> = [i32; D];

/// Largest supported bundle size (`2^3`).
pub const MAX_BUNDLE_SIZE: usize = 8;

/// Number of cells in a bundle for dimension `D`.
pub const fn bundle_size(dimension: usize) -> usize {
    1 << dimension
}

/// Bundle index of a point expressed relative to the grid origin.
pub fn bundle_index<const D: usize>(
    local: &SVector<f64, D>,
    bundle_resolution: &SVector<f64, D>,
) -> BundleIndex<D> {
    std::array::from_fn(|k| (local[k] / bundle_resolution[k]).floor() as i32)
}

/// Index, inside sub-grid `slot`, of the cell that covers bundle `bundle`.
pub fn cell_index<const D: usize>(bundle: &BundleIndex<D>, slot: usize) -> CellIndex<D> {
    std::array::from_fn(|k| {
        if slot & (1 << k) == 0 {
            bundle[k].div_euclid(2)
        } else {
            (bundle[k] + 1).div_euclid(2)
        }
    })
}

/// Every bundle index covered by cell `cell` of sub-grid `slot`.
///
/// A cell spans two bundle indices per axis: `{2c, 2c + 1}` for an unshifted
/// axis and `{2c - 1, 2c}` for a shifted one.
pub fn bundles_of_cell<const D: usize>(
    cell: &CellIndex<D>,
    slot: usize,
) -> impl Iterator<Item = BundleIndex<D>> {
    let lower: [i32; D] = std::array::from_fn(|k| {
        if slot & (1 << k) == 0 {
            2 * cell[k]
        } else {
            2 * cell[k] - 1
        }
    });
    (0..bundle_size(D))
        .map(move |corner| std::array::from_fn(|k| lower[k] + ((corner >> k) & 1) as i32))
}

/// Walks every bundle index crossed by a segment on the bundle lattice.
///
/// Coordinates are in lattice units (already divided by the bundle
/// resolution). Both end bundles are yielded. The walk visits at most
/// `1 + Σ|end_k - start_k|` indices, which bounds it even when floating point
/// ties make it step around the end index.
#[derive(Debug, Clone)]
pub struct LatticeRay<const D: usize> {
    current: [i32; D],
    end: [i32; D],
    step: [i32; D],
    t_max: [f64; D],
    t_delta: [f64; D],
    remaining: usize,
}

impl<const D: usize> LatticeRay<D> {
    pub fn new(start: &SVector<f64, D>, end: &SVector<f64, D>) -> Self {
        let current: [i32; D] = std::array::from_fn(|k| start[k].floor() as i32);
        let end_index: [i32; D] = std::array::from_fn(|k| end[k].floor() as i32);

        let mut step = [0; D];
        let mut t_max = [f64::INFINITY; D];
        let mut t_delta = [f64::INFINITY; D];
        for k in 0..D {
            let direction = end[k] - start[k];
            if direction > 0.0 {
                step[k] = 1;
                t_max[k] = (start[k].floor() + 1.0 - start[k]) / direction;
                t_delta[k] = 1.0 / direction;
            } else if direction < 0.0 {
                step[k] = -1;
                t_max[k] = (start[k] - start[k].floor()) / -direction;
                t_delta[k] = -1.0 / direction;
            }
        }

        let remaining = 1 + (0..D)
            .map(|k| (end_index[k] - current[k]).unsigned_abs() as usize)
            .sum::<usize>();

        Self {
            current,
            end: end_index,
            step,
            t_max,
            t_delta,
            remaining,
        }
    }
}

impl<const D: usize> Iterator for LatticeRay<D> {
    type Item = BundleIndex<D>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.current;
        self.remaining -= 1;

        if item == self.end {
            self.remaining = 0;
            return Some(item);
        }

        let mut axis = 0;
        for k in 1..D {
            if self.t_max[k] < self.t_max[axis] {
                axis = k;
            }
        }
        if self.step[axis] == 0 {
            // Start and end share every index along moving axes.
            self.remaining = 0;
            return Some(item);
        }
        self.current[axis] += self.step[axis];
        self.t_max[axis] += self.t_delta[axis];

        Some(item)
    }
}
