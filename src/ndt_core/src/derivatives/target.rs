//! Precomputed bundle Gaussians of a target grid.

use std::collections::HashMap;

use nalgebra::{SMatrix, SVector};

use crate::grid::{Bundle, BundleIndex, CellData, NdtGrid};

/// Mean and inverse covariance of a combined bundle distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleGaussian<const D: usize> {
    pub mean: SVector<f64, D>,
    pub inverse_covariance: SMatrix<f64, D, D>,
}

impl<const D: usize> BundleGaussian<D> {
    /// `None` for empty or degenerate bundles.
    pub fn from_bundle<C: CellData<D>>(bundle: &Bundle<'_, C, D>) -> Option<Self> {
        let (mean, inverse_covariance) = bundle
            .combined_distribution()
            .mean_and_inverse_covariance()?;
        Some(Self {
            mean,
            inverse_covariance,
        })
    }
}

/// Read-only view of a target grid with the Gaussians of all materialized
/// bundles decomposed up front.
///
/// Bundles that are not materialized are assembled on demand.
pub struct TargetBundles<'g, C, const D: usize> {
    grid: &'g NdtGrid<C, D>,
    gaussians: HashMap<BundleIndex<D>, Option<BundleGaussian<D>>>,
}

impl<'g, C: CellData<D>, const D: usize> TargetBundles<'g, C, D> {
    pub fn new(grid: &'g NdtGrid<C, D>) -> Self {
        let mut gaussians = HashMap::with_capacity(grid.bundle_count());
        grid.traverse(|index, bundle| {
            gaussians.insert(*index, BundleGaussian::from_bundle(&bundle));
        });
        Self { grid, gaussians }
    }

    pub fn grid(&self) -> &'g NdtGrid<C, D> {
        self.grid
    }

    /// Gaussian of the bundle containing `point`.
    pub fn lookup(&self, point: &SVector<f64, D>) -> Option<BundleGaussian<D>> {
        if !point.iter().all(|v| v.is_finite()) {
            return None;
        }
        let index = self.grid.bundle_index_of(point);
        match self.gaussians.get(&index) {
            Some(gaussian) => *gaussian,
            None => self
                .grid
                .bundle(&index)
                .and_then(|bundle| BundleGaussian::from_bundle(&bundle)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridConfig, Gridmap2d};
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    #[test]
    fn test_lookup_matches_bundle_at() {
        let mut grid = Gridmap2d::new(GridConfig::uniform(1.0)).unwrap();
        for (x, y) in [(0.1, 0.2), (0.3, 0.1), (0.2, 0.4), (0.45, 0.3), (0.05, 0.05)] {
            grid.insert(&Vector2::new(x, y));
        }
        let target = TargetBundles::new(&grid);

        let query = Vector2::new(0.2, 0.2);
        let expected = BundleGaussian::from_bundle(&grid.bundle_at(&query).unwrap()).unwrap();
        assert_eq!(target.lookup(&query), Some(expected));

        // Partially allocated neighbour: same cells, assembled on demand.
        let neighbour = Vector2::new(-0.2, 0.2);
        let gaussian = target.lookup(&neighbour).unwrap();
        assert_relative_eq!(gaussian.mean, expected.mean, epsilon = 1e-12);

        assert!(target.lookup(&Vector2::new(50.0, 0.0)).is_none());
        assert!(target.lookup(&Vector2::new(f64::NAN, 0.0)).is_none());
    }

    #[test]
    fn test_degenerate_bundle_has_no_gaussian() {
        let mut grid = Gridmap2d::new(GridConfig::uniform(1.0)).unwrap();
        // Each cell holds the same single point, so the covariance is zero.
        grid.insert(&Vector2::new(0.1, 0.1));
        let target = TargetBundles::new(&grid);
        assert!(target.lookup(&Vector2::new(0.1, 0.1)).is_none());
    }
}
