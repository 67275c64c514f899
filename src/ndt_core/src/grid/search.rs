//! KD-tree over bundle means for nearest-neighbour correspondences.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::SVector;

use super::cell::CellData;
use super::NdtGrid;

/// Bucket size for the KD-tree.
///
/// Bundle means along a straight wall share one coordinate, which the default
/// bucket size cannot hold.
const BUCKET_SIZE: usize = 256;

/// Nearest-mean search over the non-empty bundles of a grid.
#[derive(Debug)]
pub struct BundleMeanIndex<const D: usize> {
    kdtree: ImmutableKdTree<f64, u64, D, BUCKET_SIZE>,
    means: Vec<SVector<f64, D>>,
}

impl<const D: usize> BundleMeanIndex<D> {
    /// Index the given means. Returns `None` if `means` is empty.
    pub fn from_means(means: Vec<SVector<f64, D>>) -> Option<Self> {
        if means.is_empty() {
            return None;
        }
        let coords: Vec<[f64; D]> = means
            .iter()
            .map(|m| std::array::from_fn(|k| m[k]))
            .collect();
        // Item values are the positions in `coords`.
        let kdtree: ImmutableKdTree<f64, u64, D, BUCKET_SIZE> = (&*coords).into();
        Some(Self { kdtree, means })
    }

    /// Index the combined means of every materialized, non-empty bundle.
    pub fn from_grid<C: CellData<D>>(grid: &NdtGrid<C, D>) -> Option<Self> {
        let mut means = Vec::with_capacity(grid.bundle_count());
        grid.traverse(|_, bundle| {
            if let Some(mean) = bundle.combined_distribution().mean() {
                means.push(mean);
            }
        });
        Self::from_means(means)
    }

    /// Closest mean and its Euclidean distance.
    pub fn nearest(&self, point: &SVector<f64, D>) -> (SVector<f64, D>, f64) {
        let query: [f64; D] = std::array::from_fn(|k| point[k]);
        let nn = self.kdtree.nearest_one::<SquaredEuclidean>(&query);
        (self.means[nn.item as usize], nn.distance.sqrt())
    }

    /// Closest mean if it lies strictly within `max_distance`.
    pub fn nearest_within(
        &self,
        point: &SVector<f64, D>,
        max_distance: f64,
    ) -> Option<SVector<f64, D>> {
        let (mean, distance) = self.nearest(point);
        (distance < max_distance).then_some(mean)
    }

    pub fn means(&self) -> &[SVector<f64, D>] {
        &self.means
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}
