//! Intensity point export.

use nalgebra::SVector;

use crate::grid::{Bundle, CellData, InverseModel, NdtGrid, OccupancyData};

/// Bundles at or below this combined occupancy are not exported.
pub const DEFAULT_OCCUPANCY_THRESHOLD: f64 = 0.169;

/// Exported point. `z` is 0 for 2D grids.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntensityPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl IntensityPoint {
    pub(crate) fn from_position<const D: usize>(
        position: &SVector<f64, D>,
        intensity: f64,
    ) -> Self {
        let axis = |k: usize| position.get(k).copied().unwrap_or(0.0) as f32;
        Self {
            x: axis(0),
            y: axis(1),
            z: axis(2),
            intensity: intensity as f32,
        }
    }

    pub fn to_record(&self) -> [f32; 4] {
        [self.x, self.y, self.z, self.intensity]
    }
}

/// Combined mean and normalized density at it, `None` for empty bundles.
fn bundle_point<C: CellData<D>, const D: usize>(
    bundle: &Bundle<'_, C, D>,
) -> Option<(SVector<f64, D>, f64)> {
    let combined = bundle.combined_distribution();
    let mean = combined.mean()?;
    Some((mean, combined.sample_mean()))
}

/// One point per materialized bundle with samples.
///
/// The intensity is the normalized density of the combined distribution at
/// its mean.
pub fn to_points<C: CellData<D>, const D: usize>(grid: &NdtGrid<C, D>) -> Vec<IntensityPoint> {
    let mut points = Vec::with_capacity(grid.bundle_count());
    grid.traverse(|_, bundle| {
        if let Some((mean, density)) = bundle_point(&bundle) {
            points.push(IntensityPoint::from_position(&mean, density));
        }
    });
    points
}

/// Like [`to_points`], keeping only bundles whose combined occupancy is
/// strictly above `threshold`. The intensity is scaled by that occupancy.
pub fn occupancy_to_points<C, M, const D: usize>(
    grid: &NdtGrid<C, D>,
    model: &M,
    threshold: f64,
) -> Vec<IntensityPoint>
where
    C: OccupancyData<D>,
    M: InverseModel + ?Sized,
{
    let mut points = Vec::new();
    grid.traverse(|_, bundle| {
        let occupancy = bundle.combined_occupancy(model);
        if occupancy <= threshold {
            return;
        }
        if let Some((mean, density)) = bundle_point(&bundle) {
            points.push(IntensityPoint::from_position(&mean, density * occupancy));
        }
    });
    points
}
