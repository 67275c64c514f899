//! Source point clouds with per-point validity.

use nalgebra::SVector;
use rayon::prelude::*;

/// Points to register, each with a validity flag.
///
/// Invalid points are carried along (so indices stay stable) but ignored by
/// the matchers. Non-finite points are always invalid.
#[derive(Debug, Clone, Default)]
pub struct PointCloud<const D: usize> {
    points: Vec<SVector<f64, D>>,
    valid: Vec<bool>,
}

pub type PointCloud2d = PointCloud<2>;
pub type PointCloud3d = PointCloud<3>;

impl<const D: usize> PointCloud<D> {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            valid: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            valid: Vec::with_capacity(capacity),
        }
    }

    /// Every finite point is valid.
    pub fn from_points(points: Vec<SVector<f64, D>>) -> Self {
        let valid = points.iter().map(is_finite).collect();
        Self { points, valid }
    }

    pub fn push(&mut self, point: SVector<f64, D>) {
        self.push_with_validity(point, true);
    }

    pub fn push_with_validity(&mut self, point: SVector<f64, D>, valid: bool) {
        self.valid.push(valid && is_finite(&point));
        self.points.push(point);
    }

    /// Mark point `index` valid or invalid. Non-finite points stay invalid.
    ///
    /// Out-of-range indices are ignored.
    pub fn set_valid(&mut self, index: usize, valid: bool) {
        if let (Some(point), Some(flag)) = (self.points.get(index), self.valid.get_mut(index)) {
            *flag = valid && is_finite(point);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SVector<f64, D>] {
        &self.points
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn valid_points(&self) -> impl Iterator<Item = &SVector<f64, D>> + '_ {
        self.points
            .iter()
            .zip(&self.valid)
            .filter_map(|(p, &valid)| valid.then_some(p))
    }

    pub fn par_valid_points(&self) -> impl ParallelIterator<Item = &SVector<f64, D>> + '_ {
        self.points
            .par_iter()
            .zip(self.valid.par_iter())
            .filter_map(|(p, &valid)| valid.then_some(p))
    }
}

impl<const D: usize> FromIterator<SVector<f64, D>> for PointCloud<D> {
    fn from_iter<I: IntoIterator<Item = SVector<f64, D>>>(iter: I) -> Self {
        Self::from_points(iter.into_iter().collect())
    }
}

fn is_finite<const D: usize>(point: &SVector<f64, D>) -> bool {
    point.iter().all(|v| v.is_finite())
}
