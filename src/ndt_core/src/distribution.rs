//! Online Gaussian accumulator.
//!
//! A [`Distribution`] stores the sufficient statistics of a weighted point set
//! (count, total weight, weighted sum and weighted sum of outer products).
//! Mean, covariance and the regularized inverse covariance are derived on
//! demand and cached until the next update.

use std::f64::consts::PI;
use std::ops::{Add, AddAssign};
use std::sync::OnceLock;

use nalgebra::{DMatrix, SMatrix, SVector};

/// Small eigenvalues are clamped to this fraction of the largest one before
/// the covariance is inverted.
pub const EIGENVALUE_RATIO: f64 = 0.01;

/// Moments derived from the accumulated statistics.
#[derive(Debug, Clone)]
struct Moments<const D: usize> {
    mean: SVector<f64, D>,
    covariance: SMatrix<f64, D, D>,
    information: Option<Information<D>>,
}

/// Inverse of the eigenvalue-clamped covariance.
#[derive(Debug, Clone)]
struct Information<const D: usize> {
    inverse: SMatrix<f64, D, D>,
    /// Determinant of the clamped covariance.
    determinant: f64,
}

impl<const D: usize> Moments<D> {
    fn from_statistics(
        n: usize,
        weight: f64,
        sum: &SVector<f64, D>,
        sum_outer: &SMatrix<f64, D, D>,
    ) -> Self {
        let mean = sum / weight;
        let covariance = sum_outer / weight - mean * mean.transpose();
        // Cancellation can leave the result slightly asymmetric.
        let covariance = (covariance + covariance.transpose()) * 0.5;

        let information = if n > D {
            regularize_covariance(&covariance, EIGENVALUE_RATIO)
        } else {
            None
        };

        Self {
            mean,
            covariance,
            information,
        }
    }
}

/// Weighted online mean/covariance estimator in `D` dimensions.
#[derive(Debug, Clone)]
pub struct Distribution<const D: usize> {
    n: usize,
    weight: f64,
    sum: SVector<f64, D>,
    sum_outer: SMatrix<f64, D, D>,
    cache: OnceLock<Moments<D>>,
}

impl<const D: usize> Default for Distribution<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> Distribution<D> {
    /// Create an empty distribution.
    pub fn new() -> Self {
        Self {
            n: 0,
            weight: 0.0,
            sum: SVector::zeros(),
            sum_outer: SMatrix::zeros(),
            cache: OnceLock::new(),
        }
    }

    /// Build a distribution from a slice of points with unit weight.
    pub fn from_points(points: &[SVector<f64, D>]) -> Self {
        let mut distribution = Self::new();
        for p in points {
            distribution.insert(p);
        }
        distribution
    }

    /// Add a point with unit weight.
    pub fn insert(&mut self, point: &SVector<f64, D>) {
        self.insert_weighted(point, 1.0);
    }

    /// Add a point with the given weight.
    ///
    /// Non-finite or non-positive weights are ignored.
    pub fn insert_weighted(&mut self, point: &SVector<f64, D>, weight: f64) {
        if !(weight.is_finite() && weight > 0.0) {
            return;
        }
        self.n += 1;
        self.weight += weight;
        self.sum += point * weight;
        self.sum_outer += point * point.transpose() * weight;
        self.cache = OnceLock::new();
    }

    /// Combine the statistics of `other` into `self`.
    pub fn merge(&mut self, other: &Distribution<D>) {
        if other.n == 0 {
            return;
        }
        self.n += other.n;
        self.weight += other.weight;
        self.sum += other.sum;
        self.sum_outer += other.sum_outer;
        self.cache = OnceLock::new();
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Number of inserted samples.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Total sample weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Weighted sum of samples.
    pub fn sum(&self) -> &SVector<f64, D> {
        &self.sum
    }

    /// Weighted sum of sample outer products.
    pub fn sum_outer(&self) -> &SMatrix<f64, D, D> {
        &self.sum_outer
    }

    fn moments(&self) -> Option<&Moments<D>> {
        if self.n == 0 || self.weight <= 0.0 {
            return None;
        }
        Some(self.cache.get_or_init(|| {
            Moments::from_statistics(self.n, self.weight, &self.sum, &self.sum_outer)
        }))
    }

    /// Weighted mean, or `None` if empty.
    pub fn mean(&self) -> Option<SVector<f64, D>> {
        self.moments().map(|m| m.mean)
    }

    /// Population covariance, or `None` if empty.
    pub fn covariance(&self) -> Option<SMatrix<f64, D, D>> {
        self.moments().map(|m| m.covariance)
    }

    /// Inverse of the regularized covariance.
    ///
    /// Returns `None` with `D` or fewer samples, or when the covariance has no
    /// positive eigenvalue.
    pub fn inverse_covariance(&self) -> Option<SMatrix<f64, D, D>> {
        self.moments()
            .and_then(|m| m.information.as_ref())
            .map(|info| info.inverse)
    }

    /// Determinant of the regularized covariance.
    pub fn determinant(&self) -> Option<f64> {
        self.moments()
            .and_then(|m| m.information.as_ref())
            .map(|info| info.determinant)
    }

    /// Mean together with the inverse covariance, if both are defined.
    pub fn mean_and_inverse_covariance(&self) -> Option<(SVector<f64, D>, SMatrix<f64, D, D>)> {
        let moments = self.moments()?;
        let info = moments.information.as_ref()?;
        Some((moments.mean, info.inverse))
    }

    /// `exp(-0.5 * qᵀ Σ⁻¹ q)` with `q = point - mean`.
    ///
    /// Returns 0.0 when the inverse covariance is undefined.
    pub fn sample_non_normalized(&self, point: &SVector<f64, D>) -> f64 {
        match self.mean_and_inverse_covariance() {
            Some((mean, inverse)) => {
                let q = point - mean;
                (-0.5 * q.dot(&(inverse * q))).exp()
            }
            None => 0.0,
        }
    }

    /// Normalized Gaussian density at `point`.
    pub fn sample(&self, point: &SVector<f64, D>) -> f64 {
        self.sample_mean() * self.sample_non_normalized(point)
    }

    /// Normalized Gaussian density at the mean, `1 / sqrt((2π)^D |Σ|)`.
    pub fn sample_mean(&self) -> f64 {
        match self.determinant() {
            Some(det) => 1.0 / ((2.0 * PI).powi(D as i32) * det).sqrt(),
            None => 0.0,
        }
    }
}

impl<const D: usize> AddAssign<&Distribution<D>> for Distribution<D> {
    fn add_assign(&mut self, rhs: &Distribution<D>) {
        self.merge(rhs);
    }
}

impl<const D: usize> Add for Distribution<D> {
    type Output = Distribution<D>;

    fn add(mut self, rhs: Distribution<D>) -> Self::Output {
        self.merge(&rhs);
        self
    }
}

/// Clamp small eigenvalues of a covariance to `ratio * max_eigenvalue` and
/// invert.
///
/// Returns `None` if the covariance has no positive eigenvalue.
fn regularize_covariance<const D: usize>(
    cov: &SMatrix<f64, D, D>,
    ratio: f64,
) -> Option<Information<D>> {
    // Decompose through a dynamic matrix; fixed-size eigen decomposition is
    // not available for a generic dimension.
    let eigen = DMatrix::from_column_slice(D, D, cov.as_slice()).symmetric_eigen();
    let mut eigenvalues = eigen.eigenvalues;

    let max_eigenvalue = eigenvalues.iter().copied().fold(0.0_f64, f64::max);
    if !(max_eigenvalue.is_finite() && max_eigenvalue > 0.0) {
        return None;
    }

    let min_eigenvalue = max_eigenvalue * ratio;
    for ev in eigenvalues.iter_mut() {
        if *ev < min_eigenvalue {
            *ev = min_eigenvalue;
        }
    }

    let eigenvectors = &eigen.eigenvectors;
    let inv_diag = DMatrix::from_diagonal(&eigenvalues.map(|ev| 1.0 / ev));
    let inverse = eigenvectors * inv_diag * eigenvectors.transpose();
    let determinant: f64 = eigenvalues.iter().product();

    if !inverse.iter().all(|v| v.is_finite()) {
        return None;
    }

    Some(Information {
        inverse: SMatrix::from_column_slice(inverse.as_slice()),
        determinant,
    })
}
