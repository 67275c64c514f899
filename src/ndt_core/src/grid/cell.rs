//! Grid cell payloads and the inverse sensor model.

use nalgebra::SVector;

use crate::distribution::Distribution;
use crate::error::ConfigError;

/// Maps accumulated hit/miss counts to an occupancy probability.
pub trait InverseModel {
    /// Occupancy probability in `[0, 1]`.
    fn occupancy(&self, hits: usize, misses: usize) -> f64;
}

impl<F> InverseModel for F
where
    F: Fn(usize, usize) -> f64,
{
    fn occupancy(&self, hits: usize, misses: usize) -> f64 {
        self(hits, misses)
    }
}

/// Binary Bayes filter in log-odds form.
///
/// Each hit adds `logodds(occupied) - logodds(prior)` and each miss adds
/// `logodds(free) - logodds(prior)` to the prior log-odds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogOddsInverseModel {
    prior: f64,
    free: f64,
    occupied: f64,
}

impl LogOddsInverseModel {
    pub fn new(prior: f64, free: f64, occupied: f64) -> Result<Self, ConfigError> {
        for (name, p) in [("prior", prior), ("free", free), ("occupied", occupied)] {
            if !(p > 0.0 && p < 1.0) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("probability must be in (0, 1), got {p}"),
                });
            }
        }
        Ok(Self {
            prior,
            free,
            occupied,
        })
    }

    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub fn free(&self) -> f64 {
        self.free
    }

    pub fn occupied(&self) -> f64 {
        self.occupied
    }
}

impl Default for LogOddsInverseModel {
    fn default() -> Self {
        Self {
            prior: 0.5,
            free: 0.45,
            occupied: 0.65,
        }
    }
}

fn logodds(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

impl InverseModel for LogOddsInverseModel {
    fn occupancy(&self, hits: usize, misses: usize) -> f64 {
        let l0 = logodds(self.prior);
        let l = l0
            + hits as f64 * (logodds(self.occupied) - l0)
            + misses as f64 * (logodds(self.free) - l0);
        1.0 - 1.0 / (1.0 + l.exp())
    }
}

/// Payload stored in every grid cell.
pub trait CellData<const D: usize>: Default + Clone + Send + Sync {
    /// Geometry accumulated in this cell.
    fn distribution(&self) -> &Distribution<D>;

    /// True if the cell carries no observation at all.
    fn is_empty(&self) -> bool;

    fn clear(&mut self) {
        *self = Self::default();
    }
}

impl<const D: usize> CellData<D> for Distribution<D> {
    fn distribution(&self) -> &Distribution<D> {
        self
    }

    fn is_empty(&self) -> bool {
        Distribution::is_empty(self)
    }
}

/// Payloads that also track hit/miss evidence.
pub trait OccupancyData<const D: usize>: CellData<D> {
    fn hits(&self) -> usize;

    fn misses(&self) -> usize;

    /// Occupancy from the current counts, clamped to `[0, 1]`.
    ///
    /// A model returning NaN yields 0.
    fn occupancy<M: InverseModel + ?Sized>(&self, model: &M) -> f64 {
        let p = model.occupancy(self.hits(), self.misses());
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }
}

/// Occupancy grid cell: geometry from hits plus free-space evidence.
#[derive(Debug, Clone, Default)]
pub struct OccupancyCell<const D: usize> {
    distribution: Distribution<D>,
    hits: usize,
    misses: usize,
}

impl<const D: usize> OccupancyCell<D> {
    /// Record an endpoint observation.
    pub fn insert_hit(&mut self, point: &SVector<f64, D>) {
        self.insert_hit_weighted(point, 1.0);
    }

    pub fn insert_hit_weighted(&mut self, point: &SVector<f64, D>, weight: f64) {
        self.distribution.insert_weighted(point, weight);
        self.hits += 1;
    }

    /// Record a pass-through observation. Geometry is left untouched.
    pub fn insert_free(&mut self) {
        self.misses += 1;
    }
}

impl<const D: usize> CellData<D> for OccupancyCell<D> {
    fn distribution(&self) -> &Distribution<D> {
        &self.distribution
    }

    fn is_empty(&self) -> bool {
        self.hits == 0 && self.misses == 0
    }
}

impl<const D: usize> OccupancyData<D> for OccupancyCell<D> {
    fn hits(&self) -> usize {
        self.hits
    }

    fn misses(&self) -> usize {
        self.misses
    }
}
