//! Export of grids to point records.
//!
//! - [`to_points`] / [`occupancy_to_points`]: one intensity point per
//!   non-empty bundle, positioned at the combined mean.
//! - [`to_packed`] / [`occupancy_to_packed`]: the same bundles as packed
//!   little-endian `x, y, z, intensity` records, with the intensity taken from
//!   the individual cells at the combined mean.
//! - [`gridmap_from_packed`]: the reverse direction, a target grid built from
//!   packed record positions.

mod packed;
mod points;

pub use packed::{
    gridmap_from_packed, occupancy_to_packed, to_packed, PackedCloud, PointField, FLOAT32,
    POINT_STEP,
};
pub use points::{
    occupancy_to_points, to_points, IntensityPoint, DEFAULT_OCCUPANCY_THRESHOLD,
};
