//! Synthetic scenes for testing registration with known ground truth.
//!
//! All random generators take an explicit seed so tests are reproducible.

use nalgebra::{SVector, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::derivatives::Motion;
use crate::error::ConfigError;
use crate::grid::{GridConfig, Gridmap};

/// `min, min + step, …` strictly below `max`.
fn steps(min: f64, max: f64, step: f64) -> impl Iterator<Item = f64> {
    let count = ((max - min) / step + 1e-9).floor() as usize;
    (0..count).map(move |i| min + step * i as f64)
}

/// Two-wall corridor opening into a room.
///
/// - Horizontal walls at `y = ±1` for `x ∈ [-10, -1)`
/// - A far wall at `x = 1.5` for `y ∈ [-10, 10)`
/// - Walls at `x = -1` for `|y| > 1`
pub fn make_corridor_scene(interval: f64) -> Vec<Vector2<f64>> {
    let mut points = Vec::new();
    for x in steps(-10.0, -1.0, interval) {
        points.push(Vector2::new(x, 1.0));
        points.push(Vector2::new(x, -1.0));
    }
    for y in steps(-10.0, 10.0, interval) {
        points.push(Vector2::new(1.5, y));
        if !(-1.0..=1.0).contains(&y) {
            points.push(Vector2::new(-1.0, y));
        }
    }
    points
}

/// Corridor scene with 0.1 spacing.
pub fn make_default_corridor_scene() -> Vec<Vector2<f64>> {
    make_corridor_scene(0.1)
}

/// Three orthogonal planes (XY, YZ, ZX) forming a half-cube of side
/// `length`, sampled every `interval`.
///
/// Produces `3 * (length / interval + 1)²` points.
pub fn make_half_cubic_scene(length: f64, interval: f64) -> Vec<Vector3<f64>> {
    let per_line = (length / interval + 1e-9).floor() as usize + 1;
    let mut points = Vec::with_capacity(3 * per_line * per_line);
    for i in 0..per_line {
        for j in 0..per_line {
            let u = interval * j as f64;
            let v = interval * i as f64;
            points.push(Vector3::new(u, v, 0.0));
            points.push(Vector3::new(0.0, u, v));
            points.push(Vector3::new(u, 0.0, v));
        }
    }
    points
}

/// `nx × ny` blob centers, `spacing` apart, offset from the lattice.
pub fn make_blob_centers_2d(nx: usize, ny: usize, spacing: f64) -> Vec<Vector2<f64>> {
    let mut centers = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            // Stagger rows so the layout has no rotational symmetry.
            let stagger = if j % 2 == 0 { 0.0 } else { 0.3 * spacing };
            centers.push(Vector2::new(
                0.2 + i as f64 * spacing + stagger,
                0.35 + j as f64 * spacing,
            ));
        }
    }
    centers
}

/// `nx × ny × nz` blob centers, `spacing` apart.
pub fn make_blob_centers_3d(nx: usize, ny: usize, nz: usize, spacing: f64) -> Vec<Vector3<f64>> {
    let mut centers = Vec::with_capacity(nx * ny * nz);
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                let stagger = if (j + k) % 2 == 0 { 0.0 } else { 0.3 * spacing };
                centers.push(Vector3::new(
                    0.2 + i as f64 * spacing + stagger,
                    0.35 + j as f64 * spacing,
                    0.1 + k as f64 * spacing,
                ));
            }
        }
    }
    centers
}

/// Isotropic Gaussian samples around every center.
pub fn make_gaussian_blobs<const D: usize>(
    centers: &[SVector<f64, D>],
    points_per_blob: usize,
    std_dev: f64,
    seed: u64,
) -> Vec<SVector<f64, D>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(centers.len() * points_per_blob);
    for center in centers {
        for _ in 0..points_per_blob {
            let noise = SVector::<f64, D>::from_fn(|_, _| rng.sample::<f64, _>(StandardNormal));
            points.push(center + noise * std_dev);
        }
    }
    points
}

/// `points` together with their mirror images across every subset of the
/// coordinate axes, `2^D` copies in total.
///
/// The result is symmetric about the origin along each axis, as is a grid
/// with its origin at zero, so the identity is an exact stationary point of
/// the NDT score when the scene is matched against itself.
pub fn mirror_points<const D: usize>(points: &[SVector<f64, D>]) -> Vec<SVector<f64, D>> {
    let mut mirrored = Vec::with_capacity(points.len() << D);
    for mask in 0..1usize << D {
        mirrored.extend(points.iter().map(|p| {
            SVector::<f64, D>::from_fn(|k, _| if mask & (1 << k) == 0 { p[k] } else { -p[k] })
        }));
    }
    mirrored
}

/// Apply `transform` to every point.
pub fn transform_points<M, const D: usize, const P: usize>(
    points: &[SVector<f64, D>],
    transform: &M::Transform,
) -> Vec<SVector<f64, D>>
where
    M: Motion<D, P>,
{
    points
        .iter()
        .map(|p| M::transform_point(transform, p))
        .collect()
}

/// Plain grid holding `points`, uniform `resolution`, origin at zero.
pub fn make_gridmap<const D: usize>(
    points: &[SVector<f64, D>],
    resolution: f64,
) -> Result<Gridmap<D>, ConfigError> {
    let mut grid = Gridmap::new(GridConfig::uniform(resolution))?;
    grid.insert_points(points);
    Ok(grid)
}

/// Axis-aligned bounds of a point set, `None` if empty.
pub fn compute_bounds<const D: usize>(
    points: &[SVector<f64, D>],
) -> Option<(SVector<f64, D>, SVector<f64, D>)> {
    let first = points.first()?;
    Some(points.iter().fold((*first, *first), |(min, max), p| {
        (min.inf(p), max.sup(p))
    }))
}
