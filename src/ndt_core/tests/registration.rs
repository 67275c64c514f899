use std::sync::atomic::AtomicBool;

use nalgebra::{Isometry2, SVector, Vector2};
use ndt_core::derivatives::{compute_score, TargetBundles};
use ndt_core::test_utils::{
    make_blob_centers_2d, make_blob_centers_3d, make_default_corridor_scene, make_gaussian_blobs,
    make_gridmap, mirror_points, transform_points,
};
use ndt_core::{
    ConvergenceStatus, IcpMatchParameters, IcpNdtMatcher2d, MatchParameters, Motion,
    NdtMatcher2d, NdtMatcher3d, Planar, PointCloud, Spatial,
};

fn round_trip_params() -> MatchParameters {
    MatchParameters::default()
        .with_max_iterations(4000)
        .with_eps(1e-3)
}

/// Recover a 0.2 translation to within the convergence thresholds.
///
/// The mirrored scene makes the true pose an exact stationary point of the
/// score, so the bundle discretization leaves no bias to tolerate.
#[test]
fn planar_translation_round_trip() {
    let map = mirror_points(&make_gaussian_blobs(&make_blob_centers_2d(3, 3, 2.0), 120, 0.2, 1));
    let grid = make_gridmap(&map, 1.0).unwrap();

    let truth = Isometry2::translation(0.2, 0.0);
    let scan = PointCloud::from_points(transform_points::<Planar, 2, 3>(&map, &truth.inverse()));

    let params = round_trip_params();
    let result = NdtMatcher2d::new(params)
        .unwrap()
        .align(&scan, &grid, Isometry2::identity());

    assert!(result.converged, "status: {:?}", result.status);
    let error = truth.inverse() * result.transform;
    assert!(
        error.translation.vector.norm() < params.trans_eps,
        "translation error {:?}",
        error.translation.vector
    );
    assert!(error.rotation.angle().abs() < params.rot_eps);
    assert!(result.iterations < 4000);
    assert!(result.num_correspondences > 0);
}

/// The two-wall corridor only constrains x through its cross walls; the
/// match must still not lose the walls it starts on.
#[test]
fn corridor_scene_keeps_walls_aligned() {
    let map = make_default_corridor_scene();
    let grid = make_gridmap(&map, 1.0).unwrap();
    let target = TargetBundles::new(&grid);

    let truth = Isometry2::translation(0.2, 0.0);
    let scan = PointCloud::from_points(transform_points::<Planar, 2, 3>(&map, &truth.inverse()));

    let result = NdtMatcher2d::new(round_trip_params())
        .unwrap()
        .align(&scan, &grid, Isometry2::identity());
    assert!(result.status.is_usable(), "status: {:?}", result.status);

    let (initial_score, _) =
        compute_score::<Planar, _, 2, 3>(&scan, &target, &Isometry2::identity());
    assert!(result.score > initial_score);

    let error = truth.inverse() * result.transform;
    assert!(error.translation.vector.y.abs() < 0.05);
    assert!(error.rotation.angle().abs() < 0.02);
}

#[test]
fn spatial_round_trip() {
    let map = mirror_points(&make_gaussian_blobs(&make_blob_centers_3d(2, 2, 2, 2.0), 100, 0.2, 2));
    let grid = make_gridmap(&map, 1.0).unwrap();

    let truth = Spatial::increment(&SVector::<f64, 6>::from_column_slice(&[
        0.15, 0.1, -0.1, 0.02, 0.01, -0.03,
    ]));
    let scan = PointCloud::from_points(transform_points::<Spatial, 3, 6>(&map, &truth.inverse()));

    let params = round_trip_params();
    let result = NdtMatcher3d::new(params)
        .unwrap()
        .align(&scan, &grid, Spatial::identity());

    assert!(result.converged, "status: {:?}", result.status);
    let error = truth.inverse() * result.transform;
    assert!(
        error.translation.vector.norm() < params.trans_eps,
        "translation error {:?}",
        error.translation.vector
    );
    assert!(error.rotation.angle() < params.rot_eps);
}

#[test]
fn icp_hybrid_round_trip() {
    let map = make_gaussian_blobs(&make_blob_centers_2d(5, 5, 2.0), 120, 0.2, 3);
    let grid = make_gridmap(&map, 1.0).unwrap();

    let truth = Isometry2::new(Vector2::new(0.2, -0.1), 0.03);
    let scan = PointCloud::from_points(transform_points::<Planar, 2, 3>(&map, &truth.inverse()));

    let params = IcpMatchParameters::new(MatchParameters::default().with_max_iterations(200))
        .with_icp_max_distance(1.0)
        .with_icp_min_assigned_points(0.5);
    let result = IcpNdtMatcher2d::new(params)
        .unwrap()
        .align(&scan, &grid, Isometry2::identity());

    assert!(result.status.is_usable(), "status: {:?}", result.status);
    let error = truth.inverse() * result.transform;
    assert!(error.translation.vector.norm() < 0.05);
    assert!(error.rotation.angle().abs() < 0.02);
}

#[test]
fn invalid_points_are_ignored() {
    let map = make_gaussian_blobs(&make_blob_centers_2d(4, 4, 2.0), 100, 0.2, 4);
    let grid = make_gridmap(&map, 1.0).unwrap();
    let source = transform_points::<Planar, 2, 3>(&map, &Isometry2::translation(-0.1, 0.05));

    let clean = PointCloud::from_points(source.clone());
    let mut noisy = PointCloud::from_points(source.clone());
    for p in source.iter().take(50) {
        noisy.push_with_validity(p + Vector2::new(0.3, 0.3), false);
    }
    noisy.push(Vector2::new(f64::NAN, 0.0));
    assert_eq!(noisy.valid_count(), clean.valid_count());

    let matcher = NdtMatcher2d::new(MatchParameters::default()).unwrap();
    let a = matcher.align(&clean, &grid, Isometry2::identity());
    let b = matcher.align(&noisy, &grid, Isometry2::identity());

    let diff = a.transform.inverse() * b.transform;
    assert!(diff.translation.vector.norm() < 1e-3);
    assert!(diff.rotation.angle().abs() < 1e-3);
    assert!((a.score_per_point - b.score_per_point).abs() < 1e-3);
}

#[test]
fn grid_is_shared_between_threads() {
    let map = make_gaussian_blobs(&make_blob_centers_2d(4, 4, 2.0), 100, 0.2, 5);
    let grid = make_gridmap(&map, 1.0).unwrap();
    let matcher = NdtMatcher2d::new(MatchParameters::default()).unwrap();

    let offsets = [Vector2::new(0.1, 0.0), Vector2::new(0.0, -0.1)];
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = offsets
            .iter()
            .map(|offset| {
                let grid = &grid;
                let matcher = &matcher;
                let scan = PointCloud::from_points(transform_points::<Planar, 2, 3>(
                    &map,
                    &Isometry2::translation(-offset.x, -offset.y),
                ));
                scope.spawn(move || matcher.align(&scan, grid, Isometry2::identity()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (offset, result) in offsets.iter().zip(&results) {
        assert!(result.status.is_usable());
        assert!((result.transform.translation.vector - offset).norm() < 0.05);
    }
}

#[test]
fn cancellation_keeps_initial_estimate() {
    let map = make_gaussian_blobs(&make_blob_centers_2d(3, 3, 2.0), 50, 0.2, 6);
    let grid = make_gridmap(&map, 1.0).unwrap();
    let scan = PointCloud::from_points(map);
    let initial = Isometry2::translation(0.05, 0.0);

    let cancel = AtomicBool::new(true);
    let result = NdtMatcher2d::new(MatchParameters::default())
        .unwrap()
        .align_with_cancel(&scan, &grid, initial, &cancel);

    assert_eq!(result.status, ConvergenceStatus::Cancelled);
    assert_eq!(result.transform, initial);
}
