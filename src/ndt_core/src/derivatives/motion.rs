//! Rigid motion models.
//!
//! A motion model fixes the transform type, its parameterization and the
//! derivatives of a transformed point with respect to an incremental update
//! `T ← exp(Δ)·T`. Derivatives are taken at `Δ = 0`, so they only depend on
//! the already transformed point `y = T·p`:
//!
//! - translation columns of the Jacobian are the identity;
//! - the rotation column for axis `e` is `e × y`;
//! - second derivatives only involve rotation parameters.
//!
//! For the 3D model, `R = Rz(yaw)·Ry(pitch)·Rx(roll)` and the mixed second
//! derivatives follow from that product order.

use std::fmt;

use nalgebra::{
    Isometry2, Isometry3, Rotation3, SMatrix, SVector, Translation3, UnitQuaternion, Vector2,
    Vector3,
};

use super::types::PointDerivatives;

/// Rigid motion in `D` dimensions with `P` parameters.
///
/// The first `D` parameters are translation, the remaining ones rotation.
pub trait Motion<const D: usize, const P: usize>: Send + Sync + 'static {
    type Transform: Copy + fmt::Debug + PartialEq + Send + Sync;

    fn identity() -> Self::Transform;

    fn transform_point(transform: &Self::Transform, point: &SVector<f64, D>) -> SVector<f64, D>;

    /// `lhs · rhs`: apply `rhs` first.
    fn compose(lhs: &Self::Transform, rhs: &Self::Transform) -> Self::Transform;

    /// Transform for the parameter increment `delta`.
    fn increment(delta: &SVector<f64, P>) -> Self::Transform;

    /// Parameters of `transform`, the inverse of [`Motion::increment`].
    fn parameters(transform: &Self::Transform) -> SVector<f64, P>;

    /// Transform from a rotation matrix and a translation vector.
    fn from_rotation_translation(
        rotation: &SMatrix<f64, D, D>,
        translation: &SVector<f64, D>,
    ) -> Self::Transform;

    /// First and second derivatives of `y` under an increment at zero.
    fn point_derivatives(point: &SVector<f64, D>) -> PointDerivatives<D, P>;
}

/// Planar motion, parameters `[tx, ty, θ]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planar;

impl Motion<2, 3> for Planar {
    type Transform = Isometry2<f64>;

    fn identity() -> Self::Transform {
        Isometry2::identity()
    }

    fn transform_point(transform: &Self::Transform, point: &Vector2<f64>) -> Vector2<f64> {
        transform.rotation * point + transform.translation.vector
    }

    fn compose(lhs: &Self::Transform, rhs: &Self::Transform) -> Self::Transform {
        lhs * rhs
    }

    fn increment(delta: &SVector<f64, 3>) -> Self::Transform {
        Isometry2::new(Vector2::new(delta[0], delta[1]), delta[2])
    }

    fn parameters(transform: &Self::Transform) -> SVector<f64, 3> {
        let t = transform.translation.vector;
        SVector::<f64, 3>::new(t.x, t.y, transform.rotation.angle())
    }

    fn from_rotation_translation(
        rotation: &SMatrix<f64, 2, 2>,
        translation: &Vector2<f64>,
    ) -> Self::Transform {
        let angle = rotation[(1, 0)].atan2(rotation[(0, 0)]);
        Isometry2::new(*translation, angle)
    }

    fn point_derivatives(point: &Vector2<f64>) -> PointDerivatives<2, 3> {
        let mut derivatives = PointDerivatives::<2, 3>::zeros();
        derivatives.jacobian[(0, 0)] = 1.0;
        derivatives.jacobian[(1, 1)] = 1.0;
        derivatives.jacobian[(0, 2)] = -point.y;
        derivatives.jacobian[(1, 2)] = point.x;

        derivatives.second[2][2] = -point;
        derivatives
    }
}

/// Spatial motion, parameters `[tx, ty, tz, roll, pitch, yaw]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spatial;

impl Motion<3, 6> for Spatial {
    type Transform = Isometry3<f64>;

    fn identity() -> Self::Transform {
        Isometry3::identity()
    }

    fn transform_point(transform: &Self::Transform, point: &Vector3<f64>) -> Vector3<f64> {
        transform.rotation * point + transform.translation.vector
    }

    fn compose(lhs: &Self::Transform, rhs: &Self::Transform) -> Self::Transform {
        lhs * rhs
    }

    fn increment(delta: &SVector<f64, 6>) -> Self::Transform {
        let translation = Translation3::new(delta[0], delta[1], delta[2]);
        let rotation = UnitQuaternion::from_euler_angles(delta[3], delta[4], delta[5]);
        Isometry3::from_parts(translation, rotation)
    }

    fn parameters(transform: &Self::Transform) -> SVector<f64, 6> {
        let t = transform.translation.vector;
        let (roll, pitch, yaw) = transform.rotation.euler_angles();
        SVector::<f64, 6>::from_column_slice(&[t.x, t.y, t.z, roll, pitch, yaw])
    }

    fn from_rotation_translation(
        rotation: &SMatrix<f64, 3, 3>,
        translation: &Vector3<f64>,
    ) -> Self::Transform {
        let rotation = Rotation3::from_matrix(rotation);
        Isometry3::from_parts(
            Translation3::from(*translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }

    fn point_derivatives(point: &Vector3<f64>) -> PointDerivatives<3, 6> {
        let (x, y, z) = (point.x, point.y, point.z);
        let mut derivatives = PointDerivatives::<3, 6>::zeros();

        for axis in 0..3 {
            derivatives.jacobian[(axis, axis)] = 1.0;
        }
        derivatives
            .jacobian
            .fixed_view_mut::<3, 1>(0, 3)
            .copy_from(&Vector3::new(0.0, -z, y));
        derivatives
            .jacobian
            .fixed_view_mut::<3, 1>(0, 4)
            .copy_from(&Vector3::new(z, 0.0, -x));
        derivatives
            .jacobian
            .fixed_view_mut::<3, 1>(0, 5)
            .copy_from(&Vector3::new(-y, x, 0.0));

        // Pure second derivatives are e × (e × y).
        derivatives.second[3][3] = Vector3::new(0.0, -y, -z);
        derivatives.second[4][4] = Vector3::new(-x, 0.0, -z);
        derivatives.second[5][5] = Vector3::new(-x, -y, 0.0);

        // Mixed terms: the outer factor of Rz·Ry·Rx acts last.
        let roll_pitch = Vector3::new(y, 0.0, 0.0);
        let roll_yaw = Vector3::new(z, 0.0, 0.0);
        let pitch_yaw = Vector3::new(0.0, z, 0.0);
        derivatives.second[3][4] = roll_pitch;
        derivatives.second[4][3] = roll_pitch;
        derivatives.second[3][5] = roll_yaw;
        derivatives.second[5][3] = roll_yaw;
        derivatives.second[4][5] = pitch_yaw;
        derivatives.second[5][4] = pitch_yaw;

        derivatives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    /// Central-difference derivatives of `y ↦ exp(Δ)·y` around `Δ = 0`.
    fn numeric_jacobian<M: Motion<D, P>, const D: usize, const P: usize>(
        y: &SVector<f64, D>,
    ) -> SMatrix<f64, D, P> {
        let h = 1e-6;
        let mut jacobian = SMatrix::<f64, D, P>::zeros();
        for i in 0..P {
            let mut delta = SVector::<f64, P>::zeros();
            delta[i] = h;
            let plus = M::transform_point(&M::increment(&delta), y);
            let minus = M::transform_point(&M::increment(&-delta), y);
            jacobian.set_column(i, &((plus - minus) / (2.0 * h)));
        }
        jacobian
    }

    fn numeric_second<M: Motion<D, P>, const D: usize, const P: usize>(
        y: &SVector<f64, D>,
        i: usize,
        j: usize,
    ) -> SVector<f64, D> {
        let h = 1e-4;
        let eval = |si: f64, sj: f64| {
            let mut delta = SVector::<f64, P>::zeros();
            delta[i] += si * h;
            delta[j] += sj * h;
            M::transform_point(&M::increment(&delta), y)
        };
        (eval(1.0, 1.0) - eval(1.0, -1.0) - eval(-1.0, 1.0) + eval(-1.0, -1.0)) / (4.0 * h * h)
    }

    #[test]
    fn test_planar_derivatives_match_finite_differences() {
        let y = Vector2::new(1.3, -0.7);
        let analytic = Planar::point_derivatives(&y);
        assert_relative_eq!(analytic.jacobian, numeric_jacobian::<Planar, 2, 3>(&y), epsilon = 1e-6);
        assert_relative_eq!(
            analytic.second[2][2],
            numeric_second::<Planar, 2, 3>(&y, 2, 2),
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_spatial_derivatives_match_finite_differences() {
        let y = Vector3::new(0.8, -1.2, 2.1);
        let analytic = Spatial::point_derivatives(&y);
        assert_relative_eq!(
            analytic.jacobian,
            numeric_jacobian::<Spatial, 3, 6>(&y),
            epsilon = 1e-6
        );
        for i in 0..6 {
            for j in 0..6 {
                assert_relative_eq!(
                    analytic.second[i][j],
                    numeric_second::<Spatial, 3, 6>(&y, i, j),
                    epsilon = 1e-4
                );
            }
        }
    }

    #[test]
    fn test_planar_parameters_round_trip() {
        let delta = SVector::<f64, 3>::new(0.5, -2.0, 0.3);
        let transform = Planar::increment(&delta);
        assert_relative_eq!(Planar::parameters(&transform), delta, epsilon = 1e-12);

        let p = Planar::transform_point(&transform, &Vector2::new(1.0, 0.0));
        assert_relative_eq!(p, Vector2::new(0.5 + 0.3f64.cos(), -2.0 + 0.3f64.sin()), epsilon = 1e-12);
    }

    #[test]
    fn test_spatial_increment_uses_zyx_order() {
        let delta = SVector::<f64, 6>::from_column_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, FRAC_PI_2]);
        let transform = Spatial::increment(&delta);
        let p = Spatial::transform_point(&transform, &Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);

        let delta = SVector::<f64, 6>::from_column_slice(&[1.0, 2.0, 3.0, 0.1, -0.2, 0.3]);
        let transform = Spatial::increment(&delta);
        assert_relative_eq!(Spatial::parameters(&transform), delta, epsilon = 1e-12);
    }

    #[test]
    fn test_from_rotation_translation() {
        let transform = Planar::increment(&SVector::<f64, 3>::new(1.0, 2.0, -0.4));
        let rotation = transform.rotation.to_rotation_matrix().into_inner();
        let rebuilt = Planar::from_rotation_translation(&rotation, &transform.translation.vector);
        assert_relative_eq!(Planar::parameters(&rebuilt), Planar::parameters(&transform), epsilon = 1e-12);

        let transform = Spatial::increment(&SVector::<f64, 6>::from_column_slice(&[
            0.5, -1.0, 2.0, 0.2, 0.1, -0.3,
        ]));
        let rotation = transform.rotation.to_rotation_matrix().into_inner();
        let rebuilt = Spatial::from_rotation_translation(&rotation, &transform.translation.vector);
        assert_relative_eq!(
            Spatial::parameters(&rebuilt),
            Spatial::parameters(&transform),
            epsilon = 1e-9
        );
    }
}
