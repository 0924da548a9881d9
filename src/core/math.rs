//! Mathematical utilities shared by the quantizer and the sorter.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Number of RGB spherical-harmonic coefficients for a degree-`d` basis.
///
/// Degree 0 is the DC (base color) term alone; degree 3 is the maximum the
/// packed representation supports.
pub fn sh_coeff_count(sh_degree: u32) -> usize {
    let d = sh_degree as usize + 1;
    d * d
}

/// Convert a unit quaternion to a 3×3 rotation matrix.
pub fn quaternion_to_matrix(q: &UnitQuaternion<f32>) -> Matrix3<f32> {
    q.to_rotation_matrix().into_inner()
}

/// Compute the six packed covariance entries for one Gaussian.
///
/// With `M = diag(scale) · R(rotation)`, the entries are the upper triangle
/// of `Σ = Mᵀ · M` in the order `(σ00, σ01, σ02, σ11, σ12, σ22)`. The codec
/// writes this layout directly, so the ordering must never change.
pub fn covariance_upper(scale: &Vector3<f32>, rotation: &UnitQuaternion<f32>) -> [f32; 6] {
    let m = Matrix3::from_diagonal(scale) * quaternion_to_matrix(rotation);
    let sigma = m.transpose() * m;

    [
        sigma[(0, 0)],
        sigma[(0, 1)],
        sigma[(0, 2)],
        sigma[(1, 1)],
        sigma[(1, 2)],
        sigma[(2, 2)],
    ]
}

/// Sigmoid activation: maps the logit-space opacities found in `.ply` files
/// into [0, 1].
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sh_counts_match_degrees() {
        assert_eq!(sh_coeff_count(0), 1);
        assert_eq!(sh_coeff_count(1), 4);
        assert_eq!(sh_coeff_count(2), 9);
        assert_eq!(sh_coeff_count(3), 16);
    }

    #[test]
    fn identity_rotation_gives_diagonal_covariance() {
        let scale = Vector3::new(1.0, 2.0, 3.0);
        let cov = covariance_upper(&scale, &UnitQuaternion::identity());

        assert_relative_eq!(cov[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(cov[3], 4.0, epsilon = 1e-6);
        assert_relative_eq!(cov[5], 9.0, epsilon = 1e-6);
        assert_relative_eq!(cov[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(cov[2], 0.0, epsilon = 1e-6);
        assert_relative_eq!(cov[4], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn covariance_is_rotation_invariant_for_uniform_scale() {
        // A uniformly scaled Gaussian is a sphere: any rotation must produce
        // the same covariance.
        let scale = Vector3::new(2.0, 2.0, 2.0);
        let q = UnitQuaternion::from_euler_angles(0.4, -1.1, 0.7);

        let a = covariance_upper(&scale, &UnitQuaternion::identity());
        let b = covariance_upper(&scale, &q);

        for i in 0..6 {
            assert_relative_eq!(a[i], b[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn covariance_trace_is_sum_of_squared_scales() {
        // tr(Σ) = tr(Rᵀ S² R) = tr(S²) regardless of rotation.
        let scale = Vector3::new(0.5, 1.5, 2.5);
        let q = UnitQuaternion::from_euler_angles(1.2, 0.3, -0.8);
        let cov = covariance_upper(&scale, &q);

        let trace = cov[0] + cov[3] + cov[5];
        let expected = scale.x * scale.x + scale.y * scale.y + scale.z * scale.z;
        assert_relative_eq!(trace, expected, epsilon = 1e-4);
    }

    #[test]
    fn sigmoid_midpoint() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }
}
