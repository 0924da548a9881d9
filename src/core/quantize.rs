//! Lossy conversion between float and packed Gaussian sets.
//!
//! `pack` derives per-channel normalization ranges in a first pass and emits
//! packed rows in a second. `unpack` is the documented left-inverse modulo
//! quantization error: colors are recovered within
//! `(color_max - color_min) / 65535` per channel, non-DC SH within
//! `(sh_max - sh_min) / 255`, opacity within `1 / 255`. Scale and rotation
//! come back from the packed covariance through a symmetric
//! eigendecomposition, so the covariance survives a round trip even though
//! the original factorization does not.

use nalgebra::{Matrix3, Rotation3, SymmetricEigen, UnitQuaternion, Vector3};

use crate::core::gaussian::{Dynamics, GaussianCloud, PackedGaussians};
use crate::core::math::{covariance_upper, sh_coeff_count};
use crate::error::{Error, Result};

/// The packed covariance absorbs the conventional renderer constant.
const COVARIANCE_SCALE: f32 = 4.0;

/// Quantize a float Gaussian set into the packed representation.
///
/// The DC color range is derived only from the first SH coefficient of each
/// Gaussian, the SH range only from the rest. Both folds start at
/// `(+inf, -inf)`, so a degree-0 set leaves the SH range inverted; the codec
/// stores and validates it only when a degree is actually present.
pub fn pack(cloud: &GaussianCloud) -> Result<PackedGaussians> {
    let count = u32::try_from(cloud.len())
        .map_err(|_| Error::InvalidArguments("gaussian count exceeds u32".into()))?;

    let mut packed = PackedGaussians::allocate(count, cloud.sh_degree(), cloud.is_dynamic())?;

    let n = cloud.len();
    let coeffs = sh_coeff_count(cloud.sh_degree());

    // Pass 1: normalization ranges.
    let mut color_min = f32::INFINITY;
    let mut color_max = f32::NEG_INFINITY;
    let mut sh_min = f32::INFINITY;
    let mut sh_max = f32::NEG_INFINITY;

    for i in 0..n {
        let sh = cloud.sh(i);

        for &v in &sh[..3] {
            color_min = color_min.min(v);
            color_max = color_max.max(v);
        }
        for &v in &sh[3..] {
            sh_min = sh_min.min(v);
            sh_max = sh_max.max(v);
        }
    }

    packed.color_min = color_min;
    packed.color_max = color_max;
    packed.sh_min = sh_min;
    packed.sh_max = sh_max;

    // Pass 2: packed rows.
    for i in 0..n {
        let mean = cloud.means()[i];
        let t_mean = match cloud.dynamics() {
            Some(d) => d.t_means[i],
            None => 0.5,
        };
        packed.means[i * 4..i * 4 + 4].copy_from_slice(&[mean.x, mean.y, mean.z, t_mean]);

        let cov = covariance_upper(&cloud.scales()[i], &cloud.rotations()[i]);
        for (j, &c) in cov.iter().enumerate() {
            packed.covariances[i * 6 + j] = COVARIANCE_SCALE * c;
        }

        packed.opacities[i] = quantize_unorm8(cloud.opacities()[i], 0.0, 1.0);

        let sh = cloud.sh(i);
        for j in 0..3 {
            packed.colors[i * 3 + j] = quantize_unorm16(sh[j], color_min, color_max);
        }
        for j in 0..(coeffs - 1) * 3 {
            packed.shs[i * (coeffs - 1) * 3 + j] = quantize_unorm8(sh[3 + j], sh_min, sh_max);
        }

        if let Some(d) = cloud.dynamics() {
            let v = d.velocities[i];
            if let Some(vel) = packed.velocities.as_mut() {
                vel[i * 4..i * 4 + 4].copy_from_slice(&[v.x, v.y, v.z, d.t_stdevs[i]]);
            }
        }
    }

    Ok(packed)
}

/// Recover a float Gaussian set from a packed one.
///
/// Scale and rotation are reconstructed by eigendecomposing the stored
/// covariance: the eigenvalues give the squared scales and the transposed
/// eigenbasis the rotation (with a determinant fix-up, since an eigenbasis is
/// only defined up to reflection). Repacking the result reproduces the
/// covariance within floating-point tolerance, not bit-for-bit.
pub fn unpack(packed: &PackedGaussians) -> Result<GaussianCloud> {
    let n = packed.len();
    let coeffs = sh_coeff_count(packed.sh_degree());
    let (color_min, color_max) = packed.color_range();
    let (sh_min, sh_max) = packed.sh_range();

    let mut means = Vec::with_capacity(n);
    let mut scales = Vec::with_capacity(n);
    let mut rotations = Vec::with_capacity(n);
    let mut opacities = Vec::with_capacity(n);
    let mut shs = Vec::with_capacity(n * coeffs * 3);

    let mut dynamics = packed.is_dynamic().then(|| Dynamics {
        velocities: Vec::with_capacity(n),
        t_means: Vec::with_capacity(n),
        t_stdevs: Vec::with_capacity(n),
    });

    for i in 0..n {
        let m = &packed.means()[i * 4..i * 4 + 4];
        means.push(Vector3::new(m[0], m[1], m[2]));

        let (scale, rotation) = split_covariance(&packed.covariances()[i * 6..i * 6 + 6]);
        scales.push(scale);
        rotations.push(rotation);

        opacities.push(packed.opacities()[i] as f32 / 255.0);

        for j in 0..3 {
            shs.push(dequantize_unorm16(
                packed.colors()[i * 3 + j],
                color_min,
                color_max,
            ));
        }
        for j in 0..(coeffs - 1) * 3 {
            shs.push(dequantize_unorm8(
                packed.shs()[i * (coeffs - 1) * 3 + j],
                sh_min,
                sh_max,
            ));
        }

        if let (Some(d), Some(vel)) = (dynamics.as_mut(), packed.velocities()) {
            let v = &vel[i * 4..i * 4 + 4];
            d.velocities.push(Vector3::new(v[0], v[1], v[2]));
            d.t_means.push(m[3]);
            d.t_stdevs.push(v[3]);
        }
    }

    Ok(GaussianCloud::from_parts(
        packed.sh_degree(),
        means,
        scales,
        rotations,
        opacities,
        shs,
        dynamics,
    ))
}

/// Factor a packed covariance back into per-axis scales and a rotation.
fn split_covariance(entries: &[f32]) -> (Vector3<f32>, UnitQuaternion<f32>) {
    let sigma = Matrix3::new(
        entries[0], entries[1], entries[2],
        entries[1], entries[3], entries[4],
        entries[2], entries[4], entries[5],
    ) / COVARIANCE_SCALE;

    let eigen = SymmetricEigen::new(sigma);

    let scale = Vector3::new(
        eigen.eigenvalues[0].max(0.0).sqrt(),
        eigen.eigenvalues[1].max(0.0).sqrt(),
        eigen.eigenvalues[2].max(0.0).sqrt(),
    );

    // Sigma = Rᵀ · S² · R, so the rotation is the transposed eigenbasis. An
    // eigenbasis may be left-handed; flip one axis to land in SO(3).
    let mut basis = eigen.eigenvectors;
    if basis.determinant() < 0.0 {
        basis.column_mut(0).neg_mut();
    }

    let rotation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(basis.transpose()));

    (scale, rotation)
}

pub(crate) fn quantize_unorm8(v: f32, min: f32, max: f32) -> u8 {
    let range = max - min;
    if !(range > 0.0) {
        return 0;
    }
    ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
}

pub(crate) fn quantize_unorm16(v: f32, min: f32, max: f32) -> u16 {
    let range = max - min;
    if !(range > 0.0) {
        return 0;
    }
    ((v - min) / range * 65535.0).round().clamp(0.0, 65535.0) as u16
}

pub(crate) fn dequantize_unorm8(v: u8, min: f32, max: f32) -> f32 {
    v as f32 / 255.0 * (max - min) + min
}

pub(crate) fn dequantize_unorm16(v: u16, min: f32, max: f32) -> f32 {
    v as f32 / 65535.0 * (max - min) + min
}
