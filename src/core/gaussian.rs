//! Gaussian set representations and the combiner.
//!
//! Two representations exist side by side:
//! - `GaussianCloud`: full-precision floats, the producer side (PLY loaders,
//!   bindings) writes this.
//! - `PackedGaussians`: the quantized, GPU-upload-ready form the codec stores
//!   and the sorter reads.
//!
//! Both own their per-Gaussian arrays exclusively; dropping a set frees
//! everything. The packed arrays are exposed as flat slices so consumers can
//! hand them straight to a graphics device.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::sh_coeff_count;
use crate::core::quantize::{dequantize_unorm16, dequantize_unorm8, quantize_unorm16, quantize_unorm8};
use crate::error::{Error, Result};

/// Highest spherical-harmonic degree the packed representation supports.
pub const MAX_SH_DEGREE: u32 = 3;

/// Per-Gaussian temporal data for dynamic scenes: a linear velocity plus a
/// Gaussian in time (mean, standard deviation).
///
/// The block is all-or-none: either every Gaussian in a cloud has it or none
/// does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dynamics {
    pub velocities: Vec<Vector3<f32>>,
    pub t_means: Vec<f32>,
    pub t_stdevs: Vec<f32>,
}

/// Borrowed flat arrays for the dynamic trio, as handed over by bindings.
#[derive(Debug, Clone, Copy)]
pub struct DynamicArrays<'a> {
    /// Per-Gaussian velocity, 3 floats each.
    pub velocities: &'a [f32],
    /// Per-Gaussian mean time, 1 float each.
    pub t_means: &'a [f32],
    /// Per-Gaussian temporal standard deviation, 1 float each.
    pub t_stdevs: &'a [f32],
}

/// A set of Gaussians in full floating-point precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianCloud {
    pub(crate) sh_degree: u32,
    pub(crate) means: Vec<Vector3<f32>>,
    pub(crate) scales: Vec<Vector3<f32>>,
    pub(crate) rotations: Vec<UnitQuaternion<f32>>,
    pub(crate) opacities: Vec<f32>,
    /// `len() * (sh_degree + 1)² * 3` coefficients, RGB interleaved per
    /// coefficient. Index 0 of each Gaussian is the DC color term.
    pub(crate) shs: Vec<f32>,
    pub(crate) dynamics: Option<Dynamics>,
}

impl GaussianCloud {
    /// Build a cloud from flat arrays.
    ///
    /// Expected shapes for `N` Gaussians: `means`/`scales` are `N×3`,
    /// `rotations` is `N×4` quaternions in `(w, x, y, z)` order, `opacities`
    /// is `N`, and `shs` is `N×(d+1)²×3` — the SH degree is derived from the
    /// coefficient count. The dynamic trio is all-or-none; when present,
    /// `velocities` is `N×3` and the two time arrays are `N`.
    pub fn from_arrays(
        means: &[f32],
        scales: &[f32],
        rotations: &[f32],
        opacities: &[f32],
        shs: &[f32],
        dynamics: Option<DynamicArrays<'_>>,
    ) -> Result<Self> {
        if means.len() % 3 != 0 {
            return Err(Error::InvalidArguments(
                "means array length must be a multiple of 3".into(),
            ));
        }
        let count = means.len() / 3;

        if scales.len() != count * 3 {
            return Err(Error::InvalidArguments(format!(
                "expected {} scale floats, got {}",
                count * 3,
                scales.len()
            )));
        }
        if rotations.len() != count * 4 {
            return Err(Error::InvalidArguments(format!(
                "expected {} rotation floats, got {}",
                count * 4,
                rotations.len()
            )));
        }
        if opacities.len() != count {
            return Err(Error::InvalidArguments(format!(
                "expected {} opacities, got {}",
                count,
                opacities.len()
            )));
        }

        let sh_degree = derive_sh_degree(count, shs.len())?;

        let dynamics = match dynamics {
            None => None,
            Some(arrays) => {
                if arrays.velocities.len() != count * 3
                    || arrays.t_means.len() != count
                    || arrays.t_stdevs.len() != count
                {
                    return Err(Error::InvalidArguments(
                        "dynamic arrays do not match the gaussian count".into(),
                    ));
                }

                Some(Dynamics {
                    velocities: arrays
                        .velocities
                        .chunks_exact(3)
                        .map(Vector3::from_column_slice)
                        .collect(),
                    t_means: arrays.t_means.to_vec(),
                    t_stdevs: arrays.t_stdevs.to_vec(),
                })
            }
        };

        Ok(Self {
            sh_degree,
            means: means.chunks_exact(3).map(Vector3::from_column_slice).collect(),
            scales: scales.chunks_exact(3).map(Vector3::from_column_slice).collect(),
            rotations: rotations
                .chunks_exact(4)
                .map(|q| {
                    UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
                        q[0], q[1], q[2], q[3],
                    ))
                })
                .collect(),
            opacities: opacities.to_vec(),
            shs: shs.to_vec(),
            dynamics,
        })
    }

    pub(crate) fn from_parts(
        sh_degree: u32,
        means: Vec<Vector3<f32>>,
        scales: Vec<Vector3<f32>>,
        rotations: Vec<UnitQuaternion<f32>>,
        opacities: Vec<f32>,
        shs: Vec<f32>,
        dynamics: Option<Dynamics>,
    ) -> Self {
        debug_assert_eq!(shs.len(), means.len() * sh_coeff_count(sh_degree) * 3);

        Self {
            sh_degree,
            means,
            scales,
            rotations,
            opacities,
            shs,
            dynamics,
        }
    }

    /// Number of Gaussians in the cloud.
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// Check if the cloud is empty.
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    pub fn sh_degree(&self) -> u32 {
        self.sh_degree
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamics.is_some()
    }

    pub fn means(&self) -> &[Vector3<f32>] {
        &self.means
    }

    pub fn scales(&self) -> &[Vector3<f32>] {
        &self.scales
    }

    pub fn rotations(&self) -> &[UnitQuaternion<f32>] {
        &self.rotations
    }

    pub fn opacities(&self) -> &[f32] {
        &self.opacities
    }

    /// All SH coefficients, flattened.
    pub fn shs(&self) -> &[f32] {
        &self.shs
    }

    /// The SH coefficients of a single Gaussian, `(d+1)² * 3` floats.
    pub fn sh(&self, index: usize) -> &[f32] {
        let stride = sh_coeff_count(self.sh_degree) * 3;
        &self.shs[index * stride..(index + 1) * stride]
    }

    pub fn dynamics(&self) -> Option<&Dynamics> {
        self.dynamics.as_ref()
    }
}

fn derive_sh_degree(count: usize, sh_len: usize) -> Result<u32> {
    if count == 0 {
        if sh_len != 0 {
            return Err(Error::InvalidArguments(
                "sh coefficients provided for an empty cloud".into(),
            ));
        }
        return Ok(0);
    }

    if sh_len % (count * 3) != 0 {
        return Err(Error::InvalidArguments(
            "sh array length must be count * (degree + 1)^2 * 3".into(),
        ));
    }

    let coeffs = sh_len / (count * 3);
    for degree in 0..=MAX_SH_DEGREE {
        if sh_coeff_count(degree) == coeffs {
            return Ok(degree);
        }
    }

    Err(Error::InvalidArguments(format!(
        "{} sh coefficients per gaussian do not match any degree <= {}",
        coeffs, MAX_SH_DEGREE
    )))
}

/// A set of Gaussians quantized for storage and rendering.
///
/// All arrays are flat and laid out exactly as the `.mgs` payload: `means`
/// holds 4 floats per Gaussian (`w` carries the mean time, 0.5 when static),
/// `covariances` 6 floats, `colors` 3 normalized u16 against
/// `[color_min, color_max]`, `shs` the non-DC coefficients as normalized u8
/// against `[sh_min, sh_max]`, and `velocities` (dynamic sets only) 4 floats
/// per Gaussian with the temporal stdev in `w`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedGaussians {
    pub(crate) count: u32,
    pub(crate) sh_degree: u32,

    pub(crate) color_min: f32,
    pub(crate) color_max: f32,
    pub(crate) sh_min: f32,
    pub(crate) sh_max: f32,

    pub(crate) means: Vec<f32>,
    pub(crate) covariances: Vec<f32>,
    pub(crate) opacities: Vec<u8>,
    pub(crate) colors: Vec<u16>,
    pub(crate) shs: Vec<u8>,
    pub(crate) velocities: Option<Vec<f32>>,
}

impl PackedGaussians {
    /// Allocate a zeroed packed set.
    ///
    /// Fails fast on a zero count or an out-of-range SH degree, and reports
    /// allocation failure as `Error::OutOfMemory` instead of aborting.
    /// Normalization ranges start at `[-1, 1]`.
    pub fn allocate(count: u32, sh_degree: u32, dynamic: bool) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidArguments(
                "gaussian count must be positive".into(),
            ));
        }
        if sh_degree > MAX_SH_DEGREE {
            return Err(Error::InvalidArguments(format!(
                "spherical harmonic degree {} exceeds the maximum of {}",
                sh_degree, MAX_SH_DEGREE
            )));
        }

        let n = count as usize;
        let non_dc = sh_coeff_count(sh_degree) - 1;

        Ok(Self {
            count,
            sh_degree,
            color_min: -1.0,
            color_max: 1.0,
            sh_min: -1.0,
            sh_max: 1.0,
            means: try_zeroed(n * 4)?,
            covariances: try_zeroed(n * 6)?,
            opacities: try_zeroed(n)?,
            colors: try_zeroed(n * 3)?,
            shs: try_zeroed(n * non_dc * 3)?,
            velocities: if dynamic { Some(try_zeroed(n * 4)?) } else { None },
        })
    }

    /// Number of Gaussians. Always positive.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn sh_degree(&self) -> u32 {
        self.sh_degree
    }

    pub fn is_dynamic(&self) -> bool {
        self.velocities.is_some()
    }

    /// DC color normalization range `(min, max)`.
    pub fn color_range(&self) -> (f32, f32) {
        (self.color_min, self.color_max)
    }

    /// Non-DC SH normalization range `(min, max)`.
    pub fn sh_range(&self) -> (f32, f32) {
        (self.sh_min, self.sh_max)
    }

    /// Positions, 4 floats per Gaussian; `w` is the mean time.
    pub fn means(&self) -> &[f32] {
        &self.means
    }

    /// Packed covariances, 6 floats per Gaussian.
    pub fn covariances(&self) -> &[f32] {
        &self.covariances
    }

    /// Opacities as normalized u8.
    pub fn opacities(&self) -> &[u8] {
        &self.opacities
    }

    /// DC colors as normalized u16 triplets.
    pub fn colors(&self) -> &[u16] {
        &self.colors
    }

    /// Non-DC SH coefficients as normalized u8; empty at degree 0.
    pub fn shs(&self) -> &[u8] {
        &self.shs
    }

    /// Velocities, 4 floats per Gaussian with the temporal stdev in `w`;
    /// `None` for static sets.
    pub fn velocities(&self) -> Option<&[f32]> {
        self.velocities.as_deref()
    }

    /// Concatenate two packed sets into a new one.
    ///
    /// Means, covariances and opacities are preserved verbatim. The
    /// quantized color and SH channels are dequantized in their source range
    /// and re-quantized against the union range, so the result is lossy in
    /// the same sense as packing. If either side is dynamic the result is
    /// dynamic, with zero velocities filled in for the static side.
    pub fn combine(&self, other: &Self) -> Result<Self> {
        if self.sh_degree != other.sh_degree {
            return Err(Error::InvalidInput(format!(
                "cannot combine gaussians with sh degrees {} and {}",
                self.sh_degree, other.sh_degree
            )));
        }

        let count = self.count.checked_add(other.count).ok_or_else(|| {
            Error::InvalidInput("combined gaussian count overflows u32".into())
        })?;
        let dynamic = self.is_dynamic() || other.is_dynamic();

        let mut out = Self::allocate(count, self.sh_degree, dynamic)?;

        out.color_min = self.color_min.min(other.color_min);
        out.color_max = self.color_max.max(other.color_max);
        out.sh_min = self.sh_min.min(other.sh_min);
        out.sh_max = self.sh_max.max(other.sh_max);

        let n1 = self.len();

        // Raw-preserving channels: plain concatenation.
        out.means[..n1 * 4].copy_from_slice(&self.means);
        out.means[n1 * 4..].copy_from_slice(&other.means);

        out.covariances[..n1 * 6].copy_from_slice(&self.covariances);
        out.covariances[n1 * 6..].copy_from_slice(&other.covariances);

        out.opacities[..n1].copy_from_slice(&self.opacities);
        out.opacities[n1..].copy_from_slice(&other.opacities);

        // Quantized channels: re-normalize each sample into the union range.
        for (dst, &src) in out.colors[..n1 * 3].iter_mut().zip(&self.colors) {
            let v = dequantize_unorm16(src, self.color_min, self.color_max);
            *dst = quantize_unorm16(v, out.color_min, out.color_max);
        }
        for (dst, &src) in out.colors[n1 * 3..].iter_mut().zip(&other.colors) {
            let v = dequantize_unorm16(src, other.color_min, other.color_max);
            *dst = quantize_unorm16(v, out.color_min, out.color_max);
        }

        let sh1 = self.shs.len();
        for (dst, &src) in out.shs[..sh1].iter_mut().zip(&self.shs) {
            let v = dequantize_unorm8(src, self.sh_min, self.sh_max);
            *dst = quantize_unorm8(v, out.sh_min, out.sh_max);
        }
        for (dst, &src) in out.shs[sh1..].iter_mut().zip(&other.shs) {
            let v = dequantize_unorm8(src, other.sh_min, other.sh_max);
            *dst = quantize_unorm8(v, out.sh_min, out.sh_max);
        }

        // A static side of a dynamic result keeps the zero fill from
        // `allocate`.
        if let Some(out_vel) = out.velocities.as_mut() {
            if let Some(v) = &self.velocities {
                out_vel[..n1 * 4].copy_from_slice(v);
            }
            if let Some(v) = &other.velocities {
                out_vel[n1 * 4..].copy_from_slice(v);
            }
        }

        Ok(out)
    }
}

pub(crate) fn try_zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, T::default());
    Ok(v)
}
