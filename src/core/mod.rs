//! Core data structures and mathematical operations.
//!
//! This module contains the fundamental types used throughout the system:
//! - `GaussianCloud`: full-precision Gaussians as produced by loaders
//! - `PackedGaussians`: the quantized, GPU-ready representation
//! - `pack`/`unpack`: the lossy conversion between the two
//!
//! All types here are "pure data" - no I/O, no threading.

mod gaussian;
mod math;
mod quantize;

// Re-export public types
pub use gaussian::{DynamicArrays, Dynamics, GaussianCloud, PackedGaussians, MAX_SH_DEGREE};
pub(crate) use gaussian::try_zeroed;
pub use math::{covariance_upper, quaternion_to_matrix, sh_coeff_count, sigmoid};
pub use quantize::{pack, unpack};
