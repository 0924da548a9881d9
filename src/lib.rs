//! # mgs: packing, storage and sorting for 3D Gaussian Splatting scenes
//!
//! This crate is the core library behind a Gaussian Splatting viewer,
//! including an experimental dynamic (time-varying) extension. It covers
//! three tightly coupled jobs:
//!
//! - Quantizing raw floating-point Gaussians (means, rotations + scales,
//!   opacities, spherical harmonics, optional velocity and temporal spread)
//!   into a compact, GPU-upload-ready representation.
//! - The `.mgs` binary container for packed sets, including loss-tolerant
//!   combination of two compatible sets.
//! - A parallel, view-dependent cull-and-depth-sort that produces the index
//!   permutation used for alpha compositing, runnable synchronously or as a
//!   single background job with try-join semantics.
//!
//! ## Architecture
//!
//! - `core`: Gaussian set representations, quantization, the combiner
//! - `io`: the `.mgs` codec and `.ply` ingestion
//! - `sort`: the sorter, its thread pool and the background driver
//!
//! Rendering, windowing, and host-language bindings live outside this crate;
//! they consume the packed buffer views and the sorted index lists exposed
//! here.
//!
//! ## Example
//!
//! ```no_run
//! use mgs::{pack, encode, decode_file, SceneMetadata, Sorter};
//! use nalgebra::Matrix4;
//! use std::sync::Arc;
//!
//! # fn main() -> mgs::Result<()> {
//! let cloud = mgs::load_ply("scene.ply")?;
//! let packed = pack(&cloud)?;
//! encode(&packed, SceneMetadata::default(), "scene.mgs")?;
//!
//! let (packed, _metadata) = decode_file("scene.mgs")?;
//! let mut sorter = Sorter::new(Arc::new(packed));
//! let indices = sorter.sort(&Matrix4::identity(), &Matrix4::identity(), 0.0)?;
//! # let _ = indices;
//! # Ok(())
//! # }
//! ```

// Core data structures and quantization
pub mod core;

// I/O operations (.mgs container, PLY ingestion)
pub mod io;

// Culling, sorting, thread pool
pub mod sort;

mod error;

// Re-export commonly used types at crate root for convenience
pub use crate::core::{
    pack, unpack, DynamicArrays, Dynamics, GaussianCloud, PackedGaussians, MAX_SH_DEGREE,
};
pub use error::{Error, Result};
pub use io::{decode_bytes, decode_file, encode, load_ply, load_ply_bytes, SceneMetadata};
pub use sort::{SortConfig, Sorter, ThreadPool};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
