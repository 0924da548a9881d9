//! I/O operations for loading and saving Gaussian sets.
//!
//! This module handles all file format parsing and export:
//! - `.mgs` container (packed Gaussians + scene metadata)
//! - PLY format (Gaussian clouds from the 3DGS training ecosystem)

mod mgs;
mod ply;

// Re-export public types and functions
pub use mgs::{decode_bytes, decode_file, encode, SceneMetadata};
pub use ply::{load_ply, load_ply_bytes};
