//! Parallel, view-dependent culling and depth sorting.
//!
//! - `Sorter`: cull + sort over a shared packed set, synchronous or as a
//!   single background job
//! - `ThreadPool`: the fixed-size worker pool the sorter fans out on
//! - `SortConfig`: frustum slack and partition sizing

mod pool;
mod sorter;

// Re-export public types
pub use pool::{TaskHandle, ThreadPool};
pub use sorter::{SortConfig, Sorter};
