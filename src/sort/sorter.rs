//! View-dependent culling and depth sorting of packed Gaussians.
//!
//! Alpha compositing needs the visible Gaussians ordered far-to-near for the
//! current camera. `Sorter` holds a shared, read-only reference to a packed
//! set and produces a dense index permutation: Gaussians inside the (slacked)
//! frustum, by strictly decreasing view-space z. The work is split into
//! contiguous partitions sorted on the pool, then reduced with a pairwise
//! tree merge.
//!
//! A sort can also run as a single background job (`sort_async_start` /
//! `sort_async_try_join`); `latest` always returns the most recently
//! completed result.

use nalgebra::{Matrix4, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

use crate::core::PackedGaussians;
use crate::error::{Error, Result};
use crate::sort::pool::ThreadPool;

/// Tuning knobs for the sorter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    /// Multiplier on `clip.w` in the frustum test. Values above 1 keep
    /// Gaussians slightly outside the strict frustum so large splats do not
    /// pop at the screen edges.
    pub clip_slack: f32,

    /// Smallest number of Gaussians worth a partition of its own; below
    /// this, fanning out costs more than it saves.
    pub min_partition_size: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            clip_slack: 1.2,
            min_partition_size: 5000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SortEntry {
    index: u32,
    depth: f32,
}

/// Culls and depth-sorts a packed Gaussian set for a camera.
pub struct Sorter {
    gaussians: Arc<PackedGaussians>,
    pool: Arc<ThreadPool>,
    config: SortConfig,
    indices: Vec<u32>,
    background: Option<JoinHandle<Vec<u32>>>,
}

impl Sorter {
    /// Create a sorter over a shared set, using the process-wide pool.
    pub fn new(gaussians: Arc<PackedGaussians>) -> Self {
        Self::with_pool(
            gaussians,
            Arc::clone(ThreadPool::global()),
            SortConfig::default(),
        )
    }

    /// Create a sorter with an injected pool and configuration. Tests use a
    /// single-worker pool to serialize the whole sort.
    pub fn with_pool(
        gaussians: Arc<PackedGaussians>,
        pool: Arc<ThreadPool>,
        config: SortConfig,
    ) -> Self {
        Self {
            gaussians,
            pool,
            config,
            indices: Vec::new(),
            background: None,
        }
    }

    /// Cull and sort synchronously for the given view/projection matrices
    /// and scene time. Rejected while a background sort is running.
    pub fn sort(&mut self, view: &Matrix4<f32>, proj: &Matrix4<f32>, time: f32) -> Result<&[u32]> {
        if self.background.is_some() {
            return Err(Error::InvalidArguments(
                "a background sort is already running".into(),
            ));
        }

        self.indices = cull_and_sort(&self.gaussians, &self.pool, view, proj, time, self.config);
        Ok(&self.indices)
    }

    /// Kick off the same sort on a single background thread.
    pub fn sort_async_start(
        &mut self,
        view: &Matrix4<f32>,
        proj: &Matrix4<f32>,
        time: f32,
    ) -> Result<()> {
        if self.background.is_some() {
            return Err(Error::InvalidArguments(
                "a background sort is already running".into(),
            ));
        }

        let gaussians = Arc::clone(&self.gaussians);
        let pool = Arc::clone(&self.pool);
        let config = self.config;
        let view = *view;
        let proj = *proj;

        self.background = Some(thread::spawn(move || {
            cull_and_sort(&gaussians, &pool, &view, &proj, time, config)
        }));

        Ok(())
    }

    /// Whether a background sort is in flight.
    pub fn sort_async_pending(&self) -> bool {
        self.background.is_some()
    }

    /// Non-blocking join of the background sort.
    ///
    /// Returns `true` and publishes the new result if the worker finished,
    /// `false` while it is still running. Calling without a background sort
    /// in flight is a caller bug and fails with `InvalidArguments`.
    pub fn sort_async_try_join(&mut self) -> Result<bool> {
        let Some(handle) = self.background.take() else {
            return Err(Error::InvalidArguments(
                "no background sort is running".into(),
            ));
        };

        if !handle.is_finished() {
            self.background = Some(handle);
            return Ok(false);
        }

        match handle.join() {
            Ok(indices) => {
                self.indices = indices;
                Ok(true)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// The most recently completed index list. While a background sort runs
    /// this is the previous result (empty before the first).
    pub fn latest(&self) -> &[u32] {
        &self.indices
    }
}

impl Drop for Sorter {
    fn drop(&mut self) {
        // An in-flight sort runs to completion; join rather than detach so
        // the worker is gone before our pool reference is.
        if let Some(handle) = self.background.take() {
            let _ = handle.join();
        }
    }
}

fn cull_and_sort(
    gaussians: &Arc<PackedGaussians>,
    pool: &ThreadPool,
    view: &Matrix4<f32>,
    proj: &Matrix4<f32>,
    time: f32,
    config: SortConfig,
) -> Vec<u32> {
    let count = gaussians.len();
    let partitions = partition_ranges(
        count,
        pool.worker_count().min((count / config.min_partition_size.max(1)).max(1)),
    );

    // Phase 1: cull and sort each partition on the pool.
    let view = *view;
    let proj = *proj;

    let tasks: Vec<_> = partitions
        .into_iter()
        .map(|range| {
            let gaussians = Arc::clone(gaussians);
            pool.submit(move || cull_partition(&gaussians, range, &view, &proj, time, config.clip_slack))
        })
        .collect();

    let mut runs: Vec<Vec<SortEntry>> = tasks
        .into_iter()
        .map(|task| task.wait())
        .filter(|run| !run.is_empty())
        .collect();

    let retained: usize = runs.iter().map(Vec::len).sum();
    debug!(count, retained, runs = runs.len(), "culled gaussian partitions");

    // Phase 2: pairwise tree merge, one pool task per pair, an odd survivor
    // carried forward unmerged.
    while runs.len() > 2 {
        let mut merges = Vec::with_capacity(runs.len() / 2);
        let mut carried = None;

        let mut iter = runs.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => merges.push(pool.submit(move || merge_runs(&a, &b))),
                None => carried = Some(a),
            }
        }

        runs = merges.into_iter().map(|task| task.wait()).collect();
        runs.extend(carried);
    }

    // Phase 3: final merge of at most two runs, on the calling thread.
    match runs.len() {
        0 => Vec::new(),
        1 => runs[0].iter().map(|e| e.index).collect(),
        _ => {
            let merged = merge_runs(&runs[0], &runs[1]);
            merged.iter().map(|e| e.index).collect()
        }
    }
}

fn cull_partition(
    gaussians: &PackedGaussians,
    range: Range<usize>,
    view: &Matrix4<f32>,
    proj: &Matrix4<f32>,
    time: f32,
    clip_slack: f32,
) -> Vec<SortEntry> {
    let means = gaussians.means();
    let velocities = gaussians.velocities();

    let mut run = Vec::with_capacity(range.len());
    for j in range {
        let base = j * 4;
        let mut world = Vector3::new(means[base], means[base + 1], means[base + 2]);
        if let Some(vel) = velocities {
            world += Vector3::new(vel[base], vel[base + 1], vel[base + 2]) * time;
        }

        let cam = view * Vector4::new(world.x, world.y, world.z, 1.0);
        let clip = proj * cam;

        let limit = clip_slack * clip.w;
        if clip.x.abs() > limit || clip.y.abs() > limit || clip.z.abs() > limit {
            continue;
        }

        run.push(SortEntry {
            index: j as u32,
            depth: cam.z,
        });
    }

    run.sort_unstable_by(|a, b| b.depth.partial_cmp(&a.depth).unwrap_or(Ordering::Equal));
    run
}

/// Split `count` indices into `parts` contiguous ranges whose sizes differ by
/// at most one.
fn partition_ranges(count: usize, parts: usize) -> Vec<Range<usize>> {
    let base = count / parts;
    let remainder = count % parts;

    (0..parts)
        .map(|i| {
            let start = base * i + i.min(remainder);
            let len = base + usize::from(i < remainder);
            start..start + len
        })
        .collect()
}

/// Merge two runs already sorted by descending depth.
fn merge_runs(a: &[SortEntry], b: &[SortEntry]) -> Vec<SortEntry> {
    let mut out = Vec::with_capacity(a.len() + b.len());

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].depth > b[j].depth {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);

    out
}
