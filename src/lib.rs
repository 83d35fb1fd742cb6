//! triorder
//!
//! Triangle-order optimization for indexed triangle meshes. The passes
//! reorder triangles (and optionally vertices) so the mesh renders faster:
//!
//! * [optimize_vcache] improves post-transform vertex cache locality
//! * [cluster_mesh] partitions a cache-optimized list into view-coherent clusters
//! * [optimize_overdraw] reorders clusters front to back across many viewpoints
//! * [optimize_vertex_memory] lays vertices out in first-reference order
//! * [optimize] / [fast_optimize] compose the passes end to end
//!
//! All passes are deterministic, run to completion on the calling thread
//! (the ray caster fans viewpoints out over a thread pool internally) and
//! leave caller buffers untouched on error.
//!
//! ```
//! use triorder::{measure_cache_efficiency, optimize_vcache, VcacheStrategy};
//!
//! let indices = [0, 1, 2, 2, 1, 3];
//! let mut optimized = [0u32; 6];
//! optimize_vcache(&mut optimized, &indices, 4, 12, VcacheStrategy::Auto, None)?;
//!
//! let acmr = measure_cache_efficiency(&optimized, 12)?;
//! assert!(acmr <= 2.0);
//! # Ok::<(), triorder::Error>(())
//! ```

pub mod cluster;
pub mod error;
pub mod fetch;
pub mod mesh;
pub mod overdraw;
pub mod pipeline;
pub mod topology;
pub mod vcache;
pub mod viewpoints;

mod raytrace;
mod util;

pub use cluster::{
    ClusterTuning, DEFAULT_ALPHA, cluster_mesh, cluster_mesh_tuned, fast_optimize_vcache_and_cluster, vcache_clusters,
};
pub use error::{Error, Result};
pub use fetch::{optimize_vertex_memory, optimize_vertex_memory_remap};
pub use mesh::VertexBuffer;
pub use overdraw::{
    OverdrawStatistics, OverdrawStrategy, RAYTRACE_CLUSTER_THRESHOLD, measure_overdraw, optimize_overdraw,
};
pub use pipeline::{fast_optimize, optimize};
pub use vcache::{TipsyTuning, VcacheStrategy, measure_cache_efficiency, optimize_vcache, optimize_vcache_tuned};
pub use viewpoints::{DEFAULT_VIEWPOINT_COUNT, default_viewpoints};

/// Default post-transform cache size assumed by callers that have no better
/// estimate of the target hardware.
pub const DEFAULT_CACHE_SIZE: u32 = 12;

pub(crate) const INVALID_INDEX: u32 = u32::MAX;

/// Vertex order that identifies the front side of a triangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winding {
    /// Front faces wind clockwise seen from the front.
    Clockwise,
    /// Front faces wind counter-clockwise seen from the front.
    CounterClockwise,
}
