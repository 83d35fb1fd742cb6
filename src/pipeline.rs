//! End-to-end optimization entry points.

use glam::Vec3;
use log::debug;

use crate::Winding;
use crate::cluster::{cluster_mesh, fast_optimize_vcache_and_cluster};
use crate::error::{Error, Result};
use crate::mesh::VertexBuffer;
use crate::overdraw::{OverdrawStrategy, optimize_overdraw};
use crate::util::try_vec;
use crate::vcache::{VcacheStrategy, optimize_vcache};

/// Full quality pipeline: vertex cache ordering, clustering, overdraw-aware
/// cluster reordering.
///
/// An empty `viewpoints` slice selects the built-in table. Returns the
/// cluster count.
#[allow(clippy::too_many_arguments)]
pub fn optimize(
    vertices: &VertexBuffer,
    indices: &[u32],
    destination: &mut [u32],
    cache_size: u32,
    viewpoints: &[Vec3],
    winding: Winding,
    strategy: VcacheStrategy,
    alpha: f32,
) -> Result<usize> {
    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    let face_count = indices.len() / 3;

    let mut ordered = try_vec::<u32>(indices.len())?;
    optimize_vcache(&mut ordered, indices, vertices.len(), cache_size, strategy, None)?;

    let mut clustered = try_vec::<u32>(indices.len())?;
    let mut face_cluster = try_vec::<u32>(face_count)?;
    let cluster_count = cluster_mesh(
        vertices,
        &ordered,
        &mut clustered,
        &mut face_cluster,
        None,
        None,
        alpha,
    )?;

    optimize_overdraw(
        vertices,
        &clustered,
        destination,
        viewpoints,
        winding,
        &face_cluster,
        OverdrawStrategy::Auto,
        None,
    )?;

    debug!("optimized {} faces into {} clusters", face_count, cluster_count);

    Ok(cluster_count)
}

/// Fast pipeline: fused vertex cache ordering and clustering, then
/// overdraw-aware cluster reordering with the built-in viewpoints.
///
/// Returns the cluster count.
pub fn fast_optimize(
    vertices: &VertexBuffer,
    indices: &[u32],
    destination: &mut [u32],
    cache_size: u32,
    winding: Winding,
    alpha: f32,
) -> Result<usize> {
    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    let face_count = indices.len() / 3;

    let mut fused = try_vec::<u32>(indices.len())?;
    let mut face_cluster = try_vec::<u32>(face_count)?;

    let cluster_count =
        fast_optimize_vcache_and_cluster(&mut fused, indices, vertices.len(), cache_size, alpha, &mut face_cluster)?;

    optimize_overdraw(
        vertices,
        &fused,
        destination,
        &[],
        winding,
        &face_cluster,
        OverdrawStrategy::Auto,
        None,
    )?;

    debug!("fast optimized {} faces into {} clusters", face_count, cluster_count);

    Ok(cluster_count)
}
