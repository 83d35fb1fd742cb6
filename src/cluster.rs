//! Contiguous clustering of cache-optimized triangle lists.
//!
//! A cluster is a run of consecutive triangles that is roughly convex (face
//! normals within a shared cone) and cheap to draw on its own (its miss ratio
//! stays within a budget of the whole-mesh baseline, since cluster reordering
//! later restarts the cache at every boundary). Clustering never changes the
//! triangle order, only labels it.

use glam::Vec3;
use log::debug;

use crate::error::{Error, Result};
use crate::mesh::{VertexBuffer, face_normals, validate_indices};
use crate::util::try_vec;
use crate::vcache::{FifoCache, TipsyTuning, VcacheStrategy, acmr, dispatch_optimize};

/// Default clustering cone threshold.
pub const DEFAULT_ALPHA: f32 = 0.75;

/// Clustering constants, exposed for re-tuning.
#[derive(Clone, Copy, Debug)]
pub struct ClusterTuning {
    /// Tolerated miss-ratio degradation over the whole-mesh baseline
    /// (0.5 = a cluster may cost up to 50% more misses per face).
    pub lambda: f32,
    /// Cache size used to simulate per-cluster miss ratios.
    pub cache_size: u32,
}

impl Default for ClusterTuning {
    fn default() -> Self {
        Self {
            lambda: 0.5,
            cache_size: 16,
        }
    }
}

/// Partitions `indices` into contiguous view-coherent clusters.
///
/// `indices` should be the result of [optimize_vcache](crate::vcache::optimize_vcache);
/// the triangle order is preserved (`destination` receives a copy), only
/// `face_cluster` carries new information. `target_cluster_count` is a hint:
/// the sweep result is merged or split towards it where possible.
///
/// Returns the cluster count.
pub fn cluster_mesh(
    vertices: &VertexBuffer,
    indices: &[u32],
    destination: &mut [u32],
    face_cluster: &mut [u32],
    face_remap: Option<&mut [u32]>,
    target_cluster_count: Option<usize>,
    alpha: f32,
) -> Result<usize> {
    cluster_mesh_tuned(
        vertices,
        indices,
        destination,
        face_cluster,
        face_remap,
        target_cluster_count,
        alpha,
        &ClusterTuning::default(),
    )
}

/// [cluster_mesh] with explicit clustering constants.
#[allow(clippy::too_many_arguments)]
pub fn cluster_mesh_tuned(
    vertices: &VertexBuffer,
    indices: &[u32],
    destination: &mut [u32],
    face_cluster: &mut [u32],
    face_remap: Option<&mut [u32]>,
    target_cluster_count: Option<usize>,
    alpha: f32,
    tuning: &ClusterTuning,
) -> Result<usize> {
    validate_indices(indices, vertices.len())?;
    vertices.validate_finite()?;
    validate_alpha(alpha)?;

    let face_count = indices.len() / 3;

    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    if face_cluster.len() != face_count {
        return Err(Error::InvalidArgument("face cluster size does not match the face count"));
    }

    if let Some(remap) = face_remap.as_deref() {
        if remap.len() != face_count {
            return Err(Error::InvalidArgument("face remap size does not match the face count"));
        }
    }

    if target_cluster_count == Some(0) {
        return Err(Error::InvalidArgument("target cluster count must be positive"));
    }

    let normals = face_normals(vertices, indices)?;

    let baseline = acmr(indices, vertices.len(), tuning.cache_size)?;
    let threshold = (1.0 + tuning.lambda) * baseline;

    let mut starts = sweep_boundaries(
        indices,
        vertices.len(),
        tuning.cache_size,
        threshold,
        Some((&normals, alpha)),
        false,
    )?;

    if let Some(target) = target_cluster_count {
        adjust_to_target(&mut starts, &normals, face_count, target);
    }

    destination.copy_from_slice(indices);
    fill_face_cluster(face_cluster, &starts, face_count);

    if let Some(remap) = face_remap {
        for (f, r) in remap.iter_mut().enumerate() {
            *r = f as u32;
        }
    }

    debug!("clustered {} faces into {} clusters", face_count, starts.len());

    Ok(starts.len())
}

/// Runs the vertex cache optimizer separately on every cluster range,
/// leaving the cluster structure untouched.
pub fn vcache_clusters(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    face_cluster: &[u32],
    strategy: VcacheStrategy,
    mut face_remap: Option<&mut [u32]>,
) -> Result<()> {
    validate_indices(indices, vertex_count)?;

    if cache_size == 0 {
        return Err(Error::InvalidArgument("cache size must be positive"));
    }

    let face_count = indices.len() / 3;

    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    if face_cluster.len() != face_count {
        return Err(Error::InvalidArgument("face cluster size does not match the face count"));
    }

    if face_cluster.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::InvalidArgument("face clusters are not contiguous"));
    }

    if let Some(remap) = face_remap.as_deref() {
        if remap.len() != face_count {
            return Err(Error::InvalidArgument("face remap size does not match the face count"));
        }
    }

    let tuning = TipsyTuning::default();

    let mut start = 0;

    while start < face_count {
        let cluster = face_cluster[start];
        let mut end = start + 1;

        while end < face_count && face_cluster[end] == cluster {
            end += 1;
        }

        dispatch_optimize(
            &mut destination[start * 3..end * 3],
            &indices[start * 3..end * 3],
            vertex_count,
            cache_size,
            strategy,
            face_remap.as_mut().map(|r| &mut r[start..end]),
            &tuning,
        )?;

        // the per-range remap is range-relative on both sides
        if let Some(remap) = face_remap.as_mut() {
            for r in &mut remap[start..end] {
                *r += start as u32;
            }
        }

        start = end;
    }

    Ok(())
}

/// Fused fast path: a Tipsy pass whose output is labeled with cluster
/// boundaries wherever admission fails.
///
/// No geometry is consulted; a boundary starts at every triangle that misses
/// the cache entirely (a fresh patch) and wherever the running miss ratio of
/// the current cluster would climb back over its budget. `alpha` tightens the
/// budget, so higher values produce more clusters.
///
/// Returns the cluster count.
pub fn fast_optimize_vcache_and_cluster(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    alpha: f32,
    face_cluster: &mut [u32],
) -> Result<usize> {
    validate_indices(indices, vertex_count)?;
    validate_alpha(alpha)?;

    if cache_size == 0 {
        return Err(Error::InvalidArgument("cache size must be positive"));
    }

    let face_count = indices.len() / 3;

    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    if face_cluster.len() != face_count {
        return Err(Error::InvalidArgument("face cluster size does not match the face count"));
    }

    // stage the ordering so a failing sweep leaves the caller's buffers alone
    let mut ordered = try_vec::<u32>(indices.len())?;

    dispatch_optimize(
        &mut ordered,
        indices,
        vertex_count,
        cache_size,
        VcacheStrategy::Tipsy,
        None,
        &TipsyTuning::default(),
    )?;

    let tuning = ClusterTuning::default();

    let baseline = acmr(&ordered, vertex_count, tuning.cache_size)?;
    let threshold = (2.0 - alpha) * baseline;

    let starts = sweep_boundaries(&ordered, vertex_count, tuning.cache_size, threshold, None, true)?;

    destination.copy_from_slice(&ordered);
    fill_face_cluster(face_cluster, &starts, face_count);

    debug!("fast pass ordered {} faces into {} clusters", face_count, starts.len());

    Ok(starts.len())
}

fn validate_alpha(alpha: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::InvalidArgument("alpha outside [0, 1]"));
    }

    Ok(())
}

/// Boundary sweep shared by the quality and fast paths; `cone` carries face
/// normals and the cone threshold when geometry is available, `hard_breaks`
/// additionally starts a cluster at every full-miss triangle (the geometry-free
/// patch heuristic of the fast path).
fn sweep_boundaries(
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    threshold: f32,
    cone: Option<(&[Vec3], f32)>,
    hard_breaks: bool,
) -> Result<Vec<u32>> {
    let mut starts = vec![0u32];

    let mut cache = FifoCache::new(vertex_count, cache_size)?;
    let mut normal_sum = Vec3::ZERO;
    let mut misses = 0u32;
    let mut faces = 0u32;

    for (f, abc) in indices.chunks_exact(3).enumerate() {
        let abc = [abc[0], abc[1], abc[2]];

        if faces > 0 {
            let m = cache.triangle_misses(abc);
            let old_ratio = misses as f32 / faces as f32;
            let new_ratio = (misses + m) as f32 / (faces + 1) as f32;

            // a boundary starts only when this face would push a settled
            // cluster back over the miss budget; the cold start of a fresh
            // cluster sits over it by construction and must not split
            let acmr_break = old_ratio <= threshold && new_ratio > threshold;

            // a triangle missing the cache entirely starts a fresh patch
            let hard_break = hard_breaks && m == 3;

            let cone_break = match cone {
                Some((normals, alpha)) => {
                    let cluster_normal = normal_sum.normalize_or_zero();

                    // degenerate faces carry no orientation evidence and
                    // never open a boundary on their own
                    normals[f] != Vec3::ZERO
                        && cluster_normal != Vec3::ZERO
                        && normals[f].dot(cluster_normal) < alpha
                }
                None => false,
            };

            if hard_break || acmr_break || cone_break {
                starts.push(f as u32);
                cache.reset();
                normal_sum = Vec3::ZERO;
                misses = 0;
                faces = 0;
            }
        }

        misses += cache.update(abc);
        faces += 1;

        if let Some((normals, _)) = cone {
            normal_sum += normals[f];
        }
    }

    Ok(starts)
}

fn fill_face_cluster(face_cluster: &mut [u32], starts: &[u32], face_count: usize) {
    for (c, start) in starts.iter().enumerate() {
        let end = starts.get(c + 1).map(|s| *s as usize).unwrap_or(face_count);

        for f in *start as usize..end {
            face_cluster[f] = c as u32;
        }
    }
}

/// Merges or splits sweep clusters towards the caller's hint.
fn adjust_to_target(starts: &mut Vec<u32>, normals: &[Vec3], face_count: usize, target: usize) {
    // merge the most normal-coherent adjacent pair while over the target
    if starts.len() > target {
        let mut sums = cluster_normal_sums(starts, normals, face_count);

        while starts.len() > target {
            let mut best = 0;
            let mut best_dot = f32::MIN;

            for c in 0..starts.len() - 1 {
                let dot = sums[c].normalize_or_zero().dot(sums[c + 1].normalize_or_zero());

                if dot > best_dot {
                    best = c;
                    best_dot = dot;
                }
            }

            let merged = sums.remove(best + 1);
            sums[best] += merged;
            starts.remove(best + 1);
        }
    }

    // split the largest cluster at its midpoint while under the target
    while starts.len() < target.min(face_count) {
        let mut largest = 0;
        let mut largest_size = 0;

        for c in 0..starts.len() {
            let end = starts.get(c + 1).map(|s| *s as usize).unwrap_or(face_count);
            let size = end - starts[c] as usize;

            if size > largest_size {
                largest = c;
                largest_size = size;
            }
        }

        if largest_size < 2 {
            break;
        }

        starts.insert(largest + 1, starts[largest] + (largest_size / 2) as u32);
    }
}

fn cluster_normal_sums(starts: &[u32], normals: &[Vec3], face_count: usize) -> Vec<Vec3> {
    starts
        .iter()
        .enumerate()
        .map(|(c, start)| {
            let end = starts.get(c + 1).map(|s| *s as usize).unwrap_or(face_count);

            normals[*start as usize..end].iter().sum()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    // 3x3 quad grid in the xy plane, 16 vertices, 18 coplanar triangles
    fn grid() -> (Vec<[f32; 3]>, Vec<u32>) {
        let mut positions = Vec::new();
        for y in 0..4 {
            for x in 0..4 {
                positions.push([x as f32, y as f32, 0.0]);
            }
        }

        let mut indices = Vec::new();
        for y in 0..3u32 {
            for x in 0..3u32 {
                let v = y * 4 + x;
                indices.extend_from_slice(&[v, v + 1, v + 4, v + 4, v + 1, v + 5]);
            }
        }

        (positions, indices)
    }

    #[test]
    fn test_coplanar_grid_is_one_cluster() {
        let (positions, indices) = grid();
        let vertices = VertexBuffer::from_positions(&positions);

        let mut destination = vec![0; indices.len()];
        let mut face_cluster = vec![u32::MAX; indices.len() / 3];

        let count = cluster_mesh(
            &vertices,
            &indices,
            &mut destination,
            &mut face_cluster,
            None,
            None,
            DEFAULT_ALPHA,
        )
        .unwrap();

        assert_eq!(count, 1);
        assert!(face_cluster.iter().all(|c| *c == 0));
        assert_eq!(destination, indices);
    }

    #[test]
    fn test_disjoint_normals_split() {
        // two disjoint triangles with opposite normals
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 0.0, 1.0],
        ];
        let indices = [0, 1, 2, 3, 4, 5];
        let vertices = VertexBuffer::from_positions(&positions);

        let mut destination = vec![0; indices.len()];
        let mut face_cluster = vec![0; 2];

        let count = cluster_mesh(
            &vertices,
            &indices,
            &mut destination,
            &mut face_cluster,
            None,
            None,
            DEFAULT_ALPHA,
        )
        .unwrap();

        assert_eq!(count, 2);
        assert_eq!(face_cluster, [0, 1]);
    }

    #[test]
    fn test_cluster_contiguity() {
        let (positions, indices) = grid();
        let vertices = VertexBuffer::from_positions(&positions);

        let mut destination = vec![0; indices.len()];
        let mut face_cluster = vec![0; indices.len() / 3];

        let count = cluster_mesh(
            &vertices,
            &indices,
            &mut destination,
            &mut face_cluster,
            None,
            Some(4),
            DEFAULT_ALPHA,
        )
        .unwrap();

        assert_eq!(count, 4);
        assert!(face_cluster.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*face_cluster.last().unwrap(), 3);
    }

    #[test]
    fn test_target_merge() {
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 0.0, 1.0],
        ];
        let indices = [0, 1, 2, 3, 4, 5];
        let vertices = VertexBuffer::from_positions(&positions);

        let mut destination = vec![0; indices.len()];
        let mut face_cluster = vec![0; 2];

        let count = cluster_mesh(
            &vertices,
            &indices,
            &mut destination,
            &mut face_cluster,
            None,
            Some(1),
            DEFAULT_ALPHA,
        )
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(face_cluster, [0, 0]);
    }

    #[test]
    fn test_fast_fused_pass() {
        let (_, indices) = grid();

        let mut destination = vec![0; indices.len()];
        let mut face_cluster = vec![0; indices.len() / 3];

        let count = fast_optimize_vcache_and_cluster(
            &mut destination,
            &indices,
            16,
            16,
            DEFAULT_ALPHA,
            &mut face_cluster,
        )
        .unwrap();

        // a coplanar grid that fits the cache stays a single cluster
        assert_eq!(count, 1);

        let acmr = crate::vcache::measure_cache_efficiency(&destination, 16).unwrap();
        assert!(acmr <= 1.0, "grid acmr {acmr}");
    }

    #[test]
    fn test_fast_fused_pass_splits_disjoint_patches() {
        // two triangle fans with no shared vertices
        let indices = [0, 1, 2, 0, 2, 3, 10, 11, 12, 10, 12, 13];

        let mut destination = vec![0; indices.len()];
        let mut face_cluster = vec![0; 4];

        let count =
            fast_optimize_vcache_and_cluster(&mut destination, &indices, 14, 12, DEFAULT_ALPHA, &mut face_cluster)
                .unwrap();

        assert_eq!(count, 2);
    }

    #[test]
    fn test_vcache_clusters_preserves_ranges() {
        let (_, indices) = grid();
        let face_count = indices.len() / 3;

        // two fixed halves
        let mut face_cluster = vec![0u32; face_count];
        for c in face_cluster.iter_mut().skip(face_count / 2) {
            *c = 1;
        }

        let mut destination = vec![0; indices.len()];
        let mut remap = vec![0; face_count];

        vcache_clusters(
            &mut destination,
            &indices,
            16,
            12,
            &face_cluster,
            VcacheStrategy::Tipsy,
            Some(&mut remap),
        )
        .unwrap();

        // each half contains exactly the triangles it started with
        let half = face_count / 2 * 3;
        let set = |slice: &[u32]| {
            let mut triangles: Vec<[u32; 3]> = slice
                .chunks_exact(3)
                .map(|abc| {
                    let mut t = [abc[0], abc[1], abc[2]];
                    t.sort_unstable();
                    t
                })
                .collect();
            triangles.sort_unstable();
            triangles
        };

        assert_eq!(set(&destination[..half]), set(&indices[..half]));
        assert_eq!(set(&destination[half..]), set(&indices[half..]));

        // faces stay inside their cluster under the remap
        for (old, new) in remap.iter().enumerate() {
            assert_eq!(face_cluster[old], face_cluster[*new as usize]);
        }
    }
}
