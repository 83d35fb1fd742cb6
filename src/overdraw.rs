//! Overdraw measurement and cluster-order optimization.
//!
//! Overdraw between clusters is estimated by casting orthographic ray grids
//! from a set of viewpoints: along each ray, every surviving hit behind the
//! first one is overdraw that the nearer cluster inflicts on the farther one.
//! The resulting directed graph is linearized into a draw order that front
//! loads occluders.

use glam::Vec3;
use log::debug;
use rayon::prelude::*;

use crate::Winding;
use crate::error::{Error, Result};
use crate::mesh::{VertexBuffer, validate_indices};
use crate::raytrace::{RayScene, cast_viewpoint};
use crate::util::{inverse_or_zero, try_vec};
use crate::viewpoints::default_viewpoints;

/// Cluster count above which [OverdrawStrategy::Auto] switches from the
/// centroid sort to ray-cast graph ordering.
pub const RAYTRACE_CLUSTER_THRESHOLD: usize = 225;

/// Cluster ordering strategy for [optimize_overdraw].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverdrawStrategy {
    /// Picks [Raytrace](OverdrawStrategy::Raytrace) above
    /// [RAYTRACE_CLUSTER_THRESHOLD] clusters, [Fast](OverdrawStrategy::Fast)
    /// otherwise.
    Auto,
    /// Ray-cast overdraw graph plus greedy linearization.
    Raytrace,
    /// Centroid-dot-normal sort; needs no ray casting and no viewpoints.
    Fast,
}

/// Result of [measure_overdraw].
#[derive(Default, Debug, Clone, Copy)]
pub struct OverdrawStatistics {
    /// Shaded fragments per covered pixel over all viewpoints; best case 1.0.
    pub average: f32,
    /// Worst per-viewpoint shaded/covered ratio.
    pub maximum: f32,
}

struct OverdrawEdge {
    from: u32,
    to: u32,
    cost: u32,
}

/// Reorders whole clusters to draw occluders before the geometry they hide.
///
/// `indices` must already be sorted by cluster and `face_cluster` must label
/// it with contiguous ids starting at zero. In-cluster triangle order is
/// preserved. An empty `viewpoints` slice selects the built-in table of
/// [default_viewpoints].
#[allow(clippy::too_many_arguments)]
pub fn optimize_overdraw(
    vertices: &VertexBuffer,
    indices: &[u32],
    destination: &mut [u32],
    viewpoints: &[Vec3],
    winding: Winding,
    face_cluster: &[u32],
    strategy: OverdrawStrategy,
    mut face_remap: Option<&mut [u32]>,
) -> Result<()> {
    validate_indices(indices, vertices.len())?;
    vertices.validate_finite()?;

    let face_count = indices.len() / 3;

    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    if let Some(remap) = face_remap.as_deref() {
        if remap.len() != face_count {
            return Err(Error::InvalidArgument("face remap size does not match the face count"));
        }
    }

    let cluster_count = validate_face_cluster(face_cluster, face_count)?;
    let starts = cluster_starts(face_cluster, face_count);

    let order = match resolve_strategy(strategy, cluster_count) {
        OverdrawStrategy::Fast => fast_sort_order(vertices, indices, &starts)?,
        OverdrawStrategy::Raytrace => {
            let viewpoints = resolve_viewpoints(viewpoints)?;

            let counts = accumulate_overdraw(vertices, indices, face_cluster, &viewpoints, winding, cluster_count)?;
            let edges = derive_edges(&counts, cluster_count);

            debug!("overdraw graph: {} clusters, {} edges", cluster_count, edges.len());

            greedy_linearize(cluster_count, &edges)
        }
        OverdrawStrategy::Auto => unreachable!(),
    };

    // fill the output cluster by cluster in draw order
    let mut offset = 0;

    for cluster in &order {
        let cluster = *cluster as usize;

        let begin = starts[cluster] * 3;
        let end = starts[cluster + 1] * 3;

        destination[offset * 3..offset * 3 + (end - begin)].copy_from_slice(&indices[begin..end]);

        if let Some(remap) = face_remap.as_mut() {
            for (i, r) in remap[begin / 3..end / 3].iter_mut().enumerate() {
                *r = (offset + i) as u32;
            }
        }

        offset += (end - begin) / 3;
    }

    if offset != face_count {
        return Err(Error::Internal("cluster ranges do not cover the index buffer"));
    }

    Ok(())
}

/// Measures average and worst-case overdraw of `indices` across the
/// viewpoints, using the same ray caster as the optimizer.
pub fn measure_overdraw(
    vertices: &VertexBuffer,
    indices: &[u32],
    viewpoints: &[Vec3],
    winding: Winding,
) -> Result<OverdrawStatistics> {
    validate_indices(indices, vertices.len())?;
    vertices.validate_finite()?;

    let viewpoints = resolve_viewpoints(viewpoints)?;
    let scene = RayScene::build(vertices, indices)?;

    let per_viewpoint: Vec<(u64, u64)> = viewpoints
        .par_iter()
        .map(|viewpoint| {
            let mut covered = 0u64;
            let mut shaded = 0u64;

            cast_viewpoint(&scene, *viewpoint, winding, |hits| {
                if !hits.is_empty() {
                    covered += 1;
                    shaded += hits.len() as u64;
                }
            });

            (covered, shaded)
        })
        .collect();

    let mut total_covered = 0u64;
    let mut total_shaded = 0u64;
    let mut maximum = 0.0f32;

    for (covered, shaded) in per_viewpoint {
        total_covered += covered;
        total_shaded += shaded;

        if covered > 0 {
            maximum = maximum.max(shaded as f32 / covered as f32);
        }
    }

    let average = if total_covered > 0 {
        total_shaded as f32 / total_covered as f32
    } else {
        0.0
    };

    Ok(OverdrawStatistics { average, maximum })
}

fn resolve_strategy(strategy: OverdrawStrategy, cluster_count: usize) -> OverdrawStrategy {
    match strategy {
        OverdrawStrategy::Auto => {
            if cluster_count > RAYTRACE_CLUSTER_THRESHOLD {
                OverdrawStrategy::Raytrace
            } else {
                OverdrawStrategy::Fast
            }
        }
        other => other,
    }
}

fn resolve_viewpoints(viewpoints: &[Vec3]) -> Result<Vec<Vec3>> {
    let source = if viewpoints.is_empty() {
        default_viewpoints()
    } else {
        viewpoints
    };

    source
        .iter()
        .map(|v| {
            if !v.is_finite() {
                return Err(Error::InvalidArgument("non-finite viewpoint"));
            }

            let unit = v.normalize_or_zero();

            if unit == Vec3::ZERO {
                return Err(Error::InvalidArgument("zero-length viewpoint"));
            }

            Ok(unit)
        })
        .collect()
}

/// `face_cluster` must be non-decreasing, start at zero and skip no id.
/// Returns the cluster count.
fn validate_face_cluster(face_cluster: &[u32], face_count: usize) -> Result<usize> {
    if face_cluster.len() != face_count {
        return Err(Error::InvalidArgument("face cluster size does not match the face count"));
    }

    if face_cluster[0] != 0 {
        return Err(Error::InvalidArgument("face clusters must start at zero"));
    }

    for w in face_cluster.windows(2) {
        if w[1] < w[0] || w[1] - w[0] > 1 {
            return Err(Error::InvalidArgument("face clusters are not contiguous"));
        }
    }

    Ok(face_cluster[face_count - 1] as usize + 1)
}

fn cluster_starts(face_cluster: &[u32], face_count: usize) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut previous = None;

    for (f, c) in face_cluster.iter().enumerate() {
        if previous != Some(*c) {
            starts.push(f);
            previous = Some(*c);
        }
    }

    starts.push(face_count);
    starts
}

/// Accumulates the cluster-against-cluster overdraw matrix across all
/// viewpoints. Viewpoints are independent, so they are cast in parallel into
/// private matrices; integer summation makes the reduction order-insensitive
/// and the total bitwise-equal to a sequential pass.
fn accumulate_overdraw(
    vertices: &VertexBuffer,
    indices: &[u32],
    face_cluster: &[u32],
    viewpoints: &[Vec3],
    winding: Winding,
    cluster_count: usize,
) -> Result<Vec<u32>> {
    let scene = RayScene::build(vertices, indices)?;

    let mut counts = try_vec::<u32>(cluster_count * cluster_count)?;

    let partial = viewpoints
        .par_iter()
        .map(|viewpoint| {
            let mut local = vec![0u32; cluster_count * cluster_count];

            cast_viewpoint(&scene, *viewpoint, winding, |hits| {
                // every consecutive pair is one unit of overdraw that the
                // nearer cluster inflicts on the farther one
                for pair in hits.windows(2) {
                    let near = face_cluster[pair[0].face as usize] as usize;
                    let far = face_cluster[pair[1].face as usize] as usize;

                    local[near * cluster_count + far] += 1;
                }
            });

            local
        })
        .reduce(
            || vec![0u32; cluster_count * cluster_count],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );

    for (t, p) in counts.iter_mut().zip(partial) {
        *t += p;
    }

    Ok(counts)
}

/// At most one directed edge per unordered cluster pair, pointing from the
/// dominant occluder; self-loops never arise.
fn derive_edges(counts: &[u32], cluster_count: usize) -> Vec<OverdrawEdge> {
    let mut edges = Vec::new();

    for i in 0..cluster_count {
        for j in i + 1..cluster_count {
            let ij = counts[i * cluster_count + j];
            let ji = counts[j * cluster_count + i];

            if ij > ji {
                edges.push(OverdrawEdge {
                    from: i as u32,
                    to: j as u32,
                    cost: ij - ji,
                });
            } else if ji > ij {
                edges.push(OverdrawEdge {
                    from: j as u32,
                    to: i as u32,
                    cost: ji - ij,
                });
            }
        }
    }

    edges
}

/// Greedy minimum-feedback-arc approximation: repeatedly emits the remaining
/// cluster with the largest outgoing-minus-incoming cost, lower id on ties,
/// so that edges point forwards in the draw order wherever possible.
fn greedy_linearize(cluster_count: usize, edges: &[OverdrawEdge]) -> Vec<u32> {
    let mut out_cost = vec![0i64; cluster_count];
    let mut in_cost = vec![0i64; cluster_count];
    let mut outgoing: Vec<Vec<(u32, u32)>> = vec![Vec::new(); cluster_count];
    let mut incoming: Vec<Vec<(u32, u32)>> = vec![Vec::new(); cluster_count];

    for edge in edges {
        out_cost[edge.from as usize] += edge.cost as i64;
        in_cost[edge.to as usize] += edge.cost as i64;
        outgoing[edge.from as usize].push((edge.to, edge.cost));
        incoming[edge.to as usize].push((edge.from, edge.cost));
    }

    let mut remaining = vec![true; cluster_count];
    let mut order = Vec::with_capacity(cluster_count);

    for _ in 0..cluster_count {
        let mut best = usize::MAX;
        let mut best_gain = i64::MIN;

        for c in 0..cluster_count {
            if remaining[c] {
                let gain = out_cost[c] - in_cost[c];

                if gain > best_gain {
                    best = c;
                    best_gain = gain;
                }
            }
        }

        remaining[best] = false;
        order.push(best as u32);

        // the emitted cluster no longer participates in anyone's balance
        for (to, cost) in &outgoing[best] {
            if remaining[*to as usize] {
                in_cost[*to as usize] -= *cost as i64;
            }
        }

        for (from, cost) in &incoming[best] {
            if remaining[*from as usize] {
                out_cost[*from as usize] -= *cost as i64;
            }
        }
    }

    order
}

/// Viewpoint-free ordering: clusters are sorted by the projection of their
/// centroid offset onto their average normal, so outward-facing shells draw
/// before the geometry behind them.
fn fast_sort_order(vertices: &VertexBuffer, indices: &[u32], starts: &[usize]) -> Result<Vec<u32>> {
    let cluster_count = starts.len() - 1;

    let mut mesh_centroid = Vec3::ZERO;

    for index in indices {
        mesh_centroid += vertices.position(*index as usize);
    }

    mesh_centroid /= indices.len() as f32;

    let mut sort_data = try_vec::<f32>(cluster_count)?;

    for cluster in 0..cluster_count {
        let range = starts[cluster] * 3..starts[cluster + 1] * 3;

        let mut cluster_area = 0.0;
        let mut cluster_centroid = Vec3::ZERO;
        let mut cluster_normal = Vec3::ZERO;

        for abc in indices[range].chunks_exact(3) {
            let p0 = vertices.position(abc[0] as usize);
            let p1 = vertices.position(abc[1] as usize);
            let p2 = vertices.position(abc[2] as usize);

            let normal = (p1 - p0).cross(p2 - p0);
            let area = normal.length();

            cluster_centroid += (p0 + p1 + p2) * (area / 3.0);
            cluster_normal += normal;
            cluster_area += area;
        }

        cluster_centroid *= inverse_or_zero(cluster_area);
        cluster_normal *= inverse_or_zero(cluster_normal.length());

        sort_data[cluster] = (cluster_centroid - mesh_centroid).dot(cluster_normal);
    }

    Ok(sort_order_by_data(&sort_data))
}

/// Counting sort on an 11-bit quantization of the sort keys; high dot
/// products come first, equal keys keep ascending cluster order.
fn sort_order_by_data(sort_data: &[f32]) -> Vec<u32> {
    const SORT_BITS: i32 = 11;

    let mut sort_data_max = 0.001f32;

    for data in sort_data {
        sort_data_max = sort_data_max.max(data.abs());
    }

    let mut sort_keys = vec![0u16; sort_data.len()];

    for (data, key) in sort_data.iter().zip(sort_keys.iter_mut()) {
        // mirrored mapping: the largest dot product lands on key zero
        let sort_key = 0.5 - 0.5 * (data / sort_data_max);

        *key = (quantize_unorm(sort_key, SORT_BITS) & ((1 << SORT_BITS) - 1)) as u16;
    }

    // bucket the keys, then turn the counts into running offsets
    let mut histogram = [0u32; 1 << SORT_BITS];

    for key in sort_keys.iter() {
        histogram[*key as usize] += 1;
    }

    let mut histogram_sum = 0;

    for count in histogram.iter_mut() {
        let current = *count;
        *count = histogram_sum;
        histogram_sum += current;
    }

    debug_assert_eq!(histogram_sum as usize, sort_keys.len());

    let mut sort_order = vec![0u32; sort_data.len()];

    for (i, key) in sort_keys.iter().enumerate() {
        let offset = &mut histogram[*key as usize];
        sort_order[*offset as usize] = i as u32;
        *offset += 1;
    }

    sort_order
}

fn quantize_unorm(v: f32, n: i32) -> i32 {
    let scale = ((1 << n) - 1) as f32;
    let v = v.clamp(0.0, 1.0);

    (v * scale + 0.5) as i32
}

#[cfg(test)]
mod test {
    use super::*;

    // two single-triangle clusters stacked along z, both facing +z
    fn stacked() -> (Vec<[f32; 3]>, Vec<u32>, Vec<u32>) {
        let positions = vec![
            // far triangle (hit second from +z)
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [0.0, 1.0, 0.0],
            // near triangle
            [-1.0, -1.0, 0.5],
            [1.0, -1.0, 0.5],
            [0.0, 1.0, 0.5],
        ];
        let indices = vec![0, 1, 2, 3, 4, 5];
        let face_cluster = vec![0, 1];

        (positions, indices, face_cluster)
    }

    #[test]
    fn test_graph_points_from_occluder() {
        let (positions, indices, face_cluster) = stacked();
        let vertices = VertexBuffer::from_positions(&positions);

        let viewpoints = [Vec3::Z];
        let counts = accumulate_overdraw(&vertices, &indices, &face_cluster, &viewpoints, Winding::CounterClockwise, 2)
            .unwrap();

        // the near cluster (1) occludes the far cluster (0), never vice versa
        assert!(counts[2] > 0);
        assert_eq!(counts[1], 0);

        let edges = derive_edges(&counts, 2);
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].from, edges[0].to), (1, 0));
    }

    #[test]
    fn test_optimize_emits_occluder_first() {
        let (positions, indices, face_cluster) = stacked();
        let vertices = VertexBuffer::from_positions(&positions);

        let mut destination = vec![0; indices.len()];
        let mut face_remap = vec![0; 2];

        optimize_overdraw(
            &vertices,
            &indices,
            &mut destination,
            &[Vec3::Z],
            Winding::CounterClockwise,
            &face_cluster,
            OverdrawStrategy::Raytrace,
            Some(&mut face_remap),
        )
        .unwrap();

        // the near (front) cluster is drawn first
        assert_eq!(destination, [3, 4, 5, 0, 1, 2]);
        assert_eq!(face_remap, [1, 0]);
    }

    #[test]
    fn test_culled_backfaces_make_no_edges() {
        // two triangles facing away from each other never overdraw
        let positions = [
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [0.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, -1.0, 1.0],
        ];
        let indices = [0, 1, 2, 3, 4, 5];
        let face_cluster = [0, 1];
        let vertices = VertexBuffer::from_positions(&positions);

        let counts =
            accumulate_overdraw(&vertices, &indices, &face_cluster, &[Vec3::Z], Winding::CounterClockwise, 2).unwrap();

        assert!(derive_edges(&counts, 2).is_empty());
    }

    #[test]
    fn test_greedy_linearize_tie_breaks() {
        // no edges: pure id order
        assert_eq!(greedy_linearize(3, &[]), vec![0, 1, 2]);

        // a chain 2 -> 1 -> 0 reverses the id order
        let edges = vec![
            OverdrawEdge { from: 2, to: 1, cost: 5 },
            OverdrawEdge { from: 1, to: 0, cost: 5 },
        ];
        assert_eq!(greedy_linearize(3, &edges), vec![2, 1, 0]);
    }

    #[test]
    fn test_measure_overdraw_stacked() {
        let (positions, indices, _) = stacked();
        let vertices = VertexBuffer::from_positions(&positions);

        let stats = measure_overdraw(&vertices, &indices, &[Vec3::Z], Winding::CounterClockwise).unwrap();

        // every covered pixel of the overlap is shaded twice
        assert!(stats.average > 1.0);
        assert!(stats.maximum >= stats.average);

        // from behind, everything is culled
        let back = measure_overdraw(&vertices, &indices, &[Vec3::NEG_Z], Winding::CounterClockwise).unwrap();
        assert_eq!(back.average, 0.0);
    }

    #[test]
    fn test_fast_strategy_orders_outward_shell_first() {
        let (positions, indices, face_cluster) = stacked();
        let vertices = VertexBuffer::from_positions(&positions);

        let mut destination = vec![0; indices.len()];

        optimize_overdraw(
            &vertices,
            &indices,
            &mut destination,
            &[],
            Winding::CounterClockwise,
            &face_cluster,
            OverdrawStrategy::Fast,
            None,
        )
        .unwrap();

        // both clusters face +z; the near one projects farther along the
        // shared normal and is drawn first
        assert_eq!(destination, [3, 4, 5, 0, 1, 2]);
    }

    #[test]
    fn test_rejects_gapped_clusters() {
        let (positions, indices, _) = stacked();
        let vertices = VertexBuffer::from_positions(&positions);
        let mut destination = vec![0; indices.len()];

        let result = optimize_overdraw(
            &vertices,
            &indices,
            &mut destination,
            &[],
            Winding::CounterClockwise,
            &[0, 2],
            OverdrawStrategy::Fast,
            None,
        );

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
