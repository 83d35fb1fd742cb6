//! Vertex cache simulation and triangle-order optimization.

use crate::INVALID_INDEX;
use crate::error::{Error, Result};
use crate::mesh::validate_indices;
use crate::topology::{EdgeAdjacency, VertexTriangles};
use crate::util::try_vec;

use std::collections::VecDeque;

/// Triangle-ordering strategy for [optimize_vcache].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VcacheStrategy {
    /// Picks [LinearStrips](VcacheStrategy::LinearStrips) for caches of six
    /// entries or fewer, [Tipsy](VcacheStrategy::Tipsy) otherwise.
    Auto,
    /// Greedy walk over edge-adjacent triangles; best for tiny caches.
    LinearStrips,
    /// Exact-FIFO greedy picking the fewest immediate misses; reference
    /// strategy, slower and usually inferior to Tipsy.
    Fifo,
    /// Cache-position and valence scoring in amortized linear time.
    Tipsy,
}

/// Scoring constants of the [Tipsy](VcacheStrategy::Tipsy) strategy.
///
/// The defaults are the folklore-tuned values; they are exposed so callers
/// can re-tune without an API change.
#[derive(Clone, Copy, Debug)]
pub struct TipsyTuning {
    /// Position score of the three most recently used cache slots.
    pub cache_peak: f32,
    /// Exponent of the position falloff across the remaining slots.
    pub position_power: f32,
    /// Weight of the remaining-triangle valence term.
    pub valence_scale: f32,
    /// Exponent of the valence term.
    pub valence_power: f32,
}

impl Default for TipsyTuning {
    fn default() -> Self {
        Self {
            cache_peak: 0.75,
            position_power: 1.5,
            valence_scale: 2.0,
            valence_power: -0.5,
        }
    }
}

/// Strict-FIFO post-transform cache in the timestamp formulation: a vertex is
/// cached iff fewer than `cache_size` distinct misses happened since its own
/// last miss. Hits do not refresh a vertex's position.
pub(crate) struct FifoCache {
    cache_size: u32,
    timestamps: Vec<u32>,
    timestamp: u32,
}

impl FifoCache {
    pub(crate) fn new(vertex_count: usize, cache_size: u32) -> Result<Self> {
        Ok(Self {
            cache_size,
            timestamps: try_vec(vertex_count)?,
            timestamp: cache_size + 1,
        })
    }

    #[inline]
    fn is_miss(&self, vertex: u32, timestamp: u32) -> bool {
        timestamp - self.timestamps[vertex as usize] > self.cache_size
    }

    /// Misses the triangle `abc` would incur, without committing it.
    pub(crate) fn triangle_misses(&self, abc: [u32; 3]) -> u32 {
        let mut timestamp = self.timestamp;
        let mut local = [0u32; 3];
        let mut misses = 0;

        for i in 0..3 {
            let mut miss = self.is_miss(abc[i], timestamp);

            // a duplicate vertex was inserted by an earlier slot of this triangle
            for j in 0..i {
                if abc[j] == abc[i] && local[j] != 0 && timestamp - local[j] <= self.cache_size {
                    miss = false;
                }
            }

            if miss {
                local[i] = timestamp;
                timestamp += 1;
                misses += 1;
            }
        }

        misses
    }

    /// Feeds the triangle `abc` through the cache, returning its misses.
    pub(crate) fn update(&mut self, abc: [u32; 3]) -> u32 {
        let mut misses = 0;

        for v in abc {
            if self.is_miss(v, self.timestamp) {
                self.timestamps[v as usize] = self.timestamp;
                self.timestamp += 1;
                misses += 1;
            }
        }

        misses
    }

    /// Empties the cache without touching per-vertex state.
    pub(crate) fn reset(&mut self) {
        self.timestamp += self.cache_size + 1;
    }
}

pub(crate) fn acmr(indices: &[u32], vertex_count: usize, cache_size: u32) -> Result<f32> {
    let mut cache = FifoCache::new(vertex_count, cache_size)?;
    let mut misses = 0;

    for abc in indices.chunks_exact(3) {
        misses += cache.update([abc[0], abc[1], abc[2]]);
    }

    Ok(misses as f32 / (indices.len() / 3) as f32)
}

/// Returns the average cache miss ratio of `indices` under a strict FIFO
/// cache of `cache_size` entries.
///
/// 0.5 is the theoretical best case, 3.0 a fully cold pass. The simulation
/// is deterministic.
pub fn measure_cache_efficiency(indices: &[u32], cache_size: u32) -> Result<f32> {
    if cache_size == 0 {
        return Err(Error::InvalidArgument("cache size must be positive"));
    }

    if indices.is_empty() {
        return Err(Error::InvalidArgument("empty index buffer"));
    }

    if indices.len() % 3 != 0 {
        return Err(Error::InvalidArgument("index count not a multiple of three"));
    }

    let vertex_count = indices.iter().max().copied().unwrap_or(0) as usize + 1;

    acmr(indices, vertex_count, cache_size)
}

/// Reorders triangles to reduce simulated vertex cache misses.
///
/// `destination` receives the same triangles (as unordered triples) in a new
/// order and must hold `indices.len()` elements. When `face_remap` is
/// supplied it receives `face_remap[old_face] = new_face`.
pub fn optimize_vcache(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    strategy: VcacheStrategy,
    face_remap: Option<&mut [u32]>,
) -> Result<()> {
    optimize_vcache_tuned(
        destination,
        indices,
        vertex_count,
        cache_size,
        strategy,
        face_remap,
        &TipsyTuning::default(),
    )
}

/// [optimize_vcache] with explicit Tipsy scoring constants.
pub fn optimize_vcache_tuned(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    strategy: VcacheStrategy,
    face_remap: Option<&mut [u32]>,
    tuning: &TipsyTuning,
) -> Result<()> {
    validate_indices(indices, vertex_count)?;

    if cache_size == 0 {
        return Err(Error::InvalidArgument("cache size must be positive"));
    }

    if destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    if let Some(remap) = face_remap.as_deref() {
        if remap.len() != indices.len() / 3 {
            return Err(Error::InvalidArgument("face remap size does not match the face count"));
        }
    }

    dispatch_optimize(destination, indices, vertex_count, cache_size, strategy, face_remap, tuning)
}

/// Strategy dispatch without argument validation, for callers that already
/// validated a larger buffer and optimize a sub-range of it.
pub(crate) fn dispatch_optimize(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    strategy: VcacheStrategy,
    face_remap: Option<&mut [u32]>,
    tuning: &TipsyTuning,
) -> Result<()> {
    match resolve_strategy(strategy, cache_size) {
        VcacheStrategy::LinearStrips => optimize_linear_strips(destination, indices, face_remap),
        VcacheStrategy::Fifo => optimize_fifo_greedy(destination, indices, vertex_count, cache_size, face_remap),
        VcacheStrategy::Tipsy => optimize_tipsy(destination, indices, vertex_count, cache_size, face_remap, tuning),
        VcacheStrategy::Auto => unreachable!(),
    }
}

fn resolve_strategy(strategy: VcacheStrategy, cache_size: u32) -> VcacheStrategy {
    match strategy {
        VcacheStrategy::Auto => {
            if cache_size <= 6 {
                VcacheStrategy::LinearStrips
            } else {
                VcacheStrategy::Tipsy
            }
        }
        other => other,
    }
}

fn vertex_score(tuning: &TipsyTuning, cache_position: i32, cache_size: usize, live_triangles: u32) -> f32 {
    // a vertex with no remaining triangles contributes to no candidate
    if live_triangles == 0 {
        return 0.0;
    }

    let position = if cache_position < 0 {
        0.0
    } else if cache_position < 3 {
        tuning.cache_peak
    } else {
        let scale = 1.0 / (cache_size as f32 - 3.0);
        let base = 1.0 - (cache_position as f32 - 3.0) * scale;

        base.max(0.0).powf(tuning.position_power)
    };

    position + tuning.valence_scale * (live_triangles as f32).powf(tuning.valence_power)
}

/// Moves the emitted corners to the front of the model cache, keeping the
/// relative order of every other entry. A repeated corner of a degenerate
/// face enters once.
fn promote_corners(model_cache: &mut Vec<u32>, corners: &[u32; 3]) {
    model_cache.retain(|v| !corners.contains(v));

    for (i, v) in corners.iter().enumerate().rev() {
        if !corners[..i].contains(v) {
            model_cache.insert(0, *v);
        }
    }
}

fn optimize_tipsy(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    mut face_remap: Option<&mut [u32]>,
    tuning: &TipsyTuning,
) -> Result<()> {
    let capacity = cache_size as usize;
    let face_count = indices.len() / 3;

    let mut vert_tris = VertexTriangles::build(indices, vertex_count)?;

    // triangles each vertex still has left to emit
    let mut remaining = vert_tris.counts.clone();
    let mut emitted = try_vec::<bool>(face_count)?;

    let mut scores = try_vec::<f32>(vertex_count)?;
    let mut face_scores = try_vec::<f32>(face_count)?;

    for (v, score) in scores.iter_mut().enumerate() {
        *score = vertex_score(tuning, -1, capacity, remaining[v]);
    }

    for (f, score) in face_scores.iter_mut().enumerate() {
        *score = indices[f * 3..f * 3 + 3].iter().map(|v| scores[*v as usize]).sum();
    }

    // MRU-first model cache; three slots of slack hold the freshly emitted
    // corners until the overflow is rescored and dropped
    let mut model_cache: Vec<u32> = Vec::with_capacity(capacity + 3);

    let mut fallback_cursor = 0;
    let mut chosen = Some(0u32);
    let mut emit_count = 0;

    while let Some(face) = chosen {
        let face = face as usize;
        let corners = [indices[face * 3], indices[face * 3 + 1], indices[face * 3 + 2]];

        destination[emit_count * 3..emit_count * 3 + 3].copy_from_slice(&corners);

        if let Some(remap) = face_remap.as_mut() {
            remap[face] = emit_count as u32;
        }

        emit_count += 1;
        emitted[face] = true;
        face_scores[face] = 0.0;

        // retire the face from its corners so candidate lists shrink as the
        // walk progresses
        for v in corners {
            remaining[v as usize] -= 1;
            vert_tris.remove(v as usize, face as u32);
        }

        promote_corners(&mut model_cache, &corners);

        // every entry shifted rank, so rescore them all and let the score
        // deltas ripple into the faces still touching them; the overflow
        // entries leave the cache and are rescored as outsiders
        let mut next_best = INVALID_INDEX;
        let mut next_score = 0.0f32;

        for (rank, v) in model_cache.iter().enumerate() {
            let v = *v as usize;
            let rank = if rank < capacity { rank as i32 } else { -1 };

            let fresh = vertex_score(tuning, rank, capacity, remaining[v]);
            let delta = fresh - scores[v];
            scores[v] = fresh;

            for f in vert_tris.triangles(v) {
                let rescored = face_scores[*f as usize] + delta;
                face_scores[*f as usize] = rescored;

                if rescored > next_score || (rescored == next_score && *f < next_best) {
                    next_best = *f;
                    next_score = rescored;
                }
            }
        }

        model_cache.truncate(capacity);

        chosen = if next_best != INVALID_INDEX {
            Some(next_best)
        } else {
            // dead end: resume from the first face the input scan has not
            // emitted yet
            loop {
                match emitted.get(fallback_cursor) {
                    Some(true) => fallback_cursor += 1,
                    Some(false) => break Some(fallback_cursor as u32),
                    None => break None,
                }
            }
        };
    }

    if emit_count != face_count {
        return Err(Error::Internal("triangle emission lost faces"));
    }

    Ok(())
}

fn optimize_linear_strips(
    destination: &mut [u32],
    indices: &[u32],
    mut face_remap: Option<&mut [u32]>,
) -> Result<()> {
    let face_count = indices.len() / 3;

    let edges = EdgeAdjacency::build(indices)?;
    let mut emitted_flags = try_vec::<bool>(face_count)?;

    let mut output_triangle = 0;
    let mut seed_cursor = 0;

    while output_triangle < face_count {
        // seed from the lowest-index unvisited triangle
        while seed_cursor < face_count && emitted_flags[seed_cursor] {
            seed_cursor += 1;
        }

        if seed_cursor == face_count {
            return Err(Error::Internal("strip walk lost faces"));
        }

        let mut current = seed_cursor;

        loop {
            emitted_flags[current] = true;
            destination[output_triangle * 3..output_triangle * 3 + 3]
                .copy_from_slice(&indices[current * 3..current * 3 + 3]);

            if let Some(remap) = face_remap.as_mut() {
                remap[current] = output_triangle as u32;
            }

            output_triangle += 1;

            // extend with the lowest-index unvisited edge neighbour
            let mut next = INVALID_INDEX;

            for edge in 0..3 {
                for tri in edges.edge_neighbors(current, edge) {
                    if !emitted_flags[*tri as usize] && *tri < next {
                        next = *tri;
                    }
                }
            }

            if next == INVALID_INDEX {
                break;
            }

            current = next as usize;
        }
    }

    Ok(())
}

fn optimize_fifo_greedy(
    destination: &mut [u32],
    indices: &[u32],
    vertex_count: usize,
    cache_size: u32,
    mut face_remap: Option<&mut [u32]>,
) -> Result<()> {
    let face_count = indices.len() / 3;

    let adjacency = VertexTriangles::build(indices, vertex_count)?;
    let mut emitted_flags = try_vec::<bool>(face_count)?;

    let mut in_cache = try_vec::<bool>(vertex_count)?;
    let mut fifo: VecDeque<u32> = VecDeque::with_capacity(cache_size as usize + 1);

    let mut input_cursor = 0;

    for output_triangle in 0..face_count {
        // candidates touch a cached vertex; pick the fewest immediate misses
        let mut best = INVALID_INDEX;
        let mut best_misses = u32::MAX;

        for v in fifo.iter() {
            for tri in adjacency.triangles(*v as usize) {
                if emitted_flags[*tri as usize] {
                    continue;
                }

                let abc = &indices[*tri as usize * 3..*tri as usize * 3 + 3];
                let misses = immediate_misses(&in_cache, abc);

                if misses < best_misses || (misses == best_misses && *tri < best) {
                    best = *tri;
                    best_misses = misses;
                }
            }
        }

        if best == INVALID_INDEX {
            while input_cursor < face_count && emitted_flags[input_cursor] {
                input_cursor += 1;
            }

            if input_cursor == face_count {
                return Err(Error::Internal("greedy walk lost faces"));
            }

            best = input_cursor as u32;
        }

        let abc = &indices[best as usize * 3..best as usize * 3 + 3];

        destination[output_triangle * 3..output_triangle * 3 + 3].copy_from_slice(abc);

        if let Some(remap) = face_remap.as_mut() {
            remap[best as usize] = output_triangle as u32;
        }

        emitted_flags[best as usize] = true;

        for v in abc {
            if !in_cache[*v as usize] {
                in_cache[*v as usize] = true;
                fifo.push_front(*v);

                if fifo.len() > cache_size as usize {
                    if let Some(evicted) = fifo.pop_back() {
                        in_cache[evicted as usize] = false;
                    }
                }
            }
        }
    }

    Ok(())
}

fn immediate_misses(in_cache: &[bool], abc: &[u32]) -> u32 {
    // duplicate vertices within a triangle miss at most once
    let a = !in_cache[abc[0] as usize];
    let b = !in_cache[abc[1] as usize] && abc[1] != abc[0];
    let c = !in_cache[abc[2] as usize] && abc[2] != abc[0] && abc[2] != abc[1];

    a as u32 + b as u32 + c as u32
}
