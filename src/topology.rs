//! Vertex/triangle and edge/triangle adjacency.

use std::collections::HashMap;

use crate::error::Result;
use crate::util::try_vec;

/// CSR map from vertex index to the triangles referencing it.
#[derive(Default)]
pub struct VertexTriangles {
    pub(crate) counts: Vec<u32>,
    pub(crate) offsets: Vec<u32>,
    pub(crate) data: Vec<u32>,
}

impl VertexTriangles {
    pub fn build(indices: &[u32], vertex_count: usize) -> Result<Self> {
        let face_count = indices.len() / 3;

        let mut adjacency = Self {
            counts: try_vec(vertex_count)?,
            offsets: try_vec(vertex_count)?,
            data: try_vec(indices.len())?,
        };

        // count occurrences per vertex, then prefix-sum into slot offsets
        for index in indices {
            adjacency.counts[*index as usize] += 1;
        }

        let mut offset = 0;

        for i in 0..vertex_count {
            adjacency.offsets[i] = offset;
            offset += adjacency.counts[i];
        }

        debug_assert_eq!(offset as usize, indices.len());

        // scatter triangle ids into the slots, bumping each offset as we go,
        // then rewind the offsets to where the scatter started
        for i in 0..face_count {
            for j in 0..3 {
                let a = indices[i * 3 + j] as usize;
                let o = &mut adjacency.offsets[a];
                adjacency.data[*o as usize] = i as u32;
                *o += 1;
            }
        }

        for i in 0..vertex_count {
            debug_assert!(adjacency.offsets[i] >= adjacency.counts[i]);

            adjacency.offsets[i] -= adjacency.counts[i];
        }

        Ok(adjacency)
    }

    /// Triangles currently listed for `vertex`.
    pub fn triangles(&self, vertex: usize) -> &[u32] {
        let offset = self.offsets[vertex] as usize;
        &self.data[offset..offset + self.counts[vertex] as usize]
    }

    /// Drops one listing of `triangle` under `vertex`; the list order is not
    /// preserved.
    pub(crate) fn remove(&mut self, vertex: usize, triangle: u32) {
        let offset = self.offsets[vertex] as usize;
        let len = self.counts[vertex] as usize;
        let list = &mut self.data[offset..offset + len];

        if let Some(at) = list.iter().position(|t| *t == triangle) {
            list[at] = list[len - 1];
            self.counts[vertex] -= 1;
        }
    }
}

/// Per-edge triangle adjacency over the undirected edge key `(min, max)`.
///
/// Every triangle sharing an edge key is recorded, so non-manifold edges
/// (three or more incident triangles) yield more than one neighbor per edge
/// slot. Degenerate edges (`a == b`) contribute no adjacency; a triangle is
/// never its own neighbor.
#[derive(Default)]
pub struct EdgeAdjacency {
    // one slot per directed face edge, 3 per face
    offsets: Vec<u32>,
    data: Vec<u32>,
}

impl EdgeAdjacency {
    pub fn build(indices: &[u32]) -> Result<Self> {
        let face_count = indices.len() / 3;

        let mut buckets: HashMap<(u32, u32), Vec<u32>> = HashMap::new();

        for (face, abc) in indices.chunks_exact(3).enumerate() {
            for e in 0..3 {
                let (a, b) = (abc[e], abc[(e + 1) % 3]);

                if a != b {
                    buckets.entry(edge_key(a, b)).or_default().push(face as u32);
                }
            }
        }

        let mut offsets = try_vec::<u32>(face_count * 3 + 1)?;
        let mut data = Vec::new();

        // walk faces in order so that neighbor lists are deterministic
        for (face, abc) in indices.chunks_exact(3).enumerate() {
            for e in 0..3 {
                let (a, b) = (abc[e], abc[(e + 1) % 3]);

                if a != b {
                    if let Some(bucket) = buckets.get(&edge_key(a, b)) {
                        data.extend(bucket.iter().copied().filter(|f| *f != face as u32));
                    }
                }

                offsets[face * 3 + e + 1] = data.len() as u32;
            }
        }

        Ok(Self { offsets, data })
    }

    /// Triangles sharing edge `edge` (0..3) of triangle `face`.
    pub fn edge_neighbors(&self, face: usize, edge: usize) -> &[u32] {
        let slot = face * 3 + edge;
        &self.data[self.offsets[slot] as usize..self.offsets[slot + 1] as usize]
    }
}

#[inline]
fn edge_key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vertex_triangles() {
        // two triangles sharing the edge (1, 2)
        let indices = [0, 1, 2, 2, 1, 3];
        let vt = VertexTriangles::build(&indices, 4).unwrap();

        assert_eq!(vt.triangles(0), &[0]);
        assert_eq!(vt.triangles(1), &[0, 1]);
        assert_eq!(vt.triangles(2), &[0, 1]);
        assert_eq!(vt.triangles(3), &[1]);
    }

    #[test]
    fn test_edge_adjacency_shared_edge() {
        let indices = [0, 1, 2, 2, 1, 3];
        let edges = EdgeAdjacency::build(&indices).unwrap();

        // edge (1, 2) of face 0 is shared with face 1
        assert_eq!(edges.edge_neighbors(0, 1), &[1]);
        // edge (2, 1) of face 1 is shared with face 0
        assert_eq!(edges.edge_neighbors(1, 0), &[0]);
        // boundary edges have no neighbors
        assert_eq!(edges.edge_neighbors(0, 0), &[] as &[u32]);
    }

    #[test]
    fn test_edge_adjacency_non_manifold() {
        // three triangles fanning around the edge (0, 1)
        let indices = [0, 1, 2, 0, 1, 3, 0, 1, 4];
        let edges = EdgeAdjacency::build(&indices).unwrap();

        assert_eq!(edges.edge_neighbors(0, 0), &[1, 2]);
        assert_eq!(edges.edge_neighbors(1, 0), &[0, 2]);
        assert_eq!(edges.edge_neighbors(2, 0), &[0, 1]);
    }

    #[test]
    fn test_degenerate_edge_skipped() {
        let indices = [0, 0, 1, 0, 1, 2];
        let edges = EdgeAdjacency::build(&indices).unwrap();

        // the collapsed edge (0, 0) of face 0 has no slot entries
        assert_eq!(edges.edge_neighbors(0, 0), &[] as &[u32]);
        // the surviving edges still pair up
        assert_eq!(edges.edge_neighbors(0, 1), &[1]);
    }
}
