//! Vertex memory layout optimization.
//!
//! Reindexes vertices in order of first reference so that the input
//! assembler walks the vertex buffer mostly forwards, which suits
//! prefetch-oriented memory subsystems.

use crate::INVALID_INDEX;
use crate::error::{Error, Result};
use crate::mesh::{VertexBuffer, validate_indices};
use crate::util::try_vec;

/// Writes `destination[old_vertex] = new_vertex` so that vertices appear in
/// first-reference order under `indices`; unreferenced vertices are appended
/// at the end in ascending old-id order.
///
/// Returns the number of referenced vertices.
pub fn optimize_vertex_memory_remap(destination: &mut [u32], indices: &[u32], vertex_count: usize) -> Result<usize> {
    validate_indices(indices, vertex_count)?;

    if destination.len() != vertex_count {
        return Err(Error::InvalidArgument("remap size does not match the vertex count"));
    }

    Ok(first_reference_remap(destination, indices))
}

/// Applies the first-reference remap to both buffers: `index_destination`
/// receives the rewritten indices, `vertex_destination` the permuted vertex
/// records (full `stride` bytes each). `vertex_remap` optionally receives the
/// remap table itself.
///
/// Returns the number of referenced vertices.
pub fn optimize_vertex_memory(
    vertex_destination: &mut [u8],
    index_destination: &mut [u32],
    vertices: &VertexBuffer,
    indices: &[u32],
    vertex_remap: Option<&mut [u32]>,
) -> Result<usize> {
    validate_indices(indices, vertices.len())?;

    if vertex_destination.len() != vertices.bytes().len() {
        return Err(Error::InvalidArgument("destination size does not match the vertex buffer"));
    }

    if index_destination.len() != indices.len() {
        return Err(Error::InvalidArgument("destination size does not match the index buffer"));
    }

    if let Some(remap) = vertex_remap.as_deref() {
        if remap.len() != vertices.len() {
            return Err(Error::InvalidArgument("remap size does not match the vertex count"));
        }
    }

    let mut remap = try_vec::<u32>(vertices.len())?;
    let referenced = first_reference_remap(&mut remap, indices);

    for (d, s) in index_destination.iter_mut().zip(indices) {
        *d = remap[*s as usize];
    }

    let stride = vertices.stride();

    for old in 0..vertices.len() {
        let new = remap[old] as usize;

        vertex_destination[new * stride..(new + 1) * stride].copy_from_slice(vertices.record(old));
    }

    if let Some(out) = vertex_remap {
        out.copy_from_slice(&remap);
    }

    Ok(referenced)
}

fn first_reference_remap(remap: &mut [u32], indices: &[u32]) -> usize {
    remap.fill(INVALID_INDEX);

    let mut next_vertex = 0u32;

    for index in indices {
        let slot = &mut remap[*index as usize];

        if *slot == INVALID_INDEX {
            *slot = next_vertex;
            next_vertex += 1;
        }
    }

    let referenced = next_vertex as usize;

    // unreferenced vertices go to the tail, keeping their relative order
    for slot in remap.iter_mut() {
        if *slot == INVALID_INDEX {
            *slot = next_vertex;
            next_vertex += 1;
        }
    }

    referenced
}
