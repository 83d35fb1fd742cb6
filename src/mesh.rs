//! Borrowed mesh views and per-face geometry helpers.

use glam::Vec3;

use crate::error::{Error, Result};
use crate::util::{bytes_of, try_vec};

/// Size of the leading position attribute in bytes (three `f32`).
pub const POSITION_SIZE: usize = 12;

/// A borrowed, strided view over a caller-owned vertex buffer.
///
/// The position of vertex `i` is the first three floats of the `i`-th
/// `stride`-byte record. The remaining bytes of each record are opaque to the
/// optimizers and travel with the vertex when the buffer is permuted.
#[derive(Clone, Copy, Debug)]
pub struct VertexBuffer<'a> {
    data: &'a [u8],
    stride: usize,
}

impl<'a> VertexBuffer<'a> {
    /// Wraps raw vertex bytes with the given record stride.
    pub fn new(data: &'a [u8], stride: usize) -> Result<Self> {
        if stride < POSITION_SIZE {
            return Err(Error::InvalidArgument("vertex stride smaller than a position"));
        }
        if stride % 4 != 0 {
            return Err(Error::InvalidArgument("vertex stride not float-aligned"));
        }
        if data.len() % stride != 0 {
            return Err(Error::InvalidArgument("vertex buffer length not a multiple of stride"));
        }

        Ok(Self { data, stride })
    }

    /// Wraps a plain position array (stride of one position).
    pub fn from_positions(positions: &'a [[f32; 3]]) -> Self {
        Self {
            data: bytes_of(positions),
            stride: POSITION_SIZE,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The underlying byte buffer.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub(crate) fn record(&self, index: usize) -> &'a [u8] {
        &self.data[index * self.stride..(index + 1) * self.stride]
    }

    /// Position of vertex `index`.
    pub fn position(&self, index: usize) -> Vec3 {
        let r = self.record(index);
        Vec3::new(
            f32::from_ne_bytes([r[0], r[1], r[2], r[3]]),
            f32::from_ne_bytes([r[4], r[5], r[6], r[7]]),
            f32::from_ne_bytes([r[8], r[9], r[10], r[11]]),
        )
    }

    pub(crate) fn validate_finite(&self) -> Result<()> {
        for i in 0..self.len() {
            if !self.position(i).is_finite() {
                return Err(Error::InvalidArgument("non-finite vertex position"));
            }
        }

        Ok(())
    }
}

/// Checks a triangle list against a vertex count before any output is written.
pub(crate) fn validate_indices(indices: &[u32], vertex_count: usize) -> Result<()> {
    if indices.is_empty() {
        return Err(Error::InvalidArgument("empty index buffer"));
    }

    if indices.len() % 3 != 0 {
        return Err(Error::InvalidArgument("index count not a multiple of three"));
    }

    if indices.iter().any(|i| *i as usize >= vertex_count) {
        return Err(Error::InvalidArgument("vertex index out of range"));
    }

    Ok(())
}

/// Unit face normal, zero for degenerate faces.
pub(crate) fn face_normal(p0: Vec3, p1: Vec3, p2: Vec3) -> Vec3 {
    (p1 - p0).cross(p2 - p0).normalize_or_zero()
}

pub(crate) fn face_normals(vertices: &VertexBuffer, indices: &[u32]) -> Result<Vec<Vec3>> {
    let mut normals = try_vec(indices.len() / 3)?;

    for (i, abc) in indices.chunks_exact(3).enumerate() {
        normals[i] = face_normal(
            vertices.position(abc[0] as usize),
            vertices.position(abc[1] as usize),
            vertices.position(abc[2] as usize),
        );
    }

    Ok(normals)
}

/// Bounding-box center and largest axis extent of the referenced positions.
pub(crate) fn calc_extents(vertices: &VertexBuffer) -> (Vec3, f32) {
    let mut minv = Vec3::splat(f32::MAX);
    let mut maxv = Vec3::splat(-f32::MAX);

    for i in 0..vertices.len() {
        let v = vertices.position(i);
        minv = minv.min(v);
        maxv = maxv.max(v);
    }

    let extent = (maxv - minv).max_element();

    ((minv + maxv) * 0.5, extent)
}
