//! Software ray casting used by the overdraw passes.
//!
//! The mesh is rigidly rescaled into the unit sphere and cast against an
//! orthographic grid of rays per viewpoint. Every hit along a ray is
//! collected; callers cull and walk the depth-sorted list.

use glam::Vec3;

use crate::Winding;
use crate::error::Result;
use crate::mesh::{VertexBuffer, calc_extents, face_normal};
use crate::util::{inverse_or_zero, try_vec};

/// Rays per viewpoint axis.
pub(crate) const IMAGE_SIZE: usize = 256;

const LEAF_SIZE: usize = 8;
const EPSILON: f32 = 1e-7;

#[derive(Clone, Copy)]
pub(crate) struct Hit {
    pub t: f32,
    pub face: u32,
}

#[derive(Clone, Copy)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    #[inline]
    fn expand_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    #[inline]
    fn expand_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[inline]
    fn longest_axis(&self) -> usize {
        let d = self.max - self.min;

        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Slab test, tolerant of axis-aligned ray directions.
    fn intersects_ray(&self, origin: Vec3, dir: Vec3) -> bool {
        let mut tmin = f32::NEG_INFINITY;
        let mut tmax = f32::INFINITY;

        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];

            if d.abs() < 1e-12 {
                if o < self.min[axis] || o > self.max[axis] {
                    return false;
                }
            } else {
                let inv = 1.0 / d;
                let t0 = (self.min[axis] - o) * inv;
                let t1 = (self.max[axis] - o) * inv;
                let (t0, t1) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };

                tmin = tmin.max(t0);
                tmax = tmax.min(t1);

                if tmin > tmax {
                    return false;
                }
            }
        }

        tmax >= 0.0
    }
}

enum BvhNode {
    Leaf {
        aabb: Aabb,
        faces: Vec<u32>,
    },
    Internal {
        aabb: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    #[inline]
    fn aabb(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { aabb, .. } => aabb,
            BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// An immutable, unit-sphere-normalized snapshot of the mesh with a BVH over
/// triangle centroids.
pub(crate) struct RayScene {
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    pub(crate) normals: Vec<Vec3>,
    root: Option<BvhNode>,
}

impl RayScene {
    pub(crate) fn build(vertices: &VertexBuffer, indices: &[u32]) -> Result<Self> {
        let face_count = indices.len() / 3;

        // translate the bounding-box center to the origin and rescale by the
        // largest extent so the whole mesh sits inside the unit sphere
        let (center, extent) = calc_extents(vertices);
        let scale = inverse_or_zero(extent);

        let mut positions = try_vec::<Vec3>(vertices.len())?;

        for (i, p) in positions.iter_mut().enumerate() {
            *p = (vertices.position(i) - center) * scale;
        }

        let mut triangles = try_vec::<[u32; 3]>(face_count)?;
        let mut normals = try_vec::<Vec3>(face_count)?;
        let mut aabbs = try_vec::<Aabb>(face_count)?;
        let mut centroids = try_vec::<Vec3>(face_count)?;

        for (f, abc) in indices.chunks_exact(3).enumerate() {
            let (p0, p1, p2) = (
                positions[abc[0] as usize],
                positions[abc[1] as usize],
                positions[abc[2] as usize],
            );

            triangles[f] = [abc[0], abc[1], abc[2]];
            normals[f] = face_normal(p0, p1, p2);

            let mut aabb = Aabb::empty();
            aabb.expand_point(p0);
            aabb.expand_point(p1);
            aabb.expand_point(p2);

            aabbs[f] = aabb;
            centroids[f] = (p0 + p1 + p2) / 3.0;
        }

        let root = if face_count > 0 {
            let faces: Vec<u32> = (0..face_count as u32).collect();
            Some(build_node(faces, &aabbs, &centroids))
        } else {
            None
        };

        Ok(Self {
            positions,
            triangles,
            normals,
            root,
        })
    }

    /// Collects every intersection along the ray, front and back facing
    /// alike, in traversal order.
    pub(crate) fn cast(&self, origin: Vec3, dir: Vec3, hits: &mut Vec<Hit>) {
        hits.clear();

        let Some(root) = &self.root else {
            return;
        };

        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if !node.aabb().intersects_ray(origin, dir) {
                continue;
            }

            match node {
                BvhNode::Leaf { faces, .. } => {
                    for face in faces {
                        let [a, b, c] = self.triangles[*face as usize];

                        if let Some(t) = intersect_triangle(
                            origin,
                            dir,
                            self.positions[a as usize],
                            self.positions[b as usize],
                            self.positions[c as usize],
                        ) {
                            hits.push(Hit { t, face: *face });
                        }
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    stack.push(left.as_ref());
                    stack.push(right.as_ref());
                }
            }
        }
    }
}

fn build_node(mut faces: Vec<u32>, aabbs: &[Aabb], centroids: &[Vec3]) -> BvhNode {
    let mut aabb = Aabb::empty();
    let mut centroid_bounds = Aabb::empty();

    for face in &faces {
        aabb.expand_aabb(&aabbs[*face as usize]);
        centroid_bounds.expand_point(centroids[*face as usize]);
    }

    if faces.len() <= LEAF_SIZE {
        return BvhNode::Leaf { aabb, faces };
    }

    // median split on the longest centroid axis; face id breaks ties so the
    // tree is identical across runs and platforms
    let axis = centroid_bounds.longest_axis();

    faces.sort_unstable_by(|a, b| {
        centroids[*a as usize][axis]
            .total_cmp(&centroids[*b as usize][axis])
            .then(a.cmp(b))
    });

    let right_faces = faces.split_off(faces.len() / 2);

    BvhNode::Internal {
        aabb,
        left: Box::new(build_node(faces, aabbs, centroids)),
        right: Box::new(build_node(right_faces, aabbs, centroids)),
    }
}

fn intersect_triangle(origin: Vec3, dir: Vec3, p0: Vec3, p1: Vec3, p2: Vec3) -> Option<f32> {
    let e1 = p1 - p0;
    let e2 = p2 - p0;

    let pv = dir.cross(e2);
    let det = e1.dot(pv);

    // parallel or degenerate
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let tv = origin - p0;

    let u = tv.dot(pv) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let qv = tv.cross(e1);
    let v = dir.dot(qv) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(qv) * inv_det;

    (t > EPSILON).then_some(t)
}

/// Whether a face with geometric normal `normal` (counter-clockwise cross
/// product convention) faces a viewer sitting in direction `viewpoint`.
#[inline]
pub(crate) fn front_facing(normal: Vec3, viewpoint: Vec3, winding: Winding) -> bool {
    let facing = normal.dot(viewpoint);

    match winding {
        Winding::CounterClockwise => facing > 0.0,
        Winding::Clockwise => facing < 0.0,
    }
}

fn orthonormal_basis(d: Vec3) -> (Vec3, Vec3) {
    let up = if d.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };

    let u = up.cross(d).normalize();
    let v = d.cross(u);

    (u, v)
}

/// Casts the orthographic grid for one unit viewpoint and hands each ray's
/// culled, depth-sorted hit list to `per_ray`.
pub(crate) fn cast_viewpoint(
    scene: &RayScene,
    viewpoint: Vec3,
    winding: Winding,
    mut per_ray: impl FnMut(&[Hit]),
) {
    let (u, v) = orthonormal_basis(viewpoint);
    let dir = -viewpoint;

    let mut hits = Vec::new();

    for y in 0..IMAGE_SIZE {
        for x in 0..IMAGE_SIZE {
            let sx = ((x as f32 + 0.5) / IMAGE_SIZE as f32) * 2.0 - 1.0;
            let sy = ((y as f32 + 0.5) / IMAGE_SIZE as f32) * 2.0 - 1.0;

            let origin = viewpoint * 2.0 + u * sx + v * sy;

            scene.cast(origin, dir, &mut hits);

            hits.retain(|h| front_facing(scene.normals[h.face as usize], viewpoint, winding));

            // depth order; equal depths resolve to the lower face id
            hits.sort_unstable_by(|a, b| a.t.total_cmp(&b.t).then(a.face.cmp(&b.face)));

            per_ray(&hits);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn quad_scene() -> RayScene {
        // unit quad in the xy plane, normals towards +z
        let positions = [
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [1.0, 1.0, 0.0],
            [-1.0, 1.0, 0.0],
        ];
        let indices = [0, 1, 2, 0, 2, 3];

        RayScene::build(&VertexBuffer::from_positions(&positions), &indices).unwrap()
    }

    #[test]
    fn test_ray_hits_quad() {
        let scene = quad_scene();

        // off the shared diagonal, so exactly one triangle is crossed
        let mut hits = Vec::new();
        scene.cast(Vec3::new(0.1, -0.1, 2.0), Vec3::NEG_Z, &mut hits);

        assert_eq!(hits.len(), 1);
        assert!((hits[0].t - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_ray_misses_outside() {
        let scene = quad_scene();

        let mut hits = Vec::new();
        scene.cast(Vec3::new(5.0, 0.0, 2.0), Vec3::NEG_Z, &mut hits);

        assert!(hits.is_empty());
    }

    #[test]
    fn test_front_facing_winding() {
        let n = Vec3::Z;

        assert!(front_facing(n, Vec3::Z, Winding::CounterClockwise));
        assert!(!front_facing(n, Vec3::Z, Winding::Clockwise));
        assert!(front_facing(-n, Vec3::Z, Winding::Clockwise));
    }

    #[test]
    fn test_bvh_finds_all_layers() {
        // two stacked quads; a central ray crosses both
        let positions = [
            [-1.0f32, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [1.0, 1.0, 0.0],
            [-1.0, 1.0, 0.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ];
        let indices = [0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7];

        let scene = RayScene::build(&VertexBuffer::from_positions(&positions), &indices).unwrap();

        let mut hits = Vec::new();
        scene.cast(Vec3::new(0.1, -0.1, 5.0), Vec3::NEG_Z, &mut hits);

        assert_eq!(hits.len(), 2);
    }
}
