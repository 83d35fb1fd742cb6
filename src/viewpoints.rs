//! The built-in viewpoint table used when callers pass no viewpoints.

use glam::Vec3;

use std::sync::OnceLock;

/// Number of directions in the built-in table.
pub const DEFAULT_VIEWPOINT_COUNT: usize = 128;

static TABLE: OnceLock<Vec<Vec3>> = OnceLock::new();

/// The published default viewpoint set: a 128-direction spherical Fibonacci
/// lattice.
///
/// Point `i` sits at height `z = 1 - (2i + 1) / N` with longitude
/// `i * pi * (3 - sqrt 5)` (the golden angle), which distributes the
/// directions approximately uniformly over the sphere. The table is built
/// once from these constants, so it is identical across runs and platforms.
pub fn default_viewpoints() -> &'static [Vec3] {
    TABLE
        .get_or_init(|| {
            let golden_angle = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());

            (0..DEFAULT_VIEWPOINT_COUNT)
                .map(|i| {
                    let z = 1.0 - (2.0 * i as f32 + 1.0) / DEFAULT_VIEWPOINT_COUNT as f32;
                    let r = (1.0 - z * z).max(0.0).sqrt();
                    let phi = golden_angle * i as f32;

                    Vec3::new(r * phi.cos(), r * phi.sin(), z).normalize()
                })
                .collect()
        })
        .as_slice()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_table_shape() {
        let table = default_viewpoints();

        assert_eq!(table.len(), DEFAULT_VIEWPOINT_COUNT);

        for v in table {
            assert!((v.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_covers_both_hemispheres() {
        let table = default_viewpoints();

        assert!(table.iter().any(|v| v.z > 0.9));
        assert!(table.iter().any(|v| v.z < -0.9));
    }
}
