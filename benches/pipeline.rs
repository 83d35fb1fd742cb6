use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use glam::Vec3;

use triorder::{
    DEFAULT_ALPHA, VcacheStrategy, VertexBuffer, Winding, fast_optimize_vcache_and_cluster, measure_cache_efficiency,
    optimize_overdraw, optimize_vcache, optimize_vertex_memory_remap, OverdrawStrategy,
};

/// n x n vertex grid folded into a wavy sheet so clustering has work to do.
fn grid_mesh(n: u32) -> (Vec<[f32; 3]>, Vec<u32>) {
    let mut positions = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let z = ((x as f32 * 0.3).sin() + (y as f32 * 0.3).cos()) * 4.0;
            positions.push([x as f32, y as f32, z]);
        }
    }

    let mut indices = Vec::new();
    for y in 0..n - 1 {
        for x in 0..n - 1 {
            let v = y * n + x;
            indices.extend_from_slice(&[v, v + 1, v + n, v + n, v + 1, v + n + 1]);
        }
    }

    (positions, indices)
}

fn bench_vcache(c: &mut Criterion) {
    let n = 128u32;
    let (_, indices) = grid_mesh(n);
    let vertex_count = (n * n) as usize;

    let mut group = c.benchmark_group("vcache");
    group.throughput(Throughput::Elements((indices.len() / 3) as u64));

    for strategy in [VcacheStrategy::Tipsy, VcacheStrategy::LinearStrips, VcacheStrategy::Fifo] {
        group.bench_with_input(
            BenchmarkId::new("optimize", format!("{strategy:?}")),
            &indices,
            |b, indices| {
                let mut destination = vec![0u32; indices.len()];
                b.iter(|| optimize_vcache(&mut destination, indices, vertex_count, 16, strategy, None).unwrap());
            },
        );
    }

    group.bench_with_input(BenchmarkId::new("measure", "fifo"), &indices, |b, indices| {
        b.iter(|| measure_cache_efficiency(indices, 16).unwrap());
    });

    group.finish();
}

fn bench_cluster(c: &mut Criterion) {
    let n = 128u32;
    let (_, indices) = grid_mesh(n);
    let vertex_count = (n * n) as usize;

    c.bench_function("fast_optimize_vcache_and_cluster", |b| {
        let mut destination = vec![0u32; indices.len()];
        let mut face_cluster = vec![0u32; indices.len() / 3];

        b.iter(|| {
            fast_optimize_vcache_and_cluster(
                &mut destination,
                &indices,
                vertex_count,
                16,
                DEFAULT_ALPHA,
                &mut face_cluster,
            )
            .unwrap()
        });
    });
}

fn bench_overdraw(c: &mut Criterion) {
    let n = 64u32;
    let (positions, indices) = grid_mesh(n);
    let vertex_count = (n * n) as usize;

    let vertices = VertexBuffer::from_positions(&positions);

    let mut ordered = vec![0u32; indices.len()];
    let mut face_cluster = vec![0u32; indices.len() / 3];
    fast_optimize_vcache_and_cluster(&mut ordered, &indices, vertex_count, 16, DEFAULT_ALPHA, &mut face_cluster)
        .unwrap();

    // three axis viewpoints keep the ray-cast workload bench-sized
    let viewpoints = [Vec3::X, Vec3::Y, Vec3::Z];

    let mut group = c.benchmark_group("overdraw");
    group.sample_size(10);

    group.bench_function("optimize_raytrace", |b| {
        let mut destination = vec![0u32; indices.len()];

        b.iter(|| {
            optimize_overdraw(
                &vertices,
                &ordered,
                &mut destination,
                &viewpoints,
                Winding::CounterClockwise,
                &face_cluster,
                OverdrawStrategy::Raytrace,
                None,
            )
            .unwrap()
        });
    });

    group.finish();
}

fn bench_fetch(c: &mut Criterion) {
    let n = 128u32;
    let (_, indices) = grid_mesh(n);
    let vertex_count = (n * n) as usize;

    c.bench_function("optimize_vertex_memory_remap", |b| {
        let mut remap = vec![0u32; vertex_count];
        b.iter(|| optimize_vertex_memory_remap(&mut remap, &indices, vertex_count).unwrap());
    });
}

criterion_group!(benches, bench_vcache, bench_cluster, bench_overdraw, bench_fetch);
criterion_main!(benches);
