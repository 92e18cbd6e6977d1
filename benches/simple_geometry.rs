use bevy::prelude::Vec3;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parry3d::{na::Vector3, shape::Cuboid};
use zoned_navigation::{compiler::compile_zone, conversion::RawMesh, weld::DEFAULT_WELD_TOLERANCE};

/// Unindexed ``size`` x ``size`` grid of quads with a gentle slope, so every vertex has to be welded.
fn grid_triangle_list(size: u32) -> RawMesh {
    let vertex = |x: u32, z: u32| Vec3::new(x as f32, (x + z) as f32 * 0.05, z as f32);

    let mut positions = Vec::with_capacity((size * size * 18) as usize);
    for z in 0..size {
        for x in 0..size {
            for corner in [
                vertex(x, z),
                vertex(x + 1, z),
                vertex(x + 1, z + 1),
                vertex(x, z),
                vertex(x + 1, z + 1),
                vertex(x, z + 1),
            ] {
                positions.extend_from_slice(&corner.to_array());
            }
        }
    }

    RawMesh::new(positions, Vec::new())
}

fn compile_single_primitive_geometry() {
    let (points, triangles) = Cuboid::new(Vector3::new(10.0, 0.2, 10.0)).to_trimesh();
    let mesh = RawMesh::from_parry_points(&points, &triangles);

    black_box(compile_zone(&mesh, DEFAULT_WELD_TOLERANCE));
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Compile Single Primitive Geometry", |b| {
        b.iter(compile_single_primitive_geometry)
    });

    let small_grid = grid_triangle_list(32);
    c.bench_function("Compile Small Grid", |b| {
        b.iter(|| black_box(compile_zone(&small_grid, DEFAULT_WELD_TOLERANCE)))
    });

    let large_grid = grid_triangle_list(128);
    c.bench_function("Compile Large Grid", |b| {
        b.iter(|| black_box(compile_zone(&large_grid, DEFAULT_WELD_TOLERANCE)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
