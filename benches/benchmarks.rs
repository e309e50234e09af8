//! # Benchmarks
//!
//! Performance benchmarks for questfusion.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;

use questfusion::core::Pose;
use questfusion::depth::DepthLinearizer;
use questfusion::fusion::{extract_mesh, MeshPostProcessor, Observation, TsdfVolume};
use questfusion::test_utils::{
    create_sphere_grid, planar_depth, small_intrinsics, small_tsdf_config,
};

fn integrate_benchmark(c: &mut Criterion) {
    let depth = planar_depth(64, 64, 1.0);
    let observation = Observation {
        depth: &depth,
        color: None,
        intrinsics: small_intrinsics(),
    };

    c.bench_function("tsdf_integrate_64x64_plane", |b| {
        b.iter(|| {
            let mut volume = TsdfVolume::new(small_tsdf_config());
            volume
                .integrate(black_box(&observation), &Pose::IDENTITY)
                .map(|stats| stats.updated_voxels)
        })
    });
}

fn extract_benchmark(c: &mut Criterion) {
    let grid = create_sphere_grid(Vec3::new(0.32, 0.31, 0.33), 0.2, 0.02, 8);

    c.bench_function("extract_sphere_r20cm", |b| {
        b.iter(|| extract_mesh(black_box(&grid)).triangle_count())
    });
}

fn post_process_benchmark(c: &mut Criterion) {
    let grid = create_sphere_grid(Vec3::new(0.32, 0.31, 0.33), 0.2, 0.02, 8);
    let mesh = extract_mesh(&grid);
    let processor = MeshPostProcessor::default();

    c.bench_function("post_process_sphere", |b| {
        b.iter(|| processor.process(black_box(mesh.clone())).0.triangle_count())
    });
}

fn linearize_benchmark(c: &mut Criterion) {
    let raw = planar_depth(320, 320, 0.9);
    let calibration = questfusion::core::DepthCalibration {
        near: 0.1,
        far: f32::INFINITY,
        fov_left: 1.0,
        fov_right: 1.0,
        fov_top: 1.0,
        fov_down: 1.0,
        width: 320,
        height: 320,
    };
    let linearizer = DepthLinearizer::default();

    c.bench_function("linearize_320x320", |b| {
        b.iter(|| linearizer.linearize(black_box(&raw), Some(&calibration)))
    });
}

criterion_group!(
    benches,
    integrate_benchmark,
    extract_benchmark,
    post_process_benchmark,
    linearize_benchmark
);
criterion_main!(benches);
