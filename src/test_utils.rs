//! Test utilities for questfusion
//!
//! Generators for synthetic test data:
//! - Planar depth maps and in-memory captures
//! - Capture directories on disk
//! - Hand-built TSDF grids (sphere)
//! - Flat grid meshes
//!
//! # Examples
//!
//! ```
//! use questfusion::test_utils::*;
//!
//! let depth = planar_depth(64, 64, 1.0);
//! let mesh = create_grid_mesh(4, 4, 0.1);
//! assert_eq!(mesh.triangle_count(), 18);
//! ```

use std::path::Path;

use glam::Vec3;
use serde_json::json;

use crate::config::FusionConfig;
use crate::core::{
    CameraCapture, CameraId, CameraRig, ColorImage, DepthImage, Frame, HeadPose, Intrinsics,
};
use crate::fusion::{Mesh, MeshVertex, TsdfConfig, VoxelHashGrid};
use crate::io::{DatasetError, InMemorySource};

/// Side length of the synthetic captures, in pixels.
pub const TEST_IMAGE_SIZE: usize = 64;

/// Depth map of a fronto-parallel plane at `depth` meters.
pub fn planar_depth(width: usize, height: usize, depth: f32) -> DepthImage {
    DepthImage::filled(width, height, depth)
}

/// Pinhole intrinsics matching [`TEST_IMAGE_SIZE`] with a 90° field of view.
pub fn small_intrinsics() -> Intrinsics {
    Intrinsics::new(64.0, 64.0, 32.0, 32.0)
}

/// Coarse TSDF settings that keep unit tests fast.
pub fn small_tsdf_config() -> TsdfConfig {
    TsdfConfig {
        voxel_size: 0.02,
        trunc_voxel_multiplier: 4.0,
        block_resolution: 8,
        block_count: 20_000,
        ..TsdfConfig::default()
    }
}

/// Rig with all cameras at the head origin and [`small_intrinsics`].
pub fn small_rig() -> CameraRig {
    let mut rig = CameraRig::default();
    for camera in [CameraId::Left, CameraId::Right, CameraId::Color] {
        let entry = rig.entry_mut(camera);
        entry.translation = [0.0; 3];
        entry.rotation = None;
        entry.intrinsics = small_intrinsics();
    }
    rig
}

/// Default config with the grid from [`small_tsdf_config`] and every frame used.
pub fn small_fusion_config() -> FusionConfig {
    let tsdf = small_tsdf_config();
    let mut config = FusionConfig::default();
    config.rig = small_rig();
    config.reconstruction.voxel_size = tsdf.voxel_size;
    config.reconstruction.trunc_voxel_multiplier = tsdf.trunc_voxel_multiplier;
    config.reconstruction.block_resolution = tsdf.block_resolution;
    config.reconstruction.block_count = tsdf.block_count;
    config.reconstruction.frame_interval = 1;
    config
}

/// Metric planar capture without calibration, gray color.
pub fn planar_capture(depth: f32) -> CameraCapture {
    CameraCapture {
        color: ColorImage::filled(TEST_IMAGE_SIZE, TEST_IMAGE_SIZE, [128, 128, 128]),
        depth: planar_depth(TEST_IMAGE_SIZE, TEST_IMAGE_SIZE, depth),
        confidence: None,
        calibration: None,
    }
}

/// In-memory source of `frames` identical planar views from the head origin.
pub fn planar_source(frames: usize, depth: f32) -> InMemorySource {
    let mut source = InMemorySource::new(small_rig());
    for i in 0..frames {
        let frame = Frame::new(i, i as i64 * 33, HeadPose::at([0.0; 3]));
        source.push_frame(frame, vec![(CameraId::Left, planar_capture(depth))]);
    }
    source
}

/// Write a capture directory of `frames` planar views of the left camera.
///
/// Color is a gray 64×64 PNG, depth a 320×320 raw metric map without
/// descriptors, and `camera_metadata` places the left camera at the head
/// origin with [`small_intrinsics`].
pub fn write_planar_capture(root: &Path, frames: usize, depth: f32) -> Result<(), DatasetError> {
    std::fs::create_dir_all(root.join("left"))?;

    let (w, h) = crate::io::dataset::DEFAULT_DEPTH_SIZE;
    let raw: Vec<u8> = std::iter::repeat(depth.to_le_bytes())
        .take(w * h)
        .flatten()
        .collect();
    let size = TEST_IMAGE_SIZE as u32;
    let color = image::RgbImage::from_pixel(size, size, image::Rgb([128, 128, 128]));

    let mut records = Vec::with_capacity(frames);
    for i in 0..frames {
        let image = format!("left/{i:06}.png");
        let depth_file = format!("left/{i:06}.raw");
        color
            .save(root.join(&image))
            .map_err(|e| DatasetError::Image(e.to_string()))?;
        std::fs::write(root.join(&depth_file), &raw)?;
        records.push(json!({
            "frame_id": i,
            "timestamp": 1_700_000_000_000i64 + i as i64 * 33,
            "pose": { "position": [0.0, 0.0, 0.0], "rotation": [1.0, 0.0, 0.0, 0.0] },
            "cameras": { "left": { "image": image, "depth": depth_file } },
        }));
    }

    let k = small_intrinsics();
    let manifest = json!({
        "version": "1.0",
        "source": "synthetic",
        "camera_metadata": {
            "left": {
                "intrinsics": { "fx": k.fx, "fy": k.fy, "cx": k.cx, "cy": k.cy },
                "translation": [0.0, 0.0, 0.0],
            }
        },
        "frames": records,
    });
    std::fs::write(
        root.join(crate::io::manifest::MANIFEST_FILE),
        serde_json::to_vec_pretty(&manifest)?,
    )?;
    Ok(())
}

/// Grid holding the exact truncated distance field of a sphere.
///
/// Every voxel of every block overlapping the sphere (plus a one-voxel margin)
/// is observed with unit weight and colored by its position.
pub fn create_sphere_grid(center: Vec3, radius: f32, voxel_size: f32, block_resolution: usize) -> VoxelHashGrid {
    let truncation = 4.0 * voxel_size;
    let mut grid = VoxelHashGrid::new(voxel_size, block_resolution, 1 << 16);

    let margin = Vec3::splat(radius + 2.0 * voxel_size);
    let lo = grid.block_coord_of(center - margin);
    let hi = grid.block_coord_of(center + margin);
    let mut coords = Vec::new();
    for z in lo.z..=hi.z {
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                coords.push(glam::IVec3::new(x, y, z));
            }
        }
    }
    if grid.activate(&coords).is_err() {
        return grid;
    }

    for i in 0..grid.len() {
        let Some(block) = grid.block(i) else { continue };
        let positions: Vec<Vec3> = (0..block_resolution.pow(3))
            .map(|n| {
                let (x, y, z) = (
                    n % block_resolution,
                    (n / block_resolution) % block_resolution,
                    n / (block_resolution * block_resolution),
                );
                grid.voxel_position(block.global_index(x, y, z))
            })
            .collect();
        if let Some(block) = grid.block_mut(i) {
            for (voxel, p) in block.voxels_mut().iter_mut().zip(positions) {
                let distance = (p - center).length() - radius;
                voxel.tsdf = (distance / truncation).clamp(-1.0, 1.0);
                voxel.weight = 1.0;
                voxel.color = [
                    (p.x / (2.0 * radius)).clamp(0.0, 1.0),
                    (p.y / (2.0 * radius)).clamp(0.0, 1.0),
                    0.5,
                ];
            }
        }
    }
    grid
}

/// Regular `nx × ny` vertex grid in the XY plane, two CCW triangles per cell.
pub fn create_grid_mesh(nx: usize, ny: usize, spacing: f32) -> Mesh {
    let mut mesh = Mesh::new();
    for j in 0..ny {
        for i in 0..nx {
            let mut vertex = MeshVertex::new(
                Vec3::new(i as f32 * spacing, j as f32 * spacing, 0.0),
                [0.5, 0.5, 0.5],
            );
            vertex.normal = Vec3::Z;
            mesh.add_vertex(vertex);
        }
    }
    for j in 0..ny.saturating_sub(1) {
        for i in 0..nx.saturating_sub(1) {
            let v00 = j * nx + i;
            let v10 = v00 + 1;
            let v01 = v00 + nx;
            let v11 = v01 + 1;
            mesh.add_triangle(v00, v10, v11);
            mesh.add_triangle(v00, v11, v01);
        }
    }
    mesh
}
