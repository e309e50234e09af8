//! Mesh metadata export utilities (JSON).

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fusion::mesh::Mesh;
use crate::fusion::tsdf_volume::TsdfConfig;

#[derive(Debug, Error)]
pub enum MeshMetadataError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: String, source: std::io::Error },
    #[error("failed to write metadata {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("failed to serialize metadata {path}: {source}")]
    Serialize { path: String, source: serde_json::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMetadata {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub bounding_box: Option<BoundingBox>,
    pub surface_area: f32,
    /// Share of extracted triangles dropped as small disconnected components.
    pub isolated_triangle_percentage: f32,
    pub tsdf: TsdfMetadata,
    /// Camera views integrated into the volume.
    pub viewpoint_count: usize,
    pub timings_ms: MeshTimings,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsdfMetadata {
    pub voxel_size: f32,
    pub truncation_distance: f32,
    pub block_resolution: usize,
    pub allocated_blocks: usize,
    /// Voxels with non-zero accumulated weight.
    #[serde(default)]
    pub observed_voxels: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshTimings {
    pub tsdf_fusion_ms: u64,
    pub mesh_extraction_ms: u64,
    pub post_process_ms: u64,
}

impl MeshMetadata {
    pub fn new(
        mesh: &Mesh,
        tsdf: &TsdfConfig,
        allocated_blocks: usize,
        observed_voxels: usize,
        viewpoint_count: usize,
        isolated_triangle_percentage: f32,
        timings_ms: MeshTimings,
    ) -> Self {
        let bounding_box = mesh.bounding_box().map(|(min, max)| BoundingBox {
            min: min.to_array(),
            max: max.to_array(),
        });
        Self {
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.triangle_count(),
            bounding_box,
            surface_area: mesh.surface_area(),
            isolated_triangle_percentage,
            tsdf: TsdfMetadata {
                voxel_size: tsdf.voxel_size,
                truncation_distance: tsdf.truncation(),
                block_resolution: tsdf.block_resolution,
                allocated_blocks,
                observed_voxels,
            },
            viewpoint_count,
            timings_ms,
        }
    }
}

pub fn save_mesh_metadata(path: &Path, metadata: &MeshMetadata) -> Result<(), MeshMetadataError> {
    let file = File::create(path).map_err(|source| MeshMetadataError::Write {
        path: path.display().to_string(),
        source,
    })?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, metadata).map_err(|source| MeshMetadataError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

pub fn export_mesh_metadata(
    output_dir: &Path,
    metadata: &MeshMetadata,
) -> Result<std::path::PathBuf, MeshMetadataError> {
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|source| MeshMetadataError::CreateDir {
            path: output_dir.display().to_string(),
            source,
        })?;
    }

    let path = output_dir.join("mesh_metadata.json");
    save_mesh_metadata(&path, metadata)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_grid_mesh;
    use tempfile::tempdir;

    #[test]
    fn test_export_metadata() {
        let dir = tempdir().unwrap();
        let mesh = create_grid_mesh(3, 3, 0.5);
        let metadata = MeshMetadata::new(
            &mesh,
            &TsdfConfig::default(),
            42,
            9000,
            10,
            0.0,
            MeshTimings {
                tsdf_fusion_ms: 12,
                mesh_extraction_ms: 5,
                post_process_ms: 2,
            },
        );

        let path = export_mesh_metadata(dir.path(), &metadata).unwrap();
        let payload = std::fs::read_to_string(path).unwrap();
        assert!(payload.contains("\"vertex_count\": 9"));
        assert!(payload.contains("\"triangle_count\": 8"));
        assert!(payload.contains("\"allocated_blocks\": 42"));
        assert!(payload.contains("\"observed_voxels\": 9000"));

        let parsed: MeshMetadata = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.bounding_box.unwrap().max, [1.0, 1.0, 0.0]);
        assert!((parsed.surface_area - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_mesh_has_no_bounds() {
        let metadata = MeshMetadata::new(
            &Mesh::new(),
            &TsdfConfig::default(),
            0,
            0,
            0,
            0.0,
            MeshTimings::default(),
        );
        assert!(metadata.bounding_box.is_none());
        assert_eq!(metadata.tsdf.truncation_distance, 0.08);
    }
}
