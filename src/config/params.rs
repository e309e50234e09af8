//! Parameter structures for the fusion pipeline stages

use serde::{Deserialize, Serialize};

use crate::core::{CameraSelection, QuaternionOrder};
use crate::fusion::mesh_io::MeshFormat;
use crate::fusion::tsdf_volume::TsdfConfig;

/// Volumetric integration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionParams {
    /// Voxel edge length (meters)
    pub voxel_size: f32,
    /// Truncation distance in voxels
    pub trunc_voxel_multiplier: f32,
    /// Depth beyond this is ignored (meters)
    pub depth_max: f32,
    /// Voxels per block edge
    pub block_resolution: usize,
    /// Maximum number of voxel blocks
    pub block_count: usize,
    /// Integrate every n-th frame
    pub frame_interval: usize,
    /// Cameras to integrate
    pub camera: CameraSelection,
    /// Drop pixels whose confidence is below `confidence_threshold`
    pub use_confidence_filtered_depth: bool,
    pub confidence_threshold: f32,
    /// Pixel stride used to find the blocks a view touches
    pub activation_stride: usize,
    pub max_weight: f32,
    pub observation_weight: f32,
    /// Component order of pose quaternions
    pub quaternion_order: QuaternionOrder,
    /// Smallest focal length (pixels) accepted from depth calibration
    pub min_focal_length: f32,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            voxel_size: 0.01,
            trunc_voxel_multiplier: 8.0,
            depth_max: 2.0,
            block_resolution: 16,
            block_count: 50_000,
            frame_interval: 5,
            camera: CameraSelection::Left,
            use_confidence_filtered_depth: true,
            confidence_threshold: 0.05,
            activation_stride: 4,
            max_weight: 100.0,
            observation_weight: 1.0,
            quaternion_order: QuaternionOrder::Wxyz,
            min_focal_length: 300.0,
        }
    }
}

impl ReconstructionParams {
    pub fn tsdf_config(&self) -> TsdfConfig {
        TsdfConfig {
            voxel_size: self.voxel_size,
            trunc_voxel_multiplier: self.trunc_voxel_multiplier,
            block_resolution: self.block_resolution,
            block_count: self.block_count,
            depth_max: self.depth_max,
            max_weight: self.max_weight,
            observation_weight: self.observation_weight,
            activation_stride: self.activation_stride,
        }
    }

    /// Confidence threshold, if confidence filtering is enabled.
    pub fn confidence_filter(&self) -> Option<f32> {
        self.use_confidence_filtered_depth
            .then_some(self.confidence_threshold)
    }
}

/// Mesh post-processing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingParams {
    /// Run outlier removal, smoothing and decimation
    pub enable: bool,
    /// Laplacian smoothing iterations (0 disables)
    pub smoothing_iterations: u32,
    /// Keep open-boundary vertices in place while smoothing
    pub smoothing_fix_boundary: bool,
    /// Triangle budget for quadric decimation (0 disables)
    pub decimation_target_triangles: usize,
    /// Drop small disconnected components
    pub remove_outliers: bool,
    /// Components with fewer triangles are removed
    pub min_cluster_triangles: usize,
}

impl Default for PostProcessingParams {
    fn default() -> Self {
        Self {
            enable: true,
            smoothing_iterations: 5,
            smoothing_fix_boundary: false,
            decimation_target_triangles: 100_000,
            remove_outliers: true,
            min_cluster_triangles: 20,
        }
    }
}

/// Mesh export parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    pub format: MeshFormat,
    /// Write the mesh file after a completed run
    pub save_mesh: bool,
    /// Write `mesh_metadata.json` next to the mesh
    pub save_metadata: bool,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            format: MeshFormat::Obj,
            save_mesh: true,
            save_metadata: true,
        }
    }
}
