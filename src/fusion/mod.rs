//! Volumetric fusion
//!
//! - Sparse voxel-block hash grid
//! - Projective TSDF integration
//! - Isosurface extraction (marching tetrahedra)
//! - Mesh post-processing: outlier removal, smoothing, decimation, cleanup
//! - Mesh and metadata export

pub mod decimater;
pub mod isosurface;
pub mod mesh;
pub mod mesh_extractor;
pub mod mesh_io;
pub mod mesh_metadata;
pub mod smoother;
pub mod tsdf_volume;
pub mod voxel_grid;

pub use decimater::{DecimateConfig, DecimateResult, DecimateStats, Decimater};
pub use isosurface::{extract_mesh, sample_color};
pub use mesh::{Mesh, MeshTriangle, MeshVertex};
pub use mesh_extractor::{
    cleanup, filter_clusters, validate_topology, CleanupStats, ClusterStats, MeshPostProcessor,
    PostProcessStats, TopologyStats,
};
pub use mesh_io::{export_mesh, read_mesh, read_obj, read_ply, save_mesh, MeshFormat, MeshIoError};
pub use mesh_metadata::{
    export_mesh_metadata, BoundingBox, MeshMetadata, MeshMetadataError, MeshTimings, TsdfMetadata,
};
pub use smoother::{SmoothStats, Smoother, SmootherConfig};
pub use tsdf_volume::{IntegrationStats, Observation, TsdfConfig, TsdfVolume};
pub use voxel_grid::{BlockCoord, GridError, Voxel, VoxelBlock, VoxelHashGrid};
