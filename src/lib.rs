//! # questfusion
//!
//! Volumetric TSDF fusion of headset RGB-D captures into colored triangle
//! meshes.
//!
//! ## Overview
//!
//! - Head poses and rig offsets resolved into camera poses
//! - Non-linear depth buffers decoded into metric depth
//! - Sparse block-hashed TSDF volume with parallel integration
//! - Isosurface extraction, outlier removal, smoothing and decimation
//! - OBJ / PLY / STL export with JSON metadata
//!
//! ## Example
//!
//! ```rust
//! use questfusion::pipeline::{CancelToken, Orchestrator, RunRequest, RunState};
//! use questfusion::test_utils::{planar_source, small_fusion_config};
//!
//! let source = planar_source(2, 1.0);
//! let mut orchestrator = Orchestrator::new(small_fusion_config());
//! let report = orchestrator
//!     .run(&source, &RunRequest::default(), &CancelToken::new(), None)
//!     .unwrap();
//!
//! assert_eq!(report.state, RunState::Completed);
//! assert!(report.mesh.unwrap().triangle_count() > 0);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod depth;
pub mod fusion;
pub mod io;
pub mod pipeline;
pub mod test_utils;

pub use config::{ConfigLoader, FusionConfig};
pub use fusion::{Mesh, MeshFormat};
pub use io::{CaptureDirectory, FrameSource, InMemorySource};
pub use pipeline::{
    CancelToken, Orchestrator, PipelineEvent, ReconstructionError, ReconstructionReport,
    ReconstructionWorker, RunRequest, RunState,
};

// Re-export glam for convenience
pub use glam::Vec3;
