//! Reconstruction pipeline orchestrator
//!
//! Drives one reconstruction run end to end:
//!
//! ```text
//! frames ──> pose ──> linearize ──> filter ──> integrate ──> extract ──> post-process ──> export
//! ```
//!
//! Frames are integrated strictly in order on the calling thread. Per-camera
//! failures are counted and skipped; running out of voxel blocks aborts.
//! Cancellation is polled once per frame.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::config::{ConfigError, FusionConfig};
use crate::core::{CameraId, CameraSelection, Frame, PoseError, PoseResolver};
use crate::depth::{DepthFilter, DepthLinearizer};
use crate::fusion::{
    export_mesh, export_mesh_metadata, extract_mesh, GridError, Mesh, MeshIoError, MeshMetadata,
    MeshMetadataError, MeshPostProcessor, MeshTimings, Observation, PostProcessStats, TsdfVolume,
};
use crate::io::{DatasetError, FrameSource};

/// Lifecycle of a reconstruction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which frames and cameras to integrate.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub start_frame: usize,
    /// Last frame to integrate, inclusive. `None` runs to the end.
    pub end_frame: Option<usize>,
    /// Integrate every n-th frame; 0 is treated as 1.
    pub frame_interval: usize,
    pub camera: CameraSelection,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            start_frame: 0,
            end_frame: None,
            frame_interval: 1,
            camera: CameraSelection::Left,
        }
    }
}

impl RunRequest {
    /// Request derived from the reconstruction section of a config.
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            frame_interval: config.reconstruction.frame_interval,
            camera: config.reconstruction.camera,
            ..Self::default()
        }
    }

    /// Frame positions selected out of `frame_count` frames.
    pub fn frame_indices(&self, frame_count: usize) -> Vec<usize> {
        if frame_count == 0 {
            return Vec::new();
        }
        let last = self
            .end_frame
            .map_or(frame_count - 1, |end| end.min(frame_count - 1));
        if self.start_frame > last {
            return Vec::new();
        }
        (self.start_frame..=last)
            .step_by(self.frame_interval.max(1))
            .collect()
    }
}

/// Cooperative cancellation, polled once per frame.
pub trait CancelCheck: Sync {
    fn is_cancelled(&self) -> bool;
}

impl<F> CancelCheck for F
where
    F: Fn() -> bool + Sync,
{
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl CancelCheck for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Notifications emitted while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Overall progress in percent; never decreases within a run.
    Progress(u8),
    Log(String),
    /// Position of the frame just integrated.
    FramePreview(usize),
    State(RunState),
}

/// Why a single camera view was skipped.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("input missing: {0}")]
    InputMissing(#[from] DatasetError),
    #[error("invalid pose: {0}")]
    InvalidPose(#[from] PoseError),
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("voxel grid full at frame {frame}: {source}")]
    GridCapacityExceeded { frame: usize, source: GridError },
    #[error("reconstruction was cancelled")]
    Cancelled,
    #[error("failed to export mesh: {0}")]
    MeshExport(#[from] MeshIoError),
    #[error("failed to export mesh metadata: {0}")]
    MetadataExport(#[from] MeshMetadataError),
    #[error("reconstruction worker panicked")]
    WorkerPanicked,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct ReconstructionReport {
    pub state: RunState,
    /// Final mesh; `None` when cancelled.
    pub mesh: Option<Mesh>,
    /// Frames with at least one camera view that did not fail.
    pub processed_frames: usize,
    /// Camera views skipped because of missing input or an invalid pose.
    pub failed_frames: usize,
    /// Camera views integrated into the volume.
    pub integrated_views: usize,
    pub allocated_blocks: usize,
    /// Voxels carrying a non-zero weight after integration.
    pub observed_voxels: usize,
    pub export_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub timings: MeshTimings,
    pub post_process: Option<PostProcessStats>,
}

impl ReconstructionReport {
    fn new(state: RunState) -> Self {
        Self {
            state,
            mesh: None,
            processed_frames: 0,
            failed_frames: 0,
            integrated_views: 0,
            allocated_blocks: 0,
            observed_voxels: 0,
            export_path: None,
            metadata_path: None,
            timings: MeshTimings::default(),
            post_process: None,
        }
    }
}

/// Forwards progress to an optional channel and keeps it monotonic.
struct EventSink<'a> {
    sender: Option<&'a Sender<PipelineEvent>>,
    progress: u8,
}

impl<'a> EventSink<'a> {
    fn new(sender: Option<&'a Sender<PipelineEvent>>) -> Self {
        Self { sender, progress: 0 }
    }

    fn send(&self, event: PipelineEvent) {
        if let Some(sender) = self.sender {
            // A dropped receiver only means nobody is listening.
            let _ = sender.send(event);
        }
    }

    fn progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            self.send(PipelineEvent::Progress(percent));
        }
    }

    fn info(&self, message: String) {
        log::info!("{}", message);
        self.send(PipelineEvent::Log(message));
    }

    fn warn(&self, message: String) {
        log::warn!("{}", message);
        self.send(PipelineEvent::Log(message));
    }

    fn state(&self, state: RunState) {
        self.send(PipelineEvent::State(state));
    }
}

/// Share of the progress bar spent integrating frames.
const INTEGRATION_PROGRESS: usize = 90;

/// Runs reconstructions with a fixed configuration.
pub struct Orchestrator {
    config: FusionConfig,
    output_dir: Option<PathBuf>,
    state: RunState,
}

impl Orchestrator {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            output_dir: None,
            state: RunState::Idle,
        }
    }

    /// Export the final mesh (and metadata) into `dir` when the run completes.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// State of the most recent run.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Integrate the requested frames and build the final mesh.
    pub fn run(
        &mut self,
        source: &dyn FrameSource,
        request: &RunRequest,
        cancel: &dyn CancelCheck,
        events: Option<&Sender<PipelineEvent>>,
    ) -> Result<ReconstructionReport, ReconstructionError> {
        let mut sink = EventSink::new(events);
        self.state = RunState::Running;
        sink.state(RunState::Running);

        let result = self
            .config
            .validate()
            .map_err(ReconstructionError::from)
            .and_then(|()| self.run_inner(source, request, cancel, &mut sink));
        self.state = match &result {
            Ok(report) => report.state,
            Err(_) => RunState::Failed,
        };
        if let Err(e) = &result {
            log::error!("Reconstruction failed: {}", e);
            sink.send(PipelineEvent::Log(format!("Reconstruction failed: {e}")));
        }
        sink.state(self.state);
        result
    }

    fn run_inner(
        &self,
        source: &dyn FrameSource,
        request: &RunRequest,
        cancel: &dyn CancelCheck,
        sink: &mut EventSink<'_>,
    ) -> Result<ReconstructionReport, ReconstructionError> {
        let params = &self.config.reconstruction;
        let tsdf_config = params.tsdf_config();
        let mut volume = TsdfVolume::new(tsdf_config.clone());
        let resolver = PoseResolver::new(params.quaternion_order);
        let linearizer = DepthLinearizer::new(params.min_focal_length);
        let filter = DepthFilter::new(params.depth_max, params.confidence_filter());

        let indices = request.frame_indices(source.len());
        let cameras = request.camera.cameras();
        sink.info(format!(
            "Integrating {} of {} frames ({:?} camera, voxel {:.3} m)",
            indices.len(),
            source.len(),
            request.camera,
            tsdf_config.voxel_size
        ));

        let mut report = ReconstructionReport::new(RunState::Running);
        let fusion_start = Instant::now();

        for (n, &i) in indices.iter().enumerate() {
            if cancel.is_cancelled() {
                sink.info(format!(
                    "Cancelled after {} of {} frames",
                    report.processed_frames,
                    indices.len()
                ));
                report.state = RunState::Cancelled;
                report.allocated_blocks = volume.num_blocks();
                report.observed_voxels = volume.num_observed_voxels();
                report.timings.tsdf_fusion_ms = elapsed_ms(fusion_start);
                return Ok(report);
            }

            let frame = &source.frames()[i];
            let mut usable = false;
            for &camera in cameras {
                match self.integrate_camera(source, frame, camera, &resolver, &linearizer, &filter, &mut volume) {
                    Ok(integrated) => {
                        usable = true;
                        if integrated {
                            report.integrated_views += 1;
                        }
                    }
                    Err(ViewError::Skipped(e)) => {
                        report.failed_frames += 1;
                        sink.warn(format!(
                            "Skipping frame {} ({} camera): {}",
                            frame.index, camera, e
                        ));
                    }
                    Err(ViewError::Grid(source)) => {
                        return Err(ReconstructionError::GridCapacityExceeded {
                            frame: frame.index,
                            source,
                        });
                    }
                }
            }

            if usable {
                report.processed_frames += 1;
            }
            sink.send(PipelineEvent::FramePreview(i));
            sink.progress(((n + 1) * INTEGRATION_PROGRESS / indices.len()) as u8);
        }

        report.timings.tsdf_fusion_ms = elapsed_ms(fusion_start);
        report.allocated_blocks = volume.num_blocks();
        report.observed_voxels = volume.num_observed_voxels();
        sink.info(format!(
            "Integrated {} views from {} frames ({} skipped), {} blocks allocated, {} voxels observed",
            report.integrated_views,
            report.processed_frames,
            report.failed_frames,
            report.allocated_blocks,
            report.observed_voxels
        ));
        sink.progress(INTEGRATION_PROGRESS as u8);

        let extraction_start = Instant::now();
        let raw_mesh = extract_mesh(volume.grid());
        report.timings.mesh_extraction_ms = elapsed_ms(extraction_start);
        sink.info(format!(
            "Extracted {} vertices, {} triangles",
            raw_mesh.vertex_count(),
            raw_mesh.triangle_count()
        ));
        sink.progress(95);

        let post_start = Instant::now();
        let (mesh, stats) = MeshPostProcessor::new(self.config.post_processing.clone()).process(raw_mesh);
        report.timings.post_process_ms = elapsed_ms(post_start);
        sink.info(format!(
            "Final mesh: {} vertices, {} triangles",
            mesh.vertex_count(),
            mesh.triangle_count()
        ));

        if let Some(dir) = &self.output_dir {
            let export = &self.config.export;
            if export.save_mesh {
                let path = export_mesh(dir, &mesh, export.format)?;
                report.export_path = Some(path);
            }
            if export.save_metadata {
                let metadata = MeshMetadata::new(
                    &mesh,
                    &tsdf_config,
                    report.allocated_blocks,
                    report.observed_voxels,
                    report.integrated_views,
                    stats.isolated_triangle_percentage,
                    report.timings.clone(),
                );
                let path = export_mesh_metadata(dir, &metadata)?;
                log::info!("Saved mesh metadata to {}", path.display());
                report.metadata_path = Some(path);
            }
        }

        report.mesh = Some(mesh);
        report.post_process = Some(stats);
        report.state = RunState::Completed;
        sink.progress(100);
        Ok(report)
    }

    /// Integrate one camera of one frame. `Ok(false)` means the view had no
    /// usable depth.
    #[allow(clippy::too_many_arguments)]
    fn integrate_camera(
        &self,
        source: &dyn FrameSource,
        frame: &Frame,
        camera: CameraId,
        resolver: &PoseResolver,
        linearizer: &DepthLinearizer,
        filter: &DepthFilter,
        volume: &mut TsdfVolume,
    ) -> Result<bool, ViewError> {
        let rig = source.rig().entry(camera);
        let pose = resolver.resolve(&frame.head, rig).map_err(FrameError::from)?;
        let capture = source.load_camera(frame, camera).map_err(FrameError::from)?;

        let mut depth = linearizer.linearize(&capture.depth, capture.calibration.as_ref());
        let filtered = filter.apply(&mut depth, capture.confidence.as_deref());
        log::debug!(
            "Frame {} ({}): {} valid, {} out of range, {} missing",
            frame.index,
            camera,
            filtered.valid,
            filtered.out_of_range,
            filtered.missing
        );
        if filtered.valid == 0 {
            return Ok(false);
        }

        let color = &capture.color;
        let depth = if (depth.width, depth.height) != (color.width, color.height) {
            depth.resize_nearest(color.width, color.height)
        } else {
            depth
        };

        let intrinsics = capture
            .calibration
            .as_ref()
            .and_then(|calib| {
                linearizer.intrinsics(calib).map(|k| {
                    k.scaled(
                        color.width as f32 / calib.width as f32,
                        color.height as f32 / calib.height as f32,
                    )
                })
            })
            .filter(|k| k.is_valid())
            .unwrap_or(rig.intrinsics);

        let observation = Observation {
            depth: &depth,
            color: Some(color),
            intrinsics,
        };
        let stats = volume.integrate(&observation, &pose).map_err(ViewError::Grid)?;
        log::debug!(
            "Frame {} ({}): {} blocks touched, {} new, {} voxels updated",
            frame.index,
            camera,
            stats.touched_blocks,
            stats.new_blocks,
            stats.updated_voxels
        );
        Ok(true)
    }
}

enum ViewError {
    Skipped(FrameError),
    Grid(GridError),
}

impl From<FrameError> for ViewError {
    fn from(e: FrameError) -> Self {
        ViewError::Skipped(e)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
