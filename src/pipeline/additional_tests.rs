//! Tests for pipeline module (inline)

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crossbeam_channel::{bounded, Receiver, Sender};
    use tempfile::tempdir;

    use crate::core::{CameraCapture, CameraId, CameraRig, Frame};
    use crate::fusion::{read_mesh, MeshFormat};
    use crate::io::{DatasetError, FrameSource, InMemorySource};
    use crate::pipeline::{
        CancelToken, Orchestrator, PipelineEvent, ReconstructionError, ReconstructionWorker,
        RunRequest, RunState,
    };
    use crate::test_utils::{planar_source, small_fusion_config};

    /// Blocks loading of one frame until the gate opens, announcing arrival first.
    struct GatedSource {
        inner: InMemorySource,
        gated_frame: usize,
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl GatedSource {
        fn new(inner: InMemorySource, gated_frame: usize) -> (Self, Receiver<()>, Sender<()>) {
            let (entered_tx, entered_rx) = bounded(1);
            let (gate_tx, gate_rx) = bounded(1);
            let source = Self {
                inner,
                gated_frame,
                entered: entered_tx,
                gate: gate_rx,
            };
            (source, entered_rx, gate_tx)
        }
    }

    impl FrameSource for GatedSource {
        fn frames(&self) -> &[Frame] {
            self.inner.frames()
        }

        fn rig(&self) -> &CameraRig {
            self.inner.rig()
        }

        fn load_camera(&self, frame: &Frame, camera: CameraId) -> Result<CameraCapture, DatasetError> {
            if frame.index == self.gated_frame {
                let _ = self.entered.send(());
                let _ = self.gate.recv();
            }
            self.inner.load_camera(frame, camera)
        }
    }

    #[test]
    fn test_cancel_after_k_frames() {
        let source = planar_source(10, 1.0);
        let polls = AtomicUsize::new(0);
        let cancel_after = 4;
        let cancel = || polls.fetch_add(1, Ordering::SeqCst) >= cancel_after;

        let report = Orchestrator::new(small_fusion_config())
            .run(&source, &RunRequest::default(), &cancel, None)
            .unwrap();

        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.processed_frames, cancel_after);
        assert_eq!(report.integrated_views, cancel_after);
        assert!(report.mesh.is_none());
        assert!(report.allocated_blocks > 0);
    }

    #[test]
    fn test_frame_interval_and_range() {
        let source = planar_source(10, 1.0);
        let request = RunRequest {
            start_frame: 1,
            end_frame: Some(7),
            frame_interval: 2,
            ..RunRequest::default()
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let report = Orchestrator::new(small_fusion_config())
            .run(&source, &request, &CancelToken::new(), Some(&tx))
            .unwrap();
        drop(tx);

        assert_eq!(report.processed_frames, 4);
        let previews: Vec<usize> = rx
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::FramePreview(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(previews, vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_run_exports_mesh_and_metadata() {
        let dir = tempdir().unwrap();
        let source = planar_source(2, 1.0);
        let mut config = small_fusion_config();
        config.export.format = MeshFormat::Ply;

        let report = Orchestrator::new(config)
            .with_output_dir(dir.path())
            .run(&source, &RunRequest::default(), &CancelToken::new(), None)
            .unwrap();

        let mesh_path = report.export_path.clone().unwrap();
        assert_eq!(mesh_path, dir.path().join("mesh.ply"));
        let loaded = read_mesh(&mesh_path).unwrap();
        let mesh = report.mesh.unwrap();
        assert_eq!(loaded.vertex_count(), mesh.vertex_count());
        assert_eq!(loaded.triangle_count(), mesh.triangle_count());

        let metadata = std::fs::read_to_string(report.metadata_path.unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(json["viewpoint_count"], 2);
        assert_eq!(json["triangle_count"], mesh.triangle_count());
    }

    #[test]
    fn test_export_can_be_disabled() {
        let dir = tempdir().unwrap();
        let mut config = small_fusion_config();
        config.export.save_mesh = false;
        config.export.save_metadata = false;

        let report = Orchestrator::new(config)
            .with_output_dir(dir.path())
            .run(&planar_source(1, 1.0), &RunRequest::default(), &CancelToken::new(), None)
            .unwrap();
        assert!(report.export_path.is_none());
        assert!(report.metadata_path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_worker_completes() {
        let source: Arc<dyn FrameSource> = Arc::new(planar_source(3, 1.0));
        let handle = ReconstructionWorker::new(small_fusion_config()).spawn(source, RunRequest::default());

        let events: Vec<PipelineEvent> = handle.events().iter().collect();
        assert!(events.contains(&PipelineEvent::Progress(100)));
        assert_eq!(events.last(), Some(&PipelineEvent::State(RunState::Completed)));

        let mesh = handle.join_mesh().unwrap();
        assert!(mesh.triangle_count() > 0);
    }

    #[test]
    fn test_worker_rejects_invalid_config() {
        let mut config = small_fusion_config();
        config.reconstruction.voxel_size = 0.0;
        let source: Arc<dyn FrameSource> = Arc::new(planar_source(2, 1.0));
        let handle = ReconstructionWorker::new(config).spawn(source, RunRequest::default());

        let events: Vec<PipelineEvent> = handle.events().iter().collect();
        assert_eq!(events.last(), Some(&PipelineEvent::State(RunState::Failed)));
        assert!(matches!(handle.join(), Err(ReconstructionError::Config(_))));
    }

    #[test]
    fn test_worker_cancel_between_frames() {
        let (source, entered, gate_tx) = GatedSource::new(planar_source(8, 1.0), 2);
        let handle = ReconstructionWorker::new(small_fusion_config())
            .spawn(Arc::new(source), RunRequest::default());

        // Frame 2 has passed its cancellation poll and is waiting on the gate.
        entered.recv().unwrap();
        handle.cancel();
        gate_tx.send(()).unwrap();

        let report = handle.join().unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.processed_frames, 3);
        assert!(report.mesh.is_none());
    }

    #[test]
    fn test_worker_join_mesh_reports_cancellation() {
        let (source, _entered, gate_tx) = GatedSource::new(planar_source(4, 1.0), 0);
        let handle = ReconstructionWorker::new(small_fusion_config())
            .spawn(Arc::new(source), RunRequest::default());
        handle.cancel();
        gate_tx.send(()).unwrap();

        // Cancellation may land before frame 0 or right after it.
        assert!(matches!(handle.join_mesh(), Err(ReconstructionError::Cancelled)));
    }
}
