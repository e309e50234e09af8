//! Background reconstruction worker
//!
//! Runs an [`Orchestrator`] on a dedicated thread. The caller keeps a
//! [`ReconstructionHandle`] to observe events, request cancellation and
//! collect the report.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver};

use super::orchestrator::{
    CancelToken, Orchestrator, PipelineEvent, ReconstructionError, ReconstructionReport, RunRequest,
};
use crate::config::FusionConfig;
use crate::fusion::Mesh;
use crate::io::FrameSource;

/// Spawns reconstruction runs on their own thread.
pub struct ReconstructionWorker {
    config: FusionConfig,
    output_dir: Option<PathBuf>,
}

impl ReconstructionWorker {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Start a run over `source`. Each run owns its volume.
    pub fn spawn(self, source: Arc<dyn FrameSource>, request: RunRequest) -> ReconstructionHandle {
        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let mut orchestrator = Orchestrator::new(self.config);
        if let Some(dir) = self.output_dir {
            orchestrator = orchestrator.with_output_dir(dir);
        }

        let thread = thread::spawn(move || {
            log::debug!("Reconstruction worker started");
            let result = orchestrator.run(source.as_ref(), &request, &token, Some(&tx));
            log::debug!("Reconstruction worker finished");
            result
        });

        ReconstructionHandle {
            events: rx,
            cancel,
            thread: Some(thread),
        }
    }
}

/// Caller side of a running reconstruction.
pub struct ReconstructionHandle {
    events: Receiver<PipelineEvent>,
    cancel: CancelToken,
    thread: Option<thread::JoinHandle<Result<ReconstructionReport, ReconstructionError>>>,
}

impl ReconstructionHandle {
    /// Events in emission order. The channel closes when the run ends.
    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the run to stop before its next frame.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the run and return its report.
    pub fn join(mut self) -> Result<ReconstructionReport, ReconstructionError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ReconstructionError::WorkerPanicked)?,
            None => Err(ReconstructionError::WorkerPanicked),
        }
    }

    /// Wait for the run and return only the mesh; a cancelled run is an error.
    pub fn join_mesh(self) -> Result<Mesh, ReconstructionError> {
        self.join()?.mesh.ok_or(ReconstructionError::Cancelled)
    }
}

impl Drop for ReconstructionHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.cancel.cancel();
            if thread.join().is_err() {
                log::error!("Reconstruction worker panicked");
            }
        }
    }
}
