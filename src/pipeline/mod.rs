//! Reconstruction pipeline
//!
//! The [`Orchestrator`] runs a reconstruction on the calling thread; the
//! [`ReconstructionWorker`] runs one on a background thread.

pub mod orchestrator;
pub mod worker;

#[cfg(test)]
mod additional_tests;

pub use orchestrator::{
    CancelCheck, CancelToken, FrameError, Orchestrator, PipelineEvent, ReconstructionError,
    ReconstructionReport, RunRequest, RunState,
};
pub use worker::{ReconstructionHandle, ReconstructionWorker};
