//! Core data structures: cameras, frames and poses.

pub mod camera;
pub mod frame;
pub mod pose;

#[cfg(test)]
mod additional_tests;

pub use camera::{CameraId, CameraRig, CameraSelection, Intrinsics, RigEntry};
pub use frame::{
    CameraCapture, CameraRef, ColorImage, DepthCalibration, DepthImage, Frame, HeadPose,
};
pub use pose::{Pose, PoseError, PoseResolver, QuaternionOrder};
