//! IO module for capture loading
//!
//! This module provides the frame-source interface, the headset capture
//! directory loader and its manifest, and color/depth decoders.

pub mod dataset;
pub mod image;
pub mod manifest;

pub use dataset::{
    nearest_descriptor, CaptureDirectory, DatasetError, DepthDescriptor, FrameSource,
    ImageFormatInfo, InMemorySource, Result,
};
pub use manifest::{build_manifest_from_export, FramesManifest};
