//! Frame sources for reconstruction
//!
//! This module provides the [`FrameSource`] interface the pipeline pulls
//! frames through, a loader for headset capture directories, and an
//! in-memory source for programmatic use.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::image::{decode_raw_depth, load_color_image, load_depth_png, load_raw_depth, load_yuv420};
use super::manifest::{FramesManifest, MANIFEST_FILE};
use crate::core::{CameraCapture, CameraId, CameraRig, DepthCalibration, Frame};

/// Depth resolution assumed when no descriptor matches a frame.
pub const DEFAULT_DEPTH_SIZE: (usize, usize) = (320, 320);
/// Color resolution assumed when the image format file omits it.
pub const DEFAULT_IMAGE_SIZE: (usize, usize) = (640, 480);
/// Depth descriptors farther than this from the frame timestamp are ignored.
pub const DESCRIPTOR_MATCH_WINDOW_MS: i64 = 100;

/// Errors that can occur when loading captures
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Required file not found: {0}")]
    ManifestMissing(PathBuf),

    #[error("Invalid capture format: {0}")]
    Format(String),

    #[error("Image loading error: {0}")]
    Image(String),

    #[error("Frame {frame}, camera {camera}: missing {what}")]
    InputMissing {
        frame: usize,
        camera: CameraId,
        what: String,
    },
}

/// Result type for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Source of frames and per-camera captures for a reconstruction run.
pub trait FrameSource: Send + Sync {
    /// All frames, in capture order.
    fn frames(&self) -> &[Frame];

    /// Head-relative camera rig for this capture.
    fn rig(&self) -> &CameraRig;

    /// Decode one camera of one frame.
    fn load_camera(&self, frame: &Frame, camera: CameraId) -> Result<CameraCapture>;

    fn len(&self) -> usize {
        self.frames().len()
    }

    fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }
}

/// `<camera>_camera_image_format.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ImageFormatInfo {
    #[serde(default = "default_image_width")]
    pub width: usize,
    #[serde(default = "default_image_height")]
    pub height: usize,
    #[serde(default)]
    pub format: Option<String>,
}

fn default_image_width() -> usize {
    DEFAULT_IMAGE_SIZE.0
}

fn default_image_height() -> usize {
    DEFAULT_IMAGE_SIZE.1
}

/// One row of `<camera>_depth_descriptors.csv`.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthDescriptor {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub near_z: f32,
    pub far_z: f32,
    pub fov_left_angle_tangent: f32,
    pub fov_right_angle_tangent: f32,
    pub fov_top_angle_tangent: f32,
    pub fov_down_angle_tangent: f32,
}

impl DepthDescriptor {
    pub fn calibration(&self) -> DepthCalibration {
        DepthCalibration {
            near: self.near_z,
            far: self.far_z,
            fov_left: self.fov_left_angle_tangent,
            fov_right: self.fov_right_angle_tangent,
            fov_top: self.fov_top_angle_tangent,
            fov_down: self.fov_down_angle_tangent,
            width: self.width,
            height: self.height,
        }
    }
}

/// Nearest descriptor strictly within [`DESCRIPTOR_MATCH_WINDOW_MS`] of `timestamp`.
pub fn nearest_descriptor(descriptors: &[DepthDescriptor], timestamp: i64) -> Option<&DepthDescriptor> {
    descriptors
        .iter()
        .map(|d| ((d.timestamp_ms - timestamp).abs(), d))
        .filter(|(diff, _)| *diff < DESCRIPTOR_MATCH_WINDOW_MS)
        .min_by_key(|(diff, _)| *diff)
        .map(|(_, d)| d)
}

fn load_descriptors(path: &Path) -> Result<Vec<DepthDescriptor>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Headset capture directory
///
/// Layout:
/// - `frames.json`: frame list, head poses, per-camera file paths
/// - `<camera>_camera_image_format.json`: YUV image size
/// - `<camera>_depth_descriptors.csv`: per-timestamp depth calibration
/// - `.yuv` / `.png` / `.jpg` color and `.raw` / `.png` depth files
pub struct CaptureDirectory {
    root: PathBuf,
    frames: Vec<Frame>,
    rig: CameraRig,
    image_formats: BTreeMap<CameraId, ImageFormatInfo>,
    descriptors: BTreeMap<CameraId, Vec<DepthDescriptor>>,
}

impl CaptureDirectory {
    /// Open a capture. `base_rig` supplies defaults that the manifest's
    /// `camera_metadata` may override.
    pub fn open(root: impl AsRef<Path>, base_rig: &CameraRig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(DatasetError::ManifestMissing(manifest_path));
        }

        let manifest = FramesManifest::load(&manifest_path)?;
        let frames = manifest.to_frames();
        let rig = manifest.rig(base_rig);

        let mut image_formats = BTreeMap::new();
        let mut descriptors = BTreeMap::new();
        for camera in [CameraId::Left, CameraId::Right, CameraId::Color] {
            let format_path = root.join(format!("{camera}_camera_image_format.json"));
            if format_path.exists() {
                let info: ImageFormatInfo =
                    serde_json::from_reader(std::fs::File::open(&format_path)?)?;
                image_formats.insert(camera, info);
            }

            let csv_path = root.join(format!("{camera}_depth_descriptors.csv"));
            if csv_path.exists() {
                let rows = load_descriptors(&csv_path)?;
                log::debug!("{}: {} depth descriptors", csv_path.display(), rows.len());
                descriptors.insert(camera, rows);
            }
        }

        log::info!(
            "Opened capture {} ({} frames, source '{}')",
            root.display(),
            frames.len(),
            manifest.source
        );

        Ok(Self {
            root,
            frames,
            rig,
            image_formats,
            descriptors,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_format(&self, camera: CameraId) -> Option<&ImageFormatInfo> {
        self.image_formats.get(&camera)
    }

    /// Depth descriptor matching `frame` for `camera`, if any.
    pub fn descriptor(&self, frame: &Frame, camera: CameraId) -> Option<&DepthDescriptor> {
        self.descriptors
            .get(&camera)
            .and_then(|rows| nearest_descriptor(rows, frame.timestamp))
    }

    fn existing(&self, frame: &Frame, camera: CameraId, rel: Option<&str>, what: &str) -> Result<PathBuf> {
        let missing = || DatasetError::InputMissing {
            frame: frame.index,
            camera,
            what: what.to_string(),
        };
        let path = self.root.join(rel.ok_or_else(missing)?);
        if path.exists() {
            Ok(path)
        } else {
            Err(missing())
        }
    }
}

impl FrameSource for CaptureDirectory {
    fn frames(&self) -> &[Frame] {
        &self.frames
    }

    fn rig(&self) -> &CameraRig {
        &self.rig
    }

    fn load_camera(&self, frame: &Frame, camera: CameraId) -> Result<CameraCapture> {
        let reference = frame.camera(camera).ok_or_else(|| DatasetError::InputMissing {
            frame: frame.index,
            camera,
            what: "camera entry".to_string(),
        })?;

        let image_rel = reference.image.as_deref();
        let image_path = self.existing(frame, camera, image_rel, "image")?;
        let color = if extension(image_rel.unwrap_or_default()) == "yuv" {
            let info = self.image_format(camera).ok_or_else(|| DatasetError::InputMissing {
                frame: frame.index,
                camera,
                what: format!("{camera}_camera_image_format.json"),
            })?;
            load_yuv420(&image_path, info.width, info.height)?
        } else {
            load_color_image(&image_path)?
        };

        let depth_rel = reference.depth.as_deref();
        let depth_path = self.existing(frame, camera, depth_rel, "depth")?;
        let descriptor = self.descriptor(frame, camera);
        let (depth, calibration) = match extension(depth_rel.unwrap_or_default()).as_str() {
            "png" => (load_depth_png(&depth_path)?, None),
            _ => {
                let (w, h) = descriptor
                    .map(|d| (d.width as usize, d.height as usize))
                    .unwrap_or(DEFAULT_DEPTH_SIZE);
                (load_raw_depth(&depth_path, w, h)?, descriptor.map(DepthDescriptor::calibration))
            }
        };

        let confidence = match reference.confidence.as_deref() {
            Some(rel) => {
                let path = self.existing(frame, camera, Some(rel), "confidence")?;
                let bytes = std::fs::read(path)?;
                Some(decode_raw_depth(&bytes, depth.width, depth.height)?.data)
            }
            None => None,
        };

        Ok(CameraCapture {
            color,
            depth,
            confidence,
            calibration,
        })
    }
}

/// Frames and captures held in memory.
#[derive(Default)]
pub struct InMemorySource {
    frames: Vec<Frame>,
    rig: CameraRig,
    captures: HashMap<(usize, CameraId), CameraCapture>,
}

impl InMemorySource {
    pub fn new(rig: CameraRig) -> Self {
        Self {
            frames: Vec::new(),
            rig,
            captures: HashMap::new(),
        }
    }

    /// Append a frame; its `index` is reassigned to its position.
    pub fn push_frame(&mut self, mut frame: Frame, captures: Vec<(CameraId, CameraCapture)>) -> usize {
        let index = self.frames.len();
        frame.index = index;
        for (camera, capture) in captures {
            frame.cameras.entry(camera).or_default();
            self.captures.insert((index, camera), capture);
        }
        self.frames.push(frame);
        index
    }
}

impl FrameSource for InMemorySource {
    fn frames(&self) -> &[Frame] {
        &self.frames
    }

    fn rig(&self) -> &CameraRig {
        &self.rig
    }

    fn load_camera(&self, frame: &Frame, camera: CameraId) -> Result<CameraCapture> {
        self.captures
            .get(&(frame.index, camera))
            .cloned()
            .ok_or_else(|| DatasetError::InputMissing {
                frame: frame.index,
                camera,
                what: "capture".to_string(),
            })
    }
}
