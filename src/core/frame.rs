//! Frame records and decoded per-camera image buffers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::camera::CameraId;

/// Head pose as delivered by the tracking stream (left-handed, Y-up).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    /// Head position in meters.
    pub position: [f64; 3],
    /// Raw quaternion components; order and length are validated by the resolver.
    pub rotation: Vec<f64>,
}

impl HeadPose {
    pub fn new(position: [f64; 3], rotation: Vec<f64>) -> Self {
        Self { position, rotation }
    }

    /// Identity orientation at `position`, in `[w, x, y, z]` order.
    pub fn at(position: [f64; 3]) -> Self {
        Self::new(position, vec![1.0, 0.0, 0.0, 0.0])
    }
}

/// Files captured by one camera for one frame, relative to the capture root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraRef {
    pub image: Option<String>,
    #[serde(default)]
    pub depth: Option<String>,
    /// Per-pixel confidence in `[0, 1]`, raw `f32` at the depth resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

impl CameraRef {
    pub fn new(image: impl Into<String>, depth: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            depth: Some(depth.into()),
            confidence: None,
        }
    }
}

/// Immutable per-capture record.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position of the frame within its capture.
    pub index: usize,
    /// Capture timestamp in milliseconds.
    pub timestamp: i64,
    pub head: HeadPose,
    pub cameras: BTreeMap<CameraId, CameraRef>,
}

impl Frame {
    pub fn new(index: usize, timestamp: i64, head: HeadPose) -> Self {
        Self {
            index,
            timestamp,
            head,
            cameras: BTreeMap::new(),
        }
    }

    pub fn with_camera(mut self, camera: CameraId, reference: CameraRef) -> Self {
        self.cameras.insert(camera, reference);
        self
    }

    pub fn camera(&self, camera: CameraId) -> Option<&CameraRef> {
        self.cameras.get(&camera)
    }
}

/// Per-frame depth calibration reported by the depth provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthCalibration {
    pub near: f32,
    pub far: f32,
    pub fov_left: f32,
    pub fov_right: f32,
    pub fov_top: f32,
    pub fov_down: f32,
    pub width: u32,
    pub height: u32,
}

/// 8-bit RGB image, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl ColorImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width * height * 3);
        Self { width, height, data }
    }

    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            data.extend_from_slice(&rgb);
        }
        Self { width, height, data }
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Single-channel float depth buffer; 0 marks "no data".
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl DepthImage {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { width, height, data }
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Nearest-neighbour resample; never blends valid and missing samples.
    pub fn resize_nearest(&self, width: usize, height: usize) -> DepthImage {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            let sy = ((y as f32 + 0.5) * self.height as f32 / height as f32) as usize;
            let sy = sy.min(self.height.saturating_sub(1));
            for x in 0..width {
                let sx = ((x as f32 + 0.5) * self.width as f32 / width as f32) as usize;
                let sx = sx.min(self.width.saturating_sub(1));
                data.push(self.data[sy * self.width + sx]);
            }
        }
        DepthImage { width, height, data }
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|d| **d > 0.0).count()
    }
}

/// Decoded inputs for one camera of one frame.
#[derive(Debug, Clone)]
pub struct CameraCapture {
    pub color: ColorImage,
    /// Depth as captured (possibly non-linear).
    pub depth: DepthImage,
    /// Optional per-pixel confidence in `[0, 1]`, same shape as `depth`.
    pub confidence: Option<Vec<f32>>,
    pub calibration: Option<DepthCalibration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_nearest_preserves_no_data() {
        let depth = DepthImage::new(2, 2, vec![0.0, 1.0, 2.0, 0.0]);
        let up = depth.resize_nearest(4, 4);
        assert_eq!(up.get(0, 0), 0.0);
        assert_eq!(up.get(3, 0), 1.0);
        assert_eq!(up.get(0, 3), 2.0);
        assert_eq!(up.get(3, 3), 0.0);
        assert_eq!(up.valid_count(), 8);
    }

    #[test]
    fn test_color_pixel_lookup() {
        let img = ColorImage::filled(3, 2, [10, 20, 30]);
        assert_eq!(img.pixel(2, 1), [10, 20, 30]);
    }
}
