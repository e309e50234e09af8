//! Camera identities, pinhole intrinsics and the head-mounted camera rig.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Physical camera on the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraId {
    Left,
    Right,
    Color,
}

impl CameraId {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraId::Left => "left",
            CameraId::Right => "right",
            CameraId::Color => "color",
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(CameraId::Left),
            "right" => Ok(CameraId::Right),
            "color" => Ok(CameraId::Color),
            other => Err(format!("unknown camera id: {other}")),
        }
    }
}

/// Which cameras a reconstruction run integrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSelection {
    Left,
    Right,
    Both,
    Color,
}

impl CameraSelection {
    /// Cameras to process for each frame, in integration order.
    pub fn cameras(self) -> &'static [CameraId] {
        match self {
            CameraSelection::Left => &[CameraId::Left],
            CameraSelection::Right => &[CameraId::Right],
            CameraSelection::Both => &[CameraId::Left, CameraId::Right],
            CameraSelection::Color => &[CameraId::Color],
        }
    }
}

impl Default for CameraSelection {
    fn default() -> Self {
        Self::Left
    }
}

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Rescale for an image resampled by `sx` horizontally and `sy` vertically.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
    }

    /// Project a camera-space point (Y down, Z forward) to pixel coordinates.
    #[inline]
    pub fn project(&self, x: f32, y: f32, z: f32) -> (f32, f32) {
        (self.fx * x / z + self.cx, self.fy * y / z + self.cy)
    }

    /// Back-project a pixel at depth `z` into camera space.
    #[inline]
    pub fn unproject(&self, u: f32, v: f32, z: f32) -> glam::Vec3 {
        glam::Vec3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self {
            fx: 867.0,
            fy: 867.0,
            cx: 640.0,
            cy: 640.0,
        }
    }
}

/// Rigid offset of one camera relative to the head, in the source convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigEntry {
    /// Translation from the head origin (meters).
    pub translation: [f64; 3],
    /// Rotation relative to the head in the configured component order;
    /// `None` means the camera is aligned with the head.
    pub rotation: Option<Vec<f64>>,
    /// Intrinsics used when a frame carries no usable depth calibration.
    pub intrinsics: Intrinsics,
}

impl RigEntry {
    /// Default head-relative placement (roughly a 64 mm IPD).
    pub fn default_for(camera: CameraId) -> Self {
        let x = match camera {
            CameraId::Left => -0.032,
            CameraId::Right => 0.032,
            CameraId::Color => 0.0,
        };
        Self {
            translation: [x, 0.0, 0.0],
            rotation: None,
            intrinsics: Intrinsics::default(),
        }
    }
}

impl Default for RigEntry {
    fn default() -> Self {
        Self::default_for(CameraId::Color)
    }
}

/// Per-session camera rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraRig {
    pub left: RigEntry,
    pub right: RigEntry,
    pub color: RigEntry,
}

impl CameraRig {
    pub fn entry(&self, camera: CameraId) -> &RigEntry {
        match camera {
            CameraId::Left => &self.left,
            CameraId::Right => &self.right,
            CameraId::Color => &self.color,
        }
    }

    pub fn entry_mut(&mut self, camera: CameraId) -> &mut RigEntry {
        match camera {
            CameraId::Left => &mut self.left,
            CameraId::Right => &mut self.right,
            CameraId::Color => &mut self.color,
        }
    }
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            left: RigEntry::default_for(CameraId::Left),
            right: RigEntry::default_for(CameraId::Right),
            color: RigEntry::default_for(CameraId::Color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_id_parse() {
        assert_eq!("LEFT".parse::<CameraId>().unwrap(), CameraId::Left);
        assert_eq!("color".parse::<CameraId>().unwrap(), CameraId::Color);
        assert!("middle".parse::<CameraId>().is_err());
    }

    #[test]
    fn test_selection_both_is_left_then_right() {
        assert_eq!(CameraSelection::Both.cameras(), &[CameraId::Left, CameraId::Right]);
    }

    #[test]
    fn test_project_unproject() {
        let k = Intrinsics::new(500.0, 400.0, 320.0, 240.0);
        let p = k.unproject(100.0, 50.0, 2.0);
        let (u, v) = k.project(p.x, p.y, p.z);
        assert!((u - 100.0).abs() < 1e-4);
        assert!((v - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_default_rig_offsets() {
        let rig = CameraRig::default();
        assert_eq!(rig.entry(CameraId::Left).translation[0], -0.032);
        assert_eq!(rig.entry(CameraId::Right).translation[0], 0.032);
    }
}
