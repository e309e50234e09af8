//! `frames.json` capture manifest
//!
//! The manifest lists every frame of a capture with its head pose and the
//! per-camera files, plus optional per-camera metadata that overrides the
//! configured rig. [`build_manifest_from_export`] produces it from a raw
//! headset export (`hmd_poses.csv` and per-camera image folders).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::dataset::{DatasetError, Result};
use crate::core::{CameraId, CameraRef, CameraRig, Frame, HeadPose};

pub const MANIFEST_FILE: &str = "frames.json";
pub const POSES_FILE: &str = "hmd_poses.csv";

/// Top-level manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FramesManifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub source: String,
    /// Raw per-camera metadata, keyed by camera name.
    #[serde(default)]
    pub camera_metadata: BTreeMap<String, serde_json::Value>,
    pub frames: Vec<FrameRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_id: usize,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub pose: PoseRecord,
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseRecord {
    pub position: [f64; 3],
    pub rotation: Vec<f64>,
}

/// Rig overrides recognized inside `camera_metadata.<camera>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraMetadata {
    #[serde(default)]
    pub intrinsics: Option<IntrinsicsOverride>,
    #[serde(default)]
    pub translation: Option<[f64; 3]>,
    #[serde(default)]
    pub rotation_quat: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntrinsicsOverride {
    pub fx: Option<f32>,
    pub fy: Option<f32>,
    pub cx: Option<f32>,
    pub cy: Option<f32>,
}

impl FramesManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Frames in manifest order; `index` is the position in the list.
    pub fn to_frames(&self) -> Vec<Frame> {
        self.frames
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let head = HeadPose::new(record.pose.position, record.pose.rotation.clone());
                let mut frame = Frame::new(index, record.timestamp, head);
                for (name, reference) in &record.cameras {
                    match name.parse::<CameraId>() {
                        Ok(id) => frame.cameras.insert(id, reference.clone()),
                        Err(_) => {
                            log::debug!("frame {}: ignoring camera entry '{}'", record.frame_id, name);
                            None
                        }
                    };
                }
                frame
            })
            .collect()
    }

    /// Apply `camera_metadata` overrides on top of `base`.
    pub fn rig(&self, base: &CameraRig) -> CameraRig {
        let mut rig = base.clone();
        for (name, value) in &self.camera_metadata {
            let Ok(id) = name.parse::<CameraId>() else {
                continue;
            };
            let meta: CameraMetadata = match serde_json::from_value(value.clone()) {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!("ignoring unreadable camera_metadata.{name}: {e}");
                    continue;
                }
            };

            let entry = rig.entry_mut(id);
            if let Some(intr) = meta.intrinsics {
                entry.intrinsics.fx = intr.fx.unwrap_or(entry.intrinsics.fx);
                entry.intrinsics.fy = intr.fy.unwrap_or(entry.intrinsics.fy);
                entry.intrinsics.cx = intr.cx.unwrap_or(entry.intrinsics.cx);
                entry.intrinsics.cy = intr.cy.unwrap_or(entry.intrinsics.cy);
            }
            if let Some(t) = meta.translation {
                entry.translation = t;
            }
            if let Some(q) = meta.rotation_quat {
                entry.rotation = Some(q);
            }
        }
        rig
    }
}

/// One row of `hmd_poses.csv`.
#[derive(Debug, Clone, Deserialize)]
struct HmdPoseRow {
    unix_time: i64,
    pos_x: f64,
    pos_y: f64,
    pos_z: f64,
    rot_w: f64,
    rot_x: f64,
    rot_y: f64,
    rot_z: f64,
}

fn sorted_files(dir: &Path, extension: &str) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Write `frames.json` for a raw headset export and return its path.
///
/// Poses come from `hmd_poses.csv` (rotation stored `w, x, y, z`); images
/// and depth maps are paired with poses by sorted file order. The frame
/// count is bounded by the shorter of the pose list and the left images.
pub fn build_manifest_from_export(root: &Path) -> Result<PathBuf> {
    let poses_path = root.join(POSES_FILE);
    if !poses_path.exists() {
        return Err(DatasetError::ManifestMissing(poses_path));
    }

    let mut reader = csv::Reader::from_path(&poses_path)?;
    let poses = reader
        .deserialize()
        .collect::<std::result::Result<Vec<HmdPoseRow>, _>>()?;

    let mut camera_metadata = BTreeMap::new();
    for camera in ["left", "right"] {
        let path = root.join(format!("{camera}_camera_characteristics.json"));
        if path.exists() {
            let value: serde_json::Value = serde_json::from_reader(File::open(&path)?)?;
            camera_metadata.insert(camera.to_string(), value);
        }
    }

    let left_images = sorted_files(&root.join("left_camera_raw"), "yuv")?;
    let right_images = sorted_files(&root.join("right_camera_raw"), "yuv")?;
    let left_depth = sorted_files(&root.join("left_depth"), "raw")?;
    let right_depth = sorted_files(&root.join("right_depth"), "raw")?;

    let count = left_images.len().min(poses.len());
    let frames = (0..count)
        .map(|i| {
            let pose = &poses[i];
            let mut cameras = BTreeMap::new();
            cameras.insert(
                "left".to_string(),
                CameraRef {
                    image: Some(format!("left_camera_raw/{}", left_images[i])),
                    depth: left_depth.get(i).map(|d| format!("left_depth/{d}")),
                    confidence: None,
                },
            );
            cameras.insert(
                "right".to_string(),
                CameraRef {
                    image: right_images.get(i).map(|f| format!("right_camera_raw/{f}")),
                    depth: right_depth.get(i).map(|d| format!("right_depth/{d}")),
                    confidence: None,
                },
            );
            FrameRecord {
                frame_id: i,
                timestamp: pose.unix_time,
                pose: PoseRecord {
                    position: [pose.pos_x, pose.pos_y, pose.pos_z],
                    rotation: vec![pose.rot_w, pose.rot_x, pose.rot_y, pose.rot_z],
                },
                cameras,
            }
        })
        .collect();

    let manifest = FramesManifest {
        version: "1.0".to_string(),
        source: "Quest 3".to_string(),
        camera_metadata,
        frames,
    };

    let path = root.join(MANIFEST_FILE);
    manifest.save(&path)?;
    log::info!("Wrote {} frames to {}", count, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"{
        "version": "1.0",
        "source": "Quest 3",
        "camera_metadata": {
            "left": { "intrinsics": { "fx": 500.0, "cx": 320.0 }, "translation": [-0.03, 0.01, 0.0] },
            "right": { "lens": "unknown" },
            "tracking": { "fx": 1 }
        },
        "frames": [
            { "frame_id": 0, "timestamp": 1000, "pose": { "position": [0, 1, 2], "rotation": [1, 0, 0, 0] },
              "cameras": { "left": { "image": "l/0.yuv", "depth": "ld/0.raw" }, "right": { "image": null, "depth": null } } },
            { "frame_id": 1, "timestamp": 1033, "pose": { "position": [0, 1, 2], "rotation": [1, 0, 0, 0] },
              "cameras": { "left": { "image": "l/1.yuv" }, "thermal": { "image": "t/1.png" } } }
        ]
    }"#;

    #[test]
    fn test_manifest_frames() {
        let manifest: FramesManifest = serde_json::from_str(MANIFEST).unwrap();
        let frames = manifest.to_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index, 1);
        assert_eq!(frames[1].timestamp, 1033);
        assert_eq!(frames[0].head.position, [0.0, 1.0, 2.0]);

        let left = frames[0].camera(CameraId::Left).unwrap();
        assert_eq!(left.depth.as_deref(), Some("ld/0.raw"));
        assert!(frames[0].camera(CameraId::Right).unwrap().image.is_none());
        assert!(frames[1].camera(CameraId::Left).unwrap().depth.is_none());
        assert_eq!(frames[1].cameras.len(), 1);
    }

    #[test]
    fn test_manifest_rig_overrides() {
        let manifest: FramesManifest = serde_json::from_str(MANIFEST).unwrap();
        let base = CameraRig::default();
        let rig = manifest.rig(&base);

        assert_eq!(rig.left.intrinsics.fx, 500.0);
        assert_eq!(rig.left.intrinsics.fy, base.left.intrinsics.fy);
        assert_eq!(rig.left.intrinsics.cx, 320.0);
        assert_eq!(rig.left.translation, [-0.03, 0.01, 0.0]);
        assert_eq!(rig.right, base.right);
    }

    #[test]
    fn test_manifest_requires_frames() {
        let err = serde_json::from_str::<FramesManifest>(r#"{ "version": "1.0" }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_build_manifest_from_export() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join(POSES_FILE),
            "unix_time,pos_x,pos_y,pos_z,rot_w,rot_x,rot_y,rot_z\n\
             100,0.0,1.6,0.0,1.0,0.0,0.0,0.0\n\
             133,0.1,1.6,0.0,1.0,0.0,0.0,0.0\n\
             166,0.2,1.6,0.0,1.0,0.0,0.0,0.0\n",
        )
        .unwrap();
        for (dir_name, ext, n) in [("left_camera_raw", "yuv", 2), ("left_depth", "raw", 1)] {
            std::fs::create_dir(root.join(dir_name)).unwrap();
            for i in 0..n {
                std::fs::write(root.join(dir_name).join(format!("{i:04}.{ext}")), b"").unwrap();
            }
        }
        std::fs::write(root.join("left_camera_characteristics.json"), r#"{"intrinsics": {"fx": 450.0}}"#).unwrap();

        let path = build_manifest_from_export(root).unwrap();
        let manifest = FramesManifest::load(&path).unwrap();

        assert_eq!(manifest.frames.len(), 2);
        assert_eq!(manifest.frames[1].timestamp, 133);
        assert_eq!(manifest.frames[1].pose.rotation, vec![1.0, 0.0, 0.0, 0.0]);
        let left = &manifest.frames[1].cameras["left"];
        assert_eq!(left.image.as_deref(), Some("left_camera_raw/0001.yuv"));
        assert!(left.depth.is_none());
        assert!(manifest.frames[0].cameras["right"].image.is_none());
        assert_eq!(manifest.rig(&CameraRig::default()).left.intrinsics.fx, 450.0);
    }

    #[test]
    fn test_build_manifest_requires_poses() {
        let dir = tempdir().unwrap();
        let err = build_manifest_from_export(dir.path()).unwrap_err();
        assert!(matches!(err, DatasetError::ManifestMissing(_)));
    }
}
