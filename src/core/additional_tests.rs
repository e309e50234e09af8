//! Tests for core module (inline)

#[cfg(test)]
mod tests {
    use crate::core::{CameraId, CameraRig, HeadPose, PoseResolver, QuaternionOrder};
    use glam::{DVec3, Vec3};

    #[test]
    fn test_camera_axis_looks_forward_from_head() {
        // With an identity head and rig, the camera's +Z (forward) maps to
        // world -Z after the convention flip and the rig's half turn.
        let resolver = PoseResolver::new(QuaternionOrder::Wxyz);
        let rig = CameraRig::default();
        let pose = resolver
            .resolve(&HeadPose::at([0.0, 1.6, 0.0]), rig.entry(CameraId::Color))
            .unwrap();
        let forward = pose.rotation() * DVec3::Z;
        assert!((forward - DVec3::new(0.0, 0.0, -1.0)).length() < 1e-12);
    }

    #[test]
    fn test_stereo_cameras_share_orientation() {
        let resolver = PoseResolver::default();
        let rig = CameraRig::default();
        let head = HeadPose::new([0.1, 1.5, -0.2], vec![0.92, 0.0, 0.38, 0.0]);
        let left = resolver.resolve(&head, rig.entry(CameraId::Left)).unwrap();
        let right = resolver.resolve(&head, rig.entry(CameraId::Right)).unwrap();
        assert!(left.rotation().abs_diff_eq(right.rotation(), 1e-12));
        let baseline = (left.translation() - right.translation()).length();
        assert!((baseline - 0.064).abs() < 1e-9);
    }

    #[test]
    fn test_f32_matrices_are_inverse() {
        let resolver = PoseResolver::default();
        let pose = resolver
            .resolve(
                &HeadPose::new([1.0, 2.0, 3.0], vec![0.5, 0.5, 0.5, 0.5]),
                CameraRig::default().entry(CameraId::Left),
            )
            .unwrap();
        let p = Vec3::new(0.3, -0.4, 1.2);
        let back = pose
            .world_to_camera_f32()
            .transform_point3(pose.camera_to_world_f32().transform_point3(p));
        assert!((back - p).length() < 1e-5);
    }
}
