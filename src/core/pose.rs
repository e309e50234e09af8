//! Camera pose resolution.
//!
//! Head poses arrive in the tracking system's left-handed, Y-up convention and
//! the rig describes each physical sensor relative to the head. The resolver
//! composes both and maps the result into the right-handed, Y-down,
//! Z-forward camera convention used by the integrator.

use std::f64::consts::PI;

use glam::{DMat3, DMat4, DQuat, DVec3, DVec4, Mat4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::camera::RigEntry;
use super::frame::HeadPose;

/// Quaternions with a smaller norm are rejected instead of normalized.
const MIN_QUATERNION_NORM: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseError {
    #[error("quaternion must have exactly 4 components, got {0}")]
    QuaternionLength(usize),
    #[error("quaternion norm {0:e} is too small to normalize")]
    DegenerateQuaternion(f64),
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Component order of incoming quaternion vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuaternionOrder {
    /// `[w, x, y, z]`
    Wxyz,
    /// `[x, y, z, w]`
    Xyzw,
}

impl Default for QuaternionOrder {
    fn default() -> Self {
        Self::Wxyz
    }
}

impl QuaternionOrder {
    /// Parse and normalize a raw component vector.
    pub fn parse(self, components: &[f64]) -> Result<DQuat, PoseError> {
        if components.len() != 4 {
            return Err(PoseError::QuaternionLength(components.len()));
        }
        if components.iter().any(|c| !c.is_finite()) {
            return Err(PoseError::NonFinite("quaternion"));
        }
        let q = match self {
            QuaternionOrder::Wxyz => {
                DQuat::from_xyzw(components[1], components[2], components[3], components[0])
            }
            QuaternionOrder::Xyzw => {
                DQuat::from_xyzw(components[0], components[1], components[2], components[3])
            }
        };
        let norm = q.length();
        if norm < MIN_QUATERNION_NORM {
            return Err(PoseError::DegenerateQuaternion(norm));
        }
        Ok(q / norm)
    }
}

/// Rigid camera-to-world transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    camera_to_world: DMat4,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        camera_to_world: DMat4::IDENTITY,
    };

    pub fn from_rotation_translation(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            camera_to_world: DMat4::from_rotation_translation(rotation.normalize(), translation),
        }
    }

    /// Validate a rigid matrix, re-orthonormalizing its rotation block when it
    /// drifted further than `epsilon`.
    pub fn from_matrix(matrix: DMat4, epsilon: f64) -> Result<Self, PoseError> {
        if !matrix.is_finite() {
            return Err(PoseError::NonFinite("camera-to-world transform"));
        }
        let mut rotation = DMat3::from_mat4(matrix);
        if orthonormality_error(&rotation) > epsilon {
            rotation = DMat3::from_quat(DQuat::from_mat3(&rotation).normalize());
        }
        if !rotation.is_finite() {
            return Err(PoseError::NonFinite("rotation"));
        }
        let mut camera_to_world = DMat4::from_mat3(rotation);
        camera_to_world.w_axis = matrix.w_axis.truncate().extend(1.0);
        Ok(Self { camera_to_world })
    }

    pub fn camera_to_world(&self) -> DMat4 {
        self.camera_to_world
    }

    pub fn world_to_camera(&self) -> DMat4 {
        self.inverse().camera_to_world
    }

    pub fn rotation(&self) -> DMat3 {
        DMat3::from_mat4(self.camera_to_world)
    }

    pub fn translation(&self) -> DVec3 {
        self.camera_to_world.w_axis.truncate()
    }

    /// Rigid inverse: `[Rᵀ | -Rᵀt]`.
    pub fn inverse(&self) -> Pose {
        let rt = self.rotation().transpose();
        let mut m = DMat4::from_mat3(rt);
        m.w_axis = (-(rt * self.translation())).extend(1.0);
        Pose { camera_to_world: m }
    }

    pub fn camera_to_world_f32(&self) -> Mat4 {
        self.camera_to_world.as_mat4()
    }

    pub fn world_to_camera_f32(&self) -> Mat4 {
        self.world_to_camera().as_mat4()
    }
}

fn orthonormality_error(rotation: &DMat3) -> f64 {
    (rotation.transpose() * *rotation - DMat3::IDENTITY)
        .to_cols_array()
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
}

/// Maps source-convention transforms into the camera convention (`diag(1,-1,-1,1)`).
fn convention_flip() -> DMat4 {
    DMat4::from_diagonal(DVec4::new(1.0, -1.0, -1.0, 1.0))
}

/// Resolves per-frame camera poses from head poses and rig offsets.
#[derive(Debug, Clone)]
pub struct PoseResolver {
    order: QuaternionOrder,
    ortho_epsilon: f64,
}

impl PoseResolver {
    pub fn new(order: QuaternionOrder) -> Self {
        Self {
            order,
            ortho_epsilon: 1e-9,
        }
    }

    pub fn order(&self) -> QuaternionOrder {
        self.order
    }

    /// Head-to-world transform in the source convention.
    pub fn head_transform(&self, head: &HeadPose) -> Result<DMat4, PoseError> {
        let position = DVec3::from_array(head.position);
        if !position.is_finite() {
            return Err(PoseError::NonFinite("head position"));
        }
        let rotation = self.order.parse(&head.rotation)?;
        Ok(DMat4::from_rotation_translation(rotation, position))
    }

    /// Camera-to-head transform in the source convention.
    ///
    /// The rig rotation is mirrored into the tracker's handedness and then
    /// turned 180° about its local X axis so the sensor looks down -Z.
    pub fn rig_transform(&self, rig: &RigEntry) -> Result<DMat4, PoseError> {
        let translation = DVec3::from_array(rig.translation);
        if !translation.is_finite() {
            return Err(PoseError::NonFinite("rig translation"));
        }
        let q = match &rig.rotation {
            Some(components) => self.order.parse(components)?,
            None => DQuat::IDENTITY,
        };
        let mirrored = DQuat::from_xyzw(-q.x, -q.y, q.z, q.w);
        let rotation = (mirrored * DQuat::from_rotation_x(PI)).normalize();
        Ok(DMat4::from_rotation_translation(rotation, translation))
    }

    /// Compose an already resolved head transform with one rig entry.
    pub fn camera_pose(&self, head_to_world: &DMat4, rig: &RigEntry) -> Result<Pose, PoseError> {
        let camera_to_head = self.rig_transform(rig)?;
        let flip = convention_flip();
        let camera_to_world = flip * (*head_to_world * camera_to_head) * flip;
        Pose::from_matrix(camera_to_world, self.ortho_epsilon)
    }

    pub fn resolve(&self, head: &HeadPose, rig: &RigEntry) -> Result<Pose, PoseError> {
        let head_to_world = self.head_transform(head)?;
        self.camera_pose(&head_to_world, rig)
    }
}

impl Default for PoseResolver {
    fn default() -> Self {
        Self::new(QuaternionOrder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::camera::CameraId;

    struct Lcg(u64);

    impl Lcg {
        fn next_f64(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    fn aligned_rig() -> RigEntry {
        RigEntry {
            translation: [0.0, 0.0, 0.0],
            rotation: None,
            ..RigEntry::default()
        }
    }

    #[test]
    fn test_rotation_is_orthonormal_for_random_quaternions() {
        let resolver = PoseResolver::new(QuaternionOrder::Wxyz);
        let mut rng = Lcg(42);
        for _ in 0..500 {
            let q = vec![rng.next_f64(), rng.next_f64(), rng.next_f64(), rng.next_f64()];
            let rig_q = vec![rng.next_f64(), rng.next_f64(), rng.next_f64(), rng.next_f64()];
            let head = HeadPose::new([rng.next_f64(), rng.next_f64(), rng.next_f64()], q);
            let rig = RigEntry {
                translation: [0.03, -0.01, 0.02],
                rotation: Some(rig_q),
                ..RigEntry::default()
            };
            let pose = resolver.resolve(&head, &rig).unwrap();
            let r = pose.rotation();
            assert!(orthonormality_error(&r) < 1e-6);
            assert!((r.determinant() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_identity_head_maps_through_convention_flip() {
        let resolver = PoseResolver::default();
        let head = HeadPose::at([1.0, 2.0, 3.0]);
        let pose = resolver.resolve(&head, &aligned_rig()).unwrap();

        let t = pose.translation();
        assert!((t - DVec3::new(1.0, -2.0, -3.0)).length() < 1e-12);

        // Rx(180°) conjugated by diag(1,-1,-1) is diag(1,-1,-1) again.
        let r = pose.rotation();
        assert!((r.x_axis - DVec3::X).length() < 1e-12);
        assert!((r.y_axis + DVec3::Y).length() < 1e-12);
        assert!((r.z_axis + DVec3::Z).length() < 1e-12);
    }

    #[test]
    fn test_rig_offset_is_applied_in_head_frame() {
        let resolver = PoseResolver::default();
        let head = HeadPose::at([0.0, 0.0, 0.0]);
        let rig = RigEntry::default_for(CameraId::Left);
        let pose = resolver.resolve(&head, &rig).unwrap();
        assert!((pose.translation() - DVec3::new(-0.032, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_component_orders_agree() {
        let wxyz = PoseResolver::new(QuaternionOrder::Wxyz);
        let xyzw = PoseResolver::new(QuaternionOrder::Xyzw);
        let (w, x, y, z) = (0.9, 0.1, -0.3, 0.2);
        let a = wxyz
            .resolve(&HeadPose::new([0.5, 0.0, 0.0], vec![w, x, y, z]), &aligned_rig())
            .unwrap();
        let b = xyzw
            .resolve(&HeadPose::new([0.5, 0.0, 0.0], vec![x, y, z, w]), &aligned_rig())
            .unwrap();
        assert!(a.camera_to_world().abs_diff_eq(b.camera_to_world(), 1e-12));
    }

    #[test]
    fn test_inverse_round_trip() {
        let resolver = PoseResolver::default();
        let head = HeadPose::new([0.2, 1.5, -0.7], vec![0.8, 0.2, 0.5, -0.1]);
        let pose = resolver.resolve(&head, &RigEntry::default_for(CameraId::Right)).unwrap();
        let product = pose.camera_to_world() * pose.world_to_camera();
        assert!(product.abs_diff_eq(DMat4::IDENTITY, 1e-12));
    }

    #[test]
    fn test_wrong_quaternion_length_fails_fast() {
        let resolver = PoseResolver::default();
        let head = HeadPose::new([0.0; 3], vec![1.0, 0.0, 0.0]);
        assert_eq!(
            resolver.resolve(&head, &aligned_rig()),
            Err(PoseError::QuaternionLength(3))
        );
    }

    #[test]
    fn test_zero_quaternion_is_rejected() {
        let resolver = PoseResolver::default();
        let head = HeadPose::new([0.0; 3], vec![0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            resolver.resolve(&head, &aligned_rig()),
            Err(PoseError::DegenerateQuaternion(_))
        ));
    }

    #[test]
    fn test_non_finite_position_is_rejected() {
        let resolver = PoseResolver::default();
        let head = HeadPose::new([f64::NAN, 0.0, 0.0], vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            resolver.resolve(&head, &aligned_rig()),
            Err(PoseError::NonFinite("head position"))
        );
    }

    #[test]
    fn test_drifted_rotation_is_reorthonormalized() {
        let mut m = DMat4::from_rotation_z(0.3);
        m.x_axis.x *= 1.001;
        let pose = Pose::from_matrix(m, 1e-9).unwrap();
        assert!(orthonormality_error(&pose.rotation()) < 1e-9);
    }
}
