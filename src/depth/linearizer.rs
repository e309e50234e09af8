//! Depth linearization
//!
//! Headset depth providers hand out depth-buffer values rather than metric
//! distances. Given the per-frame near/far planes this module recovers metric
//! depth along the optical axis, and derives pinhole intrinsics from the
//! reported field-of-view tangents.

use crate::core::{DepthCalibration, DepthImage, Intrinsics};

/// Smallest FOV tangent sum accepted when deriving intrinsics.
const MIN_FOV_TANGENT_SUM: f32 = 1e-6;

/// Converts raw depth-buffer samples to metric depth.
#[derive(Debug, Clone)]
pub struct DepthLinearizer {
    /// Focal lengths below this (pixels) are treated as a broken calibration.
    pub min_focal_length: f32,
}

impl Default for DepthLinearizer {
    fn default() -> Self {
        Self {
            min_focal_length: 300.0,
        }
    }
}

impl DepthLinearizer {
    pub fn new(min_focal_length: f32) -> Self {
        Self { min_focal_length }
    }

    /// Intrinsics of the depth image described by `calib`, in depth pixels.
    ///
    /// Returns `None` when the tangents are degenerate or the resulting focal
    /// length is implausibly small; callers then fall back to rig defaults.
    pub fn intrinsics(&self, calib: &DepthCalibration) -> Option<Intrinsics> {
        let horizontal = calib.fov_left + calib.fov_right;
        let vertical = calib.fov_top + calib.fov_down;
        if !(horizontal > MIN_FOV_TANGENT_SUM && vertical > MIN_FOV_TANGENT_SUM) {
            return None;
        }
        let width = calib.width as f32;
        let height = calib.height as f32;
        let intrinsics = Intrinsics {
            fx: width / horizontal,
            fy: height / vertical,
            cx: width * calib.fov_left / horizontal,
            cy: height * calib.fov_top / vertical,
        };
        if !intrinsics.is_valid()
            || intrinsics.fx < self.min_focal_length
            || intrinsics.fy < self.min_focal_length
        {
            log::warn!(
                "Rejecting depth calibration: fx={:.1} fy={:.1} (min {:.1})",
                intrinsics.fx,
                intrinsics.fy,
                self.min_focal_length
            );
            return None;
        }
        Some(intrinsics)
    }

    /// Metric depth for one raw sample; 0 means "no data".
    #[inline]
    pub fn linearize_sample(&self, raw: f32, calib: Option<&DepthCalibration>) -> f32 {
        if !raw.is_finite() || raw <= 0.0 {
            return 0.0;
        }
        let Some(calib) = calib else {
            return raw;
        };
        if raw > 1.0 {
            return 0.0;
        }

        let near = calib.near;
        let far = calib.far;
        let z = if !far.is_finite() || far <= near {
            if raw >= 1.0 {
                return 0.0;
            }
            near / (1.0 - raw)
        } else {
            let z_ndc = 2.0 * raw - 1.0;
            2.0 * near * far / (far + near - z_ndc * (far - near))
        };

        if z.is_finite() && z > 0.0 {
            z
        } else {
            0.0
        }
    }

    /// Linearize a whole depth image.
    pub fn linearize(&self, raw: &DepthImage, calib: Option<&DepthCalibration>) -> DepthImage {
        let data = raw
            .data
            .iter()
            .map(|&d| self.linearize_sample(d, calib))
            .collect();
        DepthImage::new(raw.width, raw.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn calib(near: f32, far: f32) -> DepthCalibration {
        DepthCalibration {
            near,
            far,
            fov_left: 1.0,
            fov_right: 1.0,
            fov_top: 1.0,
            fov_down: 1.0,
            width: 320,
            height: 320,
        }
    }

    #[test]
    fn test_midpoint_sample() {
        let lin = DepthLinearizer::default();
        let c = calib(0.1, 3.0);
        assert_relative_eq!(lin.linearize_sample(0.5, Some(&c)), 0.193_548_4, epsilon = 1e-5);
    }

    #[test]
    fn test_plane_endpoints() {
        let lin = DepthLinearizer::default();
        let c = calib(0.1, 3.0);
        assert_relative_eq!(lin.linearize_sample(1.0, Some(&c)), 3.0, epsilon = 1e-5);
        assert_relative_eq!(lin.linearize_sample(1e-6, Some(&c)), 0.1, epsilon = 1e-4);
    }

    #[test]
    fn test_zero_and_invalid_are_no_data() {
        let lin = DepthLinearizer::default();
        let c = calib(0.1, 3.0);
        assert_eq!(lin.linearize_sample(0.0, Some(&c)), 0.0);
        assert_eq!(lin.linearize_sample(-0.3, Some(&c)), 0.0);
        assert_eq!(lin.linearize_sample(f32::NAN, Some(&c)), 0.0);
        assert_eq!(lin.linearize_sample(1.5, Some(&c)), 0.0);
        assert_eq!(lin.linearize_sample(0.0, None), 0.0);
    }

    #[test]
    fn test_infinite_far_plane() {
        let lin = DepthLinearizer::default();
        let c = calib(0.1, f32::INFINITY);
        assert_relative_eq!(lin.linearize_sample(0.5, Some(&c)), 0.2, epsilon = 1e-6);
        assert_eq!(lin.linearize_sample(1.0, Some(&c)), 0.0);
    }

    #[test]
    fn test_uncalibrated_passes_metric_through() {
        let lin = DepthLinearizer::default();
        let raw = DepthImage::new(2, 1, vec![1.25, 0.0]);
        let out = lin.linearize(&raw, None);
        assert_eq!(out.data, vec![1.25, 0.0]);
    }

    #[test]
    fn test_intrinsics_from_tangents() {
        let lin = DepthLinearizer::default();
        let mut c = calib(0.1, 3.0);
        c.fov_left = 0.5;
        c.fov_right = 0.5;
        c.fov_top = 0.25;
        c.fov_down = 0.25;
        let k = lin.intrinsics(&c).unwrap();
        assert_relative_eq!(k.fx, 320.0);
        assert_relative_eq!(k.fy, 640.0);
        assert_relative_eq!(k.cx, 160.0);
        assert_relative_eq!(k.cy, 160.0);
    }

    #[test]
    fn test_small_focal_length_is_rejected() {
        let lin = DepthLinearizer::default();
        // 320 / 2.0 = 160 px < 300 px
        assert!(lin.intrinsics(&calib(0.1, 3.0)).is_none());

        let mut c = calib(0.1, 3.0);
        c.fov_left = 0.0;
        c.fov_right = 0.0;
        assert!(lin.intrinsics(&c).is_none());
    }
}
