//! Range and confidence filtering of metric depth.

use crate::core::DepthImage;

/// Per-image outcome of [`DepthFilter::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthFilterStats {
    /// Pixels left with usable depth.
    pub valid: usize,
    /// Pixels that carried depth but were excluded (beyond range or low confidence).
    pub out_of_range: usize,
    /// Pixels without depth to begin with.
    pub missing: usize,
}

impl DepthFilterStats {
    pub fn total(&self) -> usize {
        self.valid + self.out_of_range + self.missing
    }
}

#[derive(Debug, Clone)]
pub struct DepthFilter {
    pub depth_max: f32,
    /// `None` disables confidence filtering.
    pub confidence_threshold: Option<f32>,
}

impl DepthFilter {
    pub fn new(depth_max: f32, confidence_threshold: Option<f32>) -> Self {
        Self {
            depth_max,
            confidence_threshold,
        }
    }

    /// Zero out excluded pixels in place.
    ///
    /// A confidence map whose size does not match the depth image is ignored.
    pub fn apply(&self, depth: &mut DepthImage, confidence: Option<&[f32]>) -> DepthFilterStats {
        let confidence = match (confidence, self.confidence_threshold) {
            (Some(c), Some(threshold)) if c.len() == depth.data.len() => Some((c, threshold)),
            (Some(c), Some(_)) => {
                log::warn!(
                    "Confidence map size {} does not match depth size {}; ignoring it",
                    c.len(),
                    depth.data.len()
                );
                None
            }
            _ => None,
        };

        let mut stats = DepthFilterStats::default();
        for (i, d) in depth.data.iter_mut().enumerate() {
            if *d <= 0.0 {
                *d = 0.0;
                stats.missing += 1;
                continue;
            }
            let low_confidence = confidence
                .map(|(c, threshold)| c[i] < threshold)
                .unwrap_or(false);
            if *d > self.depth_max || low_confidence {
                *d = 0.0;
                stats.out_of_range += 1;
            } else {
                stats.valid += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_max_excludes_far_pixels() {
        let mut depth = DepthImage::new(4, 1, vec![0.5, 2.5, 0.0, 1.9]);
        let stats = DepthFilter::new(2.0, None).apply(&mut depth, None);
        assert_eq!(depth.data, vec![0.5, 0.0, 0.0, 1.9]);
        assert_eq!(stats, DepthFilterStats { valid: 2, out_of_range: 1, missing: 1 });
        assert_eq!(stats.total(), 4);
    }

    #[test]
    fn test_confidence_threshold() {
        let mut depth = DepthImage::new(3, 1, vec![1.0, 1.0, 1.0]);
        let conf = [0.9, 0.01, 0.05];
        let stats = DepthFilter::new(2.0, Some(0.05)).apply(&mut depth, Some(&conf));
        assert_eq!(depth.data, vec![1.0, 0.0, 1.0]);
        assert_eq!(stats.out_of_range, 1);
    }

    #[test]
    fn test_mismatched_confidence_is_ignored() {
        let mut depth = DepthImage::new(2, 1, vec![1.0, 1.0]);
        let stats = DepthFilter::new(2.0, Some(0.5)).apply(&mut depth, Some(&[0.0]));
        assert_eq!(stats.valid, 2);
    }
}
