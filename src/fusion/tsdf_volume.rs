//! TSDF Volume
//!
//! Projective truncated signed distance fusion into a sparse voxel-block
//! grid. Each integration activates the blocks around the observed surface
//! and then updates every voxel of those blocks with a weighted running
//! average of the truncated distance and color.
//!
//! Based on:
//! - Kinect Fusion algorithm
//! - Voxel hashing (Nießner et al. 2013)

use glam::{IVec3, Mat4, Vec3};
use rayon::prelude::*;
use std::collections::HashSet;

use crate::core::{ColorImage, DepthImage, Intrinsics, Pose};
use crate::fusion::voxel_grid::{BlockCoord, GridError, VoxelBlock, VoxelHashGrid};

/// TSDF Volume configuration
#[derive(Debug, Clone)]
pub struct TsdfConfig {
    /// Voxel size in world units (e.g., 0.01 for 1cm)
    pub voxel_size: f32,
    /// Truncation distance in voxels
    pub trunc_voxel_multiplier: f32,
    /// Voxels per block edge
    pub block_resolution: usize,
    /// Maximum number of allocated blocks
    pub block_count: usize,
    /// Depth samples beyond this (meters) never activate blocks
    pub depth_max: f32,
    /// Maximum weight per voxel
    pub max_weight: f32,
    /// Weight of one observation
    pub observation_weight: f32,
    /// Use every n-th valid pixel (both axes) for block activation
    pub activation_stride: usize,
}

impl Default for TsdfConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.01,
            trunc_voxel_multiplier: 8.0,
            block_resolution: 16,
            block_count: 50_000,
            depth_max: 2.0,
            max_weight: 100.0,
            observation_weight: 1.0,
            activation_stride: 4,
        }
    }
}

impl TsdfConfig {
    /// Truncation distance in meters.
    pub fn truncation(&self) -> f32 {
        self.voxel_size * self.trunc_voxel_multiplier
    }
}

/// One camera view ready for integration.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Metric depth; 0 is "no data".
    pub depth: &'a DepthImage,
    /// Color at the depth resolution; views without color keep voxel colors.
    pub color: Option<&'a ColorImage>,
    pub intrinsics: Intrinsics,
}

/// Per-integration counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    /// Blocks in the view's truncation band.
    pub touched_blocks: usize,
    /// Of those, newly allocated.
    pub new_blocks: usize,
    /// Voxels whose TSDF changed.
    pub updated_voxels: usize,
}

/// TSDF Volume for volumetric fusion
#[derive(Debug)]
pub struct TsdfVolume {
    config: TsdfConfig,
    grid: VoxelHashGrid,
    /// Number of integrated views
    frame_count: usize,
}

impl TsdfVolume {
    pub fn new(config: TsdfConfig) -> Self {
        let grid = VoxelHashGrid::new(config.voxel_size, config.block_resolution, config.block_count);
        Self {
            config,
            grid,
            frame_count: 0,
        }
    }

    /// Integrate one view taken from `pose` (camera-to-world).
    ///
    /// On `GridError` the grid is left unchanged.
    pub fn integrate(
        &mut self,
        obs: &Observation<'_>,
        pose: &Pose,
    ) -> Result<IntegrationStats, GridError> {
        let camera_to_world = pose.camera_to_world_f32();
        let world_to_camera = pose.world_to_camera_f32();

        let coords = self.frustum_blocks(obs, &camera_to_world);
        let before = self.grid.len();
        let indices = self.grid.activate(&coords)?;
        let new_blocks = self.grid.len() - before;

        let mut touched = vec![false; self.grid.len()];
        for &i in &indices {
            touched[i] = true;
        }

        let color = obs
            .color
            .filter(|c| c.width == obs.depth.width && c.height == obs.depth.height);
        let update = VoxelUpdate {
            world_to_camera,
            depth: obs.depth,
            color,
            intrinsics: obs.intrinsics,
            voxel_size: self.config.voxel_size,
            trunc: self.config.truncation(),
            depth_max: self.config.depth_max,
            observation_weight: self.config.observation_weight,
            max_weight: self.config.max_weight,
        };

        let updated_voxels: usize = self
            .grid
            .blocks_mut()
            .par_iter_mut()
            .enumerate()
            .filter(|(i, _)| touched[*i])
            .map(|(_, block)| update.apply(block))
            .sum();

        self.frame_count += 1;
        log::debug!(
            "Integrated view {}: {} blocks ({} new), {} voxels updated, {} blocks total",
            self.frame_count,
            indices.len(),
            new_blocks,
            updated_voxels,
            self.grid.len()
        );

        Ok(IntegrationStats {
            touched_blocks: indices.len(),
            new_blocks,
            updated_voxels,
        })
    }

    /// Sorted set of blocks overlapping the truncation band around the
    /// back-projected depth samples.
    fn frustum_blocks(&self, obs: &Observation<'_>, camera_to_world: &Mat4) -> Vec<BlockCoord> {
        let stride = self.config.activation_stride.max(1);
        let trunc = self.config.truncation();
        let block_size = self.grid.block_size();
        let depth = obs.depth;

        let mut set: HashSet<BlockCoord> = HashSet::new();
        for v in (0..depth.height).step_by(stride) {
            for u in (0..depth.width).step_by(stride) {
                let d = depth.get(u, v);
                if !(d > 0.0 && d <= self.config.depth_max) {
                    continue;
                }
                let p_cam = obs.intrinsics.unproject(u as f32, v as f32, d);
                let p = camera_to_world.transform_point3(p_cam);
                let lo = ((p - Vec3::splat(trunc)) / block_size).floor().as_ivec3();
                let hi = ((p + Vec3::splat(trunc)) / block_size).floor().as_ivec3();
                for z in lo.z..=hi.z {
                    for y in lo.y..=hi.y {
                        for x in lo.x..=hi.x {
                            set.insert(IVec3::new(x, y, z));
                        }
                    }
                }
            }
        }

        let mut coords: Vec<BlockCoord> = set.into_iter().collect();
        coords.sort_unstable_by_key(|c| (c.z, c.y, c.x));
        coords
    }

    pub fn grid(&self) -> &VoxelHashGrid {
        &self.grid
    }

    pub fn config(&self) -> &TsdfConfig {
        &self.config
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Number of allocated blocks
    pub fn num_blocks(&self) -> usize {
        self.grid.len()
    }

    /// Number of voxels that received at least one observation
    pub fn num_observed_voxels(&self) -> usize {
        self.grid.observed_voxel_count()
    }

    /// Drop all blocks.
    pub fn clear(&mut self) {
        self.grid = VoxelHashGrid::new(
            self.config.voxel_size,
            self.config.block_resolution,
            self.config.block_count,
        );
        self.frame_count = 0;
    }
}

impl Default for TsdfVolume {
    fn default() -> Self {
        Self::new(TsdfConfig::default())
    }
}

/// Read-only per-view state shared by the block workers.
struct VoxelUpdate<'a> {
    world_to_camera: Mat4,
    depth: &'a DepthImage,
    color: Option<&'a ColorImage>,
    intrinsics: Intrinsics,
    voxel_size: f32,
    trunc: f32,
    depth_max: f32,
    observation_weight: f32,
    max_weight: f32,
}

impl VoxelUpdate<'_> {
    fn apply(&self, block: &mut VoxelBlock) -> usize {
        let res = block.resolution();
        let width = self.depth.width as i64;
        let height = self.depth.height as i64;
        let w_obs = self.observation_weight;
        let mut updated = 0;

        for z in 0..res {
            for y in 0..res {
                for x in 0..res {
                    let global = block.global_index(x, y, z);
                    let p_world = global.as_vec3() * self.voxel_size;
                    let p = self.world_to_camera.transform_point3(p_world);
                    if p.z <= 0.0 {
                        continue;
                    }

                    let (u, v) = self.intrinsics.project(p.x, p.y, p.z);
                    let (u, v) = (u.round() as i64, v.round() as i64);
                    if u < 0 || v < 0 || u >= width || v >= height {
                        continue;
                    }
                    let (u, v) = (u as usize, v as usize);
                    let d = self.depth.get(u, v);
                    if !(d > 0.0 && d <= self.depth_max) {
                        continue;
                    }

                    let sdf = d - p.z;
                    if sdf <= -self.trunc {
                        continue;
                    }
                    let tsdf = sdf.min(self.trunc) / self.trunc;

                    let voxel = block.voxel_mut(x, y, z);
                    let w = voxel.weight;
                    let denom = w + w_obs;
                    voxel.tsdf = (voxel.tsdf * w + tsdf * w_obs) / denom;
                    if let Some(color) = self.color {
                        let rgb = color.pixel(u, v);
                        for (c, observed) in voxel.color.iter_mut().zip(rgb) {
                            *c = (*c * w + observed as f32 / 255.0 * w_obs) / denom;
                        }
                    }
                    voxel.weight = denom.min(self.max_weight);
                    updated += 1;
                }
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{planar_depth, small_tsdf_config, small_intrinsics};

    fn observe<'a>(depth: &'a DepthImage, color: Option<&'a ColorImage>) -> Observation<'a> {
        Observation {
            depth,
            color,
            intrinsics: small_intrinsics(),
        }
    }

    #[test]
    fn test_integrate_activates_band_around_surface() {
        let mut volume = TsdfVolume::new(small_tsdf_config());
        let depth = planar_depth(64, 64, 1.0);
        let stats = volume.integrate(&observe(&depth, None), &Pose::IDENTITY).unwrap();

        assert!(stats.touched_blocks > 0);
        assert_eq!(stats.new_blocks, stats.touched_blocks);
        assert!(stats.updated_voxels > 0);
        assert_eq!(volume.frame_count(), 1);

        let trunc = volume.config().truncation();
        let block_size = volume.grid().block_size();
        for block in volume.grid().iter() {
            let z_min = block.coord().z as f32 * block_size;
            let z_max = z_min + block_size;
            assert!(z_max >= 1.0 - trunc && z_min <= 1.0 + trunc);
        }
    }

    #[test]
    fn test_voxel_values_follow_plane_distance() {
        let mut volume = TsdfVolume::new(small_tsdf_config());
        let depth = planar_depth(64, 64, 1.0);
        volume.integrate(&observe(&depth, None), &Pose::IDENTITY).unwrap();
        let trunc = volume.config().truncation();
        let vs = volume.config().voxel_size;

        // Global voxel (0, 0, k) sits on the optical axis at z = k * vs.
        for k in 45..=53 {
            let voxel = volume.grid().voxel(IVec3::new(0, 0, k)).unwrap();
            let z = k as f32 * vs;
            let expected = ((1.0 - z).min(trunc) / trunc).max(-1.0);
            if 1.0 - z > -trunc {
                assert!((voxel.tsdf - expected).abs() < 1e-4, "k={k}");
                assert_eq!(voxel.weight, 1.0);
            }
        }
    }

    #[test]
    fn test_double_integration_matches_doubled_weight() {
        let depth = planar_depth(64, 64, 1.0);
        let color = ColorImage::filled(64, 64, [200, 100, 50]);
        let obs = observe(&depth, Some(&color));

        let mut twice = TsdfVolume::new(small_tsdf_config());
        twice.integrate(&obs, &Pose::IDENTITY).unwrap();
        twice.integrate(&obs, &Pose::IDENTITY).unwrap();

        let mut doubled = TsdfVolume::new(TsdfConfig {
            observation_weight: 2.0,
            ..small_tsdf_config()
        });
        doubled.integrate(&obs, &Pose::IDENTITY).unwrap();

        assert_eq!(twice.num_blocks(), doubled.num_blocks());
        for (a, b) in twice.grid().iter().zip(doubled.grid().iter()) {
            assert_eq!(a.coord(), b.coord());
            for (va, vb) in a.voxels().iter().zip(b.voxels()) {
                assert!((va.tsdf - vb.tsdf).abs() < 1e-6);
                assert!((va.weight - vb.weight).abs() < 1e-6);
                for c in 0..3 {
                    assert!((va.color[c] - vb.color[c]).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_weight_is_capped() {
        let mut volume = TsdfVolume::new(TsdfConfig {
            max_weight: 3.0,
            ..small_tsdf_config()
        });
        let depth = planar_depth(64, 64, 1.0);
        for _ in 0..5 {
            volume.integrate(&observe(&depth, None), &Pose::IDENTITY).unwrap();
        }
        let max = volume
            .grid()
            .iter()
            .flat_map(|b| b.voxels().iter())
            .map(|v| v.weight)
            .fold(0.0f32, f32::max);
        assert_eq!(max, 3.0);
    }

    #[test]
    fn test_capacity_error_leaves_grid_untouched() {
        let mut volume = TsdfVolume::new(TsdfConfig {
            block_count: 2,
            ..small_tsdf_config()
        });
        let depth = planar_depth(64, 64, 1.0);
        let err = volume.integrate(&observe(&depth, None), &Pose::IDENTITY);
        assert!(matches!(err, Err(GridError::CapacityExceeded { .. })));
        assert_eq!(volume.num_blocks(), 0);
        assert_eq!(volume.frame_count(), 0);
    }

    #[test]
    fn test_empty_depth_allocates_nothing() {
        let mut volume = TsdfVolume::new(small_tsdf_config());
        let depth = DepthImage::filled(64, 64, 0.0);
        let stats = volume.integrate(&observe(&depth, None), &Pose::IDENTITY).unwrap();
        assert_eq!(stats, IntegrationStats::default());
        assert_eq!(volume.num_blocks(), 0);
    }

    #[test]
    fn test_clear_resets_volume() {
        let mut volume = TsdfVolume::new(small_tsdf_config());
        let depth = planar_depth(64, 64, 1.0);
        volume.integrate(&observe(&depth, None), &Pose::IDENTITY).unwrap();
        volume.clear();
        assert_eq!(volume.num_blocks(), 0);
        assert_eq!(volume.frame_count(), 0);
    }
}
