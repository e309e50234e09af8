//! Sparse voxel-block hash grid
//!
//! Space is partitioned into cubic blocks of `R³` voxels. Blocks are allocated
//! on demand into an arena and addressed through a hash map from block
//! coordinate to arena index. Allocation is bounded by a fixed capacity.

use std::collections::{HashMap, HashSet};

use glam::{IVec3, Vec3};
use thiserror::Error;

/// Integer block coordinate: `floor(p / (voxel_size * R))`.
pub type BlockCoord = IVec3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("voxel block capacity exceeded: {requested} new blocks requested, {available} of {capacity} available")]
    CapacityExceeded {
        requested: usize,
        available: usize,
        capacity: usize,
    },
}

/// A single TSDF cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    /// Signed distance normalized by the truncation distance, in `[-1, 1]`.
    pub tsdf: f32,
    /// Accumulated observation weight; 0 means unobserved.
    pub weight: f32,
    /// Running average color, each channel in `[0, 1]`.
    pub color: [f32; 3],
}

impl Default for Voxel {
    fn default() -> Self {
        Self {
            tsdf: 1.0,
            weight: 0.0,
            color: [0.0, 0.0, 0.0],
        }
    }
}

impl Voxel {
    #[inline]
    pub fn is_observed(&self) -> bool {
        self.weight > 0.0
    }
}

/// Dense `R³` voxel array for one block, x fastest.
#[derive(Debug, Clone)]
pub struct VoxelBlock {
    coord: BlockCoord,
    resolution: usize,
    voxels: Vec<Voxel>,
}

impl VoxelBlock {
    pub fn new(coord: BlockCoord, resolution: usize) -> Self {
        Self {
            coord,
            resolution,
            voxels: vec![Voxel::default(); resolution * resolution * resolution],
        }
    }

    pub fn coord(&self) -> BlockCoord {
        self.coord
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    #[inline]
    pub fn local_index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.resolution + y) * self.resolution + x
    }

    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> &Voxel {
        &self.voxels[self.local_index(x, y, z)]
    }

    #[inline]
    pub fn voxel_mut(&mut self, x: usize, y: usize, z: usize) -> &mut Voxel {
        let i = self.local_index(x, y, z);
        &mut self.voxels[i]
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn voxels_mut(&mut self) -> &mut [Voxel] {
        &mut self.voxels
    }

    /// Global voxel index of a local voxel.
    #[inline]
    pub fn global_index(&self, x: usize, y: usize, z: usize) -> IVec3 {
        self.coord * self.resolution as i32 + IVec3::new(x as i32, y as i32, z as i32)
    }

    pub fn observed_count(&self) -> usize {
        self.voxels.iter().filter(|v| v.is_observed()).count()
    }
}

/// Arena-backed sparse block grid.
#[derive(Debug, Clone)]
pub struct VoxelHashGrid {
    voxel_size: f32,
    block_resolution: usize,
    capacity: usize,
    index: HashMap<BlockCoord, usize>,
    blocks: Vec<VoxelBlock>,
}

impl VoxelHashGrid {
    pub fn new(voxel_size: f32, block_resolution: usize, capacity: usize) -> Self {
        Self {
            voxel_size,
            block_resolution,
            capacity,
            index: HashMap::new(),
            blocks: Vec::new(),
        }
    }

    /// Ensure every coordinate has a block and return their arena indices,
    /// in the order of first appearance in `coords`.
    ///
    /// Already active coordinates are returned unchanged. If the new
    /// coordinates would not fit, nothing is allocated.
    pub fn activate(&mut self, coords: &[BlockCoord]) -> Result<Vec<usize>, GridError> {
        let mut seen = HashSet::with_capacity(coords.len());
        let mut unique = Vec::with_capacity(coords.len());
        for &c in coords {
            if seen.insert(c) {
                unique.push(c);
            }
        }

        let requested = unique
            .iter()
            .filter(|c| !self.index.contains_key(c))
            .count();
        let available = self.capacity.saturating_sub(self.blocks.len());
        if requested > available {
            return Err(GridError::CapacityExceeded {
                requested,
                available,
                capacity: self.capacity,
            });
        }

        let mut indices = Vec::with_capacity(unique.len());
        for coord in unique {
            let idx = match self.index.get(&coord) {
                Some(&idx) => idx,
                None => {
                    let idx = self.blocks.len();
                    self.blocks.push(VoxelBlock::new(coord, self.block_resolution));
                    self.index.insert(coord, idx);
                    idx
                }
            };
            indices.push(idx);
        }
        Ok(indices)
    }

    pub fn lookup(&self, coord: BlockCoord) -> Option<usize> {
        self.index.get(&coord).copied()
    }

    pub fn block(&self, index: usize) -> Option<&VoxelBlock> {
        self.blocks.get(index)
    }

    pub fn block_mut(&mut self, index: usize) -> Option<&mut VoxelBlock> {
        self.blocks.get_mut(index)
    }

    pub fn blocks(&self) -> &[VoxelBlock] {
        &self.blocks
    }

    /// Mutable arena slice, for parallel per-block updates.
    pub fn blocks_mut(&mut self) -> &mut [VoxelBlock] {
        &mut self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoxelBlock> {
        self.blocks.iter()
    }

    /// Voxel at a global voxel index, if its block is active.
    pub fn voxel(&self, global: IVec3) -> Option<&Voxel> {
        let (coord, local) = self.split_index(global);
        let block = &self.blocks[self.lookup(coord)?];
        Some(block.voxel(local.x as usize, local.y as usize, local.z as usize))
    }

    /// Block coordinate and in-block offset of a global voxel index.
    #[inline]
    pub fn split_index(&self, global: IVec3) -> (BlockCoord, IVec3) {
        let r = self.block_resolution as i32;
        (
            IVec3::new(global.x.div_euclid(r), global.y.div_euclid(r), global.z.div_euclid(r)),
            IVec3::new(global.x.rem_euclid(r), global.y.rem_euclid(r), global.z.rem_euclid(r)),
        )
    }

    pub fn block_coord_of(&self, point: Vec3) -> BlockCoord {
        (point / self.block_size()).floor().as_ivec3()
    }

    /// World position of a voxel sample.
    #[inline]
    pub fn voxel_position(&self, global: IVec3) -> Vec3 {
        global.as_vec3() * self.voxel_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn block_resolution(&self) -> usize {
        self.block_resolution
    }

    /// Edge length of a block in meters.
    pub fn block_size(&self) -> f32 {
        self.voxel_size * self.block_resolution as f32
    }

    pub fn observed_voxel_count(&self) -> usize {
        self.blocks.iter().map(VoxelBlock::observed_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_is_idempotent() {
        let mut grid = VoxelHashGrid::new(0.01, 8, 16);
        let coords = [IVec3::new(0, 0, 0), IVec3::new(1, 0, 0)];
        let first = grid.activate(&coords).unwrap();
        let second = grid.activate(&coords).unwrap();
        assert_eq!(first, second);
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn test_activate_dedups_input() {
        let mut grid = VoxelHashGrid::new(0.01, 8, 2);
        let c = IVec3::new(-3, 2, 1);
        let indices = grid.activate(&[c, c, c]).unwrap();
        assert_eq!(indices, vec![0]);
        assert_eq!(grid.lookup(c), Some(0));
    }

    #[test]
    fn test_capacity_is_checked_before_allocation() {
        let mut grid = VoxelHashGrid::new(0.01, 4, 3);
        grid.activate(&[IVec3::ZERO, IVec3::X]).unwrap();
        let err = grid
            .activate(&[IVec3::ZERO, IVec3::Y, IVec3::Z])
            .unwrap_err();
        assert_eq!(
            err,
            GridError::CapacityExceeded {
                requested: 2,
                available: 1,
                capacity: 3
            }
        );
        assert_eq!(grid.len(), 2);
        assert!(grid.lookup(IVec3::Y).is_none());
    }

    #[test]
    fn test_negative_indices_split_correctly() {
        let grid = VoxelHashGrid::new(0.1, 8, 1);
        let (coord, local) = grid.split_index(IVec3::new(-1, 8, -9));
        assert_eq!(coord, IVec3::new(-1, 1, -2));
        assert_eq!(local, IVec3::new(7, 0, 7));
    }

    #[test]
    fn test_block_coord_of_point() {
        let grid = VoxelHashGrid::new(0.01, 16, 1);
        assert_eq!(grid.block_coord_of(Vec3::new(0.05, -0.05, 0.17)), IVec3::new(0, -1, 1));
    }

    #[test]
    fn test_voxel_lookup_across_blocks() {
        let mut grid = VoxelHashGrid::new(0.01, 4, 4);
        let idx = grid.activate(&[IVec3::new(1, 0, 0)]).unwrap()[0];
        grid.block_mut(idx).unwrap().voxel_mut(2, 1, 3).weight = 5.0;
        assert_eq!(grid.voxel(IVec3::new(6, 1, 3)).unwrap().weight, 5.0);
        assert!(grid.voxel(IVec3::new(0, 0, 0)).is_none());
    }

    #[test]
    fn test_observed_voxel_count() {
        let mut grid = VoxelHashGrid::new(0.01, 4, 4);
        let indices = grid.activate(&[IVec3::ZERO, IVec3::X]).unwrap();
        assert_eq!(grid.observed_voxel_count(), 0);

        grid.block_mut(indices[0]).unwrap().voxel_mut(0, 0, 0).weight = 1.0;
        grid.block_mut(indices[1]).unwrap().voxel_mut(3, 3, 3).weight = 2.0;
        grid.block_mut(indices[1]).unwrap().voxel_mut(1, 2, 3).weight = 0.5;
        assert_eq!(grid.block(indices[1]).unwrap().observed_count(), 2);
        assert_eq!(grid.observed_voxel_count(), 3);
    }
}
