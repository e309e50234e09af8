//! Isosurface extraction
//!
//! Marching tetrahedra over the sparse grid. Every voxel cell (the cube between
//! a voxel and its +x/+y/+z neighbors) is split into six tetrahedra sharing the
//! cell's main diagonal (Freudenthal/Kuhn split). The split is the same in
//! every cell, so neighboring cells agree on shared faces and the surface has
//! no cracks, including across block boundaries.

use std::collections::HashMap;

use glam::{IVec3, Vec3};

use crate::fusion::mesh::{Mesh, MeshVertex};
use crate::fusion::voxel_grid::{Voxel, VoxelBlock, VoxelHashGrid};

/// Corner `i` of a cell sits at offset `(i & 1, (i >> 1) & 1, (i >> 2) & 1)`.
const CORNER_OFFSETS: [IVec3; 8] = [
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Six tetrahedra, one per axis permutation, walking corner 0 to corner 7.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 3, 7], // x, y, z
    [0, 1, 5, 7], // x, z, y
    [0, 2, 3, 7], // y, x, z
    [0, 2, 6, 7], // y, z, x
    [0, 4, 5, 7], // z, x, y
    [0, 4, 6, 7], // z, y, x
];

type EdgeKey = ([i32; 3], [i32; 3]);

#[derive(Clone, Copy)]
struct Corner {
    global: IVec3,
    position: Vec3,
    tsdf: f32,
}

/// Extract the zero level set of the grid as a triangle mesh.
///
/// Only cells whose eight corners have all been observed produce geometry.
/// Triangles are wound so their normals point toward positive TSDF, i.e.
/// out of the surface toward the observing cameras.
pub fn extract_mesh(grid: &VoxelHashGrid) -> Mesh {
    let mut extractor = Extractor {
        grid,
        mesh: Mesh::new(),
        edge_cache: HashMap::new(),
    };
    for block in grid.iter() {
        extractor.march_block(block);
    }

    let mut mesh = extractor.mesh;
    mesh.compute_vertex_normals();
    log::info!(
        "Extracted {} vertices, {} triangles from {} blocks",
        mesh.vertices.len(),
        mesh.triangles.len(),
        grid.len()
    );
    mesh
}

struct Extractor<'a> {
    grid: &'a VoxelHashGrid,
    mesh: Mesh,
    edge_cache: HashMap<EdgeKey, usize>,
}

impl Extractor<'_> {
    fn march_block(&mut self, block: &VoxelBlock) {
        let res = block.resolution();
        let r = res as i32;

        // Arena indices of the block and its +x/+y/+z neighbors, by offset bits.
        let mut neighbors = [None; 8];
        for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
            neighbors[i] = self.grid.lookup(block.coord() + *offset);
        }

        let mut corners = [Corner {
            global: IVec3::ZERO,
            position: Vec3::ZERO,
            tsdf: 0.0,
        }; 8];

        for z in 0..r {
            for y in 0..r {
                'cell: for x in 0..r {
                    let local = IVec3::new(x, y, z);
                    for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
                        let c = local + *offset;
                        let spill = IVec3::new(c.x / r, c.y / r, c.z / r);
                        let slot = (spill.x | (spill.y << 1) | (spill.z << 2)) as usize;
                        let Some(block_index) = neighbors[slot] else {
                            continue 'cell;
                        };
                        let Some(owner) = self.grid.block(block_index) else {
                            continue 'cell;
                        };
                        let l = c - spill * r;
                        let voxel = owner.voxel(l.x as usize, l.y as usize, l.z as usize);
                        if !voxel.is_observed() {
                            continue 'cell;
                        }
                        let global = block.global_index(x as usize, y as usize, z as usize) + *offset;
                        corners[i] = Corner {
                            global,
                            position: self.grid.voxel_position(global),
                            tsdf: voxel.tsdf,
                        };
                    }

                    let negative = corners.iter().filter(|c| c.tsdf < 0.0).count();
                    if negative == 0 || negative == 8 {
                        continue;
                    }
                    for tet in &TETRAHEDRA {
                        let tet_corners = [
                            corners[tet[0]],
                            corners[tet[1]],
                            corners[tet[2]],
                            corners[tet[3]],
                        ];
                        self.march_tetrahedron(&tet_corners);
                    }
                }
            }
        }
    }

    fn march_tetrahedron(&mut self, c: &[Corner; 4]) {
        let (inside, outside): (Vec<usize>, Vec<usize>) = (0..4).partition(|&i| c[i].tsdf < 0.0);

        match (inside.len(), outside.len()) {
            (1, 3) => {
                let a = inside[0];
                let verts = [
                    self.edge_vertex(&c[a], &c[outside[0]]),
                    self.edge_vertex(&c[a], &c[outside[1]]),
                    self.edge_vertex(&c[a], &c[outside[2]]),
                ];
                self.emit(verts, c, &inside, &outside);
            }
            (3, 1) => {
                let b = outside[0];
                let verts = [
                    self.edge_vertex(&c[inside[0]], &c[b]),
                    self.edge_vertex(&c[inside[1]], &c[b]),
                    self.edge_vertex(&c[inside[2]], &c[b]),
                ];
                self.emit(verts, c, &inside, &outside);
            }
            (2, 2) => {
                let (a, b) = (inside[0], inside[1]);
                let (p, q) = (outside[0], outside[1]);
                // Quad a-p, a-q, b-q, b-p in cyclic order.
                let ap = self.edge_vertex(&c[a], &c[p]);
                let aq = self.edge_vertex(&c[a], &c[q]);
                let bq = self.edge_vertex(&c[b], &c[q]);
                let bp = self.edge_vertex(&c[b], &c[p]);
                self.emit([ap, aq, bq], c, &inside, &outside);
                self.emit([ap, bq, bp], c, &inside, &outside);
            }
            _ => {}
        }
    }

    /// Push a triangle, flipped if needed so it faces positive TSDF.
    fn emit(&mut self, verts: [usize; 3], c: &[Corner; 4], inside: &[usize], outside: &[usize]) {
        let centroid = |idx: &[usize]| {
            idx.iter().map(|&i| c[i].position).sum::<Vec3>() / idx.len() as f32
        };
        let gradient = centroid(outside) - centroid(inside);

        let [i0, i1, i2] = verts;
        let p0 = self.mesh.vertices[i0].position;
        let normal = (self.mesh.vertices[i1].position - p0)
            .cross(self.mesh.vertices[i2].position - p0);
        if normal.dot(gradient) < 0.0 {
            self.mesh.add_triangle(i0, i2, i1);
        } else {
            self.mesh.add_triangle(i0, i1, i2);
        }
    }

    /// Shared vertex on the zero crossing of an inside/outside edge.
    fn edge_vertex(&mut self, inside: &Corner, outside: &Corner) -> usize {
        let a = inside.global.to_array();
        let b = outside.global.to_array();
        let key = if a <= b { (a, b) } else { (b, a) };
        if let Some(&idx) = self.edge_cache.get(&key) {
            return idx;
        }

        let t = inside.tsdf / (inside.tsdf - outside.tsdf);
        let position = inside.position + (outside.position - inside.position) * t;
        let color = sample_color(self.grid, position).unwrap_or([0.5; 3]);
        let idx = self.mesh.add_vertex(MeshVertex::new(position, color));
        self.edge_cache.insert(key, idx);
        idx
    }
}

/// Trilinear color at a world position, over observed voxels only.
pub fn sample_color(grid: &VoxelHashGrid, position: Vec3) -> Option<[f32; 3]> {
    let g = position / grid.voxel_size();
    let base = g.floor();
    let frac = g - base;
    let base = base.as_ivec3();

    let mut sum = [0.0f32; 3];
    let mut total = 0.0f32;
    for offset in CORNER_OFFSETS {
        let Some(voxel) = grid.voxel(base + offset) else {
            continue;
        };
        if !voxel.is_observed() {
            continue;
        }
        let w = trilinear_weight(frac, offset);
        if w <= 0.0 {
            continue;
        }
        accumulate(&mut sum, voxel, w);
        total += w;
    }

    (total > 0.0).then(|| [sum[0] / total, sum[1] / total, sum[2] / total])
}

#[inline]
fn trilinear_weight(frac: Vec3, offset: IVec3) -> f32 {
    let wx = if offset.x == 1 { frac.x } else { 1.0 - frac.x };
    let wy = if offset.y == 1 { frac.y } else { 1.0 - frac.y };
    let wz = if offset.z == 1 { frac.z } else { 1.0 - frac.z };
    wx * wy * wz
}

#[inline]
fn accumulate(sum: &mut [f32; 3], voxel: &Voxel, w: f32) {
    for (s, c) in sum.iter_mut().zip(voxel.color) {
        *s += c * w;
    }
}
