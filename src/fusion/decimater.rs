//! # Decimater
//!
//! Quadric error metric simplification (Garland & Heckbert 1997).
//! Edges are collapsed cheapest-first until the triangle budget is met.
//! Collapses that would flip a face or pinch the surface are skipped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::ops::{Add, AddAssign};

use glam::{DMat3, DVec3};

use crate::fusion::mesh::{Mesh, MeshTriangle, MeshVertex};

/// Decimation configuration
#[derive(Debug, Clone)]
pub struct DecimateConfig {
    /// Stop once at most this many triangles remain.
    pub target_triangles: usize,
    /// Weight of the planes that keep open borders in place.
    pub boundary_weight: f64,
}

impl Default for DecimateConfig {
    fn default() -> Self {
        Self {
            target_triangles: 100_000,
            boundary_weight: 100.0,
        }
    }
}

/// Statistics from decimation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecimateStats {
    pub n_vertices: usize,
    pub n_faces: usize,
    pub collapses: usize,
    pub rejected: usize,
}

/// Decimation result
#[derive(Debug, Clone, PartialEq)]
pub enum DecimateResult {
    Success(DecimateStats),
    /// Nothing to do: the mesh is already within budget.
    Finished,
}

/// Symmetric 4x4 quadric stored as its upper triangle.
#[derive(Debug, Clone, Copy, Default)]
struct Quadric([f64; 10]);

impl Quadric {
    /// `p pᵀ` for the plane `ax + by + cz + d = 0`.
    fn from_plane(n: DVec3, d: f64) -> Self {
        let (a, b, c) = (n.x, n.y, n.z);
        Self([
            a * a, a * b, a * c, a * d,
            b * b, b * c, b * d,
            c * c, c * d,
            d * d,
        ])
    }

    fn scaled(self, w: f64) -> Self {
        Self(self.0.map(|v| v * w))
    }

    fn evaluate(&self, p: DVec3) -> f64 {
        let q = &self.0;
        let (x, y, z) = (p.x, p.y, p.z);
        q[0] * x * x + 2.0 * q[1] * x * y + 2.0 * q[2] * x * z + 2.0 * q[3] * x
            + q[4] * y * y + 2.0 * q[5] * y * z + 2.0 * q[6] * y
            + q[7] * z * z + 2.0 * q[8] * z
            + q[9]
    }

    /// Position minimizing the error, if the system is well conditioned.
    fn minimizer(&self) -> Option<DVec3> {
        let q = &self.0;
        let a = DMat3::from_cols(
            DVec3::new(q[0], q[1], q[2]),
            DVec3::new(q[1], q[4], q[5]),
            DVec3::new(q[2], q[5], q[7]),
        );
        if a.determinant().abs() < 1e-12 {
            return None;
        }
        let p = a.inverse() * DVec3::new(-q[3], -q[6], -q[8]);
        p.is_finite().then_some(p)
    }
}

impl Add for Quadric {
    type Output = Quadric;

    fn add(mut self, rhs: Quadric) -> Quadric {
        self += rhs;
        self
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Quadric) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

/// Edge collapse candidate; ordered so the heap pops the cheapest first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    keep: usize,
    remove: usize,
    versions: (u32, u32),
    target: DVec3,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.keep, other.remove).cmp(&(self.keep, self.remove)))
    }
}

/// Working state of one decimation run.
struct Collapser {
    positions: Vec<DVec3>,
    colors: Vec<[f32; 3]>,
    quadrics: Vec<Quadric>,
    versions: Vec<u32>,
    removed: Vec<bool>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    heap: BinaryHeap<Candidate>,
}

impl Collapser {
    fn new(mesh: &Mesh, boundary_weight: f64) -> Self {
        let n = mesh.vertices.len();
        let positions: Vec<DVec3> = mesh.vertices.iter().map(|v| v.position.as_dvec3()).collect();
        let faces: Vec<[usize; 3]> = mesh.triangles.iter().map(|t| t.indices).collect();

        let mut quadrics = vec![Quadric::default(); n];
        let mut vertex_faces = vec![Vec::new(); n];
        let mut edge_faces: HashMap<(usize, usize), Vec<usize>> = HashMap::new();

        for (f, tri) in faces.iter().enumerate() {
            let [a, b, c] = *tri;
            for &v in tri {
                vertex_faces[v].push(f);
            }
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edge_faces.entry((u.min(v), u.max(v))).or_default().push(f);
            }
            let normal = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
            let Some(normal) = normal.try_normalize() else {
                continue;
            };
            let q = Quadric::from_plane(normal, -normal.dot(positions[a]));
            for &v in tri {
                quadrics[v] += q;
            }
        }

        // Planes through open borders, perpendicular to the adjacent face.
        for (&(u, v), adjacent) in &edge_faces {
            if adjacent.len() != 1 {
                continue;
            }
            let [a, b, c] = faces[adjacent[0]];
            let face_normal = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
            let edge = positions[v] - positions[u];
            let Some(normal) = edge.cross(face_normal).try_normalize() else {
                continue;
            };
            let q = Quadric::from_plane(normal, -normal.dot(positions[u])).scaled(boundary_weight);
            quadrics[u] += q;
            quadrics[v] += q;
        }

        let mut collapser = Self {
            positions,
            colors: mesh.vertices.iter().map(|v| v.color).collect(),
            quadrics,
            versions: vec![0; n],
            removed: vec![false; n],
            face_alive: vec![true; faces.len()],
            faces,
            vertex_faces,
            heap: BinaryHeap::new(),
        };
        let mut edges: Vec<(usize, usize)> = edge_faces.into_keys().collect();
        edges.sort_unstable();
        for (u, v) in edges {
            collapser.push_candidate(u, v);
        }
        collapser
    }

    fn push_candidate(&mut self, a: usize, b: usize) {
        let q = self.quadrics[a] + self.quadrics[b];
        let (pa, pb) = (self.positions[a], self.positions[b]);
        let target = q.minimizer().unwrap_or_else(|| {
            [pa, pb, (pa + pb) * 0.5]
                .into_iter()
                .min_by(|x, y| q.evaluate(*x).total_cmp(&q.evaluate(*y)))
                .unwrap_or(pa)
        });
        self.heap.push(Candidate {
            cost: q.evaluate(target).max(0.0),
            keep: a,
            remove: b,
            versions: (self.versions[a], self.versions[b]),
            target,
        });
    }

    fn is_current(&self, c: &Candidate) -> bool {
        !self.removed[c.keep]
            && !self.removed[c.remove]
            && self.versions[c.keep] == c.versions.0
            && self.versions[c.remove] == c.versions.1
    }

    fn neighbors(&self, v: usize) -> Vec<usize> {
        let mut ring: Vec<usize> = self.vertex_faces[v]
            .iter()
            .filter(|&&f| self.face_alive[f])
            .flat_map(|&f| self.faces[f])
            .filter(|&u| u != v)
            .collect();
        ring.sort_unstable();
        ring.dedup();
        ring
    }

    /// Link condition: the endpoints may share only the apexes of the
    /// triangles on the edge, otherwise the collapse pinches the surface.
    fn preserves_manifold(&self, a: usize, b: usize) -> bool {
        let ring_b = self.neighbors(b);
        let shared = self
            .neighbors(a)
            .into_iter()
            .filter(|u| ring_b.binary_search(u).is_ok())
            .count();
        let edge_faces = self.vertex_faces[a]
            .iter()
            .filter(|&&f| self.face_alive[f] && self.faces[f].contains(&b))
            .count();
        shared <= edge_faces
    }

    /// True if moving `a` and `b` to `target` turns any surviving face over.
    fn flips_faces(&self, a: usize, b: usize, target: DVec3) -> bool {
        for &moved in &[a, b] {
            for &f in &self.vertex_faces[moved] {
                if !self.face_alive[f] {
                    continue;
                }
                let tri = self.faces[f];
                if tri.contains(&a) && tri.contains(&b) {
                    continue;
                }
                let p = tri.map(|v| self.positions[v]);
                let q = tri.map(|v| if v == moved { target } else { self.positions[v] });
                let before = (p[1] - p[0]).cross(p[2] - p[0]);
                let after = (q[1] - q[0]).cross(q[2] - q[0]);
                if after.length_squared() < 1e-24 || before.dot(after) <= 0.0 {
                    return true;
                }
            }
        }
        false
    }

    /// Merge `b` into `a`; returns the number of faces removed.
    fn collapse(&mut self, a: usize, b: usize, target: DVec3) -> usize {
        self.positions[a] = target;
        self.quadrics[a] = self.quadrics[a] + self.quadrics[b];
        let (ca, cb) = (self.colors[a], self.colors[b]);
        self.colors[a] = [
            (ca[0] + cb[0]) * 0.5,
            (ca[1] + cb[1]) * 0.5,
            (ca[2] + cb[2]) * 0.5,
        ];
        self.removed[b] = true;
        self.versions[a] += 1;

        let mut dropped = 0;
        for f in std::mem::take(&mut self.vertex_faces[b]) {
            if !self.face_alive[f] {
                continue;
            }
            if self.faces[f].contains(&a) {
                self.face_alive[f] = false;
                dropped += 1;
            } else {
                for v in self.faces[f].iter_mut() {
                    if *v == b {
                        *v = a;
                    }
                }
                self.vertex_faces[a].push(f);
            }
        }
        let alive = &self.face_alive;
        self.vertex_faces[a].retain(|&f| alive[f]);

        for u in self.neighbors(a) {
            self.push_candidate(a, u);
        }
        dropped
    }

    fn into_mesh(self) -> Mesh {
        let mut remap = vec![usize::MAX; self.positions.len()];
        let mut mesh = Mesh::new();
        for (f, tri) in self.faces.iter().enumerate() {
            if !self.face_alive[f] {
                continue;
            }
            let mut indices = [0usize; 3];
            for (slot, &v) in indices.iter_mut().zip(tri) {
                if remap[v] == usize::MAX {
                    remap[v] = mesh.add_vertex(MeshVertex::new(
                        self.positions[v].as_vec3(),
                        self.colors[v],
                    ));
                }
                *slot = remap[v];
            }
            mesh.triangles.push(MeshTriangle { indices });
        }
        mesh.compute_vertex_normals();
        mesh
    }
}

/// Quadric mesh decimater
#[derive(Debug, Clone, Default)]
pub struct Decimater {
    config: DecimateConfig,
    stats: DecimateStats,
}

impl Decimater {
    pub fn new(target_triangles: usize) -> Self {
        Self::with_config(DecimateConfig {
            target_triangles,
            ..Default::default()
        })
    }

    pub fn with_config(config: DecimateConfig) -> Self {
        Self {
            config,
            stats: DecimateStats::default(),
        }
    }

    pub fn config(&self) -> &DecimateConfig {
        &self.config
    }

    pub fn stats(&self) -> &DecimateStats {
        &self.stats
    }

    /// Simplify `mesh` in place down to the configured triangle budget.
    ///
    /// A budget of 0, or a mesh already within budget, leaves it untouched.
    pub fn decimate(&mut self, mesh: &mut Mesh) -> DecimateResult {
        let target = self.config.target_triangles;
        if target == 0 || mesh.triangles.len() <= target {
            return DecimateResult::Finished;
        }

        let mut collapser = Collapser::new(mesh, self.config.boundary_weight);
        let mut alive = mesh.triangles.len();
        let mut stats = DecimateStats::default();

        while alive > target {
            let Some(candidate) = collapser.heap.pop() else {
                break;
            };
            if !collapser.is_current(&candidate) {
                continue;
            }
            let (a, b) = (candidate.keep, candidate.remove);
            if !collapser.preserves_manifold(a, b) || collapser.flips_faces(a, b, candidate.target) {
                stats.rejected += 1;
                continue;
            }
            alive -= collapser.collapse(a, b, candidate.target);
            stats.collapses += 1;
        }

        *mesh = collapser.into_mesh();
        stats.n_vertices = mesh.vertices.len();
        stats.n_faces = mesh.triangles.len();
        log::debug!(
            "Quadric decimation: {} collapses ({} rejected), {} triangles left (target {})",
            stats.collapses,
            stats.rejected,
            stats.n_faces,
            target
        );
        self.stats = stats.clone();
        DecimateResult::Success(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_grid_mesh;
    use glam::Vec3;

    fn mean_normal(mesh: &Mesh) -> Vec3 {
        mesh.triangles.iter().map(|t| mesh.face_normal(t)).sum::<Vec3>()
    }

    #[test]
    fn test_decimater_create() {
        let dec = Decimater::new(10);
        assert_eq!(dec.config().target_triangles, 10);
        assert_eq!(dec.stats().collapses, 0);
    }

    #[test]
    fn test_within_budget_is_untouched() {
        let mut mesh = create_grid_mesh(3, 3, 1.0);
        let before = mesh.clone();
        assert_eq!(Decimater::new(100).decimate(&mut mesh), DecimateResult::Finished);
        assert_eq!(Decimater::new(0).decimate(&mut mesh), DecimateResult::Finished);
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_planar_grid_reaches_target() {
        let mut mesh = create_grid_mesh(11, 11, 0.1);
        assert_eq!(mesh.triangles.len(), 200);

        let result = Decimater::new(50).decimate(&mut mesh);
        let DecimateResult::Success(stats) = result else {
            panic!("expected decimation to run");
        };
        assert!(mesh.triangles.len() <= 50);
        assert!(stats.collapses > 0);

        // Flat input stays flat and keeps its orientation.
        for v in &mesh.vertices {
            assert!(v.position.z.abs() < 1e-5);
        }
        assert!(mean_normal(&mesh).z > 0.0);
        for tri in &mesh.triangles {
            assert!(mesh.face_normal(tri).z >= 0.0);
        }
    }

    #[test]
    fn test_border_is_preserved() {
        let mut mesh = create_grid_mesh(9, 9, 0.125);
        Decimater::new(40).decimate(&mut mesh);
        let (lo, hi) = mesh.bounding_box().unwrap();
        assert!((lo - Vec3::new(0.0, 0.0, 0.0)).length() < 1e-4);
        assert!((hi - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_quadric_minimizer_on_corner() {
        let q = Quadric::from_plane(DVec3::X, -1.0)
            + Quadric::from_plane(DVec3::Y, -2.0)
            + Quadric::from_plane(DVec3::Z, -3.0);
        let p = q.minimizer().unwrap();
        assert!((p - DVec3::new(1.0, 2.0, 3.0)).length() < 1e-9);
        assert!(q.evaluate(p).abs() < 1e-9);
    }
}
