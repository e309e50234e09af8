//! # Smoother
//!
//! Laplacian mesh smoothing with uniform (umbrella) weights.
//! Reduces marching artifacts in the extracted surface while preserving topology.

use glam::Vec3;
use rayon::prelude::*;

use crate::fusion::mesh::Mesh;

/// Smoothing configuration
#[derive(Debug, Clone)]
pub struct SmootherConfig {
    /// Number of smoothing iterations
    pub iterations: u32,
    /// Smoothing strength (0.0 - 1.0)
    pub strength: f32,
    /// Boundary vertices are fixed
    pub fix_boundary: bool,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            strength: 0.5,
            fix_boundary: false,
        }
    }
}

/// Statistics from smoothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothStats {
    pub iterations: u32,
    pub total_delta: f32,
    pub max_delta: f32,
    pub avg_delta: f32,
}

/// Laplacian mesh smoother
#[derive(Debug, Clone)]
pub struct Smoother {
    config: SmootherConfig,
    stats: SmoothStats,
}

impl Smoother {
    pub fn new() -> Self {
        Self::with_config(SmootherConfig::default())
    }

    pub fn with_config(config: SmootherConfig) -> Self {
        Self {
            config,
            stats: SmoothStats::default(),
        }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    pub fn stats(&self) -> &SmoothStats {
        &self.stats
    }

    /// Smooth vertex positions in place. Normals are left for the caller
    /// to recompute.
    pub fn smooth(&mut self, mesh: &mut Mesh) -> &SmoothStats {
        self.stats = SmoothStats::default();
        if mesh.triangles.is_empty() || self.config.iterations == 0 {
            return &self.stats;
        }

        let neighbors = vertex_neighbors(mesh);
        let pinned = if self.config.fix_boundary {
            boundary_vertices(mesh)
        } else {
            vec![false; mesh.vertices.len()]
        };
        let lambda = self.config.strength;

        for _ in 0..self.config.iterations {
            let positions: Vec<Vec3> = mesh.vertices.iter().map(|v| v.position).collect();
            let updated: Vec<Vec3> = positions
                .par_iter()
                .enumerate()
                .map(|(i, &p)| {
                    let ring = &neighbors[i];
                    if ring.is_empty() || pinned[i] {
                        return p;
                    }
                    let avg = ring.iter().map(|&j| positions[j]).sum::<Vec3>() / ring.len() as f32;
                    p + (avg - p) * lambda
                })
                .collect();

            for (vertex, p) in mesh.vertices.iter_mut().zip(updated) {
                let delta = (p - vertex.position).length();
                self.stats.total_delta += delta;
                self.stats.max_delta = self.stats.max_delta.max(delta);
                vertex.position = p;
            }
            self.stats.iterations += 1;
        }

        let moves = mesh.vertices.len() as f32 * self.stats.iterations as f32;
        self.stats.avg_delta = self.stats.total_delta / moves;
        log::debug!(
            "Laplacian smoothing: {} iterations, max delta {:.5}, avg delta {:.5}",
            self.stats.iterations,
            self.stats.max_delta,
            self.stats.avg_delta
        );
        &self.stats
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique one-ring neighbors of every vertex.
pub fn vertex_neighbors(mesh: &Mesh) -> Vec<Vec<usize>> {
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertices.len()];
    for tri in &mesh.triangles {
        let [a, b, c] = tri.indices;
        for (u, v) in [(a, b), (b, c), (c, a)] {
            neighbors[u].push(v);
            neighbors[v].push(u);
        }
    }
    for ring in &mut neighbors {
        ring.sort_unstable();
        ring.dedup();
    }
    neighbors
}

/// Vertices on an edge used by exactly one triangle.
pub fn boundary_vertices(mesh: &Mesh) -> Vec<bool> {
    let mut edges: std::collections::HashMap<(usize, usize), u32> = std::collections::HashMap::new();
    for tri in &mesh.triangles {
        let [a, b, c] = tri.indices;
        for (u, v) in [(a, b), (b, c), (c, a)] {
            *edges.entry((u.min(v), u.max(v))).or_insert(0) += 1;
        }
    }
    let mut boundary = vec![false; mesh.vertices.len()];
    for ((u, v), count) in edges {
        if count == 1 {
            boundary[u] = true;
            boundary[v] = true;
        }
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_grid_mesh;

    #[test]
    fn test_smoother_create() {
        let smoother = Smoother::new();
        assert_eq!(smoother.config().iterations, 5);
        assert_eq!(smoother.config().strength, 0.5);
    }

    #[test]
    fn test_smoothing_flattens_spike() {
        let mut mesh = create_grid_mesh(5, 5, 1.0);
        let center = 12;
        mesh.vertices[center].position.z = 1.0;

        let mut smoother = Smoother::with_config(SmootherConfig {
            iterations: 3,
            ..Default::default()
        });
        let stats = smoother.smooth(&mut mesh).clone();

        assert!(mesh.vertices[center].position.z < 0.5);
        assert_eq!(stats.iterations, 3);
        assert!(stats.max_delta > 0.0);
    }

    #[test]
    fn test_planar_mesh_stays_planar() {
        let mut mesh = create_grid_mesh(4, 4, 0.5);
        Smoother::new().smooth(&mut mesh);
        for v in &mesh.vertices {
            assert!(v.position.z.abs() < 1e-6);
        }
    }

    #[test]
    fn test_fix_boundary_pins_border() {
        let mut mesh = create_grid_mesh(4, 4, 1.0);
        let before: Vec<Vec3> = mesh.vertices.iter().map(|v| v.position).collect();
        let boundary = boundary_vertices(&mesh);

        Smoother::with_config(SmootherConfig {
            fix_boundary: true,
            ..Default::default()
        })
        .smooth(&mut mesh);

        for (i, v) in mesh.vertices.iter().enumerate() {
            if boundary[i] {
                assert_eq!(v.position, before[i]);
            }
        }
    }

    #[test]
    fn test_empty_mesh_is_noop() {
        let mut mesh = Mesh::new();
        let stats = Smoother::new().smooth(&mut mesh).clone();
        assert_eq!(stats.iterations, 0);
    }
}
