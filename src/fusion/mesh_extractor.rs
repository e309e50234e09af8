//! Mesh post-processing for extracted isosurfaces
//!
//! Turns the raw isosurface into the final mesh:
//! 1. Outlier removal (small disconnected clusters)
//! 2. Laplacian smoothing
//! 3. Quadric decimation
//! 4. Cleanup (duplicate vertices, degenerate and duplicate triangles,
//!    unreferenced vertices, normals)
//!
//! Steps 1-3 are optional; cleanup always runs.

use std::collections::{HashMap, HashSet};

use crate::config::PostProcessingParams;
use crate::fusion::decimater::{DecimateResult, DecimateStats, Decimater};
use crate::fusion::mesh::Mesh;
use crate::fusion::smoother::{SmoothStats, Smoother, SmootherConfig};

/// Connected-component filtering counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub removed_clusters: usize,
    pub removed_triangles: usize,
    pub kept_clusters: usize,
    pub kept_triangles: usize,
}

/// Counters from the mandatory cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub merged_vertices: usize,
    pub degenerate_triangles: usize,
    pub duplicate_triangles: usize,
    pub unreferenced_vertices: usize,
}

/// Edge-incidence summary of a triangle mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyStats {
    pub boundary_edges: usize,
    pub non_manifold_edges: usize,
}

impl TopologyStats {
    pub fn is_watertight(&self) -> bool {
        self.boundary_edges == 0 && self.non_manifold_edges == 0
    }
}

/// What post-processing did to a mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessStats {
    pub input_vertices: usize,
    pub input_triangles: usize,
    pub clusters: ClusterStats,
    pub smoothing: Option<SmoothStats>,
    pub decimation: Option<DecimateStats>,
    pub cleanup: CleanupStats,
    pub topology: TopologyStats,
    /// Percentage of input triangles removed as outlier clusters.
    pub isolated_triangle_percentage: f32,
}

/// Mesh post-processor
pub struct MeshPostProcessor {
    params: PostProcessingParams,
}

impl MeshPostProcessor {
    pub fn new(params: PostProcessingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PostProcessingParams {
        &self.params
    }

    /// Run the post-processing chain.
    pub fn process(&self, mut mesh: Mesh) -> (Mesh, PostProcessStats) {
        let mut stats = PostProcessStats {
            input_vertices: mesh.vertex_count(),
            input_triangles: mesh.triangle_count(),
            ..Default::default()
        };

        if self.params.enable {
            if self.params.remove_outliers && self.params.min_cluster_triangles > 0 {
                let (filtered, clusters) = filter_clusters(mesh, self.params.min_cluster_triangles);
                mesh = filtered;
                stats.clusters = clusters;
            }

            if self.params.smoothing_iterations > 0 {
                let mut smoother = Smoother::with_config(SmootherConfig {
                    iterations: self.params.smoothing_iterations,
                    fix_boundary: self.params.smoothing_fix_boundary,
                    ..Default::default()
                });
                stats.smoothing = Some(smoother.smooth(&mut mesh).clone());
            }

            let mut decimater = Decimater::new(self.params.decimation_target_triangles);
            if let DecimateResult::Success(dec) = decimater.decimate(&mut mesh) {
                stats.decimation = Some(dec);
            }
        }

        stats.cleanup = cleanup(&mut mesh);
        stats.topology = validate_topology(&mesh);
        stats.isolated_triangle_percentage = if stats.input_triangles > 0 {
            stats.clusters.removed_triangles as f32 / stats.input_triangles as f32 * 100.0
        } else {
            0.0
        };

        log::info!(
            "Mesh stats: vertices {} -> {}, triangles {} -> {}, kept_clusters {}, removed_clusters {}, removed_triangles {}, isolated_pct {:.2}%",
            stats.input_vertices,
            mesh.vertex_count(),
            stats.input_triangles,
            mesh.triangle_count(),
            stats.clusters.kept_clusters,
            stats.clusters.removed_clusters,
            stats.clusters.removed_triangles,
            stats.isolated_triangle_percentage,
        );
        log::info!(
            "Mesh topology: boundary_edges={}, non_manifold_edges={}, watertight={}",
            stats.topology.boundary_edges,
            stats.topology.non_manifold_edges,
            stats.topology.is_watertight()
        );
        if stats.isolated_triangle_percentage > 1.0 {
            log::warn!(
                "Isolated triangle percentage {:.2}% exceeds 1% threshold before filtering",
                stats.isolated_triangle_percentage
            );
        }

        (mesh, stats)
    }
}

impl Default for MeshPostProcessor {
    fn default() -> Self {
        Self::new(PostProcessingParams::default())
    }
}

/// Drop connected components (triangles sharing a vertex) smaller than
/// `min_triangles`.
pub fn filter_clusters(mesh: Mesh, min_triangles: usize) -> (Mesh, ClusterStats) {
    if mesh.triangles.is_empty() {
        return (mesh, ClusterStats::default());
    }

    let tri_count = mesh.triangles.len();
    let mut vert_tris: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertices.len()];
    for (tri_idx, tri) in mesh.triangles.iter().enumerate() {
        for &v in &tri.indices {
            vert_tris[v].push(tri_idx);
        }
    }

    // Connected components on triangles
    let mut cluster_of = vec![usize::MAX; tri_count];
    let mut cluster_sizes: Vec<usize> = Vec::new();
    for start in 0..tri_count {
        if cluster_of[start] != usize::MAX {
            continue;
        }

        let id = cluster_sizes.len();
        let mut size = 0usize;
        let mut stack = vec![start];
        cluster_of[start] = id;
        while let Some(t) = stack.pop() {
            size += 1;
            for &v in &mesh.triangles[t].indices {
                for &n in &vert_tris[v] {
                    if cluster_of[n] == usize::MAX {
                        cluster_of[n] = id;
                        stack.push(n);
                    }
                }
            }
        }
        cluster_sizes.push(size);
    }

    let keep_cluster: Vec<bool> = cluster_sizes.iter().map(|&s| s >= min_triangles).collect();
    let mut stats = ClusterStats::default();
    for (&size, &keep) in cluster_sizes.iter().zip(&keep_cluster) {
        if keep {
            stats.kept_clusters += 1;
            stats.kept_triangles += size;
        } else {
            stats.removed_clusters += 1;
            stats.removed_triangles += size;
        }
    }

    if stats.removed_triangles == 0 {
        return (mesh, stats);
    }

    let triangles = mesh
        .triangles
        .iter()
        .zip(&cluster_of)
        .filter(|(_, &c)| keep_cluster[c])
        .map(|(t, _)| *t)
        .collect();
    let mut filtered = Mesh {
        vertices: mesh.vertices,
        triangles,
    };
    remove_unreferenced_vertices(&mut filtered);
    (filtered, stats)
}

/// Mandatory cleanup applied to every output mesh.
pub fn cleanup(mesh: &mut Mesh) -> CleanupStats {
    let mut stats = CleanupStats {
        merged_vertices: merge_duplicate_vertices(mesh),
        ..Default::default()
    };

    let before = mesh.triangles.len();
    mesh.triangles.retain(|t| {
        let [a, b, c] = t.indices;
        a != b && b != c && a != c
    });
    stats.degenerate_triangles = before - mesh.triangles.len();

    let before = mesh.triangles.len();
    let mut seen: HashSet<[usize; 3]> = HashSet::with_capacity(before);
    mesh.triangles.retain(|t| {
        let mut key = t.indices;
        key.sort_unstable();
        seen.insert(key)
    });
    stats.duplicate_triangles = before - mesh.triangles.len();

    stats.unreferenced_vertices = remove_unreferenced_vertices(mesh);
    mesh.compute_vertex_normals();

    log::debug!(
        "Mesh cleanup: merged {} vertices, removed {} degenerate and {} duplicate triangles, {} unreferenced vertices",
        stats.merged_vertices,
        stats.degenerate_triangles,
        stats.duplicate_triangles,
        stats.unreferenced_vertices
    );
    stats
}

/// Merge vertices with bit-identical positions; the first occurrence wins.
fn merge_duplicate_vertices(mesh: &mut Mesh) -> usize {
    let mut first_at: HashMap<[u32; 3], usize> = HashMap::with_capacity(mesh.vertices.len());
    let mut remap = Vec::with_capacity(mesh.vertices.len());
    let mut vertices = Vec::with_capacity(mesh.vertices.len());

    for v in &mesh.vertices {
        // +0.0 and -0.0 are the same point
        let p = v.position + glam::Vec3::ZERO;
        let key = p.to_array().map(f32::to_bits);
        let idx = *first_at.entry(key).or_insert_with(|| {
            vertices.push(v.clone());
            vertices.len() - 1
        });
        remap.push(idx);
    }

    let merged = mesh.vertices.len() - vertices.len();
    if merged > 0 {
        for tri in &mut mesh.triangles {
            tri.indices = tri.indices.map(|i| remap[i]);
        }
        mesh.vertices = vertices;
    }
    merged
}

/// Drop vertices no triangle uses, keeping the order of the rest.
/// Returns the count removed.
fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let mut used = vec![false; mesh.vertices.len()];
    for tri in &mesh.triangles {
        for &v in &tri.indices {
            used[v] = true;
        }
    }

    let mut index_map = vec![usize::MAX; mesh.vertices.len()];
    let mut next = 0usize;
    for (slot, &keep) in index_map.iter_mut().zip(&used) {
        if keep {
            *slot = next;
            next += 1;
        }
    }

    let removed = mesh.vertices.len() - next;
    if removed == 0 {
        return 0;
    }

    let mut keep = used.iter();
    mesh.vertices.retain(|_| keep.next().copied().unwrap_or(false));
    for tri in &mut mesh.triangles {
        tri.indices = tri.indices.map(|i| index_map[i]);
    }
    removed
}

/// Count boundary (one incident triangle) and non-manifold (three or more) edges.
pub fn validate_topology(mesh: &Mesh) -> TopologyStats {
    let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
    for tri in &mesh.triangles {
        let [a, b, c] = tri.indices;
        for (u, v) in [(a, b), (b, c), (c, a)] {
            let key = if u < v { (u, v) } else { (v, u) };
            *edges.entry(key).or_insert(0) += 1;
        }
    }

    let mut stats = TopologyStats::default();
    for count in edges.values() {
        if *count == 1 {
            stats.boundary_edges += 1;
        } else if *count > 2 {
            stats.non_manifold_edges += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::mesh::MeshVertex;
    use crate::test_utils::create_grid_mesh;
    use glam::Vec3;

    fn push_vertices(mesh: &mut Mesh, points: &[Vec3]) {
        for &p in points {
            mesh.add_vertex(MeshVertex::new(p, [1.0, 1.0, 1.0]));
        }
    }

    #[test]
    fn test_filter_clusters_removes_small_components() {
        let mut mesh = Mesh::new();
        push_vertices(
            &mut mesh,
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(2.0, 1.0, 0.0),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::new(11.0, 0.0, 0.0),
                Vec3::new(10.0, 1.0, 0.0),
            ],
        );
        mesh.add_triangle(0, 1, 2);
        mesh.add_triangle(1, 3, 2);
        mesh.add_triangle(6, 7, 8);

        let (filtered, stats) = filter_clusters(mesh, 2);
        assert_eq!(filtered.triangles.len(), 2);
        assert_eq!(filtered.vertices.len(), 4);
        assert_eq!(stats.removed_triangles, 1);
        assert_eq!(stats.removed_clusters, 1);
        assert_eq!(stats.kept_clusters, 1);
    }

    #[test]
    fn test_cleanup_merges_and_removes() {
        let mut mesh = Mesh::new();
        push_vertices(
            &mut mesh,
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                // duplicate of vertex 1
                Vec3::new(1.0, 0.0, 0.0),
                // unreferenced
                Vec3::new(5.0, 5.0, 5.0),
            ],
        );
        mesh.add_triangle(0, 1, 2);
        // same triangle through the duplicate vertex, reversed
        mesh.add_triangle(0, 2, 3);
        // collapses onto an edge after merging
        mesh.add_triangle(1, 3, 2);

        let stats = cleanup(&mut mesh);
        assert_eq!(stats.merged_vertices, 1);
        assert_eq!(stats.degenerate_triangles, 1);
        assert_eq!(stats.duplicate_triangles, 1);
        assert_eq!(stats.unreferenced_vertices, 1);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
        assert!((mesh.vertices[0].normal - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_topology_of_open_grid() {
        let mesh = create_grid_mesh(3, 3, 1.0);
        let topo = validate_topology(&mesh);
        assert_eq!(topo.boundary_edges, 8);
        assert_eq!(topo.non_manifold_edges, 0);
        assert!(!topo.is_watertight());
    }

    #[test]
    fn test_smoothing_fix_boundary_keeps_extent() {
        let params = PostProcessingParams {
            decimation_target_triangles: 0,
            ..Default::default()
        };
        let extent = |fix_boundary: bool| {
            let processor = MeshPostProcessor::new(PostProcessingParams {
                smoothing_fix_boundary: fix_boundary,
                ..params.clone()
            });
            let (out, _) = processor.process(create_grid_mesh(6, 6, 0.1));
            out.bounding_box().unwrap()
        };

        let original = create_grid_mesh(6, 6, 0.1).bounding_box().unwrap();
        let (min, max) = extent(true);
        assert!((min - original.0).length() < 1e-6);
        assert!((max - original.1).length() < 1e-6);

        let (min, max) = extent(false);
        assert!((max - min).x < (original.1 - original.0).x);
    }

    #[test]
    fn test_disabled_post_processing_only_cleans() {
        let mut mesh = create_grid_mesh(6, 6, 0.1);
        mesh.vertices[14].position.z = 0.3;
        let before = mesh.vertices[14].position;

        let processor = MeshPostProcessor::new(PostProcessingParams {
            enable: false,
            ..Default::default()
        });
        let (out, stats) = processor.process(mesh);
        assert_eq!(out.triangle_count(), 50);
        assert_eq!(out.vertices[14].position, before);
        assert!(stats.smoothing.is_none());
        assert!(stats.decimation.is_none());
    }

    #[test]
    fn test_full_chain_on_grid() {
        let mut mesh = create_grid_mesh(11, 11, 0.1);
        // A floater far away from the grid
        let base = mesh.vertex_count();
        push_vertices(
            &mut mesh,
            &[Vec3::new(5.0, 5.0, 5.0), Vec3::new(5.1, 5.0, 5.0), Vec3::new(5.0, 5.1, 5.0)],
        );
        mesh.add_triangle(base, base + 1, base + 2);

        let processor = MeshPostProcessor::new(PostProcessingParams {
            smoothing_iterations: 2,
            decimation_target_triangles: 60,
            ..Default::default()
        });
        let (out, stats) = processor.process(mesh);

        assert_eq!(stats.input_triangles, 201);
        assert_eq!(stats.clusters.removed_triangles, 1);
        assert!(stats.smoothing.is_some());
        assert!(stats.decimation.is_some());
        assert!(out.triangle_count() <= 60);
        assert!(out.vertices.iter().all(|v| v.position.z.abs() < 1e-5));
        assert_eq!(validate_topology(&out).non_manifold_edges, 0);
    }
}
