//! Indexed triangle mesh produced by isosurface extraction.

use glam::Vec3;

/// Mesh vertex with normal and color
#[derive(Debug, Clone, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    /// RGB in `[0, 1]`.
    pub color: [f32; 3],
}

impl MeshVertex {
    pub fn new(position: Vec3, color: [f32; 3]) -> Self {
        Self {
            position,
            normal: Vec3::ZERO,
            color,
        }
    }
}

/// Triangle with counter-clockwise vertex indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshTriangle {
    pub indices: [usize; 3],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub triangles: Vec<MeshTriangle>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn add_vertex(&mut self, vertex: MeshVertex) -> usize {
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }

    pub fn add_triangle(&mut self, a: usize, b: usize, c: usize) {
        self.triangles.push(MeshTriangle { indices: [a, b, c] });
    }

    /// Unnormalized face normal; its length is twice the triangle area.
    pub fn face_normal(&self, tri: &MeshTriangle) -> Vec3 {
        let [a, b, c] = tri.indices;
        let p0 = self.vertices[a].position;
        (self.vertices[b].position - p0).cross(self.vertices[c].position - p0)
    }

    /// Area-weighted vertex normals. Isolated vertices get a zero normal.
    pub fn compute_vertex_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];
        for tri in &self.triangles {
            let n = self.face_normal(tri);
            for &i in &tri.indices {
                normals[i] += n;
            }
        }
        for (vertex, n) in self.vertices.iter_mut().zip(normals) {
            vertex.normal = n.normalize_or_zero();
        }
    }

    pub fn surface_area(&self) -> f32 {
        self.triangles
            .iter()
            .map(|t| self.face_normal(t).length() * 0.5)
            .sum()
    }

    /// Axis-aligned bounds; `None` for a mesh without vertices.
    pub fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        let first = self.vertices.first()?.position;
        Some(self.vertices[1..].iter().fold((first, first), |(lo, hi), v| {
            (lo.min(v.position), hi.max(v.position))
        }))
    }
}
