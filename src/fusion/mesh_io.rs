//! Mesh export and import (OBJ, PLY, STL).

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fusion::mesh::{Mesh, MeshTriangle, MeshVertex};

#[derive(Debug, Error)]
pub enum MeshIoError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: String, source: io::Error },
    #[error("failed to write mesh {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("failed to read mesh {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("unsupported mesh format: {0}")]
    UnsupportedFormat(String),
}

/// Output mesh file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    Obj,
    Ply,
    Stl,
}

impl MeshFormat {
    pub fn extension(self) -> &'static str {
        match self {
            MeshFormat::Obj => "obj",
            MeshFormat::Ply => "ply",
            MeshFormat::Stl => "stl",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()?.to_str()?.parse().ok()
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for MeshFormat {
    type Err = MeshIoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "obj" => Ok(MeshFormat::Obj),
            "ply" => Ok(MeshFormat::Ply),
            "stl" => Ok(MeshFormat::Stl),
            other => Err(MeshIoError::UnsupportedFormat(other.to_string())),
        }
    }
}

fn write_err(path: &Path) -> impl FnOnce(io::Error) -> MeshIoError + '_ {
    move |source| MeshIoError::Write {
        path: path.display().to_string(),
        source,
    }
}

fn read_err(path: &Path) -> impl FnOnce(io::Error) -> MeshIoError + '_ {
    move |source| MeshIoError::Read {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, line: usize, message: impl Into<String>) -> MeshIoError {
    MeshIoError::Parse {
        path: path.display().to_string(),
        line,
        message: message.into(),
    }
}

#[inline]
fn color_to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn save_mesh_obj(path: &Path, mesh: &Mesh) -> Result<(), MeshIoError> {
    let file = File::create(path).map_err(write_err(path))?;
    let mut writer = BufWriter::new(file);
    write_obj(&mut writer, mesh)
        .and_then(|_| writer.flush())
        .map_err(write_err(path))
}

fn write_obj<W: Write>(writer: &mut W, mesh: &Mesh) -> io::Result<()> {
    writeln!(writer, "# questfusion mesh")?;
    writeln!(writer, "# vertices {}", mesh.vertices.len())?;
    writeln!(writer, "# triangles {}", mesh.triangles.len())?;

    for v in &mesh.vertices {
        let [r, g, b] = v.color.map(|c| color_to_u8(c) as f32 / 255.0);
        writeln!(
            writer,
            "v {} {} {} {} {} {}",
            v.position.x, v.position.y, v.position.z, r, g, b
        )?;
    }
    for v in &mesh.vertices {
        writeln!(writer, "vn {} {} {}", v.normal.x, v.normal.y, v.normal.z)?;
    }
    for tri in &mesh.triangles {
        let [a, b, c] = tri.indices.map(|i| i + 1);
        writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
    }
    Ok(())
}

pub fn save_mesh_ply(path: &Path, mesh: &Mesh) -> Result<(), MeshIoError> {
    let file = File::create(path).map_err(write_err(path))?;
    let mut writer = BufWriter::new(file);
    write_ply(&mut writer, mesh)
        .and_then(|_| writer.flush())
        .map_err(write_err(path))
}

fn write_ply<W: Write>(writer: &mut W, mesh: &Mesh) -> io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "comment questfusion mesh")?;
    writeln!(writer, "element vertex {}", mesh.vertices.len())?;
    for name in ["x", "y", "z", "nx", "ny", "nz"] {
        writeln!(writer, "property float {name}")?;
    }
    for name in ["red", "green", "blue"] {
        writeln!(writer, "property uchar {name}")?;
    }
    writeln!(writer, "element face {}", mesh.triangles.len())?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "end_header")?;

    for v in &mesh.vertices {
        let [r, g, b] = v.color.map(color_to_u8);
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {} {}",
            v.position.x, v.position.y, v.position.z, v.normal.x, v.normal.y, v.normal.z, r, g, b
        )?;
    }
    for tri in &mesh.triangles {
        let [a, b, c] = tri.indices;
        writeln!(writer, "3 {a} {b} {c}")?;
    }
    Ok(())
}

/// Binary STL bytes: 80-byte header, triangle count, then 50 bytes per facet.
pub fn mesh_to_binary_stl_bytes(mesh: &Mesh, header_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(84 + mesh.triangles.len() * 50);

    let mut header = [0u8; 80];
    let name_bytes = header_name.as_bytes();
    let copy_n = name_bytes.len().min(header.len());
    header[..copy_n].copy_from_slice(&name_bytes[..copy_n]);
    out.extend_from_slice(&header);

    out.extend_from_slice(&(mesh.triangles.len() as u32).to_le_bytes());

    for tri in &mesh.triangles {
        let n = mesh.face_normal(tri).normalize_or_zero();
        for c in n.to_array() {
            out.extend_from_slice(&c.to_le_bytes());
        }
        for &i in &tri.indices {
            for c in mesh.vertices[i].position.to_array() {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    out
}

pub fn save_mesh_stl(path: &Path, mesh: &Mesh) -> Result<(), MeshIoError> {
    let bytes = mesh_to_binary_stl_bytes(mesh, "questfusion mesh");
    fs::write(path, bytes).map_err(write_err(path))
}

/// Write `mesh` to `path` in `format`.
pub fn save_mesh(path: &Path, mesh: &Mesh, format: MeshFormat) -> Result<(), MeshIoError> {
    match format {
        MeshFormat::Obj => save_mesh_obj(path, mesh),
        MeshFormat::Ply => save_mesh_ply(path, mesh),
        MeshFormat::Stl => save_mesh_stl(path, mesh),
    }
}

/// Write `mesh.<ext>` under `output_dir`, creating the directory if needed.
pub fn export_mesh(output_dir: &Path, mesh: &Mesh, format: MeshFormat) -> Result<PathBuf, MeshIoError> {
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|source| MeshIoError::CreateDir {
            path: output_dir.display().to_string(),
            source,
        })?;
    }

    let path = output_dir.join(format!("mesh.{}", format.extension()));
    save_mesh(&path, mesh, format)?;
    log::info!(
        "Exported mesh ({} vertices, {} triangles) to {}",
        mesh.vertices.len(),
        mesh.triangles.len(),
        path.display()
    );
    Ok(path)
}

fn parse_f32(path: &Path, line: usize, token: Option<&str>, what: &str) -> Result<f32, MeshIoError> {
    token
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_err(path, line, format!("invalid {what}")))
}

/// Resolve a 1-based (or negative, relative) OBJ index.
fn obj_index(token: &str, count: usize) -> Option<usize> {
    let raw: i64 = token.split('/').next()?.parse().ok()?;
    let idx = if raw < 0 { count as i64 + raw } else { raw - 1 };
    (0..count as i64).contains(&idx).then_some(idx as usize)
}

/// Read an OBJ file written by [`save_mesh_obj`] or any triangle/polygon OBJ.
///
/// Polygons are fan-triangulated. Per-vertex colors (`v x y z r g b`) are
/// kept; normals are taken from `vn` when one exists per vertex, otherwise
/// recomputed.
pub fn read_obj(path: &Path) -> Result<Mesh, MeshIoError> {
    let file = File::open(path).map_err(read_err(path))?;
    let reader = BufReader::new(file);

    let mut mesh = Mesh::new();
    let mut normals: Vec<Vec3> = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(read_err(path))?;
        let line_num = line_num + 1;
        let mut parts = line.split_whitespace();

        match parts.next() {
            Some("v") => {
                let coords: Vec<&str> = parts.collect();
                if coords.len() < 3 {
                    return Err(parse_err(path, line_num, "vertex requires 3 coordinates"));
                }
                let x = parse_f32(path, line_num, coords.first().copied(), "x coordinate")?;
                let y = parse_f32(path, line_num, coords.get(1).copied(), "y coordinate")?;
                let z = parse_f32(path, line_num, coords.get(2).copied(), "z coordinate")?;
                let color = if coords.len() >= 6 {
                    [
                        parse_f32(path, line_num, coords.get(3).copied(), "red")?,
                        parse_f32(path, line_num, coords.get(4).copied(), "green")?,
                        parse_f32(path, line_num, coords.get(5).copied(), "blue")?,
                    ]
                } else {
                    [0.5; 3]
                };
                mesh.add_vertex(MeshVertex::new(Vec3::new(x, y, z), color));
            }
            Some("vn") => {
                let x = parse_f32(path, line_num, parts.next(), "normal")?;
                let y = parse_f32(path, line_num, parts.next(), "normal")?;
                let z = parse_f32(path, line_num, parts.next(), "normal")?;
                normals.push(Vec3::new(x, y, z));
            }
            Some("f") => {
                let count = mesh.vertices.len();
                let face = parts
                    .map(|t| obj_index(t, count))
                    .collect::<Option<Vec<usize>>>()
                    .ok_or_else(|| parse_err(path, line_num, "vertex index out of bounds"))?;
                if face.len() < 3 {
                    return Err(parse_err(path, line_num, "face requires at least 3 vertices"));
                }
                for k in 1..face.len() - 1 {
                    mesh.add_triangle(face[0], face[k], face[k + 1]);
                }
            }
            // Comments, groups, materials and texture coordinates carry nothing we keep.
            _ => {}
        }
    }

    if normals.len() == mesh.vertices.len() {
        for (v, n) in mesh.vertices.iter_mut().zip(normals) {
            v.normal = n;
        }
    } else {
        mesh.compute_vertex_normals();
    }
    Ok(mesh)
}

/// Read an ASCII PLY file with float vertex properties and a face list.
///
/// Unknown vertex properties are skipped; `red/green/blue` are read as
/// 0-255 values and normals as `nx/ny/nz` when present.
pub fn read_ply(path: &Path) -> Result<Mesh, MeshIoError> {
    let file = File::open(path).map_err(read_err(path))?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let mut next_line = || -> Result<Option<(usize, String)>, MeshIoError> {
        match lines.next() {
            Some((n, line)) => Ok(Some((n + 1, line.map_err(read_err(path))?))),
            None => Ok(None),
        }
    };

    let mut vertex_count = 0usize;
    let mut face_count = 0usize;
    let mut vertex_props: Vec<String> = Vec::new();
    let mut in_vertex_element = false;

    match next_line()? {
        Some((_, l)) if l.trim() == "ply" => {}
        _ => return Err(parse_err(path, 1, "missing ply magic")),
    }

    loop {
        let Some((line_num, line)) = next_line()? else {
            return Err(parse_err(path, 0, "unexpected end of header"));
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["format", fmt, ..] if *fmt != "ascii" => {
                return Err(parse_err(path, line_num, format!("unsupported PLY format {fmt}")));
            }
            ["element", "vertex", n] => {
                vertex_count = n
                    .parse()
                    .map_err(|_| parse_err(path, line_num, "invalid vertex count"))?;
                in_vertex_element = true;
            }
            ["element", "face", n] => {
                face_count = n
                    .parse()
                    .map_err(|_| parse_err(path, line_num, "invalid face count"))?;
                in_vertex_element = false;
            }
            ["element", ..] => in_vertex_element = false,
            ["property", "list", ..] => {}
            ["property", _, name] if in_vertex_element => vertex_props.push(name.to_string()),
            ["end_header"] => break,
            _ => {}
        }
    }

    let prop = |name: &str| vertex_props.iter().position(|p| p == name);
    let (Some(ix), Some(iy), Some(iz)) = (prop("x"), prop("y"), prop("z")) else {
        return Err(parse_err(path, 0, "vertex element lacks x/y/z"));
    };
    let normal_idx = prop("nx").zip(prop("ny")).zip(prop("nz"));
    let color_idx = prop("red").zip(prop("green")).zip(prop("blue"));

    let mut mesh = Mesh::new();
    for _ in 0..vertex_count {
        let Some((line_num, line)) = next_line()? else {
            return Err(parse_err(path, 0, "unexpected end of vertex data"));
        };
        let values = line
            .split_whitespace()
            .map(|t| t.parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|_| parse_err(path, line_num, "invalid vertex value"))?;
        if values.len() < vertex_props.len() {
            return Err(parse_err(path, line_num, "too few vertex values"));
        }

        let color = match color_idx {
            Some(((r, g), b)) => [values[r] / 255.0, values[g] / 255.0, values[b] / 255.0],
            None => [0.5; 3],
        };
        let mut vertex = MeshVertex::new(Vec3::new(values[ix], values[iy], values[iz]), color);
        if let Some(((nx, ny), nz)) = normal_idx {
            vertex.normal = Vec3::new(values[nx], values[ny], values[nz]);
        }
        mesh.add_vertex(vertex);
    }

    for _ in 0..face_count {
        let Some((line_num, line)) = next_line()? else {
            return Err(parse_err(path, 0, "unexpected end of face data"));
        };
        let values = line
            .split_whitespace()
            .map(|t| t.parse::<usize>())
            .collect::<Result<Vec<usize>, _>>()
            .map_err(|_| parse_err(path, line_num, "invalid face index"))?;
        let Some((&n, indices)) = values.split_first() else {
            return Err(parse_err(path, line_num, "empty face"));
        };
        if n < 3 || indices.len() < n || indices[..n].iter().any(|&i| i >= vertex_count) {
            return Err(parse_err(path, line_num, "malformed face"));
        }
        for k in 1..n - 1 {
            mesh.triangles.push(MeshTriangle {
                indices: [indices[0], indices[k], indices[k + 1]],
            });
        }
    }

    if normal_idx.is_none() {
        mesh.compute_vertex_normals();
    }
    Ok(mesh)
}

/// Read a mesh, choosing the parser by extension.
pub fn read_mesh(path: &Path) -> Result<Mesh, MeshIoError> {
    match MeshFormat::from_path(path) {
        Some(MeshFormat::Obj) => read_obj(path),
        Some(MeshFormat::Ply) => read_ply(path),
        _ => Err(MeshIoError::UnsupportedFormat(path.display().to_string())),
    }
}
