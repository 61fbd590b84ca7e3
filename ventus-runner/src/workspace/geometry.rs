//! Surface geometry input
//!
//! Loads the uploaded building geometry into a triangle soup, measures its
//! bounding box and re-emits it as the ASCII STL the mesher reads. Supported
//! inputs are STL (ASCII or binary), Wavefront OBJ, PLY (ASCII or binary)
//! and glTF 2.0 (`.gltf` or `.glb`).

use ply_rs::parser::Parser as PlyParser;
use ply_rs::ply::{DefaultElement, Property};
use std::fmt::Write;
use std::path::Path;
use tracing::debug;

use crate::workspace::SetupError;
use crate::workspace::foam::num;

pub type Point = [f64; 3];

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn size(&self) -> Point {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn center(&self) -> Point {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }
}

/// Triangulated surface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMesh {
    triangles: Vec<[Point; 3]>,
}

impl SurfaceMesh {
    /// Loads a geometry file, picking the reader by extension
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let read = || {
            std::fs::read(path).map_err(SetupError::io(format!(
                "Failed to read geometry {}",
                path.display()
            )))
        };

        match extension.as_str() {
            "stl" => Self::from_stl(&read()?),
            "obj" => Self::from_obj(&String::from_utf8_lossy(&read()?)),
            "ply" => Self::from_ply(&read()?),
            "gltf" | "glb" => Self::from_gltf(&read()?, path.parent()),
            "" => Err(SetupError::UnsupportedGeometry("(none)".to_string())),
            other => Err(SetupError::UnsupportedGeometry(format!(".{other}"))),
        }
    }

    pub fn from_stl(bytes: &[u8]) -> Result<Self, SetupError> {
        if is_binary_stl(bytes) {
            Self::from_binary_stl(bytes)
        } else {
            Self::from_ascii_stl(&String::from_utf8_lossy(bytes))
        }
    }

    fn from_binary_stl(bytes: &[u8]) -> Result<Self, SetupError> {
        let mut triangles = Vec::new();

        // 80-byte header, u32 count, then 50 bytes per facet:
        // normal (3 x f32), three vertices (9 x f32), attribute count (u16)
        for facet in bytes[84..].chunks_exact(50) {
            let mut triangle = [[0.0; 3]; 3];
            for (v, vertex) in triangle.iter_mut().enumerate() {
                for (axis, coord) in vertex.iter_mut().enumerate() {
                    let at = 12 + v * 12 + axis * 4;
                    let raw = [facet[at], facet[at + 1], facet[at + 2], facet[at + 3]];
                    *coord = f64::from(f32::from_le_bytes(raw));
                }
            }
            triangles.push(triangle);
        }

        Self::from_triangles(triangles)
    }

    fn from_ascii_stl(text: &str) -> Result<Self, SetupError> {
        let mut vertices = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some("vertex") {
                continue;
            }
            vertices.push(parse_point(tokens, number + 1)?);
        }

        if vertices.len() % 3 != 0 {
            return Err(SetupError::Geometry(format!(
                "STL has {} vertices, not a multiple of 3",
                vertices.len()
            )));
        }

        let triangles = vertices
            .chunks_exact(3)
            .map(|v| [v[0], v[1], v[2]])
            .collect();

        Self::from_triangles(triangles)
    }

    pub fn from_obj(text: &str) -> Result<Self, SetupError> {
        let mut vertices: Vec<Point> = Vec::new();
        let mut triangles = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let line_no = number + 1;
            let mut tokens = line.split_whitespace();

            match tokens.next() {
                Some("v") => vertices.push(parse_point(tokens, line_no)?),
                Some("f") => {
                    let corners = tokens
                        .map(|token| resolve_obj_index(token, vertices.len(), line_no))
                        .collect::<Result<Vec<_>, _>>()?;
                    if corners.len() < 3 {
                        return Err(SetupError::Geometry(format!(
                            "OBJ face on line {line_no} has fewer than 3 vertices"
                        )));
                    }
                    // Fan triangulation; fine for the convex faces exporters emit
                    for pair in corners[1..].windows(2) {
                        triangles.push([
                            vertices[corners[0]],
                            vertices[pair[0]],
                            vertices[pair[1]],
                        ]);
                    }
                }
                _ => {}
            }
        }

        Self::from_triangles(triangles)
    }

    /// PLY in any of its three encodings; faces are fan-triangulated
    pub fn from_ply(bytes: &[u8]) -> Result<Self, SetupError> {
        let mut reader = bytes;
        let ply = PlyParser::<DefaultElement>::new()
            .read_ply(&mut reader)
            .map_err(|e| SetupError::Geometry(format!("PLY: {e}")))?;

        let vertices = ply
            .payload
            .get("vertex")
            .map(|elements| {
                elements
                    .iter()
                    .enumerate()
                    .map(|(n, element)| -> Result<Point, SetupError> {
                        let mut point = [0.0; 3];
                        for (coord, key) in point.iter_mut().zip(["x", "y", "z"]) {
                            *coord = element
                                .get(key)
                                .and_then(ply_scalar)
                                .filter(|v| v.is_finite())
                                .ok_or_else(|| {
                                    SetupError::Geometry(format!("PLY vertex {n} has no valid {key}"))
                                })?;
                        }
                        Ok(point)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let mut triangles = Vec::new();
        for (n, face) in ply.payload.get("face").into_iter().flatten().enumerate() {
            let corners = face
                .get("vertex_indices")
                .or_else(|| face.get("vertex_index"))
                .and_then(ply_indices)
                .filter(|corners| corners.len() >= 3 && corners.iter().all(|&i| i < vertices.len()))
                .ok_or_else(|| SetupError::Geometry(format!("PLY face {n} is invalid")))?;

            for pair in corners[1..].windows(2) {
                triangles.push([vertices[corners[0]], vertices[pair[0]], vertices[pair[1]]]);
            }
        }

        Self::from_triangles(triangles)
    }

    /// glTF 2.0, either JSON with its buffers or a binary `.glb`
    ///
    /// Triangle primitives of the default scene are placed with their node
    /// transforms; external buffers are resolved against `base`.
    pub fn from_gltf(bytes: &[u8], base: Option<&Path>) -> Result<Self, SetupError> {
        let gltf_error = |e: gltf::Error| SetupError::Geometry(format!("glTF: {e}"));

        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(bytes).map_err(gltf_error)?;
        let buffers = gltf::import_buffers(&document, base, blob).map_err(gltf_error)?;

        let mut triangles = Vec::new();
        match document.default_scene().or_else(|| document.scenes().next()) {
            Some(scene) => {
                for node in scene.nodes() {
                    collect_node(&node, &IDENTITY, &buffers, &mut triangles)?;
                }
            }
            None => {
                for mesh in document.meshes() {
                    collect_mesh(&mesh, &IDENTITY, &buffers, &mut triangles)?;
                }
            }
        }

        Self::from_triangles(triangles)
    }

    fn from_triangles(triangles: Vec<[Point; 3]>) -> Result<Self, SetupError> {
        if triangles.is_empty() {
            return Err(SetupError::Geometry("no triangles found".to_string()));
        }
        Ok(Self { triangles })
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> Bounds {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];

        for point in self.triangles.iter().flatten() {
            for axis in 0..3 {
                min[axis] = min[axis].min(point[axis]);
                max[axis] = max[axis].max(point[axis]);
            }
        }

        Bounds { min, max }
    }

    /// ASCII STL with a single solid named `name`
    pub fn to_ascii_stl(&self, name: &str) -> String {
        let mut out = String::with_capacity(self.triangles.len() * 256);
        let _ = writeln!(out, "solid {name}");

        for [a, b, c] in &self.triangles {
            let [nx, ny, nz] = normal(a, b, c);
            let _ = writeln!(out, "  facet normal {} {} {}", num(nx), num(ny), num(nz));
            let _ = writeln!(out, "    outer loop");
            for p in [a, b, c] {
                let _ = writeln!(out, "      vertex {} {} {}", num(p[0]), num(p[1]), num(p[2]));
            }
            let _ = writeln!(out, "    endloop");
            let _ = writeln!(out, "  endfacet");
        }

        let _ = writeln!(out, "endsolid {name}");
        out
    }
}

fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    count > 0 && count.checked_mul(50).and_then(|n| n.checked_add(84)) == Some(bytes.len())
}

fn parse_point<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
    line_no: usize,
) -> Result<Point, SetupError> {
    let mut point = [0.0; 3];
    for coord in point.iter_mut() {
        *coord = tokens
            .next()
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .ok_or_else(|| SetupError::Geometry(format!("bad coordinate on line {line_no}")))?;
    }
    Ok(point)
}

/// `7`, `7/1/3` or `-2` style OBJ vertex reference to a 0-based index
fn resolve_obj_index(token: &str, count: usize, line_no: usize) -> Result<usize, SetupError> {
    let bad = || SetupError::Geometry(format!("bad face index {token:?} on line {line_no}"));

    let raw: i64 = token
        .split('/')
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(bad)?;

    let index = match raw {
        0 => return Err(bad()),
        n if n > 0 => (n - 1) as usize,
        n => count.checked_sub(n.unsigned_abs() as usize).ok_or_else(bad)?,
    };

    if index >= count {
        return Err(bad());
    }
    Ok(index)
}

fn ply_scalar(property: &Property) -> Option<f64> {
    match *property {
        Property::Float(v) => Some(f64::from(v)),
        Property::Double(v) => Some(v),
        Property::Char(v) => Some(f64::from(v)),
        Property::UChar(v) => Some(f64::from(v)),
        Property::Short(v) => Some(f64::from(v)),
        Property::UShort(v) => Some(f64::from(v)),
        Property::Int(v) => Some(f64::from(v)),
        Property::UInt(v) => Some(f64::from(v)),
        _ => None,
    }
}

fn ply_indices(property: &Property) -> Option<Vec<usize>> {
    fn convert<T: Copy + TryInto<usize>>(list: &[T]) -> Option<Vec<usize>> {
        list.iter().map(|&i| i.try_into().ok()).collect()
    }

    match property {
        Property::ListChar(list) => convert(list),
        Property::ListUChar(list) => convert(list),
        Property::ListShort(list) => convert(list),
        Property::ListUShort(list) => convert(list),
        Property::ListInt(list) => convert(list),
        Property::ListUInt(list) => convert(list),
        _ => None,
    }
}

/// Column-major 4x4 transform, as glTF stores it
type Matrix = [[f64; 4]; 4];

const IDENTITY: Matrix = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let mut out = [[0.0; 4]; 4];
    for (col, column) in out.iter_mut().enumerate() {
        for (row, cell) in column.iter_mut().enumerate() {
            *cell = (0..4).map(|k| a[k][row] * b[col][k]).sum();
        }
    }
    out
}

fn apply(m: &Matrix, p: [f32; 3]) -> Point {
    let p = p.map(f64::from);
    [0, 1, 2].map(|row| m[0][row] * p[0] + m[1][row] * p[1] + m[2][row] * p[2] + m[3][row])
}

fn collect_node(
    node: &gltf::Node<'_>,
    parent: &Matrix,
    buffers: &[gltf::buffer::Data],
    triangles: &mut Vec<[Point; 3]>,
) -> Result<(), SetupError> {
    let local = node.transform().matrix().map(|column| column.map(f64::from));
    let world = multiply(parent, &local);

    if let Some(mesh) = node.mesh() {
        collect_mesh(&mesh, &world, buffers, triangles)?;
    }
    for child in node.children() {
        collect_node(&child, &world, buffers, triangles)?;
    }
    Ok(())
}

fn collect_mesh(
    mesh: &gltf::Mesh<'_>,
    transform: &Matrix,
    buffers: &[gltf::buffer::Data],
    triangles: &mut Vec<[Point; 3]>,
) -> Result<(), SetupError> {
    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            debug!("Skipping {:?} primitive of mesh {}", primitive.mode(), mesh.index());
            continue;
        }

        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
        let Some(positions) = reader.read_positions() else {
            continue;
        };
        let positions: Vec<Point> = positions.map(|p| apply(transform, p)).collect();

        let indices: Vec<usize> = match reader.read_indices() {
            Some(indices) => indices.into_u32().map(|i| i as usize).collect(),
            None => (0..positions.len()).collect(),
        };
        if indices.iter().any(|&i| i >= positions.len()) {
            return Err(SetupError::Geometry(format!(
                "glTF mesh {} indexes past its positions",
                mesh.index()
            )));
        }

        for corner in indices.chunks_exact(3) {
            triangles.push([positions[corner[0]], positions[corner[1]], positions[corner[2]]]);
        }
    }
    Ok(())
}

fn normal(a: &Point, b: &Point, c: &Point) -> Point {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len == 0.0 {
        return [0.0; 3];
    }
    [n[0] / len, n[1] / len, n[2] / len]
}
