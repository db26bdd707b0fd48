//! Mesh data structures and procedural generation

use crate::backend::traits::*;
use crate::backend::types::{BufferDescriptor, BufferUsage, Vertex};
use glam::{Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        ];

        for (normal, tangent, bitangent) in faces {
            let base = mesh.vertices.len() as u32;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let position = normal * 0.5
                    + tangent * (u - 0.5)
                    + bitangent * (v - 0.5);
                mesh.vertices.push(Vertex {
                    position,
                    normal,
                    uv: Vec2::new(u, 1.0 - v),
                    tangent: tangent.extend(1.0),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a UV sphere of unit diameter
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                let normal = Vec3::new(x, y, z).normalize();
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos()).normalize();

                mesh.vertices.push(Vertex {
                    position: normal * 0.5,
                    normal,
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    tangent: tangent.extend(1.0),
                });
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// Create a plane on the XZ axis
    pub fn plane(width: f32, depth: f32) -> Self {
        let mut mesh = Mesh::new("plane");
        let hw = width / 2.0;
        let hd = depth / 2.0;

        for (x, z, u, v) in [
            (-hw, -hd, 0.0, 0.0),
            (hw, -hd, width, 0.0),
            (hw, hd, width, depth),
            (-hw, hd, 0.0, depth),
        ] {
            mesh.vertices.push(Vertex {
                position: Vec3::new(x, 0.0, z),
                normal: Vec3::Y,
                uv: Vec2::new(u, v),
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
        }
        mesh.indices.extend_from_slice(&[0, 2, 1, 0, 3, 2]);

        mesh
    }

    /// Low-poly unit-radius icosphere used as a point-light bounding volume
    ///
    /// Subdivision 1 (80 triangles) is plenty; the volume only needs to
    /// conservatively cover the light's range, so vertices are pushed out
    /// to the circumscribed radius.
    pub fn icosphere(subdivisions: u32) -> Self {
        let t = (1.0 + 5.0_f32.sqrt()) / 2.0;

        let mut positions: Vec<Vec3> = [
            (-1.0, t, 0.0),
            (1.0, t, 0.0),
            (-1.0, -t, 0.0),
            (1.0, -t, 0.0),
            (0.0, -1.0, t),
            (0.0, 1.0, t),
            (0.0, -1.0, -t),
            (0.0, 1.0, -t),
            (t, 0.0, -1.0),
            (t, 0.0, 1.0),
            (-t, 0.0, -1.0),
            (-t, 0.0, 1.0),
        ]
        .iter()
        .map(|&(x, y, z)| Vec3::new(x, y, z).normalize())
        .collect();

        let mut faces: Vec<[u32; 3]> = vec![
            [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
            [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
            [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
            [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
            let mut next_faces = Vec::with_capacity(faces.len() * 4);

            let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Vec3>| -> u32 {
                let key = (a.min(b), a.max(b));
                *midpoints.entry(key).or_insert_with(|| {
                    let mid = ((positions[a as usize] + positions[b as usize]) / 2.0).normalize();
                    positions.push(mid);
                    (positions.len() - 1) as u32
                })
            };

            for [a, b, c] in faces {
                let ab = midpoint(a, b, &mut positions);
                let bc = midpoint(b, c, &mut positions);
                let ca = midpoint(c, a, &mut positions);
                next_faces.push([a, ab, ca]);
                next_faces.push([ab, b, bc]);
                next_faces.push([ca, bc, c]);
                next_faces.push([ab, bc, ca]);
            }
            faces = next_faces;
        }

        // Vertices sit on the unit sphere, so faces cut inside it; scale
        // by the shallowest face plane so the volume contains the sphere
        let mut min_distance = f32::MAX;
        for [a, b, c] in &faces {
            let pa = positions[*a as usize];
            let pb = positions[*b as usize];
            let pc = positions[*c as usize];
            let n = (pb - pa).cross(pc - pa).normalize();
            min_distance = min_distance.min(n.dot(pa).abs());
        }
        let scale = 1.0 / min_distance;

        let mut mesh = Mesh::new("icosphere");
        for p in &positions {
            mesh.vertices.push(Vertex {
                position: *p * scale,
                normal: *p,
                uv: Vec2::ZERO,
                tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
            });
        }
        for [a, b, c] in faces {
            mesh.indices.extend_from_slice(&[a, b, c]);
        }

        mesh
    }
}

/// GPU-resident mesh buffers
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload<B: GraphicsBackend>(backend: &mut B, mesh: &Mesh) -> BackendResult<Self> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{}_vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX,
                mapped_at_creation: false,
            },
            mesh.vertex_bytes(),
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{}_indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX,
                mapped_at_creation: false,
            },
            mesh.index_bytes(),
        )?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_six_quads() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
    }

    #[test]
    fn icosphere_faces_stay_outside_unit_sphere() {
        let mesh = Mesh::icosphere(1);
        assert_eq!(mesh.indices.len() % 3, 0);
        for tri in mesh.indices.chunks(3) {
            let center = (mesh.vertices[tri[0] as usize].position
                + mesh.vertices[tri[1] as usize].position
                + mesh.vertices[tri[2] as usize].position)
                / 3.0;
            assert!(center.length() >= 1.0 - 1e-4);
        }
    }

    #[test]
    fn sphere_normals_are_unit_length() {
        let sphere = Mesh::sphere(16, 8);
        for v in &sphere.vertices {
            assert!((v.normal.length() - 1.0).abs() < 1e-5);
        }
    }
}
