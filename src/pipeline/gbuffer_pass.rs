//! G-buffer pass for deferred rendering
//!
//! Fills three color targets plus depth. Normals are stored octahedrally
//! encoded in a two-channel float target; world positions are never
//! stored and get reconstructed from depth in the lighting passes.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::{DrawRecord, SHADER_CAMERA, SHADER_GBUFFER_CODEC};
use crate::render_graph::{PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage};
use crate::resources::{GpuMesh, Material};
use crate::scene::Scene;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::any::Any;

/// Per-object uniform holding the transform and the material
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GBufferObjectUniform {
    model: Mat4,
    normal_matrix: Mat4,
    base_color: Vec4,
    specular_roughness: Vec4,
}

/// Geometry pass writing the G-buffer
pub struct GBufferPass {
    pub depth: Option<ResourceId>,
    pub normal: Option<ResourceId>,
    pub albedo: Option<ResourceId>,
    pub specular: Option<ResourceId>,

    pipeline: Option<RenderPipelineHandle>,
    camera_buffer: Option<BufferHandle>,
    camera_bind_group: Option<BindGroupHandle>,
    object_layout: Option<BindGroupLayoutHandle>,

    /// Reused per-object uniform buffers, grown on demand
    object_slots: Vec<(BufferHandle, BindGroupHandle)>,
    draws: Vec<DrawRecord>,
}

impl GBufferPass {
    pub fn new() -> Self {
        Self {
            depth: None,
            normal: None,
            albedo: None,
            specular: None,
            pipeline: None,
            camera_buffer: None,
            camera_bind_group: None,
            object_layout: None,
            object_slots: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Create pipeline state; called once after the graph is built
    pub fn initialize<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<()> {
        let camera_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;
        let object_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;

        let camera_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("gbuffer_camera".to_string()),
            size: std::mem::size_of::<crate::scene::CameraUniformData>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;
        let camera_bind_group = backend.create_bind_group(
            camera_layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: camera_buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("gbuffer".to_string()),
            shader: gbuffer_shader(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: Some("fs_main".to_string()),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![camera_layout, object_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![
                ColorTargetState {
                    format: TextureFormat::Rg16Float,
                    blend: None,
                },
                ColorTargetState {
                    format: TextureFormat::Rgba8Unorm,
                    blend: None,
                },
                ColorTargetState {
                    format: TextureFormat::Rgba8Unorm,
                    blend: None,
                },
            ],
        })?;

        self.pipeline = Some(pipeline);
        self.camera_buffer = Some(camera_buffer);
        self.camera_bind_group = Some(camera_bind_group);
        self.object_layout = Some(object_layout);
        Ok(())
    }

    /// Write this frame's uniforms and rebuild the draw list
    pub fn update<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        meshes: &[GpuMesh],
        materials: &[Material],
        aspect: f32,
    ) -> BackendResult<()> {
        let (Some(camera_buffer), Some(object_layout)) = (self.camera_buffer, self.object_layout)
        else {
            return Ok(());
        };

        let camera_data = scene.camera.uniform_data(aspect);
        backend.write_buffer(camera_buffer, 0, bytemuck::bytes_of(&camera_data));

        self.draws.clear();
        for (index, object) in scene.objects.iter().enumerate() {
            let Some(mesh) = meshes.get(object.mesh_id) else {
                continue;
            };
            let material = materials
                .get(object.material_id)
                .cloned()
                .unwrap_or_default();

            while self.object_slots.len() <= index {
                let buffer = backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("gbuffer_object_{}", self.object_slots.len())),
                    size: std::mem::size_of::<GBufferObjectUniform>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                let bind_group = backend.create_bind_group(
                    object_layout,
                    &[(
                        0,
                        BindGroupEntry::Buffer {
                            buffer,
                            offset: 0,
                            size: None,
                        },
                    )],
                )?;
                self.object_slots.push((buffer, bind_group));
            }

            let (buffer, bind_group) = self.object_slots[index];
            let material_data = material.uniform_data();
            let uniform = GBufferObjectUniform {
                model: object.transform.matrix(),
                normal_matrix: object.transform.normal_matrix(),
                base_color: material_data.base_color,
                specular_roughness: material_data.specular_roughness,
            };
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));

            self.draws.push(DrawRecord {
                vertex_buffer: mesh.vertex_buffer,
                index_buffer: mesh.index_buffer,
                index_count: mesh.index_count,
                object_bind_group: bind_group,
            });
        }
        Ok(())
    }
}

impl Default for GBufferPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "gbuffer"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
        let size = crate::render_graph::TextureSize::default();

        let depth =
            ctx.create_texture_relative("gbuffer_depth", size, TextureFormat::Depth32Float, usage);
        let normal =
            ctx.create_texture_relative("gbuffer_normal", size, TextureFormat::Rg16Float, usage);
        let albedo =
            ctx.create_texture_relative("gbuffer_albedo", size, TextureFormat::Rgba8Unorm, usage);
        let specular =
            ctx.create_texture_relative("gbuffer_specular", size, TextureFormat::Rgba8Unorm, usage);

        ctx.write(depth, ResourceUsage::DepthStencilWrite);
        ctx.write(normal, ResourceUsage::RenderTarget);
        ctx.write(albedo, ResourceUsage::RenderTarget);
        ctx.write(specular, ResourceUsage::RenderTarget);

        self.depth = Some(depth);
        self.normal = Some(normal);
        self.albedo = Some(albedo);
        self.specular = Some(specular);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(pipeline), Some(camera_bind_group)) = (self.pipeline, self.camera_bind_group)
        else {
            return;
        };
        let views = (
            self.normal.and_then(|r| ctx.get_texture(r)),
            self.albedo.and_then(|r| ctx.get_texture(r)),
            self.specular.and_then(|r| ctx.get_texture(r)),
            self.depth.and_then(|r| ctx.get_texture(r)),
        );
        let (Some(normal), Some(albedo), Some(specular), Some(depth)) = views else {
            return;
        };

        let desc = RenderPassDescriptor {
            label: Some("gbuffer".to_string()),
            color_attachments: vec![
                ColorAttachment {
                    view: normal,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                    store_op: StoreOp::Store,
                },
                ColorAttachment {
                    view: albedo,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                    store_op: StoreOp::Store,
                },
                ColorAttachment {
                    view: specular,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                    store_op: StoreOp::Store,
                },
            ],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth,
                depth_load_op: LoadOp::Clear([0.0; 4]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        };

        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };
        backend.begin_render_pass(&desc);
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, camera_bind_group);
        for draw in &self.draws {
            backend.set_bind_group(1, draw.object_bind_group);
            backend.set_vertex_buffer(0, draw.vertex_buffer, 0);
            backend.set_index_buffer(draw.index_buffer, 0, IndexFormat::Uint32);
            backend.draw_indexed(0..draw.index_count, 0, 0..1);
        }
        backend.end_render_pass();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn gbuffer_shader() -> String {
    format!(
        "{}{}{}",
        SHADER_CAMERA, SHADER_GBUFFER_CODEC, GBUFFER_SHADER_BODY
    )
}

const GBUFFER_SHADER_BODY: &str = r#"
struct ObjectData {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    base_color: vec4<f32>,
    specular_roughness: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(1) @binding(0) var<uniform> object: ObjectData;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = object.model * vec4<f32>(in.position, 1.0);
    out.clip_position = camera.view_proj * world_position;
    out.world_normal = normalize((object.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz);
    out.uv = in.uv;
    return out;
}

struct GBufferOutput {
    @location(0) normal: vec2<f32>,
    @location(1) albedo: vec4<f32>,
    @location(2) specular: vec4<f32>,
};

@fragment
fn fs_main(in: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;
    out.normal = encode_normal(normalize(in.world_normal));
    out.albedo = vec4<f32>(object.base_color.rgb, 1.0);
    out.specular = object.specular_roughness;
    return out;
}
"#;

/// Octahedral normal encoding, mirrored in WGSL above
pub fn encode_normal(n: Vec3) -> Vec2 {
    let n = n.normalize();
    let p = Vec2::new(n.x, n.y) / (n.x.abs() + n.y.abs() + n.z.abs());
    if n.z < 0.0 {
        (Vec2::ONE - Vec2::new(p.y.abs(), p.x.abs())) * sign_not_zero(p)
    } else {
        p
    }
}

/// Inverse of [`encode_normal`]
pub fn decode_normal(e: Vec2) -> Vec3 {
    let mut n = Vec3::new(e.x, e.y, 1.0 - e.x.abs() - e.y.abs());
    if n.z < 0.0 {
        let xy = (Vec2::ONE - Vec2::new(n.y.abs(), n.x.abs())) * sign_not_zero(Vec2::new(n.x, n.y));
        n.x = xy.x;
        n.y = xy.y;
    }
    n.normalize()
}

fn sign_not_zero(v: Vec2) -> Vec2 {
    Vec2::new(
        if v.x >= 0.0 { 1.0 } else { -1.0 },
        if v.y >= 0.0 { 1.0 } else { -1.0 },
    )
}

/// Reconstruct a world-space position from screen UV and depth
///
/// UV has y down; depth is the zero-to-one value stored in the depth
/// target. Mirrors `reconstruct_world_position` in the shaders.
pub fn reconstruct_position(uv: Vec2, depth: f32, inv_view_proj: Mat4) -> Vec3 {
    let ndc = Vec3::new(uv.x * 2.0 - 1.0, (1.0 - uv.y) * 2.0 - 1.0, depth);
    let world = inv_view_proj * ndc.extend(1.0);
    world.truncate() / world.w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;
    use approx::assert_relative_eq;

    fn direction_grid() -> Vec<Vec3> {
        let mut dirs = Vec::new();
        let steps = 24;
        for i in 0..steps {
            for j in 1..steps {
                let theta = 2.0 * std::f32::consts::PI * i as f32 / steps as f32;
                let phi = std::f32::consts::PI * j as f32 / steps as f32;
                dirs.push(Vec3::new(
                    phi.sin() * theta.cos(),
                    phi.sin() * theta.sin(),
                    phi.cos(),
                ));
            }
        }
        dirs.push(Vec3::Z);
        dirs.push(Vec3::NEG_Z);
        dirs
    }

    #[test]
    fn octahedral_roundtrip_preserves_direction() {
        for dir in direction_grid() {
            let decoded = decode_normal(encode_normal(dir));
            assert!(
                dir.dot(decoded) > 0.9999,
                "direction {:?} decoded to {:?}",
                dir,
                decoded
            );
        }
    }

    #[test]
    fn encoded_components_stay_in_unit_square() {
        for dir in direction_grid() {
            let e = encode_normal(dir);
            assert!(e.x.abs() <= 1.0 + 1e-6 && e.y.abs() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn reconstructed_position_matches_projected_point() {
        let mut camera = Camera::default();
        camera.set_pose(Vec3::new(1.0, 3.0, -4.0), 140.0, -15.0);
        let aspect = 16.0 / 9.0;
        let data = camera.uniform_data(aspect);

        // A point in front of the camera
        let world = camera.position + camera.front() * 12.0 + Vec3::new(0.5, -0.8, 0.3);
        let clip = data.view_proj * world.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let uv = Vec2::new(ndc.x * 0.5 + 0.5, 1.0 - (ndc.y * 0.5 + 0.5));

        let reconstructed = reconstruct_position(uv, ndc.z, data.inv_view_proj);
        assert_relative_eq!(reconstructed.x, world.x, epsilon = 1e-3);
        assert_relative_eq!(reconstructed.y, world.y, epsilon = 1e-3);
        assert_relative_eq!(reconstructed.z, world.z, epsilon = 1e-3);
    }
}
