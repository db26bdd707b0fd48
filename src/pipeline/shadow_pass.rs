//! Cascaded shadow map pass
//!
//! Renders shadow casters into one depth layer per cascade. Front faces
//! are culled while casting, which trades peter-panning for acne the
//! bias in the lighting shader can absorb. The pass owns the depth array
//! texture; the graph sees it as an external resource so the lighting
//! passes order themselves after it.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::{DrawRecord, CASCADE_COUNT};
use crate::render_graph::{PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage};
use crate::resources::GpuMesh;
use crate::scene::{Cascade, Scene};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::any::Any;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CascadeUniform {
    view_proj: Mat4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ShadowObjectUniform {
    model: Mat4,
}

/// Depth-only pass filling the cascade shadow array
pub struct ShadowPass {
    shadow_map: ResourceId,
    map_size: u32,

    texture: Option<TextureHandle>,
    layer_views: Vec<TextureViewHandle>,
    array_view: Option<TextureViewHandle>,

    pipeline: Option<RenderPipelineHandle>,
    object_layout: Option<BindGroupLayoutHandle>,
    cascade_buffers: Vec<BufferHandle>,
    cascade_bind_groups: Vec<BindGroupHandle>,

    object_slots: Vec<(BufferHandle, BindGroupHandle)>,
    draws: Vec<DrawRecord>,
    active_cascades: usize,
}

impl ShadowPass {
    /// `shadow_map` must already be registered as an external resource
    pub fn new(shadow_map: ResourceId, map_size: u32) -> Self {
        Self {
            shadow_map,
            map_size,
            texture: None,
            layer_views: Vec::new(),
            array_view: None,
            pipeline: None,
            object_layout: None,
            cascade_buffers: Vec::new(),
            cascade_bind_groups: Vec::new(),
            object_slots: Vec::new(),
            draws: Vec::new(),
            active_cascades: 0,
        }
    }

    /// Array view over every cascade layer, for the lighting passes
    pub fn array_view(&self) -> Option<TextureViewHandle> {
        self.array_view
    }

    pub fn initialize<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<()> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("shadow_map".to_string()),
            width: self.map_size,
            height: self.map_size,
            layers: CASCADE_COUNT,
            mip_levels: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        })?;
        self.layer_views.clear();
        for layer in 0..CASCADE_COUNT {
            self.layer_views
                .push(backend.create_texture_view(texture, &TextureViewDescriptor::layer(layer))?);
        }
        self.array_view =
            Some(backend.create_texture_view(texture, &TextureViewDescriptor::array())?);
        self.texture = Some(texture);

        let cascade_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;
        let object_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;

        self.cascade_buffers.clear();
        self.cascade_bind_groups.clear();
        for cascade in 0..CASCADE_COUNT {
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("shadow_cascade_{}", cascade)),
                size: std::mem::size_of::<CascadeUniform>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            })?;
            let bind_group = backend.create_bind_group(
                cascade_layout,
                &[(
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?;
            self.cascade_buffers.push(buffer);
            self.cascade_bind_groups.push(bind_group);
        }

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("shadow".to_string()),
            shader: SHADOW_SHADER.to_string(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: None,
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![cascade_layout, object_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Front,
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![],
        })?;
        self.pipeline = Some(pipeline);
        self.object_layout = Some(object_layout);
        Ok(())
    }

    /// Release the owned depth array when the frame graph rebuilds
    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(texture) = self.texture.take() {
            backend.destroy_texture(texture);
        }
        self.layer_views.clear();
        self.array_view = None;
    }

    /// Write cascade matrices and rebuild the caster draw list
    pub fn update<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        meshes: &[GpuMesh],
        cascades: &[Cascade],
    ) -> BackendResult<()> {
        let Some(object_layout) = self.object_layout else {
            return Ok(());
        };

        self.active_cascades = cascades.len().min(self.cascade_buffers.len());
        for (buffer, cascade) in self.cascade_buffers.iter().zip(cascades) {
            let uniform = CascadeUniform {
                view_proj: cascade.view_proj,
            };
            backend.write_buffer(*buffer, 0, bytemuck::bytes_of(&uniform));
        }

        self.draws.clear();
        for (index, object) in scene.shadow_casters().enumerate() {
            let Some(mesh) = meshes.get(object.mesh_id) else {
                continue;
            };

            while self.object_slots.len() <= index {
                let buffer = backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("shadow_object_{}", self.object_slots.len())),
                    size: std::mem::size_of::<ShadowObjectUniform>() as u64,
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
            let uniform = ShadowObjectUniform {
                model: object.transform.matrix(),
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

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.shadow_map, ResourceUsage::DepthStencilWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let Some(pipeline) = self.pipeline else {
            return;
        };
        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };

        for cascade in 0..self.active_cascades {
            let (Some(&view), Some(&bind_group)) = (
                self.layer_views.get(cascade),
                self.cascade_bind_groups.get(cascade),
            ) else {
                continue;
            };

            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("shadow_cascade_{}", cascade)),
                color_attachments: vec![],
                depth_stencil_attachment: Some(DepthStencilAttachment {
                    view,
                    depth_load_op: LoadOp::Clear([0.0; 4]),
                    depth_store_op: StoreOp::Store,
                    depth_clear_value: 1.0,
                }),
            });
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, bind_group);
            for draw in &self.draws {
                backend.set_bind_group(1, draw.object_bind_group);
                backend.set_vertex_buffer(0, draw.vertex_buffer, 0);
                backend.set_index_buffer(draw.index_buffer, 0, IndexFormat::Uint32);
                backend.draw_indexed(0..draw.index_count, 0, 0..1);
            }
            backend.end_render_pass();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

const SHADOW_SHADER: &str = r#"
struct CascadeData {
    view_proj: mat4x4<f32>,
};

struct ObjectData {
    model: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> cascade: CascadeData;
@group(1) @binding(0) var<uniform> object: ObjectData;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return cascade.view_proj * object.model * vec4<f32>(position, 1.0);
}
"#;

/// Project a world point into shadow-map UV plus light-space depth
///
/// Mirrors the lookup the lighting shaders perform when sampling the
/// cascade array.
pub fn light_space_uv_depth(view_proj: Mat4, world: Vec3) -> (Vec2, f32) {
    let clip = view_proj * world.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    let uv = Vec2::new(ndc.x * 0.5 + 0.5, 1.0 - (ndc.y * 0.5 + 0.5));
    (uv, ndc.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Camera, CascadeFitter, CascadeSplits, DirectionalLight};
    use approx::assert_relative_eq;

    #[test]
    fn occluder_projects_closer_than_shadowed_ground() {
        let mut camera = Camera::default();
        camera.set_pose(Vec3::new(0.0, 2.0, 8.0), -90.0, -10.0);
        // Light straight down over a floating box
        let light = DirectionalLight::new(Vec3::new(0.0, -1.0, 0.01), Vec3::ONE, 1.0);
        let cascades = CascadeFitter::default().fit(
            &camera,
            1.0,
            &light,
            &CascadeSplits::practical(CASCADE_COUNT as usize),
        );
        let view_proj = cascades[1].view_proj;

        let ground = Vec3::new(0.0, 0.0, 0.0);
        let occluder = Vec3::new(0.0, 3.5, 0.0);

        let (ground_uv, ground_depth) = light_space_uv_depth(view_proj, ground);
        let (occluder_uv, occluder_depth) = light_space_uv_depth(view_proj, occluder);

        // Nearly vertical light: the two points share a shadow texel and
        // the occluder wins the depth test, so the ground is shadowed
        assert_relative_eq!(ground_uv.x, occluder_uv.x, epsilon = 1e-2);
        assert!(occluder_depth < ground_depth);

        // A point far to the side maps to a different texel and stays lit
        let (clear_uv, _) = light_space_uv_depth(view_proj, Vec3::new(5.0, 0.0, 0.0));
        assert!((clear_uv.x - occluder_uv.x).abs() > 1e-2);
    }

    #[test]
    fn cascade_depths_land_in_unit_range() {
        let camera = Camera::default();
        let light = DirectionalLight::default();
        let cascades = CascadeFitter::default().fit(
            &camera,
            16.0 / 9.0,
            &light,
            &CascadeSplits::practical(CASCADE_COUNT as usize),
        );
        for cascade in &cascades {
            let corners = [
                Vec3::new(0.0, 0.0, -(cascade.near + cascade.far) * 0.5),
                Vec3::new(1.0, 1.0, -(cascade.near + cascade.far) * 0.5),
            ];
            for corner in corners {
                let world = camera.view_matrix().inverse() * corner.extend(1.0);
                let (_, depth) = light_space_uv_depth(cascade.view_proj, world.truncate());
                assert!((-1e-3..=1.0 + 1e-3).contains(&depth), "depth {}", depth);
            }
        }
    }
}
