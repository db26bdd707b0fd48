//! Final composite to the swapchain
//!
//! Tonemaps the HDR lighting target with exponential exposure and hosts
//! the debug display modes that show individual G-buffer channels, the
//! occlusion factor or a single shadow cascade.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::lighting_pass::GBufferInputs;
use crate::pipeline::{shader_constants, DisplayMode, SHADER_CAMERA, SHADER_FULLSCREEN_VERTEX, SHADER_GBUFFER_CODEC};
use crate::render_graph::{PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage};
use crate::scene::Scene;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use std::any::Any;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CompositeUniform {
    /// x = exposure, y = display mode index
    params: Vec4,
}

pub struct CompositePass {
    hdr: ResourceId,
    inputs: GBufferInputs,
    backbuffer: ResourceId,

    exposure: f32,
    mode: DisplayMode,

    pipeline: Option<RenderPipelineHandle>,
    layout: Option<BindGroupLayoutHandle>,
    camera_buffer: Option<BufferHandle>,
    uniform_buffer: Option<BufferHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl CompositePass {
    pub fn new(hdr: ResourceId, inputs: GBufferInputs, backbuffer: ResourceId, exposure: f32) -> Self {
        Self {
            hdr,
            inputs,
            backbuffer,
            exposure,
            mode: DisplayMode::Final,
            pipeline: None,
            layout: None,
            camera_buffer: None,
            uniform_buffer: None,
            bind_group: None,
        }
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn initialize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        surface_format: TextureFormat,
    ) -> BackendResult<()> {
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 5,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 6,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 7,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 8,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    dimension: TextureViewDimension::D2Array,
                },
            },
        ])?;

        self.camera_buffer = Some(crate::pipeline::lighting_pass::create_uniform_buffer::<
            crate::scene::CameraUniformData,
            B,
        >(backend, "composite_camera")?);
        self.uniform_buffer = Some(crate::pipeline::lighting_pass::create_uniform_buffer::<
            CompositeUniform,
            B,
        >(backend, "composite_params")?);

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("composite".to_string()),
            shader: composite_shader(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: Some("fs_main".to_string()),
            vertex_layouts: vec![],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: surface_format,
                blend: None,
            }],
        })?;

        self.pipeline = Some(pipeline);
        self.layout = Some(layout);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        hdr: TextureViewHandle,
        depth: TextureViewHandle,
        normal: TextureViewHandle,
        albedo: TextureViewHandle,
        specular: TextureViewHandle,
        occlusion: TextureViewHandle,
        shadow_map: TextureViewHandle,
    ) -> BackendResult<()> {
        let (Some(layout), Some(camera_buffer), Some(uniform_buffer)) =
            (self.layout, self.camera_buffer, self.uniform_buffer)
        else {
            return Ok(());
        };
        self.bind_group = Some(backend.create_bind_group(
            layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: camera_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (
                    1,
                    BindGroupEntry::Buffer {
                        buffer: uniform_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (2, BindGroupEntry::Texture(hdr)),
                (3, BindGroupEntry::Texture(depth)),
                (4, BindGroupEntry::Texture(normal)),
                (5, BindGroupEntry::Texture(albedo)),
                (6, BindGroupEntry::Texture(specular)),
                (7, BindGroupEntry::Texture(occlusion)),
                (8, BindGroupEntry::Texture(shadow_map)),
            ],
        )?);
        Ok(())
    }

    pub fn update<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &Scene, aspect: f32) {
        if let Some(buffer) = self.camera_buffer {
            let data = scene.camera.uniform_data(aspect);
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&data));
        }
        if let Some(buffer) = self.uniform_buffer {
            let uniform = CompositeUniform {
                params: Vec4::new(self.exposure, self.mode.shader_index() as f32, 0.0, 0.0),
            };
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));
        }
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &str {
        "composite"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.hdr, ResourceUsage::TextureRead);
        ctx.read(self.inputs.depth, ResourceUsage::TextureRead);
        ctx.read(self.inputs.normal, ResourceUsage::TextureRead);
        ctx.read(self.inputs.albedo, ResourceUsage::TextureRead);
        ctx.read(self.inputs.specular, ResourceUsage::TextureRead);
        ctx.read(self.inputs.occlusion, ResourceUsage::TextureRead);
        ctx.read(self.inputs.shadow_map, ResourceUsage::TextureRead);
        ctx.write(self.backbuffer, ResourceUsage::RenderTarget);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(pipeline), Some(bind_group)) = (self.pipeline, self.bind_group) else {
            return;
        };
        let Some(backbuffer) = ctx.get_texture(self.backbuffer) else {
            return;
        };
        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("composite".to_string()),
            color_attachments: vec![ColorAttachment {
                view: backbuffer,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Exponential exposure tonemap, mirrored in the composite shader
pub fn tonemap(hdr: f32, exposure: f32) -> f32 {
    1.0 - (-hdr * exposure).exp()
}

fn composite_shader() -> String {
    format!(
        "{}{}{}{}{}",
        shader_constants(),
        SHADER_CAMERA,
        SHADER_GBUFFER_CODEC,
        SHADER_FULLSCREEN_VERTEX,
        COMPOSITE_SHADER_BODY,
    )
}

const COMPOSITE_SHADER_BODY: &str = r#"
struct CompositeParams {
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> composite: CompositeParams;
@group(0) @binding(2) var hdr_texture: texture_2d<f32>;
@group(0) @binding(3) var depth_texture: texture_depth_2d;
@group(0) @binding(4) var normal_texture: texture_2d<f32>;
@group(0) @binding(5) var albedo_texture: texture_2d<f32>;
@group(0) @binding(6) var specular_texture: texture_2d<f32>;
@group(0) @binding(7) var occlusion_texture: texture_2d<f32>;
@group(0) @binding(8) var shadow_map: texture_depth_2d_array;

@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<u32>(in.position.xy);
    let exposure = composite.params.x;
    let mode = u32(composite.params.y);

    if (mode == 0u) {
        let hdr = textureLoad(hdr_texture, pixel, 0).rgb;
        let mapped = vec3<f32>(1.0) - exp(-hdr * exposure);
        return vec4<f32>(mapped, 1.0);
    }
    if (mode == 1u) {
        let depth = textureLoad(depth_texture, pixel, 0);
        let world = reconstruct_world_position(in.uv, depth, camera.inv_view_proj);
        return vec4<f32>(fract(world * 0.1), 1.0);
    }
    if (mode == 2u) {
        let normal = decode_normal(textureLoad(normal_texture, pixel, 0).xy);
        return vec4<f32>(normal * 0.5 + 0.5, 1.0);
    }
    if (mode == 3u) {
        return vec4<f32>(textureLoad(albedo_texture, pixel, 0).rgb, 1.0);
    }
    if (mode == 4u) {
        return textureLoad(specular_texture, pixel, 0);
    }
    if (mode == 5u) {
        let occlusion = textureLoad(occlusion_texture, pixel, 0).r;
        return vec4<f32>(vec3<f32>(occlusion), 1.0);
    }

    // Remaining modes show one shadow cascade's depth
    let cascade = mode - 6u;
    let dims = textureDimensions(shadow_map);
    let texel = vec2<u32>(in.uv * vec2<f32>(dims));
    let depth = textureLoad(shadow_map, min(texel, dims - 1u), cascade, 0);
    return vec4<f32>(vec3<f32>(depth), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tonemap_stays_in_unit_range() {
        for hdr in [0.0, 0.1, 1.0, 10.0, 1000.0] {
            let mapped = tonemap(hdr, 1.0);
            assert!((0.0..1.0).contains(&mapped) || mapped == 1.0);
        }
        assert_relative_eq!(tonemap(0.0, 1.0), 0.0);
    }

    #[test]
    fn higher_exposure_brightens() {
        assert!(tonemap(1.0, 2.0) > tonemap(1.0, 0.5));
    }

    #[test]
    fn tonemap_is_monotonic() {
        let mut last = -1.0;
        for i in 0..100 {
            let mapped = tonemap(i as f32 * 0.2, 1.5);
            // strictly increasing until the curve saturates at 1.0
            if mapped < 1.0 {
                assert!(mapped > last);
            } else {
                assert!(mapped >= last);
            }
            last = mapped;
        }
    }
}
