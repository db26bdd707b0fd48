//! Per-light volume accumulation
//!
//! The alternative to the fullscreen light loop: ambient, environment
//! and the shadowed directional light render once with a fullscreen
//! triangle, then every point light draws a range-scaled icosphere with
//! additive blending. Front faces are culled so the volume still covers
//! the screen when the camera sits inside it. Fragments outside the
//! light's range contribute exactly zero, which keeps the result equal
//! to the single-pass strategy.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::ibl::IblTextures;
use crate::pipeline::lighting_pass::{
    buffer_entry, create_uniform_buffer, gbuffer_layout_entries, ibl_layout_entries,
    GBufferInputs, GBufferViews, LIGHTING_BINDINGS, SHADER_AMBIENT, SHADER_LIGHTING_COMMON,
    SHADER_SHADOW_LOOKUP,
};
use crate::pipeline::{shader_constants, CASCADE_COUNT, MAX_LIGHTS, SHADER_CAMERA, SHADER_FULLSCREEN_VERTEX, SHADER_GBUFFER_CODEC};
use crate::render_graph::{PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage, TextureSize};
use crate::resources::GpuMesh;
use crate::scene::{Cascade, GpuLightData, Scene};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::any::Any;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightsUniform {
    ambient: Vec4,
    lights: [GpuLightData; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CascadesUniform {
    view_proj: [Mat4; CASCADE_COUNT as usize],
    splits: Vec4,
    params: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VolumeUniform {
    model: Mat4,
    light: GpuLightData,
}

/// Deferred lighting via additive light volumes
pub struct LightVolumesPass {
    inputs: GBufferInputs,
    pub hdr: Option<ResourceId>,

    shadow_map_size: u32,
    cascade_blend: bool,
    min_light_intensity: f32,

    base_pipeline: Option<RenderPipelineHandle>,
    volume_pipeline: Option<RenderPipelineHandle>,

    scene_layout: Option<BindGroupLayoutHandle>,
    gbuffer_layout: Option<BindGroupLayoutHandle>,
    ibl_layout: Option<BindGroupLayoutHandle>,
    volume_layout: Option<BindGroupLayoutHandle>,

    camera_buffer: Option<BufferHandle>,
    lights_buffer: Option<BufferHandle>,
    cascades_buffer: Option<BufferHandle>,
    shadow_sampler: Option<SamplerHandle>,

    scene_bind_group: Option<BindGroupHandle>,
    gbuffer_bind_group: Option<BindGroupHandle>,
    ibl_bind_group: Option<BindGroupHandle>,

    /// Unit icosphere scaled per light in the vertex stage
    volume_mesh: Option<GpuMesh>,
    light_slots: Vec<(BufferHandle, BindGroupHandle)>,
    active_lights: usize,
}

impl LightVolumesPass {
    pub fn new(
        inputs: GBufferInputs,
        shadow_map_size: u32,
        cascade_blend: bool,
        min_light_intensity: f32,
    ) -> Self {
        Self {
            inputs,
            hdr: None,
            shadow_map_size,
            cascade_blend,
            min_light_intensity,
            base_pipeline: None,
            volume_pipeline: None,
            scene_layout: None,
            gbuffer_layout: None,
            ibl_layout: None,
            volume_layout: None,
            camera_buffer: None,
            lights_buffer: None,
            cascades_buffer: None,
            shadow_sampler: None,
            scene_bind_group: None,
            gbuffer_bind_group: None,
            ibl_bind_group: None,
            volume_mesh: None,
            light_slots: Vec::new(),
            active_lights: 0,
        }
    }

    pub fn initialize<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<()> {
        let scene_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
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
                ty: BindingType::UniformBuffer,
            },
        ])?;
        let gbuffer_layout = backend.create_bind_group_layout(&gbuffer_layout_entries())?;
        let ibl_layout = backend.create_bind_group_layout(&ibl_layout_entries())?;
        let volume_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;

        self.camera_buffer = Some(create_uniform_buffer::<crate::scene::CameraUniformData, B>(
            backend,
            "volumes_camera",
        )?);
        self.lights_buffer = Some(create_uniform_buffer::<LightsUniform, B>(
            backend,
            "volumes_lights",
        )?);
        self.cascades_buffer = Some(create_uniform_buffer::<CascadesUniform, B>(
            backend,
            "volumes_cascades",
        )?);
        self.shadow_sampler = Some(backend.create_sampler(&SamplerDescriptor {
            label: Some("volumes_shadow_compare".to_string()),
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        })?);

        self.volume_mesh = Some(GpuMesh::upload(
            backend,
            &crate::resources::Mesh::icosphere(1),
        )?);

        let base_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("lighting_base".to_string()),
            shader: base_shader(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: Some("fs_main".to_string()),
            vertex_layouts: vec![],
            bind_group_layouts: vec![scene_layout, gbuffer_layout, ibl_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: TextureFormat::Rgba16Float,
                blend: None,
            }],
        })?;

        // No depth attachment: the fragment stage rejects sky pixels and
        // out-of-range points itself, instead of a read-only depth test
        // culling volume fragments early. The G-buffer depth stays bound
        // as a sampled texture for position reconstruction either way.
        let volume_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("light_volume".to_string()),
            shader: volume_shader(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: Some("fs_main".to_string()),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![scene_layout, gbuffer_layout, volume_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Front,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: TextureFormat::Rgba16Float,
                blend: Some(BlendState::additive()),
            }],
        })?;

        self.base_pipeline = Some(base_pipeline);
        self.volume_pipeline = Some(volume_pipeline);
        self.scene_layout = Some(scene_layout);
        self.gbuffer_layout = Some(gbuffer_layout);
        self.ibl_layout = Some(ibl_layout);
        self.volume_layout = Some(volume_layout);
        Ok(())
    }

    pub fn create_bind_groups<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        views: &GBufferViews,
        ibl: &IblTextures,
    ) -> BackendResult<()> {
        let (Some(scene_layout), Some(gbuffer_layout), Some(ibl_layout)) =
            (self.scene_layout, self.gbuffer_layout, self.ibl_layout)
        else {
            return Ok(());
        };
        let (Some(camera), Some(lights), Some(cascades), Some(shadow_sampler)) = (
            self.camera_buffer,
            self.lights_buffer,
            self.cascades_buffer,
            self.shadow_sampler,
        ) else {
            return Ok(());
        };

        self.scene_bind_group = Some(backend.create_bind_group(
            scene_layout,
            &[
                (0, buffer_entry(camera)),
                (1, buffer_entry(lights)),
                (2, buffer_entry(cascades)),
            ],
        )?);
        self.gbuffer_bind_group = Some(backend.create_bind_group(
            gbuffer_layout,
            &[
                (0, BindGroupEntry::Texture(views.depth)),
                (1, BindGroupEntry::Texture(views.normal)),
                (2, BindGroupEntry::Texture(views.albedo)),
                (3, BindGroupEntry::Texture(views.specular)),
                (4, BindGroupEntry::Texture(views.occlusion)),
                (5, BindGroupEntry::Texture(views.shadow_map)),
                (6, BindGroupEntry::Sampler(shadow_sampler)),
            ],
        )?);
        self.ibl_bind_group = Some(backend.create_bind_group(
            ibl_layout,
            &[
                (0, BindGroupEntry::Texture(ibl.irradiance)),
                (1, BindGroupEntry::Texture(ibl.prefiltered)),
                (2, BindGroupEntry::Texture(ibl.brdf_lut)),
                (3, BindGroupEntry::Sampler(ibl.sampler)),
            ],
        )?);
        Ok(())
    }

    pub fn update<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        cascades: &[Cascade],
        aspect: f32,
    ) -> BackendResult<()> {
        if let Some(buffer) = self.camera_buffer {
            let data = scene.camera.uniform_data(aspect);
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&data));
        }

        if let Some(buffer) = self.lights_buffer {
            let mut uniform = LightsUniform {
                ambient: Vec4::ZERO,
                lights: [GpuLightData::zeroed(); MAX_LIGHTS],
            };
            let mut count = 0;
            if let Some(sun) = &scene.directional_light {
                uniform.lights[count] = sun.to_gpu_data();
                count += 1;
            }
            uniform.ambient = scene.ambient_light.extend(count as f32);
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));
        }

        if let Some(buffer) = self.cascades_buffer {
            let mut uniform = CascadesUniform {
                view_proj: [Mat4::IDENTITY; CASCADE_COUNT as usize],
                splits: Vec4::splat(scene.camera.far),
                params: Vec4::new(
                    cascades.len() as f32,
                    if self.cascade_blend { 1.0 } else { 0.0 },
                    1.0 / self.shadow_map_size as f32,
                    0.0,
                ),
            };
            for (i, cascade) in cascades.iter().take(CASCADE_COUNT as usize).enumerate() {
                uniform.view_proj[i] = cascade.view_proj;
                uniform.splits[i] = cascade.far;
            }
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));
        }

        // One uniform slot per visible point light
        let Some(volume_layout) = self.volume_layout else {
            return Ok(());
        };
        self.active_lights = 0;
        for light in &scene.point_lights {
            let range = light.effective_range(self.min_light_intensity);
            if range <= 0.0 {
                continue;
            }
            let index = self.active_lights;

            while self.light_slots.len() <= index {
                let buffer = backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("light_volume_{}", self.light_slots.len())),
                    size: std::mem::size_of::<VolumeUniform>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                let bind_group =
                    backend.create_bind_group(volume_layout, &[(0, buffer_entry(buffer))])?;
                self.light_slots.push((buffer, bind_group));
            }

            let (buffer, _) = self.light_slots[index];
            let uniform = VolumeUniform {
                model: Mat4::from_translation(light.position) * Mat4::from_scale(Vec3::splat(range)),
                light: light.to_gpu_data(range),
            };
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));
            self.active_lights += 1;
        }
        Ok(())
    }
}

impl RenderPass for LightVolumesPass {
    fn name(&self) -> &str {
        "light_volumes"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let hdr = ctx.create_texture_relative(
            "hdr_color",
            TextureSize::default(),
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        );
        ctx.read(self.inputs.depth, ResourceUsage::TextureRead);
        ctx.read(self.inputs.normal, ResourceUsage::TextureRead);
        ctx.read(self.inputs.albedo, ResourceUsage::TextureRead);
        ctx.read(self.inputs.specular, ResourceUsage::TextureRead);
        ctx.read(self.inputs.occlusion, ResourceUsage::TextureRead);
        ctx.read(self.inputs.shadow_map, ResourceUsage::TextureRead);
        ctx.write(hdr, ResourceUsage::RenderTarget);
        self.hdr = Some(hdr);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(base_pipeline), Some(volume_pipeline)) =
            (self.base_pipeline, self.volume_pipeline)
        else {
            return;
        };
        let (Some(scene_bg), Some(gbuffer_bg), Some(ibl_bg)) = (
            self.scene_bind_group,
            self.gbuffer_bind_group,
            self.ibl_bind_group,
        ) else {
            return;
        };
        let (Some(hdr), Some(mesh)) = (
            self.hdr.and_then(|r| ctx.get_texture(r)),
            self.volume_mesh,
        ) else {
            return;
        };
        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("light_volumes".to_string()),
            color_attachments: vec![ColorAttachment {
                view: hdr,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });

        backend.set_render_pipeline(base_pipeline);
        backend.set_bind_group(0, scene_bg);
        backend.set_bind_group(1, gbuffer_bg);
        backend.set_bind_group(2, ibl_bg);
        backend.draw(0..3, 0..1);

        backend.set_render_pipeline(volume_pipeline);
        backend.set_bind_group(0, scene_bg);
        backend.set_bind_group(1, gbuffer_bg);
        backend.set_vertex_buffer(0, mesh.vertex_buffer, 0);
        backend.set_index_buffer(mesh.index_buffer, 0, IndexFormat::Uint32);
        for (_, bind_group) in self.light_slots.iter().take(self.active_lights) {
            backend.set_bind_group(2, *bind_group);
            backend.draw_indexed(0..mesh.index_count, 0, 0..1);
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

fn base_shader() -> String {
    format!(
        "{}{}{}{}{}{}{}{}",
        shader_constants(),
        SHADER_CAMERA,
        SHADER_GBUFFER_CODEC,
        SHADER_FULLSCREEN_VERTEX,
        SHADER_LIGHTING_COMMON,
        LIGHTING_BINDINGS,
        SHADER_SHADOW_LOOKUP,
        SHADER_AMBIENT.to_string() + BASE_FRAGMENT,
    )
}

const BASE_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<u32>(in.position.xy);
    let depth = textureLoad(depth_texture, pixel, 0);
    let world_pos = reconstruct_world_position(in.uv, depth, camera.inv_view_proj);
    let view_dir = normalize(camera.position.xyz - world_pos);

    if (depth >= 1.0) {
        let sky = textureSampleLevel(prefiltered_map, ibl_sampler, -view_dir, 0.0).rgb;
        return vec4<f32>(sky, 1.0);
    }

    let normal = decode_normal(textureLoad(normal_texture, pixel, 0).xy);
    let albedo = textureLoad(albedo_texture, pixel, 0).rgb;
    let spec_rough = textureLoad(specular_texture, pixel, 0);
    let occlusion = textureLoad(occlusion_texture, pixel, 0).r;
    let view_depth = -(camera.view * vec4<f32>(world_pos, 1.0)).z;

    var color = scene_lights.ambient.rgb * albedo * occlusion;
    color = color + ambient_term(
        normal, view_dir, albedo, spec_rough.rgb, spec_rough.a, occlusion);

    let count = u32(scene_lights.ambient.w);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = scene_lights.lights[i];
        if (light.direction_type.w < 0.5) {
            continue;
        }
        let light_dir = normalize(-light.direction_type.xyz);
        let radiance = light.color_intensity.rgb * light.color_intensity.a;
        let shadow = shadow_factor(world_pos, view_depth, cascade_data);
        color = color + shade_surface(
            light_dir, radiance * shadow, normal, view_dir,
            albedo, spec_rough.rgb, spec_rough.a);
    }

    return vec4<f32>(color, 1.0);
}
"#;

fn volume_shader() -> String {
    format!(
        "{}{}{}{}{}",
        shader_constants(),
        SHADER_CAMERA,
        SHADER_GBUFFER_CODEC,
        SHADER_LIGHTING_COMMON,
        VOLUME_SHADER_BODY,
    )
}

const VOLUME_SHADER_BODY: &str = r#"
struct VolumeLight {
    model: mat4x4<f32>,
    light: GpuLight,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(1) @binding(0) var depth_texture: texture_depth_2d;
@group(1) @binding(1) var normal_texture: texture_2d<f32>;
@group(1) @binding(2) var albedo_texture: texture_2d<f32>;
@group(1) @binding(3) var specular_texture: texture_2d<f32>;
@group(2) @binding(0) var<uniform> volume: VolumeLight;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera.view_proj * volume.model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag_pos: vec4<f32>) -> @location(0) vec4<f32> {
    let pixel = vec2<u32>(frag_pos.xy);
    let depth = textureLoad(depth_texture, pixel, 0);
    if (depth >= 1.0) {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }

    let dims = vec2<f32>(textureDimensions(depth_texture));
    let uv = frag_pos.xy / dims;
    let world_pos = reconstruct_world_position(uv, depth, camera.inv_view_proj);

    let radiance = point_light_radiance(volume.light, world_pos);
    if (all(radiance == vec3<f32>(0.0))) {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }

    let normal = decode_normal(textureLoad(normal_texture, pixel, 0).xy);
    let spec_rough = textureLoad(specular_texture, pixel, 0);
    let albedo = textureLoad(albedo_texture, pixel, 0).rgb;
    let view_dir = normalize(camera.position.xyz - world_pos);
    let light_dir = normalize(volume.light.position_range.xyz - world_pos);

    let color = shade_surface(
        light_dir, radiance, normal, view_dir,
        albedo, spec_rough.rgb, spec_rough.a);
    return vec4<f32>(color, 0.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lighting_pass::shading::*;
    use crate::scene::PointLight;
    use approx::assert_relative_eq;

    fn surface_grid() -> Vec<SurfacePoint> {
        let mut points = Vec::new();
        for x in -3..=3 {
            for z in -3..=3 {
                points.push(SurfacePoint {
                    position: Vec3::new(x as f32 * 2.0, 0.0, z as f32 * 2.0),
                    normal: Vec3::Y,
                    albedo: Vec3::new(0.7, 0.7, 0.7),
                    specular: Vec3::splat(0.4),
                    roughness: 0.5,
                });
            }
        }
        points
    }

    fn test_lights() -> Vec<PointLight> {
        vec![
            PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 0.9, 0.8), 3.0),
            PointLight::new(Vec3::new(4.0, 1.5, -4.0), Vec3::new(0.2, 0.4, 1.0), 2.0),
            PointLight::new(Vec3::new(-5.0, 3.0, 5.0), Vec3::new(1.0, 0.2, 0.2), 0.8),
        ]
    }

    #[test]
    fn volume_accumulation_matches_single_pass() {
        let lights = test_lights();
        let view_pos = Vec3::new(0.0, 4.0, 10.0);
        let min_intensity = 0.05;

        for surface in surface_grid() {
            let single = shade_all_point_lights(&surface, view_pos, &lights, min_intensity);

            // Volumes accumulate one light at a time with the same range cut
            let mut accumulated = Vec3::ZERO;
            for light in &lights {
                accumulated += shade_point_light(
                    &surface,
                    view_pos,
                    light,
                    light.effective_range(min_intensity),
                );
            }

            assert_relative_eq!(single.x, accumulated.x, epsilon = 1e-5);
            assert_relative_eq!(single.y, accumulated.y, epsilon = 1e-5);
            assert_relative_eq!(single.z, accumulated.z, epsilon = 1e-5);
        }
    }

    #[test]
    fn both_strategies_light_the_same_pixels() {
        let lights = test_lights();
        let view_pos = Vec3::new(0.0, 4.0, 10.0);
        let min_intensity = 0.05;

        for surface in surface_grid() {
            let single = shade_all_point_lights(&surface, view_pos, &lights, min_intensity);
            let volume_lit = lights.iter().any(|light| {
                shade_point_light(
                    &surface,
                    view_pos,
                    light,
                    light.effective_range(min_intensity),
                ) != Vec3::ZERO
            });
            assert_eq!(single != Vec3::ZERO, volume_lit);
        }
    }

    #[test]
    fn volume_scale_covers_light_range() {
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 4.0);
        let range = light.effective_range(0.05);
        let model = Mat4::from_translation(light.position) * Mat4::from_scale(Vec3::splat(range));

        // The icosphere circumscribes the unit sphere, so every surface
        // point of the scaled volume sits at or beyond the range
        let mesh = crate::resources::Mesh::icosphere(1);
        for tri in mesh.indices.chunks(3) {
            let center = (mesh.vertices[tri[0] as usize].position
                + mesh.vertices[tri[1] as usize].position
                + mesh.vertices[tri[2] as usize].position)
                / 3.0;
            let world = model * center.extend(1.0);
            assert!((world.truncate() - light.position).length() >= range - 1e-3);
        }
    }
}
