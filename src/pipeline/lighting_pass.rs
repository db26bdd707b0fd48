//! Fullscreen deferred lighting pass
//!
//! One fragment invocation per pixel loops a bounded uniform array of
//! lights, applies cascaded shadows to the directional light and adds
//! image-based ambient. The alternative per-light accumulation lives in
//! [`crate::pipeline::light_volumes`]; both produce the same lit result
//! for lights within range.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::ibl::IblTextures;
use crate::pipeline::{shader_constants, CASCADE_COUNT, MAX_LIGHTS, SHADER_CAMERA, SHADER_FULLSCREEN_VERTEX, SHADER_GBUFFER_CODEC};
use crate::render_graph::{PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage, TextureSize};
use crate::scene::{Cascade, GpuLightData, PointLight, Scene};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::any::Any;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightsUniform {
    /// rgb = ambient color, w = active light count
    ambient: Vec4,
    lights: [GpuLightData; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CascadesUniform {
    view_proj: [Mat4; CASCADE_COUNT as usize],
    /// View-space far bound of each cascade
    splits: Vec4,
    /// x = cascade count, y = blend enabled, z = shadow map texel size
    params: Vec4,
}

/// G-buffer resource ids the lighting passes consume
#[derive(Debug, Clone, Copy)]
pub struct GBufferInputs {
    pub depth: ResourceId,
    pub normal: ResourceId,
    pub albedo: ResourceId,
    pub specular: ResourceId,
    pub occlusion: ResourceId,
    pub shadow_map: ResourceId,
}

pub struct LightingPass {
    inputs: GBufferInputs,
    pub hdr: Option<ResourceId>,

    shadow_map_size: u32,
    cascade_blend: bool,
    min_light_intensity: f32,

    pipeline: Option<RenderPipelineHandle>,
    scene_layout: Option<BindGroupLayoutHandle>,
    gbuffer_layout: Option<BindGroupLayoutHandle>,
    ibl_layout: Option<BindGroupLayoutHandle>,

    camera_buffer: Option<BufferHandle>,
    lights_buffer: Option<BufferHandle>,
    cascades_buffer: Option<BufferHandle>,
    shadow_sampler: Option<SamplerHandle>,

    scene_bind_group: Option<BindGroupHandle>,
    gbuffer_bind_group: Option<BindGroupHandle>,
    ibl_bind_group: Option<BindGroupHandle>,
}

impl LightingPass {
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
            pipeline: None,
            scene_layout: None,
            gbuffer_layout: None,
            ibl_layout: None,
            camera_buffer: None,
            lights_buffer: None,
            cascades_buffer: None,
            shadow_sampler: None,
            scene_bind_group: None,
            gbuffer_bind_group: None,
            ibl_bind_group: None,
        }
    }

    pub fn initialize<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<()> {
        let scene_layout = backend.create_bind_group_layout(&[
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
                ty: BindingType::UniformBuffer,
            },
        ])?;
        let gbuffer_layout = backend.create_bind_group_layout(&gbuffer_layout_entries())?;
        let ibl_layout = backend.create_bind_group_layout(&ibl_layout_entries())?;

        self.camera_buffer = Some(create_uniform_buffer::<crate::scene::CameraUniformData, B>(
            backend,
            "lighting_camera",
        )?);
        self.lights_buffer = Some(create_uniform_buffer::<LightsUniform, B>(
            backend,
            "lighting_lights",
        )?);
        self.cascades_buffer = Some(create_uniform_buffer::<CascadesUniform, B>(
            backend,
            "lighting_cascades",
        )?);

        self.shadow_sampler = Some(backend.create_sampler(&SamplerDescriptor {
            label: Some("shadow_compare".to_string()),
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        })?);

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("deferred_lighting".to_string()),
            shader: lighting_shader(),
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

        self.pipeline = Some(pipeline);
        self.scene_layout = Some(scene_layout);
        self.gbuffer_layout = Some(gbuffer_layout);
        self.ibl_layout = Some(ibl_layout);
        Ok(())
    }

    /// Bind the allocated G-buffer views and the environment textures
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
    ) {
        if let Some(buffer) = self.camera_buffer {
            let data = scene.camera.uniform_data(aspect);
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&data));
        }

        if let Some(buffer) = self.lights_buffer {
            debug_assert!(
                scene.point_lights.len() + scene.directional_light.iter().len() <= MAX_LIGHTS,
                "light count exceeds the uniform array, extra lights are dropped"
            );
            let mut uniform = LightsUniform {
                ambient: Vec4::ZERO,
                lights: [GpuLightData::zeroed(); MAX_LIGHTS],
            };
            let mut count = 0;
            if let Some(sun) = &scene.directional_light {
                uniform.lights[count] = sun.to_gpu_data();
                count += 1;
            }
            for light in &scene.point_lights {
                if count >= MAX_LIGHTS {
                    log::warn!("dropping point light over the {} light limit", MAX_LIGHTS);
                    break;
                }
                uniform.lights[count] = light.to_gpu_data(light.effective_range(self.min_light_intensity));
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
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "deferred_lighting"
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
        let (Some(pipeline), Some(scene_bg), Some(gbuffer_bg), Some(ibl_bg)) = (
            self.pipeline,
            self.scene_bind_group,
            self.gbuffer_bind_group,
            self.ibl_bind_group,
        ) else {
            return;
        };
        let Some(hdr) = self.hdr.and_then(|r| ctx.get_texture(r)) else {
            return;
        };
        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("deferred_lighting".to_string()),
            color_attachments: vec![ColorAttachment {
                view: hdr,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, scene_bg);
        backend.set_bind_group(1, gbuffer_bg);
        backend.set_bind_group(2, ibl_bg);
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

/// Allocated view handles matching [`GBufferInputs`]
#[derive(Debug, Clone, Copy)]
pub struct GBufferViews {
    pub depth: TextureViewHandle,
    pub normal: TextureViewHandle,
    pub albedo: TextureViewHandle,
    pub specular: TextureViewHandle,
    pub occlusion: TextureViewHandle,
    pub shadow_map: TextureViewHandle,
}

pub(crate) fn buffer_entry(buffer: BufferHandle) -> BindGroupEntry {
    BindGroupEntry::Buffer {
        buffer,
        offset: 0,
        size: None,
    }
}

pub(crate) fn create_uniform_buffer<T, B: GraphicsBackend>(
    backend: &mut B,
    label: &str,
) -> BackendResult<BufferHandle> {
    backend.create_buffer(&BufferDescriptor {
        label: Some(label.to_string()),
        size: std::mem::size_of::<T>() as u64,
        usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        mapped_at_creation: false,
    })
}

pub(crate) fn gbuffer_layout_entries() -> Vec<BindGroupLayoutEntry> {
    vec![
        BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Depth,
                dimension: TextureViewDimension::D2,
            },
        },
        BindGroupLayoutEntry {
            binding: 1,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
                dimension: TextureViewDimension::D2,
            },
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
                sample_type: TextureSampleType::Float { filterable: false },
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
                sample_type: TextureSampleType::Depth,
                dimension: TextureViewDimension::D2Array,
            },
        },
        BindGroupLayoutEntry {
            binding: 6,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Sampler { comparison: true },
        },
    ]
}

pub(crate) fn ibl_layout_entries() -> Vec<BindGroupLayoutEntry> {
    vec![
        BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                dimension: TextureViewDimension::Cube,
            },
        },
        BindGroupLayoutEntry {
            binding: 1,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                dimension: TextureViewDimension::Cube,
            },
        },
        BindGroupLayoutEntry {
            binding: 2,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                dimension: TextureViewDimension::D2,
            },
        },
        BindGroupLayoutEntry {
            binding: 3,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Sampler { comparison: false },
        },
    ]
}

/// Shared WGSL: light struct, direct shading and shadow lookup
pub(crate) const SHADER_LIGHTING_COMMON: &str = r#"
struct GpuLight {
    position_range: vec4<f32>,
    color_intensity: vec4<f32>,
    direction_type: vec4<f32>,
    attenuation: vec4<f32>,
};

struct Cascades {
    view_proj: array<mat4x4<f32>, CASCADE_COUNT>,
    splits: vec4<f32>,
    params: vec4<f32>,
};

fn specular_exponent(roughness: f32) -> f32 {
    return 2.0 + (1.0 - roughness) * (1.0 - roughness) * 254.0;
}

fn shade_surface(
    light_dir: vec3<f32>,
    radiance: vec3<f32>,
    normal: vec3<f32>,
    view_dir: vec3<f32>,
    albedo: vec3<f32>,
    specular_tint: vec3<f32>,
    roughness: f32,
) -> vec3<f32> {
    let n_dot_l = max(dot(normal, light_dir), 0.0);
    let halfway = normalize(light_dir + view_dir);
    let spec = pow(max(dot(normal, halfway), 0.0), specular_exponent(roughness));
    return (albedo * n_dot_l + specular_tint * spec * n_dot_l) * radiance;
}

fn point_light_radiance(light: GpuLight, world_pos: vec3<f32>) -> vec3<f32> {
    let to_light = light.position_range.xyz - world_pos;
    let dist = length(to_light);
    if (dist > light.position_range.w) {
        return vec3<f32>(0.0);
    }
    let att = light.attenuation;
    let falloff = 1.0 / (att.x + att.y * dist + att.z * dist * dist);
    return light.color_intensity.rgb * light.color_intensity.a * falloff;
}
"#;

pub(crate) const SHADER_SHADOW_LOOKUP: &str = r#"
fn select_cascade(view_depth: f32, cascades: Cascades) -> u32 {
    let count = u32(cascades.params.x);
    for (var i = 0u; i < count; i = i + 1u) {
        if (view_depth <= cascades.splits[i]) {
            return i;
        }
    }
    return max(count, 1u) - 1u;
}

fn sample_cascade(world_pos: vec3<f32>, cascade: u32, cascades: Cascades) -> f32 {
    let clip = cascades.view_proj[cascade] * vec4<f32>(world_pos, 1.0);
    let ndc = clip.xyz / clip.w;
    if (abs(ndc.x) > 1.0 || abs(ndc.y) > 1.0 || ndc.z > 1.0 || ndc.z < 0.0) {
        return 1.0;
    }
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 1.0 - (ndc.y * 0.5 + 0.5));
    let texel = cascades.params.z;
    let bias = 0.002;

    var lit = 0.0;
    for (var y = -1; y <= 1; y = y + 1) {
        for (var x = -1; x <= 1; x = x + 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel;
            lit = lit + textureSampleCompareLevel(
                shadow_map, shadow_sampler, uv + offset, cascade, ndc.z - bias);
        }
    }
    return lit / 9.0;
}

fn shadow_factor(world_pos: vec3<f32>, view_depth: f32, cascades: Cascades) -> f32 {
    let count = u32(cascades.params.x);
    if (count == 0u) {
        return 1.0;
    }
    let cascade = select_cascade(view_depth, cascades);
    var factor = sample_cascade(world_pos, cascade, cascades);

    // Blend a short band before each split boundary into the next cascade
    if (cascades.params.y > 0.5 && cascade + 1u < count) {
        let split = cascades.splits[cascade];
        let band = split * 0.05;
        let t = (view_depth - (split - band)) / band;
        if (t > 0.0) {
            let next = sample_cascade(world_pos, cascade + 1u, cascades);
            factor = mix(factor, next, clamp(t, 0.0, 1.0));
        }
    }
    return factor;
}
"#;

fn lighting_shader() -> String {
    format!(
        "{}{}{}{}{}{}{}{}",
        shader_constants(),
        SHADER_CAMERA,
        SHADER_GBUFFER_CODEC,
        SHADER_FULLSCREEN_VERTEX,
        SHADER_LIGHTING_COMMON,
        LIGHTING_BINDINGS,
        SHADER_SHADOW_LOOKUP,
        SHADER_AMBIENT.to_string() + LIGHTING_FRAGMENT,
    )
}

pub(crate) const LIGHTING_BINDINGS: &str = r#"
struct Lights {
    ambient: vec4<f32>,
    lights: array<GpuLight, MAX_LIGHTS>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> scene_lights: Lights;
@group(0) @binding(2) var<uniform> cascade_data: Cascades;

@group(1) @binding(0) var depth_texture: texture_depth_2d;
@group(1) @binding(1) var normal_texture: texture_2d<f32>;
@group(1) @binding(2) var albedo_texture: texture_2d<f32>;
@group(1) @binding(3) var specular_texture: texture_2d<f32>;
@group(1) @binding(4) var occlusion_texture: texture_2d<f32>;
@group(1) @binding(5) var shadow_map: texture_depth_2d_array;
@group(1) @binding(6) var shadow_sampler: sampler_comparison;

@group(2) @binding(0) var irradiance_map: texture_cube<f32>;
@group(2) @binding(1) var prefiltered_map: texture_cube<f32>;
@group(2) @binding(2) var brdf_lut: texture_2d<f32>;
@group(2) @binding(3) var ibl_sampler: sampler;
"#;

/// Split-sum ambient evaluation against the precomputed environment
pub(crate) const SHADER_AMBIENT: &str = r#"
const PREFILTERED_MIPS: f32 = 5.0;

fn ambient_term(
    normal: vec3<f32>,
    view_dir: vec3<f32>,
    albedo: vec3<f32>,
    specular_tint: vec3<f32>,
    roughness: f32,
    occlusion: f32,
) -> vec3<f32> {
    let irradiance = textureSampleLevel(irradiance_map, ibl_sampler, normal, 0.0).rgb;
    let reflected = reflect(-view_dir, normal);
    let prefiltered = textureSampleLevel(
        prefiltered_map, ibl_sampler, reflected, roughness * (PREFILTERED_MIPS - 1.0)).rgb;
    let n_dot_v = max(dot(normal, view_dir), 0.0);
    let brdf = textureSampleLevel(brdf_lut, ibl_sampler, vec2<f32>(n_dot_v, roughness), 0.0).rg;
    let diffuse = irradiance * albedo;
    let specular = prefiltered * (specular_tint * brdf.x + brdf.y);
    return (diffuse + specular) * occlusion;
}
"#;

const LIGHTING_FRAGMENT: &str = r#"
@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<u32>(in.position.xy);
    let depth = textureLoad(depth_texture, pixel, 0);
    let world_pos = reconstruct_world_position(in.uv, depth, camera.inv_view_proj);
    let view_dir = normalize(camera.position.xyz - world_pos);

    if (depth >= 1.0) {
        // No geometry, show the environment along the view ray
        let sky = textureSampleLevel(prefiltered_map, ibl_sampler, -view_dir, 0.0).rgb;
        return vec4<f32>(sky, 1.0);
    }

    let normal = decode_normal(textureLoad(normal_texture, pixel, 0).xy);
    let albedo = textureLoad(albedo_texture, pixel, 0).rgb;
    let spec_rough = textureLoad(specular_texture, pixel, 0);
    let specular_tint = spec_rough.rgb;
    let roughness = spec_rough.a;
    let occlusion = textureLoad(occlusion_texture, pixel, 0).r;

    let view_depth = -(camera.view * vec4<f32>(world_pos, 1.0)).z;

    var color = scene_lights.ambient.rgb * albedo * occlusion;
    color = color + ambient_term(normal, view_dir, albedo, specular_tint, roughness, occlusion);

    let count = u32(scene_lights.ambient.w);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = scene_lights.lights[i];
        if (light.direction_type.w > 0.5) {
            // Directional light with cascaded shadows
            let light_dir = normalize(-light.direction_type.xyz);
            let radiance = light.color_intensity.rgb * light.color_intensity.a;
            let shadow = shadow_factor(world_pos, view_depth, cascade_data);
            color = color + shade_surface(
                light_dir, radiance * shadow, normal, view_dir,
                albedo, specular_tint, roughness);
        } else {
            let radiance = point_light_radiance(light, world_pos);
            let light_dir = normalize(light.position_range.xyz - world_pos);
            color = color + shade_surface(
                light_dir, radiance, normal, view_dir,
                albedo, specular_tint, roughness);
        }
    }

    return vec4<f32>(color, 1.0);
}
"#;

/// CPU mirror of the deferred shading math, used by the strategy
/// equivalence tests.
pub mod shading {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    pub struct SurfacePoint {
        pub position: Vec3,
        pub normal: Vec3,
        pub albedo: Vec3,
        pub specular: Vec3,
        pub roughness: f32,
    }

    pub fn specular_exponent(roughness: f32) -> f32 {
        2.0 + (1.0 - roughness) * (1.0 - roughness) * 254.0
    }

    fn shade(light_dir: Vec3, radiance: Vec3, surface: &SurfacePoint, view_pos: Vec3) -> Vec3 {
        let view_dir = (view_pos - surface.position).normalize();
        let n_dot_l = surface.normal.dot(light_dir).max(0.0);
        let halfway = (light_dir + view_dir).normalize();
        let spec = surface
            .normal
            .dot(halfway)
            .max(0.0)
            .powf(specular_exponent(surface.roughness));
        (surface.albedo * n_dot_l + surface.specular * spec * n_dot_l) * radiance
    }

    /// Contribution of one point light, zero outside its range
    pub fn shade_point_light(
        surface: &SurfacePoint,
        view_pos: Vec3,
        light: &PointLight,
        range: f32,
    ) -> Vec3 {
        let to_light = light.position - surface.position;
        let dist = to_light.length();
        if dist > range || dist <= f32::EPSILON {
            return Vec3::ZERO;
        }
        let radiance = light.color * light.intensity * light.attenuation_at(dist);
        shade(to_light / dist, radiance, surface, view_pos)
    }

    /// Single-pass accumulation over a bounded light list
    pub fn shade_all_point_lights(
        surface: &SurfacePoint,
        view_pos: Vec3,
        lights: &[PointLight],
        min_intensity: f32,
    ) -> Vec3 {
        lights
            .iter()
            .take(MAX_LIGHTS)
            .map(|light| {
                shade_point_light(surface, view_pos, light, light.effective_range(min_intensity))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::shading::*;
    use super::*;

    fn test_surface() -> SurfacePoint {
        SurfacePoint {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            albedo: Vec3::new(0.8, 0.6, 0.4),
            specular: Vec3::splat(0.5),
            roughness: 0.4,
        }
    }

    #[test]
    fn light_below_horizon_contributes_nothing() {
        let surface = test_surface();
        let light = PointLight::new(Vec3::new(0.0, -3.0, 0.0), Vec3::ONE, 5.0);
        let lit = shade_point_light(&surface, Vec3::new(0.0, 2.0, 5.0), &light, 100.0);
        assert_eq!(lit, Vec3::ZERO);
    }

    #[test]
    fn light_outside_range_is_cut_off() {
        let surface = test_surface();
        let light = PointLight::new(Vec3::new(0.0, 50.0, 0.0), Vec3::ONE, 5.0);
        let lit = shade_point_light(&surface, Vec3::new(0.0, 2.0, 5.0), &light, 10.0);
        assert_eq!(lit, Vec3::ZERO);
    }

    #[test]
    fn closer_light_is_brighter() {
        let surface = test_surface();
        let view = Vec3::new(0.0, 2.0, 5.0);
        let near = PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::ONE, 5.0);
        let far = PointLight::new(Vec3::new(0.0, 8.0, 0.0), Vec3::ONE, 5.0);
        let near_lit = shade_point_light(&surface, view, &near, 100.0);
        let far_lit = shade_point_light(&surface, view, &far, 100.0);
        assert!(near_lit.length() > far_lit.length());
    }

    #[test]
    fn smooth_highlight_is_more_concentrated() {
        let mut smooth = test_surface();
        smooth.roughness = 0.05;
        let mut rough = test_surface();
        rough.roughness = 0.95;
        let light = PointLight::new(Vec3::new(0.0, 4.0, -1.0), Vec3::ONE, 5.0);
        // mirror configuration puts both highlights at their shared peak
        let peak_view = Vec3::new(0.0, 4.0, 1.0);
        let off_view = Vec3::new(0.0, 1.0, 4.0);

        let smooth_falloff = shade_point_light(&smooth, off_view, &light, 100.0).length()
            / shade_point_light(&smooth, peak_view, &light, 100.0).length();
        let rough_falloff = shade_point_light(&rough, off_view, &light, 100.0).length()
            / shade_point_light(&rough, peak_view, &light, 100.0).length();
        assert!(smooth_falloff < rough_falloff);
    }
}
