//! Screen-space ambient occlusion
//!
//! Two compute passes at 8x8 workgroups: a hemisphere-kernel estimator
//! sampling the G-buffer, then a box blur sized to the rotation noise
//! tile. Both write `R32Float` storage targets; the lighting passes read
//! the blurred result with `textureLoad`.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::{shader_constants, MAX_SSAO_SAMPLES, SHADER_CAMERA, SHADER_GBUFFER_CODEC, SSAO_NOISE_SIZE};
use crate::render_graph::{PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage, TextureSize};
use crate::scene::Scene;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use half::f16;
use rand::Rng;
use std::any::Any;

/// Occlusion estimator settings
#[derive(Debug, Clone)]
pub struct SsaoConfig {
    /// World-space hemisphere radius
    pub radius: f32,
    /// Depth bias rejecting self-occlusion
    pub bias: f32,
    /// Exponent sharpening the occlusion falloff
    pub power: f32,
    pub sample_count: usize,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            radius: 0.5,
            bias: 0.025,
            power: 1.5,
            sample_count: 32,
        }
    }
}

/// Tangent-space hemisphere sample kernel
pub struct SsaoKernel {
    samples: Vec<Vec4>,
}

impl SsaoKernel {
    /// Random samples over the z-up hemisphere, denser near the origin
    ///
    /// Sample magnitude follows an accelerating interpolation from 0.1
    /// to 1.0 so close-range occluders dominate the estimate.
    pub fn generate<R: Rng>(count: usize, rng: &mut R) -> Self {
        let count = count.min(MAX_SSAO_SAMPLES);
        let samples = (0..count)
            .map(|i| {
                let dir = Vec3::new(
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(0.0..=1.0f32),
                )
                .normalize_or_zero();
                let dir = if dir == Vec3::ZERO { Vec3::Z } else { dir };

                let t = i as f32 / count.max(1) as f32;
                let scale = 0.1 + 0.9 * t * t;
                (dir * rng.gen_range(0.0..=1.0) * scale).extend(0.0)
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Vec4] {
        &self.samples
    }
}

/// Tiled random rotation vectors breaking up banding
pub struct RotationNoise {
    /// xy rotation vectors packed as rgba16f texels
    texels: Vec<u8>,
    size: u32,
}

impl RotationNoise {
    pub fn generate<R: Rng>(size: u32, rng: &mut R) -> Self {
        let mut texels = Vec::with_capacity((size * size * 8) as usize);
        for _ in 0..size * size {
            let rotation = [
                rng.gen_range(-1.0..=1.0f32),
                rng.gen_range(-1.0..=1.0f32),
                0.0,
                0.0,
            ];
            for channel in rotation {
                texels.extend_from_slice(&f16::from_f32(channel).to_le_bytes());
            }
        }
        Self { texels, size }
    }
}

/// Combine an occluded-sample tally into the final occlusion factor
///
/// An empty kernel disables the effect entirely, returning full
/// visibility rather than darkening everything.
pub fn occlusion_factor(occluded: f32, kernel_len: usize, power: f32) -> f32 {
    if kernel_len == 0 {
        return 1.0;
    }
    (1.0 - occluded / kernel_len as f32).max(0.0).powf(power)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SsaoUniform {
    /// x = radius, y = bias, z = power, w = sample count
    params: Vec4,
    kernel: [Vec4; MAX_SSAO_SAMPLES],
}

/// Hemisphere occlusion estimator compute pass
pub struct SsaoPass {
    depth: ResourceId,
    normal: ResourceId,
    pub occlusion: Option<ResourceId>,

    config: SsaoConfig,
    pipeline: Option<ComputePipelineHandle>,
    layout: Option<BindGroupLayoutHandle>,
    camera_buffer: Option<BufferHandle>,
    params_buffer: Option<BufferHandle>,
    noise_view: Option<TextureViewHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl SsaoPass {
    pub fn new(depth: ResourceId, normal: ResourceId, config: SsaoConfig) -> Self {
        Self {
            depth,
            normal,
            occlusion: None,
            config,
            pipeline: None,
            layout: None,
            camera_buffer: None,
            params_buffer: None,
            noise_view: None,
            bind_group: None,
        }
    }

    pub fn initialize<B: GraphicsBackend, R: Rng>(
        &mut self,
        backend: &mut B,
        rng: &mut R,
    ) -> BackendResult<()> {
        let camera_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("ssao_camera".to_string()),
            size: std::mem::size_of::<crate::scene::CameraUniformData>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?;

        let kernel = SsaoKernel::generate(self.config.sample_count, rng);
        let mut uniform = SsaoUniform {
            params: Vec4::new(
                self.config.radius,
                self.config.bias,
                self.config.power,
                kernel.len() as f32,
            ),
            kernel: [Vec4::ZERO; MAX_SSAO_SAMPLES],
        };
        uniform.kernel[..kernel.len()].copy_from_slice(kernel.samples());
        let params_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("ssao_params".to_string()),
                size: std::mem::size_of::<SsaoUniform>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&uniform),
        )?;

        let noise = RotationNoise::generate(SSAO_NOISE_SIZE, rng);
        let noise_texture = backend.create_texture(&TextureDescriptor {
            label: Some("ssao_noise".to_string()),
            width: noise.size,
            height: noise.size,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        backend.write_texture(noise_texture, 0, 0, &noise.texels, noise.size, noise.size);
        let noise_view =
            backend.create_texture_view(noise_texture, &TextureViewDescriptor::default())?;

        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 5,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: TextureFormat::R32Float,
                },
            },
        ])?;

        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("ssao".to_string()),
            shader: ssao_shader(),
            entry_point: "cs_main".to_string(),
            bind_group_layouts: vec![layout],
        })?;

        self.pipeline = Some(pipeline);
        self.layout = Some(layout);
        self.camera_buffer = Some(camera_buffer);
        self.params_buffer = Some(params_buffer);
        self.noise_view = Some(noise_view);
        Ok(())
    }

    /// Build the bind group once the graph textures exist
    pub fn create_bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        depth_view: TextureViewHandle,
        normal_view: TextureViewHandle,
        occlusion_view: TextureViewHandle,
    ) -> BackendResult<()> {
        let (Some(layout), Some(camera_buffer), Some(params_buffer), Some(noise_view)) =
            (self.layout, self.camera_buffer, self.params_buffer, self.noise_view)
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
                        buffer: params_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (2, BindGroupEntry::Texture(depth_view)),
                (3, BindGroupEntry::Texture(normal_view)),
                (4, BindGroupEntry::Texture(noise_view)),
                (5, BindGroupEntry::StorageTexture(occlusion_view)),
            ],
        )?);
        Ok(())
    }

    pub fn update<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &Scene, aspect: f32) {
        if let Some(camera_buffer) = self.camera_buffer {
            let data = scene.camera.uniform_data(aspect);
            backend.write_buffer(camera_buffer, 0, bytemuck::bytes_of(&data));
        }
    }
}

impl RenderPass for SsaoPass {
    fn name(&self) -> &str {
        "ssao"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let occlusion = ctx.create_texture_relative(
            "ssao_raw",
            TextureSize::default(),
            TextureFormat::R32Float,
            TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        );
        ctx.read(self.depth, ResourceUsage::TextureRead);
        ctx.read(self.normal, ResourceUsage::TextureRead);
        ctx.write(occlusion, ResourceUsage::StorageWrite);
        self.occlusion = Some(occlusion);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(pipeline), Some(bind_group)) = (self.pipeline, self.bind_group) else {
            return;
        };
        let (width, height) = (ctx.width, ctx.height);
        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };
        backend.begin_compute_pass(Some("ssao"));
        backend.set_compute_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.dispatch_compute(width.div_ceil(8), height.div_ceil(8), 1);
        backend.end_compute_pass();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Box blur over the noise tile footprint
pub struct SsaoBlurPass {
    raw: ResourceId,
    pub blurred: Option<ResourceId>,

    pipeline: Option<ComputePipelineHandle>,
    layout: Option<BindGroupLayoutHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl SsaoBlurPass {
    pub fn new(raw: ResourceId) -> Self {
        Self {
            raw,
            blurred: None,
            pipeline: None,
            layout: None,
            bind_group: None,
        }
    }

    pub fn initialize<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<()> {
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    dimension: TextureViewDimension::D2,
                },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: TextureFormat::R32Float,
                },
            },
        ])?;
        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("ssao_blur".to_string()),
            shader: ssao_blur_shader(),
            entry_point: "cs_main".to_string(),
            bind_group_layouts: vec![layout],
        })?;
        self.pipeline = Some(pipeline);
        self.layout = Some(layout);
        Ok(())
    }

    pub fn create_bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        raw_view: TextureViewHandle,
        blurred_view: TextureViewHandle,
    ) -> BackendResult<()> {
        let Some(layout) = self.layout else {
            return Ok(());
        };
        self.bind_group = Some(backend.create_bind_group(
            layout,
            &[
                (0, BindGroupEntry::Texture(raw_view)),
                (1, BindGroupEntry::StorageTexture(blurred_view)),
            ],
        )?);
        Ok(())
    }
}

impl RenderPass for SsaoBlurPass {
    fn name(&self) -> &str {
        "ssao_blur"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let blurred = ctx.create_texture_relative(
            "ssao_blurred",
            TextureSize::default(),
            TextureFormat::R32Float,
            TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        );
        ctx.read(self.raw, ResourceUsage::TextureRead);
        ctx.write(blurred, ResourceUsage::StorageWrite);
        self.blurred = Some(blurred);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(pipeline), Some(bind_group)) = (self.pipeline, self.bind_group) else {
            return;
        };
        let (width, height) = (ctx.width, ctx.height);
        let Some(backend) = ctx.backend::<WgpuBackend>() else {
            return;
        };
        backend.begin_compute_pass(Some("ssao_blur"));
        backend.set_compute_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.dispatch_compute(width.div_ceil(8), height.div_ceil(8), 1);
        backend.end_compute_pass();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn ssao_shader() -> String {
    format!(
        "{}{}{}const NOISE_SIZE: u32 = {}u;\n{}",
        shader_constants(),
        SHADER_CAMERA,
        SHADER_GBUFFER_CODEC,
        SSAO_NOISE_SIZE,
        SSAO_SHADER_BODY
    )
}

const SSAO_SHADER_BODY: &str = r#"
struct SsaoParams {
    params: vec4<f32>,
    kernel: array<vec4<f32>, MAX_SSAO_SAMPLES>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> ssao: SsaoParams;
@group(0) @binding(2) var depth_texture: texture_depth_2d;
@group(0) @binding(3) var normal_texture: texture_2d<f32>;
@group(0) @binding(4) var noise_texture: texture_2d<f32>;
@group(0) @binding(5) var output: texture_storage_2d<r32float, write>;

fn view_position(pixel: vec2<u32>, dims: vec2<u32>, depth: f32) -> vec3<f32> {
    let uv = (vec2<f32>(pixel) + 0.5) / vec2<f32>(dims);
    let ndc = vec3<f32>(uv.x * 2.0 - 1.0, (1.0 - uv.y) * 2.0 - 1.0, depth);
    let view = camera.inv_proj * vec4<f32>(ndc, 1.0);
    return view.xyz / view.w;
}

@compute @workgroup_size(8, 8)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(output);
    if (gid.x >= dims.x || gid.y >= dims.y) {
        return;
    }

    let depth = textureLoad(depth_texture, gid.xy, 0);
    if (depth >= 1.0) {
        textureStore(output, gid.xy, vec4<f32>(1.0));
        return;
    }

    let sample_count = u32(ssao.params.w);
    if (sample_count == 0u) {
        textureStore(output, gid.xy, vec4<f32>(1.0));
        return;
    }

    let radius = ssao.params.x;
    let bias = ssao.params.y;
    let power = ssao.params.z;

    let origin = view_position(gid.xy, dims, depth);
    let world_normal = decode_normal(textureLoad(normal_texture, gid.xy, 0).xy);
    let normal = normalize((camera.view * vec4<f32>(world_normal, 0.0)).xyz);

    let noise = textureLoad(noise_texture, gid.xy % NOISE_SIZE, 0).xyz;
    let tangent = normalize(noise - normal * dot(noise, normal));
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    var occluded = 0.0;
    for (var i = 0u; i < sample_count; i = i + 1u) {
        let sample_view = origin + tbn * ssao.kernel[i].xyz * radius;

        var clip = camera.proj * vec4<f32>(sample_view, 1.0);
        let ndc = clip.xyz / clip.w;
        if (abs(ndc.x) > 1.0 || abs(ndc.y) > 1.0) {
            continue;
        }
        let sample_uv = vec2<f32>(ndc.x * 0.5 + 0.5, 1.0 - (ndc.y * 0.5 + 0.5));
        let sample_pixel = vec2<u32>(sample_uv * vec2<f32>(dims));
        let stored_depth = textureLoad(depth_texture, min(sample_pixel, dims - 1u), 0);
        let stored_view = view_position(sample_pixel, dims, stored_depth);

        let range_check = smoothstep(0.0, 1.0, radius / abs(origin.z - stored_view.z));
        if (stored_view.z >= sample_view.z + bias) {
            occluded = occluded + range_check;
        }
    }

    let factor = pow(max(1.0 - occluded / f32(sample_count), 0.0), power);
    textureStore(output, gid.xy, vec4<f32>(factor));
}
"#;

fn ssao_blur_shader() -> String {
    format!("const NOISE_SIZE: i32 = {};\n{}", SSAO_NOISE_SIZE, SSAO_BLUR_SHADER_BODY)
}

const SSAO_BLUR_SHADER_BODY: &str = r#"
@group(0) @binding(0) var input: texture_2d<f32>;
@group(0) @binding(1) var output: texture_storage_2d<r32float, write>;

@compute @workgroup_size(8, 8)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = vec2<i32>(textureDimensions(output));
    let pixel = vec2<i32>(gid.xy);
    if (pixel.x >= dims.x || pixel.y >= dims.y) {
        return;
    }

    let half_size = NOISE_SIZE / 2;
    var sum = 0.0;
    for (var y = -half_size; y < half_size; y = y + 1) {
        for (var x = -half_size; x < half_size; x = x + 1) {
            let coord = clamp(pixel + vec2<i32>(x, y), vec2<i32>(0), dims - 1);
            sum = sum + textureLoad(input, coord, 0).r;
        }
    }
    let count = f32(NOISE_SIZE * NOISE_SIZE);
    textureStore(output, gid.xy, vec4<f32>(sum / count));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn kernel_samples_stay_in_upper_hemisphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = SsaoKernel::generate(64, &mut rng);
        assert_eq!(kernel.len(), 64);
        for sample in kernel.samples() {
            assert!(sample.z >= 0.0, "sample below hemisphere: {:?}", sample);
            assert!(sample.truncate().length() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn kernel_density_increases_toward_origin() {
        let mut rng = StdRng::seed_from_u64(42);
        let kernel = SsaoKernel::generate(64, &mut rng);
        let quarter = kernel.len() / 4;
        let early: f32 = kernel.samples()[..quarter]
            .iter()
            .map(|s| s.truncate().length())
            .sum::<f32>()
            / quarter as f32;
        let late: f32 = kernel.samples()[kernel.len() - quarter..]
            .iter()
            .map(|s| s.truncate().length())
            .sum::<f32>()
            / quarter as f32;
        assert!(early < late, "early {} late {}", early, late);
    }

    #[test]
    fn kernel_is_capped_at_maximum() {
        let mut rng = StdRng::seed_from_u64(1);
        let kernel = SsaoKernel::generate(500, &mut rng);
        assert_eq!(kernel.len(), MAX_SSAO_SAMPLES);
    }

    #[test]
    fn empty_kernel_means_fully_visible() {
        assert_eq!(occlusion_factor(0.0, 0, 2.0), 1.0);
    }

    #[test]
    fn full_occlusion_goes_dark() {
        assert_eq!(occlusion_factor(32.0, 32, 1.0), 0.0);
        let partial = occlusion_factor(16.0, 32, 1.0);
        assert!((partial - 0.5).abs() < 1e-6);
    }

    #[test]
    fn noise_texels_fill_the_tile() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = RotationNoise::generate(SSAO_NOISE_SIZE, &mut rng);
        assert_eq!(
            noise.texels.len(),
            (SSAO_NOISE_SIZE * SSAO_NOISE_SIZE * 8) as usize
        );
    }
}
